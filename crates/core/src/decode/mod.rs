//! Per-stream decoding of [`RawFrame`]s into raster images.
//!
//! A [`DecodePipeline`] is bound to one `(codec, width, height)` and
//! delegates to a [`CodecBackend`]. A [`DecodeWorker`] runs a pipeline on
//! its own thread behind a bounded [`FrameQueue`], so a slow decoder never
//! stalls the session's reader thread.
//!
//! | Codec | Backend | Output |
//! |-------|---------|--------|
//! | MJPEG | [`MjpegBackend`] (`image`) | RGB24 |
//! | H.264 | `OpenH264Backend` (`h264` feature) | YUV420 (I420) |
//! | H.265 | none built in | |

pub mod backend;
mod queue;
mod worker;

use std::fmt;

use crate::error::{IngestError, Result};
use crate::media::h264;
use crate::stream::RawFrame;

pub use backend::{CodecBackend, MjpegBackend};
pub use queue::FrameQueue;
pub use worker::DecodeWorker;

/// Video codec a pipeline is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VideoCodec {
    H264,
    H265,
    Mjpeg,
    Unknown,
}

impl VideoCodec {
    /// Infer the codec from a free-text label such as an SDP encoding name.
    ///
    /// Case-insensitive; anything unrecognised is [`Unknown`](Self::Unknown).
    ///
    /// ```
    /// use ingest::decode::VideoCodec;
    ///
    /// assert_eq!(VideoCodec::from_label("avc"), VideoCodec::H264);
    /// assert_eq!(VideoCodec::from_label("H.265"), VideoCodec::H265);
    /// assert_eq!(VideoCodec::from_label("vp8"), VideoCodec::Unknown);
    /// ```
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_uppercase().as_str() {
            "H.264" | "H264" | "AVC" => Self::H264,
            "H.265" | "H265" | "HEVC" => Self::H265,
            "MJPEG" | "JPEG" => Self::Mjpeg,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for VideoCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::H264 => write!(f, "H264"),
            Self::H265 => write!(f, "H265"),
            Self::Mjpeg => write!(f, "MJPEG"),
            Self::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// Planar I420: full-size Y, then quarter-size U and V.
    Yuv420,
    /// Packed 8-bit R, G, B.
    Rgb24,
}

/// One decoded picture. Owned by whoever receives it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedFrame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Copied from the source [`RawFrame::timestamp_us`].
    pub timestamp_us: i64,
    pub format: PixelFormat,
}

impl DecodedFrame {
    /// Pack RGB24 pixels into `0x00RRGGBB` integers, one per pixel.
    ///
    /// `None` for YUV420 frames; colour conversion belongs to the renderer.
    pub fn to_rgb_raster(&self) -> Option<Vec<u32>> {
        if self.format != PixelFormat::Rgb24 {
            return None;
        }
        Some(
            self.data
                .chunks_exact(3)
                .map(|px| (px[0] as u32) << 16 | (px[1] as u32) << 8 | px[2] as u32)
                .collect(),
        )
    }
}

/// What a live pipeline is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecoderInfo {
    pub codec: VideoCodec,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
}

/// Decode settings.
#[derive(Debug, Clone)]
pub struct DecodeConfig {
    /// Frames buffered between reader and decode worker.
    pub queue_capacity: usize,
    /// Output format requested from the H.264 backend. MJPEG is always RGB24.
    pub h264_output: PixelFormat,
}

impl Default for DecodeConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 16,
            h264_output: PixelFormat::Yuv420,
        }
    }
}

/// Sink for decoded frames.
pub type DecodedFrameCallback = Box<dyn FnMut(DecodedFrame) + Send>;

/// One decoder for one elementary stream.
pub struct DecodePipeline {
    codec: VideoCodec,
    width: u32,
    height: u32,
    backend: Option<Box<dyn CodecBackend>>,
    callback: Option<DecodedFrameCallback>,
    released: bool,
    decoded_frames: u64,
    failed_frames: u64,
}

impl DecodePipeline {
    /// Build a pipeline with the built-in backend for `codec`.
    ///
    /// Never fails: without a backend, [`info`](Self::info) is `None` and
    /// every decode returns `Ok(false)`. A zero width or height means
    /// "unknown"; for H.264 it is filled from the first in-band SPS.
    pub fn new(codec: VideoCodec, width: u32, height: u32) -> Self {
        Self::with_config(codec, width, height, &DecodeConfig::default())
    }

    pub fn with_config(codec: VideoCodec, width: u32, height: u32, config: &DecodeConfig) -> Self {
        let backend = builtin_backend(codec, config);
        if backend.is_none() {
            tracing::warn!(%codec, "no decoder backend available");
        }
        Self::build(codec, width, height, backend)
    }

    /// Use a caller-supplied backend.
    pub fn with_backend(
        codec: VideoCodec,
        width: u32,
        height: u32,
        backend: Box<dyn CodecBackend>,
    ) -> Self {
        Self::build(codec, width, height, Some(backend))
    }

    fn build(
        codec: VideoCodec,
        width: u32,
        height: u32,
        backend: Option<Box<dyn CodecBackend>>,
    ) -> Self {
        Self {
            codec,
            width,
            height,
            backend,
            callback: None,
            released: false,
            decoded_frames: 0,
            failed_frames: 0,
        }
    }

    /// Replace the decoded-frame sink; `None` unregisters.
    pub fn set_callback(&mut self, callback: Option<DecodedFrameCallback>) {
        self.callback = callback;
    }

    pub fn info(&self) -> Option<DecoderInfo> {
        if self.released {
            return None;
        }
        self.backend.as_ref().map(|backend| DecoderInfo {
            codec: self.codec,
            width: self.width,
            height: self.height,
            format: backend.output_format(),
        })
    }

    /// Decode one encoded frame.
    ///
    /// `Ok(true)` when at least one picture came out (and was handed to the
    /// callback, if any). `Ok(false)` when the decoder is buffering, has no
    /// backend, or the frame was corrupt; the pipeline stays usable.
    pub fn decode(&mut self, frame: &RawFrame) -> Result<bool> {
        if self.released {
            return Err(IngestError::ResourceReleased);
        }
        let Some(backend) = self.backend.as_mut() else {
            return Ok(false);
        };

        if self.codec == VideoCodec::H264
            && (self.width == 0 || self.height == 0)
            && let Some((width, height)) = h264::find_sps_dimensions(&frame.payload)
        {
            tracing::debug!(width, height, "decoder resolution from SPS");
            self.width = width;
            self.height = height;
        }

        let pictures = match backend.decode(&frame.payload, frame.timestamp_us) {
            Ok(pictures) => pictures,
            Err(error) => {
                self.failed_frames += 1;
                tracing::debug!(
                    codec = %self.codec,
                    stream = frame.stream_index,
                    %error,
                    "frame dropped by decoder"
                );
                return Ok(false);
            }
        };

        let produced = !pictures.is_empty();
        for picture in pictures {
            self.decoded_frames += 1;
            if self.width != 0
                && self.height != 0
                && (picture.width, picture.height) != (self.width, self.height)
            {
                tracing::warn!(
                    codec = %self.codec,
                    bound = %format!("{}x{}", self.width, self.height),
                    decoded = %format!("{}x{}", picture.width, picture.height),
                    "decoded resolution differs from pipeline"
                );
            }
            if let Some(callback) = self.callback.as_mut() {
                callback(picture);
            }
        }
        Ok(produced)
    }

    /// Free decoder buffers. Later decodes fail with `ResourceReleased`.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        if let Some(backend) = self.backend.as_mut() {
            backend.release();
        }
        self.backend = None;
        self.callback = None;
        self.released = true;
        tracing::debug!(
            codec = %self.codec,
            decoded = self.decoded_frames,
            failed = self.failed_frames,
            "decoder released"
        );
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    pub fn codec(&self) -> VideoCodec {
        self.codec
    }

    pub fn decoded_frames(&self) -> u64 {
        self.decoded_frames
    }

    pub fn failed_frames(&self) -> u64 {
        self.failed_frames
    }
}

impl fmt::Debug for DecodePipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecodePipeline")
            .field("codec", &self.codec)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("has_backend", &self.backend.is_some())
            .field("released", &self.released)
            .finish()
    }
}

#[cfg_attr(not(feature = "h264"), allow(unused_variables))]
fn builtin_backend(codec: VideoCodec, config: &DecodeConfig) -> Option<Box<dyn CodecBackend>> {
    match codec {
        VideoCodec::Mjpeg => Some(Box::new(MjpegBackend::new())),
        #[cfg(feature = "h264")]
        VideoCodec::H264 => match backend::OpenH264Backend::new(config.h264_output) {
            Ok(backend) => Some(Box::new(backend)),
            Err(error) => {
                tracing::warn!(%error, "openh264 initialisation failed");
                None
            }
        },
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::sync::Arc;

    use bytes::Bytes;
    use parking_lot::Mutex;

    use super::*;
    use crate::stream::StreamKind;

    fn jpeg_frame(width: u32, height: u32) -> RawFrame {
        let image = image::RgbImage::from_pixel(width, height, image::Rgb([0, 128, 255]));
        let mut out = Cursor::new(Vec::new());
        image.write_to(&mut out, image::ImageFormat::Jpeg).unwrap();
        RawFrame {
            stream_index: 0,
            kind: StreamKind::Video,
            payload: Bytes::from(out.into_inner()),
            timestamp_us: 1_000,
            keyframe: true,
        }
    }

    #[test]
    fn codec_labels() {
        for (label, codec) in [
            ("H.264", VideoCodec::H264),
            ("h264", VideoCodec::H264),
            ("Avc", VideoCodec::H264),
            ("h.265", VideoCodec::H265),
            ("HEVC", VideoCodec::H265),
            ("mjpeg", VideoCodec::Mjpeg),
            ("JPEG", VideoCodec::Mjpeg),
            ("", VideoCodec::Unknown),
            ("MPEG4-GENERIC", VideoCodec::Unknown),
        ] {
            assert_eq!(VideoCodec::from_label(label), codec, "{label}");
        }
    }

    #[test]
    fn rgb_raster_packs_pixels() {
        let frame = DecodedFrame {
            data: vec![0x12, 0x34, 0x56, 0xFF, 0x00, 0x80],
            width: 2,
            height: 1,
            timestamp_us: 0,
            format: PixelFormat::Rgb24,
        };
        assert_eq!(frame.to_rgb_raster(), Some(vec![0x0012_3456, 0x00FF_0080]));

        let yuv = DecodedFrame {
            format: PixelFormat::Yuv420,
            ..frame
        };
        assert_eq!(yuv.to_rgb_raster(), None);
    }

    #[test]
    fn mjpeg_decode_delivers_full_raster() {
        let delivered = Arc::new(Mutex::new(Vec::new()));
        let sink = delivered.clone();

        let mut pipeline = DecodePipeline::new(VideoCodec::Mjpeg, 24, 16);
        pipeline.set_callback(Some(Box::new(move |frame| sink.lock().push(frame))));

        assert!(pipeline.decode(&jpeg_frame(24, 16)).unwrap());
        let frames = delivered.lock();
        assert_eq!(frames.len(), 1);
        let raster = frames[0].to_rgb_raster().unwrap();
        assert_eq!(raster.len(), 24 * 16);
        assert_eq!(frames[0].timestamp_us, 1_000);
    }

    #[test]
    fn corrupt_frame_is_not_fatal() {
        let mut pipeline = DecodePipeline::new(VideoCodec::Mjpeg, 24, 16);
        let mut bad = jpeg_frame(24, 16);
        bad.payload = Bytes::from_static(&[0xFF, 0xD8, 0xFF]);

        assert!(!pipeline.decode(&bad).unwrap());
        assert_eq!(pipeline.failed_frames(), 1);
        assert!(pipeline.decode(&jpeg_frame(24, 16)).unwrap());
    }

    #[test]
    fn decode_after_release_fails() {
        let mut pipeline = DecodePipeline::new(VideoCodec::Mjpeg, 24, 16);
        assert!(pipeline.info().is_some());
        pipeline.release();
        assert!(pipeline.info().is_none());
        assert!(matches!(
            pipeline.decode(&jpeg_frame(24, 16)),
            Err(IngestError::ResourceReleased)
        ));
    }

    #[test]
    fn unknown_codec_has_no_info() {
        let mut pipeline = DecodePipeline::new(VideoCodec::Unknown, 640, 480);
        assert!(pipeline.info().is_none());
        assert!(!pipeline.decode(&jpeg_frame(8, 8)).unwrap());
    }

    struct CountingBackend {
        calls: Arc<Mutex<usize>>,
    }

    impl CodecBackend for CountingBackend {
        fn decode(&mut self, _payload: &[u8], timestamp_us: i64) -> Result<Vec<DecodedFrame>> {
            let mut calls = self.calls.lock();
            *calls += 1;
            // buffers the first frame, like a decoder waiting on reordering
            if *calls == 1 {
                return Ok(Vec::new());
            }
            Ok(vec![DecodedFrame {
                data: vec![0; 6],
                width: 2,
                height: 1,
                timestamp_us,
                format: PixelFormat::Yuv420,
            }])
        }

        fn output_format(&self) -> PixelFormat {
            PixelFormat::Yuv420
        }
    }

    #[test]
    fn custom_backend_and_buffering() {
        let calls = Arc::new(Mutex::new(0));
        let mut pipeline = DecodePipeline::with_backend(
            VideoCodec::H265,
            2,
            1,
            Box::new(CountingBackend { calls: calls.clone() }),
        );
        assert_eq!(pipeline.info().map(|i| i.format), Some(PixelFormat::Yuv420));

        assert!(!pipeline.decode(&jpeg_frame(8, 8)).unwrap());
        assert!(pipeline.decode(&jpeg_frame(8, 8)).unwrap());
        assert_eq!(*calls.lock(), 2);
        assert_eq!(pipeline.decoded_frames(), 1);
    }
}
