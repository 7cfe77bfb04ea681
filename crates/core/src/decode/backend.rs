//! Codec backends behind [`DecodePipeline`](super::DecodePipeline).

use image::ImageFormat;

use super::{DecodedFrame, PixelFormat};
use crate::error::{IngestError, Result};

/// One codec implementation.
///
/// A backend may return zero frames (buffering) or several (reordering
/// flush). Errors are non-fatal: the pipeline logs them and keeps going.
pub trait CodecBackend: Send {
    fn decode(&mut self, payload: &[u8], timestamp_us: i64) -> Result<Vec<DecodedFrame>>;

    fn output_format(&self) -> PixelFormat;

    /// Free decoder-internal buffers. Called once by
    /// [`DecodePipeline::release`](super::DecodePipeline::release).
    fn release(&mut self) {}
}

/// Baseline JPEG frames decoded with the `image` crate to RGB24.
#[derive(Debug, Default)]
pub struct MjpegBackend;

impl MjpegBackend {
    pub fn new() -> Self {
        Self
    }
}

impl CodecBackend for MjpegBackend {
    fn decode(&mut self, payload: &[u8], timestamp_us: i64) -> Result<Vec<DecodedFrame>> {
        let image = image::load_from_memory_with_format(payload, ImageFormat::Jpeg)
            .map_err(|e| IngestError::Decode(e.to_string()))?
            .into_rgb8();
        let (width, height) = image.dimensions();

        Ok(vec![DecodedFrame {
            data: image.into_raw(),
            width,
            height,
            timestamp_us,
            format: PixelFormat::Rgb24,
        }])
    }

    fn output_format(&self) -> PixelFormat {
        PixelFormat::Rgb24
    }
}

#[cfg(feature = "h264")]
pub use self::openh264_backend::OpenH264Backend;

#[cfg(feature = "h264")]
mod openh264_backend {
    use openh264::decoder::Decoder;
    use openh264::formats::YUVSource;

    use super::{CodecBackend, DecodedFrame, PixelFormat};
    use crate::error::{IngestError, Result};

    /// H.264 Annex-B access units decoded with Cisco's OpenH264.
    ///
    /// Output is tightly packed I420 unless RGB24 is requested.
    pub struct OpenH264Backend {
        decoder: Option<Decoder>,
        output: PixelFormat,
    }

    impl OpenH264Backend {
        pub fn new(output: PixelFormat) -> Result<Self> {
            let decoder = Decoder::new().map_err(|e| IngestError::Decode(e.to_string()))?;
            Ok(Self {
                decoder: Some(decoder),
                output,
            })
        }
    }

    impl CodecBackend for OpenH264Backend {
        fn decode(&mut self, payload: &[u8], timestamp_us: i64) -> Result<Vec<DecodedFrame>> {
            let decoder = self.decoder.as_mut().ok_or(IngestError::ResourceReleased)?;
            let Some(yuv) = decoder
                .decode(payload)
                .map_err(|e| IngestError::Decode(e.to_string()))?
            else {
                return Ok(Vec::new());
            };

            let (width, height) = yuv.dimensions();
            let data = match self.output {
                PixelFormat::Rgb24 => {
                    let mut rgb = vec![0u8; width * height * 3];
                    yuv.write_rgb8(&mut rgb);
                    rgb
                }
                PixelFormat::Yuv420 => pack_i420(&yuv, width, height),
            };

            Ok(vec![DecodedFrame {
                data,
                width: width as u32,
                height: height as u32,
                timestamp_us,
                format: self.output,
            }])
        }

        fn output_format(&self) -> PixelFormat {
            self.output
        }

        fn release(&mut self) {
            self.decoder = None;
        }
    }

    /// Copy the three planes row by row, dropping stride padding.
    fn pack_i420(yuv: &impl YUVSource, width: usize, height: usize) -> Vec<u8> {
        let (y_stride, u_stride, v_stride) = yuv.strides();
        let (chroma_w, chroma_h) = (width.div_ceil(2), height.div_ceil(2));
        let mut out = Vec::with_capacity(width * height + 2 * chroma_w * chroma_h);

        for row in 0..height {
            out.extend_from_slice(&yuv.y()[row * y_stride..row * y_stride + width]);
        }
        for (plane, stride) in [(yuv.u(), u_stride), (yuv.v(), v_stride)] {
            for row in 0..chroma_h {
                out.extend_from_slice(&plane[row * stride..row * stride + chroma_w]);
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    fn jpeg(width: u32, height: u32) -> Vec<u8> {
        let image = image::RgbImage::from_pixel(width, height, image::Rgb([200, 40, 40]));
        let mut out = Cursor::new(Vec::new());
        image.write_to(&mut out, ImageFormat::Jpeg).unwrap();
        out.into_inner()
    }

    #[test]
    fn mjpeg_decodes_to_rgb24() {
        let mut backend = MjpegBackend::new();
        let frames = backend.decode(&jpeg(32, 16), 40_000).unwrap();
        assert_eq!(frames.len(), 1);
        let frame = &frames[0];
        assert_eq!((frame.width, frame.height), (32, 16));
        assert_eq!(frame.format, PixelFormat::Rgb24);
        assert_eq!(frame.data.len(), 32 * 16 * 3);
        assert_eq!(frame.timestamp_us, 40_000);
    }

    #[test]
    fn mjpeg_rejects_garbage() {
        let mut backend = MjpegBackend::new();
        assert!(matches!(
            backend.decode(&[0xFF, 0xD8, 0x00, 0x01], 0),
            Err(IngestError::Decode(_))
        ));
    }
}
