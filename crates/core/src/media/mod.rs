//! RTP reception and depacketization.
//!
//! This module provides the [`Depacketizer`] trait and codec-specific
//! implementations that reassemble RTP payloads into whole encoded frames.
//!
//! ## RTP overview (RFC 3550)
//!
//! A camera splits each encoded video frame into one or more RTP packets.
//! Every packet carries:
//!
//! - **Sequence number** (16-bit, wrapping): gaps mean loss.
//! - **Timestamp** (32-bit): media clock, 90 kHz for video.
//! - **Marker bit**: set on the last packet of an access unit (frame).
//!
//! [`MediaStream`] ties one depacketizer to the sequence/timestamp state of
//! one elementary stream and emits [`RawFrame`]s.
//!
//! ## Supported payload formats
//!
//! | Codec | Module | RFC |
//! |-------|--------|-----|
//! | H.264 | [`h264`] | [RFC 6184](https://tools.ietf.org/html/rfc6184) |
//! | H.265 | [`h265`] | [RFC 7798](https://tools.ietf.org/html/rfc7798) |
//! | MJPEG | [`mjpeg`] | [RFC 2435](https://tools.ietf.org/html/rfc2435) |
//! | audio, metadata | [`passthrough`] | - |

pub mod h264;
pub mod h265;
pub mod mjpeg;
pub mod passthrough;
pub mod rtp;

use bytes::Bytes;

use crate::protocol::sdp::decode_sprop_parameter_sets;
use crate::stream::{RawFrame, StreamDescriptor, StreamKind};
use rtp::{RtpPacket, TimestampUnwrapper, ticks_to_micros};

/// One reassembled frame, still in RTP time.
#[derive(Debug, Clone)]
pub struct AccessUnit {
    pub payload: Bytes,
    pub rtp_timestamp: u32,
    pub keyframe: bool,
}

/// Codec-specific RTP depacketizer.
///
/// Implementations buffer packets until a frame boundary (marker bit or a
/// timestamp change) and hand back completed frames. A single call can
/// complete more than one frame when a marker was lost.
pub trait Depacketizer: Send {
    /// Feed one packet; returns every frame it completed.
    fn push(&mut self, packet: &RtpPacket) -> Vec<AccessUnit>;

    /// Drop partial state after packet loss.
    fn discard(&mut self);

    /// Payload format name, for logs.
    fn codec_name(&self) -> &'static str;
}

/// Pick a depacketizer for a discovered stream.
pub fn depacketizer_for(stream: &StreamDescriptor) -> Box<dyn Depacketizer> {
    let codec = stream.codec.to_ascii_uppercase();
    match (stream.kind, codec.as_str()) {
        (StreamKind::Video, "H264") => {
            let sprop = stream
                .fmtp_param("sprop-parameter-sets")
                .and_then(decode_sprop_parameter_sets);
            Box::new(h264::H264Depacketizer::new(sprop))
        }
        (StreamKind::Video, "H265" | "HEVC") => Box::new(h265::H265Depacketizer::new()),
        (StreamKind::Video, "JPEG") => Box::new(mjpeg::MjpegDepacketizer::new()),
        (StreamKind::Audio, _) => Box::new(passthrough::PacketDepacketizer::new()),
        _ => {
            tracing::debug!(
                stream = stream.index,
                codec = %stream.codec,
                "no dedicated depacketizer, aggregating by marker"
            );
            Box::new(passthrough::MarkerDepacketizer::new())
        }
    }
}

/// Receive state for one elementary stream.
pub struct MediaStream {
    index: usize,
    kind: StreamKind,
    clock_rate: u32,
    depacketizer: Box<dyn Depacketizer>,
    timestamps: TimestampUnwrapper,
    next_sequence: Option<u16>,
    lost: u64,
}

impl MediaStream {
    pub fn new(stream: &StreamDescriptor) -> Self {
        Self {
            index: stream.index,
            kind: stream.kind,
            clock_rate: stream.clock_rate,
            depacketizer: depacketizer_for(stream),
            timestamps: TimestampUnwrapper::default(),
            next_sequence: None,
            lost: 0,
        }
    }

    pub fn kind(&self) -> StreamKind {
        self.kind
    }

    /// Packets lost since the stream started.
    pub fn lost_packets(&self) -> u64 {
        self.lost
    }

    /// Feed one RTP packet; returns completed frames.
    pub fn push(&mut self, packet: &RtpPacket) -> Vec<RawFrame> {
        if let Some(expected) = self.next_sequence {
            let gap = packet.sequence.wrapping_sub(expected);
            if gap != 0 {
                if gap < 0x8000 {
                    self.lost += gap as u64;
                    tracing::debug!(
                        stream = self.index,
                        expected,
                        got = packet.sequence,
                        codec = self.depacketizer.codec_name(),
                        "RTP packet loss"
                    );
                    self.depacketizer.discard();
                } else {
                    // late or duplicate
                    tracing::trace!(stream = self.index, seq = packet.sequence, "stale RTP packet");
                    return Vec::new();
                }
            }
        }
        self.next_sequence = Some(packet.sequence.wrapping_add(1));

        self.depacketizer
            .push(packet)
            .into_iter()
            .map(|unit| {
                let ticks = self.timestamps.unwrap(unit.rtp_timestamp);
                RawFrame {
                    stream_index: self.index,
                    kind: self.kind,
                    payload: unit.payload,
                    timestamp_us: ticks_to_micros(ticks, self.clock_rate),
                    keyframe: unit.keyframe,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(kind: StreamKind, codec: &str, clock_rate: u32) -> StreamDescriptor {
        StreamDescriptor {
            index: 1,
            kind,
            codec: codec.into(),
            payload_type: 97,
            clock_rate,
            channels: None,
            width: None,
            height: None,
            fps: None,
            fmtp: Vec::new(),
            control: "rtsp://cam/track".into(),
        }
    }

    fn rtp(sequence: u16, timestamp: u32, payload: &'static [u8]) -> RtpPacket {
        RtpPacket {
            marker: true,
            payload_type: 97,
            sequence,
            timestamp,
            ssrc: 9,
            payload: Bytes::from_static(payload),
        }
    }

    #[test]
    fn audio_timestamps_start_at_zero() {
        let mut stream = MediaStream::new(&descriptor(StreamKind::Audio, "PCMU", 8000));
        let first = stream.push(&rtp(100, 50_000, b"a"));
        let second = stream.push(&rtp(101, 58_000, b"b"));
        assert_eq!(first[0].timestamp_us, 0);
        assert_eq!(second[0].timestamp_us, 1_000_000);
        assert_eq!(second[0].stream_index, 1);
        assert_eq!(second[0].kind, StreamKind::Audio);
    }

    #[test]
    fn counts_lost_packets_and_drops_stale() {
        let mut stream = MediaStream::new(&descriptor(StreamKind::Audio, "PCMA", 8000));
        stream.push(&rtp(10, 0, b"a"));
        assert_eq!(stream.push(&rtp(13, 480, b"b")).len(), 1);
        assert_eq!(stream.lost_packets(), 2);
        assert!(stream.push(&rtp(12, 320, b"c")).is_empty());
    }

    #[test]
    fn picks_depacketizer_by_codec() {
        assert_eq!(
            depacketizer_for(&descriptor(StreamKind::Video, "h264", 90_000)).codec_name(),
            "H264"
        );
        assert_eq!(
            depacketizer_for(&descriptor(StreamKind::Video, "JPEG", 90_000)).codec_name(),
            "JPEG"
        );
        assert_eq!(
            depacketizer_for(&descriptor(StreamKind::Metadata, "vnd.onvif.metadata", 90_000))
                .codec_name(),
            "marker"
        );
    }
}
