//! Elementary stream descriptors and raw frames.

use std::fmt;

use bytes::Bytes;

/// Kind of elementary stream inside an RTSP presentation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    Video,
    Audio,
    /// ONVIF event/analytics XML or other `application` media.
    Metadata,
}

impl StreamKind {
    /// Map an SDP `m=` media type to a stream kind.
    pub fn from_media_type(media: &str) -> Option<Self> {
        match media {
            "video" => Some(Self::Video),
            "audio" => Some(Self::Audio),
            "application" | "text" | "data" => Some(Self::Metadata),
            _ => None,
        }
    }

    /// Every kind, in [`slot`](Self::slot) order.
    pub const ALL: [StreamKind; 3] = [Self::Video, Self::Audio, Self::Metadata];

    /// Dense index in `0..3`, for per-kind arrays.
    pub fn slot(&self) -> usize {
        match self {
            Self::Video => 0,
            Self::Audio => 1,
            Self::Metadata => 2,
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Video => write!(f, "video"),
            Self::Audio => write!(f, "audio"),
            Self::Metadata => write!(f, "metadata"),
        }
    }
}

/// One elementary stream discovered during `connect`.
///
/// Immutable once reported. `index` is unique within a connection and equals
/// the stream's position in [`Session::streams`](crate::session::Session::streams).
#[derive(Debug, Clone, PartialEq)]
pub struct StreamDescriptor {
    pub index: usize,
    pub kind: StreamKind,
    /// Encoding name from `a=rtpmap` (e.g. `H264`, `H265`, `JPEG`, `PCMU`).
    pub codec: String,
    pub payload_type: u8,
    /// RTP clock rate in Hz.
    pub clock_rate: u32,
    pub channels: Option<u16>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub fps: Option<f32>,
    /// `a=fmtp` parameters in declaration order.
    pub fmtp: Vec<(String, String)>,
    /// Absolute control URL used for SETUP.
    pub control: String,
}

impl StreamDescriptor {
    pub fn fmtp_param(&self, name: &str) -> Option<&str> {
        self.fmtp
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Sample rate for audio streams (the RTP clock rate).
    pub fn sample_rate(&self) -> Option<u32> {
        (self.kind == StreamKind::Audio).then_some(self.clock_rate)
    }
}

/// An encoded access unit / audio frame / metadata document.
///
/// Lent to frame callbacks by reference; a callback that needs the bytes
/// after returning clones the [`Bytes`] handle (cheap, reference counted).
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub stream_index: usize,
    pub kind: StreamKind,
    pub payload: Bytes,
    /// Source capture time in microseconds since the stream's first packet.
    /// Derived from the unwrapped RTP timestamp, never from the wall clock.
    pub timestamp_us: i64,
    pub keyframe: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slots_index_all_kinds() {
        for (slot, kind) in StreamKind::ALL.iter().enumerate() {
            assert_eq!(kind.slot(), slot, "{kind}");
        }
        assert_eq!(StreamKind::from_media_type("application"), Some(StreamKind::Metadata));
        assert_eq!(StreamKind::from_media_type("message"), None);
    }
}
