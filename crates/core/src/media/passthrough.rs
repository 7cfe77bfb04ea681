//! Codec-agnostic depacketizers for audio and metadata streams.

use bytes::BytesMut;

use super::rtp::RtpPacket;
use super::{AccessUnit, Depacketizer};

/// One RTP payload is one frame (G.711, most camera AAC/ADPCM).
#[derive(Debug, Default)]
pub struct PacketDepacketizer;

impl PacketDepacketizer {
    pub fn new() -> Self {
        Self
    }
}

impl Depacketizer for PacketDepacketizer {
    fn push(&mut self, packet: &RtpPacket) -> Vec<AccessUnit> {
        if packet.payload.is_empty() {
            return Vec::new();
        }
        vec![AccessUnit {
            payload: packet.payload.clone(),
            rtp_timestamp: packet.timestamp,
            keyframe: true,
        }]
    }

    fn discard(&mut self) {}

    fn codec_name(&self) -> &'static str {
        "audio"
    }
}

/// Concatenates payloads sharing a timestamp until the marker bit.
///
/// Used for ONVIF metadata, where one XML document spans several packets.
#[derive(Debug, Default)]
pub struct MarkerDepacketizer {
    buffer: BytesMut,
    timestamp: Option<u32>,
}

impl MarkerDepacketizer {
    pub fn new() -> Self {
        Self::default()
    }

    fn flush(&mut self, out: &mut Vec<AccessUnit>) {
        if let Some(rtp_timestamp) = self.timestamp.take()
            && !self.buffer.is_empty()
        {
            out.push(AccessUnit {
                payload: self.buffer.split().freeze(),
                rtp_timestamp,
                keyframe: true,
            });
        }
        self.buffer.clear();
    }
}

impl Depacketizer for MarkerDepacketizer {
    fn push(&mut self, packet: &RtpPacket) -> Vec<AccessUnit> {
        let mut out = Vec::new();
        if self.timestamp.is_some_and(|ts| ts != packet.timestamp) {
            self.flush(&mut out);
        }
        self.timestamp = Some(packet.timestamp);
        self.buffer.extend_from_slice(&packet.payload);
        if packet.marker {
            self.flush(&mut out);
        }
        out
    }

    fn discard(&mut self) {
        self.buffer.clear();
        self.timestamp = None;
    }

    fn codec_name(&self) -> &'static str {
        "marker"
    }
}
