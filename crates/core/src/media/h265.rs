//! H.265 (HEVC) RTP depacketizer (RFC 7798).
//!
//! Key differences from H.264 (RFC 6184):
//!
//! - **2-byte NAL unit header**. The NAL type is in bits 1..6 of the
//!   first byte:
//!
//!   ```text
//!   +---------------+---------------+
//!   |0|1|2|3|4|5|6|7|0|1|2|3|4|5|6|7|
//!   +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//!   |F|   Type    |  LayerId  | TID |
//!   +-------------+-----------------+
//!   ```
//!
//! - **Aggregation packets** (type 48, §4.4.2) and **fragmentation units**
//!   (type 49, §4.4.3). The FU header is `[S|E|FuType(6)]`.
//!
//! DONL fields (`sprop-max-don-diff` > 0) are not supported; cameras do
//! not send them.

use bytes::BytesMut;

use super::rtp::RtpPacket;
use super::{AccessUnit, Depacketizer};

const NAL_AP: u8 = 48;
const NAL_FU: u8 = 49;

fn nal_type(first_byte: u8) -> u8 {
    (first_byte >> 1) & 0x3f
}

/// IRAP pictures (BLA, IDR, CRA) start a decodable sequence.
fn is_irap(nal_type: u8) -> bool {
    (16..=21).contains(&nal_type)
}

#[derive(Debug, Default)]
pub struct H265Depacketizer {
    access_unit: BytesMut,
    timestamp: Option<u32>,
    keyframe: bool,
    fragment: Option<BytesMut>,
}

impl H265Depacketizer {
    pub fn new() -> Self {
        Self::default()
    }

    fn add_nal(&mut self, nal: &[u8]) {
        if nal.len() < 2 {
            return;
        }
        if is_irap(nal_type(nal[0])) {
            self.keyframe = true;
        }
        self.access_unit.extend_from_slice(&[0, 0, 0, 1]);
        self.access_unit.extend_from_slice(nal);
    }

    fn add_aggregation(&mut self, payload: &[u8]) {
        let mut rest = &payload[2..];
        while rest.len() >= 2 {
            let size = u16::from_be_bytes([rest[0], rest[1]]) as usize;
            if rest.len() < 2 + size {
                break;
            }
            self.add_nal(&rest[2..2 + size]);
            rest = &rest[2 + size..];
        }
    }

    fn add_fragment(&mut self, payload: &[u8]) {
        if payload.len() < 3 {
            return;
        }
        let fu_header = payload[2];
        let start = fu_header & 0x80 != 0;
        let end = fu_header & 0x40 != 0;

        if start {
            let mut nal = BytesMut::with_capacity(payload.len() * 4);
            nal.extend_from_slice(&[(payload[0] & 0x81) | ((fu_header & 0x3f) << 1), payload[1]]);
            self.fragment = Some(nal);
        }

        let Some(nal) = self.fragment.as_mut() else {
            return;
        };
        nal.extend_from_slice(&payload[3..]);

        if end && let Some(nal) = self.fragment.take() {
            self.add_nal(&nal);
        }
    }

    fn flush(&mut self, out: &mut Vec<AccessUnit>) {
        self.fragment = None;
        let Some(rtp_timestamp) = self.timestamp.take() else {
            return;
        };
        if self.access_unit.is_empty() {
            return;
        }
        out.push(AccessUnit {
            payload: self.access_unit.split().freeze(),
            rtp_timestamp,
            keyframe: std::mem::take(&mut self.keyframe),
        });
    }
}

impl Depacketizer for H265Depacketizer {
    fn push(&mut self, packet: &RtpPacket) -> Vec<AccessUnit> {
        let mut out = Vec::new();
        if self.timestamp.is_some_and(|ts| ts != packet.timestamp) {
            self.flush(&mut out);
        }
        self.timestamp = Some(packet.timestamp);

        let payload = &packet.payload[..];
        if payload.len() >= 2 {
            match nal_type(payload[0]) {
                0..=47 => self.add_nal(payload),
                NAL_AP => self.add_aggregation(payload),
                NAL_FU => self.add_fragment(payload),
                other => tracing::debug!(nal_type = other, "unsupported H.265 payload type"),
            }
        }

        if packet.marker {
            self.flush(&mut out);
        }
        out
    }

    fn discard(&mut self) {
        self.access_unit.clear();
        self.fragment = None;
        self.timestamp = None;
        self.keyframe = false;
    }

    fn codec_name(&self) -> &'static str {
        "H265"
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;
    use crate::media::h264::extract_nal_units;

    fn rtp(marker: bool, payload: Vec<u8>) -> RtpPacket {
        RtpPacket {
            marker,
            payload_type: 96,
            sequence: 0,
            timestamp: 4500,
            ssrc: 7,
            payload: Bytes::from(payload),
        }
    }

    #[test]
    fn aggregation_then_fragmented_idr() {
        let mut d = H265Depacketizer::new();
        // AP with VPS (32) and SPS (33)
        let ap = vec![0x60, 0x01, 0x00, 0x02, 0x40, 0x01, 0x00, 0x02, 0x42, 0x01];
        assert!(d.push(&rtp(false, ap)).is_empty());
        // IDR_W_RADL (19) as FU: payload header type 49 = 0x62, FU header S|19
        assert!(d.push(&rtp(false, vec![0x62, 0x01, 0x80 | 19, 0xaa])).is_empty());
        let out = d.push(&rtp(true, vec![0x62, 0x01, 0x40 | 19, 0xbb]));

        assert_eq!(out.len(), 1);
        assert!(out[0].keyframe);
        let nals = extract_nal_units(&out[0].payload);
        assert_eq!(nals.len(), 3);
        assert_eq!(nals[2], &[0x26, 0x01, 0xaa, 0xbb]);
    }

    #[test]
    fn trailing_picture_is_not_keyframe() {
        let mut d = H265Depacketizer::new();
        let out = d.push(&rtp(true, vec![0x02, 0x01, 0xd0]));
        assert_eq!(out.len(), 1);
        assert!(!out[0].keyframe);
    }
}
