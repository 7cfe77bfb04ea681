//! MJPEG RTP depacketizer (RFC 2435).
//!
//! Each RTP payload starts with an 8-byte JPEG header:
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! | Type-specific |              Fragment Offset                  |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |      Type     |       Q       |     Width     |     Height    |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! followed by a restart marker header (types 64..=127) and, on the first
//! fragment when `Q >= 128`, in-band quantization tables. The payload is
//! entropy-coded scan data only; the JFIF headers (DQT, SOF0, DHT, SOS) are
//! rebuilt here so any baseline decoder can consume the frame.
//!
//! Every JPEG frame is a keyframe.

use bytes::{BufMut, BytesMut};

use super::rtp::RtpPacket;
use super::{AccessUnit, Depacketizer};

/// Scan data of the frame being reassembled.
#[derive(Debug)]
struct PartialFrame {
    timestamp: u32,
    kind: u8,
    quality: u8,
    width: u16,
    height: u16,
    restart_interval: u16,
    tables: Option<Vec<u8>>,
    data: BytesMut,
}

#[derive(Debug, Default)]
pub struct MjpegDepacketizer {
    frame: Option<PartialFrame>,
    /// Last in-band tables, reused by frames that omit them (Q 128..=254).
    cached_tables: Option<(u8, Vec<u8>)>,
}

impl MjpegDepacketizer {
    pub fn new() -> Self {
        Self::default()
    }

    fn finish(&mut self, out: &mut Vec<AccessUnit>) {
        let Some(frame) = self.frame.take() else {
            return;
        };
        if frame.data.is_empty() {
            return;
        }

        // Some cameras put a complete JFIF image in the payload.
        if frame.data.starts_with(&[0xff, 0xd8]) {
            out.push(AccessUnit {
                payload: frame.data.freeze(),
                rtp_timestamp: frame.timestamp,
                keyframe: true,
            });
            return;
        }

        let tables = match &frame.tables {
            Some(tables) => tables.clone(),
            None => match &self.cached_tables {
                Some((q, tables)) if *q == frame.quality && frame.quality >= 128 => tables.clone(),
                _ if frame.quality < 128 => scaled_tables(frame.quality),
                _ => {
                    tracing::debug!(q = frame.quality, "JPEG frame without quantization tables");
                    return;
                }
            },
        };

        let mut jpeg = BytesMut::with_capacity(frame.data.len() + 700);
        write_headers(&mut jpeg, &frame, &tables);
        jpeg.extend_from_slice(&frame.data);
        if !frame.data.ends_with(&[0xff, 0xd9]) {
            jpeg.put_u16(0xffd9);
        }

        out.push(AccessUnit {
            payload: jpeg.freeze(),
            rtp_timestamp: frame.timestamp,
            keyframe: true,
        });
    }
}

impl Depacketizer for MjpegDepacketizer {
    fn push(&mut self, packet: &RtpPacket) -> Vec<AccessUnit> {
        let mut out = Vec::new();
        let payload = &packet.payload[..];
        if payload.len() < 8 {
            return out;
        }

        let offset = u32::from_be_bytes([0, payload[1], payload[2], payload[3]]) as usize;
        let kind = payload[4];
        let quality = payload[5];
        let width = payload[6] as u16 * 8;
        let height = payload[7] as u16 * 8;
        let mut pos = 8;

        let mut restart_interval = 0;
        if (64..=127).contains(&kind) {
            if payload.len() < pos + 4 {
                return out;
            }
            restart_interval = u16::from_be_bytes([payload[pos], payload[pos + 1]]);
            pos += 4;
        }

        if self.frame.as_ref().is_some_and(|f| f.timestamp != packet.timestamp) {
            tracing::debug!("JPEG frame ended without marker, dropping");
            self.frame = None;
        }

        if offset == 0 {
            let mut tables = None;
            if quality >= 128 {
                if payload.len() < pos + 4 {
                    return out;
                }
                let length = u16::from_be_bytes([payload[pos + 2], payload[pos + 3]]) as usize;
                pos += 4;
                if length > 0 {
                    let Some(data) = payload.get(pos..pos + length) else {
                        return out;
                    };
                    tables = Some(data.to_vec());
                    self.cached_tables = Some((quality, data.to_vec()));
                    pos += length;
                }
            }
            self.frame = Some(PartialFrame {
                timestamp: packet.timestamp,
                kind: kind & 0x3f,
                quality,
                width,
                height,
                restart_interval,
                tables,
                data: BytesMut::new(),
            });
        }

        let Some(frame) = self.frame.as_mut() else {
            // fragment of a frame whose start we missed
            return out;
        };
        if frame.data.len() != offset {
            tracing::debug!(expected = frame.data.len(), offset, "JPEG fragment gap, dropping frame");
            self.frame = None;
            return out;
        }
        frame.data.extend_from_slice(&payload[pos..]);

        if packet.marker {
            self.finish(&mut out);
        }
        out
    }

    fn discard(&mut self) {
        self.frame = None;
    }

    fn codec_name(&self) -> &'static str {
        "JPEG"
    }
}

/// RFC 2435 Appendix A luma table, zigzag order.
const LUMA_QUANT: [u8; 64] = [
    16, 11, 12, 14, 12, 10, 16, 14, 13, 14, 18, 17, 16, 19, 24, 40, 26, 24, 22, 22, 24, 49, 35, 37,
    29, 40, 58, 51, 61, 60, 57, 51, 56, 55, 64, 72, 92, 78, 64, 68, 87, 69, 55, 56, 80, 109, 81,
    87, 95, 98, 103, 104, 103, 62, 77, 113, 121, 112, 100, 120, 92, 101, 103, 99,
];

/// RFC 2435 Appendix A chroma table, zigzag order.
const CHROMA_QUANT: [u8; 64] = [
    17, 18, 18, 24, 21, 24, 47, 26, 26, 47, 99, 66, 56, 66, 99, 99, 99, 99, 99, 99, 99, 99, 99, 99,
    99, 99, 99, 99, 99, 99, 99, 99, 99, 99, 99, 99, 99, 99, 99, 99, 99, 99, 99, 99, 99, 99, 99, 99,
    99, 99, 99, 99, 99, 99, 99, 99, 99, 99, 99, 99, 99, 99, 99, 99,
];

/// Luma and chroma tables for `Q` in 1..=99 (RFC 2435 §4.2).
fn scaled_tables(quality: u8) -> Vec<u8> {
    let q = quality.clamp(1, 99) as u32;
    let scale = if q < 50 { 5000 / q } else { 200 - q * 2 };
    LUMA_QUANT
        .iter()
        .chain(CHROMA_QUANT.iter())
        .map(|&v| ((v as u32 * scale + 50) / 100).clamp(1, 255) as u8)
        .collect()
}

// ITU-T T.81 Annex K.3 Huffman tables.
const DC_LUMA_BITS: [u8; 16] = [0, 1, 5, 1, 1, 1, 1, 1, 1, 0, 0, 0, 0, 0, 0, 0];
const DC_CHROMA_BITS: [u8; 16] = [0, 3, 1, 1, 1, 1, 1, 1, 1, 1, 1, 0, 0, 0, 0, 0];
const DC_VALUES: [u8; 12] = [0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11];

const AC_LUMA_BITS: [u8; 16] = [0, 2, 1, 3, 3, 2, 4, 3, 5, 5, 4, 4, 0, 0, 1, 0x7d];
const AC_LUMA_VALUES: [u8; 162] = [
    0x01, 0x02, 0x03, 0x00, 0x04, 0x11, 0x05, 0x12, 0x21, 0x31, 0x41, 0x06, 0x13, 0x51, 0x61, 0x07,
    0x22, 0x71, 0x14, 0x32, 0x81, 0x91, 0xa1, 0x08, 0x23, 0x42, 0xb1, 0xc1, 0x15, 0x52, 0xd1, 0xf0,
    0x24, 0x33, 0x62, 0x72, 0x82, 0x09, 0x0a, 0x16, 0x17, 0x18, 0x19, 0x1a, 0x25, 0x26, 0x27, 0x28,
    0x29, 0x2a, 0x34, 0x35, 0x36, 0x37, 0x38, 0x39, 0x3a, 0x43, 0x44, 0x45, 0x46, 0x47, 0x48, 0x49,
    0x4a, 0x53, 0x54, 0x55, 0x56, 0x57, 0x58, 0x59, 0x5a, 0x63, 0x64, 0x65, 0x66, 0x67, 0x68, 0x69,
    0x6a, 0x73, 0x74, 0x75, 0x76, 0x77, 0x78, 0x79, 0x7a, 0x83, 0x84, 0x85, 0x86, 0x87, 0x88, 0x89,
    0x8a, 0x92, 0x93, 0x94, 0x95, 0x96, 0x97, 0x98, 0x99, 0x9a, 0xa2, 0xa3, 0xa4, 0xa5, 0xa6, 0xa7,
    0xa8, 0xa9, 0xaa, 0xb2, 0xb3, 0xb4, 0xb5, 0xb6, 0xb7, 0xb8, 0xb9, 0xba, 0xc2, 0xc3, 0xc4, 0xc5,
    0xc6, 0xc7, 0xc8, 0xc9, 0xca, 0xd2, 0xd3, 0xd4, 0xd5, 0xd6, 0xd7, 0xd8, 0xd9, 0xda, 0xe1, 0xe2,
    0xe3, 0xe4, 0xe5, 0xe6, 0xe7, 0xe8, 0xe9, 0xea, 0xf1, 0xf2, 0xf3, 0xf4, 0xf5, 0xf6, 0xf7, 0xf8,
    0xf9, 0xfa,
];

const AC_CHROMA_BITS: [u8; 16] = [0, 2, 1, 2, 4, 4, 3, 4, 7, 5, 4, 4, 0, 1, 2, 0x77];
const AC_CHROMA_VALUES: [u8; 162] = [
    0x00, 0x01, 0x02, 0x03, 0x11, 0x04, 0x05, 0x21, 0x31, 0x06, 0x12, 0x41, 0x51, 0x07, 0x61, 0x71,
    0x13, 0x22, 0x32, 0x81, 0x08, 0x14, 0x42, 0x91, 0xa1, 0xb1, 0xc1, 0x09, 0x23, 0x33, 0x52, 0xf0,
    0x15, 0x62, 0x72, 0xd1, 0x0a, 0x16, 0x24, 0x34, 0xe1, 0x25, 0xf1, 0x17, 0x18, 0x19, 0x1a, 0x26,
    0x27, 0x28, 0x29, 0x2a, 0x35, 0x36, 0x37, 0x38, 0x39, 0x3a, 0x43, 0x44, 0x45, 0x46, 0x47, 0x48,
    0x49, 0x4a, 0x53, 0x54, 0x55, 0x56, 0x57, 0x58, 0x59, 0x5a, 0x63, 0x64, 0x65, 0x66, 0x67, 0x68,
    0x69, 0x6a, 0x73, 0x74, 0x75, 0x76, 0x77, 0x78, 0x79, 0x7a, 0x82, 0x83, 0x84, 0x85, 0x86, 0x87,
    0x88, 0x89, 0x8a, 0x92, 0x93, 0x94, 0x95, 0x96, 0x97, 0x98, 0x99, 0x9a, 0xa2, 0xa3, 0xa4, 0xa5,
    0xa6, 0xa7, 0xa8, 0xa9, 0xaa, 0xb2, 0xb3, 0xb4, 0xb5, 0xb6, 0xb7, 0xb8, 0xb9, 0xba, 0xc2, 0xc3,
    0xc4, 0xc5, 0xc6, 0xc7, 0xc8, 0xc9, 0xca, 0xd2, 0xd3, 0xd4, 0xd5, 0xd6, 0xd7, 0xd8, 0xd9, 0xda,
    0xe2, 0xe3, 0xe4, 0xe5, 0xe6, 0xe7, 0xe8, 0xe9, 0xea, 0xf2, 0xf3, 0xf4, 0xf5, 0xf6, 0xf7, 0xf8,
    0xf9, 0xfa,
];

/// SOI, DQT, DRI, SOF0, DHT and SOS (RFC 2435 Appendix B).
fn write_headers(buf: &mut BytesMut, frame: &PartialFrame, tables: &[u8]) {
    buf.put_u16(0xffd8);

    // One DQT per 64-byte table; 8-bit precision only.
    for (id, table) in tables.chunks_exact(64).take(2).enumerate() {
        buf.put_u16(0xffdb);
        buf.put_u16(67);
        buf.put_u8(id as u8);
        buf.extend_from_slice(table);
    }

    if frame.restart_interval > 0 {
        buf.put_u16(0xffdd);
        buf.put_u16(4);
        buf.put_u16(frame.restart_interval);
    }

    // Type 0: 4:2:2 (Y 2x1), type 1: 4:2:0 (Y 2x2)
    let luma_sampling = if frame.kind == 0 { 0x21 } else { 0x22 };
    let chroma_table = if tables.len() >= 128 { 1 } else { 0 };
    buf.put_u16(0xffc0);
    buf.put_u16(17);
    buf.put_u8(8);
    buf.put_u16(frame.height);
    buf.put_u16(frame.width);
    buf.put_u8(3);
    buf.extend_from_slice(&[1, luma_sampling, 0]);
    buf.extend_from_slice(&[2, 0x11, chroma_table]);
    buf.extend_from_slice(&[3, 0x11, chroma_table]);

    write_huffman(buf, 0x00, &DC_LUMA_BITS, &DC_VALUES);
    write_huffman(buf, 0x10, &AC_LUMA_BITS, &AC_LUMA_VALUES);
    write_huffman(buf, 0x01, &DC_CHROMA_BITS, &DC_VALUES);
    write_huffman(buf, 0x11, &AC_CHROMA_BITS, &AC_CHROMA_VALUES);

    buf.put_u16(0xffda);
    buf.put_u16(12);
    buf.put_u8(3);
    buf.extend_from_slice(&[1, 0x00, 2, 0x11, 3, 0x11]);
    buf.extend_from_slice(&[0, 63, 0]);
}

fn write_huffman(buf: &mut BytesMut, class_id: u8, bits: &[u8; 16], values: &[u8]) {
    buf.put_u16(0xffc4);
    buf.put_u16((3 + bits.len() + values.len()) as u16);
    buf.put_u8(class_id);
    buf.extend_from_slice(bits);
    buf.extend_from_slice(values);
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;

    fn rtp(marker: bool, offset: u32, kind: u8, q: u8, extra: &[u8], scan: &[u8]) -> RtpPacket {
        let mut payload = vec![0];
        payload.extend_from_slice(&offset.to_be_bytes()[1..]);
        payload.extend_from_slice(&[kind, q, (640u16 / 8) as u8, (480u16 / 8) as u8]);
        payload.extend_from_slice(extra);
        payload.extend_from_slice(scan);
        RtpPacket {
            marker,
            payload_type: 26,
            sequence: 0,
            timestamp: 9000,
            ssrc: 3,
            payload: Bytes::from(payload),
        }
    }

    fn find_marker(data: &[u8], marker: u8) -> Option<usize> {
        data.windows(2).position(|w| w == [0xff, marker])
    }

    #[test]
    fn reassembles_fragments_into_jfif() {
        let mut d = MjpegDepacketizer::new();
        assert!(d.push(&rtp(false, 0, 1, 50, &[], &[0x11; 100])).is_empty());
        let out = d.push(&rtp(true, 100, 1, 50, &[], &[0x22; 50]));
        assert_eq!(out.len(), 1);

        let jpeg = &out[0].payload;
        assert!(out[0].keyframe);
        assert!(jpeg.starts_with(&[0xff, 0xd8]));
        assert!(jpeg.ends_with(&[0xff, 0xd9]));

        let sof = find_marker(jpeg, 0xc0).unwrap();
        assert_eq!(u16::from_be_bytes([jpeg[sof + 5], jpeg[sof + 6]]), 480);
        assert_eq!(u16::from_be_bytes([jpeg[sof + 7], jpeg[sof + 8]]), 640);
        assert_eq!(jpeg[sof + 11], 0x22, "type 1 is 4:2:0");

        // Q=50 leaves the base tables unscaled
        let dqt = find_marker(jpeg, 0xdb).unwrap();
        assert_eq!(&jpeg[dqt + 5..dqt + 9], &[16, 11, 12, 14]);
    }

    #[test]
    fn gap_drops_frame() {
        let mut d = MjpegDepacketizer::new();
        d.push(&rtp(false, 0, 0, 80, &[], &[0; 10]));
        let out = d.push(&rtp(true, 20, 0, 80, &[], &[0; 10]));
        assert!(out.is_empty());
    }

    #[test]
    fn in_band_tables_and_restart_header() {
        let mut d = MjpegDepacketizer::new();
        let mut extra = vec![0x00, 0x10, 0xff, 0xff]; // restart interval 16
        extra.extend_from_slice(&[0, 0, 0, 128]); // quant header, 128 bytes
        extra.extend_from_slice(&[7; 128]);
        let out = d.push(&rtp(true, 0, 65, 255, &extra, &[0x55; 8]));
        let jpeg = &out[0].payload;

        let dri = find_marker(jpeg, 0xdd).unwrap();
        assert_eq!(u16::from_be_bytes([jpeg[dri + 4], jpeg[dri + 5]]), 16);
        let dqt = find_marker(jpeg, 0xdb).unwrap();
        assert_eq!(jpeg[dqt + 5], 7);
    }

    #[test]
    fn complete_jfif_passes_through() {
        let mut d = MjpegDepacketizer::new();
        let out = d.push(&rtp(true, 0, 1, 50, &[], &[0xff, 0xd8, 0x01, 0xff, 0xd9]));
        assert_eq!(&out[0].payload[..], &[0xff, 0xd8, 0x01, 0xff, 0xd9]);
    }

    #[test]
    fn quality_scaling() {
        let tables = scaled_tables(25);
        assert_eq!(tables.len(), 128);
        assert_eq!(tables[0], 32); // 16 * 200 / 100
        assert!(scaled_tables(99).iter().all(|&v| v >= 1));
    }
}
