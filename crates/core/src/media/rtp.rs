use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{IngestError, ParseErrorKind, Result};

/// A received RTP packet (RFC 3550 §5.1).
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |V=2|P|X|  CC   |M|     PT      |       Sequence Number         |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                           Timestamp                           |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                             SSRC                              |
/// +=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+
/// |                   CSRC list (CC × 32 bits)                    |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
///
/// CSRCs and the header extension (§5.3.1) are skipped; trailing padding
/// (§5.1, P bit) is stripped from the payload. The payload shares the
/// receive buffer, no copy is made.
#[derive(Debug, Clone)]
pub struct RtpPacket {
    pub marker: bool,
    pub payload_type: u8,
    pub sequence: u16,
    pub timestamp: u32,
    pub ssrc: u32,
    pub payload: Bytes,
}

impl RtpPacket {
    pub fn parse(data: Bytes) -> Result<Self> {
        if data.len() < 12 {
            return Err(IngestError::parse(ParseErrorKind::TruncatedPacket));
        }

        let version = data[0] >> 6;
        if version != 2 {
            return Err(IngestError::parse(ParseErrorKind::UnsupportedRtpVersion(
                version,
            )));
        }

        let padding = data[0] & 0x20 != 0;
        let extension = data[0] & 0x10 != 0;
        let csrc_count = (data[0] & 0x0f) as usize;
        let marker = data[1] & 0x80 != 0;
        let payload_type = data[1] & 0x7f;
        let sequence = u16::from_be_bytes([data[2], data[3]]);
        let timestamp = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
        let ssrc = u32::from_be_bytes([data[8], data[9], data[10], data[11]]);

        let mut offset = 12 + csrc_count * 4;
        if extension {
            // 16-bit profile id, 16-bit length in 32-bit words
            if data.len() < offset + 4 {
                return Err(IngestError::parse(ParseErrorKind::TruncatedPacket));
            }
            let words = u16::from_be_bytes([data[offset + 2], data[offset + 3]]) as usize;
            offset += 4 + words * 4;
        }

        let mut end = data.len();
        if padding {
            let pad = data[end - 1] as usize;
            end = end.saturating_sub(pad);
        }
        if offset > end {
            return Err(IngestError::parse(ParseErrorKind::TruncatedPacket));
        }

        Ok(Self {
            marker,
            payload_type,
            sequence,
            timestamp,
            ssrc,
            payload: data.slice(offset..end),
        })
    }

    /// Serialize with a plain 12-byte header (no CSRC, extension or padding).
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(12 + self.payload.len());
        buf.put_u8(2 << 6);
        buf.put_u8(((self.marker as u8) << 7) | (self.payload_type & 0x7f));
        buf.put_u16(self.sequence);
        buf.put_u32(self.timestamp);
        buf.put_u32(self.ssrc);
        buf.extend_from_slice(&self.payload);
        buf.freeze()
    }
}

/// Extends 32-bit RTP timestamps into a monotonic 64-bit timeline.
///
/// Wraparound is detected by interpreting the difference to the previous
/// timestamp as a signed 32-bit delta, which tolerates reordering of up to
/// half the timestamp space.
#[derive(Debug, Default)]
pub struct TimestampUnwrapper {
    last: Option<u32>,
    extended: i64,
}

impl TimestampUnwrapper {
    /// Returns ticks since the first timestamp seen.
    pub fn unwrap(&mut self, timestamp: u32) -> i64 {
        match self.last {
            None => self.extended = 0,
            Some(last) => self.extended += timestamp.wrapping_sub(last) as i32 as i64,
        }
        self.last = Some(timestamp);
        self.extended
    }

    pub fn reset(&mut self) {
        self.last = None;
        self.extended = 0;
    }
}

/// Convert clock ticks to microseconds.
pub fn ticks_to_micros(ticks: i64, clock_rate: u32) -> i64 {
    if clock_rate == 0 {
        return 0;
    }
    ticks * 1_000_000 / clock_rate as i64
}
