use bytes::{Bytes, BytesMut};

use super::rtp::RtpPacket;
use super::{AccessUnit, Depacketizer};

const START_CODE: [u8; 4] = [0, 0, 0, 1];

const NAL_IDR: u8 = 5;
const NAL_SPS: u8 = 7;
const NAL_PPS: u8 = 8;
const NAL_STAP_A: u8 = 24;
const NAL_FU_A: u8 = 28;

/// H.264 RTP depacketizer (RFC 6184).
///
/// Reassembles an Annex B access unit from the three packetization forms
/// cameras use with `packetization-mode=1`:
///
/// - **Single NAL Unit** (§5.6): payload is one NAL, types 1..=23.
///
/// - **STAP-A** (§5.7.1): one byte header (type 24) followed by
///   `[size: u16][NAL]` repeated.
///
/// - **FU-A** (§5.8): a large NAL split across packets, each carrying a
///   2-byte FU header before the fragment:
///
///   ```text
///   FU indicator:  [F|NRI|Type=28]     (1 byte)
///   FU header:     [S|E|R|NAL_Type]    (1 byte)
///   Fragment data: [...]
///   ```
///
///   The original NAL header is rebuilt as `(indicator & 0xE0) | NAL_Type`.
///
/// Every NAL is written with a 4-byte start code. The access unit ends at
/// the marker bit (§5.1) or when the RTP timestamp changes.
///
/// ## Parameter sets
///
/// Many cameras only announce SPS/PPS in `sprop-parameter-sets` and never
/// repeat them in-band. Decoders need them before every IDR they start at,
/// so keyframes missing them get the most recent SPS/PPS (from SDP or seen
/// in-band) prepended.
#[derive(Debug)]
pub struct H264Depacketizer {
    access_unit: BytesMut,
    timestamp: Option<u32>,
    keyframe: bool,
    has_sps: bool,
    has_pps: bool,
    fragment: Option<BytesMut>,
    sps: Option<Bytes>,
    pps: Option<Bytes>,
}

impl H264Depacketizer {
    /// `parameter_sets` are the decoded `sprop-parameter-sets`, if any.
    pub fn new(parameter_sets: Option<(Vec<u8>, Vec<u8>)>) -> Self {
        let (sps, pps) = match parameter_sets {
            Some((sps, pps)) => (Some(Bytes::from(sps)), Some(Bytes::from(pps))),
            None => (None, None),
        };
        Self {
            access_unit: BytesMut::new(),
            timestamp: None,
            keyframe: false,
            has_sps: false,
            has_pps: false,
            fragment: None,
            sps,
            pps,
        }
    }

    fn add_nal(&mut self, nal: &[u8]) {
        if nal.is_empty() {
            return;
        }
        match nal[0] & 0x1f {
            NAL_IDR => self.keyframe = true,
            NAL_SPS => {
                self.has_sps = true;
                self.sps = Some(Bytes::copy_from_slice(nal));
            }
            NAL_PPS => {
                self.has_pps = true;
                self.pps = Some(Bytes::copy_from_slice(nal));
            }
            _ => {}
        }
        self.access_unit.extend_from_slice(&START_CODE);
        self.access_unit.extend_from_slice(nal);
    }

    fn add_stap_a(&mut self, payload: &[u8]) {
        let mut rest = &payload[1..];
        while rest.len() >= 2 {
            let size = u16::from_be_bytes([rest[0], rest[1]]) as usize;
            if rest.len() < 2 + size {
                tracing::debug!(size, remaining = rest.len() - 2, "truncated STAP-A unit");
                break;
            }
            self.add_nal(&rest[2..2 + size]);
            rest = &rest[2 + size..];
        }
    }

    fn add_fu_a(&mut self, payload: &[u8]) {
        if payload.len() < 2 {
            return;
        }
        let indicator = payload[0];
        let header = payload[1];
        let start = header & 0x80 != 0;
        let end = header & 0x40 != 0;

        if start {
            let mut nal = BytesMut::with_capacity(payload.len() * 4);
            nal.extend_from_slice(&[(indicator & 0xe0) | (header & 0x1f)]);
            self.fragment = Some(nal);
        }

        // Middle or end fragment without its start: lost, skip until the next start.
        let Some(nal) = self.fragment.as_mut() else {
            return;
        };
        nal.extend_from_slice(&payload[2..]);

        if end && let Some(nal) = self.fragment.take() {
            tracing::trace!(nal_type = nal[0] & 0x1f, nal_size = nal.len(), "FU-A reassembled");
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

        let mut payload = self.access_unit.split();
        if self.keyframe && !(self.has_sps && self.has_pps) {
            if let (Some(sps), Some(pps)) = (&self.sps, &self.pps) {
                let mut prefixed = BytesMut::with_capacity(payload.len() + sps.len() + pps.len() + 8);
                prefixed.extend_from_slice(&START_CODE);
                prefixed.extend_from_slice(sps);
                prefixed.extend_from_slice(&START_CODE);
                prefixed.extend_from_slice(pps);
                prefixed.extend_from_slice(&payload);
                payload = prefixed;
            }
        }

        out.push(AccessUnit {
            payload: payload.freeze(),
            rtp_timestamp,
            keyframe: self.keyframe,
        });
        self.keyframe = false;
        self.has_sps = false;
        self.has_pps = false;
    }
}

impl Depacketizer for H264Depacketizer {
    fn push(&mut self, packet: &RtpPacket) -> Vec<AccessUnit> {
        let mut out = Vec::new();
        if self.timestamp.is_some_and(|ts| ts != packet.timestamp) {
            self.flush(&mut out);
        }
        self.timestamp = Some(packet.timestamp);

        let payload = &packet.payload[..];
        if let Some(&first) = payload.first() {
            match first & 0x1f {
                1..=23 => self.add_nal(payload),
                NAL_STAP_A => self.add_stap_a(payload),
                NAL_FU_A => self.add_fu_a(payload),
                other => tracing::debug!(nal_type = other, "unsupported H.264 payload type"),
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
        self.has_sps = false;
        self.has_pps = false;
    }

    fn codec_name(&self) -> &'static str {
        "H264"
    }
}

/// Extract NAL units from an H.264/H.265 Annex B bitstream.
///
/// Scans for start codes (both 4-byte `00 00 00 01` and 3-byte
/// `00 00 01`) and returns the NAL data between them, excluding
/// the start codes themselves.
///
/// The start code length is tracked per-NAL to ensure boundaries
/// between adjacent NALs are computed correctly when mixed 3-byte
/// and 4-byte start codes appear.
pub fn extract_nal_units(data: &[u8]) -> Vec<&[u8]> {
    let mut nal_units = Vec::new();
    let mut i = 0usize;

    // (nal_data_start_index, start_code_length)
    let mut start_entries: Vec<(usize, usize)> = Vec::new();

    while i < data.len() {
        if i + 3 < data.len() && data[i..i + 4] == START_CODE {
            start_entries.push((i + 4, 4));
            i += 4;
        } else if i + 2 < data.len() && data[i..i + 3] == [0, 0, 1] {
            start_entries.push((i + 3, 3));
            i += 3;
        } else {
            i += 1;
        }
    }

    for (idx, &(start, _)) in start_entries.iter().enumerate() {
        let end = if idx + 1 < start_entries.len() {
            let (next_start, next_sc_len) = start_entries[idx + 1];
            next_start - next_sc_len
        } else {
            data.len()
        };

        if start < end {
            nal_units.push(&data[start..end]);
        }
    }

    nal_units
}

/// Find the SPS in an Annex B access unit and return its display size.
pub fn find_sps_dimensions(access_unit: &[u8]) -> Option<(u32, u32)> {
    extract_nal_units(access_unit)
        .into_iter()
        .find(|nal| nal.first().is_some_and(|b| b & 0x1f == NAL_SPS))
        .and_then(sps_dimensions)
}

/// Display width and height from an SPS NAL (ITU-T H.264 §7.3.2.1.1).
///
/// Accounts for frame cropping and field coding. Returns `None` for a
/// truncated or malformed SPS.
pub fn sps_dimensions(sps: &[u8]) -> Option<(u32, u32)> {
    if sps.len() < 4 {
        return None;
    }
    let rbsp = remove_emulation_prevention(&sps[1..]);
    let mut r = BitReader::new(&rbsp);

    let profile_idc = r.bits(8)?;
    r.bits(16)?; // constraint flags + level_idc
    r.ue()?; // seq_parameter_set_id

    let mut chroma_format_idc = 1;
    let mut separate_colour_plane = false;
    if matches!(
        profile_idc,
        100 | 110 | 122 | 244 | 44 | 83 | 86 | 118 | 128 | 138 | 139 | 134 | 135
    ) {
        chroma_format_idc = r.ue()?;
        if chroma_format_idc == 3 {
            separate_colour_plane = r.bit()?;
        }
        r.ue()?; // bit_depth_luma_minus8
        r.ue()?; // bit_depth_chroma_minus8
        r.bit()?; // qpprime_y_zero_transform_bypass_flag
        if r.bit()? {
            let lists = if chroma_format_idc == 3 { 12 } else { 8 };
            for i in 0..lists {
                if r.bit()? {
                    skip_scaling_list(&mut r, if i < 6 { 16 } else { 64 })?;
                }
            }
        }
    }

    r.ue()?; // log2_max_frame_num_minus4
    match r.ue()? {
        0 => {
            r.ue()?; // log2_max_pic_order_cnt_lsb_minus4
        }
        1 => {
            r.bit()?;
            r.se()?;
            r.se()?;
            for _ in 0..r.ue()? {
                r.se()?;
            }
        }
        _ => {}
    }
    r.ue()?; // max_num_ref_frames
    r.bit()?; // gaps_in_frame_num_value_allowed_flag

    let width_mbs = r.ue()? + 1;
    let height_map_units = r.ue()? + 1;
    let frame_mbs_only = r.bit()?;
    if !frame_mbs_only {
        r.bit()?; // mb_adaptive_frame_field_flag
    }
    r.bit()?; // direct_8x8_inference_flag

    let field_factor = if frame_mbs_only { 1 } else { 2 };
    let mut width = width_mbs * 16;
    let mut height = height_map_units * 16 * field_factor;

    if r.bit()? {
        let (left, right, top, bottom) = (r.ue()?, r.ue()?, r.ue()?, r.ue()?);
        let (sub_width, sub_height) = match (chroma_format_idc, separate_colour_plane) {
            (0, _) | (3, true) => (1, 1),
            (1, _) => (2, 2),
            (2, _) => (2, 1),
            _ => (1, 1),
        };
        let crop_x = sub_width;
        let crop_y = sub_height * field_factor;
        width = width.checked_sub(crop_x * (left + right))?;
        height = height.checked_sub(crop_y * (top + bottom))?;
    }

    Some((width, height))
}

fn skip_scaling_list(r: &mut BitReader<'_>, size: usize) -> Option<()> {
    let mut last = 8i64;
    let mut next = 8i64;
    for _ in 0..size {
        if next != 0 {
            let delta = r.se()? as i64;
            next = (last + delta + 256) % 256;
        }
        if next != 0 {
            last = next;
        }
    }
    Some(())
}

/// Strip `00 00 03` emulation prevention bytes (§7.4.1).
pub(crate) fn remove_emulation_prevention(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    let mut zeros = 0;
    for &byte in data {
        if zeros >= 2 && byte == 3 {
            zeros = 0;
            continue;
        }
        zeros = if byte == 0 { zeros + 1 } else { 0 };
        out.push(byte);
    }
    out
}

/// MSB-first bit reader with Exp-Golomb support.
pub(crate) struct BitReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> BitReader<'a> {
    pub(crate) fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub(crate) fn bit(&mut self) -> Option<bool> {
        let byte = *self.data.get(self.pos / 8)?;
        let bit = (byte >> (7 - self.pos % 8)) & 1;
        self.pos += 1;
        Some(bit == 1)
    }

    pub(crate) fn bits(&mut self, n: u32) -> Option<u32> {
        let mut value = 0u32;
        for _ in 0..n {
            value = (value << 1) | self.bit()? as u32;
        }
        Some(value)
    }

    pub(crate) fn ue(&mut self) -> Option<u32> {
        let mut leading_zeros = 0;
        while !self.bit()? {
            leading_zeros += 1;
            if leading_zeros > 31 {
                return None;
            }
        }
        Some((1u32 << leading_zeros) - 1 + self.bits(leading_zeros)?)
    }

    pub(crate) fn se(&mut self) -> Option<i32> {
        let k = self.ue()?;
        let magnitude = k.div_ceil(2) as i32;
        Some(if k % 2 == 1 { magnitude } else { -magnitude })
    }
}

#[cfg(test)]
mod tests {
    use base64::prelude::{BASE64_STANDARD, Engine as _};

    use super::*;

    const SPS_640X480: &str = "Z0IAKeKQFAe2AtwEBAaQeJEV";

    fn rtp(timestamp: u32, marker: bool, payload: Vec<u8>) -> RtpPacket {
        RtpPacket {
            marker,
            payload_type: 96,
            sequence: 0,
            timestamp,
            ssrc: 0xAABBCCDD,
            payload: Bytes::from(payload),
        }
    }

    // --- NAL extraction ---

    #[test]
    fn extract_single_nal_4byte_sc() {
        let data = [0, 0, 0, 1, 0x65, 0xAA, 0xBB];
        let nals = extract_nal_units(&data);
        assert_eq!(nals, vec![&[0x65u8, 0xAA, 0xBB][..]]);
    }

    #[test]
    fn extract_mixed_start_codes() {
        let mut data = vec![0, 0, 0, 1, 0x67, 0x42];
        data.extend_from_slice(&[0, 0, 1, 0x68, 0xCE]);
        let nals = extract_nal_units(&data);
        assert_eq!(nals.len(), 2);
        assert_eq!(nals[0], &[0x67, 0x42]);
        assert_eq!(nals[1], &[0x68, 0xCE]);
    }

    #[test]
    fn extract_no_start_code() {
        assert!(extract_nal_units(&[]).is_empty());
        assert!(extract_nal_units(&[0xFF, 0xFE]).is_empty());
    }

    // --- Depacketization ---

    #[test]
    fn single_nal_with_marker() {
        let mut d = H264Depacketizer::new(None);
        let out = d.push(&rtp(1000, true, vec![0x41, 0x9a, 0x01]));
        assert_eq!(out.len(), 1);
        assert_eq!(&out[0].payload[..], &[0, 0, 0, 1, 0x41, 0x9a, 0x01]);
        assert!(!out[0].keyframe);
        assert_eq!(out[0].rtp_timestamp, 1000);
    }

    #[test]
    fn stap_a_then_fu_a_idr() {
        let mut d = H264Depacketizer::new(None);
        // STAP-A carrying SPS and PPS
        let stap = vec![0x78, 0x00, 0x02, 0x67, 0x42, 0x00, 0x02, 0x68, 0xce];
        assert!(d.push(&rtp(3000, false, stap)).is_empty());
        // IDR split in three FU-A fragments
        assert!(d.push(&rtp(3000, false, vec![0x7c, 0x85, 0x01, 0x02])).is_empty());
        assert!(d.push(&rtp(3000, false, vec![0x7c, 0x05, 0x03])).is_empty());
        let out = d.push(&rtp(3000, true, vec![0x7c, 0x45, 0x04]));

        assert_eq!(out.len(), 1);
        assert!(out[0].keyframe);
        let nals = extract_nal_units(&out[0].payload);
        assert_eq!(nals.len(), 3);
        assert_eq!(nals[0], &[0x67, 0x42]);
        assert_eq!(nals[1], &[0x68, 0xce]);
        assert_eq!(nals[2], &[0x65, 0x01, 0x02, 0x03, 0x04]);
    }

    #[test]
    fn fu_a_without_start_is_dropped() {
        let mut d = H264Depacketizer::new(None);
        let out = d.push(&rtp(1, true, vec![0x7c, 0x45, 0x04]));
        assert!(out.is_empty());
    }

    #[test]
    fn timestamp_change_closes_access_unit() {
        let mut d = H264Depacketizer::new(None);
        d.push(&rtp(1, false, vec![0x41, 0x01]));
        let out = d.push(&rtp(2, false, vec![0x41, 0x02]));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].rtp_timestamp, 1);
    }

    #[test]
    fn sprop_prepended_to_bare_idr() {
        let sps = BASE64_STANDARD.decode(SPS_640X480).unwrap();
        let pps = vec![0x68, 0xce, 0x3c, 0x80];
        let mut d = H264Depacketizer::new(Some((sps.clone(), pps.clone())));
        let out = d.push(&rtp(1, true, vec![0x65, 0x88]));
        let nals = extract_nal_units(&out[0].payload);
        assert_eq!(nals.len(), 3);
        assert_eq!(nals[0], sps.as_slice());
        assert_eq!(nals[1], pps.as_slice());
        assert_eq!(find_sps_dimensions(&out[0].payload), Some((640, 480)));
    }

    #[test]
    fn discard_drops_partial_fragment() {
        let mut d = H264Depacketizer::new(None);
        d.push(&rtp(1, false, vec![0x7c, 0x85, 0x01]));
        d.discard();
        let out = d.push(&rtp(1, true, vec![0x7c, 0x45, 0x02]));
        assert!(out.is_empty());
    }

    // --- SPS parsing ---

    #[test]
    fn sps_baseline_dimensions() {
        let sps = BASE64_STANDARD.decode(SPS_640X480).unwrap();
        assert_eq!(sps_dimensions(&sps), Some((640, 480)));
    }

    #[test]
    fn sps_truncated() {
        assert_eq!(sps_dimensions(&[0x67, 0x42]), None);
        assert_eq!(sps_dimensions(&[0x67, 0x42, 0x00, 0x1e]), None);
    }

    #[test]
    fn emulation_prevention_removed() {
        assert_eq!(
            remove_emulation_prevention(&[0, 0, 3, 1, 0, 0, 3, 0]),
            vec![0, 0, 1, 0, 0, 0]
        );
    }

    #[test]
    fn exp_golomb() {
        // 1 | 010 | 011 | 00100 -> ue 0, 1, 2, 3
        let data = [0b1010_0110, 0b0100_0000];
        let mut r = BitReader::new(&data);
        assert_eq!(r.ue(), Some(0));
        assert_eq!(r.ue(), Some(1));
        assert_eq!(r.ue(), Some(2));
        assert_eq!(r.ue(), Some(3));
    }
}
