//! SDP (Session Description Protocol) parsing (RFC 4566 / RFC 8866).
//!
//! Consumes the SDP body returned by DESCRIBE. The lines we care about:
//!
//! ```text
//! s=<session-name>                              ← session name
//! a=control:<url>                               ← aggregate control (session level)
//! m=video 0 RTP/AVP 96                          ← media description
//! a=rtpmap:96 H264/90000                        ← codec/clock rate
//! a=fmtp:96 packetization-mode=1;sprop-...      ← codec parameters
//! a=control:trackID=1                           ← track control URL
//! a=framerate:25                                ← frame rate
//! a=framesize:96 1920-1080 / a=x-dimensions:1920,1080
//! ```
//!
//! Everything else is ignored. Parsing never fails on unknown lines; a
//! media section without a usable payload type is skipped.

use base64::prelude::{BASE64_STANDARD, Engine as _};

use crate::media::h264;
use crate::stream::{StreamDescriptor, StreamKind};

/// Parsed session description.
#[derive(Debug, Clone, Default)]
pub struct SessionDescription {
    pub session_name: String,
    /// Session-level `a=control`, if any.
    pub control: Option<String>,
    pub media: Vec<MediaDescription>,
}

/// One `m=` section.
#[derive(Debug, Clone)]
pub struct MediaDescription {
    /// `video`, `audio`, `application`, ...
    pub media_type: String,
    pub protocol: String,
    /// First payload type listed on the `m=` line.
    pub payload_type: u8,
    pub encoding: Option<String>,
    pub clock_rate: Option<u32>,
    pub channels: Option<u16>,
    pub fmtp: Vec<(String, String)>,
    pub control: Option<String>,
    pub fps: Option<f32>,
    pub dimensions: Option<(u32, u32)>,
}

impl SessionDescription {
    pub fn parse(sdp: &str) -> Self {
        let mut session = SessionDescription::default();
        let mut current: Option<MediaDescription> = None;

        for line in sdp.lines() {
            let line = line.trim();
            let Some((kind, value)) = line.split_once('=') else {
                continue;
            };

            match kind {
                "s" => session.session_name = value.to_string(),
                "m" => {
                    if let Some(media) = current.take() {
                        session.media.push(media);
                    }
                    current = MediaDescription::from_media_line(value);
                    if current.is_none() {
                        tracing::debug!(line, "skipping unusable media section");
                    }
                }
                "a" => match current.as_mut() {
                    Some(media) => media.apply_attribute(value),
                    None => {
                        if let Some(control) = value.strip_prefix("control:") {
                            session.control = Some(control.trim().to_string());
                        }
                    }
                },
                _ => {}
            }
        }

        if let Some(media) = current {
            session.media.push(media);
        }

        tracing::debug!(
            session_name = %session.session_name,
            media_count = session.media.len(),
            "SDP parsed"
        );
        session
    }

    /// Build stream descriptors for the media kinds accepted by `enabled`.
    ///
    /// Indices are assigned in SDP order over the accepted streams only, so
    /// they are dense and stable for the connection.
    pub fn descriptors(
        &self,
        base_url: &str,
        enabled: impl Fn(StreamKind) -> bool,
    ) -> Vec<StreamDescriptor> {
        let aggregate = self
            .control
            .as_deref()
            .map(|c| resolve_control(base_url, c))
            .unwrap_or_else(|| base_url.to_string());

        self.media
            .iter()
            .filter_map(|media| {
                let kind = StreamKind::from_media_type(&media.media_type)?;
                enabled(kind).then_some((kind, media))
            })
            .enumerate()
            .map(|(index, (kind, media))| media.to_descriptor(index, kind, &aggregate))
            .collect()
    }
}

impl MediaDescription {
    fn from_media_line(value: &str) -> Option<Self> {
        let parts: Vec<&str> = value.split_whitespace().collect();
        if parts.len() < 4 {
            return None;
        }
        let payload_type: u8 = parts[3].parse().ok()?;
        let (encoding, clock_rate, channels) = static_payload(payload_type);

        Some(MediaDescription {
            media_type: parts[0].to_string(),
            protocol: parts[2].to_string(),
            payload_type,
            encoding: encoding.map(str::to_string),
            clock_rate,
            channels,
            fmtp: Vec::new(),
            control: None,
            fps: None,
            dimensions: None,
        })
    }

    fn apply_attribute(&mut self, value: &str) {
        let (name, rest) = value.split_once(':').unwrap_or((value, ""));
        let rest = rest.trim();

        match name {
            "rtpmap" => {
                // rtpmap:<pt> <encoding>/<clock>[/<channels>]
                let Some((pt, spec)) = rest.split_once(' ') else {
                    return;
                };
                if pt.trim().parse::<u8>().ok() != Some(self.payload_type) {
                    return;
                }
                let mut fields = spec.trim().split('/');
                self.encoding = fields.next().map(|e| e.to_string());
                self.clock_rate = fields.next().and_then(|c| c.parse().ok());
                self.channels = fields.next().and_then(|c| c.parse().ok());
            }
            "fmtp" => {
                let Some((pt, params)) = rest.split_once(' ') else {
                    return;
                };
                if pt.trim().parse::<u8>().ok() != Some(self.payload_type) {
                    return;
                }
                self.fmtp = parse_fmtp(params);
            }
            "control" => self.control = Some(rest.to_string()),
            "framerate" => self.fps = rest.parse().ok(),
            "framesize" => {
                // framesize:<pt> <w>-<h>
                let dims = rest.split_whitespace().nth(1).unwrap_or("");
                self.dimensions = parse_dimensions(dims, '-');
            }
            "x-dimensions" => self.dimensions = parse_dimensions(rest, ','),
            _ => {}
        }
    }

    fn to_descriptor(&self, index: usize, kind: StreamKind, aggregate: &str) -> StreamDescriptor {
        let codec = self
            .encoding
            .clone()
            .unwrap_or_else(|| format!("PT{}", self.payload_type));

        let mut dimensions = self.dimensions;
        if dimensions.is_none() && codec.eq_ignore_ascii_case("H264") {
            dimensions = self.h264_parameter_sets().and_then(|(sps, _)| h264::sps_dimensions(&sps));
        }

        let control = match &self.control {
            Some(control) => resolve_control(aggregate, control),
            None => aggregate.to_string(),
        };

        StreamDescriptor {
            index,
            kind,
            codec,
            payload_type: self.payload_type,
            clock_rate: self.clock_rate.unwrap_or(90_000),
            channels: self.channels,
            width: dimensions.map(|(w, _)| w),
            height: dimensions.map(|(_, h)| h),
            fps: self.fps,
            fmtp: self.fmtp.clone(),
            control,
        }
    }

    /// Decode SPS/PPS from `sprop-parameter-sets` (RFC 6184 §8.1).
    pub fn h264_parameter_sets(&self) -> Option<(Vec<u8>, Vec<u8>)> {
        let sprop = self
            .fmtp
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case("sprop-parameter-sets"))
            .map(|(_, v)| v.as_str())?;
        decode_sprop_parameter_sets(sprop)
    }
}

/// Decode a `sprop-parameter-sets` value into (SPS, PPS).
pub fn decode_sprop_parameter_sets(sprop: &str) -> Option<(Vec<u8>, Vec<u8>)> {
    let mut parts = sprop.split(',');
    let sps = BASE64_STANDARD.decode(parts.next()?.trim()).ok()?;
    let pps = BASE64_STANDARD.decode(parts.next()?.trim()).ok()?;
    Some((sps, pps))
}

/// Split `a=fmtp` parameters (`key=value;key=value`).
fn parse_fmtp(params: &str) -> Vec<(String, String)> {
    params
        .split(';')
        .filter_map(|p| {
            let p = p.trim();
            if p.is_empty() {
                return None;
            }
            // base64 values may themselves contain '=' padding
            let (k, v) = p.split_once('=').unwrap_or((p, ""));
            Some((k.trim().to_string(), v.trim().to_string()))
        })
        .collect()
}

fn parse_dimensions(value: &str, separator: char) -> Option<(u32, u32)> {
    let (w, h) = value.trim().split_once(separator)?;
    Some((w.trim().parse().ok()?, h.trim().parse().ok()?))
}

/// Static RTP payload types (RFC 3551 §6) that cameras use without rtpmap.
fn static_payload(pt: u8) -> (Option<&'static str>, Option<u32>, Option<u16>) {
    match pt {
        0 => (Some("PCMU"), Some(8000), Some(1)),
        8 => (Some("PCMA"), Some(8000), Some(1)),
        14 => (Some("MPA"), Some(90_000), None),
        26 => (Some("JPEG"), Some(90_000), None),
        _ => (None, None, None),
    }
}

/// Resolve a track control attribute against the aggregate URL
/// (RFC 2326 §C.1.1).
///
/// `rtsp://cam/stream` + `trackID=1` → `rtsp://cam/stream/trackID=1`.
/// Absolute URLs are used as-is and `*` means the aggregate URL itself.
pub fn resolve_control(base: &str, control: &str) -> String {
    if control == "*" || control.is_empty() {
        return base.to_string();
    }
    if control.starts_with("rtsp://") || control.starts_with("rtsps://") {
        return control.to_string();
    }
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        control.trim_start_matches('/')
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    const CAMERA_SDP: &str = "v=0\r\n\
o=- 1 1 IN IP4 192.168.1.64\r\n\
s=Media Presentation\r\n\
t=0 0\r\n\
a=control:*\r\n\
m=video 0 RTP/AVP 96\r\n\
a=rtpmap:96 H264/90000\r\n\
a=fmtp:96 packetization-mode=1;profile-level-id=420029;sprop-parameter-sets=Z0IAKeKQFAe2AtwEBAaQeJEV,aM48gA==\r\n\
a=control:trackID=1\r\n\
a=framerate:25\r\n\
m=audio 0 RTP/AVP 0\r\n\
a=control:trackID=2\r\n\
m=application 0 RTP/AVP 107\r\n\
a=rtpmap:107 vnd.onvif.metadata/90000\r\n\
a=control:trackID=3\r\n";

    #[test]
    fn parses_media_sections() {
        let sdp = SessionDescription::parse(CAMERA_SDP);
        assert_eq!(sdp.session_name, "Media Presentation");
        assert_eq!(sdp.control.as_deref(), Some("*"));
        assert_eq!(sdp.media.len(), 3);

        let video = &sdp.media[0];
        assert_eq!(video.encoding.as_deref(), Some("H264"));
        assert_eq!(video.clock_rate, Some(90_000));
        assert_eq!(video.fps, Some(25.0));
        assert!(video.h264_parameter_sets().is_some());

        let audio = &sdp.media[1];
        assert_eq!(audio.encoding.as_deref(), Some("PCMU"), "static payload type 0");
        assert_eq!(audio.clock_rate, Some(8000));
    }

    #[test]
    fn descriptors_use_dense_indices_for_enabled_kinds() {
        let sdp = SessionDescription::parse(CAMERA_SDP);
        let base = "rtsp://192.168.1.64/Streaming/Channels/101/";

        let all = sdp.descriptors(base, |_| true);
        assert_eq!(all.len(), 3);
        assert_eq!(all[2].kind, StreamKind::Metadata);
        assert_eq!(all[2].index, 2);

        let no_audio = sdp.descriptors(base, |k| k != StreamKind::Audio);
        assert_eq!(no_audio.len(), 2);
        assert_eq!(no_audio[1].kind, StreamKind::Metadata);
        assert_eq!(no_audio[1].index, 1);
        assert_eq!(
            no_audio[0].control,
            "rtsp://192.168.1.64/Streaming/Channels/101/trackID=1"
        );
    }

    #[test]
    fn h264_dimensions_from_sps() {
        let sdp = SessionDescription::parse(CAMERA_SDP);
        let video = &sdp.descriptors("rtsp://cam/", |_| true)[0];
        assert_eq!(video.width, Some(640));
        assert_eq!(video.height, Some(480));
    }

    #[test]
    fn explicit_dimensions_win() {
        let sdp = SessionDescription::parse(
            "m=video 0 RTP/AVP 26\r\na=x-dimensions:1280,720\r\na=control:track1\r\n",
        );
        let video = &sdp.descriptors("rtsp://cam/live", |_| true)[0];
        assert_eq!(video.codec, "JPEG");
        assert_eq!((video.width, video.height), (Some(1280), Some(720)));
        assert_eq!(video.control, "rtsp://cam/live/track1");
    }

    #[test]
    fn resolve_control_forms() {
        assert_eq!(resolve_control("rtsp://cam/s", "*"), "rtsp://cam/s");
        assert_eq!(
            resolve_control("rtsp://cam/s/", "rtsp://other/t"),
            "rtsp://other/t"
        );
        assert_eq!(resolve_control("rtsp://cam/s/", "track1"), "rtsp://cam/s/track1");
    }

    #[test]
    fn fmtp_keeps_base64_padding() {
        let params = parse_fmtp("packetization-mode=1; sprop-parameter-sets=Z0I=,aM4=");
        assert_eq!(params[1].1, "Z0I=,aM4=");
    }
}
