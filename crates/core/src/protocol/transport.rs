/// Negotiated transport for one stream, from the server's SETUP reply
/// (RFC 2326 §12.39).
///
/// ## Wire format example
///
/// ```text
/// Client → Server:
///   Transport: RTP/AVP/TCP;unicast;interleaved=0-1
///
/// Server → Client:
///   Transport: RTP/AVP/TCP;unicast;interleaved=0-1;ssrc=1A2B3C4D;mode="PLAY"
/// ```
///
/// The server may pick different channels than requested; the reply wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportHeader {
    /// Interleaved channel carrying RTP.
    pub rtp_channel: u8,
    /// Interleaved channel carrying RTCP (typically `rtp_channel + 1`).
    pub rtcp_channel: u8,
    pub ssrc: Option<u32>,
}

impl TransportHeader {
    /// The `Transport` value requested for the stream at `index`.
    pub fn request(index: usize) -> String {
        let rtp = index * 2;
        format!("RTP/AVP/TCP;unicast;interleaved={}-{}", rtp, rtp + 1)
    }

    /// Parse the `Transport` header value of a SETUP response.
    ///
    /// ## Examples
    ///
    /// ```
    /// use ingest::protocol::transport::TransportHeader;
    ///
    /// let th = TransportHeader::parse("RTP/AVP/TCP;unicast;interleaved=2-3").unwrap();
    /// assert_eq!(th.rtp_channel, 2);
    /// assert_eq!(th.rtcp_channel, 3);
    ///
    /// assert!(TransportHeader::parse("RTP/AVP;unicast;client_port=8000-8001").is_none());
    /// ```
    pub fn parse(header: &str) -> Option<Self> {
        let mut channels = None;
        let mut ssrc = None;

        for part in header.split(';') {
            let part = part.trim();
            if let Some(pair) = part.strip_prefix("interleaved=") {
                channels = Some(match pair.split_once('-') {
                    Some((rtp, rtcp)) => (rtp.trim().parse().ok()?, rtcp.trim().parse().ok()?),
                    None => {
                        let rtp: u8 = pair.trim().parse().ok()?;
                        (rtp, rtp.wrapping_add(1))
                    }
                });
            } else if let Some(value) = part.strip_prefix("ssrc=") {
                ssrc = u32::from_str_radix(value.trim(), 16).ok();
            }
        }

        let (rtp_channel, rtcp_channel) = channels?;
        Some(TransportHeader {
            rtp_channel,
            rtcp_channel,
            ssrc,
        })
    }
}

/// Parsed `Session` header (RFC 2326 §12.37): `<id>[;timeout=<seconds>]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionHeader {
    pub id: String,
    /// Server session timeout in seconds, 60 when not given.
    pub timeout_secs: u64,
}

impl SessionHeader {
    pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

    pub fn parse(header: &str) -> Option<Self> {
        let mut parts = header.split(';');
        let id = parts.next()?.trim();
        if id.is_empty() {
            return None;
        }
        let timeout_secs = parts
            .filter_map(|p| p.trim().strip_prefix("timeout="))
            .find_map(|t| t.trim().parse().ok())
            .filter(|&t| t > 0)
            .unwrap_or(Self::DEFAULT_TIMEOUT_SECS);

        Some(SessionHeader {
            id: id.to_string(),
            timeout_secs,
        })
    }
}
