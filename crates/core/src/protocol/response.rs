use crate::error::{IngestError, ParseErrorKind};

/// A parsed RTSP response (RFC 2326 §7).
///
/// RTSP responses follow HTTP/1.1 syntax:
///
/// ```text
/// RTSP-Version SP Status-Code SP Reason-Phrase CRLF
/// *(Header: Value CRLF)
/// CRLF
/// [body]
/// ```
///
/// Header lookup is case-insensitive per RFC 2326 §4.2. The body is read
/// separately by the transport (it needs `Content-Length` first) and
/// attached with [`with_body`](Self::with_body).
#[derive(Debug, Clone)]
pub struct RtspResponse {
    /// Protocol version (expected: `RTSP/1.0`).
    pub version: String,
    pub status_code: u16,
    pub reason: String,
    /// Headers as ordered (name, value) pairs. Names are stored as-received;
    /// lookups via [`get_header`](Self::get_header) are case-insensitive.
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl RtspResponse {
    /// Parse the status line and headers of an RTSP response.
    ///
    /// Expects the head of a response: status line, headers, and optionally
    /// the trailing blank line. Returns [`IngestError::Parse`] on malformed
    /// input.
    pub fn parse(raw: &str) -> crate::error::Result<Self> {
        let mut lines = raw.lines();

        let status_line = lines
            .next()
            .filter(|l| !l.trim().is_empty())
            .ok_or(IngestError::parse(ParseErrorKind::EmptyResponse))?;

        let mut parts = status_line.splitn(3, ' ');
        let version = parts.next().unwrap_or_default().to_string();
        let status_code = parts
            .next()
            .and_then(|code| code.trim().parse::<u16>().ok())
            .ok_or(IngestError::parse(ParseErrorKind::InvalidStatusLine))?;
        let reason = parts.next().unwrap_or("").trim().to_string();

        if !version.starts_with("RTSP/") {
            return Err(IngestError::parse(ParseErrorKind::InvalidStatusLine));
        }
        if version != "RTSP/1.0" {
            tracing::warn!(version, "server sent non-RTSP/1.0 version");
        }

        let mut headers = Vec::new();

        for line in lines {
            if line.is_empty() {
                break;
            }

            let colon_pos = line
                .find(':')
                .ok_or(IngestError::parse(ParseErrorKind::InvalidHeader))?;

            let name = line[..colon_pos].trim().to_string();
            let value = line[colon_pos + 1..].trim().to_string();

            headers.push((name, value));
        }

        Ok(RtspResponse {
            version,
            status_code,
            reason,
            headers,
            body: String::new(),
        })
    }

    pub fn with_body(mut self, body: String) -> Self {
        self.body = body;
        self
    }

    /// Look up a header value by name (case-insensitive, per RFC 2326 §4.2).
    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// All values of a repeatable header, e.g. `WWW-Authenticate`.
    pub fn get_headers<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.headers
            .iter()
            .filter(move |(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Returns the CSeq header value, which pairs responses with requests
    /// (RFC 2326 §12.17).
    pub fn cseq(&self) -> Option<u32> {
        self.get_header("CSeq").and_then(|v| v.trim().parse().ok())
    }

    /// Declared body length, 0 when absent.
    pub fn content_length(&self) -> usize {
        self.get_header("Content-Length")
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(0)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_ok_response() {
        let raw = "RTSP/1.0 200 OK\r\nCSeq: 1\r\nPublic: OPTIONS, DESCRIBE\r\n\r\n";
        let resp = RtspResponse::parse(raw).unwrap();
        assert_eq!(resp.status_code, 200);
        assert_eq!(resp.reason, "OK");
        assert_eq!(resp.cseq(), Some(1));
        assert!(resp.is_success());
    }

    #[test]
    fn parse_multi_word_reason() {
        let raw = "RTSP/1.0 454 Session Not Found\r\nCSeq: 9\r\n\r\n";
        let resp = RtspResponse::parse(raw).unwrap();
        assert_eq!(resp.status_code, 454);
        assert_eq!(resp.reason, "Session Not Found");
        assert!(!resp.is_success());
    }

    #[test]
    fn parse_empty_response() {
        assert!(RtspResponse::parse("").is_err());
    }

    #[test]
    fn parse_invalid_status_line() {
        assert!(RtspResponse::parse("RTSP/1.0 abc OK\r\n\r\n").is_err());
        assert!(RtspResponse::parse("HELLO 200 OK\r\n\r\n").is_err());
    }

    #[test]
    fn header_lookup_case_insensitive() {
        let raw = "RTSP/1.0 200 OK\r\ncseq: 42\r\ncontent-length: 12\r\n\r\n";
        let resp = RtspResponse::parse(raw).unwrap();
        assert_eq!(resp.get_header("CSeq"), Some("42"));
        assert_eq!(resp.content_length(), 12);
    }

    #[test]
    fn repeated_headers() {
        let raw = "RTSP/1.0 401 Unauthorized\r\nCSeq: 2\r\n\
                   WWW-Authenticate: Digest realm=\"cam\", nonce=\"abc\"\r\n\
                   WWW-Authenticate: Basic realm=\"cam\"\r\n\r\n";
        let resp = RtspResponse::parse(raw).unwrap();
        assert_eq!(resp.get_headers("www-authenticate").count(), 2);
    }
}
