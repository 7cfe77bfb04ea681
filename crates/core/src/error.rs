//! Error types for the ingestion library.

use std::fmt;
use std::time::Duration;

/// Errors that can occur in the ingestion library.
///
/// Variants map to specific failure modes across the stack:
///
/// - **Session**: [`Connection`](Self::Connection) — the camera could not be
///   reached, refused us, or rejected our credentials. Leaves the session in
///   the `Error` state.
/// - **Wire**: [`Parse`](Self::Parse), [`InvalidUrl`](Self::InvalidUrl),
///   [`Io`](Self::Io).
/// - **Decode**: [`Decode`](Self::Decode) is non-fatal and never escapes
///   [`DecodePipeline::decode`](crate::decode::DecodePipeline::decode);
///   [`ResourceReleased`](Self::ResourceReleased) is a caller bug.
/// - **Registry**: [`InvalidHandle`](Self::InvalidHandle).
/// - **Control plane**: [`PinningMismatch`](Self::PinningMismatch),
///   [`RateLimited`](Self::RateLimited), [`Rejected`](Self::Rejected),
///   [`Tls`](Self::Tls).
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    /// Underlying I/O or socket error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Connection could not be established or was lost.
    #[error("connection error: {0}")]
    Connection(ConnectionErrorKind),

    /// Failed to parse an RTSP response, SDP body or RTP packet.
    #[error("parse error: {kind}")]
    Parse { kind: ParseErrorKind },

    /// The camera URL is not a usable `rtsp://` URL.
    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    /// A frame could not be decoded. Callers of the decode pipeline see
    /// this as a `false` return, not as an error.
    #[error("decode error: {0}")]
    Decode(String),

    /// Decoder used after [`release`](crate::decode::DecodePipeline::release).
    #[error("decoder already released")]
    ResourceReleased,

    /// Handle does not refer to a live session or decoder.
    #[error("invalid or destroyed handle")]
    InvalidHandle,

    /// Presented certificate chain matched none of the pins for the host.
    #[error("certificate pin mismatch for host {host}")]
    PinningMismatch { host: String },

    /// Raised by the rate-limit interceptor to short-circuit a request.
    #[error("rate limited, retry in {}ms", wait.as_millis())]
    RateLimited { wait: Duration },

    /// TLS client configuration could not be built.
    #[error("TLS configuration error: {0}")]
    Tls(String),

    /// Request rejected by an interceptor.
    #[error("request rejected: {0}")]
    Rejected(String),
}

/// Why a connection attempt or live connection failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionErrorKind {
    /// Handshake did not complete within the caller's timeout.
    Timeout,
    /// TCP connection refused or host unreachable.
    Refused,
    /// Server answered 401 even after an authenticated retry.
    AuthenticationFailed,
    /// Server answered a request with a non-2xx status.
    Status { code: u16, reason: String },
    /// Server closed the control connection.
    Closed,
    /// `disconnect()` or `destroy()` aborted the attempt.
    Cancelled,
    /// Server response violated the protocol (missing Session header, no
    /// usable streams, ...).
    Protocol(String),
}

impl fmt::Display for ConnectionErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "timed out"),
            Self::Refused => write!(f, "connection refused"),
            Self::AuthenticationFailed => write!(f, "authentication failed"),
            Self::Status { code, reason } => write!(f, "server returned {code} {reason}"),
            Self::Closed => write!(f, "connection closed by server"),
            Self::Cancelled => write!(f, "connect cancelled"),
            Self::Protocol(detail) => write!(f, "protocol violation: {detail}"),
        }
    }
}

/// Specific kind of parse failure.
#[derive(Debug)]
pub enum ParseErrorKind {
    /// Input was empty (no status line).
    EmptyResponse,
    /// Status line did not have the expected `Version Code Reason` format.
    InvalidStatusLine,
    /// A header line did not contain a colon separator.
    InvalidHeader,
    /// RTP packet shorter than its fixed header or declared extensions.
    TruncatedPacket,
    /// RTP version field was not 2.
    UnsupportedRtpVersion(u8),
}

impl fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyResponse => write!(f, "empty response"),
            Self::InvalidStatusLine => write!(f, "invalid status line"),
            Self::InvalidHeader => write!(f, "invalid header"),
            Self::TruncatedPacket => write!(f, "truncated RTP packet"),
            Self::UnsupportedRtpVersion(v) => write!(f, "unsupported RTP version {v}"),
        }
    }
}

impl IngestError {
    pub(crate) fn parse(kind: ParseErrorKind) -> Self {
        Self::Parse { kind }
    }

    pub(crate) fn protocol(detail: impl Into<String>) -> Self {
        Self::Connection(ConnectionErrorKind::Protocol(detail.into()))
    }

    /// Whether this error means the connection is unusable.
    pub fn is_connection_error(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::Io(_) | Self::PinningMismatch { .. })
    }

    /// Whether an interceptor refused the request before it reached the
    /// camera. Nothing went on the wire; the caller may retry later.
    pub fn is_refusal(&self) -> bool {
        matches!(self, Self::RateLimited { .. } | Self::Rejected(_))
    }
}

/// Convenience alias for `Result<T, IngestError>`.
pub type Result<T> = std::result::Result<T, IngestError>;
