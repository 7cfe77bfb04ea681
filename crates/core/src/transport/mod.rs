//! Camera transports.
//!
//! A [`Connector`] performs the handshake and stream discovery and hands
//! back a live [`Transport`]; the session state machine only ever talks to
//! these two traits. Media arrives asynchronously on the transport's own
//! reader thread and is pushed into an [`EventSink`].
//!
//! The built-in implementation is [`tcp::TcpConnector`]: RTSP/1.0 over one
//! TCP connection with RTP interleaved on the same socket (RFC 2326 §10.12).

pub mod tcp;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::error::Result;
use crate::stream::{RawFrame, StreamDescriptor, StreamKind};

pub use tcp::{RtspTransport, TcpConnector};

/// Delivered from a transport's reader thread.
#[derive(Debug)]
pub enum TransportEvent<'a> {
    /// A complete encoded frame. Borrowed for the duration of the call.
    Frame(&'a RawFrame),
    /// The connection failed while live.
    Error(String),
    /// The server closed the connection.
    Closed,
}

/// Receives [`TransportEvent`]s. Runs on the reader thread; must not block.
pub type EventSink = Arc<dyn Fn(TransportEvent<'_>) + Send + Sync>;

/// Shared flag that aborts an in-flight connect.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Everything a connector needs to reach one camera.
#[derive(Debug, Clone)]
pub struct ConnectTarget {
    /// `rtsp://[user[:pass]@]host[:port]/path`
    pub url: String,
    /// Overrides credentials embedded in the URL.
    pub username: Option<String>,
    pub password: Option<String>,
    /// Budget for the whole handshake, and for each later request.
    pub timeout: Duration,
    /// Stream kinds to SETUP; others are skipped during discovery.
    pub kinds: Vec<StreamKind>,
    pub cancel: CancelFlag,
}

impl ConnectTarget {
    pub fn new(url: &str, timeout: Duration) -> Self {
        Self {
            url: url.to_string(),
            username: None,
            password: None,
            timeout,
            kinds: vec![StreamKind::Video, StreamKind::Audio],
            cancel: CancelFlag::new(),
        }
    }

    pub fn with_credentials(mut self, username: &str, password: &str) -> Self {
        self.username = Some(username.to_string());
        self.password = Some(password.to_string());
        self
    }

    pub fn with_kinds(mut self, kinds: Vec<StreamKind>) -> Self {
        self.kinds = kinds;
        self
    }

    pub fn accepts(&self, kind: StreamKind) -> bool {
        self.kinds.contains(&kind)
    }
}

/// Establishes live transports.
pub trait Connector: Send + Sync {
    /// Connect, discover and set up streams. Blocks until done, failed, or
    /// cancelled through [`ConnectTarget::cancel`].
    fn connect(&self, target: &ConnectTarget, sink: EventSink) -> Result<Box<dyn Transport>>;
}

/// A connected camera.
pub trait Transport: Send {
    /// Streams set up during connect, ordered by index.
    fn streams(&self) -> &[StreamDescriptor];

    fn play(&mut self) -> Result<()>;

    fn pause(&mut self) -> Result<()>;

    /// Best-effort teardown. Never fails; idempotent.
    fn close(&mut self);
}
