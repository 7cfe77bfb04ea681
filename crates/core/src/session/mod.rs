//! Per-camera connection state machine.
//!
//! A [`Session`] owns at most one live [`Transport`] and drives it through
//! connect, play, pause and stop. It never retries by itself: failures are
//! reported through the status callback and the caller decides (see
//! [`ReconnectPolicy`]).
//!
//! ## States
//!
//! ```text
//!                connect()                 play()
//! Disconnected ───────────▶ Connecting ──▶ Connected ─────────▶ Playing
//!      ▲                        │              ▲   ◀──── stop() ──┘  ▲ │
//!      │                        │              │                 play()│pause()
//!      │ disconnect()           ▼              └─── stop() ─── Paused ◀┘
//!      └──────────────────── Error ◀── (connection failure)
//! ```
//!
//! Operations called from a state where they make no sense return
//! `Ok(false)` and change nothing.
//!
//! ## Threads
//!
//! Control operations block the calling thread. Frame and status
//! callbacks run on the transport's reader thread, except status changes
//! caused by a control operation, which are reported on the caller's
//! thread once the change is committed. Callbacks are never invoked while
//! an internal lock is held.

pub mod reconnect;

use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};

use crate::error::{IngestError, Result};
use crate::stream::{RawFrame, StreamDescriptor, StreamKind};
use crate::transport::{
    CancelFlag, ConnectTarget, Connector, EventSink, TcpConnector, Transport, TransportEvent,
};

pub use reconnect::{Backoff, ReconnectPolicy};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Playing,
    Paused,
    Error,
}

impl ConnectionStatus {
    /// A transport exists (or is being built) in this state.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            Self::Connecting | Self::Connected | Self::Playing | Self::Paused
        )
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Playing => "playing",
            Self::Paused => "paused",
            Self::Error => "error",
        };
        f.write_str(name)
    }
}

/// Session configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub enable_video: bool,
    pub enable_audio: bool,
    /// ONVIF metadata and other `application` streams.
    pub enable_metadata: bool,
    /// Used by [`Session::connect`] when the caller passes no timeout.
    pub default_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            enable_video: true,
            enable_audio: true,
            enable_metadata: false,
            default_timeout: Duration::from_secs(10),
        }
    }
}

impl SessionConfig {
    fn kinds(&self) -> Vec<StreamKind> {
        [
            (StreamKind::Video, self.enable_video),
            (StreamKind::Audio, self.enable_audio),
            (StreamKind::Metadata, self.enable_metadata),
        ]
        .into_iter()
        .filter_map(|(kind, enabled)| enabled.then_some(kind))
        .collect()
    }
}

/// Receives frames of one [`StreamKind`]. Must not block.
pub type FrameCallback = Arc<dyn Fn(&RawFrame) + Send + Sync>;

/// Receives every status change, with a message for errors.
pub type StatusCallback = Arc<dyn Fn(ConnectionStatus, Option<&str>) + Send + Sync>;

/// One camera.
pub struct Session {
    config: SessionConfig,
    connector: Arc<dyn Connector>,
    shared: Arc<Shared>,
    /// Held for the duration of every wire operation.
    transport: Mutex<Option<Box<dyn Transport>>>,
}

/// State reachable from the reader thread.
struct Shared {
    state: RwLock<State>,
    frame_callbacks: RwLock<[Option<FrameCallback>; 3]>,
    status_callback: RwLock<Option<StatusCallback>>,
}

struct State {
    status: ConnectionStatus,
    streams: Vec<StreamDescriptor>,
    url: Option<String>,
    /// Bumped by every connect and disconnect; results and events from an
    /// older connection are ignored.
    epoch: u64,
    /// Set while a connect is in flight.
    cancel: Option<CancelFlag>,
    /// Frames reach callbacks. Opened just before PLAY is sent, since
    /// cameras start streaming before the response is processed.
    delivering: bool,
    /// Set once by the registry; every later operation is refused.
    destroyed: bool,
}

impl Session {
    /// Create a session using the built-in RTSP/TCP transport.
    pub fn new(config: SessionConfig) -> Self {
        Self::with_connector(config, Arc::new(TcpConnector::new()))
    }

    pub fn with_connector(config: SessionConfig, connector: Arc<dyn Connector>) -> Self {
        Self {
            config,
            connector,
            shared: Arc::new(Shared {
                state: RwLock::new(State {
                    status: ConnectionStatus::Disconnected,
                    streams: Vec::new(),
                    url: None,
                    epoch: 0,
                    cancel: None,
                    delivering: false,
                    destroyed: false,
                }),
                frame_callbacks: RwLock::new([None, None, None]),
                status_callback: RwLock::new(None),
            }),
            transport: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Connect, discover streams and set them up.
    ///
    /// Valid from `Disconnected` or `Error`; returns `Ok(false)` otherwise.
    /// On failure the session moves to `Error` and the error is returned,
    /// except when an interceptor refused a request: the session then goes
    /// back to the status it had before the call.
    ///
    /// A [`disconnect`](Self::disconnect) from another thread aborts the
    /// attempt; its late result is discarded and `Ok(false)` returned.
    pub fn connect(
        &self,
        url: &str,
        username: Option<&str>,
        password: Option<&str>,
        timeout: Option<Duration>,
    ) -> Result<bool> {
        let mut target = ConnectTarget::new(url, timeout.unwrap_or(self.config.default_timeout))
            .with_kinds(self.config.kinds());
        target.username = username.map(str::to_string);
        target.password = password.map(str::to_string);

        let (epoch, previous) = {
            let mut state = self.shared.state.write();
            if state.destroyed {
                return Err(IngestError::InvalidHandle);
            }
            if state.status.is_active() {
                tracing::debug!(status = %state.status, "connect ignored");
                return Ok(false);
            }
            let previous = state.status;
            state.epoch += 1;
            state.status = ConnectionStatus::Connecting;
            state.delivering = false;
            state.streams.clear();
            state.url = Some(url.to_string());
            state.cancel = Some(target.cancel.clone());
            (state.epoch, previous)
        };

        // a transport left behind by an earlier error
        let stale = self.transport.lock().take();
        if let Some(mut transport) = stale {
            transport.close();
        }

        self.shared.notify(ConnectionStatus::Connecting, None);
        tracing::info!(url, "connecting");

        let result = self.connector.connect(&target, Shared::sink(&self.shared, epoch));

        let mut slot = self.transport.lock();
        let mut state = self.shared.state.write();
        if state.epoch != epoch {
            drop(state);
            drop(slot);
            tracing::debug!(url, "connect superseded, discarding result");
            if let Ok(mut transport) = result {
                transport.close();
            }
            return Ok(false);
        }
        state.cancel = None;

        match result {
            Ok(transport) => {
                state.streams = transport.streams().to_vec();
                state.status = ConnectionStatus::Connected;
                let count = state.streams.len();
                *slot = Some(transport);
                drop(state);
                drop(slot);

                tracing::info!(url, streams = count, "connected");
                self.shared.notify(ConnectionStatus::Connected, None);
                Ok(true)
            }
            Err(error) if error.is_refusal() => {
                state.status = previous;
                drop(state);
                drop(slot);

                tracing::warn!(url, %error, "connect refused before reaching the camera");
                self.shared.notify(previous, None);
                Err(error)
            }
            Err(error) => {
                state.status = ConnectionStatus::Error;
                drop(state);
                drop(slot);

                tracing::warn!(url, %error, "connect failed");
                self.shared
                    .notify(ConnectionStatus::Error, Some(&error.to_string()));
                Err(error)
            }
        }
    }

    /// Start or resume delivery. Valid from `Connected` and `Paused`.
    ///
    /// A connection failure moves the session to `Error`. A request refused
    /// by an interceptor (rate limit, rejection) leaves the status as it was.
    pub fn play(&self) -> Result<bool> {
        self.wire_op(
            &[ConnectionStatus::Connected, ConnectionStatus::Paused],
            ConnectionStatus::Playing,
            true,
            |transport| transport.play(),
        )
    }

    /// Suspend delivery, keeping the transport. Valid from `Playing`.
    pub fn pause(&self) -> Result<bool> {
        self.wire_op(
            &[ConnectionStatus::Playing],
            ConnectionStatus::Paused,
            false,
            |transport| transport.pause(),
        )
    }

    /// Halt delivery and return to `Connected` with streams retained.
    ///
    /// From `Playing` this sends PAUSE; from `Paused` nothing goes on the
    /// wire.
    pub fn stop(&self) -> Result<bool> {
        if self.status() == ConnectionStatus::Paused {
            return self.wire_op(
                &[ConnectionStatus::Paused],
                ConnectionStatus::Connected,
                false,
                |_| Ok(()),
            );
        }
        self.wire_op(
            &[ConnectionStatus::Playing],
            ConnectionStatus::Connected,
            false,
            |transport| transport.pause(),
        )
    }

    fn wire_op(
        &self,
        from: &[ConnectionStatus],
        to: ConnectionStatus,
        deliver: bool,
        op: impl FnOnce(&mut dyn Transport) -> Result<()>,
    ) -> Result<bool> {
        let mut slot = self.transport.lock();
        let (epoch, was_delivering) = {
            let mut state = self.shared.state.write();
            if state.destroyed {
                return Err(IngestError::InvalidHandle);
            }
            if slot.is_none() || !from.contains(&state.status) {
                tracing::debug!(status = %state.status, target = %to, "transition not allowed");
                return Ok(false);
            }
            let was_delivering = std::mem::replace(&mut state.delivering, deliver);
            (state.epoch, was_delivering)
        };
        let Some(transport) = slot.as_mut() else {
            return Ok(false);
        };

        match op(transport.as_mut()) {
            Ok(()) => {
                drop(slot);
                Ok(self.shared.commit(epoch, to))
            }
            Err(error) if error.is_connection_error() => {
                drop(slot);
                tracing::warn!(%error, target = %to, "control request failed");
                self.shared.fail(epoch, &error.to_string(), true);
                Err(error)
            }
            Err(error) => {
                {
                    let mut state = self.shared.state.write();
                    if state.epoch == epoch {
                        state.delivering = was_delivering;
                    }
                }
                drop(slot);
                tracing::warn!(%error, target = %to, "control request refused, status kept");
                Err(error)
            }
        }
    }

    /// Tear down the connection and forget its streams.
    ///
    /// Valid from every state except `Disconnected`. Aborts an in-flight
    /// connect. TEARDOWN is best-effort; this always ends `Disconnected`.
    pub fn disconnect(&self) -> bool {
        let cancel = {
            let mut state = self.shared.state.write();
            if state.status == ConnectionStatus::Disconnected {
                return false;
            }
            state.epoch += 1;
            state.status = ConnectionStatus::Disconnected;
            state.delivering = false;
            state.streams.clear();
            state.cancel.take()
        };
        if let Some(cancel) = cancel {
            cancel.cancel();
        }

        let transport = self.transport.lock().take();
        if let Some(mut transport) = transport {
            transport.close();
        }

        tracing::info!("disconnected");
        self.shared.notify(ConnectionStatus::Disconnected, None);
        true
    }

    pub fn status(&self) -> ConnectionStatus {
        self.shared.state.read().status
    }

    pub fn url(&self) -> Option<String> {
        self.shared.state.read().url.clone()
    }

    pub fn stream_count(&self) -> usize {
        self.shared.state.read().streams.len()
    }

    pub fn stream_info(&self, index: usize) -> Option<StreamDescriptor> {
        self.shared.state.read().streams.get(index).cloned()
    }

    pub fn streams(&self) -> Vec<StreamDescriptor> {
        self.shared.state.read().streams.clone()
    }

    /// Register the frame sink for one stream kind, replacing any previous.
    pub fn set_frame_callback(
        &self,
        kind: StreamKind,
        callback: impl Fn(&RawFrame) + Send + Sync + 'static,
    ) {
        self.shared.frame_callbacks.write()[kind.slot()] = Some(Arc::new(callback));
    }

    pub fn clear_frame_callback(&self, kind: StreamKind) {
        self.shared.frame_callbacks.write()[kind.slot()] = None;
    }

    pub fn set_status_callback(
        &self,
        callback: impl Fn(ConnectionStatus, Option<&str>) + Send + Sync + 'static,
    ) {
        *self.shared.status_callback.write() = Some(Arc::new(callback));
    }

    pub fn clear_status_callback(&self) {
        *self.shared.status_callback.write() = None;
    }

    /// Disconnect and drop all callbacks. Used when the session is destroyed;
    /// control operations fail with [`IngestError::InvalidHandle`] afterwards.
    pub(crate) fn shutdown(&self) {
        self.shared.state.write().destroyed = true;
        self.clear_status_callback();
        *self.shared.frame_callbacks.write() = [None, None, None];
        self.disconnect();
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(cancel) = self.shared.state.write().cancel.take() {
            cancel.cancel();
        }
        if let Some(mut transport) = self.transport.get_mut().take() {
            transport.close();
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.read();
        f.debug_struct("Session")
            .field("status", &state.status)
            .field("url", &state.url)
            .field("streams", &state.streams.len())
            .finish()
    }
}

impl Shared {
    fn notify(&self, status: ConnectionStatus, message: Option<&str>) {
        let callback = self.status_callback.read().clone();
        if let Some(callback) = callback {
            callback(status, message);
        }
    }

    /// Commit a successful transition unless the connection changed or
    /// failed meanwhile.
    fn commit(&self, epoch: u64, to: ConnectionStatus) -> bool {
        {
            let mut state = self.state.write();
            if state.epoch != epoch || state.status == ConnectionStatus::Error {
                return false;
            }
            tracing::debug!(from = %state.status, to = %to, "status change");
            state.status = to;
        }
        self.notify(to, None);
        true
    }

    /// Move a live connection to `Error`. The transport stays in place
    /// until the caller disconnects.
    fn fail(&self, epoch: u64, message: &str, from_control: bool) {
        {
            let mut state = self.state.write();
            let live = matches!(
                state.status,
                ConnectionStatus::Connected | ConnectionStatus::Playing | ConnectionStatus::Paused
            );
            if state.epoch != epoch || !live {
                return;
            }
            state.status = ConnectionStatus::Error;
            state.delivering = false;
        }
        if !from_control {
            tracing::warn!(message, "connection failed while live");
        }
        self.notify(ConnectionStatus::Error, Some(message));
    }

    fn sink(shared: &Arc<Self>, epoch: u64) -> EventSink {
        let shared: Weak<Self> = Arc::downgrade(shared);
        Arc::new(move |event: TransportEvent<'_>| {
            let Some(shared) = shared.upgrade() else {
                return;
            };
            match event {
                TransportEvent::Frame(frame) => {
                    {
                        let state = shared.state.read();
                        if state.epoch != epoch || !state.delivering {
                            return;
                        }
                    }
                    let callback = shared.frame_callbacks.read()[frame.kind.slot()].clone();
                    if let Some(callback) = callback {
                        callback(frame);
                    }
                }
                TransportEvent::Error(message) => shared.fail(epoch, &message, false),
                TransportEvent::Closed => shared.fail(epoch, "connection closed by camera", false),
            }
        })
    }
}
