//! Handle tables for sessions and decoders.
//!
//! Callers that cannot hold Rust references (an FFI layer, a supervisor
//! keyed by integers) refer to sessions and decoders through small `Copy`
//! handles. A handle pairs a slot index with the slot's generation; a slot
//! is reused after destroy with a bumped generation, so a stale handle
//! never reaches the new occupant and every lookup through it fails with
//! [`IngestError::InvalidHandle`].

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::decode::{DecodeConfig, DecodePipeline, VideoCodec};
use crate::error::{IngestError, Result};
use crate::session::{Session, SessionConfig};
use crate::transport::Connector;

/// Opaque reference into a [`HandleTable`].
pub struct Handle<T> {
    index: u32,
    generation: u32,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Handle<T> {
    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }
}

// derives would require `T: Clone` etc.
impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Handle<T> {}

impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index && self.generation == other.generation
    }
}

impl<T> Eq for Handle<T> {}

impl<T> std::hash::Hash for Handle<T> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.index.hash(state);
        self.generation.hash(state);
    }
}

impl<T> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle({}v{})", self.index, self.generation)
    }
}

pub type SessionHandle = Handle<Session>;
pub type DecoderHandle = Handle<Mutex<DecodePipeline>>;

struct Slot<T> {
    generation: u32,
    value: Option<Arc<T>>,
}

/// Generation-checked slot table.
pub struct HandleTable<T> {
    inner: RwLock<Slots<T>>,
}

struct Slots<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
}

impl<T> Default for HandleTable<T> {
    fn default() -> Self {
        Self {
            inner: RwLock::new(Slots {
                slots: Vec::new(),
                free: Vec::new(),
            }),
        }
    }
}

impl<T> HandleTable<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, value: T) -> Handle<T> {
        let mut inner = self.inner.write();
        let value = Some(Arc::new(value));
        let (index, generation) = match inner.free.pop() {
            Some(index) => {
                let slot = &mut inner.slots[index as usize];
                slot.value = value;
                (index, slot.generation)
            }
            None => {
                let index = inner.slots.len() as u32;
                inner.slots.push(Slot {
                    generation: 0,
                    value,
                });
                (index, 0)
            }
        };
        Handle {
            index,
            generation,
            _marker: PhantomData,
        }
    }

    pub fn get(&self, handle: Handle<T>) -> Result<Arc<T>> {
        let inner = self.inner.read();
        inner
            .slots
            .get(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.value.clone())
            .ok_or(IngestError::InvalidHandle)
    }

    /// Detach the value and invalidate every copy of `handle`.
    ///
    /// The value itself lives on while other `Arc`s to it exist.
    pub fn remove(&self, handle: Handle<T>) -> Result<Arc<T>> {
        let mut inner = self.inner.write();
        let slot = inner
            .slots
            .get_mut(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .ok_or(IngestError::InvalidHandle)?;
        let value = slot.value.take().ok_or(IngestError::InvalidHandle)?;
        slot.generation = slot.generation.wrapping_add(1);
        inner.free.push(handle.index);
        Ok(value)
    }

    pub fn len(&self) -> usize {
        let inner = self.inner.read();
        inner.slots.len() - inner.free.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Owns every session and decoder created through it.
pub struct SessionRegistry {
    connector: Option<Arc<dyn Connector>>,
    sessions: HandleTable<Session>,
    decoders: HandleTable<Mutex<DecodePipeline>>,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionRegistry {
    /// Sessions created here use the built-in RTSP/TCP transport.
    pub fn new() -> Self {
        Self {
            connector: None,
            sessions: HandleTable::new(),
            decoders: HandleTable::new(),
        }
    }

    /// Sessions created here share `connector`.
    pub fn with_connector(connector: Arc<dyn Connector>) -> Self {
        Self {
            connector: Some(connector),
            sessions: HandleTable::new(),
            decoders: HandleTable::new(),
        }
    }

    /// Allocate a disconnected session.
    pub fn create(&self, config: SessionConfig) -> SessionHandle {
        let session = match &self.connector {
            Some(connector) => Session::with_connector(config, connector.clone()),
            None => Session::new(config),
        };
        let handle = self.sessions.insert(session);
        tracing::debug!(?handle, "session created");
        handle
    }

    pub fn session(&self, handle: SessionHandle) -> Result<Arc<Session>> {
        self.sessions.get(handle)
    }

    /// Disconnect and release a session from any state.
    ///
    /// Aborts an in-flight connect on another thread. Callbacks are
    /// cleared first, so none fire after this returns.
    pub fn destroy(&self, handle: SessionHandle) -> Result<()> {
        let session = self.sessions.remove(handle)?;
        session.shutdown();
        tracing::debug!(?handle, "session destroyed");
        Ok(())
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn create_decoder(&self, codec: VideoCodec, width: u32, height: u32) -> DecoderHandle {
        self.create_decoder_with(codec, width, height, DecodeConfig::default())
    }

    pub fn create_decoder_with(
        &self,
        codec: VideoCodec,
        width: u32,
        height: u32,
        config: DecodeConfig,
    ) -> DecoderHandle {
        let pipeline = DecodePipeline::with_config(codec, width, height, &config);
        self.decoders.insert(Mutex::new(pipeline))
    }

    pub fn decoder(&self, handle: DecoderHandle) -> Result<Arc<Mutex<DecodePipeline>>> {
        self.decoders.get(handle)
    }

    /// Release the decoder's buffers and invalidate the handle.
    pub fn destroy_decoder(&self, handle: DecoderHandle) -> Result<()> {
        let decoder = self.decoders.remove(handle)?;
        decoder.lock().release();
        Ok(())
    }

    pub fn decoder_count(&self) -> usize {
        self.decoders.len()
    }
}

impl Drop for SessionRegistry {
    fn drop(&mut self) {
        let live: Vec<Arc<Session>> = self
            .sessions
            .inner
            .get_mut()
            .slots
            .iter_mut()
            .filter_map(|slot| slot.value.take())
            .collect();
        for session in live {
            session.shutdown();
        }
    }
}
