use std::sync::Arc;
use std::thread::{self, JoinHandle};

use super::{DecodePipeline, FrameQueue};
use crate::error::{IngestError, Result};
use crate::stream::RawFrame;

/// Runs a [`DecodePipeline`] on a dedicated thread.
///
/// Frames are submitted from the session's frame callback with
/// [`submit`](Self::submit), which never blocks; under overload the queue
/// sheds non-keyframes first.
pub struct DecodeWorker {
    queue: Arc<FrameQueue>,
    handle: Option<JoinHandle<DecodePipeline>>,
}

impl DecodeWorker {
    pub fn spawn(mut pipeline: DecodePipeline, queue_capacity: usize) -> Result<Self> {
        let queue = Arc::new(FrameQueue::new(queue_capacity));
        let consumer = queue.clone();
        let name = format!("decode-{}", pipeline.codec()).to_lowercase();

        let handle = thread::Builder::new().name(name).spawn(move || {
            while let Some(frame) = consumer.pop() {
                if let Err(error) = pipeline.decode(&frame) {
                    tracing::warn!(%error, "decode worker stopping");
                    consumer.close();
                    break;
                }
            }
            pipeline
        })?;

        Ok(Self {
            queue,
            handle: Some(handle),
        })
    }

    /// Queue a copy of `frame` for decoding. Returns `false` once stopped.
    pub fn submit(&self, frame: &RawFrame) -> bool {
        self.queue.push(frame.clone())
    }

    /// Shared handle to the input queue, for producers on other threads.
    pub fn queue(&self) -> Arc<FrameQueue> {
        self.queue.clone()
    }

    pub fn dropped_frames(&self) -> u64 {
        self.queue.dropped()
    }

    /// Drain the queue, stop the thread and hand the pipeline back.
    pub fn stop(mut self) -> Result<DecodePipeline> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<DecodePipeline> {
        self.queue.close();
        let handle = self.handle.take().ok_or(IngestError::ResourceReleased)?;
        handle
            .join()
            .map_err(|_| IngestError::Decode("decode worker panicked".to_string()))
    }
}

impl Drop for DecodeWorker {
    fn drop(&mut self) {
        if self.handle.is_some()
            && let Ok(mut pipeline) = self.shutdown()
        {
            pipeline.release();
        }
    }
}
