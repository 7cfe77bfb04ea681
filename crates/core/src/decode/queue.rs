use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::stream::RawFrame;

/// Bounded hand-off between a session's reader thread and a decode worker.
///
/// When full, the oldest non-keyframe is dropped to make room. If every
/// queued frame is a keyframe the oldest frame is dropped instead.
#[derive(Debug)]
pub struct FrameQueue {
    capacity: usize,
    state: Mutex<QueueState>,
    ready: Condvar,
}

#[derive(Debug, Default)]
struct QueueState {
    frames: VecDeque<RawFrame>,
    dropped: u64,
    closed: bool,
}

impl FrameQueue {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            state: Mutex::new(QueueState {
                frames: VecDeque::with_capacity(capacity),
                ..QueueState::default()
            }),
            ready: Condvar::new(),
        }
    }

    /// Enqueue a frame. Never blocks. Returns `false` once closed.
    pub fn push(&self, frame: RawFrame) -> bool {
        let mut state = self.state.lock();
        if state.closed {
            return false;
        }

        if state.frames.len() >= self.capacity {
            let victim = state
                .frames
                .iter()
                .position(|f| !f.keyframe)
                .unwrap_or(0);
            if let Some(old) = state.frames.remove(victim) {
                state.dropped += 1;
                tracing::trace!(
                    stream = old.stream_index,
                    keyframe = old.keyframe,
                    dropped = state.dropped,
                    "decode queue full, dropping frame"
                );
            }
        }

        state.frames.push_back(frame);
        drop(state);
        self.ready.notify_one();
        true
    }

    /// Block until a frame is available. `None` once closed and drained.
    pub fn pop(&self) -> Option<RawFrame> {
        let mut state = self.state.lock();
        loop {
            if let Some(frame) = state.frames.pop_front() {
                return Some(frame);
            }
            if state.closed {
                return None;
            }
            self.ready.wait(&mut state);
        }
    }

    /// Like [`pop`](Self::pop) but gives up after `timeout`.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<RawFrame> {
        let mut state = self.state.lock();
        if state.frames.is_empty() && !state.closed {
            self.ready.wait_for(&mut state, timeout);
        }
        state.frames.pop_front()
    }

    /// Refuse further pushes and wake the consumer.
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.ready.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub fn len(&self) -> usize {
        self.state.lock().frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Frames dropped because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.state.lock().dropped
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;
    use crate::stream::StreamKind;

    fn frame(ts: i64, keyframe: bool) -> RawFrame {
        RawFrame {
            stream_index: 0,
            kind: StreamKind::Video,
            payload: Bytes::from_static(b"au"),
            timestamp_us: ts,
            keyframe,
        }
    }

    fn drain(queue: &FrameQueue) -> Vec<i64> {
        std::iter::from_fn(|| queue.pop_timeout(Duration::ZERO))
            .map(|f| f.timestamp_us)
            .collect()
    }

    #[test]
    fn drops_oldest_non_keyframe_first() {
        let queue = FrameQueue::new(3);
        queue.push(frame(0, true));
        queue.push(frame(1, false));
        queue.push(frame(2, false));
        queue.push(frame(3, false));

        assert_eq!(queue.dropped(), 1);
        assert_eq!(drain(&queue), vec![0, 2, 3]);
    }

    #[test]
    fn all_keyframes_drops_oldest() {
        let queue = FrameQueue::new(2);
        queue.push(frame(0, true));
        queue.push(frame(1, true));
        queue.push(frame(2, false));

        assert_eq!(queue.dropped(), 1);
        assert_eq!(drain(&queue), vec![1, 2]);
    }

    #[test]
    fn close_wakes_consumer_and_refuses_pushes() {
        let queue = std::sync::Arc::new(FrameQueue::new(4));
        let consumer = {
            let queue = queue.clone();
            std::thread::spawn(move || queue.pop())
        };
        std::thread::sleep(Duration::from_millis(20));
        queue.close();

        assert!(consumer.join().unwrap().is_none());
        assert!(!queue.push(frame(0, true)));
    }

    #[test]
    fn pop_drains_before_reporting_closed() {
        let queue = FrameQueue::new(4);
        queue.push(frame(7, true));
        queue.close();
        assert_eq!(queue.pop().map(|f| f.timestamp_us), Some(7));
        assert!(queue.pop().is_none());
    }
}
