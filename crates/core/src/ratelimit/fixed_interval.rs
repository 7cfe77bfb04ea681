use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::{Clock, RateLimiter, SystemClock};

/// At most `max_requests` accepted calls in any `interval`.
///
/// Keeps the instants of accepted calls; an instant leaves the window once
/// it is strictly older than `interval`.
pub struct FixedInterval {
    interval: Duration,
    max_requests: usize,
    accepted: VecDeque<Instant>,
    clock: Arc<dyn Clock>,
}

impl FixedInterval {
    pub fn new(interval: Duration, max_requests: usize) -> Self {
        Self::with_clock(interval, max_requests, Arc::new(SystemClock))
    }

    pub fn with_clock(interval: Duration, max_requests: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            interval,
            max_requests,
            accepted: VecDeque::with_capacity(max_requests),
            clock,
        }
    }

    fn evict(&mut self, now: Instant) {
        while let Some(&oldest) = self.accepted.front() {
            if now.saturating_duration_since(oldest) > self.interval {
                self.accepted.pop_front();
            } else {
                break;
            }
        }
    }
}

impl RateLimiter for FixedInterval {
    fn acquire(&mut self) -> bool {
        let now = self.clock.now();
        self.evict(now);
        if self.accepted.len() < self.max_requests {
            self.accepted.push_back(now);
            true
        } else {
            false
        }
    }

    fn wait_time(&mut self) -> Duration {
        let now = self.clock.now();
        self.evict(now);
        if self.accepted.len() < self.max_requests {
            return Duration::ZERO;
        }
        // the oldest instant is still inside the window, so it frees just
        // after `interval` has fully elapsed
        match self.accepted.front() {
            Some(&oldest) => self
                .interval
                .saturating_sub(now.saturating_duration_since(oldest))
                .max(Duration::from_nanos(1)),
            None => Duration::ZERO,
        }
    }
}
