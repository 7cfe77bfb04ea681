//! Client-side rate limiting for control-plane requests.
//!
//! Two strategies share the [`RateLimiter`] contract:
//!
//! - [`TokenBucket`]: bursts up to `max_tokens`, refilled in whole steps.
//! - [`FixedInterval`]: at most `max_requests` accepted calls per sliding
//!   window.
//!
//! Limiters never block and never fail; a refused call returns `false` and
//! [`wait_time`](RateLimiter::wait_time) says how long until one would
//! succeed. Mutation takes `&mut self`; share a limiter between threads by
//! wrapping it in a mutex, as
//! [`RateLimitInterceptor`](crate::control::interceptors::RateLimitInterceptor)
//! does.

mod fixed_interval;
mod token_bucket;

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

pub use fixed_interval::FixedInterval;
pub use token_bucket::TokenBucket;

pub trait RateLimiter: Send {
    /// Take a permit if one is available.
    fn acquire(&mut self) -> bool;

    /// Time until [`acquire`](Self::acquire) would succeed, zero when it
    /// would succeed now.
    fn wait_time(&mut self) -> Duration;
}

/// Monotonic time source.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// [`Instant::now`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock that only moves when told to. Clones share the same time.
#[derive(Debug, Clone)]
pub struct ManualClock {
    base: Instant,
    offset: Arc<Mutex<Duration>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            offset: Arc::new(Mutex::new(Duration::ZERO)),
        }
    }

    pub fn advance(&self, by: Duration) {
        *self.offset.lock() += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.base + *self.offset.lock()
    }
}
