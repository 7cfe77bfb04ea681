use std::sync::Arc;
use std::time::{Duration, Instant};

use super::{Clock, RateLimiter, SystemClock};

/// Token bucket with lazy, whole-step refill.
///
/// Every full `refill_rate` that elapsed since the last refill adds
/// `tokens_per_refill` tokens, capped at `max_tokens`. The refill instant
/// advances by whole steps only, so partial progress toward the next step
/// is never lost.
pub struct TokenBucket {
    max_tokens: u32,
    tokens_per_refill: u32,
    refill_rate: Duration,
    tokens: u32,
    last_refill: Instant,
    clock: Arc<dyn Clock>,
}

impl TokenBucket {
    /// A full bucket on the system clock.
    pub fn new(max_tokens: u32, refill_rate: Duration, tokens_per_refill: u32) -> Self {
        Self::with_clock(max_tokens, refill_rate, tokens_per_refill, Arc::new(SystemClock))
    }

    pub fn with_clock(
        max_tokens: u32,
        refill_rate: Duration,
        tokens_per_refill: u32,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            max_tokens,
            tokens_per_refill,
            refill_rate,
            tokens: max_tokens,
            last_refill: clock.now(),
            clock,
        }
    }

    /// Tokens currently available, after refilling.
    pub fn available(&mut self) -> u32 {
        self.refill(self.clock.now());
        self.tokens
    }

    fn refill(&mut self, now: Instant) {
        if self.refill_rate.is_zero() {
            self.tokens = self.max_tokens;
            self.last_refill = now;
            return;
        }

        let elapsed = now.saturating_duration_since(self.last_refill);
        let refills = elapsed.as_nanos() / self.refill_rate.as_nanos();
        if refills == 0 {
            return;
        }

        let added = refills.saturating_mul(self.tokens_per_refill as u128);
        self.tokens = (self.tokens as u128 + added).min(self.max_tokens as u128) as u32;
        // refills fits in u32 for any realistic elapsed time; saturate otherwise
        let steps = u32::try_from(refills).unwrap_or(u32::MAX);
        self.last_refill += self.refill_rate.saturating_mul(steps);

        tracing::trace!(refills = steps, tokens = self.tokens, "token bucket refilled");
    }
}

impl Default for TokenBucket {
    /// 10 tokens, one more every second.
    fn default() -> Self {
        Self::new(10, Duration::from_secs(1), 1)
    }
}

impl RateLimiter for TokenBucket {
    fn acquire(&mut self) -> bool {
        self.refill(self.clock.now());
        if self.tokens > 0 {
            self.tokens -= 1;
            true
        } else {
            false
        }
    }

    fn wait_time(&mut self) -> Duration {
        let now = self.clock.now();
        self.refill(now);
        if self.tokens > 0 {
            return Duration::ZERO;
        }
        let since = now.saturating_duration_since(self.last_refill);
        self.refill_rate.saturating_sub(since)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::ManualClock;

    fn bucket(max: u32, rate: Duration, per_refill: u32) -> (TokenBucket, ManualClock) {
        let clock = ManualClock::new();
        let bucket = TokenBucket::with_clock(max, rate, per_refill, Arc::new(clock.clone()));
        (bucket, clock)
    }

    #[test]
    fn burst_then_refuse() {
        let (mut b, _clock) = bucket(5, Duration::from_secs(1), 1);
        for _ in 0..5 {
            assert!(b.acquire());
        }
        assert!(!b.acquire(), "sixth call within the window is refused");
    }

    #[test]
    fn refills_after_interval() {
        let (mut b, clock) = bucket(5, Duration::from_secs(1), 1);
        for _ in 0..5 {
            b.acquire();
        }
        assert!(!b.acquire());

        clock.advance(Duration::from_secs(1));
        assert!(b.acquire());
        assert!(!b.acquire());
    }

    #[test]
    fn partial_progress_is_kept() {
        let (mut b, clock) = bucket(1, Duration::from_secs(1), 1);
        assert!(b.acquire());

        clock.advance(Duration::from_millis(1500));
        assert!(b.acquire());
        // last refill moved by one step only, 0.5s of progress remains
        clock.advance(Duration::from_millis(500));
        assert!(b.acquire());
    }

    #[test]
    fn refill_is_capped() {
        let (mut b, clock) = bucket(3, Duration::from_millis(100), 2);
        b.acquire();
        clock.advance(Duration::from_secs(10));
        assert_eq!(b.available(), 3);
    }

    #[test]
    fn wait_time_until_next_step() {
        let (mut b, clock) = bucket(1, Duration::from_secs(1), 1);
        assert_eq!(b.wait_time(), Duration::ZERO);
        b.acquire();
        clock.advance(Duration::from_millis(300));
        assert_eq!(b.wait_time(), Duration::from_millis(700));
    }
}
