//! Caller-side reconnect policy.
//!
//! [`Session`](super::Session) never retries on its own. A supervisor that
//! wants to reconnect after an `Error` status walks a [`Backoff`] built
//! from a [`ReconnectPolicy`].

use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    pub enabled: bool,
    /// Attempts before giving up. `0` retries forever.
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// Factor applied to the delay after each attempt. Values below 1.0 are
    /// treated as 1.0.
    pub backoff_multiplier: f64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            max_retries: 0,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }
}

impl ReconnectPolicy {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    pub fn backoff(&self) -> Backoff {
        Backoff {
            policy: self.clone(),
            attempt: 0,
            next_delay: self.initial_delay.min(self.max_delay),
        }
    }
}

/// Delays between reconnect attempts, ending when retries run out.
///
/// ```
/// use std::time::Duration;
/// use ingest::session::ReconnectPolicy;
///
/// let policy = ReconnectPolicy {
///     max_retries: 4,
///     initial_delay: Duration::from_millis(500),
///     max_delay: Duration::from_secs(3),
///     ..ReconnectPolicy::default()
/// };
/// let delays: Vec<u64> = policy.backoff().map(|d| d.as_millis() as u64).collect();
/// assert_eq!(delays, vec![500, 1000, 2000, 3000]);
/// ```
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: ReconnectPolicy,
    attempt: u32,
    next_delay: Duration,
}

impl Backoff {
    /// Attempts handed out so far.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Start over after a successful connection.
    pub fn reset(&mut self) {
        self.attempt = 0;
        self.next_delay = self.policy.initial_delay.min(self.policy.max_delay);
    }
}

impl Iterator for Backoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        if !self.policy.enabled {
            return None;
        }
        if self.policy.max_retries != 0 && self.attempt >= self.policy.max_retries {
            return None;
        }
        self.attempt += 1;

        let delay = self.next_delay;
        let multiplier = self.policy.backoff_multiplier.max(1.0);
        self.next_delay = delay.mul_f64(multiplier).min(self.policy.max_delay);
        Some(delay)
    }
}
