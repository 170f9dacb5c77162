//! Exponential reconnection backoff

use std::time::Duration;

/// Delay before attempt `k` (k >= 1) is `base * 2^(k-1)`, optionally capped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    base: Duration,
    max_delay: Option<Duration>,
    max_attempts: u32,
}

impl Backoff {
    pub fn new(base: Duration, max_delay: Option<Duration>, max_attempts: u32) -> Self {
        Self {
            base,
            max_delay,
            max_attempts,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay before reconnection attempt `attempt`; attempt 0 is treated as 1
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.max(1) - 1;
        let factor = 1u32.checked_shl(exponent).unwrap_or(0);
        let delay = if factor == 0 {
            Duration::MAX
        } else {
            self.base.saturating_mul(factor)
        };
        match self.max_delay {
            Some(cap) => delay.min(cap),
            None => delay,
        }
    }

    /// Whether `attempt` is past the configured ceiling
    pub fn exhausted(&self, attempt: u32) -> bool {
        attempt > self.max_attempts
    }

    /// The full retry schedule, one delay per allowed attempt
    pub fn schedule(&self) -> Vec<Duration> {
        (1..=self.max_attempts).map(|k| self.delay(k)).collect()
    }
}
