//! Bounded retry policy shared by the inbox and outbox.

use serde::{Deserialize, Serialize};

/// Capped exponential backoff with a maximum attempt count.
///
/// Once an entry has failed `max_attempts` times it is dead-lettered instead
/// of being rescheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: i64,
    pub max_delay_ms: i64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 30,
            base_delay_ms: 5_000,
            max_delay_ms: 3_600_000,
        }
    }
}

impl RetryPolicy {
    /// Whether an entry that has failed `attempts` times should be given up on.
    pub fn is_exhausted(&self, attempts: u32) -> bool {
        attempts >= self.max_attempts
    }

    /// Delay before the next try after `attempts` failures.
    pub fn delay_ms(&self, attempts: u32) -> i64 {
        let exponent = attempts.saturating_sub(1).min(30);
        self.base_delay_ms
            .saturating_mul(1i64 << exponent)
            .min(self.max_delay_ms)
            .max(0)
    }

    pub fn next_run_at(&self, attempts: u32, now: i64) -> i64 {
        now.saturating_add(self.delay_ms(attempts))
    }
}
