use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::config::RetryPolicyConfig;

/// Bounded exponential backoff for transient send failures.
///
/// Attempt `n` (1-based) that fails is retried after `base * 2^(n-1)`, capped at `max_delay`,
/// until `max_attempts` attempts have been made.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
        }
    }

    pub fn disabled() -> Self {
        Self::new(1, Duration::ZERO, Duration::ZERO)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn backoff(&self, failed_attempt: u32) -> Duration {
        let exponent = failed_attempt.saturating_sub(1).min(30);
        let delay = self
            .base_delay
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.max_delay);
        delay.min(self.max_delay)
    }

    /// When the next attempt should run, or `None` once attempts are exhausted.
    pub fn next_attempt_at(
        &self,
        failed_attempt: u32,
        now: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        if failed_attempt >= self.max_attempts {
            return None;
        }
        let delay = chrono::Duration::from_std(self.backoff(failed_attempt))
            .unwrap_or_else(|_| chrono::Duration::zero());
        Some(now + delay)
    }
}

impl From<RetryPolicyConfig> for RetryPolicy {
    fn from(config: RetryPolicyConfig) -> Self {
        Self::new(config.max_attempts, config.base_delay, config.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicyConfig::default().into()
    }
}
