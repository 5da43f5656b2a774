// ABOUTME: Retry policy for the connect step: bounded attempts, capped exponential backoff.
// ABOUTME: Only the connection is retried; commands are never re-run.

use std::time::Duration;

use crate::config::BackoffConfig;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Extra attempts after the first one.
    pub max_retries: u32,
    pub backoff: BackoffConfig,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, backoff: BackoffConfig) -> Self {
        Self {
            max_retries,
            backoff,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Delay to wait after failed attempt number `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let factor = self.backoff.multiplier.max(1).saturating_pow(exponent);
        self.backoff
            .initial
            .checked_mul(factor)
            .unwrap_or(self.backoff.max)
            .min(self.backoff.max)
    }
}
