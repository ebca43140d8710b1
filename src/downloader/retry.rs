//! Retry decisions for candidate fetches.

use std::time::Duration;

use crate::config::RetryPolicy;
use crate::error::DownloadError;

impl RetryPolicy {
    /// Backoff before attempt `attempt + 1`, doubling from `base_delay` and capped at `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }

    /// Delay before retrying after `attempt` failed with `error`, or `None` to give up.
    pub fn next_delay(&self, attempt: u32, error: &DownloadError) -> Option<Duration> {
        if attempt >= self.max_attempts || !error.is_retryable() {
            return None;
        }
        Some(self.delay_for(attempt))
    }
}
