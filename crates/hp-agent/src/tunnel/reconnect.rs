//! Exponential backoff for reconnection

use std::time::Duration;

use hp_core::config::BackoffConfig;

/// Capped exponential backoff: `min(base * 2^attempt, max)`
///
/// The attempt counter only ever grows. A session that served for a while
/// before failing does not earn a shorter delay.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    /// Delay for attempt 0
    base: Duration,
    /// Maximum delay
    max: Duration,
    /// Number of delays handed out so far
    attempt: u32,
}

impl ExponentialBackoff {
    /// Create a new backoff from configuration
    pub fn from_config(config: &BackoffConfig) -> Self {
        Self::new(config.initial, config.max)
    }

    /// Create a new backoff with custom parameters
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            attempt: 0,
        }
    }

    /// Delay for the given attempt number, without advancing
    pub fn delay_for(&self, attempt: u32) -> Duration {
        1u32.checked_shl(attempt)
            .and_then(|factor| self.base.checked_mul(factor))
            .map_or(self.max, |delay| delay.min(self.max))
    }

    /// Get the next delay and advance the backoff
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.delay_for(self.attempt);
        self.attempt = self.attempt.saturating_add(1);
        delay
    }

    /// Number of delays handed out so far
    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}
