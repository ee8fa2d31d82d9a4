//! Retry policy for broker stream reads.
//!
//! Only transient interrupted reads are retried, a fixed number of times
//! with a fixed delay; every other error propagates immediately. The loop
//! itself lives at the read site ([`crate::RemoteProcess::next_event`]);
//! this module pins down the knobs.

use std::time::Duration;

/// Bounded fixed-delay retry configuration.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first.
    pub max_attempts: u32,
    /// Fixed delay between attempts.
    pub delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_millis(500),
        }
    }
}

impl RetryConfig {
    /// Config that gives up after the first failure.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            delay: Duration::ZERO,
        }
    }
}
