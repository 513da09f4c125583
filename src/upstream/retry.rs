//! Retry budget and backoff for upstream attempts

use crate::config::UpstreamConfig;
use std::time::Duration;

/// Default maximum number of attempts per credential
pub const DEFAULT_MAX_RETRIES: usize = 3;
/// Default base backoff in milliseconds (doubles each retry)
pub const DEFAULT_RETRY_BACKOFF_MS: u64 = 100;
/// Maximum backoff duration in milliseconds (30 seconds)
///
/// Prevents infinite sleep from exponential overflow. With base=100ms:
/// - Attempt 9 would be 25.6 seconds (under cap)
/// - Attempt 10 would be 51.2 seconds (capped to 30s)
pub const MAX_BACKOFF_MS: u64 = 30_000;

/// How many times to try an upstream request and how long to wait between tries
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts (at least 1)
    max_retries: usize,
    /// Base backoff in milliseconds (doubles each retry)
    retry_backoff_ms: u64,
}

impl RetryPolicy {
    /// Create a new retry policy
    ///
    /// # Errors
    /// Returns an error if `max_retries` is 0 (at least 1 attempt is required)
    pub fn new(max_retries: usize, retry_backoff_ms: u64) -> Result<Self, &'static str> {
        if max_retries == 0 {
            return Err("max_retries must be at least 1");
        }
        Ok(Self {
            max_retries,
            retry_backoff_ms,
        })
    }

    pub fn from_config(config: &UpstreamConfig) -> Result<Self, &'static str> {
        Self::new(config.max_retries, config.retry_backoff_ms)
    }

    pub fn max_retries(&self) -> usize {
        self.max_retries
    }

    pub fn retry_backoff_ms(&self) -> u64 {
        self.retry_backoff_ms
    }

    /// Wait before the attempt following `attempt`
    pub fn backoff(&self, attempt: usize) -> Duration {
        Duration::from_millis(calculate_backoff(self, attempt))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            retry_backoff_ms: DEFAULT_RETRY_BACKOFF_MS,
        }
    }
}

/// Calculate exponential backoff with overflow protection
///
/// Returns the backoff duration in milliseconds for the given attempt number.
/// The formula is: `base * 2^(attempt-1)`, capped at [`MAX_BACKOFF_MS`].
///
/// # Examples
/// With base=100ms:
/// - Attempt 1: 100ms
/// - Attempt 2: 200ms
/// - Attempt 3: 400ms
/// - Attempt 10+: 30,000ms (capped)
pub fn calculate_backoff(policy: &RetryPolicy, attempt: usize) -> u64 {
    let exponent = (attempt as u32).saturating_sub(1);
    policy
        .retry_backoff_ms
        .saturating_mul(2_u64.saturating_pow(exponent))
        .min(MAX_BACKOFF_MS)
}
