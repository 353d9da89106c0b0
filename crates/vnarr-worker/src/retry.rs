//! Retry policy with exponential backoff.
//!
//! Decides whether a classified step failure is re-attempted in place and
//! how long to wait first.

use std::time::Duration;

use vnarr_models::ErrorCategory;

use crate::classifier::ErrorClassification;
use crate::config::WorkerConfig;

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Attempts per step, including the first.
    pub max_attempts: u32,
    /// Attempts for system (storage/filesystem) failures.
    pub system_max_attempts: u32,
    /// Base delay for exponential backoff (doubles each attempt).
    pub base_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            system_max_attempts: 2,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &WorkerConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            system_max_attempts: config.system_max_attempts.max(1),
            base_delay: config.retry_base_delay,
            max_delay: config.retry_max_delay,
        }
    }

    /// Set the maximum number of attempts.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Set the base delay for exponential backoff.
    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    /// Whether a failure on attempt `attempt` (1-based) gets another try.
    pub fn should_retry(&self, classification: &ErrorClassification, attempt: u32) -> bool {
        if !classification.is_retryable {
            return false;
        }
        let limit = match classification.category {
            ErrorCategory::System => self.system_max_attempts.min(self.max_attempts),
            _ => self.max_attempts,
        };
        attempt < limit
    }

    /// Delay before the attempt following `attempt`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let delay = self.base_delay.saturating_mul(2u32.pow(exponent));
        delay.min(self.max_delay)
    }
}
