//! Retry policy for shard fetches
//!
//! A failed fetch never advances the cursor. What this module decides is how
//! long to wait before retrying that same cursor, and when a shard's budget of
//! consecutive failures is spent.

use crate::common::error::FetchFailureKind;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

/// Fetch failure types that can be automatically retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetriableErrorType {
    /// Fetch did not resolve within its timeout
    Timeout,
    /// Request never reached the service or the response was lost
    Transport,
    /// Service-side failure
    Service,
    /// Provisioned throughput exceeded / request rate too high
    Throttled,
    /// Cursor expired or points at trimmed data
    ExpiredCursor,
}

impl RetriableErrorType {
    /// Get all default retriable error types.
    ///
    /// Transient failures are retried. An expired cursor never becomes valid
    /// again, so it is not.
    pub fn defaults() -> HashSet<Self> {
        [
            Self::Timeout,
            Self::Transport,
            Self::Service,
            Self::Throttled,
        ]
        .into_iter()
        .collect()
    }
}

impl From<FetchFailureKind> for RetriableErrorType {
    fn from(kind: FetchFailureKind) -> Self {
        match kind {
            FetchFailureKind::Timeout => Self::Timeout,
            FetchFailureKind::Transport => Self::Transport,
            FetchFailureKind::Service => Self::Service,
            FetchFailureKind::Throttled => Self::Throttled,
            FetchFailureKind::ExpiredCursor => Self::ExpiredCursor,
        }
    }
}

/// Configuration for fetch retry behavior.
///
/// # Example
///
/// ```rust
/// use dynastream::common::{RetryConfig, RetriableErrorType};
/// use std::time::Duration;
///
/// let config = RetryConfig::builder()
///     .max_retries(10)
///     .retry_delay(Duration::from_millis(200))
///     .max_delay(Duration::from_secs(30))
///     .jitter(0.25)
///     .build();
///
/// assert_eq!(config.max_retries(), 10);
/// assert!(config.is_retriable(&RetriableErrorType::Throttled));
/// ```
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum consecutive retries of one cursor.
    /// - `-1` = infinite retries
    /// - `0` = retries disabled
    /// - `n` = retry up to n times
    max_retries: i32,
    /// Base delay between retries (before exponential backoff).
    retry_delay: Duration,
    /// Maximum delay cap.
    max_delay: Duration,
    /// Jitter factor (0.0 - 1.0) to spread retries of sibling shards.
    jitter: f64,
    /// Failure types considered retriable.
    retriable_errors: HashSet<RetriableErrorType>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: -1,
            retry_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            jitter: 0.25,
            retriable_errors: RetriableErrorType::defaults(),
        }
    }
}

impl RetryConfig {
    /// Create a builder for RetryConfig.
    pub fn builder() -> RetryConfigBuilder {
        RetryConfigBuilder::default()
    }

    /// Create a disabled retry config (first failure ends the shard).
    pub fn disabled() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Create an infinite retry config with backoff.
    pub fn infinite() -> Self {
        Self {
            max_retries: -1,
            ..Default::default()
        }
    }

    /// Retry forever without waiting between attempts.
    pub fn immediate() -> Self {
        Self {
            max_retries: -1,
            retry_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter: 0.0,
            retriable_errors: RetriableErrorType::defaults(),
        }
    }

    /// Get maximum retries (-1 = infinite, 0 = disabled).
    pub fn max_retries(&self) -> i32 {
        self.max_retries
    }

    /// Get base retry delay.
    pub fn retry_delay(&self) -> Duration {
        self.retry_delay
    }

    /// Get maximum delay cap.
    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    /// Get jitter factor.
    pub fn jitter(&self) -> f64 {
        self.jitter
    }

    /// Check if retries are enabled.
    pub fn is_enabled(&self) -> bool {
        self.max_retries != 0
    }

    /// Check if infinite retries are configured.
    pub fn is_infinite(&self) -> bool {
        self.max_retries < 0
    }

    /// Check if an error type is retriable.
    pub fn is_retriable(&self, error_type: &RetriableErrorType) -> bool {
        self.retriable_errors.contains(error_type)
    }

    /// Check if we should retry given the number of retries already made.
    pub fn should_retry(&self, attempt: u32) -> bool {
        if self.max_retries < 0 {
            true
        } else if self.max_retries == 0 {
            false
        } else {
            attempt < self.max_retries as u32
        }
    }

    /// Calculate delay for a given attempt (with exponential backoff and jitter).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if self.retry_delay.is_zero() {
            return Duration::ZERO;
        }

        let base = self
            .retry_delay
            .saturating_mul(2u32.saturating_pow(attempt));
        let capped = base.min(self.max_delay);

        if self.jitter > 0.0 {
            let jitter_range = capped.as_secs_f64() * self.jitter;
            // Deterministic spread based on the attempt number (golden ratio)
            let jitter_offset = (attempt as f64 * 0.618033988749895) % 1.0;
            let jitter_amount = jitter_range * (jitter_offset * 2.0 - 1.0);
            let adjusted = capped.as_secs_f64() + jitter_amount;
            Duration::from_secs_f64(adjusted.max(0.0))
        } else {
            capped
        }
    }
}

/// Builder for RetryConfig.
#[derive(Debug, Clone, Default)]
pub struct RetryConfigBuilder {
    max_retries: Option<i32>,
    retry_delay: Option<Duration>,
    max_delay: Option<Duration>,
    jitter: Option<f64>,
    retriable_errors: Option<HashSet<RetriableErrorType>>,
}

impl RetryConfigBuilder {
    /// Set maximum retry attempts (-1 = infinite).
    pub fn max_retries(mut self, value: i32) -> Self {
        self.max_retries = Some(value);
        self
    }

    /// Set base retry delay.
    pub fn retry_delay(mut self, value: Duration) -> Self {
        self.retry_delay = Some(value);
        self
    }

    /// Set maximum delay cap.
    pub fn max_delay(mut self, value: Duration) -> Self {
        self.max_delay = Some(value);
        self
    }

    /// Set jitter factor (0.0 - 1.0).
    pub fn jitter(mut self, value: f64) -> Self {
        self.jitter = Some(value.clamp(0.0, 1.0));
        self
    }

    /// Set retriable error types.
    pub fn retriable_errors(mut self, errors: HashSet<RetriableErrorType>) -> Self {
        self.retriable_errors = Some(errors);
        self
    }

    /// Remove a retriable error type.
    pub fn without_retriable_error(mut self, error: RetriableErrorType) -> Self {
        self.retriable_errors
            .get_or_insert_with(RetriableErrorType::defaults)
            .remove(&error);
        self
    }

    /// Build the RetryConfig.
    pub fn build(self) -> RetryConfig {
        let defaults = RetryConfig::default();
        RetryConfig {
            max_retries: self.max_retries.unwrap_or(defaults.max_retries),
            retry_delay: self.retry_delay.unwrap_or(defaults.retry_delay),
            max_delay: self.max_delay.unwrap_or(defaults.max_delay),
            jitter: self.jitter.unwrap_or(defaults.jitter),
            retriable_errors: self.retriable_errors.unwrap_or(defaults.retriable_errors),
        }
    }
}
