//! Error types for stream consumption
//!
//! The taxonomy mirrors how far a failure reaches:
//! - [`StreamError::TableUnavailable`] and [`StreamError::StreamUnavailable`]
//!   abort the whole run.
//! - [`StreamError::ShardUnavailable`] ends a single poller.
//! - [`StreamError::FetchFailure`] is transient and retried on the same cursor.
//! - [`StreamError::FetchExhausted`] ends a single poller once its retry
//!   budget is spent.

use crate::common::resilience::RetriableErrorType;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error categories for metrics and alerting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Table could not be described, created or written
    Table,
    /// Stream could not be described
    Stream,
    /// A single shard could not be opened or drained
    Shard,
    /// Configuration errors (invalid settings)
    Configuration,
    /// Local I/O and (de)serialization
    Io,
    /// Other/unknown errors
    Other,
}

/// Why a batch fetch failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchFailureKind {
    /// The fetch did not resolve within the configured timeout
    Timeout,
    /// The request never produced a service response (dispatch, I/O)
    Transport,
    /// The service rejected the request
    Service,
    /// The service asked us to slow down
    Throttled,
    /// The service reports the cursor as expired or trimmed
    ExpiredCursor,
}

impl FetchFailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::Transport => "transport",
            Self::Service => "service",
            Self::Throttled => "throttled",
            Self::ExpiredCursor => "expired_cursor",
        }
    }
}

impl std::fmt::Display for FetchFailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stream consumption errors
#[derive(Error, Debug)]
pub enum StreamError {
    /// Table (or its stream reference) could not be resolved
    #[error("Table '{table}' unavailable: {reason}")]
    TableUnavailable { table: String, reason: String },

    /// Shard enumeration failed
    #[error("Stream '{stream}' unavailable: {reason}")]
    StreamUnavailable { stream: String, reason: String },

    /// A cursor could not be opened on a shard
    #[error("Shard '{shard}' unavailable: {reason}")]
    ShardUnavailable { shard: String, reason: String },

    /// A batch fetch failed
    #[error("Fetch failed ({kind}): {reason}")]
    FetchFailure {
        kind: FetchFailureKind,
        reason: String,
    },

    /// Retry budget spent on a shard
    #[error("Fetch on shard '{shard}' gave up after {attempts} consecutive failures: {last}")]
    FetchExhausted {
        shard: String,
        attempts: u32,
        last: String,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// YAML (de)serialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl StreamError {
    /// Create a table-unavailable error
    pub fn table_unavailable(table: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::TableUnavailable {
            table: table.into(),
            reason: reason.into(),
        }
    }

    /// Create a stream-unavailable error
    pub fn stream_unavailable(stream: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::StreamUnavailable {
            stream: stream.into(),
            reason: reason.into(),
        }
    }

    /// Create a shard-unavailable error
    pub fn shard_unavailable(shard: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ShardUnavailable {
            shard: shard.into(),
            reason: reason.into(),
        }
    }

    /// Create a fetch failure
    pub fn fetch(kind: FetchFailureKind, reason: impl Into<String>) -> Self {
        Self::FetchFailure {
            kind,
            reason: reason.into(),
        }
    }

    /// Create a fetch timeout failure
    pub fn fetch_timeout(reason: impl Into<String>) -> Self {
        Self::fetch(FetchFailureKind::Timeout, reason)
    }

    /// Create a transport-level fetch failure
    pub fn transport(reason: impl Into<String>) -> Self {
        Self::fetch(FetchFailureKind::Transport, reason)
    }

    /// Create a config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a generic error
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// Whether this error aborts the whole consumer run.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::TableUnavailable { .. } | Self::StreamUnavailable { .. } | Self::Config(_)
        )
    }

    /// Check if this error is retriable on the same cursor.
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::FetchFailure { .. })
    }

    /// The fetch failure kind, if this is a fetch failure.
    pub fn fetch_kind(&self) -> Option<FetchFailureKind> {
        match self {
            Self::FetchFailure { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// Get the retriable error type, if applicable.
    pub fn retriable_error_type(&self) -> Option<RetriableErrorType> {
        self.fetch_kind().map(RetriableErrorType::from)
    }

    /// Get the error category for metrics and alerting.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::TableUnavailable { .. } => ErrorCategory::Table,
            Self::StreamUnavailable { .. } => ErrorCategory::Stream,
            Self::ShardUnavailable { .. } => ErrorCategory::Shard,
            Self::FetchFailure { .. } => ErrorCategory::Shard,
            Self::FetchExhausted { .. } => ErrorCategory::Shard,
            Self::Config(_) => ErrorCategory::Configuration,
            Self::Yaml(_) | Self::Json(_) | Self::Io(_) => ErrorCategory::Io,
            Self::Other(_) => ErrorCategory::Other,
        }
    }

    /// Get a metric-safe error code.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::TableUnavailable { .. } => "table_unavailable",
            Self::StreamUnavailable { .. } => "stream_unavailable",
            Self::ShardUnavailable { .. } => "shard_unavailable",
            Self::FetchFailure { .. } => "fetch_failure",
            Self::FetchExhausted { .. } => "fetch_exhausted",
            Self::Config(_) => "config_error",
            Self::Yaml(_) => "yaml_error",
            Self::Json(_) => "json_error",
            Self::Io(_) => "io_error",
            Self::Other(_) => "unknown",
        }
    }
}

/// Result type for stream operations
pub type Result<T> = std::result::Result<T, StreamError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = StreamError::table_unavailable("orders", "ResourceNotFoundException");
        assert!(err.to_string().contains("orders"));
        assert!(err.to_string().contains("ResourceNotFoundException"));

        let err = StreamError::fetch_timeout("no response within 10s");
        assert!(err.to_string().contains("timeout"));
    }

    #[test]
    fn test_error_is_fatal() {
        assert!(StreamError::table_unavailable("t", "x").is_fatal());
        assert!(StreamError::stream_unavailable("arn", "x").is_fatal());
        assert!(StreamError::config("bad").is_fatal());

        assert!(!StreamError::shard_unavailable("shard-1", "x").is_fatal());
        assert!(!StreamError::transport("reset").is_fatal());
    }

    #[test]
    fn test_error_is_retriable() {
        assert!(StreamError::transport("connection reset").is_retriable());
        assert!(StreamError::fetch_timeout("10s").is_retriable());
        assert!(StreamError::fetch(FetchFailureKind::Throttled, "slow down").is_retriable());

        assert!(!StreamError::shard_unavailable("shard-1", "expired").is_retriable());
        assert!(!StreamError::table_unavailable("t", "x").is_retriable());
    }

    #[test]
    fn test_error_category() {
        assert_eq!(
            StreamError::table_unavailable("t", "x").category(),
            ErrorCategory::Table
        );
        assert_eq!(
            StreamError::stream_unavailable("s", "x").category(),
            ErrorCategory::Stream
        );
        assert_eq!(
            StreamError::shard_unavailable("s", "x").category(),
            ErrorCategory::Shard
        );
        assert_eq!(
            StreamError::config("x").category(),
            ErrorCategory::Configuration
        );
        assert_eq!(StreamError::other("x").category(), ErrorCategory::Other);
    }

    #[test]
    fn test_error_retriable_type() {
        assert_eq!(
            StreamError::fetch_timeout("x").retriable_error_type(),
            Some(RetriableErrorType::Timeout)
        );
        assert_eq!(
            StreamError::fetch(FetchFailureKind::ExpiredCursor, "x").retriable_error_type(),
            Some(RetriableErrorType::ExpiredCursor)
        );
        assert_eq!(StreamError::config("x").retriable_error_type(), None);
    }

    #[test]
    fn test_error_code() {
        assert_eq!(
            StreamError::shard_unavailable("s", "x").error_code(),
            "shard_unavailable"
        );
        assert_eq!(StreamError::transport("x").error_code(), "fetch_failure");
        assert_eq!(StreamError::config("x").error_code(), "config_error");
    }
}
