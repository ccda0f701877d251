//! Configuration for dynastream
//!
//! Loaded from YAML with `${VAR}` / `${VAR:-default}` environment expansion.
//! Every field has a default aimed at a local DynamoDB on port 8000, so an
//! empty file (or none at all) is a valid configuration.
//!
//! ```yaml
//! endpoint_url: http://localhost:8000
//! region: us-west-2
//! access_key: local
//! secret_key: ${DYNASTREAM_SECRET_KEY:-local}
//! table_name: sampleStreamedTable
//!
//! poller:
//!   max_batch_size: 100
//!   fetch_timeout_ms: 10000
//!   empty_poll_interval_ms: 0
//!   retry:
//!     max_retries: -1
//!     initial_delay_ms: 100
//!     max_delay_ms: 10000
//!
//! consumer:
//!   scheduling: concurrent
//!   channel_capacity: 1024
//!
//! table:
//!   key_name: sampleKey
//!   stream_view_type: KEYS_ONLY
//! ```

use crate::common::{Result, RetryConfig, StreamError, StreamViewType};
use crate::stream::{ConsumerSettings, PollerSettings, Scheduling, MAX_BATCH_LIMIT};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::LazyLock;
use std::time::Duration;

/// Pre-compiled regex for environment variable expansion
/// Pattern: ${VAR} or ${VAR:-default}
static ENV_VAR_REGEX: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"\$\{([a-zA-Z_][a-zA-Z0-9_]*)(?::-([^}]*))?\}")
        .expect("env var regex pattern is invalid - this is a bug")
});

// ============================================================================
// Sensitive values
// ============================================================================

/// A string that never shows up in logs or serialized config.
#[derive(Clone)]
pub struct SensitiveString(SecretString);

impl SensitiveString {
    pub fn new(value: impl Into<String>) -> Self {
        Self(SecretString::new(value.into().into_boxed_str()))
    }

    /// Expose the secret value.
    ///
    /// Only for handing credentials to the SDK.
    pub fn expose_secret(&self) -> &str {
        self.0.expose_secret()
    }
}

impl std::fmt::Debug for SensitiveString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl std::fmt::Display for SensitiveString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl From<&str> for SensitiveString {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for SensitiveString {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl Serialize for SensitiveString {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str("***REDACTED***")
    }
}

impl<'de> Deserialize<'de> for SensitiveString {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        Ok(Self::new(value))
    }
}

// ============================================================================
// Root configuration
// ============================================================================

/// Root configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct DynastreamConfig {
    /// Service endpoint; `None` uses the regional AWS endpoint
    #[serde(default = "default_endpoint_url", alias = "endpointUrl")]
    pub endpoint_url: Option<String>,

    #[serde(default = "default_region")]
    pub region: String,

    #[serde(default = "default_access_key", alias = "accessKey")]
    pub access_key: String,

    #[serde(default = "default_secret_key", alias = "secretKey")]
    pub secret_key: SensitiveString,

    /// Table whose stream is consumed
    #[serde(default = "default_table_name", alias = "tableName")]
    pub table_name: String,

    #[serde(default)]
    pub poller: PollerConfig,

    #[serde(default)]
    pub consumer: ConsumerConfig,

    /// Used when creating tables
    #[serde(default)]
    pub table: TableConfig,
}

fn default_endpoint_url() -> Option<String> {
    Some("http://localhost:8000".to_string())
}

fn default_region() -> String {
    "us-west-2".to_string()
}

fn default_access_key() -> String {
    "local".to_string()
}

fn default_secret_key() -> SensitiveString {
    SensitiveString::new("local")
}

fn default_table_name() -> String {
    "sampleStreamedTable".to_string()
}

impl Default for DynastreamConfig {
    fn default() -> Self {
        Self {
            endpoint_url: default_endpoint_url(),
            region: default_region(),
            access_key: default_access_key(),
            secret_key: default_secret_key(),
            table_name: default_table_name(),
            poller: PollerConfig::default(),
            consumer: ConsumerConfig::default(),
            table: TableConfig::default(),
        }
    }
}

/// Shard poller configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct PollerConfig {
    /// Records requested per fetch (1..=1000)
    #[serde(default = "default_max_batch_size", alias = "maxBatchSize")]
    pub max_batch_size: i32,

    #[serde(default = "default_fetch_timeout_ms", alias = "fetchTimeoutMs")]
    pub fetch_timeout_ms: u64,

    /// Pause after an empty fetch on an open shard; 0 polls again at once
    #[serde(default, alias = "emptyPollIntervalMs")]
    pub empty_poll_interval_ms: u64,

    #[serde(default)]
    pub retry: RetrySettings,
}

fn default_max_batch_size() -> i32 {
    100
}

fn default_fetch_timeout_ms() -> u64 {
    10_000
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            max_batch_size: default_max_batch_size(),
            fetch_timeout_ms: default_fetch_timeout_ms(),
            empty_poll_interval_ms: 0,
            retry: RetrySettings::default(),
        }
    }
}

/// Fetch retry configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RetrySettings {
    /// -1 = retry forever, 0 = never retry
    #[serde(default = "default_max_retries")]
    pub max_retries: i32,

    /// 0 retries immediately
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

fn default_max_retries() -> i32 {
    -1
}

fn default_initial_delay_ms() -> u64 {
    100
}

fn default_max_delay_ms() -> u64 {
    10_000
}

fn default_jitter() -> f64 {
    0.25
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter: default_jitter(),
        }
    }
}

impl RetrySettings {
    pub fn to_retry_config(&self) -> RetryConfig {
        RetryConfig::builder()
            .max_retries(self.max_retries)
            .retry_delay(Duration::from_millis(self.initial_delay_ms))
            .max_delay(Duration::from_millis(self.max_delay_ms))
            .jitter(self.jitter)
            .build()
    }
}

/// Stream consumer configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ConsumerConfig {
    #[serde(default)]
    pub scheduling: Scheduling,

    #[serde(default = "default_channel_capacity", alias = "channelCapacity")]
    pub channel_capacity: usize,
}

fn default_channel_capacity() -> usize {
    1024
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            scheduling: Scheduling::default(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

/// Table creation settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct TableConfig {
    /// Name of the string hash key
    #[serde(default = "default_key_name", alias = "keyName")]
    pub key_name: String,

    #[serde(default, alias = "streamViewType")]
    pub stream_view_type: StreamViewType,

    #[serde(default = "default_capacity_units", alias = "readCapacityUnits")]
    pub read_capacity_units: i64,

    #[serde(default = "default_capacity_units", alias = "writeCapacityUnits")]
    pub write_capacity_units: i64,
}

fn default_key_name() -> String {
    "sampleKey".to_string()
}

fn default_capacity_units() -> i64 {
    5
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            key_name: default_key_name(),
            stream_view_type: StreamViewType::default(),
            read_capacity_units: default_capacity_units(),
            write_capacity_units: default_capacity_units(),
        }
    }
}

impl DynastreamConfig {
    /// Load configuration from a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config = Self::from_yaml(&content)?;
        Ok(config)
    }

    /// Parse and validate configuration from YAML text
    pub fn from_yaml(content: &str) -> Result<Self> {
        let expanded = Self::expand_env_vars(content);
        let config: Self = if expanded.trim().is_empty() {
            Self::default()
        } else {
            serde_yaml::from_str(&expanded)?
        };

        config.validate()?;
        Ok(config)
    }

    /// Expand environment variables in the format ${VAR} or ${VAR:-default}
    fn expand_env_vars(content: &str) -> String {
        ENV_VAR_REGEX
            .replace_all(content, |caps: &regex::Captures| {
                let var_name = &caps[1];
                let default = caps.get(2).map(|m| m.as_str());

                std::env::var(var_name).unwrap_or_else(|_| default.unwrap_or("").to_string())
            })
            .to_string()
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.table_name.trim().is_empty() {
            return Err(StreamError::config("table_name must not be empty"));
        }
        if self.region.trim().is_empty() {
            return Err(StreamError::config("region must not be empty"));
        }
        if let Some(endpoint) = &self.endpoint_url {
            if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
                return Err(StreamError::config(format!(
                    "endpoint_url must be an http(s) URL, got '{}'",
                    endpoint
                )));
            }
        }
        if !(1..=MAX_BATCH_LIMIT).contains(&self.poller.max_batch_size) {
            return Err(StreamError::config(format!(
                "poller.max_batch_size must be between 1 and {}",
                MAX_BATCH_LIMIT
            )));
        }
        if self.poller.fetch_timeout_ms == 0 {
            return Err(StreamError::config("poller.fetch_timeout_ms must be greater than zero"));
        }
        if self.poller.retry.max_retries < -1 {
            return Err(StreamError::config("poller.retry.max_retries must be -1 or greater"));
        }
        if !(0.0..=1.0).contains(&self.poller.retry.jitter) {
            return Err(StreamError::config("poller.retry.jitter must be between 0.0 and 1.0"));
        }
        if self.consumer.channel_capacity == 0 {
            return Err(StreamError::config("consumer.channel_capacity must be greater than zero"));
        }
        if self.table.key_name.trim().is_empty() {
            return Err(StreamError::config("table.key_name must not be empty"));
        }
        if self.table.read_capacity_units < 1 || self.table.write_capacity_units < 1 {
            return Err(StreamError::config("table capacity units must be at least 1"));
        }
        Ok(())
    }

    pub fn poller_settings(&self) -> PollerSettings {
        PollerSettings::builder()
            .max_batch_size(self.poller.max_batch_size)
            .fetch_timeout(Duration::from_millis(self.poller.fetch_timeout_ms))
            .empty_poll_interval(Duration::from_millis(self.poller.empty_poll_interval_ms))
            .retry(self.poller.retry.to_retry_config())
            .build()
    }

    pub fn consumer_settings(&self) -> ConsumerSettings {
        ConsumerSettings {
            scheduling: self.consumer.scheduling,
            channel_capacity: self.consumer.channel_capacity,
            poller: self.poller_settings(),
        }
    }
}
