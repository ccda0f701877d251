//! # Shard Poller
//!
//! Drives one shard from its LATEST position until the shard closes.
//!
//! ## Loop
//!
//! ```text
//! open(LATEST) ──fail──▶ OpenFailed
//!     │
//!     ▼
//! ┌─▶ cancelled? ──yes──▶ Cancelled (cursor kept)
//! │   │
//! │   ▼
//! │  fetch(cursor, limit) within timeout
//! │   ├── ok: deliver records in order
//! │   │       next cursor? ──none──▶ Closed
//! │   │       cursor := next
//! │   └── err: same cursor, backoff
//! │            budget spent ──▶ Exhausted
//! └───┘
//! ```
//!
//! Fetches on one shard are strictly sequential: the next fetch starts only
//! after the current one has resolved, and a failed or timed-out fetch leaves
//! the cursor byte-for-byte untouched.

use crate::common::{
    ChangeRecord, Cursor, PollerMetrics, PollerMetricsSnapshot, RetriableErrorType, RetryConfig,
    Shard, StreamError, StreamGateway, StreamRef, TableRef,
};
use crate::stream::cursor::CursorOpener;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

/// Largest batch the stream service accepts per fetch.
pub const MAX_BATCH_LIMIT: i32 = 1000;

// ============================================================================
// Settings
// ============================================================================

/// Shard poller settings.
#[derive(Debug, Clone)]
pub struct PollerSettings {
    /// Records requested per fetch
    pub max_batch_size: i32,
    /// Upper bound on one fetch call
    pub fetch_timeout: Duration,
    /// Pause after a fetch on an open shard returned no records; zero polls again at once
    pub empty_poll_interval: Duration,
    /// Behaviour after a failed fetch
    pub retry: RetryConfig,
}

impl Default for PollerSettings {
    fn default() -> Self {
        Self {
            max_batch_size: 100,
            fetch_timeout: Duration::from_secs(10),
            empty_poll_interval: Duration::ZERO,
            retry: RetryConfig::default(),
        }
    }
}

impl PollerSettings {
    pub fn builder() -> PollerSettingsBuilder {
        PollerSettingsBuilder::default()
    }

    pub fn validate(&self) -> crate::common::Result<()> {
        if !(1..=MAX_BATCH_LIMIT).contains(&self.max_batch_size) {
            return Err(StreamError::config(format!(
                "max_batch_size must be between 1 and {}, got {}",
                MAX_BATCH_LIMIT, self.max_batch_size
            )));
        }
        if self.fetch_timeout.is_zero() {
            return Err(StreamError::config("fetch_timeout must be greater than zero"));
        }
        Ok(())
    }
}

/// Builder for [`PollerSettings`].
#[derive(Debug, Default)]
pub struct PollerSettingsBuilder {
    settings: PollerSettings,
}

impl PollerSettingsBuilder {
    pub fn max_batch_size(mut self, size: i32) -> Self {
        self.settings.max_batch_size = size;
        self
    }

    pub fn fetch_timeout(mut self, timeout: Duration) -> Self {
        self.settings.fetch_timeout = timeout;
        self
    }

    pub fn empty_poll_interval(mut self, interval: Duration) -> Self {
        self.settings.empty_poll_interval = interval;
        self
    }

    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.settings.retry = retry;
        self
    }

    pub fn build(self) -> PollerSettings {
        self.settings
    }
}

// ============================================================================
// Outcome
// ============================================================================

/// Terminal state of a shard poller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShardState {
    /// The shard closed and every record was delivered
    Closed,
    /// No cursor could be obtained for the shard
    OpenFailed,
    /// Stopped on request, or because the sink went away
    Cancelled,
    /// The fetch retry budget ran out
    Exhausted,
    /// The poller task panicked
    Aborted,
}

impl ShardState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::OpenFailed => "open_failed",
            Self::Cancelled => "cancelled",
            Self::Exhausted => "exhausted",
            Self::Aborted => "aborted",
        }
    }

    /// Whether the shard ended because of an error.
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::OpenFailed | Self::Exhausted | Self::Aborted)
    }
}

impl std::fmt::Display for ShardState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a shard poller did before it stopped.
#[derive(Debug)]
pub struct ShardOutcome {
    pub shard_id: String,
    pub state: ShardState,
    /// Cursor the poller still held; `None` once the shard is drained or was never opened.
    ///
    /// This is the cursor of the last batch that was fetched, not the position
    /// after it. When the sink goes away partway through a batch, records of
    /// that batch already handed over are read again by anyone resuming here.
    pub final_cursor: Option<Cursor>,
    /// Error that ended the shard, if any
    pub error: Option<StreamError>,
    pub metrics: PollerMetricsSnapshot,
}

impl ShardOutcome {
    pub fn records_delivered(&self) -> u64 {
        self.metrics.records_delivered
    }

    pub fn fetch_attempts(&self) -> u64 {
        self.metrics.fetches
    }

    pub fn failed_fetches(&self) -> u64 {
        self.metrics.failed_fetches
    }

    pub(crate) fn aborted(shard_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            shard_id: shard_id.into(),
            state: ShardState::Aborted,
            final_cursor: None,
            error: Some(StreamError::other(reason)),
            metrics: PollerMetricsSnapshot::default(),
        }
    }
}

// ============================================================================
// Poller
// ============================================================================

/// Polls a single shard.
///
/// A poller is consumed by [`ShardPoller::run`]; its cursor is never shared.
pub struct ShardPoller {
    gateway: Arc<dyn StreamGateway>,
    opener: CursorOpener,
    table: Option<TableRef>,
    stream: StreamRef,
    shard: Shard,
    settings: PollerSettings,
    metrics: Arc<PollerMetrics>,
    cancel: CancellationToken,
}

impl ShardPoller {
    pub fn new(
        gateway: Arc<dyn StreamGateway>,
        stream: StreamRef,
        shard: Shard,
        settings: PollerSettings,
    ) -> Self {
        Self {
            opener: CursorOpener::new(gateway.clone()),
            gateway,
            table: None,
            stream,
            metrics: PollerMetrics::new(shard.shard_id.clone()),
            shard,
            settings,
            cancel: CancellationToken::new(),
        }
    }

    /// Attach the table name to log output.
    pub fn with_table(mut self, table: TableRef) -> Self {
        self.table = Some(table);
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Live counters of this poller.
    pub fn metrics(&self) -> Arc<PollerMetrics> {
        self.metrics.clone()
    }

    pub fn shard_id(&self) -> &str {
        &self.shard.shard_id
    }

    /// Poll the shard to a terminal state, sending each record to `tx`.
    pub async fn run(self, tx: mpsc::Sender<ChangeRecord>) -> ShardOutcome {
        let table = self.table.as_ref().map(TableRef::as_str).unwrap_or("-");
        let shard_id = self.shard.shard_id.as_str();

        let opened = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                return self.finish(ShardState::Cancelled, None, None);
            }
            opened = self.opener.open(&self.stream, shard_id) => opened,
        };

        let mut cursor = match opened {
            Ok(cursor) => cursor,
            Err(e) => {
                warn!(
                    table,
                    stream = %self.stream,
                    shard = shard_id,
                    error = %e,
                    "Could not open shard"
                );
                return self.finish(ShardState::OpenFailed, None, Some(e));
            }
        };

        info!(table, stream = %self.stream, shard = shard_id, "Polling shard");

        let retry = &self.settings.retry;
        let mut failures: u32 = 0;

        loop {
            if self.cancel.is_cancelled() {
                info!(table, shard = shard_id, cursor = %cursor, "Shard polling cancelled");
                return self.finish(ShardState::Cancelled, Some(cursor), None);
            }

            let started = Instant::now();
            let fetched = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    info!(table, shard = shard_id, cursor = %cursor, "Shard polling cancelled during fetch");
                    return self.finish(ShardState::Cancelled, Some(cursor), None);
                }
                fetched = tokio::time::timeout(
                    self.settings.fetch_timeout,
                    self.gateway.get_records(&cursor, self.settings.max_batch_size),
                ) => fetched,
            };
            let fetched = fetched.unwrap_or_else(|_| {
                Err(StreamError::fetch_timeout(format!(
                    "no response within {:?}",
                    self.settings.fetch_timeout
                )))
            });

            match fetched {
                Ok(batch) => {
                    failures = 0;
                    self.metrics
                        .record_fetch_ok(started.elapsed(), batch.records.len());

                    let empty = batch.records.is_empty();
                    if empty {
                        trace!(shard = shard_id, cursor = %cursor, "Empty fetch");
                    } else {
                        debug!(
                            table,
                            shard = shard_id,
                            records = batch.records.len(),
                            "Fetched batch"
                        );
                    }

                    for mut record in batch.records {
                        record.shard_id.clone_from(&self.shard.shard_id);
                        if tx.send(record).await.is_err() {
                            warn!(table, shard = shard_id, "Record sink closed, stopping shard");
                            return self.finish(ShardState::Cancelled, Some(cursor), None);
                        }
                        self.metrics.record_delivered();
                    }

                    match batch.next_cursor {
                        Some(next) => cursor = next,
                        None => {
                            info!(
                                table,
                                stream = %self.stream,
                                shard = shard_id,
                                records = self.metrics.snapshot().records_delivered,
                                "Shard closed"
                            );
                            return self.finish(ShardState::Closed, None, None);
                        }
                    }

                    let pause = self.settings.empty_poll_interval;
                    if empty && !pause.is_zero() {
                        tokio::select! {
                            biased;
                            _ = self.cancel.cancelled() => {
                                return self.finish(ShardState::Cancelled, Some(cursor), None);
                            }
                            _ = tokio::time::sleep(pause) => {}
                        }
                    }
                }
                Err(e) => {
                    self.metrics.record_fetch_failed();
                    failures += 1;

                    let error_type = e
                        .retriable_error_type()
                        .unwrap_or(RetriableErrorType::Service);
                    let retriable = retry.is_retriable(&error_type);

                    if !retriable || !retry.should_retry(failures - 1) {
                        error!(
                            table,
                            stream = %self.stream,
                            shard = shard_id,
                            cursor = %cursor,
                            attempt = failures,
                            error = %e,
                            "Giving up on shard"
                        );
                        let exhausted = StreamError::FetchExhausted {
                            shard: shard_id.to_string(),
                            attempts: failures,
                            last: e.to_string(),
                        };
                        return self.finish(ShardState::Exhausted, Some(cursor), Some(exhausted));
                    }

                    let delay = retry.delay_for_attempt(failures - 1);
                    warn!(
                        table,
                        stream = %self.stream,
                        shard = shard_id,
                        cursor = %cursor,
                        attempt = failures,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Fetch failed, retrying same cursor"
                    );

                    if delay.is_zero() {
                        // Keep sibling tasks scheduled
                        tokio::task::yield_now().await;
                    } else {
                        tokio::select! {
                            biased;
                            _ = self.cancel.cancelled() => {
                                return self.finish(ShardState::Cancelled, Some(cursor), None);
                            }
                            _ = tokio::time::sleep(delay) => {}
                        }
                    }
                }
            }
        }
    }

    fn finish(
        &self,
        state: ShardState,
        final_cursor: Option<Cursor>,
        error: Option<StreamError>,
    ) -> ShardOutcome {
        ShardOutcome {
            shard_id: self.shard.shard_id.clone(),
            state,
            final_cursor,
            error,
            metrics: self.metrics.snapshot(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{AttributeValue, FetchFailureKind, Item};
    use crate::memory::MemoryStreamService;

    fn settings() -> PollerSettings {
        PollerSettings::builder()
            .retry(RetryConfig::immediate())
            .build()
    }

    #[test]
    fn test_settings_validation() {
        assert!(PollerSettings::default().validate().is_ok());
        assert!(PollerSettings::builder()
            .max_batch_size(0)
            .build()
            .validate()
            .is_err());
        assert!(PollerSettings::builder()
            .max_batch_size(1001)
            .build()
            .validate()
            .is_err());
        assert!(PollerSettings::builder()
            .fetch_timeout(Duration::ZERO)
            .build()
            .validate()
            .is_err());
    }

    #[test]
    fn test_shard_state() {
        assert!(ShardState::Exhausted.is_failure());
        assert!(ShardState::OpenFailed.is_failure());
        assert!(!ShardState::Closed.is_failure());
        assert!(!ShardState::Cancelled.is_failure());
        assert_eq!(ShardState::OpenFailed.to_string(), "open_failed");
    }

    #[tokio::test]
    async fn test_open_failure_ends_in_open_failed() {
        let service = Arc::new(MemoryStreamService::new());
        let stream = service.create_stream("T", &["s1"]);
        service.fail_open("s1");

        let (tx, _rx) = mpsc::channel(8);
        let outcome = ShardPoller::new(service.clone(), stream, Shard::new("s1"), settings())
            .run(tx)
            .await;

        assert_eq!(outcome.state, ShardState::OpenFailed);
        assert!(outcome.final_cursor.is_none());
        assert_eq!(outcome.fetch_attempts(), 0);
        assert!(matches!(outcome.error, Some(StreamError::ShardUnavailable { .. })));
    }

    #[tokio::test]
    async fn test_closed_shard_drains_then_stops() {
        let service = Arc::new(MemoryStreamService::new());
        let stream = service.create_stream("T", &["s1"]);

        let (tx, mut rx) = mpsc::channel(8);
        let poller = ShardPoller::new(service.clone(), stream, Shard::new("s1"), settings());
        let handle = tokio::spawn(poller.run(tx));

        service.wait_for_open("s1").await;
        service
            .write_item("T", Item::from([("k".to_string(), "1".into())]))
            .unwrap();
        service.close_shard("s1");

        let outcome = handle.await.unwrap();
        assert_eq!(outcome.state, ShardState::Closed);
        assert!(outcome.final_cursor.is_none());
        assert_eq!(rx.recv().await.unwrap().key("k").and_then(|v| v.as_s()), Some("1"));

        let fetches = service.fetch_log().len();
        tokio::task::yield_now().await;
        assert_eq!(service.fetch_log().len(), fetches);
    }

    #[tokio::test]
    async fn test_disabled_retry_exhausts_on_first_failure() {
        let service = Arc::new(MemoryStreamService::new());
        let stream = service.create_stream("T", &["s1"]);
        service.fail_next_fetches("s1", 1, FetchFailureKind::Service);

        let (tx, _rx) = mpsc::channel(8);
        let outcome = ShardPoller::new(
            service.clone(),
            stream,
            Shard::new("s1"),
            PollerSettings::builder().retry(RetryConfig::disabled()).build(),
        )
        .run(tx)
        .await;

        assert_eq!(outcome.state, ShardState::Exhausted);
        assert_eq!(outcome.failed_fetches(), 1);
        assert!(outcome.final_cursor.is_some());
        assert!(matches!(
            outcome.error,
            Some(StreamError::FetchExhausted { attempts: 1, .. })
        ));
    }

    #[tokio::test]
    async fn test_dropped_receiver_stops_poller() {
        let service = Arc::new(MemoryStreamService::new());
        let stream = service.create_stream("T", &["s1"]);

        let (tx, rx) = mpsc::channel(1);
        let handle = tokio::spawn(
            ShardPoller::new(service.clone(), stream, Shard::new("s1"), settings()).run(tx),
        );

        service.wait_for_open("s1").await;
        drop(rx);
        service
            .write_item("T", Item::from([("k".to_string(), "1".into())]))
            .unwrap();

        let outcome = handle.await.unwrap();
        assert_eq!(outcome.state, ShardState::Cancelled);
        assert_eq!(outcome.records_delivered(), 0);

        // The undelivered record is still readable from the final cursor
        let resumed = service
            .get_records(outcome.final_cursor.as_ref().unwrap(), 10)
            .await
            .unwrap();
        assert_eq!(resumed.records.len(), 1);
    }

    #[tokio::test]
    async fn test_sink_closed_mid_batch_keeps_batch_cursor() {
        let service = Arc::new(MemoryStreamService::new());
        let stream = service.create_stream("T", &["s1"]);

        let (tx, rx) = mpsc::channel(1);
        let handle = tokio::spawn(
            ShardPoller::new(service.clone(), stream, Shard::new("s1"), settings()).run(tx),
        );

        service.wait_for_open("s1").await;
        for k in ["1", "2"] {
            service
                .write_item("T", Item::from([("k".to_string(), k.into())]))
                .unwrap();
        }
        while rx.len() < 1 {
            tokio::task::yield_now().await;
        }
        drop(rx);

        let outcome = handle.await.unwrap();
        assert_eq!(outcome.state, ShardState::Cancelled);
        assert_eq!(outcome.records_delivered(), 1);

        // The handed-over record comes back together with the rest of its batch
        let resumed = service
            .get_records(outcome.final_cursor.as_ref().unwrap(), 10)
            .await
            .unwrap();
        let keys: Vec<_> = resumed
            .records
            .iter()
            .filter_map(|r| r.key("k").and_then(AttributeValue::as_s))
            .collect();
        assert_eq!(keys, ["1", "2"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_poll_interval_spaces_fetches() {
        let service = Arc::new(MemoryStreamService::new());
        let stream = service.create_stream("T", &["s1"]);
        let cancel = CancellationToken::new();

        let settings = PollerSettings::builder()
            .empty_poll_interval(Duration::from_secs(5))
            .retry(RetryConfig::immediate())
            .build();
        let (tx, _rx) = mpsc::channel(8);
        let handle = tokio::spawn(
            ShardPoller::new(service.clone(), stream, Shard::new("s1"), settings)
                .with_cancellation(cancel.clone())
                .run(tx),
        );

        service.wait_for_open("s1").await;
        tokio::time::sleep(Duration::from_secs(12)).await;
        let fetches = service.fetches_for("s1").len();
        assert!((2..=3).contains(&fetches), "{} fetches in 12s", fetches);

        cancel.cancel();
        let outcome = handle.await.unwrap();
        assert_eq!(outcome.state, ShardState::Cancelled);
        assert!(outcome.final_cursor.is_some());
        assert!(outcome.metrics.empty_polls >= 2);
    }
}
