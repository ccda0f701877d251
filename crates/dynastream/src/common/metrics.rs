//! Per-poller counters
//!
//! Each shard poller owns one [`PollerMetrics`]. Counters are kept as atomics
//! for snapshots and also emitted through the `metrics` facade, labelled by
//! shard, so any installed recorder sees them while a run is in progress. The
//! consumer folds the final [`PollerMetricsSnapshot`] into the run report.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// Metrics
// ============================================================================

/// Shard poller metrics
///
/// Thread-safe; shared with observers through an `Arc`.
#[derive(Debug)]
pub struct PollerMetrics {
    shard: String,
    /// Fetch calls issued, successful or not
    fetches: AtomicU64,
    /// Fetch calls that failed or timed out
    failed_fetches: AtomicU64,
    /// Successful fetches that returned no records
    empty_polls: AtomicU64,
    /// Records handed to the sink
    records_delivered: AtomicU64,
    /// Total time spent in successful fetches
    total_fetch_time_ms: AtomicU64,
    /// Duration of the last successful fetch
    last_fetch_duration_ms: AtomicU64,
    /// Length of the current run of consecutive failures
    consecutive_failures: AtomicU64,
}

impl PollerMetrics {
    pub fn new(shard: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            shard: shard.into(),
            fetches: AtomicU64::new(0),
            failed_fetches: AtomicU64::new(0),
            empty_polls: AtomicU64::new(0),
            records_delivered: AtomicU64::new(0),
            total_fetch_time_ms: AtomicU64::new(0),
            last_fetch_duration_ms: AtomicU64::new(0),
            consecutive_failures: AtomicU64::new(0),
        })
    }

    /// Shard these counters belong to.
    pub fn shard(&self) -> &str {
        &self.shard
    }

    pub(crate) fn record_fetch_ok(&self, duration: Duration, records: usize) {
        self.fetches.fetch_add(1, Ordering::Relaxed);
        let ms = duration.as_millis() as u64;
        self.total_fetch_time_ms.fetch_add(ms, Ordering::Relaxed);
        self.last_fetch_duration_ms.store(ms, Ordering::Relaxed);
        self.consecutive_failures.store(0, Ordering::Relaxed);

        metrics::counter!("dynastream_fetches_total", "shard" => self.shard.clone()).increment(1);
        metrics::histogram!("dynastream_fetch_duration_seconds", "shard" => self.shard.clone())
            .record(duration.as_secs_f64());

        if records == 0 {
            self.empty_polls.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("dynastream_empty_polls_total", "shard" => self.shard.clone())
                .increment(1);
        }
    }

    pub(crate) fn record_fetch_failed(&self) {
        self.fetches.fetch_add(1, Ordering::Relaxed);
        self.failed_fetches.fetch_add(1, Ordering::Relaxed);
        self.consecutive_failures.fetch_add(1, Ordering::Relaxed);

        metrics::counter!("dynastream_fetches_total", "shard" => self.shard.clone()).increment(1);
        metrics::counter!("dynastream_failed_fetches_total", "shard" => self.shard.clone())
            .increment(1);
    }

    pub(crate) fn record_delivered(&self) {
        self.records_delivered.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("dynastream_records_delivered_total", "shard" => self.shard.clone())
            .increment(1);
    }

    /// Export metrics snapshot
    pub fn snapshot(&self) -> PollerMetricsSnapshot {
        let fetches = self.fetches.load(Ordering::Relaxed);
        let failed_fetches = self.failed_fetches.load(Ordering::Relaxed);
        let successful = fetches.saturating_sub(failed_fetches);
        PollerMetricsSnapshot {
            fetches,
            failed_fetches,
            empty_polls: self.empty_polls.load(Ordering::Relaxed),
            records_delivered: self.records_delivered.load(Ordering::Relaxed),
            avg_fetch_time_ms: if successful > 0 {
                self.total_fetch_time_ms.load(Ordering::Relaxed) / successful
            } else {
                0
            },
            last_fetch_duration_ms: self.last_fetch_duration_ms.load(Ordering::Relaxed),
            consecutive_failures: self.consecutive_failures.load(Ordering::Relaxed),
        }
    }
}

/// Metrics snapshot for external export
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PollerMetricsSnapshot {
    pub fetches: u64,
    pub failed_fetches: u64,
    pub empty_polls: u64,
    pub records_delivered: u64,
    pub avg_fetch_time_ms: u64,
    pub last_fetch_duration_ms: u64,
    pub consecutive_failures: u64,
}

impl std::ops::AddAssign<&PollerMetricsSnapshot> for PollerMetricsSnapshot {
    fn add_assign(&mut self, other: &PollerMetricsSnapshot) {
        self.fetches += other.fetches;
        self.failed_fetches += other.failed_fetches;
        self.empty_polls += other.empty_polls;
        self.records_delivered += other.records_delivered;
        self.avg_fetch_time_ms = self.avg_fetch_time_ms.max(other.avg_fetch_time_ms);
        self.last_fetch_duration_ms = self.last_fetch_duration_ms.max(other.last_fetch_duration_ms);
        self.consecutive_failures = self.consecutive_failures.max(other.consecutive_failures);
    }
}
