//! # Stream Consumer
//!
//! Top-level orchestration of one run over a table's stream:
//!
//! 1. resolve the table's latest stream
//! 2. enumerate every shard
//! 3. start one [`ShardPoller`] per shard
//! 4. feed every record through a bounded channel to a single sink
//!
//! Resolution and enumeration failures abort the run. Everything that goes
//! wrong inside a shard stays inside that shard's [`ShardOutcome`].
//!
//! ## Usage
//!
//! ```ignore
//! use dynastream::stream::StreamConsumer;
//! use dynastream::common::LoggingSink;
//!
//! let consumer = StreamConsumer::new(tables, streams);
//! let token = consumer.cancellation_token();
//! let report = consumer.run(&"orders".into(), &mut LoggingSink::new()).await?;
//! println!("{} records", report.records_delivered());
//! ```

use crate::common::{
    ChangeRecord, PollerMetrics, PollerMetricsSnapshot, RecordSink, Result, StreamError, StreamGateway,
    StreamRef, TableGateway, TableRef,
};
use crate::stream::enumerator::ShardEnumerator;
use crate::stream::poller::{PollerSettings, ShardOutcome, ShardPoller, ShardState};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// How shard pollers are scheduled within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheduling {
    /// Every shard polled by its own task
    #[default]
    Concurrent,
    /// Shard N+1 starts once shard N reached a terminal state
    Sequential,
}

impl std::str::FromStr for Scheduling {
    type Err = StreamError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "concurrent" => Ok(Self::Concurrent),
            "sequential" => Ok(Self::Sequential),
            _ => Err(StreamError::config(format!("unknown scheduling '{}'", s))),
        }
    }
}

/// Stream consumer settings.
#[derive(Debug, Clone)]
pub struct ConsumerSettings {
    pub scheduling: Scheduling,
    /// Capacity of the record channel between pollers and the sink
    pub channel_capacity: usize,
    pub poller: PollerSettings,
}

impl Default for ConsumerSettings {
    fn default() -> Self {
        Self {
            scheduling: Scheduling::Concurrent,
            channel_capacity: 1024,
            poller: PollerSettings::default(),
        }
    }
}

impl ConsumerSettings {
    pub fn validate(&self) -> Result<()> {
        if self.channel_capacity == 0 {
            return Err(StreamError::config("channel_capacity must be greater than zero"));
        }
        self.poller.validate()
    }
}

/// Summary of a finished run.
#[derive(Debug)]
pub struct RunReport {
    pub table: TableRef,
    pub stream: StreamRef,
    /// One entry per enumerated shard, in enumeration order
    pub shards: Vec<ShardOutcome>,
    pub elapsed: Duration,
}

impl RunReport {
    /// Records handed to the sink across all shards.
    pub fn records_delivered(&self) -> u64 {
        self.shards.iter().map(ShardOutcome::records_delivered).sum()
    }

    pub fn outcome(&self, shard_id: &str) -> Option<&ShardOutcome> {
        self.shards.iter().find(|o| o.shard_id == shard_id)
    }

    /// Number of shards that ended in `state`.
    pub fn count(&self, state: ShardState) -> usize {
        self.shards.iter().filter(|o| o.state == state).count()
    }

    /// Whether no shard ended with an error.
    pub fn is_clean(&self) -> bool {
        !self.shards.iter().any(|o| o.state.is_failure())
    }

    /// Counters summed over all shards.
    pub fn totals(&self) -> PollerMetricsSnapshot {
        let mut total = PollerMetricsSnapshot::default();
        for outcome in &self.shards {
            total += &outcome.metrics;
        }
        total
    }
}

/// Discovers a table's stream and polls every shard of it.
///
/// Each call to [`StreamConsumer::run`] polls under its own child of the
/// consumer's cancellation token, so dropping a run future stops that run's
/// pollers without touching later runs.
pub struct StreamConsumer {
    tables: Arc<dyn TableGateway>,
    streams: Arc<dyn StreamGateway>,
    settings: ConsumerSettings,
    cancel: CancellationToken,
    live: Mutex<Vec<Arc<PollerMetrics>>>,
}

impl StreamConsumer {
    pub fn new(tables: Arc<dyn TableGateway>, streams: Arc<dyn StreamGateway>) -> Self {
        Self {
            tables,
            streams,
            settings: ConsumerSettings::default(),
            cancel: CancellationToken::new(),
            live: Mutex::new(Vec::new()),
        }
    }

    pub fn with_settings(mut self, settings: ConsumerSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Token that stops every poller of a running [`StreamConsumer::run`].
    ///
    /// Cancellation is permanent: once cancelled, later runs on this consumer
    /// end at once with every shard `Cancelled`.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Live counters of the pollers started by the most recent run, in
    /// enumeration order.
    pub fn live_metrics(&self) -> Vec<Arc<PollerMetrics>> {
        self.live.lock().clone()
    }

    pub fn settings(&self) -> &ConsumerSettings {
        &self.settings
    }

    /// Resolve the latest stream of `table`.
    ///
    /// A table without an enabled stream is reported as
    /// [`StreamError::TableUnavailable`].
    pub async fn resolve_stream(&self, table: &TableRef) -> Result<StreamRef> {
        let description = self
            .tables
            .describe_table(table)
            .await
            .map_err(|e| match e {
                e @ StreamError::TableUnavailable { .. } => e,
                other => StreamError::table_unavailable(table.as_str(), other.to_string()),
            })?;

        description.stream_ref.ok_or_else(|| {
            StreamError::table_unavailable(table.as_str(), "table has no enabled stream")
        })
    }

    /// Consume `table`'s stream until every shard reached a terminal state.
    ///
    /// Records are delivered to `sink` from the calling task, in order within
    /// each shard. Returns an error only if the stream could not be resolved
    /// or enumerated. Dropping the future stops the pollers it started.
    pub async fn run<S>(&self, table: &TableRef, sink: &mut S) -> Result<RunReport>
    where
        S: RecordSink + ?Sized,
    {
        self.settings.validate()?;
        let started = Instant::now();

        let stream = self.resolve_stream(table).await.inspect_err(|e| {
            error!(table = %table, error = %e, "Could not resolve stream");
        })?;
        info!(table = %table, stream = %stream, "Resolved stream");

        let shards = ShardEnumerator::new(self.streams.clone())
            .enumerate(&stream)
            .await
            .inspect_err(|e| {
                error!(table = %table, stream = %stream, error = %e, "Could not enumerate shards");
            })?;

        if shards.is_empty() {
            warn!(table = %table, stream = %stream, "Stream has no shards");
        }

        // Stops this run's pollers if the run future is dropped early
        let run_cancel = self.cancel.child_token();
        let _cancel_on_drop = run_cancel.clone().drop_guard();

        let (tx, mut rx) = mpsc::channel::<ChangeRecord>(self.settings.channel_capacity);
        let pollers: Vec<ShardPoller> = shards
            .into_iter()
            .map(|shard| {
                ShardPoller::new(
                    self.streams.clone(),
                    stream.clone(),
                    shard,
                    self.settings.poller.clone(),
                )
                .with_table(table.clone())
                .with_cancellation(run_cancel.clone())
            })
            .collect();
        *self.live.lock() = pollers.iter().map(ShardPoller::metrics).collect();
        let shard_ids: Vec<String> = pollers.iter().map(|p| p.shard_id().to_string()).collect();

        info!(
            table = %table,
            shards = shard_ids.len(),
            scheduling = ?self.settings.scheduling,
            "Starting shard pollers"
        );

        let driver = match self.settings.scheduling {
            Scheduling::Concurrent => spawn_concurrent(pollers, tx),
            Scheduling::Sequential => spawn_sequential(pollers, tx),
        };

        // Ends once every poller has dropped its sender
        while let Some(record) = rx.recv().await {
            sink.deliver(record).await;
        }

        let outcomes = match driver.await {
            Ok(outcomes) => outcomes,
            Err(e) => {
                error!(table = %table, error = %e, "Shard driver failed");
                shard_ids
                    .iter()
                    .map(|id| ShardOutcome::aborted(id.clone(), e.to_string()))
                    .collect()
            }
        };

        let report = RunReport {
            table: table.clone(),
            stream,
            shards: outcomes,
            elapsed: started.elapsed(),
        };

        info!(
            table = %table,
            stream = %report.stream,
            records = report.records_delivered(),
            closed = report.count(ShardState::Closed),
            open_failed = report.count(ShardState::OpenFailed),
            cancelled = report.count(ShardState::Cancelled),
            exhausted = report.count(ShardState::Exhausted),
            elapsed_ms = report.elapsed.as_millis() as u64,
            "Run finished"
        );

        Ok(report)
    }
}

fn spawn_poller(
    poller: ShardPoller,
    tx: mpsc::Sender<ChangeRecord>,
) -> (String, JoinHandle<ShardOutcome>) {
    let shard_id = poller.shard_id().to_string();
    (shard_id, tokio::spawn(poller.run(tx)))
}

async fn join_poller(shard_id: String, handle: JoinHandle<ShardOutcome>) -> ShardOutcome {
    match handle.await {
        Ok(outcome) => outcome,
        Err(e) => {
            error!(shard = %shard_id, error = %e, "Shard poller aborted");
            ShardOutcome::aborted(shard_id, e.to_string())
        }
    }
}

fn spawn_concurrent(
    pollers: Vec<ShardPoller>,
    tx: mpsc::Sender<ChangeRecord>,
) -> JoinHandle<Vec<ShardOutcome>> {
    let handles: Vec<_> = pollers
        .into_iter()
        .map(|poller| spawn_poller(poller, tx.clone()))
        .collect();
    drop(tx);

    tokio::spawn(async move {
        let mut outcomes = Vec::with_capacity(handles.len());
        for (shard_id, handle) in handles {
            outcomes.push(join_poller(shard_id, handle).await);
        }
        outcomes
    })
}

fn spawn_sequential(
    pollers: Vec<ShardPoller>,
    tx: mpsc::Sender<ChangeRecord>,
) -> JoinHandle<Vec<ShardOutcome>> {
    tokio::spawn(async move {
        let mut outcomes = Vec::with_capacity(pollers.len());
        for poller in pollers {
            let (shard_id, handle) = spawn_poller(poller, tx.clone());
            outcomes.push(join_poller(shard_id, handle).await);
        }
        outcomes
    })
}
