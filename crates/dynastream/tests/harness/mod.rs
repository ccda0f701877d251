//! Test harness for stream consumer integration tests
//!
//! Runs the engine against the in-process [`MemoryStreamService`]:
//! - [`spawn_consumer`] starts a run in the background and collects records
//! - [`item`] builds items keyed by `k`
//! - [`assertions`] holds record-list checks

#![allow(dead_code)]

pub mod assertions;

use dynastream::common::{AttributeValue, ChangeRecord, Item, RecordSink, RetryConfig, TableRef};
use dynastream::memory::MemoryStreamService;
use dynastream::stream::{ConsumerSettings, PollerSettings, RunReport, StreamConsumer};
use parking_lot::Mutex;
use std::sync::{Arc, Once};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub use assertions::RecordVecExt;

static INIT: Once = Once::new();

/// Initialize test logging (idempotent)
pub fn init_test_logging() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::from_default_env()
                    .add_directive("dynastream=debug".parse().unwrap()),
            )
            .with_test_writer()
            .try_init()
            .ok();
    });
}

/// Upper bound on any single test run.
pub const RUN_TIMEOUT: Duration = Duration::from_secs(30);

/// Item keyed by `k` with one extra attribute.
pub fn item(key: &str) -> Item {
    Item::from([
        ("k".to_string(), AttributeValue::S(key.to_string())),
        (
            "data".to_string(),
            AttributeValue::M(Item::from([(
                "publishingSite".to_string(),
                AttributeValue::S("dplay.no".to_string()),
            )])),
        ),
    ])
}

/// Settings that retry immediately and forever.
pub fn immediate_settings() -> ConsumerSettings {
    ConsumerSettings {
        poller: PollerSettings::builder()
            .retry(RetryConfig::immediate())
            .build(),
        ..Default::default()
    }
}

/// Sink that keeps every record it receives.
#[derive(Clone, Default)]
pub struct CollectingSink {
    records: Arc<Mutex<Vec<ChangeRecord>>>,
}

impl CollectingSink {
    pub fn records(&self) -> Vec<ChangeRecord> {
        self.records.lock().clone()
    }
}

#[async_trait::async_trait]
impl RecordSink for CollectingSink {
    async fn deliver(&mut self, record: ChangeRecord) {
        self.records.lock().push(record);
    }
}

/// A consumer run in progress.
pub struct RunningConsumer {
    handle: JoinHandle<dynastream::Result<RunReport>>,
    sink: CollectingSink,
    cancel: CancellationToken,
}

impl RunningConsumer {
    /// Records delivered so far.
    pub fn records(&self) -> Vec<ChangeRecord> {
        self.sink.records()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait for the run to end and return its report.
    pub async fn finish(self) -> (RunReport, Vec<ChangeRecord>) {
        let report = tokio::time::timeout(RUN_TIMEOUT, self.handle)
            .await
            .expect("run did not finish in time")
            .expect("consumer task panicked")
            .expect("run failed");
        (report, self.sink.records())
    }

    /// Wait for the run to end, returning its raw result.
    pub async fn result(self) -> dynastream::Result<RunReport> {
        tokio::time::timeout(RUN_TIMEOUT, self.handle)
            .await
            .expect("run did not finish in time")
            .expect("consumer task panicked")
    }
}

/// Start consuming `table` on `service` in the background.
pub fn spawn_consumer(
    service: &Arc<MemoryStreamService>,
    table: &str,
    settings: ConsumerSettings,
) -> RunningConsumer {
    let consumer = StreamConsumer::new(service.clone(), service.clone()).with_settings(settings);
    let cancel = consumer.cancellation_token();
    let sink = CollectingSink::default();

    let table = TableRef::new(table);
    let mut task_sink = sink.clone();
    let handle = tokio::spawn(async move { consumer.run(&table, &mut task_sink).await });

    RunningConsumer {
        handle,
        sink,
        cancel,
    }
}
