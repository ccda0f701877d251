//! Record sinks
//!
//! A sink receives every change record exactly once, in per-shard order. The
//! consumer drives a single sink from one task, so implementations need no
//! internal locking.

use crate::common::record::ChangeRecord;
use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Application callback for change records.
#[async_trait]
pub trait RecordSink: Send {
    /// Deliver one record.
    async fn deliver(&mut self, record: ChangeRecord);
}

/// Logs every record at INFO.
#[derive(Debug, Default)]
pub struct LoggingSink {
    delivered: u64,
}

impl LoggingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records logged so far.
    pub fn delivered(&self) -> u64 {
        self.delivered
    }
}

#[async_trait]
impl RecordSink for LoggingSink {
    async fn deliver(&mut self, record: ChangeRecord) {
        self.delivered += 1;
        info!(
            shard = %record.shard_id,
            sequence = %record.sequence_number,
            op = %record.op,
            keys = %record.keys_json(),
            "RECORD: {}",
            record.to_json()
        );
    }
}

/// Forwards records to an application-owned channel.
///
/// Once the receiver is dropped further records are discarded with a warning.
pub struct ChannelSink {
    tx: mpsc::Sender<ChangeRecord>,
    closed: bool,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<ChangeRecord>) -> Self {
        Self { tx, closed: false }
    }

    /// Create a sink together with its receiving end.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<ChangeRecord>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(tx), rx)
    }
}

#[async_trait]
impl RecordSink for ChannelSink {
    async fn deliver(&mut self, record: ChangeRecord) {
        if self.closed {
            return;
        }
        if self.tx.send(record).await.is_err() {
            warn!("Record receiver dropped, discarding further records");
            self.closed = true;
        }
    }
}

/// Adapts a closure into a sink.
pub struct FnSink<F> {
    f: F,
}

impl<F> FnSink<F>
where
    F: FnMut(ChangeRecord) + Send,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F> RecordSink for FnSink<F>
where
    F: FnMut(ChangeRecord) + Send,
{
    async fn deliver(&mut self, record: ChangeRecord) {
        (self.f)(record)
    }
}
