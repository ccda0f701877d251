//! # Change-stream engine
//!
//! - [`ShardEnumerator`] - Lists a stream's shards
//! - [`CursorOpener`] - Opens a shard at LATEST
//! - [`ShardPoller`] - Fetch loop of one shard
//! - [`StreamConsumer`] - Runs a poller per shard into one sink

pub mod consumer;
pub mod cursor;
pub mod enumerator;
pub mod poller;

pub use consumer::{ConsumerSettings, RunReport, Scheduling, StreamConsumer};
pub use cursor::CursorOpener;
pub use enumerator::ShardEnumerator;
pub use poller::{
    PollerSettings, PollerSettingsBuilder, ShardOutcome, ShardPoller, ShardState, MAX_BATCH_LIMIT,
};
