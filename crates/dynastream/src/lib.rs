//! dynastream - DynamoDB Streams consumer
//!
//! Discovers the active change stream of a table, enumerates its shards and
//! polls every shard from its LATEST position until the shard closes, handing
//! each change record to a [`RecordSink`](common::RecordSink).
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────┐  describe_table   ┌──────────────────┐
//! │ StreamConsumer │──────────────────▶│   TableGateway   │
//! └───────┬────────┘                   └──────────────────┘
//!         │ enumerate
//!         ▼
//! ┌────────────────┐  describe_stream  ┌──────────────────┐
//! │ShardEnumerator │──────────────────▶│                  │
//! └───────┬────────┘                   │                  │
//!         │ one per shard              │  StreamGateway   │
//!         ▼                            │                  │
//! ┌────────────────┐  get_shard_iter.  │                  │
//! │  ShardPoller   │──────────────────▶│                  │
//! │  (per task)    │  get_records      │                  │
//! └───────┬────────┘                   └──────────────────┘
//!         │ bounded channel
//!         ▼
//! ┌────────────────┐
//! │   RecordSink   │
//! └────────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use dynastream::common::LoggingSink;
//! use dynastream::config::DynastreamConfig;
//! use dynastream::dynamodb::DynamoDbClients;
//! use dynastream::stream::StreamConsumer;
//!
//! let config = DynastreamConfig::from_file("dynastream.yaml")?;
//! let clients = DynamoDbClients::connect(&config).await;
//! let consumer = StreamConsumer::new(clients.tables, clients.streams)
//!     .with_settings(config.consumer_settings());
//!
//! let report = consumer
//!     .run(&config.table_name.as_str().into(), &mut LoggingSink::new())
//!     .await?;
//! ```
//!
//! Gateways are traits; [`memory::MemoryStreamService`] provides an
//! in-process implementation for tests and local experiments.

pub mod common;
pub mod config;
pub mod dynamodb;
pub mod memory;
pub mod stream;

pub use common::{
    ChangeOp, ChangeRecord, RecordSink, Result, RetryConfig, StreamError, StreamGateway,
    StreamViewType, TableGateway, TableRef,
};
pub use config::DynastreamConfig;
pub use stream::{RunReport, ShardState, StreamConsumer};
