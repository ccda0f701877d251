//! Gateways to the remote table and stream services
//!
//! The engine only talks to these traits. [`crate::dynamodb`] implements them
//! over the AWS SDK, [`crate::memory`] in-process.

use crate::common::record::{Item, StreamViewType};
use crate::common::types::{Cursor, RecordBatch, ShardPage, StreamRef, TableDescription, TableRef};
use crate::common::Result;
use async_trait::async_trait;

/// Table-level operations.
///
/// Every failure surfaces as [`crate::StreamError::TableUnavailable`].
#[async_trait]
pub trait TableGateway: Send + Sync {
    /// Describe a table, including its latest stream reference.
    async fn describe_table(&self, table: &TableRef) -> Result<TableDescription>;

    /// Create a stream-enabled table keyed by a single string hash key.
    async fn create_table(
        &self,
        name: &str,
        key_name: &str,
        view_type: StreamViewType,
    ) -> Result<TableDescription>;

    /// Wait until the table exists and is usable.
    async fn wait_until_exists(&self, table: &TableRef) -> Result<TableDescription>;

    /// Write an item, returning the attributes it replaced (empty for a new item).
    async fn put_item(&self, table: &TableRef, item: Item) -> Result<Item>;
}

/// Where a freshly opened cursor is positioned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShardIteratorType {
    /// Only records written after the cursor was obtained
    Latest,
}

/// Stream-level operations.
#[async_trait]
pub trait StreamGateway: Send + Sync {
    /// Describe one page of a stream's shards, starting after
    /// `exclusive_start_shard_id` when given.
    async fn describe_stream(
        &self,
        stream: &StreamRef,
        exclusive_start_shard_id: Option<&str>,
    ) -> Result<ShardPage>;

    /// Obtain an initial cursor for a shard.
    async fn get_shard_iterator(
        &self,
        stream: &StreamRef,
        shard_id: &str,
        position: ShardIteratorType,
    ) -> Result<Cursor>;

    /// Fetch up to `limit` records at `cursor`.
    ///
    /// Failures are reported as [`crate::StreamError::FetchFailure`]; callers
    /// bound the call with their own timeout.
    async fn get_records(&self, cursor: &Cursor, limit: i32) -> Result<RecordBatch>;
}
