//! In-process table and stream service
//!
//! [`MemoryStreamService`] implements both [`TableGateway`] and
//! [`StreamGateway`] without a network. Writes to a stream-enabled table append
//! change records to one of its open shards; cursors follow the LATEST
//! semantics of the real service. Faults can be injected per shard to exercise
//! the engine's error paths, and every fetch is logged.

use crate::common::{
    AttributeValue, ChangeOp, ChangeRecord, Cursor, FetchFailureKind, Item, RecordBatch, Result,
    Shard, ShardIteratorType, ShardPage, StreamError, StreamGateway, StreamRef, StreamViewType,
    TableDescription, TableGateway, TableRef,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, VecDeque};
use std::hash::{Hash, Hasher};
use tokio::sync::Notify;
use tracing::debug;

/// Largest batch a single fetch returns, whatever the requested limit.
pub const DEFAULT_SERVICE_BATCH_LIMIT: usize = 1000;

/// Shards per stream description page.
pub const DEFAULT_PAGE_SIZE: usize = 100;

/// One recorded `get_records` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchCall {
    pub shard_id: String,
    pub cursor: Cursor,
    pub limit: i32,
}

#[derive(Debug, Default)]
struct MemoryShard {
    id: String,
    parent: Option<String>,
    records: Vec<ChangeRecord>,
    closed: bool,
    opened: bool,
    fail_open: bool,
    injected_failures: VecDeque<FetchFailureKind>,
    stalled_fetches: u32,
}

#[derive(Debug)]
struct MemoryTable {
    name: String,
    arn: String,
    key_name: String,
    stream: Option<(StreamRef, StreamViewType)>,
    items: HashMap<String, Item>,
    shards: Vec<MemoryShard>,
}

impl MemoryTable {
    fn description(&self) -> TableDescription {
        TableDescription {
            table_name: self.name.clone(),
            table_arn: Some(self.arn.clone()),
            status: Some("ACTIVE".to_string()),
            stream_ref: self.stream.as_ref().map(|(s, _)| s.clone()),
            stream_view_type: self.stream.as_ref().map(|(_, v)| *v),
        }
    }
}

#[derive(Debug, Default)]
struct State {
    tables: Vec<MemoryTable>,
    fetch_log: Vec<FetchCall>,
    describe_calls: u64,
    open_calls: u64,
    describe_fail_after: Option<u64>,
    sequence: u64,
    streams_created: u64,
}

impl State {
    fn table(&self, table: &str) -> Option<&MemoryTable> {
        self.tables.iter().find(|t| t.name == table || t.arn == table)
    }

    fn table_mut(&mut self, table: &str) -> Option<&mut MemoryTable> {
        self.tables
            .iter_mut()
            .find(|t| t.name == table || t.arn == table)
    }

    fn stream_table(&self, stream: &StreamRef) -> Option<&MemoryTable> {
        self.tables
            .iter()
            .find(|t| matches!(&t.stream, Some((s, _)) if s == stream))
    }

    fn stream_table_mut(&mut self, stream: &StreamRef) -> Option<&mut MemoryTable> {
        self.tables
            .iter_mut()
            .find(|t| matches!(&t.stream, Some((s, _)) if s == stream))
    }

    fn shard_mut(&mut self, shard_id: &str) -> Option<&mut MemoryShard> {
        self.tables
            .iter_mut()
            .flat_map(|t| t.shards.iter_mut())
            .find(|s| s.id == shard_id)
    }

    fn next_sequence(&mut self) -> String {
        self.sequence += 1;
        format!("{:021}", self.sequence)
    }
}

/// In-memory table + stream service.
#[derive(Debug)]
pub struct MemoryStreamService {
    state: Mutex<State>,
    page_size: usize,
    batch_limit: usize,
    opened: Notify,
}

impl Default for MemoryStreamService {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStreamService {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            page_size: DEFAULT_PAGE_SIZE,
            batch_limit: DEFAULT_SERVICE_BATCH_LIMIT,
            opened: Notify::new(),
        }
    }

    /// Shards returned per stream description page.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Cap on records per fetch, applied below the caller's limit.
    pub fn with_batch_limit(mut self, batch_limit: usize) -> Self {
        self.batch_limit = batch_limit.max(1);
        self
    }

    // ------------------------------------------------------------------------
    // Setup
    // ------------------------------------------------------------------------

    /// Create a `KEYS_ONLY` stream-enabled table keyed by `k`, with the given shards.
    pub fn create_stream(&self, table: &str, shard_ids: &[&str]) -> StreamRef {
        self.create_stream_with(table, "k", StreamViewType::KeysOnly, shard_ids)
    }

    /// Create a stream-enabled table with an explicit key and view type.
    pub fn create_stream_with(
        &self,
        table: &str,
        key_name: &str,
        view_type: StreamViewType,
        shard_ids: &[&str],
    ) -> StreamRef {
        let mut state = self.state.lock();
        state.streams_created += 1;
        let arn = table_arn(table);
        let stream = StreamRef::new(format!("{}/stream/{:06}", arn, state.streams_created));
        state.tables.retain(|t| t.name != table);
        state.tables.push(MemoryTable {
            name: table.to_string(),
            arn,
            key_name: key_name.to_string(),
            stream: Some((stream.clone(), view_type)),
            items: HashMap::new(),
            shards: shard_ids
                .iter()
                .map(|id| MemoryShard {
                    id: id.to_string(),
                    ..Default::default()
                })
                .collect(),
        });
        stream
    }

    /// Create a table whose stream is disabled.
    pub fn create_table_without_stream(&self, table: &str) {
        let mut state = self.state.lock();
        state.tables.retain(|t| t.name != table);
        state.tables.push(MemoryTable {
            name: table.to_string(),
            arn: table_arn(table),
            key_name: "k".to_string(),
            stream: None,
            items: HashMap::new(),
            shards: Vec::new(),
        });
    }

    /// Add a shard to an existing stream, optionally as a child of `parent`.
    pub fn add_shard(&self, table: &str, shard_id: &str, parent: Option<&str>) {
        let mut state = self.state.lock();
        if let Some(t) = state.table_mut(table) {
            t.shards.push(MemoryShard {
                id: shard_id.to_string(),
                parent: parent.map(str::to_string),
                ..Default::default()
            });
        }
    }

    /// Close a shard; its remaining records stay readable.
    pub fn close_shard(&self, shard_id: &str) {
        if let Some(shard) = self.state.lock().shard_mut(shard_id) {
            shard.closed = true;
        }
    }

    // ------------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------------

    /// Write an item, appending an INSERT or MODIFY record to one open shard
    /// (chosen by key hash). Returns the replaced item, if any.
    pub fn write_item(&self, table: &str, item: Item) -> Result<Option<Item>> {
        self.write(table, None, item)
    }

    /// Write an item, appending its change record to `shard_id`.
    pub fn write_item_to_shard(&self, table: &str, shard_id: &str, item: Item) -> Result<Option<Item>> {
        self.write(table, Some(shard_id), item)
    }

    /// Delete the item whose key attribute equals `key`, appending a REMOVE record.
    pub fn delete_item(&self, table: &str, key: AttributeValue) -> Result<Option<Item>> {
        let mut state = self.state.lock();
        let table_state = state
            .table_mut(table)
            .ok_or_else(|| StreamError::table_unavailable(table, "table not found"))?;
        let key_name = table_state.key_name.clone();
        let Some(old) = table_state.items.remove(&key_string(&key)) else {
            return Ok(None);
        };
        let keys = Item::from([(key_name, key)]);
        append_record(&mut state, table, None, ChangeOp::Remove, keys, None, Some(old.clone()));
        Ok(Some(old))
    }

    fn write(&self, table: &str, shard_id: Option<&str>, item: Item) -> Result<Option<Item>> {
        let mut state = self.state.lock();
        let table_state = state
            .table_mut(table)
            .ok_or_else(|| StreamError::table_unavailable(table, "table not found"))?;
        let key_name = table_state.key_name.clone();
        let key = item.get(&key_name).cloned().ok_or_else(|| {
            StreamError::table_unavailable(table, format!("item is missing key attribute '{}'", key_name))
        })?;

        let old = table_state.items.insert(key_string(&key), item.clone());
        let op = if old.is_some() {
            ChangeOp::Modify
        } else {
            ChangeOp::Insert
        };
        let keys = Item::from([(key_name, key)]);
        append_record(&mut state, table, shard_id, op, keys, Some(item), old.clone());
        Ok(old)
    }

    // ------------------------------------------------------------------------
    // Fault injection
    // ------------------------------------------------------------------------

    /// Every attempt to open `shard_id` fails.
    pub fn fail_open(&self, shard_id: &str) {
        if let Some(shard) = self.state.lock().shard_mut(shard_id) {
            shard.fail_open = true;
        }
    }

    /// The next `count` fetches on `shard_id` fail with `kind`.
    pub fn fail_next_fetches(&self, shard_id: &str, count: usize, kind: FetchFailureKind) {
        if let Some(shard) = self.state.lock().shard_mut(shard_id) {
            shard.injected_failures.extend(std::iter::repeat(kind).take(count));
        }
    }

    /// The next `count` fetches on `shard_id` never resolve.
    pub fn stall_next_fetches(&self, shard_id: &str, count: u32) {
        if let Some(shard) = self.state.lock().shard_mut(shard_id) {
            shard.stalled_fetches += count;
        }
    }

    /// Stream descriptions fail once `successful` calls have been served.
    pub fn fail_describe_after(&self, successful: u64) {
        self.state.lock().describe_fail_after = Some(successful);
    }

    // ------------------------------------------------------------------------
    // Inspection
    // ------------------------------------------------------------------------

    /// Every fetch call received, in arrival order.
    pub fn fetch_log(&self) -> Vec<FetchCall> {
        self.state.lock().fetch_log.clone()
    }

    /// Fetch calls received for one shard.
    pub fn fetches_for(&self, shard_id: &str) -> Vec<FetchCall> {
        self.state
            .lock()
            .fetch_log
            .iter()
            .filter(|c| c.shard_id == shard_id)
            .cloned()
            .collect()
    }

    pub fn describe_calls(&self) -> u64 {
        self.state.lock().describe_calls
    }

    pub fn open_calls(&self) -> u64 {
        self.state.lock().open_calls
    }

    /// Records appended to a shard so far.
    pub fn shard_records(&self, shard_id: &str) -> Vec<ChangeRecord> {
        self.state
            .lock()
            .shard_mut(shard_id)
            .map(|s| s.records.clone())
            .unwrap_or_default()
    }

    pub fn is_opened(&self, shard_id: &str) -> bool {
        self.state
            .lock()
            .shard_mut(shard_id)
            .map(|s| s.opened)
            .unwrap_or(false)
    }

    /// Wait until a cursor has been handed out for `shard_id`.
    pub async fn wait_for_open(&self, shard_id: &str) {
        loop {
            let notified = self.opened.notified();
            if self.is_opened(shard_id) {
                return;
            }
            notified.await;
        }
    }
}

fn table_arn(table: &str) -> String {
    format!("arn:aws:dynamodb:memory:000000000000:table/{}", table)
}

fn key_string(key: &AttributeValue) -> String {
    serde_json::to_string(key).unwrap_or_default()
}

fn encode_cursor(stream: &StreamRef, shard_id: &str, position: usize) -> Cursor {
    Cursor::new(format!("{}|{}|{}", stream, shard_id, position))
}

fn decode_cursor(cursor: &Cursor) -> Option<(StreamRef, String, usize)> {
    let mut parts = cursor.as_str().rsplitn(3, '|');
    let position = parts.next()?.parse().ok()?;
    let shard = parts.next()?.to_string();
    let stream = StreamRef::new(parts.next()?);
    Some((stream, shard, position))
}

fn append_record(
    state: &mut State,
    table: &str,
    shard_id: Option<&str>,
    op: ChangeOp,
    keys: Item,
    new_image: Option<Item>,
    old_image: Option<Item>,
) {
    let sequence_number = state.next_sequence();
    let Some(table_state) = state.table_mut(table) else {
        return;
    };
    let Some((_, view_type)) = table_state.stream.clone() else {
        return;
    };

    let target = match shard_id {
        Some(id) => table_state.shards.iter_mut().find(|s| s.id == id && !s.closed),
        None => {
            let mut open: Vec<&mut MemoryShard> =
                table_state.shards.iter_mut().filter(|s| !s.closed).collect();
            if open.is_empty() {
                None
            } else {
                let mut hasher = DefaultHasher::new();
                serde_json::to_string(&keys).unwrap_or_default().hash(&mut hasher);
                let idx = (hasher.finish() % open.len() as u64) as usize;
                Some(open.swap_remove(idx))
            }
        }
    };
    let Some(shard) = target else {
        debug!(table, "No open shard for change record, dropping");
        return;
    };

    let new_image = new_image.filter(|_| view_type.includes_new_image() && op != ChangeOp::Remove);
    let old_image = old_image.filter(|_| view_type.includes_old_image() && op != ChangeOp::Insert);
    let size_bytes = [Some(&keys), new_image.as_ref(), old_image.as_ref()]
        .into_iter()
        .flatten()
        .map(|i| serde_json::to_vec(i).map(|v| v.len()).unwrap_or(0))
        .sum::<usize>() as i64;

    shard.records.push(ChangeRecord {
        event_id: uuid::Uuid::new_v4().to_string(),
        op,
        shard_id: shard.id.clone(),
        sequence_number,
        approximate_creation_time: Some(chrono::Utc::now().timestamp()),
        keys,
        new_image,
        old_image,
        view_type: Some(view_type),
        size_bytes: Some(size_bytes),
    });
}

enum FetchPlan {
    Fail(FetchFailureKind),
    Stall,
    Serve(RecordBatch),
}

#[async_trait]
impl TableGateway for MemoryStreamService {
    async fn describe_table(&self, table: &TableRef) -> Result<TableDescription> {
        self.state
            .lock()
            .table(table.as_str())
            .map(MemoryTable::description)
            .ok_or_else(|| StreamError::table_unavailable(table.as_str(), "table not found"))
    }

    async fn create_table(
        &self,
        name: &str,
        key_name: &str,
        view_type: StreamViewType,
    ) -> Result<TableDescription> {
        if self.state.lock().table(name).is_some() {
            return Err(StreamError::table_unavailable(name, "table already exists"));
        }
        let shard_id = format!("shardId-{:020}-{}", 1, &uuid::Uuid::new_v4().simple().to_string()[..8]);
        self.create_stream_with(name, key_name, view_type, &[shard_id.as_str()]);
        self.describe_table(&TableRef::new(name)).await
    }

    async fn wait_until_exists(&self, table: &TableRef) -> Result<TableDescription> {
        self.describe_table(table).await
    }

    async fn put_item(&self, table: &TableRef, item: Item) -> Result<Item> {
        Ok(self.write_item(table.as_str(), item)?.unwrap_or_default())
    }
}

#[async_trait]
impl StreamGateway for MemoryStreamService {
    async fn describe_stream(
        &self,
        stream: &StreamRef,
        exclusive_start_shard_id: Option<&str>,
    ) -> Result<ShardPage> {
        let mut state = self.state.lock();
        state.describe_calls += 1;
        if let Some(limit) = state.describe_fail_after {
            if state.describe_calls > limit {
                return Err(StreamError::stream_unavailable(
                    stream.as_str(),
                    "injected describe failure",
                ));
            }
        }

        let table = state
            .stream_table(stream)
            .ok_or_else(|| StreamError::stream_unavailable(stream.as_str(), "stream not found"))?;

        let start = match exclusive_start_shard_id {
            Some(id) => table
                .shards
                .iter()
                .position(|s| s.id == id)
                .map(|p| p + 1)
                .unwrap_or(table.shards.len()),
            None => 0,
        };
        let page: Vec<Shard> = table
            .shards
            .iter()
            .skip(start)
            .take(self.page_size)
            .map(|s| Shard {
                shard_id: s.id.clone(),
                parent_shard_id: s.parent.clone(),
                sequence_range: Default::default(),
            })
            .collect();
        let more = start + page.len() < table.shards.len();

        Ok(ShardPage {
            last_evaluated_shard_id: if more {
                page.last().map(|s| s.shard_id.clone())
            } else {
                None
            },
            shards: page,
        })
    }

    async fn get_shard_iterator(
        &self,
        stream: &StreamRef,
        shard_id: &str,
        _position: ShardIteratorType,
    ) -> Result<Cursor> {
        let cursor = {
            let mut state = self.state.lock();
            state.open_calls += 1;
            let table = state.stream_table_mut(stream).ok_or_else(|| {
                StreamError::shard_unavailable(shard_id, format!("stream {} not found", stream))
            })?;
            let shard = table
                .shards
                .iter_mut()
                .find(|s| s.id == shard_id)
                .ok_or_else(|| StreamError::shard_unavailable(shard_id, "shard not found"))?;
            if shard.fail_open {
                return Err(StreamError::shard_unavailable(shard_id, "injected open failure"));
            }
            shard.opened = true;
            encode_cursor(stream, shard_id, shard.records.len())
        };
        self.opened.notify_waiters();
        Ok(cursor)
    }

    async fn get_records(&self, cursor: &Cursor, limit: i32) -> Result<RecordBatch> {
        tokio::task::yield_now().await;

        let plan = {
            let mut state = self.state.lock();
            let (stream, shard_id, position) = decode_cursor(cursor).ok_or_else(|| {
                StreamError::fetch(FetchFailureKind::ExpiredCursor, "unrecognised cursor")
            })?;
            state.fetch_log.push(FetchCall {
                shard_id: shard_id.clone(),
                cursor: cursor.clone(),
                limit,
            });

            let take = (limit.max(1) as usize).min(self.batch_limit);
            let shard = state
                .stream_table_mut(&stream)
                .and_then(|t| t.shards.iter_mut().find(|s| s.id == shard_id))
                .ok_or_else(|| {
                    StreamError::fetch(FetchFailureKind::ExpiredCursor, "cursor refers to unknown shard")
                })?;

            if let Some(kind) = shard.injected_failures.pop_front() {
                FetchPlan::Fail(kind)
            } else if shard.stalled_fetches > 0 {
                shard.stalled_fetches -= 1;
                FetchPlan::Stall
            } else {
                let start = position.min(shard.records.len());
                let end = (start + take).min(shard.records.len());
                let records = shard.records[start..end].to_vec();
                let next_cursor = if shard.closed && end >= shard.records.len() {
                    None
                } else {
                    Some(encode_cursor(&stream, &shard_id, end))
                };
                FetchPlan::Serve(RecordBatch {
                    records,
                    next_cursor,
                })
            }
        };

        match plan {
            FetchPlan::Fail(kind) => Err(StreamError::fetch(kind, "injected fetch failure")),
            FetchPlan::Stall => std::future::pending().await,
            FetchPlan::Serve(batch) => Ok(batch),
        }
    }
}
