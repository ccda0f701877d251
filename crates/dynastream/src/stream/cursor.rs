//! Initial cursor acquisition

use crate::common::{Cursor, Result, ShardIteratorType, StreamError, StreamGateway, StreamRef};
use std::sync::Arc;
use tracing::debug;

/// Opens a shard at its LATEST position.
///
/// Records written before the cursor is obtained are never observed through it.
#[derive(Clone)]
pub struct CursorOpener {
    gateway: Arc<dyn StreamGateway>,
}

impl CursorOpener {
    pub fn new(gateway: Arc<dyn StreamGateway>) -> Self {
        Self { gateway }
    }

    /// Obtain the initial cursor for `shard_id`.
    ///
    /// Every failure is reported as [`StreamError::ShardUnavailable`].
    pub async fn open(&self, stream: &StreamRef, shard_id: &str) -> Result<Cursor> {
        let cursor = self
            .gateway
            .get_shard_iterator(stream, shard_id, ShardIteratorType::Latest)
            .await
            .map_err(|e| match e {
                e @ StreamError::ShardUnavailable { .. } => e,
                other => StreamError::shard_unavailable(shard_id, other.to_string()),
            })?;

        debug!(stream = %stream, shard = shard_id, cursor = %cursor, "Opened shard at LATEST");
        Ok(cursor)
    }
}
