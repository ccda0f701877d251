//! Shard discovery

use crate::common::{Result, Shard, StreamError, StreamGateway, StreamRef};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Lists the shards of a stream.
///
/// Pages of the stream description are followed until the service reports no
/// further shards. Any failure, on any page, fails the whole enumeration with
/// [`StreamError::StreamUnavailable`]; a partial list is never returned.
#[derive(Clone)]
pub struct ShardEnumerator {
    gateway: Arc<dyn StreamGateway>,
}

impl ShardEnumerator {
    pub fn new(gateway: Arc<dyn StreamGateway>) -> Self {
        Self { gateway }
    }

    /// Enumerate every shard of `stream`, in upstream order.
    pub async fn enumerate(&self, stream: &StreamRef) -> Result<Vec<Shard>> {
        let mut shards = Vec::new();
        let mut seen_pages = HashSet::new();
        let mut start: Option<String> = None;

        loop {
            let page = self
                .gateway
                .describe_stream(stream, start.as_deref())
                .await
                .map_err(|e| into_stream_unavailable(stream, e))?;

            debug!(
                stream = %stream,
                page_shards = page.shards.len(),
                more = page.last_evaluated_shard_id.is_some(),
                "Described stream page"
            );
            shards.extend(page.shards);

            match page.last_evaluated_shard_id {
                Some(next) => {
                    if !seen_pages.insert(next.clone()) {
                        warn!(stream = %stream, shard = %next, "Stream description repeated a page");
                        return Err(StreamError::stream_unavailable(
                            stream.as_str(),
                            format!("pagination did not advance past shard {}", next),
                        ));
                    }
                    start = Some(next);
                }
                None => break,
            }
        }

        info!(stream = %stream, shards = shards.len(), "Enumerated stream shards");
        Ok(shards)
    }
}

fn into_stream_unavailable(stream: &StreamRef, err: StreamError) -> StreamError {
    match err {
        e @ StreamError::StreamUnavailable { .. } => e,
        other => StreamError::stream_unavailable(stream.as_str(), other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::ErrorCategory;
    use crate::memory::MemoryStreamService;

    #[tokio::test]
    async fn test_enumerate_follows_pages() {
        let service = Arc::new(MemoryStreamService::new().with_page_size(2));
        let stream = service.create_stream("T", &["s1", "s2", "s3", "s4", "s5"]);

        let shards = ShardEnumerator::new(service.clone())
            .enumerate(&stream)
            .await
            .unwrap();

        let ids: Vec<_> = shards.iter().map(|s| s.shard_id.as_str()).collect();
        assert_eq!(ids, vec!["s1", "s2", "s3", "s4", "s5"]);
        assert_eq!(service.describe_calls(), 3);
    }

    #[tokio::test]
    async fn test_enumerate_empty_stream() {
        let service = Arc::new(MemoryStreamService::new());
        let stream = service.create_stream("T", &[]);

        let shards = ShardEnumerator::new(service).enumerate(&stream).await.unwrap();
        assert!(shards.is_empty());
    }

    #[tokio::test]
    async fn test_enumerate_unknown_stream() {
        let service = Arc::new(MemoryStreamService::new());
        let err = ShardEnumerator::new(service)
            .enumerate(&StreamRef::new("arn:missing"))
            .await
            .unwrap_err();

        assert_eq!(err.category(), ErrorCategory::Stream);
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_enumerate_failure_on_later_page() {
        let service = Arc::new(MemoryStreamService::new().with_page_size(1));
        let stream = service.create_stream("T", &["s1", "s2", "s3"]);
        service.fail_describe_after(1);

        let err = ShardEnumerator::new(service)
            .enumerate(&stream)
            .await
            .unwrap_err();
        assert!(matches!(err, StreamError::StreamUnavailable { .. }));
    }
}
