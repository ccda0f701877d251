//! Identifiers and gateway payloads shared by the engine and its gateways.

use serde::{Deserialize, Serialize};

use crate::common::record::{ChangeRecord, StreamViewType};

/// Identifier of a source table (name or ARN).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TableRef(String);

impl TableRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TableRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TableRef {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for TableRef {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Identifier of a table's stream (stream ARN).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StreamRef(String);

impl StreamRef {
    pub fn new(arn: impl Into<String>) -> Self {
        Self(arn.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for StreamRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque, shard-scoped read position (shard iterator).
///
/// Cursors are never shared between pollers and are compared byte for byte.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cursor(String);

impl Cursor {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }

    /// Short, log-friendly form of the token (service tokens run to hundreds of bytes).
    pub fn abbreviated(&self) -> String {
        const KEEP: usize = 24;
        if self.0.len() <= KEEP {
            self.0.clone()
        } else {
            let tail_start = self
                .0
                .char_indices()
                .map(|(i, _)| i)
                .rfind(|&i| self.0.len() - i >= KEEP)
                .unwrap_or(0);
            format!("…{}", &self.0[tail_start..])
        }
    }
}

impl std::fmt::Debug for Cursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Cursor({})", self.abbreviated())
    }
}

impl std::fmt::Display for Cursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.abbreviated())
    }
}

/// Range of sequence numbers held by a shard.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SequenceNumberRange {
    pub starting: Option<String>,
    /// Present once the shard is closed
    pub ending: Option<String>,
}

/// One partition of a stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shard {
    pub shard_id: String,
    /// Carried for diagnostics; lineage is not acted upon
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_shard_id: Option<String>,
    #[serde(default)]
    pub sequence_range: SequenceNumberRange,
}

impl Shard {
    pub fn new(shard_id: impl Into<String>) -> Self {
        Self {
            shard_id: shard_id.into(),
            parent_shard_id: None,
            sequence_range: SequenceNumberRange::default(),
        }
    }

    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parent_shard_id = Some(parent.into());
        self
    }
}

/// Outcome of describing a table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDescription {
    pub table_name: String,
    pub table_arn: Option<String>,
    /// Service status string (e.g. `ACTIVE`, `CREATING`)
    pub status: Option<String>,
    /// Latest stream of the table; `None` when streams are disabled
    pub stream_ref: Option<StreamRef>,
    pub stream_view_type: Option<StreamViewType>,
}

/// One page of a stream description.
#[derive(Debug, Clone, Default)]
pub struct ShardPage {
    pub shards: Vec<Shard>,
    /// Set when more shards remain; pass back as the exclusive start
    pub last_evaluated_shard_id: Option<String>,
}

/// Outcome of one batch fetch.
#[derive(Debug, Clone, Default)]
pub struct RecordBatch {
    pub records: Vec<ChangeRecord>,
    /// `None` signals the shard is closed and fully drained
    pub next_cursor: Option<Cursor>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cursor_abbreviation() {
        let short = Cursor::new("abc");
        assert_eq!(short.abbreviated(), "abc");

        let long = Cursor::new("x".repeat(200) + "0123456789abcdefghijklmn");
        let abbreviated = long.abbreviated();
        assert!(abbreviated.starts_with('…'));
        assert!(abbreviated.ends_with("0123456789abcdefghijklmn"));
        assert!(format!("{:?}", long).len() < 40);
    }

    #[test]
    fn test_cursor_identity() {
        let a = Cursor::new("arn:aws:dynamodb:local|shard-1|7");
        let b = Cursor::new(String::from("arn:aws:dynamodb:local|shard-1|7"));
        assert_eq!(a, b);
        assert_eq!(a.as_str().as_bytes(), b.as_str().as_bytes());
    }

    #[test]
    fn test_shard_builder() {
        let shard = Shard::new("shard-2").with_parent("shard-1");
        assert_eq!(shard.shard_id, "shard-2");
        assert_eq!(shard.parent_shard_id.as_deref(), Some("shard-1"));
    }
}
