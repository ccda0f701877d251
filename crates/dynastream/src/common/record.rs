//! Change record representation
//!
//! A [`ChangeRecord`] is one captured mutation of a table item. Which images it
//! carries depends on the stream's [`StreamViewType`]:
//!
//! | View type | keys | new image | old image |
//! |-----------|------|-----------|-----------|
//! | `KEYS_ONLY` | yes | - | - |
//! | `NEW_IMAGE` | yes | INSERT/MODIFY | - |
//! | `OLD_IMAGE` | yes | - | MODIFY/REMOVE |
//! | `NEW_AND_OLD_IMAGES` | yes | INSERT/MODIFY | MODIFY/REMOVE |

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;

use crate::common::{Result, StreamError};

/// An item: attribute name to typed value.
pub type Item = HashMap<String, AttributeValue>;

/// Typed attribute value, serialized in the service's wire JSON shape
/// (`{"S": "..."}`, `{"N": "42"}`, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttributeValue {
    #[serde(rename = "S")]
    S(String),
    /// Numbers travel as strings to keep arbitrary precision
    #[serde(rename = "N")]
    N(String),
    #[serde(rename = "B", with = "b64")]
    B(Vec<u8>),
    #[serde(rename = "BOOL")]
    Bool(bool),
    #[serde(rename = "NULL")]
    Null(bool),
    #[serde(rename = "M")]
    M(HashMap<String, AttributeValue>),
    #[serde(rename = "L")]
    L(Vec<AttributeValue>),
    #[serde(rename = "SS")]
    Ss(Vec<String>),
    #[serde(rename = "NS")]
    Ns(Vec<String>),
    #[serde(rename = "BS", with = "b64_set")]
    Bs(Vec<Vec<u8>>),
}

impl AttributeValue {
    /// String value, if this is an `S`.
    pub fn as_s(&self) -> Option<&str> {
        match self {
            Self::S(s) => Some(s),
            _ => None,
        }
    }

    /// Number value, if this is an `N`.
    pub fn as_n(&self) -> Option<&str> {
        match self {
            Self::N(n) => Some(n),
            _ => None,
        }
    }

    /// Plain JSON rendering (no type tags). Binary data is base64-encoded.
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value;
        match self {
            Self::S(s) => Value::String(s.clone()),
            Self::N(n) => number_to_json(n),
            Self::B(b) => Value::String(BASE64.encode(b)),
            Self::Bool(b) => Value::Bool(*b),
            Self::Null(_) => Value::Null,
            Self::M(m) => Value::Object(
                m.iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
            Self::L(l) => Value::Array(l.iter().map(Self::to_json).collect()),
            Self::Ss(ss) => Value::Array(ss.iter().cloned().map(Value::String).collect()),
            Self::Ns(ns) => Value::Array(ns.iter().map(|n| number_to_json(n)).collect()),
            Self::Bs(bs) => Value::Array(
                bs.iter()
                    .map(|b| Value::String(BASE64.encode(b)))
                    .collect(),
            ),
        }
    }

    /// Build an attribute value from plain JSON.
    ///
    /// Strings become `S`, numbers `N`, booleans `BOOL`, null `NULL`, objects
    /// `M` and arrays `L`.
    pub fn from_json(value: &serde_json::Value) -> Self {
        use serde_json::Value;
        match value {
            Value::String(s) => Self::S(s.clone()),
            Value::Number(n) => Self::N(n.to_string()),
            Value::Bool(b) => Self::Bool(*b),
            Value::Null => Self::Null(true),
            Value::Object(map) => Self::M(
                map.iter()
                    .map(|(k, v)| (k.clone(), Self::from_json(v)))
                    .collect(),
            ),
            Value::Array(items) => Self::L(items.iter().map(Self::from_json).collect()),
        }
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        Self::S(value.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        Self::S(value)
    }
}

fn number_to_json(n: &str) -> serde_json::Value {
    serde_json::from_str::<serde_json::Number>(n)
        .map(serde_json::Value::Number)
        .unwrap_or_else(|_| serde_json::Value::String(n.to_string()))
}

/// Build an [`Item`] from a JSON object.
pub fn item_from_json(value: &serde_json::Value) -> Result<Item> {
    match value {
        serde_json::Value::Object(map) => Ok(map
            .iter()
            .map(|(k, v)| (k.clone(), AttributeValue::from_json(v)))
            .collect()),
        other => Err(StreamError::config(format!(
            "item must be a JSON object, got {}",
            other
        ))),
    }
}

/// Render an [`Item`] as a plain JSON object.
pub fn item_to_json(item: &Item) -> serde_json::Value {
    serde_json::Value::Object(
        item.iter()
            .map(|(k, v)| (k.clone(), v.to_json()))
            .collect(),
    )
}

mod b64 {
    use super::BASE64;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE64.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        BASE64.decode(encoded).map_err(serde::de::Error::custom)
    }
}

mod b64_set {
    use super::BASE64;
    use base64::Engine;
    use serde::ser::SerializeSeq;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(set: &[Vec<u8>], serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(set.len()))?;
        for bytes in set {
            seq.serialize_element(&BASE64.encode(bytes))?;
        }
        seq.end()
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Vec<Vec<u8>>, D::Error> {
        Vec::<String>::deserialize(deserializer)?
            .into_iter()
            .map(|s| BASE64.decode(s).map_err(serde::de::Error::custom))
            .collect()
    }
}

/// Which item images a stream captures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StreamViewType {
    /// Only the key attributes of the modified item
    #[default]
    KeysOnly,
    /// The entire item as it appears after the change
    NewImage,
    /// The entire item as it appeared before the change
    OldImage,
    /// Both images
    NewAndOldImages,
}

impl StreamViewType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::KeysOnly => "KEYS_ONLY",
            Self::NewImage => "NEW_IMAGE",
            Self::OldImage => "OLD_IMAGE",
            Self::NewAndOldImages => "NEW_AND_OLD_IMAGES",
        }
    }

    /// Whether records carry the post-change image.
    pub fn includes_new_image(&self) -> bool {
        matches!(self, Self::NewImage | Self::NewAndOldImages)
    }

    /// Whether records carry the pre-change image.
    pub fn includes_old_image(&self) -> bool {
        matches!(self, Self::OldImage | Self::NewAndOldImages)
    }
}

impl std::fmt::Display for StreamViewType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StreamViewType {
    type Err = StreamError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().replace('-', "_").as_str() {
            "KEYS_ONLY" => Ok(Self::KeysOnly),
            "NEW_IMAGE" => Ok(Self::NewImage),
            "OLD_IMAGE" => Ok(Self::OldImage),
            "NEW_AND_OLD_IMAGES" => Ok(Self::NewAndOldImages),
            _ => Err(StreamError::config(format!(
                "unknown stream view type '{}'",
                s
            ))),
        }
    }
}

/// Mutation kind of a change record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeOp {
    /// A new item was added
    Insert,
    /// One or more attributes of an existing item changed
    Modify,
    /// The item was deleted
    Remove,
}

impl ChangeOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Insert => "INSERT",
            Self::Modify => "MODIFY",
            Self::Remove => "REMOVE",
        }
    }
}

impl std::fmt::Display for ChangeOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One captured mutation of a table item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeRecord {
    /// Service-assigned unique event id
    pub event_id: String,
    /// Mutation kind
    pub op: ChangeOp,
    /// Shard the record was read from
    pub shard_id: String,
    /// Position of the record within its shard
    pub sequence_number: String,
    /// Approximate time the change was captured (Unix epoch seconds)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approximate_creation_time: Option<i64>,
    /// Key attributes of the modified item
    pub keys: Item,
    /// Item after the change (view type permitting)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_image: Option<Item>,
    /// Item before the change (view type permitting)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_image: Option<Item>,
    /// View type the stream was configured with
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub view_type: Option<StreamViewType>,
    /// Size of the record as reported by the service
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<i64>,
}

impl ChangeRecord {
    /// Look up a key attribute.
    pub fn key(&self, name: &str) -> Option<&AttributeValue> {
        self.keys.get(name)
    }

    /// Plain JSON rendering of the key attributes.
    pub fn keys_json(&self) -> serde_json::Value {
        item_to_json(&self.keys)
    }

    /// Plain JSON rendering of the whole record.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "event_id": self.event_id,
            "op": self.op.as_str(),
            "shard_id": self.shard_id,
            "sequence_number": self.sequence_number,
            "approximate_creation_time": self.approximate_creation_time,
            "keys": self.keys_json(),
            "new_image": self.new_image.as_ref().map(item_to_json),
            "old_image": self.old_image.as_ref().map(item_to_json),
        })
    }
}
