//! # Common Types and Traits
//!
//! Service-agnostic building blocks of the change-stream engine:
//!
//! - [`ChangeRecord`] - One captured item mutation
//! - [`TableGateway`] / [`StreamGateway`] - Remote service seams
//! - [`RecordSink`] - Application callback for records
//! - [`RetryConfig`] - Fetch retry policy
//! - [`PollerMetrics`] - Per-shard counters
//! - [`StreamError`] - Error taxonomy
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                    Common Module                         │
//! ├──────────────────────────────────────────────────────────┤
//! │  TableGateway  ←─── DynamoDB / in-memory implement       │
//! │  StreamGateway ←─── DynamoDB Streams / in-memory         │
//! │  ChangeRecord  ←─── Unified record format                │
//! │  RecordSink    ←─── Logging, channel, closure sinks      │
//! │  RetryConfig   ←─── Backoff and failure budget           │
//! │  PollerMetrics ←─── Fetch / delivery counters            │
//! └──────────────────────────────────────────────────────────┘
//! ```

mod error;
mod metrics;
mod record;
mod resilience;
mod sink;
mod traits;
mod types;

pub use error::*;
pub use metrics::*;
pub use record::*;
pub use resilience::*;
pub use sink::*;
pub use traits::*;
pub use types::*;
