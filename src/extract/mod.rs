//! Record extraction from the Admin GraphQL API.
//!
//! # Overview
//!
//! This module turns a [`StreamDefinition`] and a [`ReplicationWindow`] into
//! records:
//!
//! - [`RateBudget`]: page size and request pacing from the cost extension
//! - [`RetryPolicy`]: transient/fatal classification and exponential backoff
//! - [`CursorPaginator`]: pagination of one partition with loop detection
//! - [`PartitionPlanner`] and [`ConcurrentFetcher`]: split a window and fetch
//!   the pieces on separate tasks
//! - [`BulkJobEngine`]: submit, poll and download a bulk operation
//! - [`ExtractionEngine`]: the host-facing entry point
//!
//! # Example
//!
//! ```rust
//! use shopify_extract::extract::{RateBudget, RetryPolicy, StreamDefinition};
//!
//! let stream = StreamDefinition::connection("products", "id title updatedAt")
//!     .with_replication_key("updatedAt");
//! assert!(stream.is_connection());
//!
//! // Nothing is known before the first response, so the first page is tiny.
//! let budget = RateBudget::default();
//! assert_eq!(budget.next_page_size(), 1);
//!
//! let policy = RetryPolicy::default();
//! assert_eq!(policy.max_tries(), 8);
//! ```

mod bookmark;
mod bulk;
mod concurrent;
mod engine;
mod errors;
pub mod nesting;
mod paginator;
mod partition;
pub mod query;
mod rate_budget;
mod retry;
mod stream;

/// One extracted record.
pub type Record = serde_json::Map<String, serde_json::Value>;

pub use bookmark::{BookmarkTracker, MissingKeyPolicy, ResumeCursor};
pub use bulk::{BulkJob, BulkJobEngine, BulkStatus};
pub use concurrent::{ConcurrentFetcher, RecordStream, WorkerMessage};
pub use engine::{BulkStrategy, CursorStrategy, ExtractionEngine, ExtractionStrategy, FetchOutput};
pub use errors::ExtractError;
pub use nesting::{BulkRecords, NestingReconstructor};
pub use paginator::{CursorPaginator, Page, PaginatorState};
pub use partition::{partition_count, split_window, Partition, PartitionPlanner, ReplicationWindow};
pub use rate_budget::RateBudget;
pub use retry::{is_transient, retry, RetryDecision, RetryPolicy};
pub use stream::{QueryShape, StreamDefinition};
