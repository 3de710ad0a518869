//! Error type for extraction runs.
//!
//! Every fatal condition keeps the provider payload it was raised from, so a
//! host can log the error alone and still see what Shopify returned.

use std::time::Duration;

use thiserror::Error;

use crate::clients::GraphqlError;

/// Errors produced by the extraction engine.
///
/// Transient failures never reach the host directly; they are retried and
/// only surface wrapped in [`ExtractError::RetriesExhausted`].
#[derive(Debug, Error)]
pub enum ExtractError {
    /// A non-retriable GraphQL or transport error.
    #[error(transparent)]
    Graphql(#[from] GraphqlError),

    /// A transient error persisted through every allowed attempt.
    #[error("Giving up after {tries} attempts: {source}")]
    RetriesExhausted {
        /// Attempts made, including the first.
        tries: u32,
        /// The error returned by the final attempt.
        source: GraphqlError,
    },

    /// The provider returned the cursor that was just sent.
    #[error("Pagination loop detected: cursor {cursor} was returned twice in a row")]
    PaginationLoop {
        /// The repeated cursor.
        cursor: String,
    },

    /// The bulk mutation returned user errors or no operation id.
    #[error("Bulk operation could not be submitted: {message}")]
    BulkSubmitFailed {
        /// Summary of what went wrong.
        message: String,
        /// The raw mutation response.
        response: serde_json::Value,
    },

    /// A poll reported a different bulk operation than the one submitted.
    #[error("Bulk operation {found} is running instead of {expected}; another process is using the bulk slot")]
    BulkJobConflict {
        /// Id returned by the submit mutation.
        expected: String,
        /// Id returned by the poll.
        found: String,
        /// The raw poll response.
        response: serde_json::Value,
    },

    /// The bulk operation finished in `FAILED`.
    #[error("Bulk operation {id} failed with error code {}", .error_code.as_deref().unwrap_or("UNKNOWN"))]
    BulkJobFailed {
        /// Operation id.
        id: String,
        /// Provider error code (`ACCESS_DENIED`, `INTERNAL_SERVER_ERROR`, `TIMEOUT`).
        error_code: Option<String>,
        /// The raw poll response.
        response: serde_json::Value,
    },

    /// The bulk operation was canceled or expired before completing.
    #[error("Bulk operation {id} ended with status {status}")]
    BulkJobCanceled {
        /// Operation id.
        id: String,
        /// Terminal status reported by the provider.
        status: String,
        /// The raw poll response.
        response: serde_json::Value,
    },

    /// Polling did not observe a terminal status within the configured timeout.
    #[error("Bulk operation {id} did not finish within {waited:?}")]
    BulkTimeout {
        /// Operation id.
        id: String,
        /// Time spent polling.
        waited: Duration,
    },

    /// A bulk result line referenced a parent that was never emitted.
    #[error("Bulk result line has no parent record before it: {line}")]
    OrphanChild {
        /// The offending line.
        line: String,
    },

    /// A bulk result line was not a UTF-8 JSON object.
    #[error("Invalid bulk result line: {line}")]
    InvalidBulkLine {
        /// The offending line.
        line: String,
        /// The parse failure; `None` for a non-object or non-UTF-8 line.
        #[source]
        source: Option<serde_json::Error>,
    },

    /// A record had no replication key value under the `Reject` policy.
    #[error("Record is missing replication key {key}: {record}")]
    MissingReplicationKey {
        /// The replication key.
        key: String,
        /// The record as received.
        record: serde_json::Value,
    },

    /// A partition worker stopped without reporting completion.
    #[error("Partition worker {partition} exited without reporting a result")]
    WorkerAborted {
        /// Index of the partition (or of the first one still outstanding).
        partition: usize,
    },
}

impl ExtractError {
    /// Returns the raw provider payload attached to this error, if any.
    #[must_use]
    pub fn response(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Graphql(error) | Self::RetriesExhausted { source: error, .. } => {
                error.response()
            }
            Self::BulkSubmitFailed { response, .. }
            | Self::BulkJobConflict { response, .. }
            | Self::BulkJobFailed { response, .. }
            | Self::BulkJobCanceled { response, .. } => Some(response),
            _ => None,
        }
    }
}
