//! Bulk operations: submit, poll, download.
//!
//! # Overview
//!
//! A bulk export runs server side. [`BulkJobEngine`] submits the
//! `bulkOperationRunQuery` mutation, polls `currentBulkOperation` until the
//! job reaches a terminal status and then streams the JSONL result through
//! [`BulkRecords`].
//!
//! Only one bulk query may run per shop. If a poll reports an operation other
//! than the one submitted, some other process took the slot and the run fails
//! with [`ExtractError::BulkJobConflict`].

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Deserializer};
use serde_json::Value;
use tokio::time::Instant;

use crate::clients::{GraphqlClient, GraphqlError};
use crate::config::ExtractConfig;
use crate::extract::concurrent::RecordSink;
use crate::extract::nesting::{BulkRecords, LineReader, NestingReconstructor};
use crate::extract::partition::ReplicationWindow;
use crate::extract::query::{self, CURRENT_BULK_OPERATION_QUERY};
use crate::extract::retry::retry;
use crate::extract::stream::StreamDefinition;
use crate::extract::ExtractError;

/// Status of a bulk operation as reported by the provider.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BulkStatus {
    /// Accepted, not yet started.
    Created,
    /// Writing results.
    Running,
    /// Result file ready.
    Completed,
    /// Stopped with an error code.
    Failed,
    /// Cancellation requested.
    Canceling,
    /// Canceled.
    Canceled,
    /// Result file no longer available.
    Expired,
    /// A status this crate does not know about; treated as still running.
    #[serde(other)]
    Unknown,
}

impl BulkStatus {
    /// Returns the provider's spelling of the status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "CREATED",
            Self::Running => "RUNNING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Canceling => "CANCELING",
            Self::Canceled => "CANCELED",
            Self::Expired => "EXPIRED",
            Self::Unknown => "UNKNOWN",
        }
    }

    /// Whether polling should stop at this status.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Canceling | Self::Canceled | Self::Expired
        )
    }
}

impl fmt::Display for BulkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A bulk operation as returned by the submit mutation or a poll.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkJob {
    /// Global id of the operation.
    pub id: String,
    /// Status at the time of the response.
    pub status: BulkStatus,
    /// Provider error code once the job has failed.
    #[serde(default)]
    pub error_code: Option<String>,
    /// Number of objects written so far. The API sends this as a string.
    #[serde(default, deserialize_with = "lenient_u64")]
    pub object_count: Option<u64>,
    /// Size of the result file in bytes.
    #[serde(default, deserialize_with = "lenient_u64")]
    pub file_size: Option<u64>,
    /// Result file; `None` when the job produced no objects.
    #[serde(default)]
    pub url: Option<String>,
    /// Partial result file of a failed job.
    #[serde(default)]
    pub partial_data_url: Option<String>,
}

fn lenient_u64<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Number(n)) => n.as_u64(),
        Some(Value::String(s)) => s.parse().ok(),
        _ => None,
    })
}

/// Runs one bulk export for a stream.
#[derive(Clone, Debug)]
pub struct BulkJobEngine {
    client: GraphqlClient,
    stream: Arc<StreamDefinition>,
    config: Arc<ExtractConfig>,
}

impl BulkJobEngine {
    /// Creates an engine for `stream`.
    #[must_use]
    pub fn new(
        client: GraphqlClient,
        stream: Arc<StreamDefinition>,
        config: Arc<ExtractConfig>,
    ) -> Self {
        Self {
            client,
            stream,
            config,
        }
    }

    /// Submits the bulk query, optionally restricted by a search filter.
    ///
    /// # Errors
    ///
    /// Returns [`ExtractError::BulkSubmitFailed`] when the mutation reports
    /// `userErrors` or returns no operation.
    ///
    /// The mutation is not idempotent: an attempt that failed transiently may
    /// still have started the job. When a retried submit is refused with
    /// `userErrors`, the running operation is adopted instead.
    pub async fn submit(&self, filter: Option<&str>) -> Result<BulkJob, ExtractError> {
        let mutation = query::bulk_run_mutation(&self.stream, filter);
        let mut attempts = 0_u32;
        let response = retry(self.config.retry(), "bulk submit", || {
            attempts += 1;
            self.client.query(&mutation, None)
        })
        .await?;

        let payload = &response.data["bulkOperationRunQuery"];
        if let Some(errors) = payload["userErrors"].as_array().filter(|e| !e.is_empty()) {
            let message = errors
                .iter()
                .filter_map(|error| error["message"].as_str())
                .collect::<Vec<_>>()
                .join("; ");
            if attempts > 1 {
                if let Some(job) = self.running_operation().await? {
                    tracing::warn!(
                        stream = self.stream.name(),
                        id = %job.id,
                        attempts,
                        user_errors = %message,
                        "Retried bulk submit was refused, adopting the running operation"
                    );
                    return Ok(job);
                }
            }
            return Err(ExtractError::BulkSubmitFailed {
                message,
                response: response.body,
            });
        }

        let job = payload
            .get("bulkOperation")
            .filter(|operation| !operation.is_null())
            .and_then(|operation| serde_json::from_value::<BulkJob>(operation.clone()).ok());
        match job {
            Some(job) => {
                tracing::info!(
                    stream = self.stream.name(),
                    id = %job.id,
                    filter = filter.unwrap_or("-"),
                    "Submitted bulk operation"
                );
                Ok(job)
            }
            None => Err(ExtractError::BulkSubmitFailed {
                message: "no bulk operation id was returned".to_string(),
                response: response.body,
            }),
        }
    }

    /// The shop's current bulk operation, if it is still created or running.
    async fn running_operation(&self) -> Result<Option<BulkJob>, ExtractError> {
        let response = retry(self.config.retry(), "bulk current", || {
            self.client.query(CURRENT_BULK_OPERATION_QUERY, None)
        })
        .await?;
        Ok(response
            .data
            .get("currentBulkOperation")
            .filter(|current| !current.is_null())
            .and_then(|current| serde_json::from_value::<BulkJob>(current.clone()).ok())
            .filter(|job| matches!(job.status, BulkStatus::Created | BulkStatus::Running)))
    }

    /// Polls until `job` completes.
    ///
    /// # Errors
    ///
    /// - [`ExtractError::BulkJobConflict`] if another operation holds the slot
    /// - [`ExtractError::BulkJobFailed`] for `FAILED`
    /// - [`ExtractError::BulkJobCanceled`] for `CANCELING`, `CANCELED` and `EXPIRED`
    /// - [`ExtractError::BulkTimeout`] when `poll_timeout` elapses first,
    ///   including time spent retrying failed polls
    pub async fn poll(&self, job: &BulkJob) -> Result<BulkJob, ExtractError> {
        let started = Instant::now();
        let deadline = started + self.config.poll_timeout();
        match tokio::time::timeout_at(deadline, self.poll_until_terminal(job, started)).await {
            Ok(result) => result,
            Err(_) => Err(ExtractError::BulkTimeout {
                id: job.id.clone(),
                waited: started.elapsed(),
            }),
        }
    }

    async fn poll_until_terminal(
        &self,
        job: &BulkJob,
        started: Instant,
    ) -> Result<BulkJob, ExtractError> {
        loop {
            let response = retry(self.config.retry(), "bulk poll", || {
                self.client.query(CURRENT_BULK_OPERATION_QUERY, None)
            })
            .await?;

            let current = match response
                .data
                .get("currentBulkOperation")
                .filter(|current| !current.is_null())
            {
                Some(current) => serde_json::from_value::<BulkJob>(current.clone()).map_err(|e| {
                    GraphqlError::MalformedResponse {
                        reason: format!("invalid currentBulkOperation: {e}"),
                        response: response.body.clone(),
                    }
                })?,
                None => {
                    return Err(ExtractError::BulkJobConflict {
                        expected: job.id.clone(),
                        found: "none".to_string(),
                        response: response.body,
                    })
                }
            };

            if current.id != job.id {
                return Err(ExtractError::BulkJobConflict {
                    expected: job.id.clone(),
                    found: current.id,
                    response: response.body,
                });
            }

            match current.status {
                BulkStatus::Completed => {
                    tracing::info!(
                        stream = self.stream.name(),
                        id = %current.id,
                        object_count = current.object_count,
                        file_size = current.file_size,
                        "Bulk operation completed"
                    );
                    return Ok(current);
                }
                BulkStatus::Failed => {
                    return Err(ExtractError::BulkJobFailed {
                        id: current.id,
                        error_code: current.error_code,
                        response: response.body,
                    })
                }
                BulkStatus::Canceling | BulkStatus::Canceled | BulkStatus::Expired => {
                    return Err(ExtractError::BulkJobCanceled {
                        id: current.id,
                        status: current.status.to_string(),
                        response: response.body,
                    })
                }
                BulkStatus::Unknown => tracing::warn!(
                    id = %current.id,
                    status = %response.data["currentBulkOperation"]["status"],
                    "Unrecognised bulk status, continuing to poll"
                ),
                BulkStatus::Created | BulkStatus::Running => tracing::debug!(
                    id = %current.id,
                    status = %current.status,
                    object_count = current.object_count,
                    "Bulk operation in progress"
                ),
            }

            let waited = started.elapsed();
            if waited >= self.config.poll_timeout() {
                return Err(ExtractError::BulkTimeout {
                    id: current.id,
                    waited,
                });
            }
            tokio::time::sleep(self.config.poll_interval()).await;
        }
    }

    /// Opens the result file of a completed job.
    ///
    /// Returns `None` when the job has no result file.
    ///
    /// # Errors
    ///
    /// Returns an [`ExtractError`] if the download cannot be started.
    pub async fn download(&self, job: &BulkJob) -> Result<Option<BulkRecords>, ExtractError> {
        let Some(url) = job.url.as_deref() else {
            tracing::info!(
                stream = self.stream.name(),
                id = %job.id,
                "Bulk operation produced no result file"
            );
            return Ok(None);
        };

        let transport = self.client.transport();
        let source = retry(self.config.retry(), "bulk download", || async move {
            transport.download(url).await.map_err(GraphqlError::from)
        })
        .await?;

        Ok(Some(BulkRecords::new(
            LineReader::new(source),
            NestingReconstructor::new(Arc::clone(&self.stream)),
        )))
    }

    /// Submits, polls and opens the result for `window`.
    ///
    /// # Errors
    ///
    /// Any error of [`submit`](Self::submit), [`poll`](Self::poll) or
    /// [`download`](Self::download).
    pub async fn run(&self, window: &ReplicationWindow) -> Result<Option<BulkRecords>, ExtractError> {
        let filter = self
            .stream
            .replication_key()
            .map(|key| query::window_filter(key, window.start, window.end));

        let submitted = self.submit(filter.as_deref()).await?;
        let completed = self.poll(&submitted).await?;
        self.download(&completed).await
    }

    /// Runs the export and forwards every record into `sink`.
    pub(crate) async fn run_into(self, window: ReplicationWindow, sink: RecordSink) {
        let result = async {
            let Some(mut records) = self.run(&window).await? else {
                return Ok(());
            };
            while let Some(record) = records.next().await? {
                if !sink.record(record).await {
                    tracing::debug!(stream = self.stream.name(), "Consumer gone, stopping bulk read");
                    break;
                }
            }
            Ok::<_, ExtractError>(())
        }
        .await;

        match result {
            Ok(()) => sink.done().await,
            Err(error) => sink.failed(error).await,
        }
    }
}
