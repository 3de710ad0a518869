//! Splitting a replication window into concurrently fetched partitions.
//!
//! # Overview
//!
//! [`PartitionPlanner::plan`] decides how many partitions a window is worth:
//!
//! 1. With concurrency disabled (or for streams that cannot be windowed) the
//!    whole window is one partition and no request is made.
//! 2. Otherwise a probe query reads the bucket size and allows one partition
//!    per `per_partition_budget` points, up to `max_concurrency`.
//! 3. With a sort key configured, the earliest record is looked up so that no
//!    partition is planned over a stretch with no data.
//! 4. `[start, end or now)` is cut into equal sub-windows. The last one keeps
//!    the window's own end, so an open window stays open.

use std::sync::Arc;

use chrono::{DateTime, Duration as TimeDelta, Utc};
use serde_json::Value;

use crate::clients::GraphqlClient;
use crate::config::ExtractConfig;
use crate::extract::query::{self, SHOP_PROBE_QUERY};
use crate::extract::retry::retry;
use crate::extract::stream::StreamDefinition;
use crate::extract::ExtractError;

/// The time range a fetch covers, supplied by the host.
///
/// Streams without a replication key ignore it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReplicationWindow {
    /// Inclusive lower bound.
    pub start: DateTime<Utc>,
    /// Exclusive upper bound; `None` keeps extending to the present.
    pub end: Option<DateTime<Utc>>,
}

impl ReplicationWindow {
    /// An open window starting at `start`.
    #[must_use]
    pub const fn since(start: DateTime<Utc>) -> Self {
        Self { start, end: None }
    }

    /// A closed window `[start, end)`.
    #[must_use]
    pub const fn between(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            start,
            end: Some(end),
        }
    }
}

/// One sub-window, fetched by its own paginator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Partition {
    /// Position in the plan, from 0.
    pub index: usize,
    /// Inclusive lower bound.
    pub start: DateTime<Utc>,
    /// Exclusive upper bound; `None` only on the last partition of an open window.
    pub end: Option<DateTime<Utc>>,
    /// Cursor to resume from within the partition.
    pub cursor: Option<String>,
}

impl Partition {
    /// A single partition covering `window`.
    #[must_use]
    pub const fn whole(window: &ReplicationWindow) -> Self {
        Self {
            index: 0,
            start: window.start,
            end: window.end,
            cursor: None,
        }
    }
}

/// Number of partitions a bucket of `max_budget` points can sustain.
#[must_use]
pub fn partition_count(max_budget: f64, per_partition_budget: f64, max_concurrency: usize) -> usize {
    let ceiling = max_concurrency.max(1);
    if !(max_budget.is_finite() && per_partition_budget > 0.0) {
        return 1;
    }
    let count = (max_budget / per_partition_budget).floor();
    if count < 1.0 {
        1
    } else if count >= ceiling as f64 {
        ceiling
    } else {
        // Between 1 and ceiling.
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let count = count as usize;
        count
    }
}

/// Cuts `[start, end or now)` into `count` contiguous partitions.
///
/// Every partition but the last ends where the next begins; the last takes
/// `end` unchanged.
#[must_use]
pub fn split_window(
    start: DateTime<Utc>,
    end: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    count: usize,
) -> Vec<Partition> {
    let bound = end.unwrap_or(now);
    let count = i32::try_from(count).unwrap_or(i32::MAX).max(1);
    if count == 1 || bound <= start {
        return vec![Partition::whole(&ReplicationWindow { start, end })];
    }

    let step: TimeDelta = (bound - start) / count;
    (0..count)
        .map(|i| Partition {
            index: usize::try_from(i).unwrap_or_default(),
            start: start + step * i,
            end: if i == count - 1 {
                end
            } else {
                Some(start + step * (i + 1))
            },
            cursor: None,
        })
        .collect()
}

/// Plans partitions for one stream.
#[derive(Clone, Debug)]
pub struct PartitionPlanner {
    client: GraphqlClient,
    stream: Arc<StreamDefinition>,
    config: Arc<ExtractConfig>,
}

impl PartitionPlanner {
    /// Creates a planner for `stream`.
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

    /// Plans the partitions for `window`.
    ///
    /// # Errors
    ///
    /// Returns an [`ExtractError`] if the probe or earliest-record query fails
    /// after retries.
    pub async fn plan(&self, window: &ReplicationWindow) -> Result<Vec<Partition>, ExtractError> {
        let Some(replication_key) = self.stream.replication_key() else {
            return Ok(vec![Partition::whole(window)]);
        };
        if !self.config.apply_concurrency() || !self.stream.is_connection() {
            return Ok(vec![Partition::whole(window)]);
        }

        let max_budget = self.probe_max_budget().await?;
        let count = max_budget.map_or(1, |max| {
            partition_count(
                max,
                self.config.per_partition_budget(),
                self.config.max_concurrency(),
            )
        });
        if count == 1 {
            tracing::info!(stream = self.stream.name(), ?max_budget, "Planned a single partition");
            return Ok(vec![Partition::whole(window)]);
        }

        let mut start = window.start;
        if let Some(sort_key) = self.config.sort_key() {
            match self.earliest_key(window, sort_key, replication_key).await? {
                Some(earliest) => start = start.max(earliest),
                None => {
                    tracing::info!(
                        stream = self.stream.name(),
                        "No records in window, planned a single partition"
                    );
                    return Ok(vec![Partition::whole(window)]);
                }
            }
        }

        let partitions = split_window(start, window.end, Utc::now(), count);
        tracing::info!(
            stream = self.stream.name(),
            partitions = partitions.len(),
            start = %start,
            "Planned partitions"
        );
        Ok(partitions)
    }

    async fn probe_max_budget(&self) -> Result<Option<f64>, ExtractError> {
        let response = retry(self.config.retry(), "budget probe", || {
            self.client.query(SHOP_PROBE_QUERY, None)
        })
        .await?;

        let max = response
            .cost
            .map(|cost| cost.throttle_status.maximum_available);
        if max.is_none() {
            tracing::warn!(
                stream = self.stream.name(),
                "Probe response carried no cost information"
            );
        }
        Ok(max)
    }

    async fn earliest_key(
        &self,
        window: &ReplicationWindow,
        sort_key: &str,
        replication_key: &str,
    ) -> Result<Option<DateTime<Utc>>, ExtractError> {
        let document = query::earliest_record_query(&self.stream, sort_key, replication_key);
        let filter = query::window_filter(replication_key, window.start, window.end);
        let variables = serde_json::json!({ "filter": filter });

        let response = retry(self.config.retry(), "earliest record", || {
            self.client.query(&document, Some(variables.clone()))
        })
        .await?;

        let earliest = response
            .data
            .get(self.stream.query_name())
            .and_then(|connection| connection.pointer("/edges/0/node"))
            .and_then(|node| node.get(replication_key))
            .and_then(Value::as_str)
            .and_then(|value| DateTime::parse_from_rfc3339(value).ok())
            .map(|at| at.with_timezone(&Utc));
        Ok(earliest)
    }
}
