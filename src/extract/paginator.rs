//! Cursor pagination over one partition.
//!
//! # Overview
//!
//! A [`CursorPaginator`] owns everything that changes while a partition is
//! read: the cursor, the [`RateBudget`] and, in monthly-chunking mode, the
//! start of the current chunk. Each call to [`CursorPaginator::next_page`]:
//!
//! 1. sleeps if the budget is below its safety margin
//! 2. rebuilds the query variables from the current state
//! 3. sends the request, retrying transient failures with backoff and a
//!    budget reset per retry
//! 4. records the response cost and returns the page's nodes
//!
//! A cursor returned twice in a row is fatal ([`ExtractError::PaginationLoop`]).
//!
//! Non-connection streams (`shop`, a single object by id) complete in one
//! request.

use std::sync::Arc;

use chrono::{DateTime, Months, Utc};
use serde_json::Value;

use crate::clients::{GraphqlClient, GraphqlError, GraphqlResponse, QueryCost};
use crate::config::ExtractConfig;
use crate::extract::partition::Partition;
use crate::extract::query;
use crate::extract::rate_budget::RateBudget;
use crate::extract::retry::RetryDecision;
use crate::extract::stream::StreamDefinition;
use crate::extract::{ExtractError, Record};

/// Where a paginator is in its partition.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PaginatorState {
    /// More pages (or chunks) remain.
    Fetching,
    /// Every page has been returned.
    Done,
}

/// One decoded page of a connection.
#[derive(Clone, Debug, PartialEq)]
pub struct Page {
    /// The page's nodes, in provider order.
    pub records: Vec<Record>,
    /// `pageInfo.hasNextPage`.
    pub has_next_page: bool,
    /// Cursor of the last edge (falls back to `pageInfo.endCursor`).
    pub end_cursor: Option<String>,
}

impl Page {
    /// Decodes `data.<query_name>` of a connection response.
    ///
    /// # Errors
    ///
    /// Returns [`GraphqlError::MalformedResponse`] if the connection is missing
    /// or a node is not an object.
    pub fn from_response(response: &GraphqlResponse, query_name: &str) -> Result<Self, GraphqlError> {
        let malformed = |reason: String| GraphqlError::MalformedResponse {
            reason,
            response: response.body.clone(),
        };

        let connection = response
            .data
            .get(query_name)
            .filter(|connection| connection.is_object())
            .ok_or_else(|| malformed(format!("missing connection `{query_name}`")))?;

        let edges = connection
            .get("edges")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();

        let mut records = Vec::with_capacity(edges.len());
        for edge in edges {
            match edge.get("node") {
                Some(Value::Object(node)) => records.push(node.clone()),
                _ => return Err(malformed(format!("edge of `{query_name}` has no node object"))),
            }
        }

        let page_info = connection.get("pageInfo");
        let has_next_page = page_info
            .and_then(|info| info.get("hasNextPage"))
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let end_cursor = edges
            .last()
            .and_then(|edge| edge.get("cursor"))
            .or_else(|| page_info.and_then(|info| info.get("endCursor")))
            .and_then(Value::as_str)
            .map(String::from);

        Ok(Self {
            records,
            has_next_page,
            end_cursor,
        })
    }
}

/// Paginates one partition of one stream.
#[derive(Debug)]
pub struct CursorPaginator {
    client: GraphqlClient,
    stream: Arc<StreamDefinition>,
    config: Arc<ExtractConfig>,
    partition: Partition,
    budget: RateBudget,
    cursor: Option<String>,
    chunk_start: DateTime<Utc>,
    state: PaginatorState,
    pages: u64,
}

impl CursorPaginator {
    /// Creates a paginator starting at `partition.cursor`.
    #[must_use]
    pub fn new(
        client: GraphqlClient,
        stream: Arc<StreamDefinition>,
        config: Arc<ExtractConfig>,
        partition: Partition,
    ) -> Self {
        let budget = RateBudget::new(config.max_page_size(), config.max_safe_points());
        Self {
            client,
            cursor: partition.cursor.clone(),
            chunk_start: partition.start,
            stream,
            config,
            partition,
            budget,
            state: PaginatorState::Fetching,
            pages: 0,
        }
    }

    /// Where the paginator is in its state machine.
    #[must_use]
    pub const fn state(&self) -> PaginatorState {
        self.state
    }

    /// The cursor the next request will send.
    #[must_use]
    pub fn cursor(&self) -> Option<&str> {
        self.cursor.as_deref()
    }

    /// The budget sizing the next page.
    #[must_use]
    pub const fn budget(&self) -> &RateBudget {
        &self.budget
    }

    /// The partition this paginator covers.
    #[must_use]
    pub const fn partition(&self) -> &Partition {
        &self.partition
    }

    /// Fetches the next page, or returns `None` once the partition is exhausted.
    ///
    /// # Errors
    ///
    /// Returns [`ExtractError::PaginationLoop`] on a repeated cursor, and
    /// [`ExtractError::Graphql`]/[`ExtractError::RetriesExhausted`] when the
    /// request fails.
    pub async fn next_page(&mut self) -> Result<Option<Vec<Record>>, ExtractError> {
        if self.state == PaginatorState::Done {
            return Ok(None);
        }
        if let Some((document, variables)) = query::single_query(&self.stream) {
            return self.fetch_single(&document, variables).await.map(Some);
        }

        let document = query::connection_query(&self.stream);
        let (chunk_end, last_chunk) = self.chunk_end();
        let filter = self
            .stream
            .replication_key()
            .map(|key| query::window_filter(key, self.chunk_start, chunk_end));
        let sent_cursor = self.cursor.clone();

        let response = self
            .execute(&document, |first| {
                Some(query::page_variables(
                    first,
                    sent_cursor.as_deref(),
                    filter.as_deref(),
                ))
            })
            .await?;
        let page = Page::from_response(&response, self.stream.query_name())?;
        self.pages += 1;

        tracing::debug!(
            stream = self.stream.name(),
            partition = self.partition.index,
            page = self.pages,
            records = page.records.len(),
            has_next_page = page.has_next_page,
            "Received page"
        );

        if page.has_next_page {
            match page.end_cursor {
                Some(next) if sent_cursor.as_deref() == Some(next.as_str()) => {
                    return Err(ExtractError::PaginationLoop { cursor: next });
                }
                Some(next) => self.cursor = Some(next),
                None => {
                    return Err(GraphqlError::MalformedResponse {
                        reason: "hasNextPage is true but no cursor was returned".to_string(),
                        response: response.body,
                    }
                    .into())
                }
            }
        } else if !last_chunk {
            if let Some(next_start) = chunk_end {
                tracing::debug!(
                    stream = self.stream.name(),
                    partition = self.partition.index,
                    chunk_start = %next_start,
                    "Advancing to next monthly chunk"
                );
                self.chunk_start = next_start;
                self.cursor = None;
                self.budget.recalibrate();
            }
        } else {
            self.state = PaginatorState::Done;
        }

        Ok(Some(page.records))
    }

    /// Fetches every remaining page.
    ///
    /// # Errors
    ///
    /// Same as [`CursorPaginator::next_page`].
    pub async fn collect(mut self) -> Result<Vec<Record>, ExtractError> {
        let mut records = Vec::new();
        while let Some(page) = self.next_page().await? {
            records.extend(page);
        }
        Ok(records)
    }

    async fn fetch_single(&mut self, document: &str, variables: Value) -> Result<Vec<Record>, ExtractError> {
        let response = self
            .execute(document, |_| Some(variables.clone()))
            .await?;
        self.state = PaginatorState::Done;

        match response.data.get(self.stream.query_name()) {
            Some(Value::Object(record)) => Ok(vec![record.clone()]),
            Some(Value::Null) | None => Ok(Vec::new()),
            Some(_) => Err(GraphqlError::MalformedResponse {
                reason: format!("`{}` is not an object", self.stream.query_name()),
                response: response.body,
            }
            .into()),
        }
    }

    /// End bound of the current chunk and whether it is the last one.
    fn chunk_end(&self) -> (Option<DateTime<Utc>>, bool) {
        if !self.config.monthly_chunking() || self.stream.replication_key().is_none() {
            return (self.partition.end, true);
        }

        let next = self.chunk_start.checked_add_months(Months::new(1));
        match (next, self.partition.end) {
            (Some(next), Some(end)) if next < end => (Some(next), false),
            (_, Some(end)) => (Some(end), true),
            (Some(next), None) if next < Utc::now() => (Some(next), false),
            (_, None) => (None, true),
        }
    }

    /// Sends one request with budget pacing and retries.
    ///
    /// `variables` is called with the page size for each attempt, since a
    /// retry resets the budget and shrinks the page.
    async fn execute<F>(&mut self, document: &str, variables: F) -> Result<GraphqlResponse, ExtractError>
    where
        F: Fn(u32) -> Option<Value>,
    {
        let mut attempt = 1;
        loop {
            let wait = self.budget.should_wait_for();
            if !wait.is_zero() {
                tracing::debug!(
                    stream = self.stream.name(),
                    wait_secs = wait.as_secs_f64(),
                    "Waiting for rate budget to replenish"
                );
                tokio::time::sleep(wait).await;
                self.budget.replenish(wait);
            }

            let first = self.budget.next_page_size();
            tracing::debug!(
                stream = self.stream.name(),
                partition = self.partition.index,
                first,
                cursor = self.cursor.as_deref().unwrap_or("-"),
                "Requesting page"
            );

            let error = match self.client.query(document, variables(first)).await {
                Ok(response) => {
                    if let Some(cost) = &response.cost {
                        self.budget.observe(cost);
                    }
                    return Ok(response);
                }
                Err(error) => error,
            };

            if let Some(cost) = error.response().and_then(QueryCost::from_body) {
                self.budget.observe(&cost);
            }
            if error.is_throttled() {
                self.budget.reset();
            }

            match self.config.retry().decide(&error, attempt) {
                RetryDecision::Retry(wait) => {
                    tracing::warn!(
                        stream = self.stream.name(),
                        partition = self.partition.index,
                        attempt,
                        wait_secs = wait.as_secs_f64(),
                        %error,
                        "Transient error, retrying"
                    );
                    self.budget.reset();
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
                RetryDecision::Exhausted => {
                    return Err(ExtractError::RetriesExhausted {
                        tries: attempt,
                        source: error,
                    })
                }
                RetryDecision::Fatal => return Err(error.into()),
            }
        }
    }
}
