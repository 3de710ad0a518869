//! Host entry point and extraction strategies.
//!
//! # Overview
//!
//! [`ExtractionEngine`] is what a host talks to. On every fetch it picks an
//! [`ExtractionStrategy`] from the config:
//!
//! - [`CursorStrategy`]: plan partitions, then paginate them concurrently
//! - [`BulkStrategy`]: run one bulk operation and stream its result
//!
//! Both hand back a [`RecordStream`], so the host consumes records and reads
//! the [`ResumeCursor`] the same way regardless of strategy.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use chrono::{TimeZone, Utc};
//! use shopify_extract::clients::{GraphqlClient, HttpClient};
//! use shopify_extract::extract::{ExtractionEngine, ReplicationWindow, StreamDefinition};
//! use shopify_extract::{AccessToken, ApiVersion, ExtractConfig, ShopDomain};
//!
//! let shop = ShopDomain::new("my-store")?;
//! let token = AccessToken::new("shpat_...")?;
//! let client = GraphqlClient::new(Arc::new(HttpClient::new(&shop, &token, &ApiVersion::latest())?));
//!
//! let stream = StreamDefinition::connection("orders", "id name updatedAt")
//!     .with_replication_key("updatedAt");
//! let engine = ExtractionEngine::new(client, stream, ExtractConfig::default())?;
//!
//! let output = engine
//!     .fetch(&ReplicationWindow::since(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()))
//!     .await?;
//! println!("{} records, resume from {:?}", output.records.len(), output.next_cursor);
//! ```

use std::sync::Arc;

use async_trait::async_trait;

use crate::clients::GraphqlClient;
use crate::config::ExtractConfig;
use crate::error::ConfigError;
use crate::extract::bookmark::{BookmarkTracker, ResumeCursor};
use crate::extract::bulk::BulkJobEngine;
use crate::extract::concurrent::{record_channel, ConcurrentFetcher, RecordStream};
use crate::extract::partition::{PartitionPlanner, ReplicationWindow};
use crate::extract::stream::StreamDefinition;
use crate::extract::{ExtractError, Record};

/// Records of a completed fetch plus where to resume next time.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FetchOutput {
    /// Records in arrival order.
    pub records: Vec<Record>,
    /// Highest replication-key value emitted; `None` if the stream has no key
    /// or nothing was emitted.
    pub next_cursor: Option<ResumeCursor>,
}

/// A way of turning a replication window into records.
#[async_trait]
pub trait ExtractionStrategy: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Starts extracting `window`.
    ///
    /// # Errors
    ///
    /// Returns an [`ExtractError`] if the extraction cannot be started.
    /// Failures after that arrive through the returned stream.
    async fn start(&self, window: &ReplicationWindow) -> Result<RecordStream, ExtractError>;
}

/// Paginated extraction over planned partitions.
#[derive(Clone, Debug)]
pub struct CursorStrategy {
    planner: PartitionPlanner,
    fetcher: ConcurrentFetcher,
}

impl CursorStrategy {
    /// Creates a strategy that plans partitions and paginates them.
    #[must_use]
    pub fn new(
        client: GraphqlClient,
        stream: Arc<StreamDefinition>,
        config: Arc<ExtractConfig>,
    ) -> Self {
        Self {
            planner: PartitionPlanner::new(client.clone(), Arc::clone(&stream), Arc::clone(&config)),
            fetcher: ConcurrentFetcher::new(client, stream, config),
        }
    }
}

#[async_trait]
impl ExtractionStrategy for CursorStrategy {
    fn name(&self) -> &'static str {
        "cursor"
    }

    async fn start(&self, window: &ReplicationWindow) -> Result<RecordStream, ExtractError> {
        let partitions = self.planner.plan(window).await?;
        Ok(self.fetcher.spawn(partitions))
    }
}

/// Extraction through a single bulk operation.
#[derive(Clone, Debug)]
pub struct BulkStrategy {
    engine: BulkJobEngine,
    stream: Arc<StreamDefinition>,
    config: Arc<ExtractConfig>,
}

impl BulkStrategy {
    /// Creates a strategy backed by one bulk operation.
    #[must_use]
    pub fn new(
        client: GraphqlClient,
        stream: Arc<StreamDefinition>,
        config: Arc<ExtractConfig>,
    ) -> Self {
        Self {
            engine: BulkJobEngine::new(client, Arc::clone(&stream), Arc::clone(&config)),
            stream,
            config,
        }
    }
}

#[async_trait]
impl ExtractionStrategy for BulkStrategy {
    fn name(&self) -> &'static str {
        "bulk"
    }

    async fn start(&self, window: &ReplicationWindow) -> Result<RecordStream, ExtractError> {
        let tracker = BookmarkTracker::new(
            self.stream.replication_key(),
            self.config.missing_key_policy(),
        );
        let (mut sinks, records) = record_channel(1, self.config.queue_capacity(), tracker);
        if let Some(sink) = sinks.pop() {
            tokio::spawn(self.engine.clone().run_into(*window, sink));
        }
        Ok(records)
    }
}

/// Extracts one stream for a host.
#[derive(Clone, Debug)]
pub struct ExtractionEngine {
    client: GraphqlClient,
    stream: Arc<StreamDefinition>,
    config: Arc<ExtractConfig>,
}

// Verify ExtractionEngine is Send + Sync at compile time
const _: fn() = || {
    const fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<ExtractionEngine>();
};

impl ExtractionEngine {
    /// Creates an engine for `stream`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::SortKeyWithoutReplicationKey`] when a sort key is
    /// configured for a stream without a replication key.
    pub fn new(
        client: GraphqlClient,
        stream: StreamDefinition,
        config: ExtractConfig,
    ) -> Result<Self, ConfigError> {
        if let (Some(sort_key), None) = (config.sort_key(), stream.replication_key()) {
            return Err(ConfigError::SortKeyWithoutReplicationKey {
                sort_key: sort_key.to_string(),
            });
        }
        Ok(Self {
            client,
            stream: Arc::new(stream),
            config: Arc::new(config),
        })
    }

    /// The stream this engine extracts.
    #[must_use]
    pub fn stream(&self) -> &StreamDefinition {
        &self.stream
    }

    /// The configuration this engine runs with.
    #[must_use]
    pub fn config(&self) -> &ExtractConfig {
        &self.config
    }

    /// The strategy the next fetch will use.
    ///
    /// Streams that are not connections always take the cursor path, which
    /// fetches them in one request.
    #[must_use]
    pub fn strategy(&self) -> Box<dyn ExtractionStrategy> {
        let client = self.client.clone();
        let stream = Arc::clone(&self.stream);
        let config = Arc::clone(&self.config);
        if self.config.bulk_mode() && self.stream.is_connection() {
            Box::new(BulkStrategy::new(client, stream, config))
        } else {
            Box::new(CursorStrategy::new(client, stream, config))
        }
    }

    /// Starts extracting `window` and returns the record stream.
    ///
    /// Read the stream to its end before taking
    /// [`RecordStream::resume_cursor`]; it stays `None` until then.
    ///
    /// # Errors
    ///
    /// Returns an [`ExtractError`] if partition planning fails.
    pub async fn fetch_stream(&self, window: &ReplicationWindow) -> Result<RecordStream, ExtractError> {
        let strategy = self.strategy();
        tracing::info!(
            stream = self.stream.name(),
            strategy = strategy.name(),
            start = %window.start,
            end = ?window.end,
            "Starting extraction"
        );
        strategy.start(window).await
    }

    /// Extracts `window` into memory.
    ///
    /// # Errors
    ///
    /// Returns the first [`ExtractError`] raised while extracting.
    pub async fn fetch(&self, window: &ReplicationWindow) -> Result<FetchOutput, ExtractError> {
        let output = self.fetch_stream(window).await?.collect().await?;
        tracing::info!(
            stream = self.stream.name(),
            records = output.records.len(),
            next_cursor = output.next_cursor.as_ref().map_or("-", ResumeCursor::as_str),
            "Extraction finished"
        );
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::mock::ScriptedTransport;
    use crate::clients::HttpResponse;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn client(transport: ScriptedTransport) -> GraphqlClient {
        GraphqlClient::new(Arc::new(transport))
    }

    fn window() -> ReplicationWindow {
        ReplicationWindow::since(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap())
    }

    #[test]
    fn test_sort_key_requires_replication_key() {
        let config = ExtractConfig::builder().sort_key("UPDATED_AT").build().unwrap();
        let result = ExtractionEngine::new(
            client(ScriptedTransport::new(Vec::new())),
            StreamDefinition::connection("locations", "id name"),
            config,
        );
        assert!(matches!(
            result,
            Err(ConfigError::SortKeyWithoutReplicationKey { ref sort_key }) if sort_key == "UPDATED_AT"
        ));
    }

    #[test]
    fn test_strategy_follows_bulk_mode() {
        let orders = StreamDefinition::connection("orders", "id updatedAt").with_replication_key("updatedAt");
        let bulk = ExtractConfig::builder().bulk_mode(true).build().unwrap();

        let engine = ExtractionEngine::new(
            client(ScriptedTransport::new(Vec::new())),
            orders.clone(),
            ExtractConfig::default(),
        )
        .unwrap();
        assert_eq!(engine.strategy().name(), "cursor");

        let engine =
            ExtractionEngine::new(client(ScriptedTransport::new(Vec::new())), orders, bulk.clone())
                .unwrap();
        assert_eq!(engine.strategy().name(), "bulk");

        let engine = ExtractionEngine::new(
            client(ScriptedTransport::new(Vec::new())),
            StreamDefinition::object("shop", "id name"),
            bulk,
        )
        .unwrap();
        assert_eq!(engine.strategy().name(), "cursor");
    }

    #[tokio::test(start_paused = true)]
    async fn test_bulk_fetch_tracks_resume_cursor() {
        let url = "https://storage.example.com/orders.jsonl";
        let transport = ScriptedTransport::new(vec![
            Ok(HttpResponse::ok(json!({"data": {"bulkOperationRunQuery": {
                "bulkOperation": {"id": "gid://shopify/BulkOperation/7", "status": "CREATED"},
                "userErrors": []
            }}}))),
            Ok(HttpResponse::ok(json!({"data": {"currentBulkOperation": {
                "id": "gid://shopify/BulkOperation/7", "status": "COMPLETED", "url": url
            }}}))),
        ])
        .with_download(
            url,
            vec![
                "{\"id\":\"gid://shopify/Order/1\",\"updatedAt\":\"2024-01-05T00:00:00Z\"}\n",
                "{\"id\":\"gid://shopify/Order/2\",\"updatedAt\":\"2024-01-04T00:00:00Z\"}\n",
            ],
        );
        let engine = ExtractionEngine::new(
            client(transport),
            StreamDefinition::connection("orders", "id updatedAt").with_replication_key("updatedAt"),
            ExtractConfig::builder().bulk_mode(true).build().unwrap(),
        )
        .unwrap();

        let output = engine.fetch(&window()).await.unwrap();
        assert_eq!(output.records.len(), 2);
        assert_eq!(
            output.next_cursor,
            Some(ResumeCursor::new("2024-01-05T00:00:00Z"))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_bulk_failure_reaches_the_host() {
        let transport = ScriptedTransport::new(vec![Ok(HttpResponse::ok(json!({
            "data": {"bulkOperationRunQuery": {"bulkOperation": null, "userErrors": []}}
        })))]);
        let engine = ExtractionEngine::new(
            client(transport),
            StreamDefinition::connection("orders", "id"),
            ExtractConfig::builder().bulk_mode(true).build().unwrap(),
        )
        .unwrap();

        let error = engine.fetch(&window()).await.unwrap_err();
        assert!(matches!(error, ExtractError::BulkSubmitFailed { .. }));
    }

    #[tokio::test]
    async fn test_object_stream_in_bulk_mode_is_one_request() {
        let transport = Arc::new(ScriptedTransport::new(vec![Ok(HttpResponse::ok(json!({
            "data": {"shop": {"id": "gid://shopify/Shop/1", "name": "Demo"}}
        })))]));
        let engine = ExtractionEngine::new(
            GraphqlClient::new(transport.clone()),
            StreamDefinition::object("shop", "id name"),
            ExtractConfig::builder().bulk_mode(true).build().unwrap(),
        )
        .unwrap();

        let output = engine.fetch(&window()).await.unwrap();
        assert_eq!(output.records.len(), 1);
        assert_eq!(output.next_cursor, None);
        assert_eq!(transport.requests().len(), 1);
    }
}
