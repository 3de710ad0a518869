//! # Shopify Extract
//!
//! Incremental extraction of records from the Shopify Admin GraphQL API and
//! its Bulk Operations API.
//!
//! ## Overview
//!
//! This crate provides:
//! - Cost-aware pacing via [`extract::RateBudget`], sized from the
//!   `extensions.cost` block of every response
//! - Cursor pagination with loop detection and optional monthly chunking
//! - Partitioned, concurrent fetching of a replication window on tokio tasks
//! - Bulk operations: submit, poll, stream the JSONL result and re-nest
//!   child records under their parents
//! - Retry with exponential backoff and jitter for transient failures
//! - A resume cursor (the highest replication-key value emitted) for the
//!   host to persist between runs
//! - A pluggable [`clients::Transport`] with a reqwest-based default,
//!   [`HttpClient`]
//!
//! Token acquisition, stream catalogs, state persistence and record output
//! belong to the host.
//!
//! ## Quick Start
//!
//! ```rust
//! use shopify_extract::{AccessToken, ApiVersion, ExtractConfig, ShopDomain};
//!
//! let shop = ShopDomain::new("my-store").unwrap();
//! let token = AccessToken::new("shpat_example").unwrap();
//! let config = ExtractConfig::builder()
//!     .apply_concurrency(true)
//!     .sort_key("UPDATED_AT")
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(shop.as_ref(), "my-store.myshopify.com");
//! assert_eq!(config.sort_key(), Some("UPDATED_AT"));
//! # let _ = (token, ApiVersion::latest());
//! ```
//!
//! ## Extracting a Stream
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use shopify_extract::clients::GraphqlClient;
//! use shopify_extract::extract::{ReplicationWindow, StreamDefinition};
//! use shopify_extract::{ExtractionEngine, HttpClient};
//!
//! let client = GraphqlClient::new(Arc::new(HttpClient::new(&shop, &token, &ApiVersion::latest())?));
//! let stream = StreamDefinition::connection("products", "id title updatedAt")
//!     .with_replication_key("updatedAt")
//!     .with_nested("ProductVariant", "variants");
//! let engine = ExtractionEngine::new(client, stream, config)?;
//!
//! let mut records = engine.fetch_stream(&ReplicationWindow::since(bookmark)).await?;
//! while let Some(record) = records.next().await {
//!     emit(record?);
//! }
//! save_bookmark(records.resume_cursor());
//! ```
//!
//! ## Design Principles
//!
//! - **No global state**: configuration is passed to the engine constructor
//! - **Fail-fast validation**: config newtypes validate on construction
//! - **Thread-safe**: clients, configs and engines are `Send + Sync`
//! - **Async-first**: designed for the Tokio runtime

pub mod clients;
pub mod config;
pub mod error;
pub mod extract;

// Re-export public types at crate root for convenience
pub use config::{
    AccessToken, ApiVersion, ExtractConfig, ExtractConfigBuilder, ShopDomain,
    PROVIDER_MAX_PAGE_SIZE,
};
pub use error::ConfigError;

// Re-export client types
pub use clients::{
    GraphqlClient, GraphqlError, HttpClient, HttpError, HttpRequest, HttpResponse,
    HttpResponseError, Transport,
};

// Re-export extraction entry points
pub use extract::{
    ExtractError, ExtractionEngine, FetchOutput, MissingKeyPolicy, Record, RecordStream,
    ReplicationWindow, ResumeCursor, RetryPolicy, StreamDefinition,
};
