//! Network layer: the [`Transport`] seam, its reqwest implementation and the
//! GraphQL client built on top of it.
//!
//! # Overview
//!
//! - [`Transport`]: async trait for sending GraphQL requests and downloading
//!   bulk result files
//! - [`HttpClient`]: the default reqwest-backed transport
//! - [`HttpRequest`] / [`HttpResponse`]: request and response types
//! - [`QueryCost`] / [`ThrottleStatus`]: Shopify's per-query cost accounting
//! - [`graphql::GraphqlClient`]: decodes `data`, `errors` and `extensions`
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use shopify_extract::{AccessToken, ApiVersion, ShopDomain};
//! use shopify_extract::clients::{GraphqlClient, HttpClient};
//!
//! let transport = HttpClient::new(
//!     &ShopDomain::new("my-store")?,
//!     &AccessToken::new("shpat_...")?,
//!     &ApiVersion::latest(),
//! )?;
//! let client = GraphqlClient::new(Arc::new(transport));
//! let response = client.query("query { shop { id } }", None).await?;
//! ```
//!
//! # Retry Behavior
//!
//! Nothing in this module retries. Transient failures are classified and
//! retried by the extraction layer, see [`crate::extract::RetryPolicy`].

mod errors;
pub mod graphql;
mod http_client;
mod http_request;
mod http_response;
#[cfg(test)]
pub(crate) mod mock;
mod transport;

pub use errors::{HttpError, HttpResponseError, InvalidHttpRequestError};
pub use http_client::{HttpClient, DEFAULT_REQUEST_TIMEOUT, SDK_VERSION};
pub use http_request::{HttpRequest, HttpRequestBuilder};
pub use http_response::{HttpResponse, QueryCost, ThrottleStatus};
pub use transport::{BufferedChunks, ChunkSource, Transport};

pub use graphql::{GraphqlClient, GraphqlError, GraphqlResponse};
