//! GraphQL layer for the Admin API.
//!
//! # Overview
//!
//! - [`GraphqlClient`]: executes queries through a [`Transport`](crate::clients::Transport)
//!   and decodes `data`, `errors` and `extensions.cost`
//! - [`GraphqlResponse`]: a decoded response
//! - [`GraphqlError`]: error type for GraphQL operations
//!
//! # Response Structure
//!
//! GraphQL responses contain these fields in the body:
//!
//! - `data`: The query result data
//! - `errors`: Any GraphQL errors (still HTTP 200)
//! - `extensions`: Query cost and throttle status
//!
//! Responses with errors *and* usable data are treated as partial successes;
//! errors without data are returned as [`GraphqlError::Query`].

mod client;
mod errors;

pub use client::{GraphqlClient, GraphqlResponse};
pub use errors::{GraphqlError, INTERNAL_SERVER_ERROR_CODE, THROTTLED_CODE};
