//! Error types for extraction configuration.
//!
//! This module contains the error type raised when an [`ExtractConfig`]
//! or one of the validated connection newtypes is constructed from invalid
//! values.
//!
//! # Error Handling
//!
//! All configuration constructors return `Result<T, ConfigError>` to enable
//! fail-fast validation. The host resolves its configuration once, before an
//! engine is created, so no extraction ever starts from a half-valid config.
//!
//! # Example
//!
//! ```rust
//! use shopify_extract::{AccessToken, ConfigError};
//!
//! let result = AccessToken::new("");
//! assert!(matches!(result, Err(ConfigError::EmptyAccessToken)));
//! ```
//!
//! [`ExtractConfig`]: crate::ExtractConfig

use thiserror::Error;

/// Errors that can occur while building extraction configuration.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    /// Access token cannot be empty.
    #[error("Access token cannot be empty. Please provide a valid Admin API access token.")]
    EmptyAccessToken,

    /// Shop domain is invalid.
    #[error("Invalid shop domain '{domain}'. Expected format: 'shop-name' or 'shop-name.myshopify.com'.")]
    InvalidShopDomain {
        /// The invalid domain that was provided.
        domain: String,
    },

    /// API version is invalid.
    #[error("Invalid API version '{version}'. Expected format: 'YYYY-MM' (e.g., '2024-01') or 'unstable'.")]
    InvalidApiVersion {
        /// The invalid version string that was provided.
        version: String,
    },

    /// A numeric option is outside its accepted range.
    #[error("Invalid value for '{field}': {reason}")]
    OutOfRange {
        /// The option that was rejected.
        field: &'static str,
        /// Why the value was rejected.
        reason: String,
    },

    /// The poll timeout is shorter than a single poll interval.
    #[error("Poll timeout ({timeout_secs}s) must not be shorter than the poll interval ({interval_secs}s).")]
    PollTimeoutTooShort {
        /// Configured poll interval in seconds.
        interval_secs: u64,
        /// Configured poll timeout in seconds.
        timeout_secs: u64,
    },

    /// A sort key was configured for a stream without a replication key.
    #[error("Sort key '{sort_key}' requires the stream to declare a replication key.")]
    SortKeyWithoutReplicationKey {
        /// The configured sort key.
        sort_key: String,
    },
}
