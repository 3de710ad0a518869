//! Transport-level error types.
//!
//! - [`HttpResponseError`]: non-2xx HTTP responses from the API
//! - [`InvalidHttpRequestError`]: a request rejected before it was sent
//! - [`HttpError`]: unified error returned by every [`Transport`]
//!
//! # Example
//!
//! ```rust,ignore
//! use shopify_extract::clients::HttpError;
//!
//! match transport.send(request).await {
//!     Ok(response) => println!("{}", response.body),
//!     Err(HttpError::Response(e)) => println!("API error {}: {}", e.code, e.message),
//!     Err(HttpError::Timeout { message }) => println!("timed out: {message}"),
//!     Err(e) => println!("{e}"),
//! }
//! ```
//!
//! [`Transport`]: crate::clients::Transport

use thiserror::Error;

/// Error returned when a request receives a non-successful HTTP status.
///
/// `message` carries the serialised `errors`/`error` fields of the response
/// body so the raw provider payload survives into fatal errors.
#[derive(Debug, Error)]
#[error("HTTP {code}: {message}")]
pub struct HttpResponseError {
    /// The HTTP status code of the response.
    pub code: u16,
    /// Serialized error payload in JSON format.
    pub message: String,
    /// Reference ID for error reporting (from the `X-Request-Id` header).
    pub error_reference: Option<String>,
    /// Seconds the provider asked us to wait (from the `Retry-After` header).
    pub retry_after: Option<f64>,
}

impl HttpResponseError {
    /// Returns `true` for statuses worth retrying: 429 and 5xx.
    #[must_use]
    pub const fn is_retriable_status(&self) -> bool {
        self.code == 429 || self.code >= 500
    }
}

/// Error returned when a GraphQL request fails validation before sending.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InvalidHttpRequestError {
    /// The query document is empty.
    #[error("Cannot send a GraphQL request without a query document.")]
    EmptyQuery,

    /// Variables must be a JSON object.
    #[error("GraphQL variables must be a JSON object, got {kind}.")]
    InvalidVariables {
        /// JSON type that was provided instead.
        kind: &'static str,
    },
}

/// Unified error type for all transport failures.
#[derive(Debug, Error)]
pub enum HttpError {
    /// An HTTP response error (non-2xx status code).
    #[error(transparent)]
    Response(#[from] HttpResponseError),

    /// Request validation failed.
    #[error(transparent)]
    InvalidRequest(#[from] InvalidHttpRequestError),

    /// The per-request timeout elapsed.
    #[error("Request timed out: {message}")]
    Timeout {
        /// Description of the timed out operation.
        message: String,
    },

    /// Connection-level failure reported by a host-supplied transport.
    #[error("Connection error: {message}")]
    Connection {
        /// Description of the failure.
        message: String,
    },

    /// Network or connection error from reqwest.
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
}

impl HttpError {
    /// Converts a reqwest error, separating timeouts from other failures.
    #[must_use]
    pub fn from_reqwest(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            Self::Timeout {
                message: error.to_string(),
            }
        } else {
            Self::Network(error)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response_error(code: u16) -> HttpResponseError {
        HttpResponseError {
            code,
            message: r#"{"errors":"boom"}"#.to_string(),
            error_reference: None,
            retry_after: None,
        }
    }

    #[test]
    fn test_http_response_error_includes_status_and_payload() {
        let error = response_error(404);
        let message = error.to_string();
        assert!(message.contains("404"));
        assert!(message.contains("boom"));
    }

    #[test]
    fn test_retriable_statuses() {
        assert!(response_error(429).is_retriable_status());
        assert!(response_error(500).is_retriable_status());
        assert!(response_error(503).is_retriable_status());
        assert!(!response_error(400).is_retriable_status());
        assert!(!response_error(401).is_retriable_status());
    }

    #[test]
    fn test_invalid_request_error_messages() {
        assert_eq!(
            InvalidHttpRequestError::InvalidVariables { kind: "array" }.to_string(),
            "GraphQL variables must be a JSON object, got array."
        );
    }

    #[test]
    fn test_error_types_implement_std_error() {
        let _: &dyn std::error::Error = &response_error(400);
        let _: &dyn std::error::Error = &InvalidHttpRequestError::EmptyQuery;
        let _: &dyn std::error::Error = &HttpError::Timeout {
            message: "60s".to_string(),
        };
    }
}
