//! GraphQL-specific error types.
//!
//! Unlike a general purpose GraphQL client, the extraction core needs to act
//! on GraphQL-level errors (throttling in particular), so responses whose
//! `errors` array came back without usable `data` are surfaced as
//! [`GraphqlError::Query`] together with their extension codes.
//!
//! - [`GraphqlError::Http`]: wraps transport errors
//! - [`GraphqlError::Query`]: errors reported in the response body
//! - [`GraphqlError::MalformedResponse`]: a 2xx body of the wrong shape

use crate::clients::HttpError;
use thiserror::Error;

/// Error code Shopify reports when the cost bucket is exhausted.
pub const THROTTLED_CODE: &str = "THROTTLED";

/// Error code Shopify reports for internal failures.
pub const INTERNAL_SERVER_ERROR_CODE: &str = "INTERNAL_SERVER_ERROR";

/// Error type for GraphQL operations.
///
/// # Example
///
/// ```rust
/// use shopify_extract::clients::graphql::GraphqlError;
/// use shopify_extract::clients::{HttpError, HttpResponseError};
///
/// let http_error = HttpError::Response(HttpResponseError {
///     code: 401,
///     message: r#"{"errors":"Unauthorized"}"#.to_string(),
///     error_reference: None,
///     retry_after: None,
/// });
///
/// let graphql_error: GraphqlError = http_error.into();
/// assert!(graphql_error.to_string().contains("Unauthorized"));
/// ```
#[derive(Debug, Error)]
pub enum GraphqlError {
    /// A transport-level error occurred.
    #[error(transparent)]
    Http(#[from] HttpError),

    /// The response carried `errors` and no usable `data`.
    #[error("GraphQL query failed ({}): {errors}", .codes.join(", "))]
    Query {
        /// `extensions.code` of every error, in order (may be empty).
        codes: Vec<String>,
        /// The raw `errors` array.
        errors: serde_json::Value,
        /// The full response body.
        response: serde_json::Value,
    },

    /// The response body was not a GraphQL result.
    #[error("Malformed GraphQL response: {reason}")]
    MalformedResponse {
        /// What was wrong with the body.
        reason: String,
        /// The full response body.
        response: serde_json::Value,
    },
}

impl GraphqlError {
    /// Returns `true` if the provider throttled the query.
    #[must_use]
    pub fn is_throttled(&self) -> bool {
        self.has_code(THROTTLED_CODE)
    }

    /// Returns `true` if any reported error carries `code`.
    #[must_use]
    pub fn has_code(&self, code: &str) -> bool {
        match self {
            Self::Query { codes, .. } => codes.iter().any(|c| c == code),
            _ => false,
        }
    }

    /// Returns the raw provider payload, when there is one.
    #[must_use]
    pub fn response(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Query { response, .. } | Self::MalformedResponse { response, .. } => {
                Some(response)
            }
            Self::Http(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::HttpResponseError;
    use serde_json::json;

    fn throttled() -> GraphqlError {
        let errors = json!([{
            "message": "Throttled",
            "extensions": {"code": "THROTTLED"}
        }]);
        GraphqlError::Query {
            codes: vec!["THROTTLED".to_string()],
            response: json!({"errors": errors.clone()}),
            errors,
        }
    }

    #[test]
    fn test_query_error_message_lists_codes() {
        let message = throttled().to_string();
        assert!(message.contains("THROTTLED"));
        assert!(message.contains("Throttled"));
    }

    #[test]
    fn test_is_throttled() {
        assert!(throttled().is_throttled());
        assert!(!throttled().has_code(INTERNAL_SERVER_ERROR_CODE));

        let http = GraphqlError::Http(HttpError::Timeout {
            message: "60s".to_string(),
        });
        assert!(!http.is_throttled());
        assert!(http.response().is_none());
    }

    #[test]
    fn test_from_http_error_conversion() {
        let http_error = HttpError::Response(HttpResponseError {
            code: 500,
            message: r#"{"errors":"Internal Server Error"}"#.to_string(),
            error_reference: None,
            retry_after: None,
        });

        let graphql_error: GraphqlError = http_error.into();
        assert!(matches!(graphql_error, GraphqlError::Http(_)));
    }

    #[test]
    fn test_malformed_response_keeps_payload() {
        let error = GraphqlError::MalformedResponse {
            reason: "body is not an object".to_string(),
            response: json!("oops"),
        };
        assert_eq!(error.response(), Some(&json!("oops")));
        assert!(error.to_string().contains("body is not an object"));
    }
}
