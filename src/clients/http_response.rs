//! HTTP response types, including Shopify's query-cost accounting payload.

use std::collections::HashMap;

use serde::Deserialize;

/// Bucket state reported under `extensions.cost.throttleStatus`.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThrottleStatus {
    /// Bucket size.
    pub maximum_available: f64,
    /// Points left in the bucket after this query.
    pub currently_available: f64,
    /// Points restored per second.
    pub restore_rate: f64,
}

/// Cost accounting for one GraphQL query (`extensions.cost`).
///
/// ```rust
/// use shopify_extract::clients::QueryCost;
/// use serde_json::json;
///
/// let body = json!({
///     "extensions": { "cost": {
///         "requestedQueryCost": 12,
///         "actualQueryCost": 10,
///         "throttleStatus": {
///             "maximumAvailable": 1000.0,
///             "currentlyAvailable": 990,
///             "restoreRate": 50.0
///         }
///     }}
/// });
///
/// let cost = QueryCost::from_body(&body).unwrap();
/// assert_eq!(cost.requested_query_cost, 12.0);
/// assert_eq!(cost.throttle_status.restore_rate, 50.0);
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryCost {
    /// Cost the query was charged up front.
    pub requested_query_cost: f64,
    /// Cost actually incurred; absent when the query was throttled.
    #[serde(default)]
    pub actual_query_cost: Option<f64>,
    /// Bucket state after the query.
    pub throttle_status: ThrottleStatus,
}

impl QueryCost {
    /// Extracts the cost payload from a GraphQL response body.
    ///
    /// Returns `None` when the body carries no (or a malformed) cost block.
    #[must_use]
    pub fn from_body(body: &serde_json::Value) -> Option<Self> {
        let cost = body.get("extensions")?.get("cost")?;
        serde_json::from_value(cost.clone()).ok()
    }
}

/// An HTTP response from the Admin API.
#[derive(Clone, Debug)]
pub struct HttpResponse {
    /// The HTTP status code.
    pub code: u16,
    /// Response headers (lowercased names; headers may repeat).
    pub headers: HashMap<String, Vec<String>>,
    /// The parsed response body.
    pub body: serde_json::Value,
    /// Seconds to wait before retrying (from `Retry-After` header).
    pub retry_request_after: Option<f64>,
}

impl HttpResponse {
    /// Creates a new `HttpResponse`, parsing `Retry-After` when present.
    #[must_use]
    pub fn new(code: u16, headers: HashMap<String, Vec<String>>, body: serde_json::Value) -> Self {
        let retry_request_after = headers
            .get("retry-after")
            .and_then(|values| values.first())
            .and_then(|value| value.parse::<f64>().ok());

        Self {
            code,
            headers,
            body,
            retry_request_after,
        }
    }

    /// Convenience constructor for a 200 response with no headers.
    #[must_use]
    pub fn ok(body: serde_json::Value) -> Self {
        Self::new(200, HashMap::new(), body)
    }

    /// Returns `true` if the response status code is in the 2xx range.
    #[must_use]
    pub const fn is_ok(&self) -> bool {
        self.code >= 200 && self.code <= 299
    }

    /// Returns the `X-Request-Id` header value, if present.
    #[must_use]
    pub fn request_id(&self) -> Option<&str> {
        self.headers
            .get("x-request-id")
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    /// Returns the query cost block of the body, if present.
    #[must_use]
    pub fn query_cost(&self) -> Option<QueryCost> {
        QueryCost::from_body(&self.body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_query_cost_parses_extensions() {
        let response = HttpResponse::ok(json!({
            "data": {},
            "extensions": {"cost": {
                "requestedQueryCost": 52,
                "actualQueryCost": 48,
                "throttleStatus": {
                    "maximumAvailable": 2000.0,
                    "currentlyAvailable": 1952,
                    "restoreRate": 100.0
                }
            }}
        }));

        let cost = response.query_cost().unwrap();
        assert!((cost.requested_query_cost - 52.0).abs() < f64::EPSILON);
        assert_eq!(cost.actual_query_cost, Some(48.0));
        assert!((cost.throttle_status.maximum_available - 2000.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_query_cost_tolerates_missing_actual_cost() {
        let body = json!({"extensions": {"cost": {
            "requestedQueryCost": 10,
            "actualQueryCost": null,
            "throttleStatus": {
                "maximumAvailable": 1000.0,
                "currentlyAvailable": 5,
                "restoreRate": 50.0
            }
        }}});
        let cost = QueryCost::from_body(&body).unwrap();
        assert_eq!(cost.actual_query_cost, None);
    }

    #[test]
    fn test_query_cost_absent() {
        assert!(QueryCost::from_body(&json!({"data": {}})).is_none());
    }

    #[test]
    fn test_retry_after_and_request_id_headers() {
        let mut headers = HashMap::new();
        headers.insert("retry-after".to_string(), vec!["2.5".to_string()]);
        headers.insert("x-request-id".to_string(), vec!["req-1".to_string()]);
        let response = HttpResponse::new(429, headers, json!({}));

        assert_eq!(response.retry_request_after, Some(2.5));
        assert_eq!(response.request_id(), Some("req-1"));
        assert!(!response.is_ok());
    }
}
