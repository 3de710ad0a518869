//! GraphQL client over a [`Transport`].

use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::clients::graphql::GraphqlError;
use crate::clients::{HttpRequest, QueryCost, Transport};

/// A decoded GraphQL response.
#[derive(Clone, Debug, PartialEq)]
pub struct GraphqlResponse {
    /// The `data` object.
    pub data: Value,
    /// Partial errors returned alongside usable data.
    pub errors: Option<Value>,
    /// Cost accounting from `extensions.cost`, if present.
    pub cost: Option<QueryCost>,
    /// The full response body.
    pub body: Value,
}

/// GraphQL client for the Admin API.
///
/// Cloning is cheap; clones share the underlying transport.
///
/// # Thread Safety
///
/// `GraphqlClient` is `Send + Sync`, making it safe to share across async tasks.
///
/// # Example
///
/// ```rust,ignore
/// use std::sync::Arc;
/// use shopify_extract::clients::{GraphqlClient, HttpClient};
///
/// let transport = Arc::new(HttpClient::new(&shop, &token, &ApiVersion::latest())?);
/// let client = GraphqlClient::new(transport);
///
/// let response = client.query("query { shop { name } }", None).await?;
/// println!("Shop: {}", response.data["shop"]["name"]);
/// ```
#[derive(Clone)]
pub struct GraphqlClient {
    transport: Arc<dyn Transport>,
}

// Verify GraphqlClient is Send + Sync at compile time
const _: fn() = || {
    const fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<GraphqlClient>();
};

impl fmt::Debug for GraphqlClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GraphqlClient").finish_non_exhaustive()
    }
}

impl GraphqlClient {
    /// Creates a client sending through `transport`.
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    /// Returns the underlying transport.
    #[must_use]
    pub const fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Executes a query and decodes the response.
    ///
    /// Partial errors (errors alongside usable data) are logged and returned
    /// in [`GraphqlResponse::errors`].
    ///
    /// # Errors
    ///
    /// - [`GraphqlError::Http`] for transport failures
    /// - [`GraphqlError::Query`] when the body has errors and no usable data
    /// - [`GraphqlError::MalformedResponse`] when the body has neither
    pub async fn query(
        &self,
        query: &str,
        variables: Option<Value>,
    ) -> Result<GraphqlResponse, GraphqlError> {
        let request = HttpRequest::builder(query)
            .variables(variables.unwrap_or(Value::Null))
            .build()
            .map_err(|e| GraphqlError::Http(e.into()))?;

        let response = self.transport.send(request).await?;
        decode(response.body)
    }
}

fn decode(body: Value) -> Result<GraphqlResponse, GraphqlError> {
    if !body.is_object() {
        return Err(GraphqlError::MalformedResponse {
            reason: "body is not a JSON object".to_string(),
            response: body,
        });
    }

    let errors = body
        .get("errors")
        .filter(|errors| match errors {
            Value::Null => false,
            Value::Array(list) => !list.is_empty(),
            _ => true,
        })
        .cloned();
    let data = body.get("data").cloned().unwrap_or(Value::Null);
    let has_data = data
        .as_object()
        .is_some_and(|fields| fields.values().any(|v| !v.is_null()));

    match (errors, has_data) {
        (Some(errors), false) => Err(GraphqlError::Query {
            codes: error_codes(&errors),
            errors,
            response: body,
        }),
        (None, false) if !data.is_object() => Err(GraphqlError::MalformedResponse {
            reason: "response has neither data nor errors".to_string(),
            response: body,
        }),
        (errors, _) => {
            if let Some(errors) = &errors {
                tracing::warn!(%errors, "GraphQL response contains partial errors");
            }
            let cost = QueryCost::from_body(&body);
            Ok(GraphqlResponse {
                data,
                errors,
                cost,
                body,
            })
        }
    }
}

fn error_codes(errors: &Value) -> Vec<String> {
    errors
        .as_array()
        .map(|list| {
            list.iter()
                .filter_map(|error| error.pointer("/extensions/code"))
                .filter_map(Value::as_str)
                .map(String::from)
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::mock::ScriptedTransport;
    use crate::clients::HttpResponse;
    use serde_json::json;

    fn client_with(bodies: Vec<Value>) -> (GraphqlClient, Arc<ScriptedTransport>) {
        let transport = Arc::new(ScriptedTransport::new(
            bodies.into_iter().map(|b| Ok(HttpResponse::ok(b))),
        ));
        (GraphqlClient::new(transport.clone()), transport)
    }

    #[tokio::test]
    async fn test_query_returns_data_and_cost() {
        let (client, transport) = client_with(vec![json!({
            "data": {"shop": {"id": "gid://shopify/Shop/1"}},
            "extensions": {"cost": {
                "requestedQueryCost": 1,
                "actualQueryCost": 1,
                "throttleStatus": {
                    "maximumAvailable": 1000.0,
                    "currentlyAvailable": 999,
                    "restoreRate": 50.0
                }
            }}
        })]);

        let response = client
            .query("query { shop { id } }", Some(json!({})))
            .await
            .unwrap();

        assert_eq!(response.data["shop"]["id"], "gid://shopify/Shop/1");
        assert!(response.errors.is_none());
        assert_eq!(response.cost.unwrap().throttle_status.restore_rate, 50.0);
        assert_eq!(transport.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_errors_without_data_become_query_error() {
        let (client, _) = client_with(vec![json!({
            "errors": [{"message": "Throttled", "extensions": {"code": "THROTTLED"}}]
        })]);

        let error = client.query("query { shop { id } }", None).await.unwrap_err();
        assert!(error.is_throttled());
        assert!(error.response().is_some());
    }

    #[tokio::test]
    async fn test_errors_with_null_data_fields_become_query_error() {
        let (client, _) = client_with(vec![json!({
            "data": {"products": null},
            "errors": [{"message": "Internal error", "extensions": {"code": "INTERNAL_SERVER_ERROR"}}]
        })]);

        let error = client.query("query { products { id } }", None).await.unwrap_err();
        assert!(error.has_code("INTERNAL_SERVER_ERROR"));
    }

    #[tokio::test]
    async fn test_partial_errors_are_returned_with_data() {
        let (client, _) = client_with(vec![json!({
            "data": {"products": {"edges": []}},
            "errors": [{"message": "Access denied for field"}]
        })]);

        let response = client.query("query { products { id } }", None).await.unwrap();
        assert!(response.errors.is_some());
        assert_eq!(response.data["products"]["edges"], json!([]));
    }

    #[tokio::test]
    async fn test_non_object_body_is_malformed() {
        let (client, _) = client_with(vec![json!(["nope"])]);
        let error = client.query("query { shop { id } }", None).await.unwrap_err();
        assert!(matches!(error, GraphqlError::MalformedResponse { .. }));
    }

    #[tokio::test]
    async fn test_blank_query_is_rejected_before_sending() {
        let (client, transport) = client_with(vec![]);
        let error = client.query("  ", None).await.unwrap_err();
        assert!(matches!(error, GraphqlError::Http(_)));
        assert!(transport.requests().is_empty());
    }

    #[test]
    fn test_error_codes_skip_errors_without_extensions() {
        let codes = error_codes(&json!([
            {"message": "a", "extensions": {"code": "THROTTLED"}},
            {"message": "b"}
        ]));
        assert_eq!(codes, vec!["THROTTLED".to_string()]);
    }
}
