//! GraphQL request type and its builder.

use std::collections::HashMap;

use serde_json::{json, Value};

use crate::clients::errors::InvalidHttpRequestError;

/// A GraphQL document plus variables, ready to be posted by a [`Transport`].
///
/// ```rust
/// use shopify_extract::clients::HttpRequest;
/// use serde_json::json;
///
/// let request = HttpRequest::builder("query { shop { id } }")
///     .variables(json!({}))
///     .build()
///     .unwrap();
/// assert_eq!(request.body()["query"], "query { shop { id } }");
/// ```
///
/// [`Transport`]: crate::clients::Transport
#[derive(Clone, Debug, PartialEq)]
pub struct HttpRequest {
    /// The GraphQL document.
    pub query: String,
    /// Variables object (`Value::Null` when the document takes none).
    pub variables: Value,
    /// Additional headers to include in the request.
    pub extra_headers: Option<HashMap<String, String>>,
}

impl HttpRequest {
    /// Creates a new builder for the given query document.
    #[must_use]
    pub fn builder(query: impl Into<String>) -> HttpRequestBuilder {
        HttpRequestBuilder::new(query)
    }

    /// Returns the JSON body posted to the GraphQL endpoint.
    #[must_use]
    pub fn body(&self) -> Value {
        json!({
            "query": self.query,
            "variables": self.variables,
        })
    }

    /// Validates the request.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidHttpRequestError`] if the query is blank or the
    /// variables are neither an object nor null.
    pub fn verify(&self) -> Result<(), InvalidHttpRequestError> {
        if self.query.trim().is_empty() {
            return Err(InvalidHttpRequestError::EmptyQuery);
        }
        let kind = match &self.variables {
            Value::Null | Value::Object(_) => return Ok(()),
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Array(_) => "array",
        };
        Err(InvalidHttpRequestError::InvalidVariables { kind })
    }
}

/// Builder for [`HttpRequest`].
#[derive(Debug)]
pub struct HttpRequestBuilder {
    query: String,
    variables: Value,
    extra_headers: Option<HashMap<String, String>>,
}

impl HttpRequestBuilder {
    fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            variables: Value::Null,
            extra_headers: None,
        }
    }

    /// Sets the variables object.
    #[must_use]
    pub fn variables(mut self, variables: Value) -> Self {
        self.variables = variables;
        self
    }

    /// Adds a single extra header.
    #[must_use]
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_headers
            .get_or_insert_with(HashMap::new)
            .insert(key.into(), value.into());
        self
    }

    /// Builds the [`HttpRequest`], validating it in the process.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidHttpRequestError`] if the request fails validation.
    pub fn build(self) -> Result<HttpRequest, InvalidHttpRequestError> {
        let request = HttpRequest {
            query: self.query,
            variables: self.variables,
            extra_headers: self.extra_headers,
        };
        request.verify()?;
        Ok(request)
    }
}
