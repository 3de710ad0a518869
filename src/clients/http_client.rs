//! Default reqwest-backed [`Transport`].
//!
//! Retries are not performed here; the extraction core decides what to retry
//! and resets its rate budget when it does.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;

use crate::clients::errors::{HttpError, HttpResponseError};
use crate::clients::http_request::HttpRequest;
use crate::clients::http_response::HttpResponse;
use crate::clients::transport::{ChunkSource, Transport};
use crate::config::{AccessToken, ApiVersion, ShopDomain};

/// Crate version from Cargo.toml.
pub const SDK_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default per-request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// HTTP transport posting to a shop's Admin GraphQL endpoint.
///
/// # Thread Safety
///
/// `HttpClient` is `Send + Sync`; wrap it in an `Arc` and share it between
/// partition workers.
///
/// # Example
///
/// ```rust
/// use shopify_extract::{AccessToken, ApiVersion, ShopDomain};
/// use shopify_extract::clients::HttpClient;
///
/// let client = HttpClient::new(
///     &ShopDomain::new("my-store").unwrap(),
///     &AccessToken::new("shpat_123").unwrap(),
///     &ApiVersion::V2024_10,
/// )
/// .unwrap();
///
/// assert_eq!(
///     client.endpoint(),
///     "https://my-store.myshopify.com/admin/api/2024-10/graphql.json"
/// );
/// ```
#[derive(Debug)]
pub struct HttpClient {
    client: reqwest::Client,
    endpoint: String,
    download_client: reqwest::Client,
    default_headers: HashMap<String, String>,
}

// Verify HttpClient is Send + Sync at compile time
const _: fn() = || {
    const fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<HttpClient>();
};

impl HttpClient {
    /// Creates a transport for `shop` using the default request timeout.
    ///
    /// # Errors
    ///
    /// Returns [`HttpError::Network`] if the TLS backend cannot be initialised.
    pub fn new(
        shop: &ShopDomain,
        token: &AccessToken,
        version: &ApiVersion,
    ) -> Result<Self, HttpError> {
        Self::with_base_uri(
            format!("https://{shop}"),
            version,
            token,
            DEFAULT_REQUEST_TIMEOUT,
        )
    }

    /// Creates a transport against an explicit base URI (proxies, tests).
    ///
    /// # Errors
    ///
    /// Returns [`HttpError::Network`] if the TLS backend cannot be initialised.
    pub fn with_base_uri(
        base_uri: impl Into<String>,
        version: &ApiVersion,
        token: &AccessToken,
        timeout: Duration,
    ) -> Result<Self, HttpError> {
        let base_uri = base_uri.into();
        let endpoint = format!(
            "{}{}",
            base_uri.trim_end_matches('/'),
            version.graphql_path()
        );

        let rust_version = env!("CARGO_PKG_RUST_VERSION");
        let user_agent = format!("Shopify Extract v{SDK_VERSION} | Rust {rust_version}");

        let mut default_headers = HashMap::new();
        default_headers.insert("User-Agent".to_string(), user_agent);
        default_headers.insert("Accept".to_string(), "application/json".to_string());
        default_headers.insert("Content-Type".to_string(), "application/json".to_string());
        default_headers.insert(
            "X-Shopify-Access-Token".to_string(),
            token.as_ref().to_string(),
        );

        let client = reqwest::Client::builder()
            .use_rustls_tls()
            .timeout(timeout)
            .build()?;
        // Result files are large; only the connect phase is bounded.
        let download_client = reqwest::Client::builder()
            .use_rustls_tls()
            .connect_timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            endpoint,
            download_client,
            default_headers,
        })
    }

    /// Returns the GraphQL endpoint URL.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Returns the default headers sent with every request.
    #[must_use]
    pub const fn default_headers(&self) -> &HashMap<String, String> {
        &self.default_headers
    }

    fn parse_response_headers(
        headers: &reqwest::header::HeaderMap,
    ) -> HashMap<String, Vec<String>> {
        let mut result: HashMap<String, Vec<String>> = HashMap::new();
        for (name, value) in headers {
            let key = name.as_str().to_lowercase();
            let value = value.to_str().unwrap_or_default().to_string();
            result.entry(key).or_default().push(value);
        }
        result
    }

    /// Serializes the error fields of a failed response body.
    fn serialize_error(response: &HttpResponse) -> String {
        let mut error_body = serde_json::Map::new();

        for key in ["errors", "error", "error_description", "raw_body"] {
            if let Some(value) = response.body.get(key) {
                error_body.insert(key.to_string(), value.clone());
            }
        }
        if let Some(request_id) = response.request_id() {
            error_body.insert(
                "error_reference".to_string(),
                serde_json::json!(format!(
                    "If you report this error, please include this id: {request_id}."
                )),
            );
        }

        serde_json::to_string(&error_body).unwrap_or_else(|_| "{}".to_string())
    }
}

#[async_trait]
impl Transport for HttpClient {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, HttpError> {
        request.verify()?;

        let mut req_builder = self.client.post(&self.endpoint);
        for (key, value) in &self.default_headers {
            req_builder = req_builder.header(key, value);
        }
        if let Some(extra) = &request.extra_headers {
            for (key, value) in extra {
                req_builder = req_builder.header(key, value);
            }
        }

        let res = req_builder
            .body(request.body().to_string())
            .send()
            .await
            .map_err(HttpError::from_reqwest)?;

        let code = res.status().as_u16();
        let res_headers = Self::parse_response_headers(res.headers());
        let body_text = res.text().await.map_err(HttpError::from_reqwest)?;

        let body = if body_text.is_empty() {
            serde_json::json!({})
        } else {
            serde_json::from_str(&body_text)
                .unwrap_or_else(|_| serde_json::json!({ "raw_body": body_text }))
        };

        let response = HttpResponse::new(code, res_headers, body);
        tracing::trace!(code, endpoint = %self.endpoint, "GraphQL response received");

        if response.is_ok() {
            return Ok(response);
        }

        Err(HttpError::Response(HttpResponseError {
            code,
            message: Self::serialize_error(&response),
            error_reference: response.request_id().map(String::from),
            retry_after: response.retry_request_after,
        }))
    }

    async fn download(&self, url: &str) -> Result<Box<dyn ChunkSource>, HttpError> {
        let res = self
            .download_client
            .get(url)
            .send()
            .await
            .map_err(HttpError::from_reqwest)?;

        let code = res.status().as_u16();
        if !(200..=299).contains(&code) {
            let body = res.text().await.unwrap_or_default();
            return Err(HttpError::Response(HttpResponseError {
                code,
                message: body,
                error_reference: None,
                retry_after: None,
            }));
        }

        Ok(Box::new(ResponseChunks { response: res }))
    }
}

/// Streams a download body chunk by chunk.
struct ResponseChunks {
    response: reqwest::Response,
}

#[async_trait]
impl ChunkSource for ResponseChunks {
    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, HttpError> {
        let chunk = self
            .response
            .chunk()
            .await
            .map_err(HttpError::from_reqwest)?;
        Ok(chunk.map(|bytes| bytes.to_vec()))
    }
}
