//! The transport seam between the extraction core and the network.
//!
//! Everything above this trait is transport-agnostic: the host may hand the
//! engine the bundled reqwest [`HttpClient`](crate::clients::HttpClient) or its
//! own implementation (custom auth, proxies, recorded fixtures).

use std::collections::VecDeque;

use async_trait::async_trait;

use crate::clients::errors::HttpError;
use crate::clients::http_request::HttpRequest;
use crate::clients::http_response::HttpResponse;

/// Sends GraphQL requests and downloads bulk result files.
///
/// Implementations must be `Send + Sync`; one transport is shared by every
/// partition worker.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Posts a GraphQL request.
    ///
    /// # Errors
    ///
    /// Returns [`HttpError::Response`] for non-2xx statuses,
    /// [`HttpError::Timeout`] when the per-request timeout elapses and
    /// [`HttpError::Network`]/[`HttpError::Connection`] for I/O failures.
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, HttpError>;

    /// Starts a streaming download of a bulk result file.
    ///
    /// # Errors
    ///
    /// Same taxonomy as [`Transport::send`].
    async fn download(&self, url: &str) -> Result<Box<dyn ChunkSource>, HttpError>;
}

/// A stream of byte chunks from a download in progress.
#[async_trait]
pub trait ChunkSource: Send {
    /// Returns the next chunk, or `None` once the body is exhausted.
    ///
    /// # Errors
    ///
    /// Returns [`HttpError`] if the connection fails mid-body.
    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, HttpError>;
}

/// A [`ChunkSource`] over chunks already held in memory.
#[derive(Debug, Default)]
pub struct BufferedChunks {
    chunks: VecDeque<Vec<u8>>,
}

impl BufferedChunks {
    /// Creates a source yielding `chunks` in order.
    #[must_use]
    pub fn new<I, C>(chunks: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<Vec<u8>>,
    {
        Self {
            chunks: chunks.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl ChunkSource for BufferedChunks {
    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, HttpError> {
        Ok(self.chunks.pop_front())
    }
}
