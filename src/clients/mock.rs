//! In-memory transport used by unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::clients::{BufferedChunks, ChunkSource, HttpError, HttpRequest, HttpResponse, Transport};

type Handler = Box<dyn Fn(&HttpRequest) -> Result<HttpResponse, HttpError> + Send + Sync>;

/// Replays canned responses, or answers through a handler closure.
pub struct ScriptedTransport {
    script: Mutex<VecDeque<Result<HttpResponse, HttpError>>>,
    handler: Option<Handler>,
    downloads: Mutex<HashMap<String, Vec<Vec<u8>>>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl ScriptedTransport {
    pub fn new(script: impl IntoIterator<Item = Result<HttpResponse, HttpError>>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            handler: None,
            downloads: Mutex::new(HashMap::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn with_handler(
        handler: impl Fn(&HttpRequest) -> Result<HttpResponse, HttpError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            handler: Some(Box::new(handler)),
            ..Self::new(Vec::new())
        }
    }

    pub fn with_download(self, url: &str, chunks: Vec<&str>) -> Self {
        self.downloads.lock().unwrap().insert(
            url.to_string(),
            chunks.into_iter().map(|c| c.as_bytes().to_vec()).collect(),
        );
        self
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, HttpError> {
        self.requests.lock().unwrap().push(request.clone());
        if let Some(handler) = &self.handler {
            return handler(&request);
        }
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| panic!("unexpected request: {}", request.query))
    }

    async fn download(&self, url: &str) -> Result<Box<dyn ChunkSource>, HttpError> {
        let chunks = self
            .downloads
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .unwrap_or_else(|| panic!("unexpected download: {url}"));
        Ok(Box::new(BufferedChunks::new(chunks)))
    }
}
