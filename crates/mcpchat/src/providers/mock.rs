use std::sync::{Arc, Mutex};

use futures::stream;
use tokio_util::sync::CancellationToken;

use crate::errors::{ProviderError, ProviderResult};
use crate::models::chunk::StreamChunk;
use crate::providers::base::{ChunkStream, Provider};
use crate::providers::configs::CompletionRequest;

/// A mock provider that plays back one pre-configured chunk script per turn
#[derive(Clone)]
pub struct MockProvider {
    scripts: Arc<Mutex<Vec<Vec<ProviderResult<StreamChunk>>>>>,
    requests: Arc<Mutex<Vec<CompletionRequest>>>,
}

impl MockProvider {
    /// Create a new mock provider with a sequence of turns
    pub fn new(turns: Vec<Vec<StreamChunk>>) -> Self {
        Self::with_results(
            turns
                .into_iter()
                .map(|turn| turn.into_iter().map(Ok).collect())
                .collect(),
        )
    }

    /// Like `new`, but turns may contain errors
    pub fn with_results(turns: Vec<Vec<ProviderResult<StreamChunk>>>) -> Self {
        Self {
            scripts: Arc::new(Mutex::new(turns)),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Every request received so far
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

impl Provider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    fn stream(&self, request: CompletionRequest, cancel: CancellationToken) -> ChunkStream {
        if cancel.is_cancelled() {
            return Box::pin(stream::iter(vec![Err(ProviderError::Cancelled)]));
        }
        self.requests.lock().unwrap().push(request);

        let mut scripts = self.scripts.lock().unwrap();
        let turn = if scripts.is_empty() {
            // Out of script: an empty text answer
            vec![Ok(StreamChunk::text(""))]
        } else {
            scripts.remove(0)
        };
        Box::pin(stream::iter(turn))
    }
}
