use std::future::Future;

use futures::stream::BoxStream;
use tokio_util::sync::CancellationToken;

use super::configs::CompletionRequest;
use crate::errors::{ProviderError, ProviderResult};
use crate::models::chunk::StreamChunk;

/// A one-shot stream of normalized chunks. Nothing is sent to the provider until
/// the stream is first polled.
pub type ChunkStream = BoxStream<'static, ProviderResult<StreamChunk>>;

/// Base trait for AI providers (OpenAI, Anthropic, etc)
pub trait Provider: Send + Sync {
    /// Short identifier used in logs
    fn name(&self) -> &str;

    /// Stream the next assistant turn for `request`. Cancelling `cancel` makes the
    /// stream yield `ProviderError::Cancelled` and end.
    fn stream(&self, request: CompletionRequest, cancel: CancellationToken) -> ChunkStream;
}

/// Race `future` against `cancel`
pub async fn cancellable<F: Future>(
    cancel: &CancellationToken,
    future: F,
) -> ProviderResult<F::Output> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ProviderError::Cancelled),
        output = future => Ok(output),
    }
}
