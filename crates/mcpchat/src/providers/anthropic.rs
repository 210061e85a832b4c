use async_stream::{stream, try_stream};
use futures::StreamExt;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::base::{cancellable, ChunkStream, Provider};
use super::configs::{
    AnthropicProviderConfig, CompletionRequest, Sampling, DEFAULT_ANTHROPIC_MAX_TOKENS,
};
use super::sse::event_stream;
use super::utils::{
    check_response, messages_to_anthropic_spec, tools_to_anthropic_spec, ToolCallAccumulator,
};
use crate::errors::{ConfigError, ProviderError, ProviderResult};
use crate::models::chunk::StreamChunk;

const ANTHROPIC_VERSION: &str = "2023-06-01";

#[derive(Debug, Clone, Serialize)]
struct MessagesRequest {
    model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<Value>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    stream: bool,
}

pub struct AnthropicProvider {
    client: Client,
    config: AnthropicProviderConfig,
}

impl AnthropicProvider {
    pub fn new(config: AnthropicProviderConfig) -> Result<Self, ConfigError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(600)) // 10 minutes timeout
            .build()
            .map_err(ConfigError::HttpClient)?;

        Ok(Self { client, config })
    }

    fn build_payload(request: &CompletionRequest) -> ProviderResult<MessagesRequest> {
        let (system, messages) = messages_to_anthropic_spec(&request.messages);
        let (max_tokens, temperature) = match request.sampling {
            Sampling::Standard {
                temperature,
                max_tokens,
            } => (
                max_tokens.unwrap_or(DEFAULT_ANTHROPIC_MAX_TOKENS),
                temperature,
            ),
            Sampling::Reasoning {
                max_completion_tokens,
                ..
            } => (max_completion_tokens, None),
        };

        Ok(MessagesRequest {
            model: request.model.clone(),
            system,
            messages,
            tools: tools_to_anthropic_spec(&request.tools)?,
            max_tokens,
            temperature,
            stream: true,
        })
    }

    /// One request/response exchange, without retries
    fn attempt(&self, payload: MessagesRequest, cancel: CancellationToken) -> ChunkStream {
        let client = self.client.clone();
        let url = format!("{}/v1/messages", self.config.base_url.trim_end_matches('/'));
        let api_key = self.config.api_key.clone();

        Box::pin(try_stream! {
            let response = cancellable(
                &cancel,
                client
                    .post(&url)
                    .header("x-api-key", &api_key)
                    .header("anthropic-version", ANTHROPIC_VERSION)
                    .json(&payload)
                    .send(),
            )
            .await??;
            let response = check_response(response, &cancel).await?;

            let mut events = event_stream(response);
            let mut pending = ToolCallAccumulator::new();
            while let Some(event) = cancellable(&cancel, events.next()).await? {
                let event = event?;
                let data: Value = serde_json::from_str(&event.data)?;
                let Some(chunks) = decode_event(&data, &mut pending)? else {
                    break;
                };
                for chunk in chunks {
                    yield chunk;
                }
            }

            for call in pending.drain() {
                yield StreamChunk::ToolCall(call);
            }
        })
    }
}

/// Translate one streaming event. `None` marks the end of the message.
fn decode_event(
    data: &Value,
    pending: &mut ToolCallAccumulator,
) -> ProviderResult<Option<Vec<StreamChunk>>> {
    let index = data
        .get("index")
        .and_then(Value::as_u64)
        .map(|index| index as usize)
        .unwrap_or_default();
    let mut chunks = Vec::new();

    match data.get("type").and_then(Value::as_str).unwrap_or_default() {
        "message_stop" => return Ok(None),
        "content_block_start" => {
            let block = data.get("content_block").unwrap_or(&Value::Null);
            match block.get("type").and_then(Value::as_str) {
                Some("text") => {
                    if let Some(text) = block.get("text").and_then(Value::as_str) {
                        if !text.is_empty() {
                            chunks.push(StreamChunk::text(text));
                        }
                    }
                }
                Some("tool_use") => pending.apply(
                    index,
                    block.get("id").and_then(Value::as_str),
                    block.get("name").and_then(Value::as_str),
                    None,
                ),
                _ => {}
            }
        }
        "content_block_delta" => {
            let delta = data.get("delta").unwrap_or(&Value::Null);
            match delta.get("type").and_then(Value::as_str) {
                Some("text_delta") => {
                    if let Some(text) = delta.get("text").and_then(Value::as_str) {
                        if !text.is_empty() {
                            chunks.push(StreamChunk::text(text));
                        }
                    }
                }
                Some("input_json_delta") => pending.apply(
                    index,
                    None,
                    None,
                    delta.get("partial_json").and_then(Value::as_str),
                ),
                _ => {}
            }
        }
        "content_block_stop" => {
            if let Some(call) = pending.finish(index) {
                chunks.push(StreamChunk::ToolCall(call));
            }
        }
        "error" => {
            let error = data.get("error").unwrap_or(&Value::Null);
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
                .to_string();
            return Err(match error.get("type").and_then(Value::as_str) {
                Some("overloaded_error") => ProviderError::Overloaded(message),
                _ => ProviderError::Stream(message),
            });
        }
        // message_start, message_delta, ping
        _ => {}
    }

    Ok(Some(chunks))
}

impl Provider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    /// Streams the response, retrying overloaded attempts that produced no output
    /// yet. Failures other than cancellation end the stream with a
    /// `StreamChunk::Error` carrying the `Error:` text instead of an error item.
    fn stream(&self, request: CompletionRequest, cancel: CancellationToken) -> ChunkStream {
        let payload = Self::build_payload(&request);
        let retry = self.config.retry;
        let attempts: Vec<_> = match &payload {
            Ok(payload) => (0..=retry.max_retries)
                .map(|_| self.attempt(payload.clone(), cancel.clone()))
                .collect(),
            Err(_) => Vec::new(),
        };
        debug!(model = %request.model, messages = request.messages.len(), "anthropic request");

        Box::pin(stream! {
            if let Err(e) = payload {
                yield Ok(StreamChunk::error(e));
            }

            let mut retries = 0;
            'attempts: for mut chunks in attempts {
                let mut emitted = false;
                while let Some(item) = chunks.next().await {
                    match item {
                        Ok(chunk) => {
                            emitted = true;
                            yield Ok(chunk);
                        }
                        Err(ProviderError::Cancelled) => {
                            yield Err(ProviderError::Cancelled);
                            break 'attempts;
                        }
                        Err(ProviderError::Overloaded(message))
                            if !emitted && retries < retry.max_retries =>
                        {
                            retries += 1;
                            let delay = retry.delay_for(retries);
                            warn!(retry = retries, ?delay, %message, "anthropic overloaded, backing off");
                            if cancellable(&cancel, tokio::time::sleep(delay)).await.is_err() {
                                yield Err(ProviderError::Cancelled);
                                break 'attempts;
                            }
                            continue 'attempts;
                        }
                        Err(e) => {
                            warn!(error = %e, "anthropic request failed");
                            yield Ok(StreamChunk::error(e));
                            break 'attempts;
                        }
                    }
                }
                break;
            }
        })
    }
}
