use async_stream::try_stream;
use futures::StreamExt;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::base::{cancellable, ChunkStream, Provider};
use super::configs::{CompletionRequest, OpenAiProviderConfig, ReasoningEffort, Sampling};
use super::sse::event_stream;
use super::utils::{
    check_response, messages_to_openai_spec, tools_to_openai_spec, ToolCallAccumulator, ToolNames,
};
use crate::errors::{ConfigError, ProviderError, ProviderResult};
use crate::models::chunk::StreamChunk;

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<Value>,
    stream: bool,
    #[serde(flatten)]
    params: SamplingParams,
}

// Exactly one variant is flattened into the body
#[derive(Debug, Serialize)]
#[serde(untagged)]
enum SamplingParams {
    Standard {
        #[serde(skip_serializing_if = "Option::is_none")]
        temperature: Option<f32>,
        #[serde(skip_serializing_if = "Option::is_none")]
        max_tokens: Option<u32>,
    },
    Reasoning {
        reasoning_effort: ReasoningEffort,
        max_completion_tokens: u32,
    },
}

impl From<&Sampling> for SamplingParams {
    fn from(sampling: &Sampling) -> Self {
        match *sampling {
            Sampling::Standard {
                temperature,
                max_tokens,
            } => SamplingParams::Standard {
                temperature,
                max_tokens,
            },
            Sampling::Reasoning {
                effort,
                max_completion_tokens,
            } => SamplingParams::Reasoning {
                reasoning_effort: effort,
                max_completion_tokens,
            },
        }
    }
}

pub struct OpenAiProvider {
    client: Client,
    config: OpenAiProviderConfig,
}

impl OpenAiProvider {
    pub fn new(config: OpenAiProviderConfig) -> Result<Self, ConfigError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(600)) // 10 minutes timeout
            .build()
            .map_err(ConfigError::HttpClient)?;

        Ok(Self { client, config })
    }

    fn build_payload(request: &CompletionRequest) -> ProviderResult<ChatCompletionRequest> {
        Ok(ChatCompletionRequest {
            model: request.model.clone(),
            messages: messages_to_openai_spec(&request.messages),
            tools: tools_to_openai_spec(&request.tools)?,
            stream: true,
            params: SamplingParams::from(&request.sampling),
        })
    }
}

/// Translate one `chat.completion.chunk` into normalized chunks.
///
/// Tool call fragments are buffered in `pending` and only released once the
/// choice reports a finish reason.
fn decode_chunk(
    data: &Value,
    pending: &mut ToolCallAccumulator,
) -> ProviderResult<Vec<StreamChunk>> {
    if let Some(error) = data.get("error") {
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string());
        return Err(ProviderError::Stream(message));
    }

    let mut chunks = Vec::new();
    let Some(choice) = data
        .get("choices")
        .and_then(Value::as_array)
        .and_then(|choices| choices.first())
    else {
        return Ok(chunks);
    };

    if let Some(delta) = choice.get("delta") {
        if let Some(text) = delta.get("content").and_then(Value::as_str) {
            if !text.is_empty() {
                chunks.push(StreamChunk::text(text));
            }
        }
        if let Some(tool_calls) = delta.get("tool_calls").and_then(Value::as_array) {
            for (position, call) in tool_calls.iter().enumerate() {
                let index = call
                    .get("index")
                    .and_then(Value::as_u64)
                    .map(|index| index as usize)
                    .unwrap_or(position);
                let function = call.get("function");
                pending.apply(
                    index,
                    call.get("id").and_then(Value::as_str),
                    function
                        .and_then(|f| f.get("name"))
                        .and_then(Value::as_str),
                    function
                        .and_then(|f| f.get("arguments"))
                        .and_then(Value::as_str),
                );
            }
        }
    }

    let finished = choice
        .get("finish_reason")
        .map(|reason| !reason.is_null())
        .unwrap_or(false);
    if finished {
        chunks.extend(pending.drain().into_iter().map(StreamChunk::ToolCall));
    }

    Ok(chunks)
}

impl Provider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    fn stream(&self, request: CompletionRequest, cancel: CancellationToken) -> ChunkStream {
        let client = self.client.clone();
        let config = self.config.clone();

        Box::pin(try_stream! {
            let payload = OpenAiProvider::build_payload(&request)?;
            let names = ToolNames::new(&request.tools)?;
            let url = format!("{}/chat/completions", config.base_url.trim_end_matches('/'));
            debug!(model = %request.model, messages = request.messages.len(), "openai request");

            let response = cancellable(
                &cancel,
                client.post(&url).bearer_auth(&config.api_key).json(&payload).send(),
            )
            .await??;
            let response = check_response(response, &cancel).await?;

            let mut events = event_stream(response);
            let mut pending = ToolCallAccumulator::new();
            while let Some(event) = cancellable(&cancel, events.next()).await? {
                let event = event?;
                if event.data.trim() == "[DONE]" {
                    break;
                }
                let data: Value = serde_json::from_str(&event.data)?;
                for chunk in decode_chunk(&data, &mut pending)? {
                    yield match chunk {
                        StreamChunk::ToolCall(call) => StreamChunk::ToolCall(names.restore(call)),
                        other => other,
                    };
                }
            }

            // Stream closed without a finish reason
            for call in pending.drain() {
                yield StreamChunk::ToolCall(names.restore(call));
            }
        })
    }
}
