use std::time::Duration;

use anyhow::Result;
use futures::{StreamExt, TryStreamExt};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use mcpchat::errors::ProviderError;
use mcpchat::models::chunk::StreamChunk;
use mcpchat::models::message::Message;
use mcpchat::models::tool::{Tool, ToolCall};
use mcpchat::providers::anthropic::AnthropicProvider;
use mcpchat::providers::base::Provider;
use mcpchat::providers::configs::{
    AnthropicProviderConfig, CompletionRequest, OpenAiProviderConfig, RetryPolicy, Sampling,
};
use mcpchat::providers::openai::OpenAiProvider;

/// Render `events` as a `text/event-stream` body
fn sse_body(events: &[(Option<&str>, Value)]) -> String {
    let mut body = String::new();
    for (event, data) in events {
        if let Some(event) = event {
            body.push_str(&format!("event: {}\n", event));
        }
        body.push_str(&format!("data: {}\n\n", data));
    }
    body
}

fn sse_response(body: String) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(body, "text/event-stream")
}

fn weather_tool() -> Tool {
    Tool::new(
        "get_weather",
        "Get the weather for a location",
        json!({
            "type": "object",
            "required": ["location"],
            "properties": {"location": {"type": "string"}}
        }),
    )
}

async fn collect_ok(provider: &dyn Provider, request: CompletionRequest) -> Result<Vec<StreamChunk>> {
    Ok(provider
        .stream(request, CancellationToken::new())
        .try_collect()
        .await?)
}

fn openai_chunk(delta: Value, finish_reason: Value) -> (Option<&'static str>, Value) {
    (
        None,
        json!({
            "id": "chatcmpl-1",
            "object": "chat.completion.chunk",
            "choices": [{"index": 0, "delta": delta, "finish_reason": finish_reason}]
        }),
    )
}

fn openai_provider(server: &MockServer) -> Result<OpenAiProvider> {
    Ok(OpenAiProvider::new(OpenAiProviderConfig::new(
        format!("{}/v1", server.uri()),
        "test_api_key",
    ))?)
}

#[tokio::test]
async fn test_openai_streams_text() -> Result<()> {
    let server = MockServer::start().await;
    let mut body = sse_body(&[
        openai_chunk(json!({"role": "assistant", "content": ""}), Value::Null),
        openai_chunk(json!({"content": "Hello"}), Value::Null),
        openai_chunk(json!({"content": ", world"}), Value::Null),
        openai_chunk(json!({}), json!("stop")),
    ]);
    body.push_str("data: [DONE]\n\n");

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("authorization", "Bearer test_api_key"))
        .and(body_partial_json(json!({"model": "gpt-4o", "stream": true})))
        .respond_with(sse_response(body))
        .expect(1)
        .mount(&server)
        .await;

    let provider = openai_provider(&server)?;
    let chunks = collect_ok(
        &provider,
        CompletionRequest::new("gpt-4o", vec![Message::user("Hi")]),
    )
    .await?;

    assert_eq!(
        chunks,
        vec![StreamChunk::text("Hello"), StreamChunk::text(", world")]
    );
    Ok(())
}

#[tokio::test]
async fn test_openai_accumulates_tool_call() -> Result<()> {
    let server = MockServer::start().await;
    let body = sse_body(&[
        openai_chunk(
            json!({"tool_calls": [{"index": 0, "id": "call_abc", "type": "function",
                "function": {"name": "get_weather", "arguments": ""}}]}),
            Value::Null,
        ),
        openai_chunk(
            json!({"tool_calls": [{"index": 0, "function": {"arguments": "{\"location\""}}]}),
            Value::Null,
        ),
        openai_chunk(
            json!({"tool_calls": [{"index": 0, "function": {"arguments": ": \"Paris\"}"}}]}),
            Value::Null,
        ),
        openai_chunk(json!({}), json!("tool_calls")),
    ]) + "data: [DONE]\n\n";

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(sse_response(body))
        .mount(&server)
        .await;

    let provider = openai_provider(&server)?;
    let request = CompletionRequest::new("gpt-4o", vec![Message::user("Weather in Paris?")])
        .with_tools(vec![weather_tool()]);
    let chunks = collect_ok(&provider, request).await?;

    assert_eq!(
        chunks,
        vec![StreamChunk::ToolCall(ToolCall::new(
            "call_abc",
            "get_weather",
            json!({"location": "Paris"})
        ))]
    );

    let received = server.received_requests().await.unwrap_or_default();
    let sent: Value = received[0].body_json()?;
    assert_eq!(sent["tools"][0]["function"]["name"], "get_weather");
    Ok(())
}

#[tokio::test]
async fn test_openai_malformed_arguments_fall_back_to_raw_string() -> Result<()> {
    let server = MockServer::start().await;
    let body = sse_body(&[
        openai_chunk(
            json!({"tool_calls": [{"index": 0, "id": "call_1",
                "function": {"name": "get_weather", "arguments": "{\"location\": Par"}}]}),
            Value::Null,
        ),
        openai_chunk(json!({}), json!("tool_calls")),
    ]);

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(sse_response(body))
        .mount(&server)
        .await;

    let provider = openai_provider(&server)?;
    let chunks = collect_ok(
        &provider,
        CompletionRequest::new("gpt-4o", vec![Message::user("Weather?")]),
    )
    .await?;

    let call = chunks[0].as_tool_call().expect("tool call chunk");
    assert_eq!(call.arguments, Value::String("{\"location\": Par".to_string()));
    Ok(())
}

#[tokio::test]
async fn test_openai_flushes_tool_call_when_stream_closes_early() -> Result<()> {
    let server = MockServer::start().await;
    let body = sse_body(&[openai_chunk(
        json!({"tool_calls": [{"index": 0, "id": "call_1",
            "function": {"name": "get_weather", "arguments": "{}"}}]}),
        Value::Null,
    )]);

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(sse_response(body))
        .mount(&server)
        .await;

    let provider = openai_provider(&server)?;
    let chunks = collect_ok(
        &provider,
        CompletionRequest::new("gpt-4o", vec![Message::user("Weather?")]),
    )
    .await?;
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].as_tool_call().map(|c| c.name.as_str()), Some("get_weather"));
    Ok(())
}

#[tokio::test]
async fn test_openai_http_error_is_reported() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "error": {"message": "Incorrect API key provided", "type": "invalid_request_error"}
        })))
        .mount(&server)
        .await;

    let provider = openai_provider(&server)?;
    let results: Vec<_> = provider
        .stream(
            CompletionRequest::new("gpt-4o", vec![Message::user("Hi")]),
            CancellationToken::new(),
        )
        .collect()
        .await;

    assert_eq!(results.len(), 1);
    match &results[0] {
        Err(ProviderError::Api { status, message }) => {
            assert_eq!(*status, 401);
            assert_eq!(message, "Incorrect API key provided");
        }
        other => panic!("unexpected result: {:?}", other),
    }
    Ok(())
}

#[tokio::test]
async fn test_openai_cancelled_before_response() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(sse_response(String::new()).set_delay(Duration::from_secs(30)))
        .mount(&server)
        .await;

    let provider = openai_provider(&server)?;
    let cancel = CancellationToken::new();
    let mut stream = provider.stream(
        CompletionRequest::new("gpt-4o", vec![Message::user("Hi")]),
        cancel.clone(),
    );
    cancel.cancel();

    let first = stream.next().await;
    assert!(matches!(first, Some(Err(ProviderError::Cancelled))));
    Ok(())
}

fn anthropic_provider(server: &MockServer, retry: RetryPolicy) -> Result<AnthropicProvider> {
    Ok(AnthropicProvider::new(
        AnthropicProviderConfig::new(server.uri(), "test_api_key").with_retry(retry),
    )?)
}

fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_retries: 3,
        base_delay: Duration::from_millis(1),
    }
}

fn anthropic_text_body(text: &str) -> String {
    sse_body(&[
        (
            Some("message_start"),
            json!({"type": "message_start", "message": {"id": "msg_1", "role": "assistant", "content": []}}),
        ),
        (
            Some("content_block_start"),
            json!({"type": "content_block_start", "index": 0, "content_block": {"type": "text", "text": ""}}),
        ),
        (Some("ping"), json!({"type": "ping"})),
        (
            Some("content_block_delta"),
            json!({"type": "content_block_delta", "index": 0, "delta": {"type": "text_delta", "text": text}}),
        ),
        (
            Some("content_block_stop"),
            json!({"type": "content_block_stop", "index": 0}),
        ),
        (
            Some("message_delta"),
            json!({"type": "message_delta", "delta": {"stop_reason": "end_turn"}}),
        ),
        (Some("message_stop"), json!({"type": "message_stop"})),
    ])
}

#[tokio::test]
async fn test_anthropic_sends_system_separately() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .and(header("x-api-key", "test_api_key"))
        .and(header("anthropic-version", "2023-06-01"))
        .and(body_partial_json(json!({
            "system": "You are helpful.\nUser guidelines:\nBe brief.",
            "max_tokens": 4096,
            "stream": true
        })))
        .respond_with(sse_response(anthropic_text_body("Hello!")))
        .expect(1)
        .mount(&server)
        .await;

    let provider = anthropic_provider(&server, fast_retry())?;
    let request = CompletionRequest::new(
        "claude-3-5-sonnet-latest",
        vec![
            Message::system("You are helpful."),
            Message::system("User guidelines:\nBe brief."),
            Message::user("Hi"),
        ],
    );
    let chunks = collect_ok(&provider, request).await?;
    assert_eq!(chunks, vec![StreamChunk::text("Hello!")]);

    let received = server.received_requests().await.unwrap_or_default();
    let sent: Value = received[0].body_json()?;
    let messages = sent["messages"].as_array().cloned().unwrap_or_default();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0]["role"], "user");
    Ok(())
}

#[tokio::test]
async fn test_anthropic_tool_use_and_tool_result_round_trip() -> Result<()> {
    let server = MockServer::start().await;
    let body = sse_body(&[
        (
            Some("content_block_start"),
            json!({"type": "content_block_start", "index": 0, "content_block": {"type": "text", "text": ""}}),
        ),
        (
            Some("content_block_delta"),
            json!({"type": "content_block_delta", "index": 0, "delta": {"type": "text_delta", "text": "Let me check."}}),
        ),
        (
            Some("content_block_stop"),
            json!({"type": "content_block_stop", "index": 0}),
        ),
        (
            Some("content_block_start"),
            json!({"type": "content_block_start", "index": 1, "content_block": {
                "type": "tool_use", "id": "toolu_01", "name": "get_weather", "input": {}
            }}),
        ),
        (
            Some("content_block_delta"),
            json!({"type": "content_block_delta", "index": 1, "delta": {
                "type": "input_json_delta", "partial_json": "{\"location\": \"Par"
            }}),
        ),
        (
            Some("content_block_delta"),
            json!({"type": "content_block_delta", "index": 1, "delta": {
                "type": "input_json_delta", "partial_json": "is\"}"
            }}),
        ),
        (
            Some("content_block_stop"),
            json!({"type": "content_block_stop", "index": 1}),
        ),
        (Some("message_stop"), json!({"type": "message_stop"})),
    ]);

    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(sse_response(body))
        .mount(&server)
        .await;

    let provider = anthropic_provider(&server, fast_retry())?;
    let history = vec![
        Message::user("Weather in Rome?"),
        Message::assistant("").with_tool_call(ToolCall::new(
            "toolu_00",
            "get_weather",
            json!({"location": "Rome"}),
        )),
        Message::tool("get_weather", "toolu_00", "Cloudy"),
        Message::user("And Paris?"),
    ];
    let request = CompletionRequest::new("claude-3-5-sonnet-latest", history)
        .with_tools(vec![weather_tool()])
        .with_sampling(Sampling::Standard {
            temperature: Some(0.5),
            max_tokens: Some(1024),
        });
    let chunks = collect_ok(&provider, request).await?;

    assert_eq!(
        chunks,
        vec![
            StreamChunk::text("Let me check."),
            StreamChunk::ToolCall(ToolCall::new(
                "toolu_01",
                "get_weather",
                json!({"location": "Paris"})
            )),
        ]
    );

    let received = server.received_requests().await.unwrap_or_default();
    let sent: Value = received[0].body_json()?;
    assert_eq!(sent["max_tokens"], 1024);
    assert_eq!(sent["temperature"], 0.5);
    assert_eq!(sent["tools"][0]["input_schema"]["type"], "object");
    assert_eq!(sent["messages"][1]["content"][0]["type"], "tool_use");
    assert_eq!(sent["messages"][1]["content"][0]["input"]["location"], "Rome");
    assert_eq!(sent["messages"][2]["role"], "user");
    assert_eq!(sent["messages"][2]["content"][0]["type"], "tool_result");
    assert_eq!(sent["messages"][2]["content"][0]["tool_use_id"], "toolu_00");
    Ok(())
}

#[tokio::test]
async fn test_anthropic_retries_overloaded_then_succeeds() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(ResponseTemplate::new(529).set_body_json(json!({
            "type": "error",
            "error": {"type": "overloaded_error", "message": "Overloaded"}
        })))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(sse_response(anthropic_text_body("Back online")))
        .expect(1)
        .mount(&server)
        .await;

    let provider = anthropic_provider(&server, fast_retry())?;
    let chunks = collect_ok(
        &provider,
        CompletionRequest::new("claude-3-5-sonnet-latest", vec![Message::user("Hi")]),
    )
    .await?;

    assert_eq!(chunks, vec![StreamChunk::text("Back online")]);
    Ok(())
}

#[tokio::test]
async fn test_anthropic_overload_surfaces_as_error_chunk_after_retries() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(ResponseTemplate::new(529).set_body_json(json!({
            "type": "error",
            "error": {"type": "overloaded_error", "message": "Overloaded"}
        })))
        .expect(4)
        .mount(&server)
        .await;

    let provider = anthropic_provider(&server, fast_retry())?;
    let chunks = collect_ok(
        &provider,
        CompletionRequest::new("claude-3-5-sonnet-latest", vec![Message::user("Hi")]),
    )
    .await?;

    assert_eq!(chunks.len(), 1);
    let text = chunks[0].as_error().unwrap_or_default();
    assert!(text.starts_with("Error:"));
    assert!(text.contains("Overloaded"));
    Ok(())
}

#[tokio::test]
async fn test_anthropic_overload_event_mid_stream_is_retried() -> Result<()> {
    let server = MockServer::start().await;
    let overloaded = sse_body(&[
        (
            Some("message_start"),
            json!({"type": "message_start", "message": {"id": "msg_1"}}),
        ),
        (
            Some("error"),
            json!({"type": "error", "error": {"type": "overloaded_error", "message": "Overloaded"}}),
        ),
    ]);
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(sse_response(overloaded))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(sse_response(anthropic_text_body("Recovered")))
        .mount(&server)
        .await;

    let provider = anthropic_provider(&server, fast_retry())?;
    let chunks = collect_ok(
        &provider,
        CompletionRequest::new("claude-3-5-sonnet-latest", vec![Message::user("Hi")]),
    )
    .await?;
    assert_eq!(chunks, vec![StreamChunk::text("Recovered")]);
    Ok(())
}

#[tokio::test]
async fn test_anthropic_other_errors_are_not_retried() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "type": "error",
            "error": {"type": "invalid_request_error", "message": "max_tokens is too large"}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let provider = anthropic_provider(&server, fast_retry())?;
    let chunks = collect_ok(
        &provider,
        CompletionRequest::new("claude-3-5-sonnet-latest", vec![Message::user("Hi")]),
    )
    .await?;

    assert_eq!(chunks.len(), 1);
    assert!(chunks[0]
        .as_error()
        .unwrap_or_default()
        .contains("max_tokens is too large"));
    Ok(())
}
