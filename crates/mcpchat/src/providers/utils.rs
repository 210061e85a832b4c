use std::collections::{BTreeMap, HashMap, HashSet};

use lazy_static::lazy_static;
use regex::Regex;
use reqwest::{Response, StatusCode};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use super::base::cancellable;
use crate::errors::{ProviderError, ProviderResult};
use crate::models::message::Message;
use crate::models::role::Role;
use crate::models::tool::{Tool, ToolCall};

lazy_static! {
    static ref INVALID_FUNCTION_CHARS: Regex = Regex::new(r"[^a-zA-Z0-9_-]").unwrap();
}

/// Convert internal Message format to OpenAI's API message specification
pub fn messages_to_openai_spec(messages: &[Message]) -> Vec<Value> {
    let mut messages_spec = Vec::new();

    for message in messages {
        let converted = match message.role {
            Role::System | Role::User => json!({
                "role": message.role.as_str(),
                "content": message.content,
            }),
            Role::Assistant => {
                let mut converted = json!({
                    "role": "assistant",
                    "content": message.content,
                });
                if message.has_tool_calls() {
                    if message.content.is_empty() {
                        converted["content"] = Value::Null;
                    }
                    converted["tool_calls"] = message
                        .tool_calls
                        .iter()
                        .map(|call| {
                            json!({
                                "id": call.id,
                                "type": "function",
                                "function": {
                                    "name": sanitize_function_name(&call.name),
                                    "arguments": arguments_to_string(&call.arguments),
                                }
                            })
                        })
                        .collect();
                }
                converted
            }
            Role::Tool => json!({
                "role": "tool",
                "tool_call_id": message.tool_call_id.as_deref().unwrap_or_default(),
                "content": message.content,
            }),
        };
        messages_spec.push(converted);
    }

    messages_spec
}

/// Convert internal Tool format to OpenAI's API tool specification
pub fn tools_to_openai_spec(tools: &[Tool]) -> ProviderResult<Vec<Value>> {
    ToolNames::new(tools)?;
    Ok(tools
        .iter()
        .map(|tool| {
            json!({
                "type": "function",
                "function": {
                    "name": sanitize_function_name(&tool.name),
                    "description": tool.description,
                    "parameters": object_schema(&tool.input_schema),
                }
            })
        })
        .collect())
}

/// Split internal messages into Anthropic's top level system text and message list.
///
/// Anthropic does not accept system messages inline, tool results travel as user
/// messages holding a `tool_result` block, and assistant tool calls become
/// `tool_use` blocks.
pub fn messages_to_anthropic_spec(messages: &[Message]) -> (Option<String>, Vec<Value>) {
    let mut system = Vec::new();
    let mut messages_spec = Vec::new();

    for message in messages {
        match message.role {
            Role::System => system.push(message.content.as_str()),
            Role::User => messages_spec.push(json!({
                "role": "user",
                "content": message.content,
            })),
            Role::Assistant => {
                if message.has_tool_calls() {
                    let mut blocks = Vec::new();
                    if !message.content.is_empty() {
                        blocks.push(json!({"type": "text", "text": message.content}));
                    }
                    for call in &message.tool_calls {
                        blocks.push(json!({
                            "type": "tool_use",
                            "id": call.id,
                            "name": call.name,
                            "input": arguments_to_object(&call.arguments),
                        }));
                    }
                    messages_spec.push(json!({"role": "assistant", "content": blocks}));
                } else if !message.content.is_empty() {
                    // Anthropic rejects empty text content
                    messages_spec.push(json!({
                        "role": "assistant",
                        "content": message.content,
                    }));
                }
            }
            Role::Tool => messages_spec.push(json!({
                "role": "user",
                "content": [{
                    "type": "tool_result",
                    "tool_use_id": message.tool_call_id.as_deref().unwrap_or_default(),
                    "content": message.content,
                }]
            })),
        }
    }

    let system = if system.is_empty() {
        None
    } else {
        Some(system.join("\n"))
    };
    (system, messages_spec)
}

pub fn tools_to_anthropic_spec(tools: &[Tool]) -> ProviderResult<Vec<Value>> {
    check_unique_names(tools)?;
    Ok(tools
        .iter()
        .map(|tool| {
            json!({
                "name": tool.name,
                "description": tool.description,
                "input_schema": object_schema(&tool.input_schema),
            })
        })
        .collect())
}

/// Maps the function names advertised to OpenAI back to the registry's names.
///
/// OpenAI only accepts `[a-zA-Z0-9_-]` in function names, so a tool like
/// `fs.read` goes out as `fs_read` and its calls must be translated back.
#[derive(Debug, Clone, Default)]
pub struct ToolNames {
    originals: HashMap<String, String>,
}

impl ToolNames {
    /// Fails when two tools share a name, before or after sanitizing
    pub fn new(tools: &[Tool]) -> ProviderResult<Self> {
        let mut originals = HashMap::new();
        for tool in tools {
            let advertised = sanitize_function_name(&tool.name);
            if let Some(existing) = originals.insert(advertised.clone(), tool.name.clone()) {
                let message = if existing == tool.name {
                    format!("Duplicate tool name: {}", tool.name)
                } else {
                    format!(
                        "Duplicate tool name: {} and {} are both sent as {}",
                        existing, tool.name, advertised
                    )
                };
                return Err(ProviderError::InvalidRequest(message));
            }
        }
        Ok(Self { originals })
    }

    /// The registry name for a function name the model called
    pub fn original<'a>(&'a self, advertised: &'a str) -> &'a str {
        self.originals
            .get(advertised)
            .map(String::as_str)
            .unwrap_or(advertised)
    }

    pub fn restore(&self, mut call: ToolCall) -> ToolCall {
        if let Some(original) = self.originals.get(&call.name) {
            call.name = original.clone();
        }
        call
    }
}

fn check_unique_names(tools: &[Tool]) -> ProviderResult<()> {
    let mut tool_names = HashSet::new();
    for tool in tools {
        if !tool_names.insert(&tool.name) {
            return Err(ProviderError::InvalidRequest(format!(
                "Duplicate tool name: {}",
                tool.name
            )));
        }
    }
    Ok(())
}

// Both providers require an object schema, even for tools without parameters
fn object_schema(schema: &Value) -> Value {
    match schema {
        Value::Object(map) if map.contains_key("type") => schema.clone(),
        Value::Object(map) if !map.is_empty() => {
            let mut schema = map.clone();
            schema.insert("type".to_string(), json!("object"));
            Value::Object(schema)
        }
        _ => json!({"type": "object", "properties": {}}),
    }
}

fn arguments_to_string(arguments: &Value) -> String {
    match arguments {
        Value::String(raw) => raw.clone(),
        other => other.to_string(),
    }
}

fn arguments_to_object(arguments: &Value) -> Value {
    match arguments {
        Value::Object(_) => arguments.clone(),
        Value::Null => json!({}),
        other => json!({"raw_arguments": arguments_to_string(other)}),
    }
}

/// Pass successful responses through and turn everything else into a typed error
pub async fn check_response(
    response: Response,
    cancel: &CancellationToken,
) -> ProviderResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = cancellable(cancel, response.text()).await?.unwrap_or_default();
    Err(error_from_body(status, &body))
}

/// Build the error for a failed HTTP exchange from its status and raw body
pub fn error_from_body(status: StatusCode, body: &str) -> ProviderError {
    let parsed: Option<Value> = serde_json::from_str(body).ok();
    let error = parsed.as_ref().map(|value| value.get("error").unwrap_or(value));
    let message = error
        .and_then(|error| error.get("message"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| body.trim().to_string());
    let is_overloaded = status.as_u16() == 529
        || error
            .and_then(|error| error.get("type"))
            .and_then(Value::as_str)
            == Some("overloaded_error");

    if is_overloaded {
        ProviderError::Overloaded(message)
    } else {
        ProviderError::Api {
            status: status.as_u16(),
            message,
        }
    }
}

/// Decode the accumulated argument text of a tool call. Text that is not valid JSON
/// is passed through as a string rather than failing the turn.
pub fn parse_tool_arguments(raw: &str) -> Value {
    if raw.trim().is_empty() {
        return json!({});
    }
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

pub fn sanitize_function_name(name: &str) -> String {
    INVALID_FUNCTION_CHARS.replace_all(name, "_").to_string()
}

#[derive(Debug, Default)]
struct PendingToolCall {
    id: String,
    name: String,
    arguments: String,
}

/// Buffers tool calls that arrive in pieces, keyed by the provider's slot index
#[derive(Debug, Default)]
pub struct ToolCallAccumulator {
    pending: BTreeMap<usize, PendingToolCall>,
}

impl ToolCallAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(
        &mut self,
        index: usize,
        id: Option<&str>,
        name: Option<&str>,
        arguments: Option<&str>,
    ) {
        let pending = self.pending.entry(index).or_default();
        if let Some(id) = id {
            pending.id.push_str(id);
        }
        if let Some(name) = name {
            pending.name.push_str(name);
        }
        if let Some(arguments) = arguments {
            pending.arguments.push_str(arguments);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Complete the call in slot `index`
    pub fn finish(&mut self, index: usize) -> Option<ToolCall> {
        self.pending
            .remove(&index)
            .and_then(|pending| Self::build(index, pending))
    }

    /// Complete every buffered call, in slot order
    pub fn drain(&mut self) -> Vec<ToolCall> {
        std::mem::take(&mut self.pending)
            .into_iter()
            .filter_map(|(index, pending)| Self::build(index, pending))
            .collect()
    }

    fn build(index: usize, pending: PendingToolCall) -> Option<ToolCall> {
        if pending.name.is_empty() {
            return None;
        }
        let id = if pending.id.is_empty() {
            format!("call_{}", index)
        } else {
            pending.id
        };
        Some(ToolCall::new(
            id,
            pending.name,
            parse_tool_arguments(&pending.arguments),
        ))
    }
}
