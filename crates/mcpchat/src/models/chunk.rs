use super::tool::ToolCall;

/// One unit of a streamed response, normalized across providers.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamChunk {
    Text(String),
    ToolCall(ToolCall),
    /// Terminal failure rendered as text (`Error: ...`). Nothing follows it.
    Error(String),
}

impl StreamChunk {
    pub fn text<S: Into<String>>(text: S) -> Self {
        StreamChunk::Text(text.into())
    }

    pub fn error<E: std::fmt::Display>(error: E) -> Self {
        StreamChunk::Error(format!("Error: {}", error))
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            StreamChunk::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_error(&self) -> Option<&str> {
        match self {
            StreamChunk::Error(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_tool_call(&self) -> Option<&ToolCall> {
        match self {
            StreamChunk::ToolCall(call) => Some(call),
            _ => None,
        }
    }
}
