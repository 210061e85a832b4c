use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::role::Role;
use super::tool::ToolCall;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
/// A message to or from an LLM
pub struct Message {
    pub role: Role,
    pub created: i64,
    /// Text body, empty for assistant messages that only call a tool
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    fn new<S: Into<String>>(role: Role, content: S) -> Self {
        Message {
            role,
            created: Utc::now().timestamp(),
            content: content.into(),
            tool_calls: Vec::new(),
            tool_name: None,
            tool_call_id: None,
        }
    }

    /// Create a new system message with the current timestamp
    pub fn system<S: Into<String>>(content: S) -> Self {
        Self::new(Role::System, content)
    }

    /// Create a new user message with the current timestamp
    pub fn user<S: Into<String>>(content: S) -> Self {
        Self::new(Role::User, content)
    }

    /// Create a new assistant message with the current timestamp
    pub fn assistant<S: Into<String>>(content: S) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// Create a tool result message answering the call with `tool_call_id`
    pub fn tool<N, I, S>(tool_name: N, tool_call_id: I, content: S) -> Self
    where
        N: Into<String>,
        I: Into<String>,
        S: Into<String>,
    {
        let mut message = Self::new(Role::Tool, content);
        message.tool_name = Some(tool_name.into());
        message.tool_call_id = Some(tool_call_id.into());
        message
    }

    /// Add a tool call to an assistant message
    pub fn with_tool_call(mut self, tool_call: ToolCall) -> Self {
        self.tool_calls.push(tool_call);
        self
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }

    pub fn is_tool_result(&self) -> bool {
        self.role == Role::Tool
    }
}
