//! The tool registry seam between the agent and whatever executes tools.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::errors::{ToolError, ToolResult};
use crate::models::tool::Tool;

pub const TASK_COMPLETE: &str = "task_complete";
pub const ASK_QUESTION: &str = "ask_question";

/// Acknowledgement recorded as the result of a control-flow tool
pub const CONTROL_FLOW_ACK: &str = "Acknowledged.";

/// The result payload of a tool call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutput {
    pub content: String,
}

impl ToolOutput {
    pub fn new<S: Into<String>>(content: S) -> Self {
        Self {
            content: content.into(),
        }
    }
}

/// Discovers and executes tools on behalf of the agent
#[async_trait]
pub trait ToolRegistry: Send + Sync {
    /// All tools currently available. Queried once when an agent initializes.
    async fn list_tools(&self) -> ToolResult<Vec<Tool>>;

    /// Execute `name` with `arguments`. Unknown tools fail with `ToolError::NotFound`.
    async fn call_tool(&self, name: &str, arguments: Value) -> ToolResult<ToolOutput>;
}

/// The synthetic tools the model uses to end a task or ask the user something
pub fn control_flow_tools() -> Vec<Tool> {
    vec![
        Tool::new(
            TASK_COMPLETE,
            "Call this when the user's request has been fully handled.",
            json!({"type": "object", "properties": {}}),
        ),
        Tool::new(
            ASK_QUESTION,
            "Call this after asking the user a clarifying question, to wait for their answer.",
            json!({"type": "object", "properties": {}}),
        ),
    ]
}

pub fn is_control_flow_tool(name: &str) -> bool {
    name == TASK_COMPLETE || name == ASK_QUESTION
}

type ToolHandler = Arc<dyn Fn(Value) -> ToolResult<String> + Send + Sync>;

/// In-process tools backed by closures
#[derive(Clone, Default)]
pub struct StaticToolRegistry {
    tools: Vec<Tool>,
    handlers: HashMap<String, ToolHandler>,
}

impl StaticToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `tool`, replacing any earlier tool with the same name
    pub fn register<F>(mut self, tool: Tool, handler: F) -> Self
    where
        F: Fn(Value) -> ToolResult<String> + Send + Sync + 'static,
    {
        self.tools.retain(|existing| existing.name != tool.name);
        self.handlers.insert(tool.name.clone(), Arc::new(handler));
        self.tools.push(tool);
        self
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[async_trait]
impl ToolRegistry for StaticToolRegistry {
    async fn list_tools(&self) -> ToolResult<Vec<Tool>> {
        Ok(self.tools.clone())
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> ToolResult<ToolOutput> {
        let handler = self
            .handlers
            .get(name)
            .ok_or_else(|| ToolError::NotFound(name.to_string()))?;
        handler(arguments).map(ToolOutput::new)
    }
}
