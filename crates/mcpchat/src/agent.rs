use std::sync::Arc;

use async_stream::try_stream;
use futures::stream::BoxStream;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::client::{ChatParams, LlmClient};
use crate::config::Config;
use crate::errors::{AgentError, AgentResult, ToolResult};
use crate::models::chunk::StreamChunk;
use crate::models::message::Message;
use crate::models::tool::{Tool, ToolCall};
use crate::prompt::{guidelines_message, SYSTEM_PROMPT};
use crate::providers::base::cancellable;
use crate::tools::{
    control_flow_tools, is_control_flow_tool, ToolOutput, ToolRegistry, CONTROL_FLOW_ACK,
};

/// Plain text turns end the chat once this many turns have run
pub const MAX_TURNS: usize = 10;

#[derive(Debug, Clone)]
pub struct AgentSettings {
    pub system_prompt: String,
    pub guidelines: Option<String>,
    pub model: String,
}

impl AgentSettings {
    pub fn new<S: Into<String>>(model: S) -> Self {
        Self {
            system_prompt: SYSTEM_PROMPT.to_string(),
            guidelines: None,
            model: model.into(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        let settings = Self::new(config.default_model.clone());
        match &config.guidelines {
            Some(guidelines) => settings.with_guidelines(guidelines.clone()),
            None => settings,
        }
    }

    pub fn with_system_prompt<S: Into<String>>(mut self, system_prompt: S) -> Self {
        self.system_prompt = system_prompt.into();
        self
    }

    pub fn with_guidelines<S: Into<String>>(mut self, guidelines: S) -> Self {
        let guidelines = guidelines.into();
        self.guidelines = (!guidelines.trim().is_empty()).then_some(guidelines);
        self
    }
}

/// Per-call options for `Agent::chat`
#[derive(Debug, Clone, Default)]
pub struct ChatOptions {
    pub cancel: Option<CancellationToken>,
    /// Use this model for the call instead of the agent's current one
    pub model: Option<String>,
}

impl ChatOptions {
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn with_model<S: Into<String>>(mut self, model: S) -> Self {
        self.model = Some(model.into());
        self
    }
}

/// Agent drives a conversation with the LLM, dispatching the tool calls it makes
/// until the model finishes, stops, or the turn limit is reached.
pub struct Agent {
    client: LlmClient,
    registry: Arc<dyn ToolRegistry>,
    settings: AgentSettings,
    model: String,
    tools: Option<Vec<Tool>>,
    conversation: Vec<Message>,
    turn_count: usize,
}

impl Agent {
    pub fn new(client: LlmClient, registry: Arc<dyn ToolRegistry>, settings: AgentSettings) -> Self {
        let conversation = fresh_conversation(&settings);
        Self {
            client,
            registry,
            model: settings.model.clone(),
            settings,
            tools: None,
            conversation,
            turn_count: 0,
        }
    }

    /// Discover the registry's tools. Runs once; later calls keep the cached list.
    pub async fn initialize(&mut self) -> AgentResult<()> {
        if self.tools.is_some() {
            return Ok(());
        }
        let mut tools = self
            .registry
            .list_tools()
            .await
            .map_err(AgentError::ToolDiscovery)?;
        tools.retain(|tool| !is_control_flow_tool(&tool.name));
        info!(count = tools.len(), "discovered tools");
        self.tools = Some(tools);
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.tools.is_some()
    }

    /// Discovered tools plus the control-flow tools
    pub fn tools(&self) -> Vec<Tool> {
        let mut tools = self.tools.clone().unwrap_or_default();
        tools.extend(control_flow_tools());
        tools
    }

    pub fn conversation(&self) -> &[Message] {
        &self.conversation
    }

    /// Start over with only the system prompt and guidelines
    pub fn reset_conversation(&mut self) {
        self.conversation = fresh_conversation(&self.settings);
        self.turn_count = 0;
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn set_model<S: Into<String>>(&mut self, model: S) {
        self.model = model.into();
    }

    /// Number of LLM turns run by the most recent `chat`
    pub fn turn_count(&self) -> usize {
        self.turn_count
    }

    /// Send `input` and stream the output of every turn it takes to answer it.
    ///
    /// Text is forwarded as it arrives, interleaved with a notice for each tool
    /// call. Cancelling the token ends the stream quietly.
    pub fn chat<'a>(
        &'a mut self,
        input: &str,
        options: ChatOptions,
    ) -> BoxStream<'a, AgentResult<String>> {
        let input = input.to_string();

        Box::pin(try_stream! {
            if self.tools.is_none() {
                Err::<(), _>(AgentError::NotInitialized)?;
            }
            let tools = self.tools();
            let cancel = options.cancel.unwrap_or_default();
            let model = options.model.unwrap_or_else(|| self.model.clone());

            self.conversation.push(Message::user(input));
            self.turn_count = 0;
            let mut expect_tool_call = false;
            info!(model = %model, "chat started");

            'turns: loop {
                if cancel.is_cancelled() {
                    break;
                }
                self.turn_count += 1;
                debug!(turn = self.turn_count, "requesting turn");

                let params = ChatParams::new(model.clone(), self.conversation.clone())
                    .with_tools(tools.clone());
                let mut chunks = self.client.chat_completion(params, cancel.clone());
                let mut text = String::new();
                let mut called_tool = false;

                while let Some(chunk) = chunks.next().await {
                    match chunk {
                        Ok(StreamChunk::Text(fragment)) => {
                            text.push_str(&fragment);
                            if !fragment.is_empty() {
                                yield fragment;
                            }
                        }
                        Ok(StreamChunk::ToolCall(call)) => {
                            let Some(result) = self.dispatch(&call, &cancel).await else {
                                break 'turns;
                            };
                            match result {
                                Ok(output) => {
                                    let notice = format_tool_notice(&call, &output.content);
                                    self.conversation.push(
                                        Message::assistant(std::mem::take(&mut text))
                                            .with_tool_call(call.clone()),
                                    );
                                    self.conversation
                                        .push(Message::tool(call.name, call.id, output.content));
                                    called_tool = true;
                                    yield notice;
                                }
                                Err(e) => {
                                    warn!(tool = %call.name, error = %e, "tool call failed");
                                    yield format!("\nError: {}\n", e);
                                }
                            }
                        }
                        Ok(StreamChunk::Error(message)) => {
                            warn!(error = %message, "provider reported a failure");
                            yield format!("\n{}\n", message);
                            break 'turns;
                        }
                        Err(e) if e.is_cancelled() => break 'turns,
                        Err(e) => {
                            warn!(error = %e, "provider stream failed");
                            yield format!("\nError: {}\n", e);
                            break 'turns;
                        }
                    }
                }

                if !called_tool {
                    self.conversation.push(Message::assistant(text));
                } else if !text.is_empty() {
                    debug!(dropped = text.len(), "text after the last tool call is not recorded");
                }

                let last_tool = self
                    .conversation
                    .last()
                    .filter(|message| message.is_tool_result())
                    .and_then(|message| message.tool_name.clone());
                let last_is_tool = last_tool.is_some();

                if last_tool.as_deref().is_some_and(is_control_flow_tool) {
                    info!(tool = ?last_tool, turns = self.turn_count, "model ended the chat");
                    break;
                }
                if self.turn_count >= MAX_TURNS && !last_is_tool {
                    info!(turns = self.turn_count, "turn limit reached");
                    break;
                }
                if expect_tool_call && !last_is_tool {
                    debug!(turns = self.turn_count, "plain answer where a tool call was expected");
                    break;
                }
                // Every turn after the first must call a tool to keep the chat going
                expect_tool_call = true;
            }
        })
    }

    /// Run one tool call. `None` means the call was cancelled.
    async fn dispatch(
        &self,
        call: &ToolCall,
        cancel: &CancellationToken,
    ) -> Option<ToolResult<ToolOutput>> {
        if is_control_flow_tool(&call.name) {
            return Some(Ok(ToolOutput::new(CONTROL_FLOW_ACK)));
        }
        debug!(tool = %call.name, "dispatching tool call");
        cancellable(cancel, self.registry.call_tool(&call.name, call.arguments.clone()))
            .await
            .ok()
    }
}

fn fresh_conversation(settings: &AgentSettings) -> Vec<Message> {
    let mut conversation = vec![Message::system(settings.system_prompt.clone())];
    if let Some(guidelines) = &settings.guidelines {
        conversation.push(Message::system(guidelines_message(guidelines)));
    }
    conversation
}

/// The text shown to the user for a completed tool call
pub fn format_tool_notice(call: &ToolCall, result: &str) -> String {
    let arguments = serde_json::to_string_pretty(&call.arguments)
        .unwrap_or_else(|_| call.arguments.to_string());
    format!(
        "\nTool Request: {}\n{}\nTool Response:\n{}\n",
        call.name, arguments, result
    )
}
