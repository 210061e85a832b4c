//! The single entry point for completions, independent of the active provider.

use lazy_static::lazy_static;
use regex::Regex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::{Config, ModelRegistry, ProviderKind};
use crate::errors::ConfigError;
use crate::models::message::Message;
use crate::models::tool::Tool;
use crate::providers::base::{ChunkStream, Provider};
use crate::providers::configs::{CompletionRequest, Sampling, DEFAULT_MAX_COMPLETION_TOKENS};
use crate::providers::factory::get_provider;

lazy_static! {
    static ref REASONING_MODEL_ID: Regex = Regex::new(r"(?i)\bo\d").unwrap();
}

/// Parameters for one completion. `sampling` is filled in from the model
/// registry when left empty.
#[derive(Debug, Clone)]
pub struct ChatParams {
    pub model: String,
    pub messages: Vec<Message>,
    pub tools: Vec<Tool>,
    pub sampling: Option<Sampling>,
}

impl ChatParams {
    pub fn new<S: Into<String>>(model: S, messages: Vec<Message>) -> Self {
        Self {
            model: model.into(),
            messages,
            tools: Vec::new(),
            sampling: None,
        }
    }

    pub fn with_tools(mut self, tools: Vec<Tool>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_sampling(mut self, sampling: Sampling) -> Self {
        self.sampling = Some(sampling);
        self
    }
}

pub struct LlmClient {
    provider: Box<dyn Provider>,
    models: ModelRegistry,
}

impl LlmClient {
    /// Build a client for the configured default provider. Missing credentials fail
    /// here rather than on the first request.
    pub fn new(config: &Config) -> Result<Self, ConfigError> {
        Self::for_provider(config, config.default_provider)
    }

    pub fn for_provider(config: &Config, kind: ProviderKind) -> Result<Self, ConfigError> {
        let resolved = config.resolve_provider(kind)?;
        let provider = get_provider(resolved)?;
        Ok(Self::from_provider(provider, ModelRegistry::from_config(config)))
    }

    pub fn from_provider(provider: Box<dyn Provider>, models: ModelRegistry) -> Self {
        Self { provider, models }
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    pub fn models(&self) -> &ModelRegistry {
        &self.models
    }

    pub fn is_reasoning_model(&self, model: &str) -> bool {
        REASONING_MODEL_ID.is_match(model)
            || self
                .models
                .get(model)
                .and_then(|config| config.is_reasoning_model)
                .unwrap_or(false)
    }

    /// Generation parameters for `model` taken from its registry entry
    pub fn resolve_sampling(&self, model: &str) -> Sampling {
        let config = self.models.get(model);
        if self.is_reasoning_model(model) {
            Sampling::Reasoning {
                effort: config
                    .and_then(|config| config.reasoning_effort)
                    .unwrap_or_default(),
                max_completion_tokens: config
                    .and_then(|config| config.max_completion_tokens.or(config.max_tokens))
                    .unwrap_or(DEFAULT_MAX_COMPLETION_TOKENS),
            }
        } else {
            Sampling::Standard {
                temperature: config.and_then(|config| config.temperature),
                max_tokens: config.and_then(|config| config.max_tokens),
            }
        }
    }

    pub fn chat_completion(&self, params: ChatParams, cancel: CancellationToken) -> ChunkStream {
        let sampling = params
            .sampling
            .unwrap_or_else(|| self.resolve_sampling(&params.model));
        debug!(
            provider = self.provider.name(),
            model = %params.model,
            reasoning = sampling.is_reasoning(),
            "chat completion"
        );

        let request = CompletionRequest::new(params.model, params.messages)
            .with_tools(params.tools)
            .with_sampling(sampling);
        self.provider.stream(request, cancel)
    }
}
