use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};

use crate::models::message::Message;
use crate::models::tool::Tool;

pub const DEFAULT_ANTHROPIC_MAX_TOKENS: u32 = 4096;
pub const DEFAULT_MAX_COMPLETION_TOKENS: u32 = 16384;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningEffort {
    Low,
    #[default]
    Medium,
    High,
}

impl ReasoningEffort {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReasoningEffort::Low => "low",
            ReasoningEffort::Medium => "medium",
            ReasoningEffort::High => "high",
        }
    }
}

impl fmt::Display for ReasoningEffort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReasoningEffort {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "low" => Ok(ReasoningEffort::Low),
            "medium" => Ok(ReasoningEffort::Medium),
            "high" => Ok(ReasoningEffort::High),
            other => Err(format!("unknown reasoning effort: {}", other)),
        }
    }
}

// Accept "High" as well as "high" in config files
impl<'de> Deserialize<'de> for ReasoningEffort {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Generation parameters. Standard and reasoning models take disjoint controls,
/// so a request carries exactly one of the two shapes.
#[derive(Debug, Clone, PartialEq)]
pub enum Sampling {
    Standard {
        temperature: Option<f32>,
        max_tokens: Option<u32>,
    },
    Reasoning {
        effort: ReasoningEffort,
        max_completion_tokens: u32,
    },
}

impl Default for Sampling {
    fn default() -> Self {
        Sampling::Standard {
            temperature: None,
            max_tokens: None,
        }
    }
}

impl Sampling {
    pub fn is_reasoning(&self) -> bool {
        matches!(self, Sampling::Reasoning { .. })
    }
}

/// A fully resolved request handed to a provider
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub tools: Vec<Tool>,
    pub sampling: Sampling,
}

impl CompletionRequest {
    pub fn new<S: Into<String>>(model: S, messages: Vec<Message>) -> Self {
        Self {
            model: model.into(),
            messages,
            tools: Vec::new(),
            sampling: Sampling::default(),
        }
    }

    pub fn with_tools(mut self, tools: Vec<Tool>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_sampling(mut self, sampling: Sampling) -> Self {
        self.sampling = sampling;
        self
    }
}

/// Retry schedule for overloaded responses: `base_delay`, doubled per attempt
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.pow(attempt.saturating_sub(1))
    }
}

#[derive(Debug, Clone)]
pub struct OpenAiProviderConfig {
    pub base_url: String,
    pub api_key: String,
}

impl OpenAiProviderConfig {
    pub fn new<B: Into<String>, K: Into<String>>(base_url: B, api_key: K) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AnthropicProviderConfig {
    pub base_url: String,
    pub api_key: String,
    pub retry: RetryPolicy,
}

impl AnthropicProviderConfig {
    pub fn new<B: Into<String>, K: Into<String>>(base_url: B, api_key: K) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}
