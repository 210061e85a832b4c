use std::path::PathBuf;

use thiserror::Error;

/// Failures raised while building a client from configuration. These are fatal
/// and surface before any request is made.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("No API key configured for provider {0}")]
    MissingApiKey(String),

    #[error("No base URL configured for provider {0}")]
    MissingBaseUrl(String),

    #[error("Unknown provider: {0}")]
    UnknownProvider(String),

    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Failed to write config file {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to serialize config: {0}")]
    Serialize(#[source] serde_json::Error),

    #[error("Could not determine home directory")]
    NoHomeDir,

    #[error("Failed to build HTTP client: {0}")]
    HttpClient(#[source] reqwest::Error),
}

#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Provider overloaded: {0}")]
    Overloaded(String),

    #[error("Request failed ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Request(#[from] reqwest::Error),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    #[error("Request cancelled")]
    Cancelled,
}

impl ProviderError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ProviderError::Cancelled)
    }
}

#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Tool execution failed: {0}")]
    Execution(String),

    #[error("Tool server unavailable: {0}")]
    Unavailable(String),
}

#[non_exhaustive]
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Agent has not been initialized; call initialize() first")]
    NotInitialized,

    #[error("Tool discovery failed: {0}")]
    ToolDiscovery(#[source] ToolError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type ProviderResult<T> = Result<T, ProviderError>;
pub type ToolResult<T> = Result<T, ToolError>;
pub type AgentResult<T> = Result<T, AgentError>;
