//! Configuration for the chat client.
//!
//! The configuration is a plain value that gets passed down to whatever needs
//! it. `ConfigStore` is the only place that caches a loaded configuration, and
//! it does so explicitly: load once on first `get`, replace on `reload`.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::ConfigError;
use crate::providers::configs::ReasoningEffort;

pub const OPENAI_DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const ANTHROPIC_DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
pub const DEFAULT_MODEL: &str = "gpt-4o";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProviderKind {
    #[serde(rename = "openai")]
    OpenAi,
    #[serde(rename = "anthropic")]
    Anthropic,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "openai",
            ProviderKind::Anthropic => "anthropic",
        }
    }

    fn default_base_url(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => OPENAI_DEFAULT_BASE_URL,
            ProviderKind::Anthropic => ANTHROPIC_DEFAULT_BASE_URL,
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "openai" | "open-ai" => Ok(ProviderKind::OpenAi),
            "anthropic" => Ok(ProviderKind::Anthropic),
            other => Err(ConfigError::UnknownProvider(other.to_string())),
        }
    }
}

/// Credentials and endpoint for a single provider
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ProviderSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

/// Provider settings after validation
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedProvider {
    pub kind: ProviderKind,
    pub api_key: String,
    pub base_url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvidersConfig {
    pub openai: ProviderSettings,
    pub anthropic: ProviderSettings,
}

impl ProvidersConfig {
    pub fn get(&self, kind: ProviderKind) -> &ProviderSettings {
        match kind {
            ProviderKind::OpenAi => &self.openai,
            ProviderKind::Anthropic => &self.anthropic,
        }
    }

    fn get_mut(&mut self, kind: ProviderKind) -> &mut ProviderSettings {
        match kind {
            ProviderKind::OpenAi => &mut self.openai,
            ProviderKind::Anthropic => &mut self.anthropic,
        }
    }
}

/// Static generation parameters for a model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelConfig {
    pub id: String,
    pub provider: ProviderKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_completion_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_effort: Option<ReasoningEffort>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_reasoning_model: Option<bool>,
}

impl ModelConfig {
    pub fn new<S: Into<String>>(id: S, provider: ProviderKind) -> Self {
        Self {
            id: id.into(),
            provider,
            max_tokens: None,
            temperature: None,
            max_completion_tokens: None,
            reasoning_effort: None,
            is_reasoning_model: None,
        }
    }

    pub fn reasoning(mut self, effort: ReasoningEffort, max_completion_tokens: u32) -> Self {
        self.is_reasoning_model = Some(true);
        self.reasoning_effort = Some(effort);
        self.max_completion_tokens = Some(max_completion_tokens);
        self
    }

    pub fn standard(mut self, temperature: f32, max_tokens: u32) -> Self {
        self.temperature = Some(temperature);
        self.max_tokens = Some(max_tokens);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
    pub default_provider: ProviderKind,
    pub default_model: String,
    pub providers: ProvidersConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guidelines: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub models: Vec<ModelConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_provider: ProviderKind::OpenAi,
            default_model: DEFAULT_MODEL.to_string(),
            providers: ProvidersConfig::default(),
            guidelines: None,
            models: Vec::new(),
        }
    }
}

impl Config {
    /// Location of the config file, `~/.config/mcpchat/config.json`
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        let home_dir = dirs::home_dir().ok_or(ConfigError::NoHomeDir)?;
        Ok(home_dir.join(".config").join("mcpchat").join("config.json"))
    }

    /// Read the config file at `path`, falling back to defaults when it does not exist.
    /// Environment overrides are not applied here; see `apply_env`.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            debug!(path = %path.display(), "No config file, using defaults");
            return Ok(Config::default());
        }
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let io_err = |source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        let content = serde_json::to_string_pretty(self).map_err(ConfigError::Serialize)?;
        fs::write(path, content).map_err(io_err)
    }

    /// Overlay process environment variables on top of the file values
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Overlay values from `lookup`, which maps environment variable names to values
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        for (kind, key_var, url_var) in [
            (ProviderKind::OpenAi, "OPENAI_API_KEY", "OPENAI_BASE_URL"),
            (ProviderKind::Anthropic, "ANTHROPIC_API_KEY", "ANTHROPIC_BASE_URL"),
        ] {
            let settings = self.providers.get_mut(kind);
            if let Some(key) = lookup(key_var) {
                settings.api_key = Some(key);
            }
            if let Some(url) = lookup(url_var) {
                settings.base_url = Some(url);
            }
        }
        if let Some(provider) = lookup("MCPCHAT_PROVIDER") {
            self.default_provider = provider.parse()?;
        }
        if let Some(model) = lookup("MCPCHAT_MODEL") {
            self.default_model = model;
        }
        Ok(())
    }

    /// Validate the settings for `kind`, filling in the default endpoint when none is set
    pub fn resolve_provider(&self, kind: ProviderKind) -> Result<ResolvedProvider, ConfigError> {
        let settings = self.providers.get(kind);

        let api_key = settings
            .api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .ok_or_else(|| ConfigError::MissingApiKey(kind.to_string()))?;

        let base_url = match settings.base_url.as_deref() {
            None => kind.default_base_url(),
            Some(url) if url.trim().is_empty() => {
                return Err(ConfigError::MissingBaseUrl(kind.to_string()))
            }
            Some(url) => url.trim(),
        };

        Ok(ResolvedProvider {
            kind,
            api_key: api_key.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

/// Case-insensitive lookup table of model parameters
#[derive(Debug, Clone, Default)]
pub struct ModelRegistry {
    models: HashMap<String, ModelConfig>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the well-known models preloaded
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        for model in [
            ModelConfig::new("gpt-4o", ProviderKind::OpenAi).standard(0.7, 4096),
            ModelConfig::new("gpt-4o-mini", ProviderKind::OpenAi).standard(0.7, 4096),
            ModelConfig::new("o1", ProviderKind::OpenAi).reasoning(ReasoningEffort::Medium, 32768),
            ModelConfig::new("o3-mini", ProviderKind::OpenAi)
                .reasoning(ReasoningEffort::Medium, 16384),
            ModelConfig::new("o4-mini", ProviderKind::OpenAi)
                .reasoning(ReasoningEffort::Medium, 16384),
            ModelConfig::new("claude-3-5-sonnet-latest", ProviderKind::Anthropic)
                .standard(0.7, 8192),
            ModelConfig::new("claude-3-7-sonnet-latest", ProviderKind::Anthropic)
                .standard(0.7, 8192),
        ] {
            registry.insert(model);
        }
        registry
    }

    /// Built-in models overlaid with the entries from `config`
    pub fn from_config(config: &Config) -> Self {
        let mut registry = Self::builtin();
        for model in &config.models {
            registry.insert(model.clone());
        }
        registry
    }

    pub fn insert(&mut self, model: ModelConfig) {
        self.models.insert(model.id.to_lowercase(), model);
    }

    pub fn get(&self, id: &str) -> Option<&ModelConfig> {
        self.models.get(&id.to_lowercase())
    }
}

/// Explicit load-once cache around the config file.
///
/// The first `get` reads the file and applies environment overrides; later calls
/// return the same `Arc` until `reload` or `save` replaces it.
pub struct ConfigStore {
    path: PathBuf,
    apply_env: bool,
    cached: RwLock<Option<Arc<Config>>>,
}

impl ConfigStore {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            path: path.into(),
            apply_env: true,
            cached: RwLock::new(None),
        }
    }

    /// Store that reads only the file, ignoring the process environment
    pub fn without_env<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            apply_env: false,
            ..Self::new(path)
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self) -> Result<Arc<Config>, ConfigError> {
        if let Some(config) = self
            .cached
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
        {
            return Ok(Arc::clone(config));
        }
        self.reload()
    }

    pub fn reload(&self) -> Result<Arc<Config>, ConfigError> {
        let mut config = Config::load_from(&self.path)?;
        if self.apply_env {
            config.apply_env()?;
        }
        let config = Arc::new(config);
        *self.cached.write().unwrap_or_else(|e| e.into_inner()) = Some(Arc::clone(&config));
        Ok(config)
    }

    /// Persist `config` and make it the cached value
    pub fn save(&self, config: Config) -> Result<Arc<Config>, ConfigError> {
        config.save_to(&self.path)?;
        let config = Arc::new(config);
        *self.cached.write().unwrap_or_else(|e| e.into_inner()) = Some(Arc::clone(&config));
        Ok(config)
    }
}
