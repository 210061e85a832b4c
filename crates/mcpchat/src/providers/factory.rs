use super::{
    anthropic::AnthropicProvider,
    base::Provider,
    configs::{AnthropicProviderConfig, OpenAiProviderConfig},
    openai::OpenAiProvider,
};
use crate::config::{ProviderKind, ResolvedProvider};
use crate::errors::ConfigError;

pub fn get_provider(resolved: ResolvedProvider) -> Result<Box<dyn Provider>, ConfigError> {
    match resolved.kind {
        ProviderKind::OpenAi => Ok(Box::new(OpenAiProvider::new(OpenAiProviderConfig::new(
            resolved.base_url,
            resolved.api_key,
        ))?)),
        ProviderKind::Anthropic => Ok(Box::new(AnthropicProvider::new(
            AnthropicProviderConfig::new(resolved.base_url, resolved.api_key),
        )?)),
    }
}
