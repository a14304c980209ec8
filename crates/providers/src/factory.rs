//! Provider construction from configuration.
//!
//! Turns a provider name plus [`AppConfig`] into a live `Arc<dyn Provider>`.
//! Every failure here is a construction failure: unknown provider, missing
//! credentials, or an HTTP client that could not be built.

use crate::anthropic::AnthropicProvider;
use crate::openai_compat::OpenAiCompatProvider;
use loresmith_config::AppConfig;
use loresmith_core::error::ProviderError;
use loresmith_core::provider::{Backend, Provider};
use std::sync::Arc;
use tracing::debug;

/// Signature shared by [`build_provider`] and test doubles.
pub type ProviderFactory = dyn Fn(&str, &AppConfig) -> Result<Arc<dyn Provider>, ProviderError> + Send + Sync;

/// Build a provider by name using its `[providers.<name>]` entry and keys.
pub fn build_provider(name: &str, config: &AppConfig) -> Result<Arc<dyn Provider>, ProviderError> {
    let provider_config = config.providers.get(name);
    let custom_url = provider_config.and_then(|p| p.api_url.clone());

    let base_url = custom_url
        .clone()
        .or_else(|| default_base_url(name).map(String::from))
        .ok_or_else(|| {
            ProviderError::NotConfigured(format!(
                "unknown provider '{name}' (set providers.{name}.api_url)"
            ))
        })?;

    let api_key = match config.api_key_for(name) {
        Some(key) => key,
        None if is_local(name) => String::new(),
        None => {
            return Err(ProviderError::NotConfigured(format!(
                "no API key for provider '{name}'"
            )));
        }
    };

    debug!(provider = %name, base_url = %base_url, "Building provider");

    if name == "anthropic" {
        let mut provider = AnthropicProvider::new(api_key)?;
        if let Some(url) = custom_url {
            provider = provider.with_base_url(url);
        }
        Ok(Arc::new(provider))
    } else {
        Ok(Arc::new(OpenAiCompatProvider::new(name, base_url, api_key)?))
    }
}

/// Build the caller-selected backend used for the response step.
///
/// `provider` and `model` override the configured defaults when given.
pub fn build_user_backend(
    config: &AppConfig,
    provider: Option<&str>,
    model: Option<&str>,
) -> Result<Backend, ProviderError> {
    let provider_name = provider.unwrap_or(&config.default_provider);
    let model = model
        .map(String::from)
        .or_else(|| {
            // A provider override without a model uses that provider's own default.
            provider
                .and_then(|p| config.providers.get(p))
                .and_then(|p| p.default_model.clone())
        })
        .unwrap_or_else(|| config.default_model.clone());

    let provider = build_provider(provider_name, config)?;
    Ok(Backend::new(provider, model)
        .with_temperature(config.default_temperature)
        .with_max_tokens(Some(config.default_max_tokens)))
}

/// Providers that run locally and accept requests without a key.
pub fn is_local(name: &str) -> bool {
    matches!(name, "ollama" | "vllm" | "llamacpp" | "llama.cpp")
}

/// Get the default base URL for well-known providers.
pub fn default_base_url(provider_name: &str) -> Option<&'static str> {
    let url = match provider_name {
        "openrouter" => "https://openrouter.ai/api/v1",
        "openai" => "https://api.openai.com/v1",
        "anthropic" => "https://api.anthropic.com",
        "ollama" => "http://localhost:11434/v1",
        "deepseek" => "https://api.deepseek.com/v1",
        "groq" => "https://api.groq.com/openai/v1",
        "together" => "https://api.together.xyz/v1",
        "fireworks" => "https://api.fireworks.ai/inference/v1",
        "vllm" => "http://localhost:8000/v1",
        "llamacpp" | "llama.cpp" => "http://localhost:8080/v1",
        _ => return None,
    };
    Some(url)
}
