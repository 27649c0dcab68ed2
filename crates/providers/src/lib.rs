//! LLM provider implementations for kbchat.
//!
//! All providers implement the `kbchat_core::Provider` trait and hand back
//! raw chunks. [`normalize`] decodes those chunks into stream events and
//! [`ModelAdapter`] is what the agent loop talks to.

pub mod adapter;
pub mod anthropic;
pub mod normalize;
pub mod scripted;

pub use adapter::{COMPLETION_FALLBACK, ModelAdapter};
pub use anthropic::AnthropicProvider;
pub use normalize::normalize;
pub use scripted::{Script, ScriptStep, ScriptedProvider};

use kbchat_config::ProviderConfig;
use kbchat_core::error::ProviderError;
use kbchat_core::provider::{Provider, ToolDefinition};
use std::sync::Arc;

/// Build the configured provider.
pub fn build_provider(config: &ProviderConfig) -> Result<Arc<dyn Provider>, ProviderError> {
    let api_key = config.api_key.clone().ok_or_else(|| {
        ProviderError::NotConfigured(
            "no API key; set provider.api_key, KBCHAT_API_KEY or ANTHROPIC_API_KEY".into(),
        )
    })?;
    let provider = AnthropicProvider::with_timeout(api_key, config.request_timeout_secs)?
        .with_base_url(&config.api_url);
    Ok(Arc::new(provider))
}

/// Build a model adapter from configuration around an existing provider.
pub fn build_adapter(
    provider: Arc<dyn Provider>,
    config: &ProviderConfig,
    tools: Vec<ToolDefinition>,
) -> ModelAdapter {
    ModelAdapter::new(provider, &config.model)
        .with_fast_model(&config.fast_model)
        .with_temperature(config.temperature)
        .with_max_tokens(config.max_tokens)
        .with_tools(tools)
}
