//! Hosted model provider implementations for replybot.

pub mod common;
pub mod gemini;
pub mod openai_compat;

pub use common::GenerationSettings;
pub use gemini::GeminiProvider;
pub use openai_compat::OpenAiCompatProvider;

use replybot_config::{ProviderConfig, ProviderKind};
use replybot_core::error::ProviderError;
use replybot_core::provider::Provider;
use std::sync::Arc;
use std::time::Duration;

/// Build the provider selected by `config`.
pub fn build_from_config(config: &ProviderConfig) -> Result<Arc<dyn Provider>, ProviderError> {
    let settings = GenerationSettings {
        model: config.model.clone(),
        temperature: config.temperature,
        max_output_tokens: config.max_output_tokens,
    };
    let timeout = Duration::from_secs(config.request_timeout_secs);

    match config.kind {
        ProviderKind::Gemini => {
            let api_key = config.api_key.clone().ok_or_else(|| {
                ProviderError::NotConfigured(
                    "Gemini needs an API key (provider.api_key or GEMINI_API_KEY)".into(),
                )
            })?;
            Ok(Arc::new(GeminiProvider::new(
                api_key,
                config.api_url.as_deref(),
                settings,
                Duration::from_secs(config.cache_ttl_secs),
                timeout,
            )?))
        }
        ProviderKind::OpenaiCompat => {
            let base_url = config
                .api_url
                .clone()
                .unwrap_or_else(|| "https://api.openai.com/v1".into());
            // Local servers such as Ollama accept any key.
            let api_key = config.api_key.clone().unwrap_or_else(|| "none".into());
            Ok(Arc::new(OpenAiCompatProvider::new(
                "openai_compat",
                base_url,
                api_key,
                settings,
                timeout,
            )?))
        }
    }
}
