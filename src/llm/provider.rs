//! Provider factory
//!
//! The backend is chosen once from configuration; agents only ever see the
//! trait object.

use std::sync::Arc;

use tracing::info;

use crate::core::config::{Config, ProviderType};
use crate::core::Result;
use crate::llm::openai::OpenAiProvider;
use crate::llm::retry::RetryingProvider;
use crate::llm::traits::LLMProvider;
use crate::llm::OllamaClient;

/// Create the configured provider, wrapped in the timeout/retry layer
pub fn create_provider(config: &Config) -> Result<Arc<dyn LLMProvider>> {
    let provider: Arc<dyn LLMProvider> = match config.provider {
        ProviderType::Ollama => Arc::new(RetryingProvider::new(
            OllamaClient::from_config(config)?,
            &config.retry,
        )),
        ProviderType::OpenAi => Arc::new(RetryingProvider::new(
            OpenAiProvider::from_config(config)?,
            &config.retry,
        )),
    };
    info!(
        provider = %config.provider,
        model = %config.models.default,
        "model backend selected"
    );
    Ok(provider)
}
