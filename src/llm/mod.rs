//! LLM module - Language Model integrations
//!
//! Provides abstractions over model backends: a local Ollama server for
//! development and any OpenAI-compatible endpoint for hosted deployments.

pub mod ollama;
pub mod openai;
pub mod provider;
pub mod retry;
pub mod traits;

pub use ollama::OllamaClient;
pub use openai::OpenAiProvider;
pub use provider::create_provider;
pub use retry::RetryingProvider;
pub use traits::{ChatModel, GenerateOptions, LLMProvider, LLMResponse, TokenUsage};
