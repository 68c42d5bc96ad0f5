//! Configuration management for Netdesk
//!
//! Supports environment variables, config files, and runtime overrides.
//! The model backend is chosen here once and injected into every agent.
//!
//! Config file location: ~/.config/netdesk/config.toml

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::PathBuf;

use crate::core::error::{NetdeskError, Result};

/// Main configuration for Netdesk
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Model backend
    #[serde(default)]
    pub provider: ProviderType,
    /// Ollama configuration
    #[serde(default)]
    pub ollama: OllamaConfig,
    /// Hosted OpenAI-compatible backend configuration
    #[serde(default)]
    pub openai: OpenAiConfig,
    /// Model configuration
    #[serde(default)]
    pub models: ModelConfig,
    /// Agent and routing behavior
    #[serde(default)]
    pub agent: AgentConfig,
    /// Model call timeout and retry budget
    #[serde(default)]
    pub retry: RetryConfig,
    /// Diagnostic tool settings
    #[serde(default)]
    pub tools: ToolsConfig,
    /// Ticketing settings
    #[serde(default)]
    pub escalation: EscalationConfig,
    /// Knowledge base settings
    #[serde(default)]
    pub knowledge: KnowledgeConfig,
    /// Checkpoint persistence
    #[serde(default)]
    pub checkpoint: CheckpointConfig,
}

/// Which model backend to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderType {
    /// Local Ollama server
    Ollama,
    /// Hosted OpenAI-compatible endpoint
    OpenAi,
}

impl Default for ProviderType {
    fn default() -> Self {
        match env::var("NETDESK_PROVIDER").as_deref() {
            Ok("openai") | Ok("production") => ProviderType::OpenAi,
            _ => ProviderType::Ollama,
        }
    }
}

impl std::fmt::Display for ProviderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderType::Ollama => write!(f, "ollama"),
            ProviderType::OpenAi => write!(f, "openai"),
        }
    }
}

/// Ollama server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OllamaConfig {
    /// Host address (default: localhost)
    pub host: String,
    /// Port number (default: 11434)
    pub port: u16,
    /// HTTP client timeout in seconds
    pub timeout_secs: u64,
}

/// OpenAI-compatible endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiConfig {
    /// Endpoint root, without the `/v1/chat/completions` suffix
    pub base_url: String,
    /// API key; prefer the OPENAI_API_KEY env var over writing it to disk
    #[serde(default, skip_serializing)]
    pub api_key: String,
    /// Maximum tokens per completion
    pub max_tokens: u32,
}

/// Model configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Model used by every agent unless overridden
    pub default: String,
    /// Dedicated routing model for the triage agent
    pub triage: Option<String>,
    /// Sampling temperature
    pub temperature: f32,
}

impl ModelConfig {
    /// Model the triage agent should use
    pub fn triage_model(&self) -> &str {
        self.triage.as_deref().unwrap_or(&self.default)
    }
}

/// Agent behavior configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Maximum dispatches (agent steps and tool hops) per turn
    /// Default: 25
    pub max_steps: usize,
    /// Knowledge relevance below this escalates (0-10 scale)
    /// Default: 5
    pub relevance_threshold: u8,
    /// Passages retrieved per knowledge lookup
    /// Default: 3
    pub knowledge_results: usize,
    /// Extra model requests when structured output fails validation
    /// Default: 1
    pub format_retries: usize,
    /// Consecutive failed steps tolerated before the turn is aborted
    /// Default: 2
    pub max_step_failures: usize,
    /// Language used when detection fails
    pub default_language: String,
    /// Whether to log at debug level
    pub debug: bool,
}

/// Model call timeout and retry budget
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Per-call timeout in seconds
    pub timeout_secs: u64,
    /// Retries after the first attempt for transient failures
    pub max_retries: u32,
    /// Backoff base; doubled on every attempt
    pub base_delay_ms: u64,
}

/// Diagnostic tool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Per tool-call timeout in seconds
    pub timeout_secs: u64,
    /// Retries for transient tool failures
    pub max_retries: u32,
    /// Echo requests sent by ping_ip
    pub ping_count: u32,
    /// Per-echo wait in seconds
    pub ping_timeout_secs: u64,
    /// TCP connect timeout for check_port
    pub port_timeout_ms: u64,
    /// Root WHOIS server
    pub whois_server: String,
}

/// Ticketing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationConfig {
    /// Webhook that creates tickets; local ids are issued when absent
    pub ticket_url: Option<String>,
    /// Prefix for locally issued ticket ids
    pub ticket_prefix: String,
}

/// Knowledge base configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KnowledgeConfig {
    /// Directory of .md / .txt documents
    pub documents_dir: Option<PathBuf>,
}

/// Checkpoint configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CheckpointConfig {
    /// Directory for per-thread JSON checkpoints; in-memory when absent
    pub dir: Option<PathBuf>,
}

fn env_flag(name: &str) -> Option<bool> {
    env::var(name).ok().map(|v| v == "true" || v == "1")
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            host: env::var("OLLAMA_HOST").unwrap_or_else(|_| "localhost".to_string()),
            port: env::var("OLLAMA_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(11434),
            timeout_secs: 120,
        }
    }
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            base_url: env::var("OPENAI_BASE_URL")
                .unwrap_or_else(|_| "https://api.openai.com".to_string()),
            api_key: env::var("OPENAI_API_KEY").unwrap_or_default(),
            max_tokens: 4096,
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            default: env::var("NETDESK_MODEL").unwrap_or_else(|_| "llama3.2:3b".to_string()),
            triage: env::var("NETDESK_TRIAGE_MODEL").ok(),
            temperature: 0.0,
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_steps: 25,
            relevance_threshold: 5,
            knowledge_results: 3,
            format_retries: 1,
            max_step_failures: 2,
            default_language: env::var("NETDESK_LANGUAGE")
                .unwrap_or_else(|_| "Spanish".to_string()),
            debug: env_flag("NETDESK_DEBUG").unwrap_or(false),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 60,
            max_retries: 2,
            base_delay_ms: 1000,
        }
    }
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 15,
            max_retries: 1,
            ping_count: 2,
            ping_timeout_secs: 1,
            port_timeout_ms: 1000,
            whois_server: "whois.iana.org".to_string(),
        }
    }
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            ticket_url: env::var("NETDESK_TICKET_URL").ok(),
            ticket_prefix: "TASK".to_string(),
        }
    }
}

impl Config {
    /// Get the config directory path
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("netdesk")
    }

    /// Get the config file path
    pub fn config_file() -> PathBuf {
        Self::config_dir().join("config.toml")
    }

    /// Load configuration from file, environment, and defaults
    /// Priority: CLI args > env vars > config file > defaults
    pub fn load() -> Self {
        let _ = dotenvy::dotenv();

        let mut config = Self::load_from_file().unwrap_or_default();
        config.apply_env();
        config
    }

    /// Load configuration from file only
    pub fn load_from_file() -> Result<Self> {
        let config_path = Self::config_file();

        if !config_path.exists() {
            return Err(NetdeskError::config("Config file not found"));
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|e| NetdeskError::config(format!("Failed to read config: {}", e)))?;

        Self::from_toml(&content)
    }

    /// Parse configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| NetdeskError::config(format!("Failed to parse config: {}", e)))
    }

    /// Environment variables override whatever the file said
    fn apply_env(&mut self) {
        if let Ok(provider) = env::var("NETDESK_PROVIDER") {
            self.provider = match provider.as_str() {
                "openai" | "production" => ProviderType::OpenAi,
                _ => ProviderType::Ollama,
            };
        }
        if let Ok(model) = env::var("NETDESK_MODEL") {
            self.models.default = model;
        }
        if let Ok(model) = env::var("NETDESK_TRIAGE_MODEL") {
            self.models.triage = Some(model);
        }
        if let Ok(key) = env::var("OPENAI_API_KEY") {
            self.openai.api_key = key;
        }
        if let Ok(dir) = env::var("NETDESK_KNOWLEDGE_DIR") {
            self.knowledge.documents_dir = Some(PathBuf::from(dir));
        }
        if let Ok(dir) = env::var("NETDESK_CHECKPOINT_DIR") {
            self.checkpoint.dir = Some(PathBuf::from(dir));
        }
        if let Some(debug) = env_flag("NETDESK_DEBUG") {
            self.agent.debug = debug;
        }
    }

    /// Reject settings the orchestrator cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.agent.max_steps == 0 {
            return Err(NetdeskError::config("agent.max_steps must be at least 1"));
        }
        if self.agent.relevance_threshold > 10 {
            return Err(NetdeskError::config(
                "agent.relevance_threshold must be within 0-10",
            ));
        }
        if self.provider == ProviderType::OpenAi && self.openai.api_key.is_empty() {
            return Err(NetdeskError::config(
                "OPENAI_API_KEY is required for the openai provider",
            ));
        }
        Ok(())
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<PathBuf> {
        let config_dir = Self::config_dir();
        let config_path = Self::config_file();

        if !config_dir.exists() {
            fs::create_dir_all(&config_dir)
                .map_err(|e| NetdeskError::config(format!("Failed to create config dir: {}", e)))?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| NetdeskError::config(format!("Failed to serialize config: {}", e)))?;

        fs::write(&config_path, content)
            .map_err(|e| NetdeskError::config(format!("Failed to write config: {}", e)))?;

        Ok(config_path)
    }

    /// Get the full Ollama API URL
    pub fn ollama_url(&self) -> String {
        format!("http://{}:{}", self.ollama.host, self.ollama.port)
    }

    /// Render the effective configuration for display
    pub fn to_toml(&self) -> String {
        toml::to_string_pretty(self).unwrap_or_else(|_| String::from("# Error generating config"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.agent.max_steps, 25);
        assert_eq!(config.agent.relevance_threshold, 5);
        assert_eq!(config.agent.knowledge_results, 3);
        assert_eq!(config.tools.ping_count, 2);
        assert_eq!(config.escalation.ticket_prefix, "TASK");
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config = Config::from_toml(
            r#"
            provider = "ollama"

            [agent]
            max_steps = 8
            relevance_threshold = 6
            knowledge_results = 2
            format_retries = 0
            max_step_failures = 1
            default_language = "English"
            debug = false
            "#,
        )
        .unwrap();
        assert_eq!(config.provider, ProviderType::Ollama);
        assert_eq!(config.agent.max_steps, 8);
        assert_eq!(config.agent.default_language, "English");
        assert_eq!(config.retry.max_retries, 2);
    }

    #[test]
    fn test_validate_rejects_zero_steps() {
        let mut config = Config::default();
        config.provider = ProviderType::Ollama;
        config.agent.max_steps = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_triage_model_falls_back_to_default() {
        let models = ModelConfig {
            default: "llama3.2:3b".to_string(),
            triage: None,
            temperature: 0.0,
        };
        assert_eq!(models.triage_model(), "llama3.2:3b");
    }

    #[test]
    fn test_config_dir() {
        let dir = Config::config_dir();
        assert!(dir.to_string_lossy().contains("netdesk"));
    }
}
