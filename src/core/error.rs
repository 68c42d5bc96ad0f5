//! Custom error types for Netdesk
//!
//! Provides a unified error handling system across all modules.

use std::time::Duration;

use thiserror::Error;

/// Main error type for Netdesk operations
#[derive(Error, Debug)]
pub enum NetdeskError {
    /// Model backend connection or API errors
    #[error("Model backend error: {0}")]
    Llm(String),

    /// Model backend returned a non-success HTTP status
    #[error("Model backend returned {status}: {body}")]
    LlmStatus { status: u16, body: String },

    /// Model not available on the backend
    #[error("Model '{0}' not available. Run: ollama pull {0}")]
    ModelNotFound(String),

    /// A model call or tool call exceeded its time budget
    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    /// Tool execution errors
    #[error("Tool execution error: {0}")]
    ToolExecution(String),

    /// Knowledge base lookup errors
    #[error("Knowledge base error: {0}")]
    KnowledgeBase(String),

    /// Checkpoint load/save errors
    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    /// Routing invariant violations (misconfigured graph, route evaluated on empty state)
    #[error("Routing error: {0}")]
    Routing(String),

    /// Model output failed structured validation
    #[error("Invalid model output: {0}")]
    OutputFormat(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Turn aborted by the caller
    #[error("Turn cancelled")]
    Cancelled,

    /// JSON parsing errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP request errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Generic error for other cases
    #[error("{0}")]
    Other(String),
}

/// Convenience Result type for Netdesk operations
pub type Result<T> = std::result::Result<T, NetdeskError>;

impl NetdeskError {
    /// Create a model backend error
    pub fn llm(msg: impl Into<String>) -> Self {
        Self::Llm(msg.into())
    }

    /// Create a tool execution error
    pub fn tool(msg: impl Into<String>) -> Self {
        Self::ToolExecution(msg.into())
    }

    /// Create a config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a checkpoint error
    pub fn checkpoint(msg: impl Into<String>) -> Self {
        Self::Checkpoint(msg.into())
    }

    /// Create a routing error
    pub fn routing(msg: impl Into<String>) -> Self {
        Self::Routing(msg.into())
    }

    /// Create an output format error
    pub fn format(msg: impl Into<String>) -> Self {
        Self::OutputFormat(msg.into())
    }

    /// Wrap an error with additional context
    pub fn with_context<E>(context: impl Into<String>, error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::WithContext {
            context: context.into(),
            source: Box::new(error),
        }
    }

    /// Whether retrying the same call could succeed
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout(_) => true,
            Self::LlmStatus { status, .. } => is_retryable_status(*status),
            Self::Http(e) => {
                e.is_timeout()
                    || e.is_connect()
                    || e.status().map(|s| is_retryable_status(s.as_u16())).unwrap_or(false)
            }
            _ => false,
        }
    }
}

/// Returns `true` if the HTTP status code is transient and worth retrying.
pub fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}
