//! Tool registry - manages and dispatches tool calls
//!
//! Central hub for registering tools and routing tool calls to handlers.
//! Each agent owns its own registry, so the declared tool set is exactly
//! what that agent may call.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::core::{ToolCall, ToolDefinition};

/// Error type for tool execution.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("External service error: {0}")]
    ExternalService(String),

    #[error("Unknown tool: {0}")]
    NotFound(String),
}

impl ToolError {
    /// Whether the same call may succeed if tried again
    pub fn is_transient(&self) -> bool {
        matches!(self, ToolError::Timeout(_) | ToolError::ExternalService(_))
    }
}

/// An opaque diagnostic or ticketing capability
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON Schema for the arguments object
    fn parameters_schema(&self) -> Value;

    async fn execute(&self, params: Value) -> Result<Value, ToolError>;

    /// Whether repeating a call is harmless; calls with side effects are never retried
    fn idempotent(&self) -> bool {
        true
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition::function(self.name(), self.description(), self.parameters_schema())
    }
}

/// Extract a required string parameter.
pub fn require_str<'a>(params: &'a Value, name: &str) -> Result<&'a str, ToolError> {
    params
        .get(name)
        .and_then(|v| v.as_str())
        .ok_or_else(|| ToolError::InvalidParameters(format!("missing '{}' parameter", name)))
}

/// Extract a required port number; models sometimes send it as a string.
pub fn require_port(params: &Value, name: &str) -> Result<u16, ToolError> {
    let value = params
        .get(name)
        .ok_or_else(|| ToolError::InvalidParameters(format!("missing '{}' parameter", name)))?;

    let port = match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    };

    port.and_then(|p| u16::try_from(p).ok())
        .filter(|p| *p > 0)
        .ok_or_else(|| ToolError::InvalidParameters(format!("'{}' must be a port number", name)))
}

/// Build the usual object schema from a properties map
pub fn json_schema(properties: Value, required: &[&str]) -> Value {
    serde_json::json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

/// Registry of available tools, in registration order
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
}

impl ToolRegistry {
    /// Create a new empty tool registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool; a tool with the same name is replaced
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        debug!(tool = tool.name(), "registering tool");
        match self.tools.iter().position(|t| t.name() == tool.name()) {
            Some(index) => self.tools[index] = tool,
            None => self.tools.push(tool),
        }
    }

    /// Builder-style register
    pub fn with(mut self, tool: Arc<dyn Tool>) -> Self {
        self.register(tool);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.iter().find(|t| t.name() == name).cloned()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Names of all registered tools
    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    /// Get all tool definitions
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.iter().map(|t| t.definition()).collect()
    }

    /// One `name: description` line per tool, for prompts
    pub fn describe(&self) -> String {
        self.tools
            .iter()
            .map(|t| format!("{}: {}", t.name(), t.description()))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Execute a tool call
    pub async fn execute(&self, call: &ToolCall) -> Result<Value, ToolError> {
        let tool = self
            .get(&call.name)
            .ok_or_else(|| ToolError::NotFound(call.name.clone()))?;

        debug!(tool = %call.name, id = %call.id, args = %call.arguments, "executing tool");
        let result = tool.execute(call.arguments.clone()).await;
        if let Err(e) = &result {
            warn!(tool = %call.name, error = %e, "tool failed");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Echo(&'static str);

    #[async_trait]
    impl Tool for Echo {
        fn name(&self) -> &str {
            self.0
        }

        fn description(&self) -> &str {
            "Echo the input back"
        }

        fn parameters_schema(&self) -> Value {
            json_schema(json!({"text": {"type": "string"}}), &["text"])
        }

        async fn execute(&self, params: Value) -> Result<Value, ToolError> {
            Ok(Value::String(require_str(&params, "text")?.to_string()))
        }
    }

    #[tokio::test]
    async fn test_execute_dispatches_by_name() {
        let registry = ToolRegistry::new().with(Arc::new(Echo("echo")));
        let call = ToolCall::new("echo", json!({"text": "hi"}));
        assert_eq!(registry.execute(&call).await.unwrap(), json!("hi"));
    }

    #[tokio::test]
    async fn test_unknown_tool() {
        let registry = ToolRegistry::new();
        let call = ToolCall::new("nope", json!({}));
        assert!(matches!(
            registry.execute(&call).await,
            Err(ToolError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_parameter() {
        let registry = ToolRegistry::new().with(Arc::new(Echo("echo")));
        let call = ToolCall::new("echo", json!({}));
        assert!(matches!(
            registry.execute(&call).await,
            Err(ToolError::InvalidParameters(_))
        ));
    }

    #[test]
    fn test_registration_order_and_replace() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(Echo("b")));
        registry.register(Arc::new(Echo("a")));
        registry.register(Arc::new(Echo("b")));
        assert_eq!(registry.names(), vec!["b", "a"]);
        assert_eq!(registry.definitions()[1].function.name, "a");
        assert!(registry.describe().starts_with("b: Echo"));
    }

    #[test]
    fn test_require_port() {
        assert_eq!(require_port(&json!({"port": 443}), "port").unwrap(), 443);
        assert_eq!(require_port(&json!({"port": "22"}), "port").unwrap(), 22);
        assert!(require_port(&json!({"port": 70000}), "port").is_err());
        assert!(require_port(&json!({"port": 0}), "port").is_err());
    }
}
