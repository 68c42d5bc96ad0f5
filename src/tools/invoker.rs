//! Runs model-issued tool calls against an agent's registry.
//!
//! Calls execute one at a time in the order the model issued them. Failures
//! never escape: each one becomes an error-tagged tool result so the issuing
//! agent can reason about it on its next step.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{info, warn};

use crate::core::config::ToolsConfig;
use crate::core::{Message, ToolCall, ToolDefinition};
use crate::llm::retry::retry_backoff_delay;
use crate::tools::registry::{ToolError, ToolRegistry};

/// Base backoff between tool retries
const TOOL_RETRY_BASE_MS: u64 = 250;

pub struct ToolInvoker {
    registry: Arc<ToolRegistry>,
    timeout: Duration,
    max_retries: u32,
    retry_base_ms: u64,
}

impl ToolInvoker {
    pub fn new(registry: ToolRegistry, config: &ToolsConfig) -> Self {
        Self {
            registry: Arc::new(registry),
            timeout: Duration::from_secs(config.timeout_secs),
            max_retries: config.max_retries,
            retry_base_ms: TOOL_RETRY_BASE_MS,
        }
    }

    /// Invoker with explicit limits and no backoff delay
    pub fn with_limits(registry: ToolRegistry, timeout: Duration, max_retries: u32) -> Self {
        Self {
            registry: Arc::new(registry),
            timeout,
            max_retries,
            retry_base_ms: 0,
        }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.registry.definitions()
    }

    /// Execute every call in order, returning one tool-result message per call
    pub async fn invoke(&self, calls: &[ToolCall]) -> Vec<Message> {
        let mut results = Vec::with_capacity(calls.len());
        for call in calls {
            let message = match self.invoke_one(call).await {
                Ok(value) => {
                    info!(tool = %call.name, "tool call succeeded");
                    Message::tool_result(call, render_output(&value))
                }
                Err(e) => {
                    warn!(tool = %call.name, error = %e, "tool call failed");
                    Message::tool_error(call, e)
                }
            };
            results.push(message);
        }
        results
    }

    async fn invoke_one(&self, call: &ToolCall) -> Result<Value, ToolError> {
        let idempotent = self
            .registry
            .get(&call.name)
            .map_or(true, |tool| tool.idempotent());
        let mut attempt = 0;
        loop {
            let result = match tokio::time::timeout(self.timeout, self.registry.execute(call)).await
            {
                Ok(result) => result,
                Err(_) => Err(ToolError::Timeout(self.timeout)),
            };

            match result {
                Err(e) if e.is_transient() && !idempotent => {
                    warn!(tool = %call.name, error = %e, "not retrying a call with side effects");
                    return Err(ToolError::ExecutionFailed(format!(
                        "{}; the request may already have been carried out, do not repeat it",
                        e
                    )));
                }
                Err(e) if e.is_transient() && attempt < self.max_retries => {
                    let delay = retry_backoff_delay(self.retry_base_ms, attempt);
                    warn!(
                        tool = %call.name,
                        attempt = attempt + 1,
                        error = %e,
                        "retrying tool call"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}

/// Tool output as the model sees it: bare text for strings, JSON otherwise
pub fn render_output(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Role;
    use crate::tools::registry::Tool;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Slow {
        name: &'static str,
        delay_ms: u64,
    }

    #[async_trait]
    impl Tool for Slow {
        fn name(&self) -> &str {
            self.name
        }

        fn description(&self) -> &str {
            "Sleep then answer with the tool name"
        }

        fn parameters_schema(&self) -> Value {
            json!({"type": "object", "properties": {}})
        }

        async fn execute(&self, _params: Value) -> Result<Value, ToolError> {
            tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
            Ok(json!(self.name))
        }
    }

    struct Unreliable {
        failures: AtomicU32,
    }

    #[async_trait]
    impl Tool for Unreliable {
        fn name(&self) -> &str {
            "unreliable"
        }

        fn description(&self) -> &str {
            "Fails a few times"
        }

        fn parameters_schema(&self) -> Value {
            json!({"type": "object", "properties": {}})
        }

        async fn execute(&self, _params: Value) -> Result<Value, ToolError> {
            if self.failures.load(Ordering::SeqCst) > 0 {
                self.failures.fetch_sub(1, Ordering::SeqCst);
                return Err(ToolError::ExternalService("flaky".to_string()));
            }
            Ok(json!(true))
        }
    }

    #[tokio::test]
    async fn test_results_follow_call_order() {
        let registry = ToolRegistry::new()
            .with(Arc::new(Slow {
                name: "a",
                delay_ms: 30,
            }))
            .with(Arc::new(Slow {
                name: "b",
                delay_ms: 1,
            }));
        let invoker = ToolInvoker::with_limits(registry, Duration::from_secs(1), 0);

        let calls = vec![ToolCall::new("a", json!({})), ToolCall::new("b", json!({}))];
        let results = invoker.invoke(&calls).await;

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].content, "a");
        assert_eq!(results[0].tool_call_id.as_deref(), Some(calls[0].id.as_str()));
        assert_eq!(results[1].content, "b");
        assert_eq!(results[1].tool_call_id.as_deref(), Some(calls[1].id.as_str()));
    }

    #[tokio::test]
    async fn test_failure_becomes_error_result() {
        let invoker = ToolInvoker::with_limits(ToolRegistry::new(), Duration::from_secs(1), 0);
        let results = invoker
            .invoke(&[ToolCall::new("missing", json!({}))])
            .await;
        assert_eq!(results[0].role, Role::Tool);
        assert!(results[0].is_error);
        assert!(results[0].content.contains("Unknown tool"));
    }

    #[tokio::test]
    async fn test_timeout_is_captured() {
        let registry = ToolRegistry::new().with(Arc::new(Slow {
            name: "slow",
            delay_ms: 500,
        }));
        let invoker = ToolInvoker::with_limits(registry, Duration::from_millis(10), 0);
        let results = invoker.invoke(&[ToolCall::new("slow", json!({}))]).await;
        assert!(results[0].is_error);
        assert!(results[0].content.contains("Timeout"));
    }

    #[tokio::test]
    async fn test_transient_errors_are_retried() {
        let registry = ToolRegistry::new().with(Arc::new(Unreliable {
            failures: AtomicU32::new(1),
        }));
        let invoker = ToolInvoker::with_limits(registry, Duration::from_secs(1), 1);
        let results = invoker
            .invoke(&[ToolCall::new("unreliable", json!({}))])
            .await;
        assert!(!results[0].is_error);
        assert_eq!(results[0].content, "true");
    }

    struct Flaky {
        calls: AtomicU32,
    }

    #[async_trait]
    impl Tool for Flaky {
        fn name(&self) -> &str {
            "flaky_side_effect"
        }

        fn description(&self) -> &str {
            "Fails once, with side effects"
        }

        fn parameters_schema(&self) -> Value {
            json!({"type": "object", "properties": {}})
        }

        async fn execute(&self, _params: Value) -> Result<Value, ToolError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                return Err(ToolError::ExternalService("gateway timeout".to_string()));
            }
            Ok(json!("done twice"))
        }

        fn idempotent(&self) -> bool {
            false
        }
    }

    #[tokio::test]
    async fn test_side_effect_tools_are_not_retried() {
        let tool = Arc::new(Flaky {
            calls: AtomicU32::new(0),
        });
        let registry = ToolRegistry::new().with(Arc::clone(&tool) as Arc<dyn Tool>);
        let invoker = ToolInvoker::with_limits(registry, Duration::from_secs(1), 3);

        let results = invoker
            .invoke(&[ToolCall::new("flaky_side_effect", json!({}))])
            .await;

        assert_eq!(tool.calls.load(Ordering::SeqCst), 1);
        assert!(results[0].is_error);
        assert!(results[0].content.contains("do not repeat it"));
    }

    #[test]
    fn test_render_output() {
        assert_eq!(render_output(&json!("TASK-001")), "TASK-001");
        assert_eq!(render_output(&json!(true)), "true");
        assert_eq!(render_output(&json!(["1.2.3.4"])), "[\"1.2.3.4\"]");
    }
}
