//! Timeout and retry layer shared by every model backend.
//!
//! Transient failures (timeouts, connection errors, 429/5xx) are retried with
//! exponential backoff and jitter. Everything else surfaces on the first try.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tracing::warn;

use crate::core::config::RetryConfig;
use crate::core::{Message, NetdeskError, Result, ToolDefinition};
use crate::llm::traits::{GenerateOptions, LLMProvider, LLMResponse};

/// Calculate exponential backoff delay with random jitter.
///
/// `base_ms` is doubled each attempt, with +/-25% jitter and a 100ms floor.
/// A zero base disables waiting entirely.
pub fn retry_backoff_delay(base_ms: u64, attempt: u32) -> Duration {
    if base_ms == 0 {
        return Duration::ZERO;
    }
    let scaled: u64 = base_ms.saturating_mul(2u64.saturating_pow(attempt));
    let jitter_range = scaled / 4;
    let jitter = if jitter_range > 0 {
        let offset = rand::rng().random_range(0..=jitter_range.saturating_mul(2));
        offset as i64 - jitter_range as i64
    } else {
        0
    };
    let delay_ms = (scaled as i64).saturating_add(jitter).max(100) as u64;
    Duration::from_millis(delay_ms)
}

/// Wraps a provider with a per-call timeout and bounded retries
pub struct RetryingProvider<P> {
    inner: P,
    timeout: Duration,
    max_retries: u32,
    base_delay_ms: u64,
}

impl<P: LLMProvider> RetryingProvider<P> {
    pub fn new(inner: P, config: &RetryConfig) -> Self {
        Self {
            inner,
            timeout: Duration::from_secs(config.timeout_secs),
            max_retries: config.max_retries,
            base_delay_ms: config.base_delay_ms,
        }
    }

    async fn with_retries<F, Fut>(&self, op: F) -> Result<LLMResponse>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<LLMResponse>>,
    {
        let mut attempt = 0;
        loop {
            let result = match tokio::time::timeout(self.timeout, op()).await {
                Ok(result) => result,
                Err(_) => Err(NetdeskError::Timeout(self.timeout)),
            };

            match result {
                Err(e) if e.is_transient() && attempt < self.max_retries => {
                    let delay = retry_backoff_delay(self.base_delay_ms, attempt);
                    warn!(
                        provider = self.inner.name(),
                        attempt = attempt + 1,
                        max_retries = self.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "model call failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}

#[async_trait]
impl<P: LLMProvider> LLMProvider for RetryingProvider<P> {
    async fn chat(
        &self,
        model: &str,
        messages: &[Message],
        options: Option<GenerateOptions>,
    ) -> Result<LLMResponse> {
        self.with_retries(|| self.inner.chat(model, messages, options.clone()))
            .await
    }

    async fn chat_with_tools(
        &self,
        model: &str,
        messages: &[Message],
        tools: &[ToolDefinition],
        options: Option<GenerateOptions>,
    ) -> Result<LLMResponse> {
        self.with_retries(|| {
            self.inner
                .chat_with_tools(model, messages, tools, options.clone())
        })
        .await
    }

    async fn list_models(&self) -> Result<Vec<String>> {
        self.inner.list_models().await
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Flaky {
        failures: AtomicU32,
        status: u16,
    }

    #[async_trait]
    impl LLMProvider for Flaky {
        async fn chat(
            &self,
            _model: &str,
            _messages: &[Message],
            _options: Option<GenerateOptions>,
        ) -> Result<LLMResponse> {
            if self.failures.load(Ordering::SeqCst) > 0 {
                self.failures.fetch_sub(1, Ordering::SeqCst);
                return Err(NetdeskError::LlmStatus {
                    status: self.status,
                    body: "busy".to_string(),
                });
            }
            Ok(LLMResponse {
                content: "ok".to_string(),
                tool_calls: vec![],
                usage: None,
                model: "stub".to_string(),
            })
        }

        async fn chat_with_tools(
            &self,
            model: &str,
            messages: &[Message],
            _tools: &[ToolDefinition],
            options: Option<GenerateOptions>,
        ) -> Result<LLMResponse> {
            self.chat(model, messages, options).await
        }

        async fn list_models(&self) -> Result<Vec<String>> {
            Ok(vec![])
        }

        fn name(&self) -> &str {
            "flaky"
        }
    }

    fn no_wait(max_retries: u32) -> RetryConfig {
        RetryConfig {
            timeout_secs: 5,
            max_retries,
            base_delay_ms: 0,
        }
    }

    #[test]
    fn test_backoff_growth() {
        for _ in 0..20 {
            let d0 = retry_backoff_delay(1000, 0);
            let d2 = retry_backoff_delay(1000, 2);
            assert!(d0.as_millis() >= 750 && d0.as_millis() <= 1250);
            assert!(d2.as_millis() >= 3000 && d2.as_millis() <= 5000);
        }
        assert_eq!(retry_backoff_delay(0, 3), Duration::ZERO);
        assert!(retry_backoff_delay(1000, 40).as_millis() >= 100);
    }

    #[tokio::test]
    async fn test_transient_failure_is_retried() {
        let provider = RetryingProvider::new(
            Flaky {
                failures: AtomicU32::new(2),
                status: 503,
            },
            &no_wait(2),
        );
        let response = provider.chat("m", &[], None).await.unwrap();
        assert_eq!(response.content, "ok");
    }

    #[tokio::test]
    async fn test_retry_budget_is_bounded() {
        let provider = RetryingProvider::new(
            Flaky {
                failures: AtomicU32::new(3),
                status: 503,
            },
            &no_wait(2),
        );
        assert!(provider.chat("m", &[], None).await.is_err());
    }

    #[tokio::test]
    async fn test_client_error_is_not_retried() {
        let provider = RetryingProvider::new(
            Flaky {
                failures: AtomicU32::new(1),
                status: 400,
            },
            &no_wait(2),
        );
        assert!(provider.chat("m", &[], None).await.is_err());
        assert_eq!(provider.inner.failures.load(Ordering::SeqCst), 0);
    }
}
