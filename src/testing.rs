//! Test doubles for running turns without a model server or network.
//!
//! Provides:
//! - [`ScriptedLlm`]: replies chosen by the system prompt of each request
//! - [`StaticKnowledgeBase`]: fixed passages for the knowledge agent
//! - [`FixedLanguage`]: a language detector that always reports the same tag
//! - [`stub_network_tools`]: the diagnostic tool names with canned results

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::core::{Message, NetdeskError, Result, Role, ToolCall, ToolDefinition};
use crate::knowledge::KnowledgeBase;
use crate::language::LanguageDetector;
use crate::llm::{GenerateOptions, LLMProvider, LLMResponse};
use crate::tools::{json_schema, Tool, ToolError, ToolRegistry};

/// One scripted model reply
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    Text(String),
    ToolCall { name: String, arguments: Value },
    Error(String),
}

struct Rule {
    needle: String,
    replies: Mutex<VecDeque<ScriptedReply>>,
}

/// An LLM provider replaying scripted answers.
///
/// Each rule matches a substring of the request's system prompt and holds a
/// queue of replies; the last reply of a queue repeats forever. Requests no
/// rule matches get the default reply.
pub struct ScriptedLlm {
    rules: Vec<Rule>,
    default_reply: String,
    delay: Option<Duration>,
    call_count: AtomicU32,
    requests: Mutex<Vec<Vec<Message>>>,
}

impl Default for ScriptedLlm {
    fn default() -> Self {
        Self {
            rules: Vec::new(),
            default_reply: "Final Answer: I don't know.".to_string(),
            delay: None,
            call_count: AtomicU32::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }
}

impl ScriptedLlm {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(mut self, needle: &str, reply: ScriptedReply) -> Self {
        match self.rules.iter().position(|r| r.needle == needle) {
            Some(index) => {
                if let Ok(mut replies) = self.rules[index].replies.lock() {
                    replies.push_back(reply);
                }
            }
            None => self.rules.push(Rule {
                needle: needle.to_string(),
                replies: Mutex::new(VecDeque::from([reply])),
            }),
        }
        self
    }

    /// Queue text replies for prompts containing `needle`
    pub fn on<I, S>(mut self, needle: &str, replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for reply in replies {
            self = self.push(needle, ScriptedReply::Text(reply.into()));
        }
        self
    }

    /// Queue one more text reply for `needle`
    pub fn then(self, needle: &str, reply: impl Into<String>) -> Self {
        self.push(needle, ScriptedReply::Text(reply.into()))
    }

    /// Queue a reply requesting one tool call
    pub fn on_tool_call(self, needle: &str, tool: &str, arguments: Value) -> Self {
        self.push(
            needle,
            ScriptedReply::ToolCall {
                name: tool.to_string(),
                arguments,
            },
        )
    }

    /// Queue a failed call
    pub fn on_error(self, needle: &str, message: &str) -> Self {
        self.push(needle, ScriptedReply::Error(message.to_string()))
    }

    pub fn with_default(mut self, reply: impl Into<String>) -> Self {
        self.default_reply = reply.into();
        self
    }

    /// Sleep before every reply
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Number of calls made so far
    pub fn calls(&self) -> u32 {
        self.call_count.load(Ordering::Relaxed)
    }

    /// Every request received, in order
    pub fn requests(&self) -> Vec<Vec<Message>> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    fn next_reply(&self, messages: &[Message]) -> ScriptedReply {
        let system = messages
            .iter()
            .find(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
            .unwrap_or_default();

        let Some(rule) = self.rules.iter().find(|r| system.contains(&r.needle)) else {
            return ScriptedReply::Text(self.default_reply.clone());
        };
        let Ok(mut replies) = rule.replies.lock() else {
            return ScriptedReply::Error("script poisoned".to_string());
        };
        if replies.len() > 1 {
            replies.pop_front().unwrap_or(ScriptedReply::Text(String::new()))
        } else {
            replies
                .front()
                .cloned()
                .unwrap_or(ScriptedReply::Text(String::new()))
        }
    }

    async fn respond(&self, model: &str, messages: &[Message]) -> Result<LLMResponse> {
        self.call_count.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(messages.to_vec());
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let (content, tool_calls) = match self.next_reply(messages) {
            ScriptedReply::Text(text) => (text, Vec::new()),
            ScriptedReply::ToolCall { name, arguments } => {
                (String::new(), vec![ToolCall::new(name, arguments)])
            }
            ScriptedReply::Error(message) => return Err(NetdeskError::llm(message)),
        };

        Ok(LLMResponse {
            content,
            tool_calls,
            usage: None,
            model: model.to_string(),
        })
    }
}

#[async_trait]
impl LLMProvider for ScriptedLlm {
    async fn chat(
        &self,
        model: &str,
        messages: &[Message],
        _options: Option<GenerateOptions>,
    ) -> Result<LLMResponse> {
        self.respond(model, messages).await
    }

    async fn chat_with_tools(
        &self,
        model: &str,
        messages: &[Message],
        _tools: &[ToolDefinition],
        _options: Option<GenerateOptions>,
    ) -> Result<LLMResponse> {
        self.respond(model, messages).await
    }

    async fn list_models(&self) -> Result<Vec<String>> {
        Ok(vec!["scripted".to_string()])
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Knowledge base returning the same passages for every question
#[derive(Debug, Clone, Default)]
pub struct StaticKnowledgeBase {
    passages: Vec<String>,
}

impl StaticKnowledgeBase {
    pub fn new<S: Into<String>>(passages: impl IntoIterator<Item = S>) -> Self {
        Self {
            passages: passages.into_iter().map(Into::into).collect(),
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KnowledgeBase for StaticKnowledgeBase {
    async fn search(&self, _question: &str, k: usize) -> Result<Vec<String>> {
        Ok(self.passages.iter().take(k).cloned().collect())
    }
}

/// Detector that always reports the same ISO 639-1 tag, e.g. `FixedLanguage("en")`
#[derive(Debug, Clone, Copy)]
pub struct FixedLanguage(pub &'static str);

impl LanguageDetector for FixedLanguage {
    fn detect(&self, _text: &str) -> Option<String> {
        Some(self.0.to_string())
    }
}

/// Tool with a fixed name and result
pub struct CannedTool {
    name: &'static str,
    output: Value,
}

impl CannedTool {
    pub fn new(name: &'static str, output: Value) -> Self {
        Self { name, output }
    }
}

#[async_trait]
impl Tool for CannedTool {
    fn name(&self) -> &str {
        self.name
    }

    fn description(&self) -> &str {
        "Canned test tool."
    }

    fn parameters_schema(&self) -> Value {
        json_schema(json!({}), &[])
    }

    async fn execute(&self, _params: Value) -> std::result::Result<Value, ToolError> {
        Ok(self.output.clone())
    }
}

/// The four diagnostic tools, answering without touching the network
pub fn stub_network_tools() -> ToolRegistry {
    ToolRegistry::new()
        .with(Arc::new(CannedTool::new("ping_ip", json!(true))))
        .with(Arc::new(CannedTool::new("check_port", json!(true))))
        .with(Arc::new(CannedTool::new(
            "query_dns_record",
            json!(["93.184.216.34"]),
        )))
        .with(Arc::new(CannedTool::new(
            "get_domain_metadata",
            json!({"domain_name": "example.com", "registrar": "Example Registrar"}),
        )))
}
