//! Triage agent: picks the worker agent for a question

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{info, warn};

use crate::agent::prompts;
use crate::agent::{AgentId, ConversationState, ReasoningAgent, Route};
use crate::core::{Message, Result};
use crate::llm::ChatModel;

static AGENT_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)Final Answer:\s*(\w+)").unwrap());

/// Agent used whenever the classification is unusable
pub const DEFAULT_ROUTE: AgentId = AgentId::Knowledge;

/// Map classification text to a worker agent.
///
/// Only the first marker counts. Self-references, the unimplemented device
/// agent and unknown names all fall back to the knowledge agent.
pub fn classify(text: &str) -> AgentId {
    let named = AGENT_MARKER
        .captures(text)
        .and_then(|caps| caps.get(1))
        .and_then(|m| AgentId::from_name(m.as_str()));

    match named {
        Some(AgentId::Connectivity) => AgentId::Connectivity,
        Some(AgentId::Knowledge) => AgentId::Knowledge,
        Some(AgentId::Escalation) => AgentId::Escalation,
        _ => DEFAULT_ROUTE,
    }
}

pub struct TriageAgent {
    model: ChatModel,
}

impl TriageAgent {
    pub fn new(model: ChatModel) -> Self {
        Self { model }
    }
}

#[async_trait]
impl ReasoningAgent for TriageAgent {
    fn id(&self) -> AgentId {
        AgentId::Triage
    }

    fn successors(&self) -> &'static [AgentId] {
        &[AgentId::Connectivity, AgentId::Knowledge, AgentId::Escalation]
    }

    /// One classification attempt; a failed call leaves the decision empty
    async fn step(&self, state: &mut ConversationState) -> Result<()> {
        let messages = [
            Message::system(prompts::triage()),
            Message::user(format!("Question: {}", state.user_question)),
        ];

        match self.model.invoke(&messages, &[]).await {
            Ok(reply) => state.routing_decision = reply.content,
            Err(e) => {
                warn!(error = %e, "triage call failed, using default route");
                state.routing_decision.clear();
            }
        }

        info!(
            decision = %classify(&state.routing_decision),
            "question classified"
        );
        Ok(())
    }

    fn route(&self, state: &ConversationState) -> Result<Route> {
        Ok(Route::Agent(classify(&state.routing_decision)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_markers() {
        assert_eq!(classify("Final Answer: CONNECTIVITY"), AgentId::Connectivity);
        assert_eq!(classify("final answer: knowledge"), AgentId::Knowledge);
        assert_eq!(
            classify("```\nFinal Answer: Escalation\n```"),
            AgentId::Escalation
        );
    }

    #[test]
    fn test_first_marker_wins() {
        assert_eq!(
            classify("Final Answer: escalation\nFinal Answer: connectivity"),
            AgentId::Escalation
        );
    }

    #[test]
    fn test_fallbacks() {
        assert_eq!(classify("connectivity"), AgentId::Knowledge);
        assert_eq!(classify("Final Answer: triage"), AgentId::Knowledge);
        assert_eq!(classify("Final Answer: device"), AgentId::Knowledge);
        assert_eq!(classify("Final Answer: router"), AgentId::Knowledge);
        assert_eq!(classify(""), AgentId::Knowledge);
    }
}
