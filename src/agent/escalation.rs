//! Escalation agent: decides whether a ticket is needed and creates it
//!
//! Same tool loop as the connectivity agent, with the ticket tool only. A
//! ticket id produced during the turn always reaches the final answer.

use async_trait::async_trait;
use tracing::info;

use crate::agent::prompts;
use crate::agent::react::{question_message, react_route, react_step};
use crate::agent::{AgentId, ConversationState, ReasoningAgent, Route};
use crate::core::{Message, Result, Role};
use crate::llm::ChatModel;
use crate::tools::ToolInvoker;

const TICKET_TOOL: &str = "escalate_request";

pub struct EscalationAgent {
    model: ChatModel,
    tools: ToolInvoker,
}

impl EscalationAgent {
    pub fn new(model: ChatModel, tools: ToolInvoker) -> Self {
        Self { model, tools }
    }

    /// Note telling the model which agents already worked on the question
    fn handoff_note(state: &ConversationState) -> Option<Message> {
        let previous: Vec<&str> = state
            .agent_offsets
            .keys()
            .filter(|id| !matches!(id, AgentId::Escalation | AgentId::Triage))
            .map(|id| id.as_str())
            .collect();
        if previous.is_empty() {
            return None;
        }
        Some(Message::user(format!(
            "This question was received from the {} agent and has not been addressed yet.",
            previous.join(", ").to_lowercase()
        )))
    }
}

/// Ticket ids returned by successful ticket tool calls in `messages`
pub fn created_tickets(messages: &[Message]) -> Vec<&str> {
    messages
        .iter()
        .filter(|m| m.role == Role::Tool && !m.is_error && m.name.as_deref() == Some(TICKET_TOOL))
        .map(|m| m.content.trim())
        .filter(|id| !id.is_empty())
        .collect()
}

#[async_trait]
impl ReasoningAgent for EscalationAgent {
    fn id(&self) -> AgentId {
        AgentId::Escalation
    }

    fn tools(&self) -> Option<&ToolInvoker> {
        Some(&self.tools)
    }

    async fn step(&self, state: &mut ConversationState) -> Result<()> {
        let registry = self.tools.registry();
        react_step(self.id(), &self.model, &self.tools, state, |state| {
            let mut opening = vec![Message::system(prompts::escalation(
                registry,
                &state.user_language,
            ))];
            opening.extend(Self::handoff_note(state));
            opening.push(question_message(state, ""));
            opening
        })
        .await?;

        let Some(answer) = state.final_answer.clone() else {
            return Ok(());
        };
        let missing: Vec<String> = created_tickets(state.segment(self.id()))
            .into_iter()
            .filter(|id| !answer.contains(id))
            .map(str::to_string)
            .collect();
        if !missing.is_empty() {
            info!(tickets = ?missing, "adding ticket ids the model left out");
            state.final_answer = Some(format!("{}\n\nTicket ID: {}", answer, missing.join(", ")));
        }
        Ok(())
    }

    fn route(&self, state: &ConversationState) -> Result<Route> {
        react_route(self.id(), state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ToolCall;
    use serde_json::json;

    #[test]
    fn test_created_tickets_ignores_errors_and_other_tools() {
        let ticket = ToolCall::new(TICKET_TOOL, json!({}));
        let ping = ToolCall::new("ping_ip", json!({}));
        let messages = vec![
            Message::tool_result(&ticket, "TASK-001"),
            Message::tool_error(&ticket, "ticketing down"),
            Message::tool_result(&ping, "true"),
        ];
        assert_eq!(created_tickets(&messages), vec!["TASK-001"]);
    }

    #[test]
    fn test_handoff_note_names_previous_agent() {
        let mut state = ConversationState::new();
        state.begin_turn("q", "English");
        assert!(EscalationAgent::handoff_note(&state).is_none());
        state.enter_agent(AgentId::Knowledge);
        let note = EscalationAgent::handoff_note(&state).unwrap();
        assert!(note.content.contains("from the knowledge agent"));
    }
}
