//! Agent module - orchestration and the reasoning agents
//!
//! Every agent implements the same turn protocol: `step` reads and updates
//! the conversation state (calling the model at most a few times), then
//! `route` decides what runs next without any side effects.

pub mod answer;
pub mod connectivity;
pub mod escalation;
pub mod knowledge;
pub mod orchestrator;
pub mod prompts;
pub mod react;
pub mod state;
pub mod triage;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::Result;
use crate::tools::ToolInvoker;

pub use answer::{extract_answer, parse_final_answer, DEFAULT_APOLOGY};
pub use connectivity::ConnectivityAgent;
pub use escalation::EscalationAgent;
pub use knowledge::KnowledgeAgent;
pub use orchestrator::{Orchestrator, RoutingTable, TurnOutcome};
pub use state::{ConversationState, KnowledgeDecision, KnowledgePhase, TurnRecord, TurnStatus};
pub use triage::TriageAgent;

/// Participants of the routing graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AgentId {
    Triage,
    Connectivity,
    Knowledge,
    Escalation,
    /// Reserved; no agent implements it yet
    Device,
}

impl AgentId {
    /// Name as used in prompts and classification output
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentId::Triage => "TRIAGE",
            AgentId::Connectivity => "CONNECTIVITY",
            AgentId::Knowledge => "KNOWLEDGE",
            AgentId::Escalation => "ESCALATION",
            AgentId::Device => "DEVICE",
        }
    }

    /// Case-insensitive lookup by name
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_uppercase().as_str() {
            "TRIAGE" => Some(AgentId::Triage),
            "CONNECTIVITY" => Some(AgentId::Connectivity),
            "KNOWLEDGE" => Some(AgentId::Knowledge),
            "ESCALATION" => Some(AgentId::Escalation),
            "DEVICE" => Some(AgentId::Device),
            _ => None,
        }
    }
}

impl std::fmt::Display for AgentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Routing outcome evaluated after an agent step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Dispatch to this agent next (possibly the same one)
    Agent(AgentId),
    /// Execute the pending tool calls, then return to the same agent
    ToolHop,
    /// The turn is complete
    Terminate,
}

/// One node of the routing graph
#[async_trait]
pub trait ReasoningAgent: Send + Sync {
    fn id(&self) -> AgentId;

    /// Tools this agent may call; `None` for agents without a tool node
    fn tools(&self) -> Option<&ToolInvoker> {
        None
    }

    /// Agents `route` may hand off to, besides itself
    fn successors(&self) -> &'static [AgentId] {
        &[]
    }

    /// Build a prompt from `state`, call the model and record the outcome
    async fn step(&self, state: &mut ConversationState) -> Result<()>;

    /// Pure routing predicate over `state`
    fn route(&self, state: &ConversationState) -> Result<Route>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_names_roundtrip() {
        for id in [
            AgentId::Triage,
            AgentId::Connectivity,
            AgentId::Knowledge,
            AgentId::Escalation,
            AgentId::Device,
        ] {
            assert_eq!(AgentId::from_name(id.as_str()), Some(id));
        }
        assert_eq!(AgentId::from_name("connectivity"), Some(AgentId::Connectivity));
        assert_eq!(AgentId::from_name("router"), None);
    }
}
