//! Conversation state threaded through every agent step
//!
//! One `ConversationState` exists per thread. It is loaded from the checkpoint
//! store at the start of a turn, mutated in place by each agent, and saved
//! back once the turn ends.

use std::collections::BTreeMap;
use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::error;

use crate::agent::AgentId;
use crate::core::{Message, Role};

/// Progress of the knowledge agent within a turn
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KnowledgePhase {
    /// Retrieved passages have not been scored yet
    #[default]
    Unscored,
    /// A valid relevance score is recorded
    Scored,
    /// Scoring produced no usable score; treated as below threshold
    Rejected,
}

/// Outcome of the knowledge agent's answering phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KnowledgeDecision {
    Respond,
    Escalate,
}

impl KnowledgeDecision {
    /// Parse the exact action vocabulary; anything else is rejected
    pub fn parse(action: &str) -> Option<Self> {
        match action.trim() {
            "respond" => Some(Self::Respond),
            "escalate" => Some(Self::Escalate),
            _ => None,
        }
    }
}

/// How a turn ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnStatus {
    /// A terminal route was reached
    Complete,
    /// Step bound or repeated step failures ended the turn
    Incomplete,
    /// The caller aborted the turn
    Cancelled,
}

impl std::fmt::Display for TurnStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TurnStatus::Complete => write!(f, "complete"),
            TurnStatus::Incomplete => write!(f, "incomplete"),
            TurnStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Summary of one finished turn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnRecord {
    pub question: String,
    pub answer: String,
    /// Agents visited, in order
    pub path: Vec<AgentId>,
    pub status: TurnStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationState {
    /// Every message of the thread, in conversation order
    pub history: Vec<Message>,
    /// Tool results waiting to be merged into `history`
    #[serde(default)]
    pub pending_tool_results: Vec<Message>,
    /// The question of the current turn
    #[serde(default)]
    pub user_question: String,
    /// Language every agent must answer in for this turn
    #[serde(default)]
    pub user_language: String,
    #[serde(default)]
    pub knowledge_phase: KnowledgePhase,
    /// Relevance of retrieved passages on a 0-10 scale; `None` until scored
    #[serde(default)]
    pub knowledge_relevance: Option<u8>,
    #[serde(default)]
    pub knowledge_decision: Option<KnowledgeDecision>,
    /// Raw triage classification text
    #[serde(default)]
    pub routing_decision: String,
    #[serde(default)]
    pub final_answer: Option<String>,
    /// Where each agent's working segment of `history` starts this turn
    #[serde(default)]
    pub agent_offsets: BTreeMap<AgentId, usize>,
    /// Finished turns of this thread
    #[serde(default)]
    pub turns: Vec<TurnRecord>,
}

impl ConversationState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset the per-turn fields for a new question; history and turns are kept
    pub fn begin_turn(&mut self, question: impl Into<String>, language: impl Into<String>) {
        self.pending_tool_results.clear();
        self.user_question = question.into();
        self.user_language = language.into();
        self.knowledge_phase = KnowledgePhase::Unscored;
        self.knowledge_relevance = None;
        self.knowledge_decision = None;
        self.routing_decision.clear();
        self.final_answer = None;
        self.agent_offsets.clear();
    }

    pub fn push(&mut self, message: Message) {
        self.history.push(message);
    }

    pub fn last_message(&self) -> Option<&Message> {
        self.history.last()
    }

    /// Set the final answer; blank text is ignored
    pub fn set_final_answer(&mut self, answer: impl Into<String>) {
        let answer = answer.into();
        if !answer.trim().is_empty() {
            self.final_answer = Some(answer.trim().to_string());
        }
    }

    pub fn has_final_answer(&self) -> bool {
        self.final_answer.is_some()
    }

    /// Record where `agent` starts working; returns true on first entry this turn
    pub fn enter_agent(&mut self, agent: AgentId) -> bool {
        if self.agent_offsets.contains_key(&agent) {
            return false;
        }
        self.agent_offsets.insert(agent, self.history.len());
        true
    }

    /// Messages `agent` has produced or consumed this turn
    pub fn segment(&self, agent: AgentId) -> &[Message] {
        match self.agent_offsets.get(&agent) {
            Some(&offset) if offset <= self.history.len() => &self.history[offset..],
            _ => &[],
        }
    }

    /// Move pending tool results into `history`.
    ///
    /// A result is only merged when it answers a still-open call of the most
    /// recent assistant tool-call message. Anything else is dropped. Returns
    /// the number of merged results.
    pub fn merge_pending_tool_results(&mut self) -> usize {
        let pending = std::mem::take(&mut self.pending_tool_results);
        if pending.is_empty() {
            return 0;
        }

        let Some(call_index) = self
            .history
            .iter()
            .rposition(|m| m.role == Role::Assistant && m.has_tool_calls())
        else {
            error!(dropped = pending.len(), "tool results without any tool call");
            return 0;
        };

        let mut open: HashSet<String> = self.history[call_index]
            .calls()
            .iter()
            .map(|c| c.id.clone())
            .collect();
        for answered in &self.history[call_index + 1..] {
            if let Some(id) = &answered.tool_call_id {
                open.remove(id);
            }
        }

        let mut merged = 0;
        for result in pending {
            match result.tool_call_id.as_deref() {
                Some(id) if result.role == Role::Tool && open.remove(id) => {
                    self.history.push(result);
                    merged += 1;
                }
                _ => error!(
                    tool_call_id = ?result.tool_call_id,
                    "dropping tool result that answers no open tool call"
                ),
            }
        }
        merged
    }

    /// Append a finished turn
    pub fn record_turn(&mut self, answer: impl Into<String>, path: Vec<AgentId>, status: TurnStatus) {
        self.turns.push(TurnRecord {
            question: self.user_question.clone(),
            answer: answer.into(),
            path,
            status,
        });
    }

    /// The last `n` completed exchanges, oldest first
    pub fn previous_exchanges(&self, n: usize) -> Vec<&TurnRecord> {
        let completed: Vec<&TurnRecord> = self
            .turns
            .iter()
            .filter(|t| t.status == TurnStatus::Complete)
            .collect();
        let skip = completed.len().saturating_sub(n);
        completed.into_iter().skip(skip).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ToolCall;
    use serde_json::json;

    fn state_with_call() -> (ConversationState, ToolCall, ToolCall) {
        let mut state = ConversationState::new();
        state.begin_turn("is 8.8.8.8 reachable?", "English");
        let a = ToolCall::new("ping_ip", json!({"ip_address": "8.8.8.8"}));
        let b = ToolCall::new("check_port", json!({"host": "8.8.8.8", "port": 53}));
        state.push(Message::assistant_with_tools("", vec![a.clone(), b.clone()]));
        (state, a, b)
    }

    #[test]
    fn test_fresh_state_is_unset() {
        let state = ConversationState::new();
        assert!(state.history.is_empty());
        assert_eq!(state.knowledge_phase, KnowledgePhase::Unscored);
        assert!(state.knowledge_relevance.is_none());
        assert!(!state.has_final_answer());
    }

    #[test]
    fn test_merge_keeps_order_and_clears_pending() {
        let (mut state, a, b) = state_with_call();
        state.pending_tool_results = vec![
            Message::tool_result(&a, "true"),
            Message::tool_result(&b, "true"),
        ];
        assert_eq!(state.merge_pending_tool_results(), 2);
        assert!(state.pending_tool_results.is_empty());
        assert_eq!(state.history[1].tool_call_id.as_deref(), Some(a.id.as_str()));
        assert_eq!(state.history[2].tool_call_id.as_deref(), Some(b.id.as_str()));
    }

    #[test]
    fn test_merge_drops_unrelated_results() {
        let (mut state, a, _) = state_with_call();
        let stray = ToolCall::new("ping_ip", json!({}));
        state.pending_tool_results = vec![
            Message::tool_result(&stray, "true"),
            Message::tool_result(&a, "true"),
            Message::tool_result(&a, "duplicate"),
        ];
        assert_eq!(state.merge_pending_tool_results(), 1);
        assert_eq!(state.history.len(), 2);
    }

    #[test]
    fn test_begin_turn_keeps_history() {
        let (mut state, _, _) = state_with_call();
        state.knowledge_relevance = Some(7);
        state.set_final_answer("done");
        state.enter_agent(AgentId::Connectivity);
        state.begin_turn("next question", "English");
        assert_eq!(state.history.len(), 1);
        assert!(state.knowledge_relevance.is_none());
        assert!(state.final_answer.is_none());
        assert!(state.agent_offsets.is_empty());
    }

    #[test]
    fn test_segment_starts_at_entry() {
        let (mut state, _, _) = state_with_call();
        assert!(state.enter_agent(AgentId::Escalation));
        assert!(!state.enter_agent(AgentId::Escalation));
        state.push(Message::user("Question: help"));
        assert_eq!(state.segment(AgentId::Escalation).len(), 1);
        assert!(state.segment(AgentId::Knowledge).is_empty());
    }

    #[test]
    fn test_previous_exchanges() {
        let mut state = ConversationState::new();
        for (i, status) in [
            TurnStatus::Complete,
            TurnStatus::Incomplete,
            TurnStatus::Complete,
            TurnStatus::Complete,
            TurnStatus::Complete,
        ]
        .into_iter()
        .enumerate()
        {
            state.begin_turn(format!("q{}", i), "English");
            state.record_turn(format!("a{}", i), vec![AgentId::Triage], status);
        }
        let previous = state.previous_exchanges(3);
        let questions: Vec<&str> = previous.iter().map(|t| t.question.as_str()).collect();
        assert_eq!(questions, vec!["q2", "q3", "q4"]);
    }

    #[test]
    fn test_state_roundtrips_through_json() {
        let (mut state, _, _) = state_with_call();
        state.enter_agent(AgentId::Connectivity);
        let json = serde_json::to_string(&state).unwrap();
        let back: ConversationState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, state);
    }

    #[test]
    fn test_decision_vocabulary_is_exact() {
        assert_eq!(KnowledgeDecision::parse("respond"), Some(KnowledgeDecision::Respond));
        assert_eq!(KnowledgeDecision::parse("escalate"), Some(KnowledgeDecision::Escalate));
        assert_eq!(KnowledgeDecision::parse("answer"), None);
        assert_eq!(KnowledgeDecision::parse("Respond"), None);
    }
}
