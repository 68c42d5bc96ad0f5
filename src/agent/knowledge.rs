//! Knowledge agent: answers from retrieved documentation
//!
//! Runs in two phases over consecutive steps. The first grades how relevant
//! the retrieved passages are to the question; the second writes an answer
//! from them or asks for escalation. Scoring messages never enter the
//! history, only the answering exchange does.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::agent::prompts;
use crate::agent::{
    AgentId, ConversationState, KnowledgeDecision, KnowledgePhase, ReasoningAgent, Route,
};
use crate::core::config::AgentConfig;
use crate::core::{Message, NetdeskError, Result};
use crate::knowledge::KnowledgeBase;
use crate::llm::ChatModel;

const SCORE_CORRECTION: &str = r#"Your reply was not valid. Respond with a single JSON object: {"question": "...", "thought": "...", "score": <integer from 0 to 10>}"#;

const ANSWER_CORRECTION: &str = r#"Your reply was not valid. Respond with a single JSON object: {"question": "...", "action": "respond" or "escalate", "final_answer": "..."}"#;

/// Validated answering output
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KnowledgeReply {
    Respond(String),
    Escalate,
}

/// Pull the JSON object out of a model reply.
///
/// Tolerates code fences and prose around the object, and schema-shaped
/// replies that nest the fields under `properties`.
fn extract_object(text: &str) -> Result<serde_json::Map<String, Value>> {
    let start = text
        .find('{')
        .ok_or_else(|| NetdeskError::format("no JSON object in reply"))?;
    let end = text
        .rfind('}')
        .filter(|end| *end > start)
        .ok_or_else(|| NetdeskError::format("unterminated JSON object in reply"))?;

    let value: Value = serde_json::from_str(&text[start..=end])
        .map_err(|e| NetdeskError::format(format!("malformed JSON: {}", e)))?;

    match value {
        Value::Object(mut map) => match map.remove("properties") {
            Some(Value::Object(inner)) => Ok(inner),
            Some(other) => {
                map.insert("properties".to_string(), other);
                Ok(map)
            }
            None => Ok(map),
        },
        _ => Err(NetdeskError::format("reply is not a JSON object")),
    }
}

/// Relevance score on the 0-10 scale. Out-of-range values are rejected, not clamped.
pub fn parse_score(text: &str) -> Result<u8> {
    let object = extract_object(text)?;
    let raw = object
        .get("score")
        .ok_or_else(|| NetdeskError::format("missing score"))?;

    let score = match raw {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
    .ok_or_else(|| NetdeskError::format(format!("score is not an integer: {}", raw)))?;

    if !(0..=10).contains(&score) {
        return Err(NetdeskError::format(format!("score {} outside 0-10", score)));
    }
    Ok(score as u8)
}

/// Answering decision; `respond` needs a non-empty answer
pub fn parse_reply(text: &str) -> Result<KnowledgeReply> {
    let object = extract_object(text)?;
    let action = object
        .get("action")
        .and_then(Value::as_str)
        .ok_or_else(|| NetdeskError::format("missing action"))?;

    match KnowledgeDecision::parse(action) {
        Some(KnowledgeDecision::Escalate) => Ok(KnowledgeReply::Escalate),
        Some(KnowledgeDecision::Respond) => {
            let answer = object
                .get("final_answer")
                .and_then(Value::as_str)
                .map(str::trim)
                .unwrap_or_default();
            if answer.is_empty() {
                Err(NetdeskError::format("respond without final_answer"))
            } else {
                Ok(KnowledgeReply::Respond(answer.to_string()))
            }
        }
        None => Err(NetdeskError::format(format!("unknown action '{}'", action))),
    }
}

pub struct KnowledgeAgent {
    model: ChatModel,
    knowledge: Arc<dyn KnowledgeBase>,
    results: usize,
    threshold: u8,
    format_retries: usize,
}

impl KnowledgeAgent {
    pub fn new(model: ChatModel, knowledge: Arc<dyn KnowledgeBase>, config: &AgentConfig) -> Self {
        Self {
            model,
            knowledge,
            results: config.knowledge_results,
            threshold: config.relevance_threshold,
            format_retries: config.format_retries,
        }
    }

    async fn score(&self, state: &mut ConversationState) -> Result<()> {
        state.enter_agent(AgentId::Knowledge);

        let passages = match self.knowledge.search(&state.user_question, self.results).await {
            Ok(passages) => passages,
            Err(e) => {
                warn!(error = %e, "knowledge search failed");
                state.knowledge_phase = KnowledgePhase::Rejected;
                return Ok(());
            }
        };
        debug!(passages = passages.len(), "passages retrieved for scoring");

        let mut messages = vec![
            Message::system(prompts::knowledge_rank(&passages)),
            Message::user(format!("QUESTION: {}", state.user_question)),
        ];

        for attempt in 0..=self.format_retries {
            let reply = self.model.invoke(&messages, &[]).await?;
            match parse_score(&reply.content) {
                Ok(score) => {
                    info!(score, threshold = self.threshold, "passages scored");
                    state.knowledge_relevance = Some(score);
                    state.knowledge_phase = KnowledgePhase::Scored;
                    return Ok(());
                }
                Err(e) => {
                    warn!(attempt, error = %e, "unusable relevance score");
                    messages.push(reply);
                    messages.push(Message::user(SCORE_CORRECTION));
                }
            }
        }

        state.knowledge_phase = KnowledgePhase::Rejected;
        Ok(())
    }

    async fn answer(&self, state: &mut ConversationState) -> Result<()> {
        let passages = match self.knowledge.search(&state.user_question, self.results).await {
            Ok(passages) => passages,
            Err(e) => {
                warn!(error = %e, "knowledge search failed, escalating");
                state.knowledge_decision = Some(KnowledgeDecision::Escalate);
                return Ok(());
            }
        };

        // Only a step that reaches an outcome lands in history, so a failed
        // model call can be retried without repeating the opening messages.
        let mut exchange = vec![
            Message::system(prompts::knowledge_answer(&passages, &state.user_language)),
            Message::user(format!("QUESTION: {}", state.user_question)),
        ];

        let mut decision = KnowledgeDecision::Escalate;
        for attempt in 0..=self.format_retries {
            let reply = self.model.invoke(&exchange, &[]).await?;
            let parsed = parse_reply(&reply.content);
            exchange.push(reply);

            match parsed {
                Ok(KnowledgeReply::Respond(answer)) => {
                    state.set_final_answer(answer);
                    decision = KnowledgeDecision::Respond;
                    break;
                }
                Ok(KnowledgeReply::Escalate) => {
                    info!("knowledge agent asked for escalation");
                    break;
                }
                Err(e) => {
                    warn!(attempt, error = %e, "unusable knowledge answer");
                    if attempt < self.format_retries {
                        exchange.push(Message::user(ANSWER_CORRECTION));
                    }
                }
            }
        }

        state.history.extend(exchange);
        state.knowledge_decision = Some(decision);
        Ok(())
    }
}

#[async_trait]
impl ReasoningAgent for KnowledgeAgent {
    fn id(&self) -> AgentId {
        AgentId::Knowledge
    }

    fn successors(&self) -> &'static [AgentId] {
        &[AgentId::Escalation]
    }

    async fn step(&self, state: &mut ConversationState) -> Result<()> {
        match state.knowledge_phase {
            KnowledgePhase::Unscored => self.score(state).await,
            KnowledgePhase::Scored => self.answer(state).await,
            KnowledgePhase::Rejected => Ok(()),
        }
    }

    fn route(&self, state: &ConversationState) -> Result<Route> {
        let route = match state.knowledge_phase {
            KnowledgePhase::Unscored => Route::Agent(AgentId::Knowledge),
            KnowledgePhase::Rejected => Route::Agent(AgentId::Escalation),
            KnowledgePhase::Scored => {
                if state.knowledge_relevance.unwrap_or(0) < self.threshold {
                    Route::Agent(AgentId::Escalation)
                } else {
                    match state.knowledge_decision {
                        Some(KnowledgeDecision::Respond) => Route::Terminate,
                        Some(KnowledgeDecision::Escalate) => Route::Agent(AgentId::Escalation),
                        None if state.has_final_answer() => Route::Terminate,
                        None => Route::Agent(AgentId::Knowledge),
                    }
                }
            }
        };
        Ok(route)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Role;
    use crate::testing::{ScriptedLlm, StaticKnowledgeBase};

    fn agent(llm: Arc<ScriptedLlm>) -> KnowledgeAgent {
        let config = AgentConfig {
            relevance_threshold: 5,
            format_retries: 1,
            ..Default::default()
        };
        KnowledgeAgent::new(
            ChatModel::new(llm, "test"),
            Arc::new(StaticKnowledgeBase::new(vec!["VPN needs port 443 open."])),
            &config,
        )
    }

    fn started() -> ConversationState {
        let mut state = ConversationState::new();
        state.begin_turn("Which port does the VPN use?", "English");
        state
    }

    #[test]
    fn test_parse_score_variants() {
        assert_eq!(parse_score(r#"{"score": 7}"#).unwrap(), 7);
        assert_eq!(parse_score(r#"{"score": 7.0}"#).unwrap(), 7);
        assert_eq!(parse_score(r#"{"score": "8"}"#).unwrap(), 8);
        assert_eq!(
            parse_score("```json\n{\"thought\": \"ok\", \"score\": 10}\n```").unwrap(),
            10
        );
        assert_eq!(
            parse_score(r#"{"properties": {"question": "q", "score": 4}}"#).unwrap(),
            4
        );
    }

    #[test]
    fn test_parse_score_rejects_bad_values() {
        assert!(parse_score(r#"{"score": 11}"#).is_err());
        assert!(parse_score(r#"{"score": -1}"#).is_err());
        assert!(parse_score(r#"{"score": 6.5}"#).is_err());
        assert!(parse_score(r#"{"thought": "no score"}"#).is_err());
        assert!(parse_score("seven").is_err());
    }

    #[test]
    fn test_parse_reply_requires_exact_action() {
        assert_eq!(
            parse_reply(r#"{"action": "respond", "final_answer": "Port 443."}"#).unwrap(),
            KnowledgeReply::Respond("Port 443.".to_string())
        );
        assert_eq!(
            parse_reply(r#"{"action": "escalate", "final_answer": ""}"#).unwrap(),
            KnowledgeReply::Escalate
        );
        assert!(parse_reply(r#"{"action": "maybe", "final_answer": "x"}"#).is_err());
        assert!(parse_reply(r#"{"action": "Respond", "final_answer": "x"}"#).is_err());
        assert!(parse_reply(r#"{"action": "respond", "final_answer": "  "}"#).is_err());
    }

    #[tokio::test]
    async fn test_low_score_routes_to_escalation_without_answering() {
        let llm = Arc::new(ScriptedLlm::new().on("grading a quiz", [r#"{"score": 3}"#]));
        let agent = agent(Arc::clone(&llm));
        let mut state = started();

        agent.step(&mut state).await.unwrap();
        assert_eq!(state.knowledge_relevance, Some(3));
        assert_eq!(agent.route(&state).unwrap(), Route::Agent(AgentId::Escalation));
        assert!(state.history.is_empty());
        assert_eq!(llm.calls(), 1);
    }

    #[tokio::test]
    async fn test_high_score_then_respond() {
        let llm = Arc::new(
            ScriptedLlm::new()
                .on("grading a quiz", [r#"{"score": 9}"#])
                .on(
                    "knowledge agent",
                    [r#"{"question": "q", "action": "respond", "final_answer": "The VPN uses port 443."}"#],
                ),
        );
        let agent = agent(llm);
        let mut state = started();

        agent.step(&mut state).await.unwrap();
        assert_eq!(agent.route(&state).unwrap(), Route::Agent(AgentId::Knowledge));

        agent.step(&mut state).await.unwrap();
        assert_eq!(state.final_answer.as_deref(), Some("The VPN uses port 443."));
        assert_eq!(agent.route(&state).unwrap(), Route::Terminate);
    }

    #[tokio::test]
    async fn test_invalid_action_degrades_to_escalate() {
        let llm = Arc::new(
            ScriptedLlm::new()
                .on("grading a quiz", [r#"{"score": 8}"#])
                .on("knowledge agent", [r#"{"action": "maybe", "final_answer": "?"}"#]),
        );
        let agent = agent(Arc::clone(&llm));
        let mut state = started();

        agent.step(&mut state).await.unwrap();
        agent.step(&mut state).await.unwrap();

        assert_eq!(state.knowledge_decision, Some(KnowledgeDecision::Escalate));
        assert!(state.final_answer.is_none());
        assert_eq!(agent.route(&state).unwrap(), Route::Agent(AgentId::Escalation));
        // one scoring call plus the answer and its retry
        assert_eq!(llm.calls(), 3);
    }

    #[tokio::test]
    async fn test_failed_answer_call_leaves_history_untouched() {
        let llm = Arc::new(
            ScriptedLlm::new()
                .on("grading a quiz", [r#"{"score": 9}"#])
                .on_error("knowledge agent", "connection reset")
                .then(
                    "knowledge agent",
                    r#"{"action": "respond", "final_answer": "Port 443."}"#,
                ),
        );
        let agent = agent(Arc::clone(&llm));
        let mut state = started();

        agent.step(&mut state).await.unwrap();
        assert!(agent.step(&mut state).await.is_err());
        assert!(state.history.is_empty());

        agent.step(&mut state).await.unwrap();
        assert_eq!(state.final_answer.as_deref(), Some("Port 443."));

        let systems = state.history.iter().filter(|m| m.role == Role::System).count();
        let questions = state
            .history
            .iter()
            .filter(|m| m.content.starts_with("QUESTION:"))
            .count();
        assert_eq!((systems, questions), (1, 1));
        assert_eq!(state.segment(AgentId::Knowledge).len(), 3);

        let last_request = llm.requests().pop().unwrap();
        assert_eq!(last_request.len(), 2);
    }

    #[tokio::test]
    async fn test_unparseable_score_is_rejected_after_retry() {
        let llm = Arc::new(ScriptedLlm::new().on("grading a quiz", ["very relevant!"]));
        let agent = agent(Arc::clone(&llm));
        let mut state = started();

        agent.step(&mut state).await.unwrap();
        assert_eq!(state.knowledge_phase, KnowledgePhase::Rejected);
        assert_eq!(state.knowledge_relevance, None);
        assert_eq!(agent.route(&state).unwrap(), Route::Agent(AgentId::Escalation));
        assert_eq!(llm.calls(), 2);
    }
}
