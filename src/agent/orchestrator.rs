//! Turn orchestration
//!
//! Runs one user question through the routing graph: triage first, then the
//! worker agents it hands off to, executing tool hops in between, until an
//! agent routes to the end or the step bound is hit. State is loaded from and
//! saved to the checkpoint store around each turn, and turns on the same
//! thread never overlap.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::agent::answer::{extract_answer, DEFAULT_APOLOGY};
use crate::agent::{
    AgentId, ConnectivityAgent, ConversationState, EscalationAgent, KnowledgeAgent,
    ReasoningAgent, Route, TriageAgent, TurnStatus,
};
use crate::checkpoint::{CheckpointStore, FileCheckpointStore, MemoryCheckpointStore, ThreadLocks};
use crate::core::{Config, NetdeskError, Result};
use crate::knowledge::{DocumentStore, KnowledgeBase};
use crate::language::{resolve_language, LanguageDetector, WhatlangDetector};
use crate::llm::{ChatModel, LLMProvider};
use crate::tools::{escalation_tools, network_tools, ToolInvoker};

/// Agents by id, validated before any turn runs
#[derive(Clone, Default)]
pub struct RoutingTable {
    agents: BTreeMap<AgentId, Arc<dyn ReasoningAgent>>,
}

impl RoutingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `agent` under its own id, replacing any previous one
    pub fn with_agent(mut self, agent: Arc<dyn ReasoningAgent>) -> Self {
        self.agents.insert(agent.id(), agent);
        self
    }

    pub fn get(&self, id: AgentId) -> Option<&Arc<dyn ReasoningAgent>> {
        self.agents.get(&id)
    }

    pub fn ids(&self) -> Vec<AgentId> {
        self.agents.keys().copied().collect()
    }

    /// The standard four-agent graph.
    ///
    /// Triage may run on its own model; the other agents share the default.
    pub fn standard(
        provider: Arc<dyn LLMProvider>,
        knowledge: Arc<dyn KnowledgeBase>,
        config: &Config,
    ) -> Self {
        let temperature = config.models.temperature;
        let model = |name: &str| {
            ChatModel::new(Arc::clone(&provider), name).with_temperature(temperature)
        };
        let default_model = config.models.default.as_str();

        Self::new()
            .with_agent(Arc::new(TriageAgent::new(model(
                config.models.triage_model(),
            ))))
            .with_agent(Arc::new(ConnectivityAgent::new(
                model(default_model),
                ToolInvoker::new(network_tools(&config.tools), &config.tools),
            )))
            .with_agent(Arc::new(KnowledgeAgent::new(
                model(default_model),
                knowledge,
                &config.agent,
            )))
            .with_agent(Arc::new(EscalationAgent::new(
                model(default_model),
                ToolInvoker::new(
                    escalation_tools(
                        &config.escalation,
                        &config.tools,
                        config.checkpoint.dir.as_deref(),
                    ),
                    &config.tools,
                ),
            )))
    }

    /// Check the graph is closed: triage exists, every successor is
    /// registered and every tool-using agent has tools.
    pub fn validate(&self) -> Result<()> {
        if !self.agents.contains_key(&AgentId::Triage) {
            return Err(NetdeskError::routing("no triage agent registered"));
        }
        for (id, agent) in &self.agents {
            for next in agent.successors() {
                if !self.agents.contains_key(next) {
                    return Err(NetdeskError::routing(format!(
                        "{} routes to unregistered agent {}",
                        id, next
                    )));
                }
            }
            if let Some(tools) = agent.tools() {
                if tools.registry().is_empty() {
                    return Err(NetdeskError::routing(format!(
                        "{} has a tool node with no tools",
                        id
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Result of one turn
#[derive(Debug, Clone, PartialEq)]
pub struct TurnOutcome {
    pub answer: String,
    /// Agents visited, consecutive repeats collapsed
    pub path: Vec<AgentId>,
    /// Agent steps plus tool hops
    pub steps: usize,
    pub status: TurnStatus,
}

pub struct Orchestrator {
    table: RoutingTable,
    checkpoints: Arc<dyn CheckpointStore>,
    locks: ThreadLocks,
    detector: Arc<dyn LanguageDetector>,
    default_language: String,
    max_steps: usize,
    max_step_failures: usize,
}

impl Orchestrator {
    /// Build an orchestrator over a validated routing table
    pub fn new(
        table: RoutingTable,
        checkpoints: Arc<dyn CheckpointStore>,
        detector: Arc<dyn LanguageDetector>,
        config: &Config,
    ) -> Result<Self> {
        table.validate()?;
        Ok(Self {
            table,
            checkpoints,
            locks: ThreadLocks::new(),
            detector,
            default_language: config.agent.default_language.clone(),
            max_steps: config.agent.max_steps,
            max_step_failures: config.agent.max_step_failures.max(1),
        })
    }

    /// Standard agents, knowledge base and checkpoint store from `config`
    pub fn from_config(config: &Config, provider: Arc<dyn LLMProvider>) -> Result<Self> {
        let knowledge: Arc<dyn KnowledgeBase> = match &config.knowledge.documents_dir {
            Some(dir) => Arc::new(DocumentStore::load_dir(dir)?),
            None => {
                warn!("no knowledge documents configured, knowledge answers will escalate");
                Arc::new(DocumentStore::new()?)
            }
        };

        let checkpoints: Arc<dyn CheckpointStore> = match &config.checkpoint.dir {
            Some(dir) => Arc::new(FileCheckpointStore::new(dir)?),
            None => Arc::new(MemoryCheckpointStore::new()),
        };

        let table = RoutingTable::standard(provider, knowledge, config);
        Self::new(table, checkpoints, Arc::new(WhatlangDetector::new()), config)
    }

    /// Answer `question` on `thread_id`
    pub async fn process(&self, question: &str, thread_id: &str) -> String {
        self.run_turn(question, thread_id, &CancellationToken::new())
            .await
            .answer
    }

    /// Current checkpoint of a thread
    pub async fn state(&self, thread_id: &str) -> Result<ConversationState> {
        self.checkpoints.load(thread_id).await
    }

    /// Run one turn. Cancelling `cancel` abandons the turn without saving it.
    pub async fn run_turn(
        &self,
        question: &str,
        thread_id: &str,
        cancel: &CancellationToken,
    ) -> TurnOutcome {
        self.turn(question, thread_id, cancel)
            .instrument(info_span!("turn", thread = thread_id))
            .await
    }

    async fn turn(&self, question: &str, thread_id: &str, cancel: &CancellationToken) -> TurnOutcome {
        let _guard = self.locks.acquire(thread_id).await;

        let mut state = match self.checkpoints.load(thread_id).await {
            Ok(state) => state,
            Err(e) => {
                warn!(error = %e, "checkpoint unreadable, starting a fresh thread");
                ConversationState::new()
            }
        };

        let language = resolve_language(self.detector.as_ref(), question, &self.default_language);
        state.begin_turn(question, language.as_str());
        info!(language = %language, "turn started");

        let (status, path, steps) = self.drive(&mut state, cancel).await;

        let answer = match status {
            TurnStatus::Complete => extract_answer(&state),
            TurnStatus::Incomplete => DEFAULT_APOLOGY.to_string(),
            TurnStatus::Cancelled => {
                info!(steps, "turn cancelled, checkpoint left untouched");
                return TurnOutcome {
                    answer: DEFAULT_APOLOGY.to_string(),
                    path,
                    steps,
                    status,
                };
            }
        };

        state.record_turn(answer.clone(), path.clone(), status);
        if let Err(e) = self.checkpoints.save(thread_id, &state).await {
            warn!(error = %e, "failed to save checkpoint");
        }

        info!(%status, steps, path = ?path, "turn finished");
        TurnOutcome {
            answer,
            path,
            steps,
            status,
        }
    }

    /// Walk the routing graph from triage until a terminal condition
    async fn drive(
        &self,
        state: &mut ConversationState,
        cancel: &CancellationToken,
    ) -> (TurnStatus, Vec<AgentId>, usize) {
        let mut path: Vec<AgentId> = Vec::new();
        let mut steps = 0usize;
        let mut failures = 0usize;
        let mut current = AgentId::Triage;

        loop {
            if cancel.is_cancelled() {
                return (TurnStatus::Cancelled, path, steps);
            }
            if steps >= self.max_steps {
                warn!(max_steps = self.max_steps, "step bound reached");
                return (TurnStatus::Incomplete, path, steps);
            }

            let Some(agent) = self.table.get(current) else {
                error!(agent = %current, "route to unregistered agent");
                return (TurnStatus::Incomplete, path, steps);
            };

            if path.last() != Some(&current) {
                path.push(current);
            }
            steps += 1;
            debug!(agent = %current, step = steps, "agent step");

            let result = tokio::select! {
                _ = cancel.cancelled() => return (TurnStatus::Cancelled, path, steps),
                result = agent.step(state) => result,
            };

            if let Err(e) = result {
                failures += 1;
                warn!(agent = %current, failures, error = %e, "agent step failed");
                if failures >= self.max_step_failures {
                    return (TurnStatus::Incomplete, path, steps);
                }
                continue;
            }
            failures = 0;

            let route = match agent.route(state) {
                Ok(route) => route,
                Err(e) => {
                    error!(agent = %current, error = %e, "routing failed");
                    return (TurnStatus::Incomplete, path, steps);
                }
            };

            match route {
                Route::Terminate => return (TurnStatus::Complete, path, steps),
                Route::Agent(next) => {
                    if next != current {
                        debug!(from = %current, to = %next, "hand-off");
                    }
                    current = next;
                }
                Route::ToolHop => {
                    let Some(invoker) = agent.tools() else {
                        error!(agent = %current, "tool hop requested by an agent without tools");
                        return (TurnStatus::Incomplete, path, steps);
                    };
                    if steps >= self.max_steps {
                        warn!(max_steps = self.max_steps, "step bound reached before tool hop");
                        return (TurnStatus::Incomplete, path, steps);
                    }
                    steps += 1;

                    let calls = state
                        .last_message()
                        .map(|m| m.calls().to_vec())
                        .unwrap_or_default();
                    let results = tokio::select! {
                        _ = cancel.cancelled() => return (TurnStatus::Cancelled, path, steps),
                        results = invoker.invoke(&calls) => results,
                    };
                    state.pending_tool_results.extend(results);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{stub_network_tools, FixedLanguage, ScriptedLlm, StaticKnowledgeBase};
    use crate::tools::ToolRegistry;
    use async_trait::async_trait;

    struct Looping;

    #[async_trait]
    impl ReasoningAgent for Looping {
        fn id(&self) -> AgentId {
            AgentId::Triage
        }

        async fn step(&self, _state: &mut ConversationState) -> Result<()> {
            Ok(())
        }

        fn route(&self, _state: &ConversationState) -> Result<Route> {
            Ok(Route::Agent(AgentId::Triage))
        }
    }

    fn orchestrator(table: RoutingTable, config: &Config) -> Orchestrator {
        Orchestrator::new(
            table,
            Arc::new(MemoryCheckpointStore::new()),
            Arc::new(FixedLanguage("en")),
            config,
        )
        .unwrap()
    }

    #[test]
    fn test_validate_requires_triage() {
        assert!(RoutingTable::new().validate().is_err());
    }

    #[test]
    fn test_validate_rejects_missing_successor() {
        let llm = Arc::new(ScriptedLlm::new());
        let table = RoutingTable::new().with_agent(Arc::new(TriageAgent::new(ChatModel::new(
            llm, "test",
        ))));
        let err = table.validate().unwrap_err();
        assert!(err.to_string().contains("unregistered"));
    }

    #[test]
    fn test_validate_rejects_empty_tool_node() {
        let llm: Arc<dyn LLMProvider> = Arc::new(ScriptedLlm::new());
        let table = RoutingTable::new()
            .with_agent(Arc::new(Looping))
            .with_agent(Arc::new(ConnectivityAgent::new(
                ChatModel::new(llm, "test"),
                ToolInvoker::new(ToolRegistry::new(), &Default::default()),
            )));
        assert!(table.validate().is_err());
    }

    #[test]
    fn test_standard_table_is_valid() {
        let llm = Arc::new(ScriptedLlm::new());
        let table = RoutingTable::standard(
            llm,
            Arc::new(StaticKnowledgeBase::empty()),
            &Config::default(),
        );
        table.validate().unwrap();
        assert_eq!(
            table.ids(),
            vec![
                AgentId::Triage,
                AgentId::Connectivity,
                AgentId::Knowledge,
                AgentId::Escalation
            ]
        );
    }

    #[tokio::test]
    async fn test_step_bound_yields_apology() {
        let mut config = Config::default();
        config.agent.max_steps = 4;
        let orchestrator = orchestrator(RoutingTable::new().with_agent(Arc::new(Looping)), &config);

        let outcome = orchestrator
            .run_turn("anything", "t", &CancellationToken::new())
            .await;
        assert_eq!(outcome.status, TurnStatus::Incomplete);
        assert_eq!(outcome.answer, DEFAULT_APOLOGY);
        assert_eq!(outcome.steps, 4);
        assert_eq!(outcome.path, vec![AgentId::Triage]);
    }

    #[tokio::test]
    async fn test_tool_hop_counts_as_step() {
        let llm = Arc::new(
            ScriptedLlm::new()
                .on("routing triage agent", ["Final Answer: connectivity"])
                .on_tool_call("network connectivity agent", "ping_ip", serde_json::json!({"ip_address": "8.8.8.8"}))
                .then("network connectivity agent", "Thought: done\nFinal Answer: Reachable."),
        );
        let provider: Arc<dyn LLMProvider> = llm;
        let config = Config::default();
        let table = RoutingTable::standard(
            Arc::clone(&provider),
            Arc::new(StaticKnowledgeBase::empty()),
            &config,
        )
        .with_agent(Arc::new(ConnectivityAgent::new(
            ChatModel::new(provider, "test"),
            ToolInvoker::new(stub_network_tools(), &config.tools),
        )));
        let orchestrator = orchestrator(table, &config);

        let outcome = orchestrator
            .run_turn("can you ping 8.8.8.8?", "t", &CancellationToken::new())
            .await;
        assert_eq!(outcome.status, TurnStatus::Complete);
        assert_eq!(outcome.answer, "Reachable.");
        assert_eq!(outcome.path, vec![AgentId::Triage, AgentId::Connectivity]);
        // triage, connectivity, tool hop, connectivity
        assert_eq!(outcome.steps, 4);
    }
}
