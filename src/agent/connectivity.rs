//! Connectivity agent: network diagnostics through a ReAct tool loop

use async_trait::async_trait;

use crate::agent::prompts;
use crate::agent::react::{question_message, react_route, react_step};
use crate::agent::{AgentId, ConversationState, ReasoningAgent, Route};
use crate::core::{Message, Result};
use crate::llm::ChatModel;
use crate::tools::ToolInvoker;

pub struct ConnectivityAgent {
    model: ChatModel,
    tools: ToolInvoker,
}

impl ConnectivityAgent {
    pub fn new(model: ChatModel, tools: ToolInvoker) -> Self {
        Self { model, tools }
    }
}

#[async_trait]
impl ReasoningAgent for ConnectivityAgent {
    fn id(&self) -> AgentId {
        AgentId::Connectivity
    }

    fn tools(&self) -> Option<&ToolInvoker> {
        Some(&self.tools)
    }

    async fn step(&self, state: &mut ConversationState) -> Result<()> {
        let registry = self.tools.registry();
        react_step(self.id(), &self.model, &self.tools, state, |state| {
            vec![
                Message::system(prompts::connectivity(registry, &state.user_language)),
                question_message(state, "\nThought:"),
            ]
        })
        .await
    }

    fn route(&self, state: &ConversationState) -> Result<Route> {
        react_route(self.id(), state)
    }
}
