//! Shared Thought/Action/Observation loop for tool-using agents
//!
//! Each agent works on its own segment of the history: the system prompt and
//! question it pushed on first entry, followed by model replies and merged
//! tool results. Only that segment is sent to the model.

use tracing::{debug, error};

use crate::agent::answer::parse_final_answer;
use crate::agent::{AgentId, ConversationState, Route};
use crate::core::{Message, NetdeskError, Result, Role};
use crate::llm::ChatModel;
use crate::tools::ToolInvoker;

/// Completed exchanges of the thread shown to tool-using agents
pub const PREVIOUS_EXCHANGES: usize = 3;

const CONTINUE_NUDGE: &str = "Continue. When you are done, finish with a line starting with \"Final Answer:\".";

/// Opening user message: recent exchanges, then the question
pub fn question_message(state: &ConversationState, suffix: &str) -> Message {
    let mut content = String::new();
    let previous = state.previous_exchanges(PREVIOUS_EXCHANGES);
    if !previous.is_empty() {
        content.push_str("Previous conversation:\n");
        for turn in previous {
            content.push_str(&format!("User: {}\nAssistant: {}\n", turn.question, turn.answer));
        }
        content.push('\n');
    }
    content.push_str(&format!("Question: {}{}", state.user_question, suffix));
    Message::user(content)
}

/// One ReAct step for `agent`.
///
/// First entry pushes the system prompt and question. Later entries merge the
/// pending tool results, or nudge the model when it stopped without a final
/// answer. The reply is appended and its final answer recorded when it
/// requested no tools.
pub async fn react_step(
    agent: AgentId,
    model: &ChatModel,
    tools: &ToolInvoker,
    state: &mut ConversationState,
    opening: impl FnOnce(&ConversationState) -> Vec<Message>,
) -> Result<()> {
    if state.enter_agent(agent) {
        for message in opening(&*state) {
            state.push(message);
        }
    } else {
        let merged = state.merge_pending_tool_results();
        let stalled = state
            .segment(agent)
            .last()
            .map(|m| m.role == Role::Assistant)
            .unwrap_or(false);
        if merged == 0 && stalled {
            state.push(Message::user(CONTINUE_NUDGE));
        }
    }

    let reply = model
        .invoke(state.segment(agent), &tools.definitions())
        .await?;

    debug!(
        agent = %agent,
        tool_calls = reply.calls().len(),
        "model replied"
    );

    if !reply.has_tool_calls() {
        if let Some(answer) = parse_final_answer(&reply.content) {
            state.set_final_answer(answer);
        }
    }
    state.push(reply);
    Ok(())
}

/// Tool hop when the latest reply asked for tools, terminate once answered,
/// otherwise keep looping on the same agent
pub fn react_route(agent: AgentId, state: &ConversationState) -> Result<Route> {
    let Some(last) = state.segment(agent).last() else {
        error!(agent = %agent, "route evaluated before the agent produced any message");
        return Err(NetdeskError::routing(format!(
            "{} route evaluated with no messages",
            agent
        )));
    };

    if last.has_tool_calls() {
        Ok(Route::ToolHop)
    } else if state.has_final_answer() {
        Ok(Route::Terminate)
    } else {
        Ok(Route::Agent(agent))
    }
}
