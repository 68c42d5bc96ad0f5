//! Final answer extraction
//!
//! Agents set `final_answer` on the state directly. Scanning free text for a
//! `Final Answer:` marker is only a fallback for models that ignore the
//! structured path.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::agent::state::ConversationState;

/// Answer returned when a turn produced nothing usable
pub const DEFAULT_APOLOGY: &str = "Sorry, I could not process your request.";

static FINAL_ANSWER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)Final Answer:\s*(.+)").unwrap());

/// Text after the first `Final Answer:` marker, if any
pub fn parse_final_answer(text: &str) -> Option<String> {
    FINAL_ANSWER
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|answer| !answer.is_empty())
}

/// The answer a finished turn hands back to the caller
pub fn extract_answer(state: &ConversationState) -> String {
    if let Some(answer) = state.final_answer.as_deref().filter(|a| !a.trim().is_empty()) {
        return answer.to_string();
    }

    state
        .last_message()
        .and_then(|m| parse_final_answer(&m.content))
        .unwrap_or_else(|| DEFAULT_APOLOGY.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Message;

    #[test]
    fn test_marker_is_case_insensitive_and_multiline() {
        let text = "Thought: I now know the final answer\nfinal answer: Yes.\nThe host replied.";
        assert_eq!(
            parse_final_answer(text).as_deref(),
            Some("Yes.\nThe host replied.")
        );
    }

    #[test]
    fn test_missing_or_empty_marker() {
        assert_eq!(parse_final_answer("Thought: still working"), None);
        assert_eq!(parse_final_answer("Final Answer:   "), None);
    }

    #[test]
    fn test_extract_prefers_structured_answer() {
        let mut state = ConversationState::new();
        state.push(Message::assistant("Final Answer: from text"));
        state.set_final_answer("structured");
        assert_eq!(extract_answer(&state), "structured");
    }

    #[test]
    fn test_extract_falls_back_to_marker_then_apology() {
        let mut state = ConversationState::new();
        assert_eq!(extract_answer(&state), DEFAULT_APOLOGY);
        state.push(Message::assistant("Final Answer: from text"));
        assert_eq!(extract_answer(&state), "from text");
    }
}
