//! CLI commands
//!
//! Special commands that can be executed in the REPL.

use crate::cli::repl::Repl;
use crate::core::Result;

/// Result of parsing a command
#[derive(Debug, PartialEq)]
pub enum CommandResult {
    /// Not a command; send to the orchestrator
    Continue(String),
    /// Command was handled, show output
    Handled(String),
    /// Exit the REPL
    Exit,
    /// No output needed
    None,
}

/// Parse and handle special commands
pub async fn handle_command(input: &str, repl: &mut Repl) -> Result<CommandResult> {
    let input = input.trim();
    if input.is_empty() {
        return Ok(CommandResult::None);
    }
    let parts: Vec<&str> = input.splitn(2, ' ').collect();
    let cmd = parts[0].to_lowercase();
    let args = parts.get(1).map(|s| s.trim()).unwrap_or("");

    match cmd.as_str() {
        "exit" | "quit" | "q" => Ok(CommandResult::Exit),

        "help" | "?" => Ok(CommandResult::Handled(help_text())),

        "new" => {
            let thread = repl.new_thread();
            Ok(CommandResult::Handled(format!("Started thread {}", thread)))
        }

        "thread" => {
            if args.is_empty() {
                return Ok(CommandResult::Handled(format!(
                    "Current thread: {}",
                    repl.thread_id()
                )));
            }
            repl.set_thread(args);
            Ok(CommandResult::Handled(format!("Switched to thread {}", args)))
        }

        "models" => {
            let models = repl.provider().list_models().await?;
            let config = repl.config();
            let output = format!(
                "Available models ({}):\n{}\n\nCurrent:\n  Agents: {}\n  Triage: {}",
                repl.provider().name(),
                models
                    .iter()
                    .map(|m| format!("  - {}", m))
                    .collect::<Vec<_>>()
                    .join("\n"),
                config.models.default,
                config.models.triage_model()
            );
            Ok(CommandResult::Handled(output))
        }

        "status" => status(repl).await.map(CommandResult::Handled),

        "history" => history(repl).await.map(CommandResult::Handled),

        "config" => match args {
            "save" => {
                let path = repl.config().save()?;
                Ok(CommandResult::Handled(format!(
                    "Configuration saved to {}",
                    path.display()
                )))
            }
            _ => Ok(CommandResult::Handled(repl.config().to_toml())),
        },

        _ => {
            if input.starts_with('/') {
                Ok(CommandResult::Handled(format!(
                    "Unknown command: {}. Type 'help' for available commands.",
                    cmd
                )))
            } else {
                Ok(CommandResult::Continue(input.to_string()))
            }
        }
    }
}

async fn status(repl: &Repl) -> Result<String> {
    let config = repl.config();
    let state = repl.orchestrator().state(repl.thread_id()).await?;

    let mut output = format!(
        "Netdesk Status:\n\
         ─────────────────────────────\n\
         Provider:     {}\n\
         Agents model: {}\n\
         Triage model: {}\n\
         Thread:       {}\n\
         Turns:        {}\n\
         Max steps:    {}\n\
         Debug:        {}",
        config.provider,
        config.models.default,
        config.models.triage_model(),
        repl.thread_id(),
        state.turns.len(),
        config.agent.max_steps,
        if config.agent.debug { "on" } else { "off" }
    );

    if let Some(outcome) = repl.last_outcome() {
        let path: Vec<&str> = outcome.path.iter().map(|a| a.as_str()).collect();
        output.push_str(&format!(
            "\nLast turn:    {} in {} steps via {}",
            outcome.status,
            outcome.steps,
            path.join(" -> ")
        ));
    }
    Ok(output)
}

async fn history(repl: &Repl) -> Result<String> {
    let state = repl.orchestrator().state(repl.thread_id()).await?;
    if state.turns.is_empty() {
        return Ok("No turns on this thread yet.".to_string());
    }

    let mut output = String::new();
    for (i, turn) in state.turns.iter().enumerate() {
        output.push_str(&format!(
            "{}. [{}] {}\n   {}\n",
            i + 1,
            turn.status,
            turn.question,
            turn.answer
        ));
    }
    Ok(output.trim_end().to_string())
}

/// Generate help text
fn help_text() -> String {
    r#"Netdesk Commands:
─────────────────────────────────────────────
  help, ?          Show this help message
  exit, quit, q    Exit Netdesk
  new              Start a new conversation thread
  thread [id]      Show or switch the current thread
  history          Show the turns of the current thread
  status           Show current configuration and last turn
  models           List models available on the backend
  config [save]    Show the effective configuration, or save it

Keyboard Shortcuts:
  Ctrl+C           Cancel the running question
  Ctrl+D           Exit Netdesk

Tips:
  - Ask about connectivity ("can you ping 8.8.8.8?") to run diagnostics
  - Ask to escalate when you need a ticket for the support team
─────────────────────────────────────────────"#
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{Orchestrator, RoutingTable};
    use crate::checkpoint::MemoryCheckpointStore;
    use crate::core::Config;
    use crate::testing::{FixedLanguage, ScriptedLlm, StaticKnowledgeBase};
    use std::sync::Arc;

    fn repl() -> Repl {
        let config = Config::default();
        let llm: Arc<dyn crate::llm::LLMProvider> = Arc::new(ScriptedLlm::new());
        let table = RoutingTable::standard(
            Arc::clone(&llm),
            Arc::new(StaticKnowledgeBase::empty()),
            &config,
        );
        let orchestrator = Orchestrator::new(
            table,
            Arc::new(MemoryCheckpointStore::new()),
            Arc::new(FixedLanguage("en")),
            &config,
        )
        .unwrap();
        Repl::with_orchestrator(config, llm, orchestrator)
    }

    #[tokio::test]
    async fn test_exit_and_plain_input() {
        let mut repl = repl();
        assert_eq!(handle_command("quit", &mut repl).await.unwrap(), CommandResult::Exit);
        assert_eq!(handle_command("   ", &mut repl).await.unwrap(), CommandResult::None);
        assert_eq!(
            handle_command("is 8.8.8.8 up?", &mut repl).await.unwrap(),
            CommandResult::Continue("is 8.8.8.8 up?".to_string())
        );
    }

    #[tokio::test]
    async fn test_new_and_thread_switch() {
        let mut repl = repl();
        let first = repl.thread_id().to_string();
        handle_command("new", &mut repl).await.unwrap();
        assert_ne!(repl.thread_id(), first);

        handle_command("thread support-42", &mut repl).await.unwrap();
        assert_eq!(repl.thread_id(), "support-42");
    }

    #[tokio::test]
    async fn test_history_after_a_turn() {
        let mut repl = repl();
        let outcome = repl.ask("hello").await;
        assert_eq!(outcome.status, crate::agent::TurnStatus::Complete);

        let CommandResult::Handled(output) = handle_command("history", &mut repl).await.unwrap()
        else {
            panic!("history should be handled");
        };
        assert!(output.starts_with("1. [complete] hello"));
    }

    #[tokio::test]
    async fn test_unknown_slash_command() {
        let mut repl = repl();
        let result = handle_command("/frobnicate", &mut repl).await.unwrap();
        assert!(matches!(result, CommandResult::Handled(text) if text.contains("Unknown command")));
    }
}
