//! Interactive REPL for Netdesk
//!
//! Provides the main user interaction loop.

use std::io::{self, BufRead, Write};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::warn;
use uuid::Uuid;

use crate::agent::{Orchestrator, TurnOutcome, TurnStatus};
use crate::cli::commands::{handle_command, CommandResult};
use crate::core::{Config, Result};
use crate::llm::LLMProvider;

/// Interactive REPL (Read-Eval-Print Loop)
pub struct Repl {
    config: Config,
    provider: Arc<dyn LLMProvider>,
    orchestrator: Orchestrator,
    thread_id: String,
    last_outcome: Option<TurnOutcome>,
}

impl Repl {
    /// Create a REPL with the standard agents for `config`
    pub fn new(config: Config, provider: Arc<dyn LLMProvider>) -> Result<Self> {
        let orchestrator = Orchestrator::from_config(&config, Arc::clone(&provider))?;
        Ok(Self::with_orchestrator(config, provider, orchestrator))
    }

    pub fn with_orchestrator(
        config: Config,
        provider: Arc<dyn LLMProvider>,
        orchestrator: Orchestrator,
    ) -> Self {
        Self {
            config,
            provider,
            orchestrator,
            thread_id: new_thread_id(),
            last_outcome: None,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn provider(&self) -> &Arc<dyn LLMProvider> {
        &self.provider
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    pub fn thread_id(&self) -> &str {
        &self.thread_id
    }

    pub fn last_outcome(&self) -> Option<&TurnOutcome> {
        self.last_outcome.as_ref()
    }

    /// Switch to a fresh thread and return its id
    pub fn new_thread(&mut self) -> String {
        self.thread_id = new_thread_id();
        self.last_outcome = None;
        self.thread_id.clone()
    }

    /// Continue an existing thread
    pub fn set_thread(&mut self, thread_id: impl Into<String>) {
        self.thread_id = thread_id.into();
        self.last_outcome = None;
    }

    /// Run one question; Ctrl-C cancels it at the next step boundary
    pub async fn ask(&mut self, question: &str) -> TurnOutcome {
        let cancel = CancellationToken::new();
        let outcome = {
            let turn = self.orchestrator.run_turn(question, &self.thread_id, &cancel);
            tokio::pin!(turn);

            tokio::select! {
                outcome = &mut turn => outcome,
                _ = tokio::signal::ctrl_c() => {
                    cancel.cancel();
                    turn.await
                }
            }
        };
        self.last_outcome = Some(outcome.clone());
        outcome
    }

    /// Run the REPL
    pub async fn run(&mut self) -> Result<()> {
        self.print_banner();

        if let Err(e) = self.provider.list_models().await {
            warn!(error = %e, "model backend not reachable yet");
            println!("⚠️  Model backend not reachable: {}\n", e);
        }

        let stdin = io::stdin();
        let mut stdout = io::stdout();

        loop {
            print!("You: ");
            stdout.flush()?;

            let mut input = String::new();
            match stdin.lock().read_line(&mut input) {
                Ok(0) => {
                    // EOF (Ctrl+D)
                    println!("\nGoodbye!");
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    eprintln!("Error reading input: {}", e);
                    continue;
                }
            }

            match handle_command(&input, self).await {
                Ok(CommandResult::Exit) => {
                    println!("\nGoodbye!");
                    break;
                }
                Ok(CommandResult::Handled(output)) => {
                    println!("{}\n", output);
                }
                Ok(CommandResult::None) => continue,
                Ok(CommandResult::Continue(question)) => {
                    let outcome = self.ask(&question).await;
                    if outcome.status == TurnStatus::Cancelled {
                        println!("\n(cancelled)\n");
                    } else {
                        println!("\nAssistant:\n{}\n", outcome.answer);
                    }
                }
                Err(e) => {
                    eprintln!("Command error: {}\n", e);
                }
            }
        }

        Ok(())
    }

    /// Print the startup banner
    fn print_banner(&self) {
        println!(
            r#"
╔═══════════════════════════════════════════╗
║   NETDESK                                 ║
║   Network support assistant               ║
╚═══════════════════════════════════════════╝
"#
        );
        println!("Provider: {}", self.provider.name());
        println!("Models:");
        println!("  Agents: {}", self.config.models.default);
        println!("  Triage: {}", self.config.models.triage_model());
        println!("Thread:   {}", self.thread_id);
        println!();
        println!("Commands: help, new, status, models, config, exit");
        println!("───────────────────────────────────────────────");
    }
}

fn new_thread_id() -> String {
    Uuid::new_v4().to_string()
}
