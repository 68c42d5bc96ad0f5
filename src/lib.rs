//! Netdesk - Multi-Agent Network Support Assistant
//!
//! Routes each user question through a small graph of reasoning agents:
//! a triage agent picks a worker, the worker answers (running network
//! diagnostics or consulting documentation), and unresolved questions are
//! escalated as support tickets.
//!
//! # Architecture
//!
//! - **Core**: Shared types, configuration, and error handling
//! - **LLM**: Model backends (Ollama, OpenAI-compatible) with retries
//! - **Tools**: Tool registry, invoker, network diagnostics and ticketing
//! - **Agent**: Conversation state, the agents and the orchestrator
//! - **Checkpoint**: Per-thread conversation persistence
//! - **CLI**: Command-line interface and REPL
//!
//! # Usage
//!
//! ```rust,no_run
//! use netdesk::agent::Orchestrator;
//! use netdesk::llm::create_provider;
//! use netdesk::Config;
//!
//! #[tokio::main]
//! async fn main() -> netdesk::Result<()> {
//!     let config = Config::load();
//!     let orchestrator = Orchestrator::from_config(&config, create_provider(&config)?)?;
//!
//!     let answer = orchestrator.process("Can you ping 8.8.8.8?", "thread-1").await;
//!     println!("{}", answer);
//!     Ok(())
//! }
//! ```

pub mod agent;
pub mod checkpoint;
pub mod cli;
pub mod core;
pub mod knowledge;
pub mod language;
pub mod llm;
pub mod testing;
pub mod tools;

// Re-export commonly used items
pub use agent::Orchestrator;
pub use cli::Repl;
pub use core::{Config, NetdeskError, Result};
