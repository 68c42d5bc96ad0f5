//! Netdesk - multi-agent network support assistant
//!
//! Main entry point for the CLI application.

use anyhow::Context;
use clap::Parser;
use netdesk::agent::Orchestrator;
use netdesk::llm::create_provider;
use netdesk::{Config, Repl};
use tracing_subscriber::EnvFilter;

/// Netdesk - multi-agent network support assistant
#[derive(Parser, Debug)]
#[command(name = "netdesk")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Model used by the worker agents
    #[arg(long, short = 'm')]
    model: Option<String>,

    /// Model used for triage (defaults to --model)
    #[arg(long, short = 't')]
    triage_model: Option<String>,

    /// Conversation thread to continue
    #[arg(long)]
    thread: Option<String>,

    /// Directory of .md/.txt support documents
    #[arg(long, short = 'k')]
    knowledge_dir: Option<std::path::PathBuf>,

    /// Enable debug output
    #[arg(long, short = 'd')]
    debug: bool,

    /// Single prompt mode (non-interactive)
    #[arg(long, short = 'p')]
    prompt: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Build configuration
    let mut config = Config::load();

    // Apply CLI overrides
    if let Some(ref model) = args.model {
        config.models.default = model.clone();
    }
    if let Some(ref model) = args.triage_model {
        config.models.triage = Some(model.clone());
    }
    if let Some(ref dir) = args.knowledge_dir {
        config.knowledge.documents_dir = Some(dir.clone());
    }
    if args.debug {
        config.agent.debug = true;
    }

    let filter = if config.agent.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    config.validate().context("invalid configuration")?;
    let provider = create_provider(&config).context("failed to create model backend")?;

    // Single prompt mode
    if let Some(prompt) = args.prompt {
        let orchestrator = Orchestrator::from_config(&config, provider)?;
        let thread = args
            .thread
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let answer = orchestrator.process(&prompt, &thread).await;
        println!("{}", answer);
        return Ok(());
    }

    // Interactive REPL mode
    let mut repl = Repl::new(config, provider)?;
    if let Some(thread) = args.thread {
        repl.set_thread(thread);
    }
    repl.run().await?;

    Ok(())
}
