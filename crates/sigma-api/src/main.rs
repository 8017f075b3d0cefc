//! Sigma memory CLI entry point.
//!
//! Binary name: `sigma`
//!
//! Parses CLI arguments, opens the configured memory backend, then dispatches
//! to the matching command handler. The store is closed on every exit path.

mod cli;
mod state;

use anyhow::Context;
use clap::Parser;
use clap_complete::generate;

use sigma_core::memory::extractor::SuppliedExtractor;
use sigma_observe::tracing_setup::{init_tracing, shutdown_tracing, verbosity_filter};
use sigma_types::memory::FactQuery;

use cli::{Cli, Commands};
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_tracing(verbosity_filter(cli.quiet, cli.verbose), cli.otel)
        .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {e}"))?;

    // Shell completions don't need a store
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = <Cli as clap::CommandFactory>::command();
        generate(*shell, &mut cmd, "sigma", &mut std::io::stdout());
        return Ok(());
    }

    let extractor = match &cli.command {
        Commands::Store {
            entities_json,
            facts_json,
            ..
        } => cli::memory::supplied_extractor(entities_json.as_deref(), facts_json.as_deref())?,
        _ => SuppliedExtractor::new(),
    };

    let mut state = AppState::init(cli.data_dir.clone(), cli.backend, extractor).await?;

    let result = dispatch(&mut state, cli.command, cli.json).await;
    let closed = state.memory.close().await;
    shutdown_tracing();

    result?;
    closed.context("Failed to close memory store")?;
    Ok(())
}

async fn dispatch(state: &mut AppState, command: Commands, json: bool) -> anyhow::Result<()> {
    match command {
        Commands::Store {
            user, assistant, ..
        } => cli::memory::store(state, &user, &assistant, json).await,
        Commands::Recall { query, limit } => cli::memory::recall(state, &query, limit, json).await,
        Commands::Search { query } => cli::memory::search(state, &query, json).await,
        Commands::Recent { limit } => cli::memory::recent(state, limit, json).await,
        Commands::Relations { name, limit } => {
            cli::memory::relations(state, &name, limit, json).await
        }
        Commands::Facts {
            subject,
            predicate,
            object,
        } => {
            let query = FactQuery {
                subject,
                predicate,
                object,
            };
            cli::memory::facts(state, query, json).await
        }
        Commands::Stats => cli::memory::stats(state, json).await,
        Commands::Consolidate => cli::memory::consolidate(state, json).await,
        Commands::Completions { .. } => unreachable!("handled above"),
    }
}
