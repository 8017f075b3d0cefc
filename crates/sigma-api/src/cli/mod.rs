//! CLI command definitions for the `sigma` binary.
//!
//! Each subcommand maps onto one memory operation, so the whole outward
//! surface of the subsystem can be driven from a shell.

pub mod memory;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use clap_complete::Shell;

use sigma_types::config::BackendKind;

/// Inspect and drive Sigma's conversational memory.
#[derive(Parser)]
#[command(name = "sigma", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for verbose, -vv for debug/trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Override the backend from config.toml (sqlite, file, graph).
    #[arg(long, global = true)]
    pub backend: Option<BackendKind>,

    /// Data directory (defaults to $SIGMA_DATA_DIR or ~/.sigma).
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Export spans through OpenTelemetry (stdout exporter).
    #[arg(long, global = true)]
    pub otel: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Store one conversation turn.
    Store {
        /// The user's message.
        user: String,

        /// The assistant's response.
        assistant: String,

        /// Entities as a JSON array; detected heuristically when omitted.
        #[arg(long)]
        entities_json: Option<String>,

        /// Facts as a JSON array of {subject, predicate, object}.
        #[arg(long)]
        facts_json: Option<String>,
    },

    /// Retrieve memories relevant to a query.
    Recall {
        query: String,

        /// Maximum results (defaults to retrieve_limit).
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Search conversations and facts.
    Search { query: String },

    /// List the most recent conversations.
    Recent {
        /// Maximum results (defaults to recent_limit).
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Show entities co-mentioned with the named entity.
    Relations {
        name: String,

        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// Search stored facts by subject, predicate and object.
    Facts {
        #[arg(long)]
        subject: Option<String>,

        #[arg(long)]
        predicate: Option<String>,

        #[arg(long)]
        object: Option<String>,
    },

    /// Show memory totals.
    Stats,

    /// Flag old conversations for future compaction.
    Consolidate,

    /// Generate shell completions.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}
