//! # memo CLI
//!
//! Thin command-line shell over the `memo_rag` library.
//!
//! ## Usage
//!
//! ```bash
//! memo --config ./config/memo.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `memo init` | Create the SQLite database and run schema migrations |
//! | `memo index <file>` | Chunk, embed, and store one file |
//! | `memo remove <index-id>` | Remove an indexed entry |
//! | `memo search "<query>"` | Semantic search |
//! | `memo context "<query>"` | Print the token-bounded context for a query |
//! | `memo ask "<question>"` | Answer a question from the indexed content |
//! | `memo kb build <project>` | Re-index a project's sources |
//! | `memo kb update <project> <ids>` | Re-index changed sources |
//! | `memo stats <project>` | Show knowledge-base statistics |
//!
//! Logging goes to stderr and is controlled by `RUST_LOG`
//! (default `info`).

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use memo_rag::{commands, config};

/// memo: retrieval-augmented search and answers over recordings and notes.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/memo.example.toml` for a full example.
#[derive(Parser)]
#[command(name = "memo", version, about = "Retrieval-augmented search and answers over recordings and notes")]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/memo.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Chunk, embed, and store a text file.
    Index {
        /// File to index (UTF-8 text).
        path: PathBuf,

        /// Project the content belongs to.
        #[arg(long)]
        project: String,

        /// `document` or `transcription`.
        #[arg(long = "type", default_value = "document")]
        content_type: String,

        /// Tag to attach; repeatable.
        #[arg(long = "tag")]
        tags: Vec<String>,
    },

    /// Remove an indexed entry from both stores.
    Remove {
        /// Index id printed by `memo index`.
        index_id: String,
    },

    /// Semantic search over indexed content.
    Search {
        query: String,

        /// Restrict results to one project.
        #[arg(long)]
        project: Option<String>,

        /// Maximum number of chunk hits to consider.
        #[arg(long)]
        limit: Option<usize>,

        /// Also print related search terms.
        #[arg(long)]
        suggest: bool,
    },

    /// Print the context that would be handed to a language model.
    Context {
        query: String,

        #[arg(long)]
        project: Option<String>,

        /// Token budget for the context.
        #[arg(long)]
        max_tokens: Option<usize>,
    },

    /// Answer a question from the indexed content.
    Ask {
        question: String,

        #[arg(long)]
        project: Option<String>,

        /// Token budget for the retrieved context.
        #[arg(long)]
        max_tokens: Option<usize>,
    },

    /// Build or update a project's knowledge base.
    Kb {
        #[command(subcommand)]
        action: KbAction,
    },

    /// Show knowledge-base statistics for a project.
    Stats { project: String },
}

#[derive(Subcommand)]
enum KbAction {
    /// Re-index every source of a project.
    Build {
        project: String,

        /// Skip transcriptions.
        #[arg(long)]
        no_transcriptions: bool,

        /// Skip documents.
        #[arg(long)]
        no_documents: bool,
    },

    /// Re-index only the given content ids (paths relative to the project
    /// folder, e.g. `documents/plan.md`).
    Update {
        project: String,

        #[arg(required = true)]
        changed: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => commands::run_init(&cfg).await?,
        Commands::Index {
            path,
            project,
            content_type,
            tags,
        } => commands::run_index(&cfg, &path, &project, &content_type, tags).await?,
        Commands::Remove { index_id } => commands::run_remove(&cfg, &index_id).await?,
        Commands::Search {
            query,
            project,
            limit,
            suggest,
        } => commands::run_search(&cfg, &query, project, limit, suggest).await?,
        Commands::Context {
            query,
            project,
            max_tokens,
        } => commands::run_context(&cfg, &query, project.as_deref(), max_tokens).await?,
        Commands::Ask {
            question,
            project,
            max_tokens,
        } => commands::run_ask(&cfg, &question, project.as_deref(), max_tokens).await?,
        Commands::Kb { action } => match action {
            KbAction::Build {
                project,
                no_transcriptions,
                no_documents,
            } => commands::run_kb_build(&cfg, &project, !no_transcriptions, !no_documents).await?,
            KbAction::Update { project, changed } => {
                commands::run_kb_update(&cfg, &project, &changed).await?
            }
        },
        Commands::Stats { project } => commands::run_stats(&cfg, &project).await?,
    }

    Ok(())
}
