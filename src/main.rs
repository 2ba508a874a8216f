//! # crag
//!
//! The `crag` binary indexes a directory into a local SQLite database and
//! answers questions over it.
//!
//! ## Usage
//!
//! ```bash
//! crag --config ./config/crag.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `crag init` | Create the SQLite database and run schema migrations |
//! | `crag index <dir>` | Index (or incrementally reindex) a directory |
//! | `crag search "<query>"` | Semantic search over indexed chunks |
//! | `crag ask "<question>"` | Answer a question from retrieved context |
//! | `crag get <path>` | Show one indexed document and its chunks |
//! | `crag remove <path>` | Remove one document from the index |
//! | `crag stats` | Index statistics and integrity check |
//! | `crag clear` | Remove everything from the index |
//!
//! ## Examples
//!
//! ```bash
//! crag index ./docs --config ./config/crag.toml
//! crag search "retry policy" --top-k 3
//! crag ask "What is the retry policy?" --rerank --threshold 0.4
//! crag ask "Write a haiku about SQLite" --plain
//! ```

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use context_rag::progress::ProgressMode;
use context_rag::rag::AskArgs;
use context_rag::{config, db, get, indexer, logging, rag, search, stats};

/// crag: local semantic search and retrieval-augmented answers over your
/// documents.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/crag.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "crag",
    about = "Local semantic search and retrieval-augmented answers over your documents",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/crag.toml")]
    config: PathBuf,

    /// Indexing progress on stderr. `auto` shows it only on a terminal.
    #[arg(long, global = true, value_enum, default_value_t = ProgressArg::Auto)]
    progress: ProgressArg,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ProgressArg {
    Auto,
    Off,
    Human,
    Json,
}

impl ProgressArg {
    fn mode(self) -> ProgressMode {
        match self {
            ProgressArg::Auto => ProgressMode::default_for_tty(),
            ProgressArg::Off => ProgressMode::Off,
            ProgressArg::Human => ProgressMode::Human,
            ProgressArg::Json => ProgressMode::Json,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Idempotent: running it multiple times is safe.
    Init,

    /// Index a directory.
    ///
    /// Unchanged files (same content hash and mtime) are skipped. Documents
    /// whose files disappeared from the directory are removed.
    Index {
        /// Directory to index.
        dir: PathBuf,

        /// Reindex every file even if unchanged.
        #[arg(long)]
        full: bool,
    },

    /// Semantic search over indexed chunks.
    Search {
        /// The search query string.
        query: String,

        /// Number of results.
        #[arg(long)]
        top_k: Option<usize>,
    },

    /// Answer a question from the index.
    Ask {
        /// The question.
        question: String,

        /// Ask the LLM directly, without retrieval.
        #[arg(long)]
        plain: bool,

        /// Number of chunks used as context.
        #[arg(long)]
        top_k: Option<usize>,

        /// Rescore candidates with the LLM before selecting.
        #[arg(long, conflicts_with = "no_rerank")]
        rerank: bool,

        /// Disable reranking even if the config enables it.
        #[arg(long)]
        no_rerank: bool,

        /// Minimum relevance in [0.0, 1.0].
        #[arg(long, allow_negative_numbers = true)]
        threshold: Option<f32>,

        /// Candidate pool size when reranking.
        #[arg(long)]
        rerank_top_k: Option<usize>,

        /// Print the answer, sources, and pipeline stats as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Show an indexed document and its chunks.
    Get {
        /// File path as indexed.
        path: PathBuf,
    },

    /// Remove one document from the index.
    Remove {
        /// File path as indexed.
        path: PathBuf,
    },

    /// Index statistics and integrity check.
    Stats,

    /// Remove every document, chunk, and embedding.
    Clear,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    logging::init(&cfg.logging.level);

    match cli.command {
        Commands::Init => {
            let store = db::open_store(&cfg).await?;
            store.close().await;
            println!("Database initialized successfully.");
        }
        Commands::Index { dir, full } => {
            indexer::run_index(&cfg, &dir, full, cli.progress.mode()).await?;
        }
        Commands::Search { query, top_k } => {
            search::run_search(&cfg, &query, top_k).await?;
        }
        Commands::Ask {
            question,
            plain,
            top_k,
            rerank,
            no_rerank,
            threshold,
            rerank_top_k,
            json,
        } => {
            let args = AskArgs {
                plain,
                top_k,
                rerank: if rerank {
                    Some(true)
                } else if no_rerank {
                    Some(false)
                } else {
                    None
                },
                threshold,
                rerank_top_k,
                json,
            };
            rag::run_ask(&cfg, &question, &args).await?;
        }
        Commands::Get { path } => {
            get::run_get(&cfg, &path).await?;
        }
        Commands::Remove { path } => {
            get::run_remove(&cfg, &path).await?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
        Commands::Clear => {
            stats::run_clear(&cfg).await?;
        }
    }

    Ok(())
}
