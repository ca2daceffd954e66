//! # grounded-qa CLI (`gqa`)
//!
//! ## Usage
//!
//! ```bash
//! gqa --config ./config/gqa.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `gqa init` | Create the data directory and run schema migrations |
//! | `gqa ingest <path>` | Store, chunk, embed and index one file |
//! | `gqa documents list` | List ingested documents |
//! | `gqa documents delete <id>` | Delete a document and its chunks |
//! | `gqa documents reset` | Delete every document |
//! | `gqa ask "<question>"` | Answer a question from the corpus |
//! | `gqa sanitize "<text>"` | Show how input would be cleaned or refused |
//! | `gqa conversations ...` | Manage chat transcripts |
//! | `gqa serve` | Start the HTTP API |
//!
//! Logs go to stderr and are filtered with `RUST_LOG` (default `info`).

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use grounded_qa::app::{self, App};
use grounded_qa::config;
use grounded_qa::conversations::{self, ConversationStore};
use grounded_qa::ingest;
use grounded_qa::migrate;
use grounded_qa::server;

/// Citation-gated question answering over local documents.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. A missing file means built-in defaults.
#[derive(Parser)]
#[command(
    name = "gqa",
    about = "Citation-gated question answering over local documents",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/gqa.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the data directory and all database tables.
    ///
    /// Idempotent. Legacy registry tables with a different layout are
    /// recreated; legacy message tables gain a `sources` column.
    Init,

    /// Ingest one file (.txt, .csv, .html, .htm).
    Ingest {
        /// Path of the file to ingest.
        path: PathBuf,
    },

    /// Manage ingested documents.
    Documents {
        #[command(subcommand)]
        action: DocumentsAction,
    },

    /// Ask a question.
    ///
    /// With `--conversation`, prior turns are used to rewrite the question
    /// and both the question and the answer are recorded.
    Ask {
        question: String,

        /// Conversation to answer in.
        #[arg(long)]
        conversation: Option<String>,

        /// Number of passages to retrieve (defaults to `[retrieval].top_k`).
        #[arg(long)]
        top_k: Option<usize>,
    },

    /// Run the input sanitizer on a string.
    Sanitize { text: String },

    /// Manage conversations.
    Conversations {
        #[command(subcommand)]
        action: ConversationsAction,
    },

    /// Start the HTTP server on `[server].bind`.
    Serve,
}

#[derive(Subcommand)]
enum DocumentsAction {
    /// List documents, most recent first.
    List,
    /// Delete a document by id.
    Delete { id: String },
    /// Delete every document.
    Reset,
}

#[derive(Subcommand)]
enum ConversationsAction {
    /// List conversations, most recently updated first.
    List,
    /// Create a conversation.
    New {
        #[arg(long)]
        title: Option<String>,
    },
    /// Print a conversation transcript.
    Show { id: String },
    /// Delete a conversation and its messages.
    Delete { id: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Ingest { path } => {
            let app = App::open(&cfg).await?;
            ingest::run_ingest(app.documents(), &path).await?;
        }
        Commands::Documents { action } => {
            let app = App::open(&cfg).await?;
            match action {
                DocumentsAction::List => ingest::run_list(app.documents()).await?,
                DocumentsAction::Delete { id } => ingest::run_delete(app.documents(), &id).await?,
                DocumentsAction::Reset => ingest::run_reset(app.documents()).await?,
            }
        }
        Commands::Ask {
            question,
            conversation,
            top_k,
        } => {
            app::run_ask(&cfg, &question, conversation.as_deref(), top_k).await?;
        }
        Commands::Sanitize { text } => {
            app::run_sanitize(&cfg, &text)?;
        }
        Commands::Conversations { action } => {
            let store = ConversationStore::open(&cfg.paths.conversations_db()).await?;
            match action {
                ConversationsAction::List => conversations::run_list(&store).await?,
                ConversationsAction::New { title } => {
                    conversations::run_new(&store, title.as_deref()).await?
                }
                ConversationsAction::Show { id } => conversations::run_show(&store, &id).await?,
                ConversationsAction::Delete { id } => conversations::run_delete(&store, &id).await?,
            }
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}
