//! # repo-rag CLI (`rrag`)
//!
//! Ingest GitHub repositories into a vector store and ask questions about
//! them.
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `rrag init` | Create the SQLite database and run schema migrations |
//! | `rrag serve` | Start the HTTP API (resumes interrupted workflows first) |
//! | `rrag submit <url>` | Start an ingestion workflow |
//! | `rrag status <id>` | Show a workflow instance's status |
//! | `rrag ask <url> "<question>"` | Answer a question about an ingested repository |
//!
//! ## Examples
//!
//! ```bash
//! rrag init --config ./config/rrag.toml
//! rrag submit https://github.com/acme/widgets --skip-path docs --wait
//! rrag ask https://github.com/acme/widgets "Where is the retry policy defined?"
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use repo_rag::{app, config, migrate, server};
use repo_rag_core::models::IngestParams;
use repo_rag_core::store::Store;

#[derive(Parser)]
#[command(
    name = "rrag",
    about = "repo-rag: repository ingestion and retrieval-augmented question answering",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/rrag.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Idempotent: running it multiple times is safe.
    Init,

    /// Start the HTTP API server.
    Serve,

    /// Submit a GitHub repository for ingestion.
    Submit {
        /// Repository URL (`https://github.com/<owner>/<repo>`).
        url: String,

        /// GitHub token passed to the extraction service.
        #[arg(long)]
        token: Option<String>,

        /// Repository paths the extraction service should skip (repeatable).
        #[arg(long = "skip-path")]
        skip_paths: Vec<String>,

        /// Run the workflow in the foreground and report its final status.
        #[arg(long)]
        wait: bool,
    },

    /// Show the status of a workflow instance.
    Status {
        /// Workflow instance id.
        id: String,
    },

    /// Ask a question about an ingested repository.
    Ask {
        /// Repository URL.
        url: String,

        /// The question.
        question: String,

        /// GitHub token used for the access check.
        #[arg(long)]
        token: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Submit {
            url,
            token,
            skip_paths,
            wait,
        } => {
            let store = app::open_store(&cfg).await?;
            let engine = app::build_engine(&cfg, store)?;

            let mut params = IngestParams::new(url);
            params.token = token;
            params.skip_paths = skip_paths;

            if wait {
                let instance = engine.run_to_completion(params).await?;
                println!("{}  {}", instance.id, instance.status);
                if let Some(error) = instance.error {
                    anyhow::bail!("workflow errored: {}", error);
                }
            } else {
                if params.token.is_some() {
                    tracing::warn!("--token is not persisted; use --wait to ingest with it");
                }
                let instance = engine.enqueue(params).await?;
                println!("{}  {}", instance.id, instance.status);
                println!(
                    "Queued. A running `rrag serve` starts it within {}s.",
                    cfg.workflow.poll_interval_secs
                );
            }
        }
        Commands::Status { id } => {
            let store = app::open_store(&cfg).await?;
            match store.get_instance(&id).await? {
                Some(instance) => {
                    println!("{}  {}", instance.id, instance.status);
                    if let Some(error) = instance.error {
                        println!("error: {}", error);
                    }
                }
                None => anyhow::bail!("workflow instance not found: {}", id),
            }
        }
        Commands::Ask {
            url,
            question,
            token,
        } => {
            let store = app::open_store(&cfg).await?;
            let pipeline = app::build_answer_pipeline(&cfg, store)?;
            let answer = pipeline.ask(&url, &question, token.as_deref()).await?;
            println!("{}", answer);
        }
    }

    Ok(())
}
