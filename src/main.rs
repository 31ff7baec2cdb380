//! # Answer Guard CLI (`aguard`)
//!
//! Commands for index-store initialization, corpus ingestion, one-shot
//! queries, and the HTTP server.
//!
//! ```bash
//! aguard --config ./config/aguard.toml init
//! aguard --config ./config/aguard.toml ingest
//! aguard --config ./config/aguard.toml query "How long does payout take?" --role clerk
//! aguard --config ./config/aguard.toml query "..." --role clerk --mode pseudonymize
//! aguard --config ./config/aguard.toml serve
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use answer_guard::models::{QueryMode, QueryOutcome, QueryRequest};
use answer_guard::pipeline::Pipeline;
use answer_guard::{config, db, ingest, server};

/// Role-gated retrieval-augmented question answering with PII redaction.
#[derive(Parser)]
#[command(
    name = "aguard",
    about = "Answer Guard — role-gated question answering with PII redaction",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/aguard.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the index store schema. Idempotent.
    Init,
    /// Ingest the document corpus: chunk, embed, rebuild the index store.
    Ingest,
    /// Run one query through the pipeline and print the JSON response.
    Query {
        /// The natural-language question.
        question: String,
        /// Requester role, resolved against the role policy file.
        #[arg(long)]
        role: String,
        /// Privacy mode for the pre-generation path.
        #[arg(long, value_enum, default_value_t = QueryMode::Default)]
        mode: QueryMode,
    },
    /// Start the HTTP API server.
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let pool = db::connect(&cfg).await?;
            db::apply_schema(&pool).await?;
            pool.close().await;
            println!("Index store initialized.");
        }
        Commands::Ingest => {
            ingest::run_ingest(&cfg).await?;
        }
        Commands::Query {
            question,
            role,
            mode,
        } => {
            let pipeline = Pipeline::build(&cfg).await?;
            let req = QueryRequest {
                question,
                role,
                mode,
            };
            match pipeline.run(&req).await? {
                QueryOutcome::Completed(resp) => {
                    println!("{}", serde_json::to_string_pretty(&resp)?);
                }
                QueryOutcome::Denied { step } => {
                    eprintln!(
                        "access denied: {}",
                        step.detail.as_deref().unwrap_or("no sources permitted")
                    );
                    std::process::exit(3);
                }
            }
        }
        Commands::Serve => {
            let pipeline = Arc::new(Pipeline::build(&cfg).await?);
            server::run_server(&cfg, pipeline).await?;
        }
    }

    Ok(())
}
