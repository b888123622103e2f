//! recalld - expert recall daemon
//!
//! Drains the embedding job queue so recorded memories become searchable, and
//! reports how much of each expert's history is ready for retrieval.
//!
//! ## Commands
//!
//! - `worker`: Embed pending memories until Ctrl-C (or one batch with `--once`)
//! - `coverage`: Show pending, ready, and failed counts plus queued jobs
//!
//! The store comes from `SURREALDB_*` and the provider from
//! `RECALL_EMBEDDING_*` / `OPENAI_API_KEY`.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::{info, warn, Level};

use recall_core::{IngestWorker, OpenAiEmbeddings, WorkerConfig};
use recall_state::{EmbeddingQueue, MemoryStore, SurrealMemoryStore};

#[derive(Parser)]
#[command(name = "recalld")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Expert recall daemon: embeds recorded memories and reports coverage", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON logs and output
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the embedding ingest worker until Ctrl-C
    Worker {
        /// Process a single batch and exit
        #[arg(long)]
        once: bool,

        /// Jobs claimed per pass (1-16)
        #[arg(long)]
        batch_size: Option<usize>,

        /// Failed attempts before a memory is quarantined
        #[arg(long)]
        max_tries: Option<u32>,

        /// Identifier recorded on claimed jobs
        #[arg(long)]
        worker_id: Option<String>,
    },

    /// Report how many memories are pending, ready, and failed
    Coverage {
        /// Restrict to one expert
        #[arg(long)]
        expert: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    recall_core::init_tracing(cli.json, level);

    let store = Arc::new(
        SurrealMemoryStore::from_env()
            .await
            .context("Failed to connect to recall database")?,
    );

    match cli.command {
        Commands::Worker {
            once,
            batch_size,
            max_tries,
            worker_id,
        } => {
            let mut config = WorkerConfig::from_env()?;
            if let Some(n) = batch_size {
                config = config.with_batch_size(n);
            }
            if let Some(n) = max_tries {
                config = config.with_max_tries(n);
            }
            if let Some(id) = worker_id {
                config = config.with_worker_id(id);
            }
            cmd_worker(store, config, once, cli.json).await
        }
        Commands::Coverage { expert } => cmd_coverage(&store, expert.as_deref(), cli.json).await,
    }
}

async fn cmd_worker(
    store: Arc<SurrealMemoryStore>,
    config: WorkerConfig,
    once: bool,
    json: bool,
) -> Result<()> {
    let provider =
        Arc::new(OpenAiEmbeddings::from_env().context("Failed to configure embedding provider")?);
    let worker = IngestWorker::new(store.clone(), store, provider, config)?;

    if once {
        let report = worker.run_once().await?;
        if json {
            println!("{}", serde_json::to_string_pretty(&report)?);
        } else {
            println!(
                "claimed {}  succeeded {}  retried {}  quarantined {}  dropped {}  errored {}",
                report.claimed,
                report.succeeded,
                report.retried,
                report.quarantined,
                report.dropped,
                report.errored
            );
        }
        return Ok(());
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("shutdown requested");
                let _ = shutdown_tx.send(true);
            }
            Err(e) => {
                warn!(error = %e, "failed to listen for Ctrl-C");
                // Keep the sender alive so the worker is not stopped.
                std::future::pending::<()>().await;
            }
        }
    });

    worker.run(shutdown_rx).await?;
    Ok(())
}

async fn cmd_coverage(store: &SurrealMemoryStore, expert: Option<&str>, json: bool) -> Result<()> {
    let stats = store
        .coverage(expert)
        .await
        .context("Failed to read coverage")?;
    let queued = store
        .pending_count()
        .await
        .context("Failed to count queued jobs")?;

    if json {
        let out = serde_json::json!({
            "expert_id": expert,
            "coverage": stats,
            "ready_ratio": stats.ready_ratio(),
            "queued_jobs": queued,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!("Coverage for {}", expert.unwrap_or("all experts"));
    println!("  total:       {}", stats.total);
    println!("  ready:       {}", stats.ready);
    println!("  pending:     {}", stats.pending);
    println!("  failed:      {}", stats.failed);
    println!("  ready ratio: {:.1}%", stats.ready_ratio() * 100.0);
    println!("  queued jobs: {queued}");
    Ok(())
}
