use std::{
    collections::HashMap,
    error::Error,
    path::{Path, PathBuf},
    str::FromStr,
    sync::Arc,
};

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use sluice_core::prelude::*;
use sluice_executor::{
    wiring::sqlite_job, BatchJob, ExecutionManager, ExecutorConfig, FinalStatus, JobEvent,
};
use sluice_sqlite::SqliteStore;
use tokio::{signal, sync::broadcast::error::RecvError};
use tracing::{debug, error, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use uuid::Uuid;

/// Staged batch ETL pipelines backed by SQLite
#[derive(Debug, Parser)]
#[command(name = "sluice", version, about, long_about = None)]
struct Cli {
    /// Logging level (info, debug, trace)
    #[arg(long, env = "SLUICE_LOG_LEVEL", default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run a pipeline definition as a new batch
    Run {
        /// Path to the pipeline definition (yaml, json or toml)
        #[arg(short, long)]
        file: PathBuf,

        /// k=v list of parameters to pass to the definition
        /// e.g. sluice run -f orders.yml -p table=orders -p days=7
        #[arg(short, long, value_parser = parse_key_val::<String, String>)]
        params: Option<Vec<(String, String)>>,

        /// SQLite database holding the ledger, staging rows, cache and warehouse
        #[arg(long, env = "SLUICE_DATABASE")]
        database: PathBuf,

        /// Batch id, a new uuid when omitted; an unfinished batch is resumed
        #[arg(long)]
        batch_id: Option<String>,

        /// Named database connection, e.g. --connection crm=data/crm.db
        #[arg(long = "connection", value_parser = parse_key_val::<String, PathBuf>)]
        connections: Option<Vec<(String, PathBuf)>>,

        /// Batches running concurrently
        #[arg(long, env = "SLUICE_WORKER_SLOTS", default_value = "4")]
        worker_slots: usize,

        /// Attempts before a batch is marked failed
        #[arg(long, env = "SLUICE_MAX_ATTEMPTS", default_value = "3")]
        max_attempts: u32,

        /// Wall-clock limit of a single attempt in seconds
        #[arg(long, env = "SLUICE_ATTEMPT_TIMEOUT", default_value = "3600")]
        attempt_timeout: u64,
    },

    /// Print a batch from the ledger as JSON
    Status {
        /// SQLite database holding the ledger
        #[arg(long, env = "SLUICE_DATABASE")]
        database: PathBuf,

        #[arg(long)]
        batch_id: String,
    },
}

fn parse_key_val<T, U>(s: &str) -> Result<(T, U), Box<dyn Error + Send + Sync + 'static>>
where
    T: FromStr,
    T::Err: Error + Send + Sync + 'static,
    U: FromStr,
    U::Err: Error + Send + Sync + 'static,
{
    let pos = s
        .find('=')
        .ok_or_else(|| format!("invalid KEY=value: no `=` found in `{s}`"))?;
    Ok((s[..pos].parse()?, s[pos + 1..].parse()?))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_level = Level::from_str(cli.log_level.to_lowercase().as_str()).unwrap_or(Level::INFO);
    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .json()
                .with_writer(std::io::stderr)
                .with_current_span(true)
                .with_span_list(true)
                .with_target(true),
        )
        .with(EnvFilter::from_default_env().add_directive(log_level.into()))
        .init();

    match cli.command {
        Commands::Run {
            file,
            params,
            database,
            batch_id,
            connections,
            worker_slots,
            max_attempts,
            attempt_timeout,
        } => {
            let params = params.unwrap_or_default().into_iter().collect();
            let config = ExecutorConfig::try_new(worker_slots, max_attempts, attempt_timeout)
                .context("invalid executor configuration")?;

            let status = run(
                file,
                params,
                database,
                batch_id,
                connections.unwrap_or_default(),
                config,
            )
            .await?;

            if status.is_failure() {
                std::process::exit(1);
            }
        }
        Commands::Status { database, batch_id } => {
            let store = open(&database)?;
            let Some(batch) = store.find(&batch_id).await? else {
                bail!("batch '{batch_id}' not found");
            };
            println!("{}", serde_json::to_string_pretty(&batch)?);
        }
    }

    Ok(())
}

fn open(database: &Path) -> anyhow::Result<SqliteStore> {
    SqliteStore::open(database)
        .with_context(|| format!("failed to open database {}", database.display()))
}

async fn run(
    file: PathBuf,
    params: HashMap<String, String>,
    database: PathBuf,
    batch_id: Option<String>,
    connections: Vec<(String, PathBuf)>,
    config: ExecutorConfig,
) -> anyhow::Result<FinalStatus> {
    let definition = match PipelineDefinition::from_file(&file, format_from_path(&file), params) {
        Ok(definition) => definition,
        Err(error) => {
            eprintln!("{:?}", miette::Report::new(error));
            std::process::exit(1);
        }
    };

    info!(
        pipeline = %definition.name,
        version = %env!("CARGO_PKG_VERSION"),
        "Starting sluice"
    );

    let store = open(&database)?;
    let connections = connections
        .iter()
        .map(|(name, path)| Ok((name.clone(), open(path)?)))
        .collect::<anyhow::Result<Vec<_>>>()?;

    let batch_id = batch_id.unwrap_or_else(|| Uuid::new_v4().to_string());
    match store.create(&batch_id, &definition.name).await {
        Ok(_) => info!(batch_id = %batch_id, "Batch created"),
        Err(LedgerError::AlreadyExists(_)) => {
            info!(batch_id = %batch_id, "Batch already exists ... resuming")
        }
        Err(e) => return Err(e).context("failed to create batch"),
    }

    let etl = sqlite_job(&store, &connections, &definition, config.retry.clone());
    let manager = Arc::new(ExecutionManager::new(etl, config));
    let worker = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.start().await })
    };

    let (id, mut queue, mut events) = manager
        .submit(BatchJob {
            batch_id: batch_id.clone(),
            pipeline: definition.name.clone(),
            config: Arc::new(definition.config),
        })
        .await;

    let mut cancelled = false;
    let mut queue_open = true;
    let status = loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(JobEvent::Finished(status)) => break status,
                Some(event) => debug!(?event, "Job event"),
                None => bail!("executor stopped before batch {batch_id} finished"),
            },
            update = queue.recv(), if queue_open => match update {
                Ok(update) if update.job_id == id => debug!(
                    batch_id = %update.batch_id,
                    attempt = update.attempt,
                    position = update.position,
                    "Queue position"
                ),
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => debug!(skipped, "Queue updates skipped"),
                Err(RecvError::Closed) => queue_open = false,
            },
            _ = signal::ctrl_c(), if !cancelled => {
                warn!("Received Ctrl+C, cancelling batch");
                manager.cancel(id).await;
                cancelled = true;
            }
        }
    };
    worker.abort();

    match &status {
        FinalStatus::Completed(summary) => {
            println!("{}", serde_json::to_string_pretty(summary)?);
        }
        FinalStatus::Skipped => warn!(batch_id = %batch_id, "Batch was already finished"),
        FinalStatus::Failed { attempts, error } => {
            error!(batch_id = %batch_id, attempts, "Batch failed: {error}");
        }
        FinalStatus::Cancelled => warn!(batch_id = %batch_id, "Batch cancelled"),
    }

    Ok(status)
}
