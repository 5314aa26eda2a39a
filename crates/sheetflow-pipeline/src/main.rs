//! Sheetflow - Main entry point

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sheetflow_common::logging::{init_logging, LogConfig};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use sheetflow_pipeline::{
    config::{Config, DatabaseConfig},
    framework::{CheckpointStore, PgCheckpointStore, PipelineRun},
    storage::Storage,
    ArchiveIngestJob, ColumnMapping, IngestActivities, JobScheduler, PgSink, PipelineOrchestrator,
    PipelineRunner, RetryPolicy, RunInput, SinkLoader,
};

/// How long `serve` waits for in-flight jobs after a shutdown signal.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

#[derive(Parser)]
#[command(name = "sheetflow", version, about = "Durable ingestion of spreadsheet archives")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Process queued jobs until Ctrl-C or SIGTERM
    Serve,

    /// Queue a run for an archive and print its run id
    Enqueue {
        /// Object key of the archive in the bucket
        archive_id: String,
        /// Upload this local file under the archive id first
        #[arg(long)]
        file: Option<PathBuf>,
        /// Carry the file's bytes in the job instead of uploading it
        #[arg(long, requires = "file")]
        inline: bool,
    },

    /// Execute one run in this process
    Run {
        archive_id: String,
        /// Read the archive from this local file instead of the bucket
        #[arg(long)]
        file: Option<PathBuf>,
    },

    /// Resume an interrupted run in this process
    Resume { run_id: Uuid },

    /// Show one run, or the most recent runs
    Status {
        run_id: Option<Uuid>,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },

    /// Ask a run to stop before its next batch
    Cancel { run_id: Uuid },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_config = LogConfig::builder()
        .log_file_prefix("sheetflow")
        .filter_directives("sheetflow_pipeline=debug,sqlx=warn,apalis=info")
        .build();

    // Environment variables take precedence
    let log_config = LogConfig::from_env_with(log_config)?;
    let _guard = init_logging(&log_config)?;

    let config = Config::load()?;
    let db = connect(&config.database).await?;

    sqlx::migrate!("../../migrations")
        .run(&db)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to run migrations: {}", e))?;

    info!("Database migrations completed");

    match cli.command {
        Command::Serve => serve(config, db).await,
        Command::Enqueue {
            archive_id,
            file,
            inline,
        } => enqueue(config, db, archive_id, file, inline).await,
        Command::Run { archive_id, file } => {
            let mut input = RunInput::new(archive_id);
            if let Some(path) = file {
                input = input.with_bytes(read_archive(&path).await?);
            }
            let shutdown = shutdown_token();
            let runner = build_runner(&config, &db, shutdown)?;
            info!(run_id = %input.run_id, "Starting run");
            let run = runner.run(input).await?;
            print_run(&run);
            Ok(())
        }
        Command::Resume { run_id } => {
            let shutdown = shutdown_token();
            let runner = build_runner(&config, &db, shutdown)?;
            let run = runner.resume(run_id).await?;
            print_run(&run);
            Ok(())
        }
        Command::Status { run_id, limit } => {
            let store = PgCheckpointStore::new(Arc::new(db));
            match run_id {
                Some(run_id) => {
                    let run = store
                        .load_run(run_id)
                        .await?
                        .with_context(|| format!("No run with id {}", run_id))?;
                    print_run(&run);
                }
                None => {
                    for run in store.list_runs(limit).await? {
                        print_run(&run);
                    }
                }
            }
            Ok(())
        }
        Command::Cancel { run_id } => {
            let store = PgCheckpointStore::new(Arc::new(db));
            if store.request_cancel(run_id).await? {
                println!("Cancel requested for {}", run_id);
            } else {
                println!("Run {} is unknown or already finished", run_id);
            }
            Ok(())
        }
    }
}

async fn connect(config: &DatabaseConfig) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
        .idle_timeout(Duration::from_secs(config.idle_timeout_secs))
        .connect(&config.url)
        .await
        .context("Failed to connect to the checkpoint database")?;

    info!("Database connection pool established");
    Ok(pool)
}

/// Wire the production orchestrator
///
/// The mapping document is read here so a bad document fails before any run
/// starts.
fn build_runner(config: &Config, db: &PgPool, shutdown: CancellationToken) -> Result<PipelineRunner> {
    let mapping = Arc::new(ColumnMapping::from_path(&config.pipeline.mapping_path)?);
    info!(
        path = %config.pipeline.mapping_path.display(),
        entries = mapping.len(),
        "Column mapping loaded"
    );

    let sink = Arc::new(PgSink::connect_lazy(&config.sink)?);
    let loader = SinkLoader::new(sink, config.sink.table.clone(), config.pipeline.load_mode);
    let source = Arc::new(Storage::new(config.storage.clone()));
    let activities = IngestActivities::new(&config.pipeline, source, mapping, loader);

    let store = Arc::new(PgCheckpointStore::new(Arc::new(db.clone())));
    let orchestrator =
        PipelineOrchestrator::new(store, Arc::new(activities), config.pipeline.pacing());

    Ok(PipelineRunner::new(
        orchestrator,
        RetryPolicy::from_config(&config.pipeline),
        shutdown,
    ))
}

async fn serve(config: Config, db: PgPool) -> Result<()> {
    // Runs are not cancelled on shutdown; the queue redelivers them and they
    // resume from their history.
    let runner = Arc::new(build_runner(&config, &db, CancellationToken::new())?);
    let scheduler = JobScheduler::new(db, config.pipeline.worker_concurrency);

    let shutdown = shutdown_token();
    let stop = shutdown.clone();

    tokio::select! {
        result = scheduler.run(runner, shutdown) => result?,
        _ = async {
            stop.cancelled().await;
            tokio::time::sleep(SHUTDOWN_GRACE).await;
        } => {
            warn!(
                grace_secs = SHUTDOWN_GRACE.as_secs(),
                "In-flight jobs did not finish in time; they resume on next start"
            );
        }
    }

    info!("Sheetflow shut down gracefully");
    Ok(())
}

async fn enqueue(
    config: Config,
    db: PgPool,
    archive_id: String,
    file: Option<PathBuf>,
    inline: bool,
) -> Result<()> {
    let mut job = ArchiveIngestJob::new(&archive_id);

    if let Some(path) = file {
        let bytes = read_archive(&path).await?;
        if inline {
            job = job.with_bytes(bytes);
        } else {
            let storage = Storage::new(config.storage.clone());
            let upload = storage.upload(&archive_id, bytes).await?;
            info!(
                bucket = storage.bucket(),
                key = %upload.key,
                size = upload.size,
                "Archive uploaded"
            );
        }
    }

    let scheduler = JobScheduler::new(db, config.pipeline.worker_concurrency);
    let run_id = scheduler.enqueue(job).await?;
    println!("{}", run_id);
    Ok(())
}

async fn read_archive(path: &Path) -> Result<Vec<u8>> {
    tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read archive {}", path.display()))
}

fn print_run(run: &PipelineRun) {
    let batch = match (run.current_batch, run.batch_count) {
        (Some(current), Some(count)) => format!("{}/{}", current + 1, count),
        (None, Some(count)) => format!("-/{}", count),
        _ => "-".to_string(),
    };
    println!(
        "{}  {:<18} batch {:<7} {}  {}",
        run.id,
        run.status,
        batch,
        run.archive_id,
        run.custom_status.as_deref().unwrap_or("")
    );
    if let Some(failure) = &run.failure {
        println!("    failure: {}", failure);
    }
}

/// Token cancelled on Ctrl-C or SIGTERM
fn shutdown_token() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        trigger.cancel();
    });
    token
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
