//! Job scheduler
//!
//! Sets up the apalis job queue with PostgreSQL storage and runs each queued
//! archive through the orchestrator, retrying retryable failures with
//! exponential backoff.

use anyhow::Result;
use apalis::prelude::*;
use apalis_postgres::PostgresStorage;
use sqlx::PgPool;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use super::config::{PipelineConfig, MAX_RETRY_BACKOFF_SECS};
use super::framework::PipelineRun;
use super::jobs::ArchiveIngestJob;
use super::orchestrator::{PipelineOrchestrator, RunInput};
use crate::error::PipelineResult;

/// Retry schedule for retryable run failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            initial_backoff: config.retry_backoff(),
            max_backoff: Duration::from_secs(MAX_RETRY_BACKOFF_SECS),
        }
    }

    /// Delay before attempt `attempt + 1`, doubling from the initial backoff
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.initial_backoff
            .saturating_mul(1u32 << exponent)
            .min(self.max_backoff)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&PipelineConfig::default())
    }
}

/// Runs one trigger to completion, retrying retryable failures
pub struct PipelineRunner {
    orchestrator: PipelineOrchestrator,
    retry: RetryPolicy,
    shutdown: CancellationToken,
}

impl PipelineRunner {
    pub fn new(
        orchestrator: PipelineOrchestrator,
        retry: RetryPolicy,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            orchestrator,
            retry,
            shutdown,
        }
    }

    pub fn orchestrator(&self) -> &PipelineOrchestrator {
        &self.orchestrator
    }

    /// Start the run described by `input`
    pub async fn run(&self, input: RunInput) -> PipelineResult<PipelineRun> {
        let run_id = input.run_id;
        self.with_retries(run_id, |_| {
            self.orchestrator.start(input.clone(), self.shutdown.clone())
        })
        .await
    }

    /// Resume an existing run from its history
    pub async fn resume(&self, run_id: Uuid) -> PipelineResult<PipelineRun> {
        self.with_retries(run_id, |_| {
            self.orchestrator.resume(run_id, self.shutdown.clone())
        })
        .await
    }

    #[instrument(skip(self, step), fields(run_id = %run_id))]
    async fn with_retries<F, Fut>(&self, run_id: Uuid, step: F) -> PipelineResult<PipelineRun>
    where
        F: Fn(u32) -> Fut,
        Fut: Future<Output = PipelineResult<PipelineRun>>,
    {
        let mut attempt = 1;
        loop {
            match step(attempt).await {
                Ok(run) => return Ok(run),
                Err(err) if err.is_retryable() && attempt < self.retry.max_attempts => {
                    let delay = self.retry.backoff_for(attempt);
                    warn!(
                        attempt,
                        max_attempts = self.retry.max_attempts,
                        delay_secs = delay.as_secs_f64(),
                        error = %err,
                        "Retrying run"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = self.shutdown.cancelled() => {
                            info!("Shutdown during retry backoff, run left resumable");
                            return Err(err);
                        }
                    }
                    attempt += 1;
                }
                Err(err) if err.is_retryable() => {
                    self.orchestrator.abandon(run_id, &err).await?;
                    return Err(err);
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// Job scheduler
pub struct JobScheduler {
    db: PgPool,
    concurrency: usize,
}

impl JobScheduler {
    pub fn new(db: PgPool, concurrency: usize) -> Self {
        Self {
            db,
            concurrency: concurrency.max(1),
        }
    }

    /// Setup PostgreSQL storage for apalis
    pub async fn storage(&self) -> Result<PostgresStorage<ArchiveIngestJob>> {
        PostgresStorage::setup(&self.db)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to set up job storage: {}", e))?;
        Ok(PostgresStorage::new(&self.db))
    }

    /// Queue a job; returns its run id
    #[instrument(skip(self, job), fields(run_id = %job.run_id, archive_id = %job.archive_id))]
    pub async fn enqueue(&self, job: ArchiveIngestJob) -> Result<Uuid> {
        let run_id = job.run_id;
        let mut storage = self.storage().await?;
        storage
            .push(job)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to enqueue job: {}", e))?;
        info!("Job enqueued");
        Ok(run_id)
    }

    /// Process queued jobs until `shutdown` fires
    pub async fn run(self, runner: Arc<PipelineRunner>, shutdown: CancellationToken) -> Result<()> {
        let storage = self.storage().await?;

        info!(workers = self.concurrency, "Starting job workers");

        let mut monitor = Monitor::new();
        for index in 0..self.concurrency {
            let storage = storage.clone();
            let runner = runner.clone();
            monitor = monitor.register(move |_| {
                WorkerBuilder::new(format!("sheetflow-worker-{}", index))
                    .backend(storage.clone())
                    .data(runner.clone())
                    .build(process_archive_job)
            });
        }

        monitor
            .run_with_signal(async move {
                shutdown.cancelled().await;
                info!("Stopping job workers");
                Ok(())
            })
            .await
            .map_err(|e| anyhow::anyhow!("Job worker error: {}", e))?;

        info!("Job workers stopped");
        Ok(())
    }
}

/// Process an archive ingest job
///
/// Called by the apalis worker. The outcome is recorded on the run row either
/// way; the job fails alongside a failed run.
async fn process_archive_job(job: ArchiveIngestJob, runner: Data<Arc<PipelineRunner>>) -> Result<()> {
    info!(run_id = %job.run_id, archive_id = %job.archive_id, "Processing archive ingest job");

    match runner.run(job.into()).await {
        Ok(run) => {
            info!(run_id = %run.id, status = %run.status, "Job finished");
            Ok(())
        }
        Err(err) => {
            error!(error = %err, "Job failed");
            Err(err.into())
        }
    }
}
