//! Pipeline orchestrator
//!
//! Drives one run through acquire -> split -> batches, with a pacing delay
//! between consecutive batches. Every step goes through the replay context, so
//! a run resumed after a crash or a retryable failure skips straight to the
//! first step that never completed.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use super::archive::{Archive, Batch};
use super::framework::{CheckpointStore, OrchestrationContext, PipelineRun, RunStatus};
use super::models::{BatchReport, RunSummary};
use crate::error::{PipelineError, PipelineResult};

/// How often a running run re-reads its persisted cancel flag.
pub const CANCEL_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// The side-effecting steps of a run
///
/// Each call is executed at most once per successful completion; results are
/// checkpointed by the orchestrator.
#[async_trait]
pub trait PipelineActivities: Send + Sync {
    /// Use `inline` when the trigger carried the bytes, otherwise fetch by id
    async fn acquire_archive(&self, archive_id: &str, inline: Option<&[u8]>) -> PipelineResult<Archive>;

    async fn split_archive(&self, archive: &Archive) -> PipelineResult<Vec<Batch>>;

    /// Extraction failures are reported inside the [`BatchReport`], not as errors
    async fn process_batch(&self, batch: &Batch) -> PipelineResult<BatchReport>;
}

/// What a trigger asks for
#[derive(Debug, Clone)]
pub struct RunInput {
    pub run_id: Uuid,
    pub archive_id: String,
    pub archive_bytes: Option<Vec<u8>>,
}

impl RunInput {
    pub fn new(archive_id: impl Into<String>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            archive_id: archive_id.into(),
            archive_bytes: None,
        }
    }

    pub fn with_bytes(mut self, bytes: Vec<u8>) -> Self {
        self.archive_bytes = Some(bytes);
        self
    }
}

pub struct PipelineOrchestrator {
    store: Arc<dyn CheckpointStore>,
    activities: Arc<dyn PipelineActivities>,
    pacing: Duration,
    cancel_poll_interval: Duration,
}

impl PipelineOrchestrator {
    pub fn new(
        store: Arc<dyn CheckpointStore>,
        activities: Arc<dyn PipelineActivities>,
        pacing: Duration,
    ) -> Self {
        Self {
            store,
            activities,
            pacing,
            cancel_poll_interval: CANCEL_POLL_INTERVAL,
        }
    }

    pub fn with_cancel_poll_interval(mut self, interval: Duration) -> Self {
        self.cancel_poll_interval = interval;
        self
    }

    pub fn store(&self) -> &Arc<dyn CheckpointStore> {
        &self.store
    }

    /// Start a run, or continue it if `input.run_id` is already known
    #[instrument(skip(self, input, cancel), fields(run_id = %input.run_id, archive_id = %input.archive_id))]
    pub async fn start(
        &self,
        input: RunInput,
        cancel: CancellationToken,
    ) -> PipelineResult<PipelineRun> {
        let fresh = PipelineRun::new(input.run_id, &input.archive_id);
        if self.store.create_run(&fresh).await? {
            info!("Created pipeline run");
        } else {
            info!("Run already exists, resuming");
        }

        let run = self
            .store
            .load_run(input.run_id)
            .await?
            .ok_or(PipelineError::RunNotFound(input.run_id))?;

        self.drive(run, input.archive_bytes, cancel).await
    }

    /// Resume an interrupted run from its recorded history
    #[instrument(skip(self, cancel), fields(run_id = %run_id))]
    pub async fn resume(
        &self,
        run_id: Uuid,
        cancel: CancellationToken,
    ) -> PipelineResult<PipelineRun> {
        let run = self
            .store
            .load_run(run_id)
            .await?
            .ok_or(PipelineError::RunNotFound(run_id))?;

        self.drive(run, None, cancel).await
    }

    /// Mark a run `Failed` once the runtime stops retrying it
    #[instrument(skip(self, last_error), fields(run_id = %run_id))]
    pub async fn abandon(
        &self,
        run_id: Uuid,
        last_error: &PipelineError,
    ) -> PipelineResult<PipelineRun> {
        let mut run = self
            .store
            .load_run(run_id)
            .await?
            .ok_or(PipelineError::RunNotFound(run_id))?;

        if run.status.is_terminal() {
            return Ok(run);
        }

        run.status = RunStatus::Failed;
        run.failure = Some(format!("retries exhausted: {}", last_error));
        run.custom_status = Some(format!("Error in orchestration: {}", last_error));
        self.store.save_run(&run).await?;

        error!(attempts = run.attempts, error = %last_error, "Run abandoned after retries");
        Ok(run)
    }

    async fn drive(
        &self,
        mut run: PipelineRun,
        inline: Option<Vec<u8>>,
        cancel: CancellationToken,
    ) -> PipelineResult<PipelineRun> {
        if run.status.is_terminal() {
            info!(status = %run.status, "Run already finished, nothing to do");
            return Ok(run);
        }

        run.attempts += 1;
        self.store.save_run(&run).await?;

        let cancel = cancel.child_token();
        let watcher = self.watch_cancel_request(run.id, cancel.clone());

        let result = async {
            let mut ctx = OrchestrationContext::load(run.id, self.store.clone(), cancel).await?;
            self.execute(&mut ctx, &mut run, inline.as_deref()).await
        }
        .await;

        watcher.abort();

        match result {
            Ok(summary) => {
                run.status = RunStatus::Completed;
                run.current_batch = None;
                run.custom_status = Some(summary.describe());
                run.summary = Some(summary);
                self.store.save_run(&run).await?;
                info!(custom_status = ?run.custom_status, "Run completed");
                Ok(run)
            }
            Err(PipelineError::Cancelled) => {
                run.status = RunStatus::Cancelled;
                if run.custom_status.as_deref().is_none_or(|s| !s.starts_with("Cancelled")) {
                    run.custom_status = Some("Cancelled".to_string());
                }
                self.store.save_run(&run).await?;
                warn!(custom_status = ?run.custom_status, "Run cancelled");
                Ok(run)
            }
            Err(err) if err.is_retryable() => {
                run.custom_status = Some(format!("Error in orchestration: {}", err));
                if let Err(save_err) = self.store.save_run(&run).await {
                    warn!(error = %save_err, "Failed to record retryable failure");
                }
                warn!(error = %err, "Run interrupted by retryable error");
                Err(err)
            }
            Err(err) => {
                run.status = RunStatus::Failed;
                run.failure = Some(err.to_string());
                run.custom_status = Some(format!("Error in orchestration: {}", err));
                if let Err(save_err) = self.store.save_run(&run).await {
                    error!(error = %save_err, "Failed to record run failure");
                }
                error!(error = %err, "Run failed");
                Err(err)
            }
        }
    }

    async fn execute(
        &self,
        ctx: &mut OrchestrationContext,
        run: &mut PipelineRun,
        inline: Option<&[u8]>,
    ) -> PipelineResult<RunSummary> {
        let archive_id = run.archive_id.clone();

        self.update(run, RunStatus::Downloading, format!("Processing archive: {}", archive_id))
            .await?;
        let archive: Archive = ctx
            .call_activity("acquire_archive", || {
                self.activities.acquire_archive(&archive_id, inline)
            })
            .await?;
        info!(bytes = archive.size_bytes, sha256 = %archive.sha256, "Archive acquired");

        self.update(run, RunStatus::Splitting, format!("Splitting archive: {}", archive_id))
            .await?;
        let batches: Vec<Batch> = ctx
            .call_activity("split_archive", || self.activities.split_archive(&archive))
            .await?;
        drop(archive);

        let total = batches.len();
        run.batch_count = Some(total);
        info!(batches = total, "Archive split");

        let mut reports = Vec::with_capacity(total);

        for (i, batch) in batches.iter().enumerate() {
            if let Err(err) = self.wait_for_turn(ctx, run, i).await {
                if matches!(err, PipelineError::Cancelled) {
                    run.custom_status = Some(format!("Cancelled before batch {}", i));
                }
                return Err(err);
            }

            run.current_batch = Some(i);
            self.update(
                run,
                RunStatus::ProcessingBatches,
                format!("Processing batch {}/{}: {}", i + 1, total, batch.entry_name),
            )
            .await?;

            let report: BatchReport = ctx
                .call_activity(&format!("process_batch:{}", i), || {
                    self.activities.process_batch(batch)
                })
                .await?;

            match &report.extraction_error {
                Some(reason) => {
                    warn!(batch = i, entry = %batch.entry_name, %reason, "Batch aborted")
                }
                None => info!(
                    batch = i,
                    entry = %batch.entry_name,
                    records = report.records,
                    inserted = report.load.inserted,
                    rejected = report.load.rejected.len(),
                    "Batch processed"
                ),
            }

            reports.push(report);
        }

        let summary = RunSummary::from_reports(&reports);
        run.summary = Some(summary.clone());

        if summary.has_failures() {
            return Err(PipelineError::BatchesAborted {
                failed: summary.failed_batches.len(),
                total,
                detail: summary.failure_detail(),
            });
        }

        Ok(summary)
    }

    /// Pacing delay before every batch but the first, then the cancel check
    async fn wait_for_turn(
        &self,
        ctx: &mut OrchestrationContext,
        run: &mut PipelineRun,
        ordinal: usize,
    ) -> PipelineResult<()> {
        if ordinal > 0 {
            if !ctx.is_replaying() {
                debug!(batch = ordinal, pacing_secs = self.pacing.as_secs(), "Pacing before next batch");
            }
            match ctx.create_timer(self.pacing).await {
                Ok(()) | Err(PipelineError::Cancelled) => {}
                Err(err) => return Err(err),
            }
        }

        let requested = self.cancel_requested(run.id).await?;
        if requested {
            run.cancel_requested = true;
        }
        if requested || ctx.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }

        Ok(())
    }

    async fn cancel_requested(&self, run_id: Uuid) -> PipelineResult<bool> {
        Ok(self
            .store
            .load_run(run_id)
            .await?
            .is_some_and(|run| run.cancel_requested))
    }

    async fn update(
        &self,
        run: &mut PipelineRun,
        status: RunStatus,
        custom_status: String,
    ) -> PipelineResult<()> {
        debug!(%status, %custom_status, "Run status");
        run.status = status;
        run.custom_status = Some(custom_status);
        self.store.save_run(run).await
    }

    /// Cancel `token` as soon as the run's persisted cancel flag is set
    fn watch_cancel_request(
        &self,
        run_id: Uuid,
        token: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let store = self.store.clone();
        let interval = self.cancel_poll_interval;

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }

                match store.load_run(run_id).await {
                    Ok(Some(run)) if run.cancel_requested => {
                        info!(%run_id, "Cancel requested for run");
                        token.cancel();
                        break;
                    }
                    Ok(_) => {}
                    Err(err) => debug!(%run_id, error = %err, "Cancel poll failed"),
                }
            }
        })
    }
}
