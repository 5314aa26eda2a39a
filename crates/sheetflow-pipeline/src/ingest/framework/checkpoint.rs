//! Durable run state and history
//!
//! A run's record and its append-only history are everything needed to
//! resume it in a fresh process.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::types::{HistoryEvent, PipelineRun};
use crate::error::{PipelineError, PipelineResult};

#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Persist a new run. Returns `false` if a run with that id already exists.
    async fn create_run(&self, run: &PipelineRun) -> PipelineResult<bool>;

    async fn load_run(&self, run_id: Uuid) -> PipelineResult<Option<PipelineRun>>;

    /// Overwrite the run's mutable fields. Never clears a pending cancel request.
    async fn save_run(&self, run: &PipelineRun) -> PipelineResult<()>;

    /// History in append order
    async fn load_history(&self, run_id: Uuid) -> PipelineResult<Vec<HistoryEvent>>;

    /// Append one event. Recording the same `(seq, kind)` twice is an error.
    async fn append_event(&self, run_id: Uuid, event: &HistoryEvent) -> PipelineResult<()>;

    /// Flag the run for cancellation. Returns `false` if the run is unknown
    /// or already terminal.
    async fn request_cancel(&self, run_id: Uuid) -> PipelineResult<bool>;

    /// Most recently created runs first
    async fn list_runs(&self, limit: usize) -> PipelineResult<Vec<PipelineRun>>;
}

/// In-process store for tests and one-off local runs
#[derive(Default)]
pub struct MemoryCheckpointStore {
    runs: RwLock<HashMap<Uuid, PipelineRun>>,
    history: RwLock<HashMap<Uuid, Vec<HistoryEvent>>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn create_run(&self, run: &PipelineRun) -> PipelineResult<bool> {
        let mut runs = self.runs.write().await;
        if runs.contains_key(&run.id) {
            return Ok(false);
        }
        runs.insert(run.id, run.clone());
        Ok(true)
    }

    async fn load_run(&self, run_id: Uuid) -> PipelineResult<Option<PipelineRun>> {
        Ok(self.runs.read().await.get(&run_id).cloned())
    }

    async fn save_run(&self, run: &PipelineRun) -> PipelineResult<()> {
        let mut runs = self.runs.write().await;
        let stored = runs
            .get_mut(&run.id)
            .ok_or(PipelineError::RunNotFound(run.id))?;

        let cancel_requested = stored.cancel_requested || run.cancel_requested;
        *stored = run.clone();
        stored.cancel_requested = cancel_requested;
        stored.updated_at = Utc::now();
        Ok(())
    }

    async fn load_history(&self, run_id: Uuid) -> PipelineResult<Vec<HistoryEvent>> {
        Ok(self
            .history
            .read()
            .await
            .get(&run_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn append_event(&self, run_id: Uuid, event: &HistoryEvent) -> PipelineResult<()> {
        let mut history = self.history.write().await;
        let events = history.entry(run_id).or_default();

        if events
            .iter()
            .any(|e| e.seq() == event.seq() && e.kind() == event.kind())
        {
            return Err(PipelineError::Checkpoint(format!(
                "duplicate {} event at seq {} for run {}",
                event.kind(),
                event.seq(),
                run_id
            )));
        }

        events.push(event.clone());
        Ok(())
    }

    async fn request_cancel(&self, run_id: Uuid) -> PipelineResult<bool> {
        match self.runs.write().await.get_mut(&run_id) {
            Some(run) if !run.status.is_terminal() => {
                run.cancel_requested = true;
                run.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list_runs(&self, limit: usize) -> PipelineResult<Vec<PipelineRun>> {
        let mut runs: Vec<PipelineRun> = self.runs.read().await.values().cloned().collect();
        runs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        runs.truncate(limit);
        Ok(runs)
    }
}
