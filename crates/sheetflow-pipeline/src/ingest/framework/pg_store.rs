//! PostgreSQL-backed checkpoint store
//!
//! Tables are created by `migrations/20260301000001_pipeline_runs.sql`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

use super::checkpoint::CheckpointStore;
use super::types::{HistoryEvent, PipelineRun, RunStatus};
use crate::error::{PipelineError, PipelineResult};
use crate::ingest::models::RunSummary;

#[derive(Clone)]
pub struct PgCheckpointStore {
    pool: Arc<PgPool>,
}

impl PgCheckpointStore {
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }
}

#[derive(FromRow)]
struct RunRow {
    id: Uuid,
    archive_id: String,
    status: String,
    current_batch: Option<i32>,
    batch_count: Option<i32>,
    custom_status: Option<String>,
    summary: Option<serde_json::Value>,
    failure: Option<String>,
    cancel_requested: bool,
    attempts: i32,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<RunRow> for PipelineRun {
    type Error = PipelineError;

    fn try_from(row: RunRow) -> Result<Self, Self::Error> {
        let status: RunStatus = row.status.parse().map_err(PipelineError::Checkpoint)?;
        let summary: Option<RunSummary> = row.summary.map(serde_json::from_value).transpose()?;

        Ok(PipelineRun {
            id: row.id,
            archive_id: row.archive_id,
            status,
            current_batch: row.current_batch.map(|v| v as usize),
            batch_count: row.batch_count.map(|v| v as usize),
            custom_status: row.custom_status,
            summary,
            failure: row.failure,
            cancel_requested: row.cancel_requested,
            attempts: row.attempts as u32,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

const RUN_COLUMNS: &str = "id, archive_id, status, current_batch, batch_count, custom_status, \
     summary, failure, cancel_requested, attempts, created_at, updated_at";

#[async_trait]
impl CheckpointStore for PgCheckpointStore {
    #[instrument(skip(self, run), fields(run_id = %run.id))]
    async fn create_run(&self, run: &PipelineRun) -> PipelineResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO pipeline_runs (id, archive_id, status, attempts, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $5)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(run.id)
        .bind(&run.archive_id)
        .bind(run.status.as_str())
        .bind(run.attempts as i32)
        .bind(run.created_at)
        .execute(&*self.pool)
        .await
        .map_err(PipelineError::checkpoint)?;

        Ok(result.rows_affected() == 1)
    }

    async fn load_run(&self, run_id: Uuid) -> PipelineResult<Option<PipelineRun>> {
        let row: Option<RunRow> = sqlx::query_as(&format!(
            "SELECT {} FROM pipeline_runs WHERE id = $1",
            RUN_COLUMNS
        ))
        .bind(run_id)
        .fetch_optional(&*self.pool)
        .await
        .map_err(PipelineError::checkpoint)?;

        row.map(PipelineRun::try_from).transpose()
    }

    #[instrument(skip(self, run), fields(run_id = %run.id, status = %run.status))]
    async fn save_run(&self, run: &PipelineRun) -> PipelineResult<()> {
        let summary = run.summary.as_ref().map(serde_json::to_value).transpose()?;

        let result = sqlx::query(
            r#"
            UPDATE pipeline_runs
            SET status = $2,
                current_batch = $3,
                batch_count = $4,
                custom_status = $5,
                summary = $6,
                failure = $7,
                cancel_requested = cancel_requested OR $8,
                attempts = $9,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(run.id)
        .bind(run.status.as_str())
        .bind(run.current_batch.map(|v| v as i32))
        .bind(run.batch_count.map(|v| v as i32))
        .bind(run.custom_status.as_deref())
        .bind(summary)
        .bind(run.failure.as_deref())
        .bind(run.cancel_requested)
        .bind(run.attempts as i32)
        .execute(&*self.pool)
        .await
        .map_err(PipelineError::checkpoint)?;

        if result.rows_affected() == 0 {
            return Err(PipelineError::RunNotFound(run.id));
        }

        Ok(())
    }

    async fn load_history(&self, run_id: Uuid) -> PipelineResult<Vec<HistoryEvent>> {
        let rows: Vec<(serde_json::Value,)> = sqlx::query_as(
            r#"
            SELECT event
            FROM pipeline_history
            WHERE run_id = $1
            ORDER BY id
            "#,
        )
        .bind(run_id)
        .fetch_all(&*self.pool)
        .await
        .map_err(PipelineError::checkpoint)?;

        rows.into_iter()
            .map(|(event,)| serde_json::from_value(event).map_err(PipelineError::from))
            .collect()
    }

    #[instrument(skip(self, event), fields(seq = event.seq(), kind = event.kind()))]
    async fn append_event(&self, run_id: Uuid, event: &HistoryEvent) -> PipelineResult<()> {
        let payload = serde_json::to_value(event)?;

        sqlx::query(
            r#"
            INSERT INTO pipeline_history (run_id, seq, kind, event)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(run_id)
        .bind(event.seq() as i64)
        .bind(event.kind())
        .bind(payload)
        .execute(&*self.pool)
        .await
        .map_err(PipelineError::checkpoint)?;

        Ok(())
    }

    async fn request_cancel(&self, run_id: Uuid) -> PipelineResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE pipeline_runs
            SET cancel_requested = TRUE, updated_at = NOW()
            WHERE id = $1
              AND status NOT IN ('completed', 'failed', 'cancelled')
            "#,
        )
        .bind(run_id)
        .execute(&*self.pool)
        .await
        .map_err(PipelineError::checkpoint)?;

        Ok(result.rows_affected() == 1)
    }

    async fn list_runs(&self, limit: usize) -> PipelineResult<Vec<PipelineRun>> {
        let rows: Vec<RunRow> = sqlx::query_as(&format!(
            "SELECT {} FROM pipeline_runs ORDER BY created_at DESC LIMIT $1",
            RUN_COLUMNS
        ))
        .bind(limit as i64)
        .fetch_all(&*self.pool)
        .await
        .map_err(PipelineError::checkpoint)?;

        rows.into_iter().map(PipelineRun::try_from).collect()
    }
}
