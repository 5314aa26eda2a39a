//! Error types for the ingestion pipeline
//!
//! Every failure a run can hit is one of these variants. The hosting runtime
//! only needs [`PipelineError::is_retryable`] to decide between scheduling a
//! retry and marking the run `Failed`.

use std::time::Duration;

use sheetflow_common::CommonError;
use thiserror::Error;

/// Result alias used throughout the pipeline crate
pub type PipelineResult<T> = Result<T, PipelineError>;

#[derive(Error, Debug)]
pub enum PipelineError {
    /// Startup settings are missing or invalid
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The column mapping document could not be used
    #[error("Failed to load column mapping from {origin}: {reason}")]
    MappingLoad { origin: String, reason: String },

    /// The archive does not exist in object storage
    #[error("Archive not found: {0}")]
    NotFound(String),

    /// Network or storage hiccup that may succeed on retry
    #[error("Transient I/O failure: {0}")]
    TransientIo(String),

    /// The archive container itself is unreadable
    #[error("Invalid archive: {0}")]
    ArchiveFormat(String),

    /// A single batch could not be turned into records
    #[error("Failed to extract records from {entry}{}: {reason}", .row.map(|r| format!(" (row {r})")).unwrap_or_default())]
    Extraction {
        entry: String,
        row: Option<u32>,
        reason: String,
    },

    /// The relational sink cannot be reached at all
    #[error("Sink unavailable: {0}")]
    SinkUnavailable(String),

    #[error("{operation} timed out after {}s", .after.as_secs())]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    /// The checkpoint store could not record or return history
    #[error("Checkpoint store error: {0}")]
    Checkpoint(String),

    /// Replayed history does not match the steps the run is taking now
    #[error("Non-deterministic replay at step {seq}: expected {expected}, history has {found}")]
    NonDeterministicReplay {
        seq: u64,
        expected: String,
        found: String,
    },

    /// One or more batches were aborted; the run cannot be reported as completed
    #[error("{failed} of {total} batches failed: {detail}")]
    BatchesAborted {
        failed: usize,
        total: usize,
        detail: String,
    },

    #[error("Run {0} not found")]
    RunNotFound(uuid::Uuid),

    #[error("Run was cancelled")]
    Cancelled,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl PipelineError {
    /// Whether the hosting runtime should retry the run after this error
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::TransientIo(_) | Self::Timeout { .. } | Self::Checkpoint(_)
        )
    }

    pub fn mapping(origin: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MappingLoad {
            origin: origin.into(),
            reason: reason.into(),
        }
    }

    pub fn extraction(entry: impl Into<String>, row: Option<u32>, reason: impl Into<String>) -> Self {
        Self::Extraction {
            entry: entry.into(),
            row,
            reason: reason.into(),
        }
    }

    pub fn checkpoint(err: impl std::fmt::Display) -> Self {
        Self::Checkpoint(err.to_string())
    }
}

impl From<CommonError> for PipelineError {
    fn from(err: CommonError) -> Self {
        Self::Configuration(err.to_string())
    }
}
