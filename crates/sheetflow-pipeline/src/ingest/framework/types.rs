//! Core types for the durable run framework

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

use crate::ingest::models::RunSummary;

/// Pipeline run status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Downloading,
    Splitting,
    ProcessingBatches,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn as_str(&self) -> &str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Downloading => "downloading",
            RunStatus::Splitting => "splitting",
            RunStatus::ProcessingBatches => "processing_batches",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
        }
    }

    /// Terminal runs are never executed again
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Failed | RunStatus::Cancelled
        )
    }
}

impl FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RunStatus::Pending),
            "downloading" => Ok(RunStatus::Downloading),
            "splitting" => Ok(RunStatus::Splitting),
            "processing_batches" => Ok(RunStatus::ProcessingBatches),
            "completed" => Ok(RunStatus::Completed),
            "failed" => Ok(RunStatus::Failed),
            "cancelled" => Ok(RunStatus::Cancelled),
            other => Err(format!("unknown run status '{}'", other)),
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

/// One execution of the pipeline against one archive (maps to pipeline_runs table)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineRun {
    pub id: Uuid,
    pub archive_id: String,
    pub status: RunStatus,
    /// Ordinal of the batch being processed while in `ProcessingBatches`
    pub current_batch: Option<usize>,
    pub batch_count: Option<usize>,
    /// Advisory progress text for operators
    pub custom_status: Option<String>,
    pub summary: Option<RunSummary>,
    pub failure: Option<String>,
    pub cancel_requested: bool,
    /// Number of times the run has been started or resumed
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PipelineRun {
    pub fn new(id: Uuid, archive_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            archive_id: archive_id.into(),
            status: RunStatus::Pending,
            current_batch: None,
            batch_count: None,
            custom_status: None,
            summary: None,
            failure: None,
            cancel_requested: false,
            attempts: 0,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Append-only history entry (maps to pipeline_history table)
///
/// Only completions are recorded. A step that failed leaves no trace, so the
/// next attempt re-executes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum HistoryEvent {
    ActivityCompleted {
        seq: u64,
        name: String,
        output: serde_json::Value,
        completed_at: DateTime<Utc>,
    },
    TimerScheduled {
        seq: u64,
        fire_at: DateTime<Utc>,
    },
    TimerFired {
        seq: u64,
        fired_at: DateTime<Utc>,
    },
}

impl HistoryEvent {
    pub fn seq(&self) -> u64 {
        match self {
            HistoryEvent::ActivityCompleted { seq, .. }
            | HistoryEvent::TimerScheduled { seq, .. }
            | HistoryEvent::TimerFired { seq, .. } => *seq,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            HistoryEvent::ActivityCompleted { .. } => "activity_completed",
            HistoryEvent::TimerScheduled { .. } => "timer_scheduled",
            HistoryEvent::TimerFired { .. } => "timer_fired",
        }
    }
}

/// Serde adapter storing byte payloads as base64 text
pub mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }

    pub mod option {
        use super::STANDARD;
        use base64::Engine as _;
        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(
            bytes: &Option<Vec<u8>>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match bytes {
                Some(bytes) => serializer.serialize_some(&STANDARD.encode(bytes)),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<Vec<u8>>, D::Error> {
            Option::<String>::deserialize(deserializer)?
                .map(|encoded| STANDARD.decode(encoded.as_bytes()))
                .transpose()
                .map_err(serde::de::Error::custom)
        }
    }
}
