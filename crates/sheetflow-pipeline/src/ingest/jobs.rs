//! Job definitions for archive ingestion
//!
//! Defines the payload pushed onto the apalis job queue by `sheetflow enqueue`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::framework::types::base64_bytes;
use super::orchestrator::RunInput;

/// Archive ingestion job payload
///
/// The run id is fixed when the job is created, so a redelivered job resumes
/// the same run instead of starting a second one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveIngestJob {
    pub run_id: Uuid,
    /// Object key of the archive in the configured bucket
    pub archive_id: String,
    /// Archive content carried by the trigger itself; skips the storage fetch
    #[serde(default, with = "base64_bytes::option", skip_serializing_if = "Option::is_none")]
    pub archive_bytes: Option<Vec<u8>>,
    pub enqueued_at: DateTime<Utc>,
}

impl ArchiveIngestJob {
    pub fn new(archive_id: impl Into<String>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            archive_id: archive_id.into(),
            archive_bytes: None,
            enqueued_at: Utc::now(),
        }
    }

    pub fn with_bytes(mut self, bytes: Vec<u8>) -> Self {
        self.archive_bytes = Some(bytes);
        self
    }
}

impl From<ArchiveIngestJob> for RunInput {
    fn from(job: ArchiveIngestJob) -> Self {
        RunInput {
            run_id: job.run_id,
            archive_id: job.archive_id,
            archive_bytes: job.archive_bytes,
        }
    }
}
