//! Archive payloads and batch splitting

use serde::{Deserialize, Serialize};
use std::io::{Cursor, Read};
use tracing::debug;

use super::framework::types::base64_bytes;
use crate::error::{PipelineError, PipelineResult};
use crate::storage::calculate_sha256;

/// Archive bytes as acquired for a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Archive {
    pub archive_id: String,
    pub size_bytes: u64,
    pub sha256: String,
    #[serde(with = "base64_bytes")]
    pub content: Vec<u8>,
}

impl Archive {
    pub fn new(archive_id: impl Into<String>, content: Vec<u8>) -> Self {
        Self {
            archive_id: archive_id.into(),
            size_bytes: content.len() as u64,
            sha256: calculate_sha256(&content),
            content,
        }
    }
}

/// One spreadsheet file taken out of an archive
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Batch {
    /// Position among the selected entries, starting at 0
    pub ordinal: usize,
    pub entry_name: String,
    #[serde(with = "base64_bytes")]
    pub content: Vec<u8>,
}

/// Splits a ZIP archive into batches, one per matching entry
#[derive(Debug, Clone)]
pub struct ArchiveSplitter {
    suffix: String,
}

impl ArchiveSplitter {
    /// Entries whose names end with `suffix` (case-insensitive) become batches
    pub fn new(suffix: impl Into<String>) -> Self {
        Self {
            suffix: suffix.into().to_lowercase(),
        }
    }

    pub fn matches(&self, entry_name: &str) -> bool {
        entry_name.to_lowercase().ends_with(&self.suffix)
    }

    /// Batches in archive directory order; directories and other entries are skipped
    pub fn split(&self, archive: &[u8]) -> PipelineResult<Vec<Batch>> {
        let mut zip = zip::ZipArchive::new(Cursor::new(archive))
            .map_err(|e| PipelineError::ArchiveFormat(format!("not a readable zip archive: {}", e)))?;

        let mut batches = Vec::new();

        for i in 0..zip.len() {
            let mut file = zip.by_index(i).map_err(|e| {
                PipelineError::ArchiveFormat(format!("failed to read zip entry at index {}: {}", i, e))
            })?;

            if file.is_dir() {
                continue;
            }

            let name = file.name().to_string();
            if !self.matches(&name) {
                debug!(entry = %name, "Skipping archive entry");
                continue;
            }

            let mut content = Vec::new();
            file.read_to_end(&mut content).map_err(|e| {
                PipelineError::ArchiveFormat(format!("failed to read zip entry {}: {}", name, e))
            })?;

            debug!(entry = %name, ordinal = batches.len(), bytes = content.len(), "Extracted batch");

            batches.push(Batch {
                ordinal: batches.len(),
                entry_name: name,
                content,
            });
        }

        Ok(batches)
    }
}
