//! Per-batch and per-run outcome records
//!
//! Both are checkpointed as JSON, so a resumed run reports the same numbers
//! as an uninterrupted one.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::loader::LoadResult;

/// Outcome of processing one batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchReport {
    pub ordinal: usize,
    pub entry_name: String,
    /// Records extracted from the worksheet
    pub records: usize,
    pub load: LoadResult,
    /// Mapping entries that matched no header cell in this batch
    #[serde(default)]
    pub unmatched_columns: Vec<String>,
    /// Set when the batch was aborted before loading
    #[serde(default)]
    pub extraction_error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

impl BatchReport {
    pub fn is_aborted(&self) -> bool {
        self.extraction_error.is_some()
    }
}

/// A batch that contributed no records because extraction failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedBatch {
    pub ordinal: usize,
    pub entry_name: String,
    pub reason: String,
}

/// Totals across every batch of a run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub batch_count: usize,
    pub total_records: usize,
    pub total_inserted: usize,
    pub total_rejected: usize,
    pub failed_batches: Vec<FailedBatch>,
}

impl RunSummary {
    pub fn from_reports(reports: &[BatchReport]) -> Self {
        let mut summary = RunSummary {
            batch_count: reports.len(),
            ..Default::default()
        };

        for report in reports {
            summary.total_records += report.records;
            summary.total_inserted += report.load.inserted;
            summary.total_rejected += report.load.rejected.len();

            if let Some(reason) = &report.extraction_error {
                summary.failed_batches.push(FailedBatch {
                    ordinal: report.ordinal,
                    entry_name: report.entry_name.clone(),
                    reason: reason.clone(),
                });
            }
        }

        summary
    }

    pub fn has_failures(&self) -> bool {
        !self.failed_batches.is_empty()
    }

    /// Operator-facing one-liner for a finished run
    pub fn describe(&self) -> String {
        format!(
            "Completed: {} batches, {} records, {} rejected",
            self.batch_count, self.total_records, self.total_rejected
        )
    }

    /// Names the aborted batches, e.g. `#1 b.xlsx (bad header); #3 d.xlsx (...)`
    pub fn failure_detail(&self) -> String {
        self.failed_batches
            .iter()
            .map(|b| format!("#{} {} ({})", b.ordinal, b.entry_name, b.reason))
            .collect::<Vec<_>>()
            .join("; ")
    }
}
