//! Production implementations of the pipeline steps

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};

use super::archive::{Archive, ArchiveSplitter, Batch};
use super::config::PipelineConfig;
use super::extract::{RecordExtractor, SheetTable};
use super::loader::{LoadResult, SinkLoader};
use super::mapping::ColumnMapping;
use super::models::BatchReport;
use super::orchestrator::PipelineActivities;
use crate::error::{PipelineError, PipelineResult};
use crate::storage::ArchiveSource;

pub struct IngestActivities {
    source: Arc<dyn ArchiveSource>,
    splitter: ArchiveSplitter,
    mapping: Arc<ColumnMapping>,
    extractor: RecordExtractor,
    loader: SinkLoader,
    fetch_timeout: Duration,
    load_timeout: Duration,
}

impl IngestActivities {
    pub fn new(
        config: &PipelineConfig,
        source: Arc<dyn ArchiveSource>,
        mapping: Arc<ColumnMapping>,
        loader: SinkLoader,
    ) -> Self {
        Self {
            source,
            splitter: ArchiveSplitter::new(&config.file_suffix),
            mapping,
            extractor: RecordExtractor::new(config.blank_rows),
            loader,
            fetch_timeout: config.fetch_timeout(),
            load_timeout: config.load_timeout(),
        }
    }
}

#[async_trait]
impl PipelineActivities for IngestActivities {
    #[instrument(skip(self, inline))]
    async fn acquire_archive(&self, archive_id: &str, inline: Option<&[u8]>) -> PipelineResult<Archive> {
        if let Some(bytes) = inline {
            info!(bytes = bytes.len(), "Using archive bytes supplied by the trigger");
            return Ok(Archive::new(archive_id, bytes.to_vec()));
        }

        let content = tokio::time::timeout(self.fetch_timeout, self.source.fetch(archive_id))
            .await
            .map_err(|_| PipelineError::Timeout {
                operation: "archive fetch",
                after: self.fetch_timeout,
            })??;

        Ok(Archive::new(archive_id, content))
    }

    #[instrument(skip_all, fields(archive_id = %archive.archive_id, bytes = archive.size_bytes))]
    async fn split_archive(&self, archive: &Archive) -> PipelineResult<Vec<Batch>> {
        self.splitter.split(&archive.content)
    }

    #[instrument(skip_all, fields(batch = batch.ordinal, entry = %batch.entry_name))]
    async fn process_batch(&self, batch: &Batch) -> PipelineResult<BatchReport> {
        let started_at = Utc::now();

        let table = match SheetTable::open(batch) {
            Ok(table) => table,
            Err(err @ PipelineError::Extraction { .. }) => {
                warn!(error = %err, "Batch could not be read");
                return Ok(BatchReport {
                    ordinal: batch.ordinal,
                    entry_name: batch.entry_name.clone(),
                    records: 0,
                    load: LoadResult::default(),
                    unmatched_columns: Vec::new(),
                    extraction_error: Some(err.to_string()),
                    started_at,
                    completed_at: Utc::now(),
                });
            }
            Err(err) => return Err(err),
        };

        let index = self.mapping.resolve(table.header());
        if !index.unmatched().is_empty() {
            warn!(unmatched = ?index.unmatched(), "Mapped columns missing from header");
        }

        let records = self.extractor.extract_table(&table, &index);

        let load = tokio::time::timeout(self.load_timeout, self.loader.load(&records))
            .await
            .map_err(|_| PipelineError::Timeout {
                operation: "batch load",
                after: self.load_timeout,
            })??;

        Ok(BatchReport {
            ordinal: batch.ordinal,
            entry_name: batch.entry_name.clone(),
            records: records.len(),
            load,
            unmatched_columns: index.unmatched().to_vec(),
            extraction_error: None,
            started_at,
            completed_at: Utc::now(),
        })
    }
}
