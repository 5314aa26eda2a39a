//! Archive ingestion pipeline
//!
//! # Architecture
//!
//! - **archive**: Archive snapshot and splitting into spreadsheet batches
//! - **mapping**: Column mapping document and per-batch header resolution
//! - **extract**: Worksheet reading and record extraction
//! - **sink** / **loader**: Parameterized inserts into the destination table
//! - **framework**: Run records, step history and the replay context
//! - **orchestrator**: The acquire -> split -> paced batches workflow
//! - **activities**: Production implementations of the workflow steps
//! - **jobs** / **scheduler**: apalis queue payload, workers and retries

pub mod activities;
pub mod archive;
pub mod config;
pub mod extract;
pub mod framework;
pub mod jobs;
pub mod loader;
pub mod mapping;
pub mod models;
pub mod orchestrator;
pub mod records;
pub mod scheduler;
pub mod sink;

#[cfg(test)]
pub(crate) mod fixtures;

pub use activities::IngestActivities;
pub use archive::{Archive, ArchiveSplitter, Batch};
pub use config::PipelineConfig;
pub use extract::{BlankRowPolicy, RecordExtractor, SheetTable};
pub use jobs::ArchiveIngestJob;
pub use loader::{LoadMode, LoadResult, SinkLoader};
pub use mapping::{ColumnMapping, ColumnMappingEntry, ResolvedColumnIndex};
pub use models::{BatchReport, RunSummary};
pub use orchestrator::{PipelineActivities, PipelineOrchestrator, RunInput};
pub use records::{CellValue, Record};
pub use scheduler::{JobScheduler, PipelineRunner, RetryPolicy};
pub use sink::{PgSink, RecordSink};
