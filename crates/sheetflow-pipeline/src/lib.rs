//! Sheetflow pipeline library
//!
//! Durable batch ingestion of spreadsheet archives.
//!
//! # Overview
//!
//! A run takes one ZIP archive from object storage, splits it into `.xlsx`
//! batches, maps each worksheet's columns onto a destination table through a
//! JSON mapping document and inserts the rows into a PostgreSQL sink. Batches
//! are processed one at a time with a pacing delay in between.
//!
//! Every completed step is checkpointed. A run interrupted by a crash or a
//! retryable failure resumes from its recorded history without repeating
//! completed steps.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use sheetflow_pipeline::{
//!     framework::MemoryCheckpointStore, ColumnMapping, IngestActivities, LoadMode,
//!     PgSink, PipelineOrchestrator, RunInput, SinkLoader,
//!     config::Config, storage::Storage,
//! };
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load()?;
//!     let mapping = Arc::new(ColumnMapping::from_path(&config.pipeline.mapping_path)?);
//!     let sink = Arc::new(PgSink::connect_lazy(&config.sink)?);
//!     let loader = SinkLoader::new(sink, config.sink.table.clone(), LoadMode::PerRecord);
//!     let source = Arc::new(Storage::new(config.storage.clone()));
//!     let activities = IngestActivities::new(&config.pipeline, source, mapping, loader);
//!
//!     let orchestrator = PipelineOrchestrator::new(
//!         Arc::new(MemoryCheckpointStore::new()),
//!         Arc::new(activities),
//!         config.pipeline.pacing(),
//!     );
//!     let run = orchestrator
//!         .start(RunInput::new("2024/march.zip"), CancellationToken::new())
//!         .await?;
//!     println!("{}: {:?}", run.status, run.custom_status);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod ingest;
pub mod storage;

pub use ingest::framework;

// Re-export commonly used types
pub use error::{PipelineError, PipelineResult};
pub use ingest::{
    ArchiveIngestJob, ColumnMapping, IngestActivities, JobScheduler, LoadMode, PgSink,
    PipelineActivities, PipelineConfig, PipelineOrchestrator, PipelineRunner, RetryPolicy,
    RunInput, RunSummary, SinkLoader,
};
