//! Durable run framework
//!
//! Run records and append-only step history, plus the replay context the
//! orchestrator executes inside. State lives in PostgreSQL in production and
//! in memory for tests.

pub mod checkpoint;
pub mod context;
pub mod pg_store;
pub mod types;

// Re-export commonly used types
pub use checkpoint::{CheckpointStore, MemoryCheckpointStore};
pub use context::OrchestrationContext;
pub use pg_store::PgCheckpointStore;
pub use types::{HistoryEvent, PipelineRun, RunStatus};
