//! Ingestion configuration
//!
//! Settings for a pipeline run, read from `PIPELINE_*` environment variables.

use serde::{Deserialize, Serialize};
use sheetflow_common::env;
use std::path::PathBuf;
use std::time::Duration;

use super::extract::BlankRowPolicy;
use super::loader::LoadMode;
use crate::error::{PipelineError, PipelineResult};

/// Default location of the column mapping document.
pub const DEFAULT_MAPPING_PATH: &str = "columnMappings.json";

/// Default archive entry suffix that marks a batch.
pub const DEFAULT_FILE_SUFFIX: &str = ".xlsx";

/// Default pause between consecutive batches (1 minute).
pub const DEFAULT_PACING_SECS: u64 = 60;

/// Default bound on a single archive download.
pub const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 120;

/// Default bound on loading one batch into the sink.
pub const DEFAULT_LOAD_TIMEOUT_SECS: u64 = 300;

/// Default number of attempts before a run is abandoned.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default initial retry backoff; doubles per attempt.
pub const DEFAULT_RETRY_BACKOFF_SECS: u64 = 5;

/// Upper bound on the retry backoff (5 minutes).
pub const MAX_RETRY_BACKOFF_SECS: u64 = 300;

/// Default number of concurrent queue workers.
pub const DEFAULT_WORKER_CONCURRENCY: usize = 2;

/// Pipeline run configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Path to the column mapping JSON document
    pub mapping_path: PathBuf,
    /// Archive entries whose names end with this suffix become batches
    pub file_suffix: String,
    /// Delay between completing one batch and starting the next
    pub pacing_secs: u64,
    pub load_mode: LoadMode,
    pub blank_rows: BlankRowPolicy,
    pub fetch_timeout_secs: u64,
    pub load_timeout_secs: u64,
    /// Attempts per run, counting the first one
    pub max_attempts: u32,
    pub retry_backoff_secs: u64,
    pub worker_concurrency: usize,
}

impl PipelineConfig {
    /// Load pipeline configuration from environment variables
    pub fn from_env() -> PipelineResult<Self> {
        let config = Self {
            mapping_path: PathBuf::from(env::var_or("PIPELINE_MAPPING_PATH", DEFAULT_MAPPING_PATH)),
            file_suffix: env::var_or("PIPELINE_FILE_SUFFIX", DEFAULT_FILE_SUFFIX),
            pacing_secs: env::parse_or("PIPELINE_PACING_SECS", DEFAULT_PACING_SECS)?,
            load_mode: env::parse_or("PIPELINE_LOAD_MODE", LoadMode::default())?,
            blank_rows: env::parse_or("PIPELINE_BLANK_ROWS", BlankRowPolicy::default())?,
            fetch_timeout_secs: env::parse_or(
                "PIPELINE_FETCH_TIMEOUT_SECS",
                DEFAULT_FETCH_TIMEOUT_SECS,
            )?,
            load_timeout_secs: env::parse_or("PIPELINE_LOAD_TIMEOUT_SECS", DEFAULT_LOAD_TIMEOUT_SECS)?,
            max_attempts: env::parse_or("PIPELINE_MAX_ATTEMPTS", DEFAULT_MAX_ATTEMPTS)?,
            retry_backoff_secs: env::parse_or(
                "PIPELINE_RETRY_BACKOFF_SECS",
                DEFAULT_RETRY_BACKOFF_SECS,
            )?,
            worker_concurrency: env::parse_or(
                "PIPELINE_WORKER_CONCURRENCY",
                DEFAULT_WORKER_CONCURRENCY,
            )?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    ///
    /// Pacing may be zero; timeouts, attempts and concurrency may not.
    pub fn validate(&self) -> PipelineResult<()> {
        if self.file_suffix.is_empty() {
            return Err(PipelineError::Configuration(
                "PIPELINE_FILE_SUFFIX cannot be empty".to_string(),
            ));
        }
        if self.fetch_timeout_secs == 0 {
            return Err(PipelineError::Configuration(
                "PIPELINE_FETCH_TIMEOUT_SECS must be greater than 0".to_string(),
            ));
        }
        if self.load_timeout_secs == 0 {
            return Err(PipelineError::Configuration(
                "PIPELINE_LOAD_TIMEOUT_SECS must be greater than 0".to_string(),
            ));
        }
        if self.max_attempts == 0 {
            return Err(PipelineError::Configuration(
                "PIPELINE_MAX_ATTEMPTS must be greater than 0".to_string(),
            ));
        }
        if self.worker_concurrency == 0 {
            return Err(PipelineError::Configuration(
                "PIPELINE_WORKER_CONCURRENCY must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn pacing(&self) -> Duration {
        Duration::from_secs(self.pacing_secs)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn load_timeout(&self) -> Duration {
        Duration::from_secs(self.load_timeout_secs)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_secs(self.retry_backoff_secs)
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            mapping_path: PathBuf::from(DEFAULT_MAPPING_PATH),
            file_suffix: DEFAULT_FILE_SUFFIX.to_string(),
            pacing_secs: DEFAULT_PACING_SECS,
            load_mode: LoadMode::default(),
            blank_rows: BlankRowPolicy::default(),
            fetch_timeout_secs: DEFAULT_FETCH_TIMEOUT_SECS,
            load_timeout_secs: DEFAULT_LOAD_TIMEOUT_SECS,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_backoff_secs: DEFAULT_RETRY_BACKOFF_SECS,
            worker_concurrency: DEFAULT_WORKER_CONCURRENCY,
        }
    }
}
