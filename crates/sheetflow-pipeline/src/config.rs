//! Configuration management

use serde::{Deserialize, Serialize};
use sheetflow_common::env;

use crate::error::{PipelineError, PipelineResult};
use crate::ingest::config::PipelineConfig;
use crate::storage::config::StorageConfig;

// ============================================================================
// Database Configuration Constants
// ============================================================================

/// Default checkpoint/queue database URL for local development.
pub const DEFAULT_DATABASE_URL: &str = "postgresql://localhost/sheetflow";

/// Default maximum database connections in the pool.
pub const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 10;

/// Default minimum database connections in the pool.
pub const DEFAULT_DATABASE_MIN_CONNECTIONS: u32 = 2;

/// Default database connection timeout in seconds.
pub const DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default database idle timeout in seconds (10 minutes).
pub const DEFAULT_DATABASE_IDLE_TIMEOUT_SECS: u64 = 600;

// ============================================================================
// Sink Configuration Constants
// ============================================================================

/// Default destination table.
pub const DEFAULT_SINK_TABLE: &str = "employee";

/// Default maximum sink connections in the pool.
pub const DEFAULT_SINK_MAX_CONNECTIONS: u32 = 5;

/// Process configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub sink: SinkConfig,
    pub pipeline: PipelineConfig,
    pub storage: StorageConfig,
}

/// Database holding run state, history and the job queue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout_secs: u64,
    pub idle_timeout_secs: u64,
}

/// Relational database receiving the mapped records
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SinkConfig {
    pub url: String,
    /// Destination table, optionally schema-qualified
    pub table: String,
    pub max_connections: u32,
}

impl Config {
    /// Load configuration from environment and defaults
    pub fn load() -> PipelineResult<Self> {
        dotenvy::dotenv().ok();

        let config = Config {
            database: DatabaseConfig::from_env()?,
            sink: SinkConfig::from_env()?,
            pipeline: PipelineConfig::from_env()?,
            storage: StorageConfig::from_env()?,
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> PipelineResult<()> {
        self.database.validate()?;
        self.sink.validate()?;
        self.pipeline.validate()?;

        if self.storage.bucket.is_empty() {
            return Err(PipelineError::Configuration(
                "S3_BUCKET cannot be empty".to_string(),
            ));
        }

        Ok(())
    }
}

impl DatabaseConfig {
    pub fn from_env() -> PipelineResult<Self> {
        Ok(Self {
            url: env::var_or("DATABASE_URL", DEFAULT_DATABASE_URL),
            max_connections: env::parse_or(
                "DATABASE_MAX_CONNECTIONS",
                DEFAULT_DATABASE_MAX_CONNECTIONS,
            )?,
            min_connections: env::parse_or(
                "DATABASE_MIN_CONNECTIONS",
                DEFAULT_DATABASE_MIN_CONNECTIONS,
            )?,
            connect_timeout_secs: env::parse_or(
                "DATABASE_CONNECT_TIMEOUT",
                DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
            )?,
            idle_timeout_secs: env::parse_or(
                "DATABASE_IDLE_TIMEOUT",
                DEFAULT_DATABASE_IDLE_TIMEOUT_SECS,
            )?,
        })
    }

    pub fn validate(&self) -> PipelineResult<()> {
        if self.url.is_empty() {
            return Err(PipelineError::Configuration(
                "Database URL cannot be empty".to_string(),
            ));
        }

        if self.max_connections == 0 {
            return Err(PipelineError::Configuration(
                "Database max_connections must be greater than 0".to_string(),
            ));
        }

        if self.min_connections > self.max_connections {
            return Err(PipelineError::Configuration(format!(
                "Database min_connections ({}) cannot be greater than max_connections ({})",
                self.min_connections, self.max_connections
            )));
        }

        Ok(())
    }
}

impl SinkConfig {
    pub fn from_env() -> PipelineResult<Self> {
        Ok(Self {
            url: env::required("SINK_DATABASE_URL")?,
            table: env::var_or("SINK_TABLE", DEFAULT_SINK_TABLE),
            max_connections: env::parse_or("SINK_MAX_CONNECTIONS", DEFAULT_SINK_MAX_CONNECTIONS)?,
        })
    }

    pub fn validate(&self) -> PipelineResult<()> {
        if !crate::ingest::sink::is_valid_table_name(&self.table) {
            return Err(PipelineError::Configuration(format!(
                "SINK_TABLE {:?} is not a valid table identifier",
                self.table
            )));
        }

        if self.max_connections == 0 {
            return Err(PipelineError::Configuration(
                "SINK_MAX_CONNECTIONS must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_DATABASE_URL.to_string(),
            max_connections: DEFAULT_DATABASE_MAX_CONNECTIONS,
            min_connections: DEFAULT_DATABASE_MIN_CONNECTIONS,
            connect_timeout_secs: DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
            idle_timeout_secs: DEFAULT_DATABASE_IDLE_TIMEOUT_SECS,
        }
    }
}
