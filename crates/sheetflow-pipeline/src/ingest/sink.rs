//! Relational sink
//!
//! Records become parameterized `INSERT` statements naming only the columns
//! the record actually carries, so sink defaults apply to everything else.

use async_trait::async_trait;
use regex::Regex;
use sqlx::postgres::{PgArguments, PgPoolOptions};
use sqlx::query::Query;
use sqlx::{PgPool, Postgres};
use std::sync::LazyLock;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

use super::records::{CellValue, Record};
use crate::config::SinkConfig;
use crate::error::{PipelineError, PipelineResult};

#[allow(clippy::expect_used)]
static IDENTIFIER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]{0,62}$").expect("identifier pattern compiles")
});

/// Plain SQL identifier: letters, digits and underscores, not starting with a digit
pub fn is_valid_identifier(name: &str) -> bool {
    IDENTIFIER.is_match(name)
}

/// Identifier optionally qualified by a schema, e.g. `hr.employee`
pub fn is_valid_table_name(name: &str) -> bool {
    let mut parts = name.split('.');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(table), None, None) => is_valid_identifier(table),
        (Some(schema), Some(table), None) => {
            is_valid_identifier(schema) && is_valid_identifier(table)
        }
        _ => false,
    }
}

fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn quote_table(name: &str) -> String {
    name.split('.').map(quote_identifier).collect::<Vec<_>>().join(".")
}

/// One row insert, built from a record
#[derive(Debug, Clone, PartialEq)]
pub struct InsertStatement {
    pub table: String,
    pub row_number: u32,
    pub columns: Vec<String>,
    pub values: Vec<CellValue>,
}

impl InsertStatement {
    pub fn from_record(table: &str, record: &Record) -> Self {
        let (columns, values) = record
            .fields()
            .map(|(column, value)| (column.to_string(), value.clone()))
            .unzip();

        Self {
            table: table.to_string(),
            row_number: record.row_number,
            columns,
            values,
        }
    }

    /// SQL text with `$n` placeholders; null values are written as `NULL`
    pub fn sql(&self) -> String {
        if self.columns.is_empty() {
            return format!("INSERT INTO {} DEFAULT VALUES", quote_table(&self.table));
        }

        let columns = self
            .columns
            .iter()
            .map(|c| quote_identifier(c))
            .collect::<Vec<_>>()
            .join(", ");

        let mut placeholder = 0;
        let values = self
            .values
            .iter()
            .map(|value| match value {
                CellValue::Null => "NULL".to_string(),
                _ => {
                    placeholder += 1;
                    format!("${}", placeholder)
                }
            })
            .collect::<Vec<_>>()
            .join(", ");

        format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quote_table(&self.table),
            columns,
            values
        )
    }

    /// Values bound to the placeholders, in placeholder order
    pub fn parameters(&self) -> impl Iterator<Item = &CellValue> {
        self.values.iter().filter(|value| !value.is_null())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SinkError {
    /// No connection could be used
    #[error("sink unavailable: {0}")]
    Unavailable(String),

    /// The sink refused this statement
    #[error("{0}")]
    Rejected(String),
}

/// Failure of a transactional insert
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionFailure {
    /// Statement that failed; `None` when beginning or committing failed
    pub index: Option<usize>,
    pub error: SinkError,
}

#[async_trait]
pub trait RecordSink: Send + Sync {
    /// Establish or validate a connection
    async fn ping(&self) -> Result<(), SinkError>;

    async fn insert(&self, statement: &InsertStatement) -> Result<(), SinkError>;

    /// Execute every statement in one transaction
    async fn insert_all(&self, statements: &[InsertStatement]) -> Result<(), TransactionFailure>;
}

/// PostgreSQL sink; connections are taken from the pool per call
#[derive(Clone)]
pub struct PgSink {
    pool: PgPool,
}

impl PgSink {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Build the sink pool without connecting; the first batch pings it
    pub fn connect_lazy(config: &SinkConfig) -> PipelineResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(30))
            .connect_lazy(&config.url)
            .map_err(|e| PipelineError::Configuration(format!("Invalid SINK_DATABASE_URL: {}", e)))?;

        info!(table = %config.table, "Sink pool configured");

        Ok(Self { pool })
    }

    fn bind<'q>(statement: &InsertStatement, sql: &'q str) -> Query<'q, Postgres, PgArguments> {
        statement
            .parameters()
            .fold(sqlx::query(sql), |query, value| match value {
                CellValue::String(s) => query.bind(s.clone()),
                CellValue::Number(n) => query.bind(*n),
                CellValue::Boolean(b) => query.bind(*b),
                CellValue::Null => query,
            })
    }
}

/// Connection-level failures make the sink unavailable; anything else rejects the row
fn classify(err: sqlx::Error) -> SinkError {
    match err {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed
        | sqlx::Error::Configuration(_) => SinkError::Unavailable(err.to_string()),
        sqlx::Error::Database(db) => SinkError::Rejected(db.message().to_string()),
        other => SinkError::Rejected(other.to_string()),
    }
}

#[async_trait]
impl RecordSink for PgSink {
    async fn ping(&self) -> Result<(), SinkError> {
        self.pool.acquire().await.map(drop).map_err(classify)
    }

    async fn insert(&self, statement: &InsertStatement) -> Result<(), SinkError> {
        let sql = statement.sql();
        debug!(row = statement.row_number, %sql, "Inserting record");

        Self::bind(statement, &sql)
            .execute(&self.pool)
            .await
            .map(drop)
            .map_err(classify)
    }

    async fn insert_all(&self, statements: &[InsertStatement]) -> Result<(), TransactionFailure> {
        let mut tx = self.pool.begin().await.map_err(|e| TransactionFailure {
            index: None,
            error: classify(e),
        })?;

        for (index, statement) in statements.iter().enumerate() {
            let sql = statement.sql();
            Self::bind(statement, &sql)
                .execute(&mut *tx)
                .await
                .map_err(|e| TransactionFailure {
                    index: Some(index),
                    error: classify(e),
                })?;
        }

        tx.commit().await.map_err(|e| TransactionFailure {
            index: None,
            error: classify(e),
        })
    }
}
