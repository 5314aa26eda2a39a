//! Loads extracted records into the sink
//!
//! A rejected record never fails the batch. Only an unreachable sink does.

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, instrument, warn};

use super::records::Record;
use super::sink::{InsertStatement, RecordSink, SinkError, TransactionFailure};
use crate::error::{PipelineError, PipelineResult};

/// How a batch's inserts relate to each other
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadMode {
    /// Each record commits on its own; failures are isolated
    #[default]
    PerRecord,
    /// The whole batch commits or nothing does
    Transactional,
}

impl FromStr for LoadMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "per_record" | "per-record" => Ok(LoadMode::PerRecord),
            "transactional" => Ok(LoadMode::Transactional),
            other => Err(format!(
                "expected 'per_record' or 'transactional', got '{}'",
                other
            )),
        }
    }
}

/// Outcome of inserting one record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    Inserted,
    Rejected(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectedRecord {
    pub row: u32,
    pub reason: String,
}

/// Per-batch load totals
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadResult {
    pub inserted: usize,
    pub rejected: Vec<RejectedRecord>,
}

impl LoadResult {
    pub fn record(&mut self, row: u32, outcome: LoadOutcome) {
        match outcome {
            LoadOutcome::Inserted => self.inserted += 1,
            LoadOutcome::Rejected(reason) => self.rejected.push(RejectedRecord { row, reason }),
        }
    }

    pub fn attempted(&self) -> usize {
        self.inserted + self.rejected.len()
    }
}

#[derive(Clone)]
pub struct SinkLoader {
    sink: Arc<dyn RecordSink>,
    table: String,
    mode: LoadMode,
}

impl SinkLoader {
    pub fn new(sink: Arc<dyn RecordSink>, table: impl Into<String>, mode: LoadMode) -> Self {
        Self {
            sink,
            table: table.into(),
            mode,
        }
    }

    pub fn mode(&self) -> LoadMode {
        self.mode
    }

    /// Insert every record, in order
    #[instrument(skip_all, fields(table = %self.table, records = records.len(), mode = ?self.mode))]
    pub async fn load(&self, records: &[Record]) -> PipelineResult<LoadResult> {
        if records.is_empty() {
            return Ok(LoadResult::default());
        }

        self.sink
            .ping()
            .await
            .map_err(|e| PipelineError::SinkUnavailable(e.to_string()))?;

        let statements: Vec<InsertStatement> = records
            .iter()
            .map(|record| InsertStatement::from_record(&self.table, record))
            .collect();

        let result = match self.mode {
            LoadMode::PerRecord => self.load_each(&statements).await?,
            LoadMode::Transactional => self.load_transaction(&statements).await?,
        };

        info!(
            inserted = result.inserted,
            rejected = result.rejected.len(),
            "Loaded batch into sink"
        );

        Ok(result)
    }

    async fn load_each(&self, statements: &[InsertStatement]) -> PipelineResult<LoadResult> {
        let mut result = LoadResult::default();

        for statement in statements {
            let outcome = match self.sink.insert(statement).await {
                Ok(()) => LoadOutcome::Inserted,
                Err(SinkError::Unavailable(reason)) => {
                    return Err(PipelineError::SinkUnavailable(reason));
                }
                Err(SinkError::Rejected(reason)) => {
                    warn!(row = statement.row_number, %reason, "Record rejected by sink");
                    LoadOutcome::Rejected(reason)
                }
            };
            result.record(statement.row_number, outcome);
        }

        Ok(result)
    }

    async fn load_transaction(&self, statements: &[InsertStatement]) -> PipelineResult<LoadResult> {
        let mut result = LoadResult::default();

        match self.sink.insert_all(statements).await {
            Ok(()) => {
                result.inserted = statements.len();
            }
            Err(TransactionFailure {
                error: SinkError::Unavailable(reason),
                ..
            }) => return Err(PipelineError::SinkUnavailable(reason)),
            Err(TransactionFailure {
                index,
                error: SinkError::Rejected(reason),
            }) => {
                let failed = index.and_then(|i| statements.get(i).map(|s| (i, s.row_number)));
                warn!(row = ?failed.map(|(_, row)| row), %reason, "Batch transaction rolled back");

                for (i, statement) in statements.iter().enumerate() {
                    let reason = match failed {
                        Some((failed_index, failed_row)) if failed_index != i => format!(
                            "rolled back: row {} was rejected in the same transaction",
                            failed_row
                        ),
                        _ => reason.clone(),
                    };
                    result.record(statement.row_number, LoadOutcome::Rejected(reason));
                }
            }
        }

        Ok(result)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::ingest::records::CellValue;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Rejects rows whose `Name` is "bad"
    #[derive(Default)]
    struct FakeSink {
        down: bool,
        executed: Mutex<Vec<String>>,
    }

    impl FakeSink {
        fn check(statement: &InsertStatement) -> Result<(), SinkError> {
            let bad = statement
                .values
                .iter()
                .any(|v| *v == CellValue::String("bad".into()));
            if bad {
                Err(SinkError::Rejected("value violates check constraint".into()))
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl RecordSink for FakeSink {
        async fn ping(&self) -> Result<(), SinkError> {
            if self.down {
                Err(SinkError::Unavailable("connection refused".into()))
            } else {
                Ok(())
            }
        }

        async fn insert(&self, statement: &InsertStatement) -> Result<(), SinkError> {
            Self::check(statement)?;
            self.executed.lock().unwrap().push(statement.sql());
            Ok(())
        }

        async fn insert_all(&self, statements: &[InsertStatement]) -> Result<(), TransactionFailure> {
            for (index, statement) in statements.iter().enumerate() {
                Self::check(statement).map_err(|error| TransactionFailure {
                    index: Some(index),
                    error,
                })?;
            }
            let mut executed = self.executed.lock().unwrap();
            executed.extend(statements.iter().map(InsertStatement::sql));
            Ok(())
        }
    }

    fn records(names: &[&str]) -> Vec<Record> {
        names
            .iter()
            .enumerate()
            .map(|(i, name)| {
                let mut record = Record::new(i as u32 + 2);
                record.insert("Name", CellValue::String(name.to_string()));
                record
            })
            .collect()
    }

    #[tokio::test]
    async fn test_per_record_isolates_rejections() {
        let sink = Arc::new(FakeSink::default());
        let loader = SinkLoader::new(sink.clone(), "employee", LoadMode::PerRecord);

        let result = loader.load(&records(&["Ada", "bad", "Grace"])).await.unwrap();

        assert_eq!(result.inserted, 2);
        assert_eq!(
            result.rejected,
            vec![RejectedRecord {
                row: 3,
                reason: "value violates check constraint".into()
            }]
        );
        assert_eq!(result.attempted(), 3);
        assert_eq!(sink.executed.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_transactional_rejects_whole_batch() {
        let sink = Arc::new(FakeSink::default());
        let loader = SinkLoader::new(sink.clone(), "employee", LoadMode::Transactional);

        let result = loader.load(&records(&["Ada", "bad", "Grace"])).await.unwrap();

        assert_eq!(result.inserted, 0);
        assert_eq!(result.rejected.len(), 3);
        assert_eq!(result.rejected[1].reason, "value violates check constraint");
        assert!(result.rejected[0].reason.contains("row 3"));
        assert!(sink.executed.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_transactional_success_counts_all() {
        let sink = Arc::new(FakeSink::default());
        let loader = SinkLoader::new(sink, "employee", LoadMode::Transactional);

        let result = loader.load(&records(&["Ada", "Grace"])).await.unwrap();
        assert_eq!(result.inserted, 2);
        assert!(result.rejected.is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_sink_fails_batch() {
        let sink = Arc::new(FakeSink {
            down: true,
            ..Default::default()
        });
        let loader = SinkLoader::new(sink, "employee", LoadMode::PerRecord);

        let err = loader.load(&records(&["Ada"])).await.unwrap_err();
        assert!(matches!(err, PipelineError::SinkUnavailable(_)));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_empty_batch_skips_sink() {
        let sink = Arc::new(FakeSink {
            down: true,
            ..Default::default()
        });
        let loader = SinkLoader::new(sink, "employee", LoadMode::PerRecord);

        let result = loader.load(&[]).await.unwrap();
        assert_eq!(result, LoadResult::default());
    }

    #[test]
    fn test_load_mode_from_str() {
        assert_eq!("per_record".parse::<LoadMode>().unwrap(), LoadMode::PerRecord);
        assert_eq!("Transactional".parse::<LoadMode>().unwrap(), LoadMode::Transactional);
        assert!("bulk".parse::<LoadMode>().is_err());
    }
}
