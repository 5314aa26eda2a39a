//! Test helpers for Sheetflow integration tests
//!
//! - Workbook and archive builders
//! - An in-memory archive source
//! - A recording sink that can reject rows or go offline

#![allow(dead_code)]

pub mod fixtures;

use async_trait::async_trait;
use sheetflow_pipeline::ingest::records::CellValue;
use sheetflow_pipeline::ingest::sink::{InsertStatement, RecordSink, SinkError, TransactionFailure};
use sheetflow_pipeline::{ColumnMapping, PipelineError, PipelineResult};
use sheetflow_pipeline::storage::ArchiveSource;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

pub use fixtures::*;

/// Mapping used across the pipeline tests
pub fn employee_mapping() -> ColumnMapping {
    ColumnMapping::from_json(
        r#"{
            "mappings": [
                { "sourceColumn": "Full Name", "sinkColumn": "Name" },
                { "sourceColumn": "E-mail", "sinkColumn": "Email" },
                { "sourceColumn": "Age", "sinkColumn": "Age" },
                { "sourceColumn": "Active", "sinkColumn": "IsActive" }
            ]
        }"#,
    )
    .expect("employee mapping is valid")
}

/// Archives held in memory, keyed by archive id
#[derive(Default)]
pub struct MemorySource {
    archives: HashMap<String, Vec<u8>>,
    fetches: AtomicUsize,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_archive(mut self, archive_id: &str, content: Vec<u8>) -> Self {
        self.archives.insert(archive_id.to_string(), content);
        self
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ArchiveSource for MemorySource {
    async fn fetch(&self, archive_id: &str) -> PipelineResult<Vec<u8>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.archives
            .get(archive_id)
            .cloned()
            .ok_or_else(|| PipelineError::NotFound(archive_id.to_string()))
    }
}

/// Sink that keeps every accepted statement
///
/// Rows whose `Email` is in the reject list are refused, like a constraint
/// violation would be.
#[derive(Default)]
pub struct RecordingSink {
    accepted: Mutex<Vec<InsertStatement>>,
    rejected_emails: Vec<String>,
    offline: AtomicBool,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rejecting(emails: &[&str]) -> Self {
        Self {
            rejected_emails: emails.iter().map(|e| e.to_string()).collect(),
            ..Default::default()
        }
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn accepted(&self) -> Vec<InsertStatement> {
        self.accepted.lock().expect("sink lock").clone()
    }

    /// Values of `column` across accepted rows, in insert order
    pub fn column(&self, column: &str) -> Vec<CellValue> {
        self.accepted()
            .iter()
            .filter_map(|s| {
                s.columns
                    .iter()
                    .position(|c| c == column)
                    .map(|i| s.values[i].clone())
            })
            .collect()
    }

    fn check(&self, statement: &InsertStatement) -> Result<(), SinkError> {
        let email = statement
            .columns
            .iter()
            .position(|c| c == "Email")
            .map(|i| &statement.values[i]);

        match email {
            Some(CellValue::String(email)) if self.rejected_emails.contains(email) => Err(
                SinkError::Rejected(format!("duplicate key value violates unique constraint: {}", email)),
            ),
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl RecordSink for RecordingSink {
    async fn ping(&self) -> Result<(), SinkError> {
        if self.offline.load(Ordering::SeqCst) {
            Err(SinkError::Unavailable("connection refused".into()))
        } else {
            Ok(())
        }
    }

    async fn insert(&self, statement: &InsertStatement) -> Result<(), SinkError> {
        self.check(statement)?;
        self.accepted.lock().expect("sink lock").push(statement.clone());
        Ok(())
    }

    async fn insert_all(&self, statements: &[InsertStatement]) -> Result<(), TransactionFailure> {
        for (index, statement) in statements.iter().enumerate() {
            self.check(statement).map_err(|error| TransactionFailure {
                index: Some(index),
                error,
            })?;
        }
        self.accepted
            .lock()
            .expect("sink lock")
            .extend_from_slice(statements);
        Ok(())
    }
}
