//! Column mapping between spreadsheet headers and sink columns
//!
//! The mapping document is loaded once at startup. Header resolution happens
//! per batch because every workbook may order or spell its headers
//! differently.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, info};

use super::sink::is_valid_identifier;
use crate::error::{PipelineError, PipelineResult};

/// One `source header -> sink column` pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMappingEntry {
    #[serde(rename = "sourceColumn", alias = "ExcelColumn", alias = "excelColumn")]
    pub source_column: String,
    #[serde(rename = "sinkColumn", alias = "SqlColumn", alias = "sqlColumn")]
    pub sink_column: String,
}

impl ColumnMappingEntry {
    pub fn new(source_column: impl Into<String>, sink_column: impl Into<String>) -> Self {
        Self {
            source_column: source_column.into(),
            sink_column: sink_column.into(),
        }
    }
}

/// Validated list of mapping entries
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMapping {
    #[serde(alias = "Mappings")]
    mappings: Vec<ColumnMappingEntry>,
}

impl ColumnMapping {
    pub fn new(mappings: Vec<ColumnMappingEntry>) -> PipelineResult<Self> {
        let mapping = Self { mappings };
        mapping.validate("<inline>")?;
        Ok(mapping)
    }

    /// Read and validate the mapping document at `path`
    pub fn from_path(path: impl AsRef<Path>) -> PipelineResult<Self> {
        let path = path.as_ref();
        let origin = path.display().to_string();

        let contents = std::fs::read_to_string(path)
            .map_err(|e| PipelineError::mapping(&origin, format!("cannot read file: {}", e)))?;

        let mapping = Self::parse(&contents, &origin)?;
        info!(path = %origin, entries = mapping.len(), "Loaded column mapping");
        Ok(mapping)
    }

    pub fn from_json(json: &str) -> PipelineResult<Self> {
        Self::parse(json, "<inline>")
    }

    fn parse(json: &str, origin: &str) -> PipelineResult<Self> {
        let mapping: Self = serde_json::from_str(json)
            .map_err(|e| PipelineError::mapping(origin, format!("malformed JSON: {}", e)))?;
        mapping.validate(origin)?;
        Ok(mapping)
    }

    fn validate(&self, origin: &str) -> PipelineResult<()> {
        if self.mappings.is_empty() {
            return Err(PipelineError::mapping(origin, "mapping list is empty"));
        }

        let mut seen = HashSet::new();
        for entry in &self.mappings {
            if normalize_header(&entry.source_column).is_empty() {
                return Err(PipelineError::mapping(
                    origin,
                    format!("source column for '{}' is empty", entry.sink_column),
                ));
            }
            if !is_valid_identifier(&entry.sink_column) {
                return Err(PipelineError::mapping(
                    origin,
                    format!("'{}' is not a valid sink column name", entry.sink_column),
                ));
            }
            if !seen.insert(entry.sink_column.to_lowercase()) {
                return Err(PipelineError::mapping(
                    origin,
                    format!("sink column '{}' is mapped more than once", entry.sink_column),
                ));
            }
        }

        Ok(())
    }

    pub fn entries(&self) -> &[ColumnMappingEntry] {
        &self.mappings
    }

    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }

    /// Match mapping entries against a header row
    ///
    /// Each entry resolves to the leftmost header cell whose trimmed,
    /// lowercased text equals the entry's source column. Blank header cells
    /// never match.
    pub fn resolve<S: AsRef<str>>(&self, header: &[S]) -> ResolvedColumnIndex {
        let normalized: Vec<String> = header.iter().map(|h| normalize_header(h.as_ref())).collect();

        let mut columns = Vec::new();
        let mut unmatched = Vec::new();

        for entry in &self.mappings {
            let wanted = normalize_header(&entry.source_column);
            match normalized.iter().position(|h| !h.is_empty() && *h == wanted) {
                Some(position) => columns.push(ResolvedColumn {
                    sink_column: entry.sink_column.clone(),
                    source_column: entry.source_column.clone(),
                    position,
                }),
                None => unmatched.push(entry.source_column.clone()),
            }
        }

        debug!(
            resolved = columns.len(),
            unmatched = unmatched.len(),
            "Resolved header row"
        );

        ResolvedColumnIndex { columns, unmatched }
    }
}

/// Header normalization used on both sides of the comparison
pub fn normalize_header(header: &str) -> String {
    header.trim().to_lowercase()
}

/// A mapping entry located in the header row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedColumn {
    pub sink_column: String,
    pub source_column: String,
    /// 0-based position within the header row
    pub position: usize,
}

/// Header resolution for one batch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedColumnIndex {
    columns: Vec<ResolvedColumn>,
    unmatched: Vec<String>,
}

impl ResolvedColumnIndex {
    /// Resolved columns in mapping order
    pub fn columns(&self) -> &[ResolvedColumn] {
        &self.columns
    }

    /// Source columns that matched no header cell
    pub fn unmatched(&self) -> &[String] {
        &self.unmatched
    }

    pub fn position_of(&self, sink_column: &str) -> Option<usize> {
        self.columns
            .iter()
            .find(|c| c.sink_column == sink_column)
            .map(|c| c.position)
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}
