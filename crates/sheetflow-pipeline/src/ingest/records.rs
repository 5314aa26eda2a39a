//! Typed cell values and mapped records

use serde::{Deserialize, Serialize};

/// Scalar value of one spreadsheet cell
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum CellValue {
    String(String),
    Number(f64),
    Boolean(bool),
    Null,
}

impl CellValue {
    pub fn is_null(&self) -> bool {
        matches!(self, CellValue::Null)
    }

    /// Null or whitespace-only text
    pub fn is_blank(&self) -> bool {
        match self {
            CellValue::Null => true,
            CellValue::String(s) => s.trim().is_empty(),
            _ => false,
        }
    }
}

/// One data row keyed by sink column name
///
/// Only columns resolved for the row's batch are present. Field order follows
/// the column mapping.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Record {
    /// 1-based worksheet row the values came from
    pub row_number: u32,
    fields: Vec<(String, CellValue)>,
}

impl Record {
    pub fn new(row_number: u32) -> Self {
        Self {
            row_number,
            fields: Vec::new(),
        }
    }

    /// Set a column, replacing an earlier value for the same column
    pub fn insert(&mut self, column: impl Into<String>, value: CellValue) {
        let column = column.into();
        match self.fields.iter_mut().find(|(name, _)| *name == column) {
            Some((_, existing)) => *existing = value,
            None => self.fields.push((column, value)),
        }
    }

    pub fn get(&self, column: &str) -> Option<&CellValue> {
        self.fields
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value)
    }

    pub fn contains(&self, column: &str) -> bool {
        self.get(column).is_some()
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &CellValue)> {
        self.fields.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Every present value is blank
    pub fn is_blank(&self) -> bool {
        self.fields.iter().all(|(_, value)| value.is_blank())
    }
}
