//! Record extraction from spreadsheet batches
//!
//! Only the first worksheet of a workbook is read. Worksheet row 1 is the
//! header; every following row becomes one record. Any format calamine
//! detects (xlsx, xlsm, xlsb, xls, ods) can be read.

use calamine::{open_workbook_auto_from_rs, Data, Reader};
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use std::str::FromStr;
use tracing::debug;

use super::archive::Batch;
use super::mapping::ResolvedColumnIndex;
use super::records::{CellValue, Record};
use crate::error::{PipelineError, PipelineResult};

/// What to do with rows that contain no data at all
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlankRowPolicy {
    /// Emit a record with every resolved column set to null
    #[default]
    Emit,
    Skip,
}

impl FromStr for BlankRowPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "emit" => Ok(BlankRowPolicy::Emit),
            "skip" => Ok(BlankRowPolicy::Skip),
            other => Err(format!("expected 'emit' or 'skip', got '{}'", other)),
        }
    }
}

/// First worksheet of a batch, converted to typed cells
#[derive(Debug, Clone)]
pub struct SheetTable {
    header: Vec<String>,
    /// Worksheet rows 2..N
    rows: Vec<Vec<CellValue>>,
}

impl SheetTable {
    pub fn open(batch: &Batch) -> PipelineResult<Self> {
        let entry = batch.entry_name.as_str();

        let mut workbook = open_workbook_auto_from_rs(Cursor::new(batch.content.as_slice()))
            .map_err(|e| {
                PipelineError::extraction(entry, None, format!("not a readable workbook: {}", e))
            })?;

        let sheet_name = workbook
            .sheet_names()
            .first()
            .cloned()
            .ok_or_else(|| PipelineError::extraction(entry, None, "workbook has no worksheets"))?;

        let range = workbook.worksheet_range(&sheet_name).map_err(|e| {
            PipelineError::extraction(
                entry,
                None,
                format!("failed to read worksheet '{}': {}", sheet_name, e),
            )
        })?;

        // The used range starts at the first non-empty row, not at row 1
        let first_row = range.start().map(|(row, _)| row as usize).ok_or_else(|| {
            PipelineError::extraction(entry, Some(1), "worksheet has no header row")
        })?;

        let mut rows = range.rows();
        let header = if first_row == 0 {
            rows.next()
                .map(|row| row.iter().map(header_text).collect())
                .unwrap_or_default()
        } else {
            debug!(entry, first_row = first_row + 1, "Header row is blank");
            Vec::new()
        };

        // Blank rows between the header and the used range are still data rows
        let leading_blanks = first_row.saturating_sub(1);
        let rows = std::iter::repeat_with(Vec::new)
            .take(leading_blanks)
            .chain(rows.map(|row| row.iter().map(|cell| cell_value(cell, entry)).collect()))
            .collect();

        Ok(Self { header, rows })
    }

    pub fn header(&self) -> &[String] {
        &self.header
    }

    pub fn data_rows(&self) -> usize {
        self.rows.len()
    }

    /// Worksheet row number of the `index`-th data row
    pub fn row_number(&self, index: usize) -> u32 {
        index as u32 + 2
    }
}

fn header_text(cell: &Data) -> String {
    match cell {
        Data::String(s) => s.clone(),
        Data::Empty => String::new(),
        other => other.to_string(),
    }
}

fn cell_value(cell: &Data, entry: &str) -> CellValue {
    match cell {
        Data::Int(i) => CellValue::Number(*i as f64),
        Data::Float(f) => CellValue::Number(*f),
        Data::String(s) => CellValue::String(s.clone()),
        Data::Bool(b) => CellValue::Boolean(*b),
        Data::DateTime(dt) => CellValue::Number(dt.as_f64()),
        Data::DateTimeIso(s) | Data::DurationIso(s) => CellValue::String(s.clone()),
        Data::Error(e) => {
            debug!(entry, error = %e, "Cell error read as null");
            CellValue::Null
        }
        Data::Empty => CellValue::Null,
    }
}

/// Turns worksheet rows into records keyed by sink column
#[derive(Debug, Clone, Copy, Default)]
pub struct RecordExtractor {
    blank_rows: BlankRowPolicy,
}

impl RecordExtractor {
    pub fn new(blank_rows: BlankRowPolicy) -> Self {
        Self { blank_rows }
    }

    /// Open the batch and extract every data row
    pub fn extract(&self, batch: &Batch, index: &ResolvedColumnIndex) -> PipelineResult<Vec<Record>> {
        let table = SheetTable::open(batch)?;
        Ok(self.extract_table(&table, index))
    }

    /// Records in worksheet order, one per data row
    ///
    /// A record carries exactly the resolved columns. Cells past the end of
    /// a short row are null.
    pub fn extract_table(&self, table: &SheetTable, index: &ResolvedColumnIndex) -> Vec<Record> {
        let mut records = Vec::with_capacity(table.rows.len());

        for (i, row) in table.rows.iter().enumerate() {
            let row_number = table.row_number(i);

            if self.blank_rows == BlankRowPolicy::Skip && row.iter().all(CellValue::is_blank) {
                debug!(row = row_number, "Skipping blank row");
                continue;
            }

            let mut record = Record::new(row_number);
            for column in index.columns() {
                let value = row.get(column.position).cloned().unwrap_or(CellValue::Null);
                record.insert(column.sink_column.clone(), value);
            }
            records.push(record);
        }

        records
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::ingest::fixtures::{ods, xlsx, Cell};
    use crate::ingest::mapping::{ColumnMapping, ColumnMappingEntry};

    fn batch(content: Vec<u8>) -> Batch {
        Batch {
            ordinal: 0,
            entry_name: "staff.xlsx".to_string(),
            content,
        }
    }

    fn mapping() -> ColumnMapping {
        ColumnMapping::new(vec![
            ColumnMappingEntry::new("Name", "Name"),
            ColumnMappingEntry::new("Age", "Age"),
            ColumnMappingEntry::new("Active", "IsActive"),
        ])
        .unwrap()
    }

    #[test]
    fn test_typed_cells_and_row_numbers() {
        let content = xlsx(&[
            vec![Cell::text("Name"), Cell::text("Age"), Cell::text("Active")],
            vec![Cell::text("Ada"), Cell::number(36.0), Cell::bool(true)],
            vec![Cell::text("Grace"), Cell::Blank, Cell::bool(false)],
        ]);

        let table = SheetTable::open(&batch(content)).unwrap();
        assert_eq!(table.header(), &["Name", "Age", "Active"]);

        let index = mapping().resolve(table.header());
        let records = RecordExtractor::default().extract_table(&table, &index);

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].row_number, 2);
        assert_eq!(records[0].get("Name"), Some(&CellValue::String("Ada".into())));
        assert_eq!(records[0].get("Age"), Some(&CellValue::Number(36.0)));
        assert_eq!(records[0].get("IsActive"), Some(&CellValue::Boolean(true)));
        assert_eq!(records[1].row_number, 3);
        assert_eq!(records[1].get("Age"), Some(&CellValue::Null));
    }

    #[test]
    fn test_unresolved_columns_are_absent() {
        let content = xlsx(&[
            vec![Cell::text("name"), Cell::text("Department")],
            vec![Cell::text("Ada"), Cell::text("R&D")],
        ]);

        let table = SheetTable::open(&batch(content)).unwrap();
        let index = mapping().resolve(table.header());
        let records = RecordExtractor::default().extract_table(&table, &index);

        assert_eq!(records[0].len(), 1);
        assert!(records[0].contains("Name"));
        assert!(!records[0].contains("Age"));
    }

    #[test]
    fn test_blank_row_policy() {
        let content = xlsx(&[
            vec![Cell::text("Name"), Cell::text("Age")],
            vec![Cell::text("Ada"), Cell::number(36.0)],
            vec![Cell::Blank, Cell::Blank],
            vec![Cell::text("Grace"), Cell::number(45.0)],
        ]);
        let table = SheetTable::open(&batch(content)).unwrap();
        let index = mapping().resolve(table.header());

        let emitted = RecordExtractor::new(BlankRowPolicy::Emit).extract_table(&table, &index);
        assert_eq!(emitted.len(), 3);
        assert!(emitted[1].is_blank());
        assert_eq!(emitted[1].len(), 2);

        let skipped = RecordExtractor::new(BlankRowPolicy::Skip).extract_table(&table, &index);
        assert_eq!(skipped.len(), 2);
        assert_eq!(skipped[1].row_number, 4);
    }

    #[test]
    fn test_cell_error_reads_as_null() {
        let content = xlsx(&[
            vec![Cell::text("Name"), Cell::text("Age")],
            vec![Cell::text("Ada"), Cell::Error("#DIV/0!".into())],
        ]);
        let records = RecordExtractor::default()
            .extract(&batch(content.clone()), &mapping().resolve(&["Name", "Age"]))
            .unwrap();
        assert_eq!(records[0].get("Age"), Some(&CellValue::Null));
    }

    #[test]
    fn test_header_only_sheet_has_no_records() {
        let content = xlsx(&[vec![Cell::text("Name")]]);
        let table = SheetTable::open(&batch(content)).unwrap();
        assert_eq!(table.data_rows(), 0);
    }

    #[test]
    fn test_opendocument_batch_is_read() {
        let content = ods(&[
            vec![Cell::text("Name"), Cell::text("Age")],
            vec![Cell::text("Ada"), Cell::number(36.0)],
        ]);
        let records = RecordExtractor::default()
            .extract(&batch(content), &mapping().resolve(&["Name", "Age"]))
            .unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].get("Name"), Some(&CellValue::String("Ada".into())));
        assert_eq!(records[0].get("Age"), Some(&CellValue::Number(36.0)));
    }

    #[test]
    fn test_unreadable_workbook_is_an_extraction_error() {
        let err = SheetTable::open(&batch(b"not a workbook".to_vec())).unwrap_err();
        match err {
            PipelineError::Extraction { entry, row, .. } => {
                assert_eq!(entry, "staff.xlsx");
                assert_eq!(row, None);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_empty_sheet_reports_header_row() {
        let err = SheetTable::open(&batch(xlsx(&[]))).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Extraction { row: Some(1), .. }
        ));
    }

    #[test]
    fn test_blank_first_row_is_an_empty_header() {
        let content = xlsx(&[
            vec![Cell::Blank, Cell::Blank],
            vec![Cell::text("Name"), Cell::text("Age")],
            vec![Cell::text("Ada"), Cell::number(36.0)],
        ]);

        let table = SheetTable::open(&batch(content)).unwrap();
        assert!(table.header().is_empty());
        assert_eq!(table.data_rows(), 2);

        let index = mapping().resolve(table.header());
        assert!(index.columns().is_empty());

        let records = RecordExtractor::default().extract_table(&table, &index);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].row_number, 2);
        assert_eq!(records[1].row_number, 3);
        assert!(records.iter().all(Record::is_empty));
    }

    #[test]
    fn test_blank_rows_before_the_used_range_are_kept() {
        let content = xlsx(&[
            vec![],
            vec![],
            vec![],
            vec![Cell::text("Ada"), Cell::number(36.0)],
        ]);

        let table = SheetTable::open(&batch(content)).unwrap();
        assert_eq!(table.data_rows(), 3);
        assert_eq!(table.row_number(2), 4);
    }

    #[test]
    fn test_blank_row_policy_from_str() {
        assert_eq!("SKIP".parse::<BlankRowPolicy>().unwrap(), BlankRowPolicy::Skip);
        assert!("drop".parse::<BlankRowPolicy>().is_err());
    }
}
