//! CSV import and export of sheet rows

use std::collections::HashSet;

use crate::fields::{FieldMap, FieldValue};
use crate::reconcile::align_rows_to_headers;
use crate::{Error, Result};

/// Parsed CSV document
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CsvTable {
    /// Header row, whitespace trimmed
    pub columns: Vec<String>,
    pub rows: Vec<FieldMap>,
}

/// Parse CSV text with a header row.
///
/// Empty cells become `Null`; short records leave trailing columns `Null`;
/// fully blank lines are skipped. A header naming the same column twice is
/// rejected.
pub fn parse_csv(input: &str) -> Result<CsvTable> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::Headers)
        .from_reader(input.as_bytes());

    let columns: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
    if columns.iter().all(String::is_empty) {
        return Err(Error::InvalidInput("CSV has no header row".to_string()));
    }
    let mut seen = HashSet::new();
    if let Some(duplicate) = columns
        .iter()
        .filter(|column| !column.is_empty())
        .find(|column| !seen.insert(column.as_str()))
    {
        return Err(Error::InvalidInput(format!(
            "CSV header repeats column '{}'",
            duplicate
        )));
    }

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        if record.iter().all(|cell| cell.trim().is_empty()) {
            continue;
        }
        if record.len() > columns.len() {
            return Err(Error::InvalidInput(format!(
                "CSV line {} has {} cells but only {} columns",
                record.position().map(|p| p.line()).unwrap_or_default(),
                record.len(),
                columns.len()
            )));
        }
        let row: FieldMap = columns
            .iter()
            .enumerate()
            .filter(|(_, column)| !column.is_empty())
            .map(|(i, column)| {
                let value = match record.get(i) {
                    Some(cell) if !cell.is_empty() => FieldValue::from(cell),
                    _ => FieldValue::Null,
                };
                (column.clone(), value)
            })
            .collect();
        rows.push(row);
    }

    Ok(CsvTable { columns, rows })
}

/// Render rows as CSV under `columns`; `Null` becomes an empty cell
pub fn write_csv(columns: &[String], rows: &[FieldMap]) -> Result<String> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(columns)?;
    for aligned in align_rows_to_headers(rows, columns) {
        writer.write_record(
            aligned
                .iter()
                .map(|value| value.to_plain_string().unwrap_or_default()),
        )?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|e| Error::Internal(format!("CSV flush failed: {}", e)))?;
    String::from_utf8(bytes).map_err(|e| Error::Internal(format!("CSV output not UTF-8: {}", e)))
}
