//! Cross-sheet combination
//!
//! Builds the read-only "all sheets" projection: a stable union of column
//! names plus either a plain concatenation of rows or one merged row per
//! student identity.

use std::collections::HashMap;

use serde::Serialize;

use super::{IdentityFields, IdentityKey};
use crate::fields::{field, FieldMap, FieldValue};

/// One sheet's contribution to a combined view
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SheetRows {
    pub columns: Vec<String>,
    pub rows: Vec<FieldMap>,
}

/// Combined columns and rows
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CombinedRows {
    pub columns: Vec<String>,
    pub rows: Vec<FieldMap>,
}

/// Stable union of column lists, first-seen order, no duplicates
pub fn union_columns<'a, I, C>(column_sets: I) -> Vec<String>
where
    I: IntoIterator<Item = C>,
    C: IntoIterator<Item = &'a String>,
{
    let mut columns: Vec<String> = Vec::new();
    for set in column_sets {
        for column in set {
            if !columns.contains(column) {
                columns.push(column.clone());
            }
        }
    }
    columns
}

/// Project each row onto `columns`, `Null` where the row has no value
pub fn align_rows_to_headers(rows: &[FieldMap], columns: &[String]) -> Vec<Vec<FieldValue>> {
    rows.iter()
        .map(|row| {
            columns
                .iter()
                .map(|column| field(row, column).clone())
                .collect()
        })
        .collect()
}

/// Combine several sheets into one view.
///
/// Without `dedupe`, rows are concatenated in sheet order and padded with
/// `Null` for every unified column they lack. With `dedupe`, rows sharing an
/// identity key collapse into the first one seen; later rows only fill
/// fields that are still empty on it.
pub fn combine_sheets(sheets: &[SheetRows], dedupe: bool, identity: &IdentityFields) -> CombinedRows {
    let columns = union_columns(sheets.iter().map(|s| s.columns.iter()));

    let rows = if dedupe {
        merge_by_identity(sheets, identity)
    } else {
        sheets.iter().flat_map(|s| s.rows.iter().cloned()).collect()
    };

    let rows = rows
        .into_iter()
        .map(|mut row| {
            for column in &columns {
                row.entry(column.clone()).or_insert(FieldValue::Null);
            }
            row
        })
        .collect();

    CombinedRows { columns, rows }
}

fn merge_by_identity(sheets: &[SheetRows], identity: &IdentityFields) -> Vec<FieldMap> {
    let mut merged: Vec<FieldMap> = Vec::new();
    let mut index: HashMap<IdentityKey, usize> = HashMap::new();

    for row in sheets.iter().flat_map(|s| s.rows.iter()) {
        let key = identity.key_of(row);
        match index.get(&key) {
            Some(&slot) => {
                let target = &mut merged[slot];
                for (column, value) in row {
                    if value.is_empty() {
                        continue;
                    }
                    let current = target.entry(column.clone()).or_insert(FieldValue::Null);
                    if current.is_empty() {
                        *current = value.clone();
                    }
                }
            }
            None => {
                index.insert(key, merged.len());
                merged.push(row.clone());
            }
        }
    }
    merged
}
