//! Row reconciliation by student identity
//!
//! Incoming rows are matched against stored rows by a case-insensitive
//! identity key built from two designated columns. Matching is pure: the
//! caller fetches and decrypts existing rows, asks for an [`UpsertPlan`],
//! then applies it against the store.

pub mod combine;

pub use combine::{align_rows_to_headers, combine_sheets, union_columns, CombinedRows, SheetRows};

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::fields::{field, FieldMap};

/// Default first-name column
pub const DEFAULT_FIRST_COLUMN: &str = "Student First";

/// Default last-name column
pub const DEFAULT_LAST_COLUMN: &str = "Student Last";

const KEY_SEPARATOR: char = '\u{1f}';

/// Columns that together identify a student
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityFields {
    #[serde(default = "default_first_column")]
    pub first_column: String,
    #[serde(default = "default_last_column")]
    pub last_column: String,
}

fn default_first_column() -> String {
    DEFAULT_FIRST_COLUMN.to_string()
}

fn default_last_column() -> String {
    DEFAULT_LAST_COLUMN.to_string()
}

impl Default for IdentityFields {
    fn default() -> Self {
        Self {
            first_column: default_first_column(),
            last_column: default_last_column(),
        }
    }
}

impl IdentityFields {
    pub fn new(first_column: impl Into<String>, last_column: impl Into<String>) -> Self {
        Self {
            first_column: first_column.into(),
            last_column: last_column.into(),
        }
    }

    /// Identity key of a row
    pub fn key_of(&self, row: &FieldMap) -> IdentityKey {
        IdentityKey::new(
            field(row, &self.first_column).to_plain_string().as_deref(),
            field(row, &self.last_column).to_plain_string().as_deref(),
        )
    }
}

/// Matching and write-validation settings
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileOptions {
    pub identity: IdentityFields,
    /// Reject rows with empty identities or undeclared columns
    pub strict_validation: bool,
}

/// Case-folded `(first, last)` composite.
///
/// Missing values fold to `""`, so rows lacking both names all share the
/// same (degenerate) key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdentityKey(String);

impl IdentityKey {
    pub fn new(first: Option<&str>, last: Option<&str>) -> Self {
        Self(format!(
            "{}{}{}",
            first.unwrap_or_default().to_lowercase(),
            KEY_SEPARATOR,
            last.unwrap_or_default().to_lowercase()
        ))
    }

    /// Both name parts empty
    pub fn is_degenerate(&self) -> bool {
        self.0.len() == KEY_SEPARATOR.len_utf8()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// A stored row as seen by the reconciler (already decrypted)
#[derive(Debug, Clone, PartialEq)]
pub struct ExistingRow {
    pub id: Uuid,
    pub fields: FieldMap,
}

/// Where a planned update lands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateTarget {
    /// A row already in the store
    Existing(Uuid),
    /// A row created earlier in the same batch (index into `to_create`)
    Pending(usize),
}

/// One planned field-map replacement
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedUpdate {
    pub target: UpdateTarget,
    /// Index of the incoming row this update came from
    pub source_index: usize,
    pub fields: FieldMap,
}

/// Result of partitioning an incoming batch
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpsertPlan {
    /// Replacements, in batch order; later entries for the same target win
    pub to_update: Vec<PlannedUpdate>,
    pub to_create: Vec<FieldMap>,
}

impl UpsertPlan {
    pub fn is_empty(&self) -> bool {
        self.to_update.is_empty() && self.to_create.is_empty()
    }
}

/// Split `incoming` into creates and updates.
///
/// Each incoming row is matched by identity key, first against `existing`
/// (first stored row with a key wins), then against rows created earlier in
/// this batch. A match routes the row to `to_update` carrying its whole
/// field map as a replacement; no match routes it to `to_create`.
pub fn partition_upsert(
    existing: &[ExistingRow],
    incoming: Vec<FieldMap>,
    identity: &IdentityFields,
) -> UpsertPlan {
    let mut lookup: HashMap<IdentityKey, UpdateTarget> = HashMap::with_capacity(existing.len());
    for row in existing {
        lookup
            .entry(identity.key_of(&row.fields))
            .or_insert(UpdateTarget::Existing(row.id));
    }

    let mut plan = UpsertPlan::default();
    for (source_index, fields) in incoming.into_iter().enumerate() {
        let key = identity.key_of(&fields);
        match lookup.get(&key) {
            Some(target) => plan.to_update.push(PlannedUpdate {
                target: *target,
                source_index,
                fields,
            }),
            None => {
                lookup.insert(key, UpdateTarget::Pending(plan.to_create.len()));
                plan.to_create.push(fields);
            }
        }
    }
    plan
}

/// Indexes of rows whose identity columns are both empty
pub fn degenerate_rows(rows: &[FieldMap], identity: &IdentityFields) -> Vec<usize> {
    rows.iter()
        .enumerate()
        .filter(|(_, row)| identity.key_of(row).is_degenerate())
        .map(|(i, _)| i)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::field_map;

    #[test]
    fn test_key_is_case_insensitive() {
        let identity = IdentityFields::default();
        let a = identity.key_of(&field_map([("Student First", "jane"), ("Student Last", "DOE")]));
        let b = identity.key_of(&field_map([("Student First", "Jane"), ("Student Last", "Doe")]));
        assert_eq!(a, b);
    }

    #[test]
    fn test_key_does_not_merge_across_name_boundary() {
        let identity = IdentityFields::default();
        let a = identity.key_of(&field_map([("Student First", "Ann"), ("Student Last", "aLee")]));
        let b = identity.key_of(&field_map([("Student First", "Anna"), ("Student Last", "Lee")]));
        assert_ne!(a, b);
    }

    #[test]
    fn test_degenerate_key() {
        let identity = IdentityFields::default();
        assert!(identity.key_of(&FieldMap::new()).is_degenerate());
        assert!(!identity
            .key_of(&field_map([("Student Last", "Doe")]))
            .is_degenerate());
    }

    #[test]
    fn test_first_existing_row_wins_key_collision() {
        let identity = IdentityFields::default();
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();
        let existing = vec![
            ExistingRow {
                id: first,
                fields: field_map([("Student First", "Jo"), ("Student Last", "Ray")]),
            },
            ExistingRow {
                id: second,
                fields: field_map([("Student First", "JO"), ("Student Last", "RAY")]),
            },
        ];
        let plan = partition_upsert(
            &existing,
            vec![field_map([("Student First", "jo"), ("Student Last", "ray")])],
            &identity,
        );
        assert_eq!(plan.to_update[0].target, UpdateTarget::Existing(first));
    }

    #[test]
    fn test_custom_identity_columns() {
        let identity = IdentityFields::new("First", "Last");
        let id = Uuid::new_v4();
        let existing = vec![ExistingRow {
            id,
            fields: field_map([("First", "Kim"), ("Last", "Park")]),
        }];
        let plan = partition_upsert(
            &existing,
            vec![field_map([("First", "KIM"), ("Last", "park"), ("Part", "Alto")])],
            &identity,
        );
        assert!(plan.to_create.is_empty());
        assert_eq!(plan.to_update[0].target, UpdateTarget::Existing(id));
    }
}
