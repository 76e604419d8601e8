//! Roster service
//!
//! Wires the field cipher, the reconciler and the SQLite store together.
//! Every read-match-write sequence on a sheet (upsert, CSV import, sheet
//! edit, sheet delete) runs under that sheet's async mutex with its write
//! phase in a single transaction, so concurrent imports into one sheet
//! cannot both create the same student and a failed batch leaves nothing
//! behind. Separate processes sharing a database are not serialized.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::Serialize;
use sqlx::SqlitePool;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cipher::{is_system_field, FieldCipher};
use crate::csv_io::{parse_csv, write_csv};
use crate::db::{rows, sheets, Row, Sheet, StoredRow};
use crate::fields::{FieldMap, FieldValue};
use crate::reconcile::{
    combine_sheets, degenerate_rows, partition_upsert, ExistingRow, IdentityKey, ReconcileOptions,
    SheetRows, UpdateTarget,
};
use crate::registry::{SheetLocks, SheetRegistry};
use crate::view::{filter_rows, search_rows, sort_rows, RowFilter, SortKey};
use crate::{Error, Result};

/// System field carrying a row's id inside combined views
pub const VIEW_ROW_ID_FIELD: &str = "_id";

/// System field carrying a row's sheet inside combined views
pub const VIEW_SHEET_ID_FIELD: &str = "_sheetId";

/// A row that could not be decrypted
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RowError {
    pub row_id: Uuid,
    pub message: String,
}

/// Sheet plus its decrypted rows
#[derive(Debug, Clone, Serialize)]
pub struct SheetWithRows {
    #[serde(flatten)]
    pub sheet: Sheet,
    pub rows: Vec<Row>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<RowError>,
}

/// Result of an upsert batch
#[derive(Debug, Clone, Default, Serialize)]
pub struct UpsertOutcome {
    /// New rows, in batch order, with their final field maps
    pub created: Vec<Row>,
    /// Pre-existing rows that were replaced, one entry per row
    pub updated: Vec<Row>,
}

/// Combined view request
#[derive(Debug, Clone, Default)]
pub struct ViewQuery {
    /// Sheets to combine, in order; `None` means every sheet
    pub sheet_ids: Option<Vec<Uuid>>,
    /// Merge rows of the same student
    pub dedupe: bool,
    pub filters: Vec<RowFilter>,
    /// Student name search (first, last, or "first last")
    pub search: Option<String>,
    pub sort: Vec<SortKey>,
}

/// Combined, filtered and sorted rows
#[derive(Debug, Clone, Default, Serialize)]
pub struct CombinedView {
    pub columns: Vec<String>,
    pub rows: Vec<FieldMap>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub skipped: Vec<RowError>,
}

/// Rename stored field keys after a sheet's columns change.
///
/// Position `i` of `old_columns` maps to position `i` of `new_columns`.
/// Old columns without a counterpart are dropped, as are keys that were
/// not declared columns. Missing values stay missing.
pub fn migrate_columns(old_columns: &[String], new_columns: &[String], fields: &FieldMap) -> FieldMap {
    let mut migrated = FieldMap::new();
    for (old, new) in old_columns.iter().zip(new_columns.iter()) {
        if let Some(value) = fields.get(old) {
            migrated.insert(new.clone(), value.clone());
        }
    }
    migrated
}

/// Sheet name must be non-blank; column names non-blank and distinct
pub fn validate_sheet_definition(name: &str, columns: &[String]) -> Result<()> {
    if name.trim().is_empty() {
        return Err(Error::InvalidInput("Sheet name is required".to_string()));
    }
    let mut seen = HashSet::new();
    for column in columns {
        if column.trim().is_empty() {
            return Err(Error::InvalidInput("Column names must not be blank".to_string()));
        }
        if !seen.insert(column.as_str()) {
            return Err(Error::InvalidInput(format!("Duplicate column '{}'", column)));
        }
    }
    Ok(())
}

fn row_from(stored: &StoredRow, fields: FieldMap) -> Row {
    Row {
        id: stored.id,
        sheet_id: stored.sheet_id,
        fields,
        created_at: stored.created_at,
        updated_at: stored.updated_at,
    }
}

/// The roster service
pub struct Roster {
    pool: SqlitePool,
    cipher: Arc<FieldCipher>,
    options: ReconcileOptions,
    registry: SheetRegistry,
    locks: SheetLocks,
}

impl Roster {
    pub fn new(pool: SqlitePool, cipher: Arc<FieldCipher>, options: ReconcileOptions) -> Self {
        Self {
            pool,
            cipher,
            options,
            registry: SheetRegistry::new(),
            locks: SheetLocks::new(),
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn options(&self) -> &ReconcileOptions {
        &self.options
    }

    // ========================================
    // Sheets
    // ========================================

    pub async fn get_sheet(&self, sheet_id: Uuid) -> Result<Sheet> {
        self.registry.get(&self.pool, sheet_id).await
    }

    /// Every sheet with its decrypted rows. Rows that fail to decrypt are
    /// reported in `errors` instead of failing the whole listing.
    pub async fn list_sheets(&self) -> Result<Vec<SheetWithRows>> {
        let all = sheets::list_sheets(&self.pool).await?;
        let mut listing = Vec::with_capacity(all.len());
        for sheet in all {
            let stored = rows::find_rows_by_sheet(&self.pool, sheet.id).await?;
            let (rows, errors) = self.decrypt_lenient(stored);
            listing.push(SheetWithRows { sheet, rows, errors });
        }
        Ok(listing)
    }

    /// One sheet with its decrypted rows
    pub async fn sheet_with_rows(&self, sheet_id: Uuid) -> Result<SheetWithRows> {
        let sheet = self.get_sheet(sheet_id).await?;
        let stored = rows::find_rows_by_sheet(&self.pool, sheet_id).await?;
        let (rows, errors) = self.decrypt_lenient(stored);
        Ok(SheetWithRows { sheet, rows, errors })
    }

    pub async fn add_sheet(&self, name: &str, columns: Vec<String>) -> Result<Sheet> {
        validate_sheet_definition(name, &columns)?;
        let sheet = sheets::create_sheet(&self.pool, name.trim(), &columns).await?;
        info!("Created sheet {} with {} columns", sheet.id, sheet.columns.len());
        self.registry.insert(sheet.clone()).await;
        Ok(sheet)
    }

    /// Rename a sheet and/or change its columns, migrating every row's keys
    /// positionally (see [`migrate_columns`])
    pub async fn update_sheet(&self, sheet_id: Uuid, name: &str, columns: Vec<String>) -> Result<Sheet> {
        validate_sheet_definition(name, &columns)?;
        let (_guard, original) = self.lock_sheet(sheet_id).await?;

        let stored = rows::find_rows_by_sheet(&self.pool, sheet_id).await?;
        let columns_changed = original.columns != columns;
        let mut migrated = Vec::new();
        if columns_changed {
            migrated.reserve(stored.len());
            for row in &stored {
                let fields = self.decrypt_stored(row)?;
                let fields = migrate_columns(&original.columns, &columns, &fields);
                migrated.push((row.id, self.cipher.encrypt_row(&fields)));
            }
        }

        let mut tx = self.pool.begin().await?;
        let updated = sheets::update_sheet(&mut *tx, sheet_id, name.trim(), &columns)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Sheet {} not found", sheet_id)))?;
        for (row_id, data) in &migrated {
            rows::update_row_fields(&mut *tx, *row_id, data).await?;
        }
        tx.commit().await?;

        self.registry.invalidate(sheet_id).await;
        info!(
            "Updated sheet {} ({} rows migrated)",
            sheet_id,
            migrated.len()
        );
        Ok(updated)
    }

    /// Delete a sheet and all of its rows; returns the number of rows removed
    pub async fn delete_sheet(&self, sheet_id: Uuid) -> Result<u64> {
        let (guard, _) = self.lock_sheet(sheet_id).await?;

        let mut tx = self.pool.begin().await?;
        let removed = rows::delete_rows_by_sheet(&mut *tx, sheet_id).await?;
        sheets::delete_sheet(&mut *tx, sheet_id).await?;
        tx.commit().await?;

        self.registry.invalidate(sheet_id).await;
        drop(guard);
        self.locks.forget(sheet_id).await;
        info!("Deleted sheet {} and {} rows", sheet_id, removed);
        Ok(removed)
    }

    // ========================================
    // Rows
    // ========================================

    /// Insert-or-replace a batch by student identity.
    ///
    /// Incoming rows matching an existing row (or an earlier row of the
    /// same batch) replace its field map wholesale. The batch is
    /// all-or-nothing.
    pub async fn upsert_rows(&self, sheet_id: Uuid, incoming: Vec<FieldMap>) -> Result<UpsertOutcome> {
        let (_guard, sheet) = self.lock_sheet(sheet_id).await?;
        let incoming = incoming
            .into_iter()
            .map(|fields| self.prepare_fields(&sheet, fields))
            .collect::<Result<Vec<_>>>()?;
        self.check_identities(&incoming)?;

        let stored = rows::find_rows_by_sheet(&self.pool, sheet_id).await?;
        let existing = stored
            .iter()
            .map(|row| {
                Ok(ExistingRow {
                    id: row.id,
                    fields: self.decrypt_stored(row)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let plan = partition_upsert(&existing, incoming, &self.options.identity);
        debug!(
            "Upsert into sheet {}: {} to create, {} to update",
            sheet_id,
            plan.to_create.len(),
            plan.to_update.len()
        );

        let mut tx = self.pool.begin().await?;

        let mut created: Vec<(StoredRow, FieldMap)> = Vec::with_capacity(plan.to_create.len());
        for fields in plan.to_create {
            let row = rows::insert_row(&mut *tx, sheet_id, self.cipher.encrypt_row(&fields)).await?;
            created.push((row, fields));
        }

        let mut updated: Vec<(StoredRow, FieldMap)> = Vec::new();
        let mut updated_slot: HashMap<Uuid, usize> = HashMap::new();
        for update in plan.to_update {
            let target_id = match update.target {
                UpdateTarget::Existing(id) => id,
                UpdateTarget::Pending(index) => created[index].0.id,
            };
            let row = rows::update_row_fields(&mut *tx, target_id, &self.cipher.encrypt_row(&update.fields))
                .await?
                .ok_or_else(|| Error::NotFound(format!("Row {} not found", target_id)))?;

            match update.target {
                UpdateTarget::Pending(index) => created[index] = (row, update.fields),
                UpdateTarget::Existing(id) => match updated_slot.get(&id) {
                    Some(&slot) => updated[slot] = (row, update.fields),
                    None => {
                        updated_slot.insert(id, updated.len());
                        updated.push((row, update.fields));
                    }
                },
            }
        }

        tx.commit().await?;

        info!(
            "Upserted into sheet {}: {} created, {} updated",
            sheet_id,
            created.len(),
            updated.len()
        );
        let to_rows = |pairs: Vec<(StoredRow, FieldMap)>| -> Vec<Row> {
            pairs
                .into_iter()
                .map(|(row, fields)| row_from(&row, fields))
                .collect()
        };
        Ok(UpsertOutcome {
            created: to_rows(created),
            updated: to_rows(updated),
        })
    }

    /// Upsert one row
    pub async fn upsert_row(&self, sheet_id: Uuid, fields: FieldMap) -> Result<Row> {
        let outcome = self.upsert_rows(sheet_id, vec![fields]).await?;
        outcome
            .created
            .into_iter()
            .chain(outcome.updated)
            .next()
            .ok_or_else(|| Error::Internal("upsert of one row produced no row".to_string()))
    }

    /// Replace a row's field map
    pub async fn update_row(&self, row_id: Uuid, fields: FieldMap) -> Result<Row> {
        let current = rows::find_row(&self.pool, row_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Row {} not found", row_id)))?;
        let (_guard, sheet) = self.lock_sheet(current.sheet_id).await?;
        let fields = self.prepare_fields(&sheet, fields)?;

        let stored = rows::update_row_fields(&self.pool, row_id, &self.cipher.encrypt_row(&fields))
            .await?
            .ok_or_else(|| Error::NotFound(format!("Row {} not found", row_id)))?;

        debug!("Updated row {}", row_id);
        Ok(row_from(&stored, fields))
    }

    pub async fn delete_row(&self, row_id: Uuid) -> Result<()> {
        if !rows::delete_row(&self.pool, row_id).await? {
            return Err(Error::NotFound(format!("Row {} not found", row_id)));
        }
        debug!("Deleted row {}", row_id);
        Ok(())
    }

    /// First row of the sheet whose identity matches `(first, last)`,
    /// case-insensitively
    pub async fn find_row_by_identity(&self, sheet_id: Uuid, first: &str, last: &str) -> Result<Option<Row>> {
        self.get_sheet(sheet_id).await?;
        let wanted = IdentityKey::new(Some(first), Some(last));
        for stored in rows::find_rows_by_sheet(&self.pool, sheet_id).await? {
            let fields = self.decrypt_stored(&stored)?;
            if self.options.identity.key_of(&fields) == wanted {
                return Ok(Some(row_from(&stored, fields)));
            }
        }
        Ok(None)
    }

    // ========================================
    // CSV
    // ========================================

    /// Upsert every record of a CSV document
    pub async fn import_csv(&self, sheet_id: Uuid, csv_text: &str) -> Result<UpsertOutcome> {
        let table = parse_csv(csv_text)?;
        info!(
            "Importing {} CSV records into sheet {}",
            table.rows.len(),
            sheet_id
        );
        self.upsert_rows(sheet_id, table.rows).await
    }

    /// Sheet rows as CSV under the sheet's columns
    pub async fn export_csv(&self, sheet_id: Uuid) -> Result<String> {
        let sheet = self.get_sheet(sheet_id).await?;
        let stored = rows::find_rows_by_sheet(&self.pool, sheet_id).await?;
        let fields = stored
            .iter()
            .map(|row| self.decrypt_stored(row))
            .collect::<Result<Vec<_>>>()?;
        write_csv(&sheet.columns, &fields)
    }

    // ========================================
    // Combined view
    // ========================================

    /// Combine sheets, then filter and sort.
    ///
    /// Rows that fail to decrypt are left out and listed in `skipped`.
    pub async fn combined_view(&self, query: &ViewQuery) -> Result<CombinedView> {
        let selected = match &query.sheet_ids {
            Some(ids) => {
                let mut selected = Vec::with_capacity(ids.len());
                for id in ids {
                    selected.push(self.get_sheet(*id).await?);
                }
                selected
            }
            None => sheets::list_sheets(&self.pool).await?,
        };

        let mut skipped = Vec::new();
        let mut inputs = Vec::with_capacity(selected.len());
        for sheet in selected {
            let stored = rows::find_rows_by_sheet(&self.pool, sheet.id).await?;
            let (decrypted, errors) = self.decrypt_lenient(stored);
            skipped.extend(errors);
            let rows = decrypted
                .into_iter()
                .map(|row| {
                    let mut fields = row.fields;
                    fields.insert(VIEW_ROW_ID_FIELD.to_string(), FieldValue::from(row.id.to_string()));
                    fields.insert(
                        VIEW_SHEET_ID_FIELD.to_string(),
                        FieldValue::from(row.sheet_id.to_string()),
                    );
                    fields
                })
                .collect();
            inputs.push(SheetRows {
                columns: sheet.columns,
                rows,
            });
        }

        let combined = combine_sheets(&inputs, query.dedupe, &self.options.identity);
        let mut rows = filter_rows(combined.rows, &query.filters);
        if let Some(term) = &query.search {
            rows = search_rows(rows, term, &self.options.identity);
        }
        sort_rows(&mut rows, &query.sort);

        Ok(CombinedView {
            columns: combined.columns,
            rows,
            skipped,
        })
    }

    // ========================================
    // Helpers
    // ========================================

    fn decrypt_stored(&self, stored: &StoredRow) -> Result<FieldMap> {
        self.cipher.decrypt_row(&stored.data).map_err(|e| {
            warn!("Row {} failed to decrypt: {}", stored.id, e);
            Error::Cipher(e)
        })
    }

    fn decrypt_lenient(&self, stored: Vec<StoredRow>) -> (Vec<Row>, Vec<RowError>) {
        let mut rows = Vec::with_capacity(stored.len());
        let mut errors = Vec::new();
        for row in stored {
            match self.decrypt_stored(&row) {
                Ok(fields) => rows.push(row_from(&row, fields)),
                Err(e) => errors.push(RowError {
                    row_id: row.id,
                    message: e.to_string(),
                }),
            }
        }
        (rows, errors)
    }

    /// Drop system keys; reject or log keys that are not sheet columns
    /// Take the sheet's write lock and read its current definition.
    ///
    /// The definition is re-read under the lock so a writer queued behind
    /// an edit or delete sees the outcome. A missing sheet releases its
    /// lock entry before returning `NotFound`.
    async fn lock_sheet(&self, sheet_id: Uuid) -> Result<(OwnedMutexGuard<()>, Sheet)> {
        let guard = self.locks.lock(sheet_id).await;
        match sheets::get_sheet(&self.pool, sheet_id).await? {
            Some(sheet) => Ok((guard, sheet)),
            None => {
                drop(guard);
                self.locks.forget(sheet_id).await;
                Err(Error::NotFound(format!("Sheet {} not found", sheet_id)))
            }
        }
    }

    fn prepare_fields(&self, sheet: &Sheet, mut fields: FieldMap) -> Result<FieldMap> {
        fields.retain(|key, _| !is_system_field(key));

        let undeclared: Vec<&str> = fields
            .keys()
            .filter(|key| !sheet.columns.contains(key))
            .map(String::as_str)
            .collect();
        if !undeclared.is_empty() {
            if self.options.strict_validation {
                return Err(Error::InvalidInput(format!(
                    "Unknown columns for sheet '{}': {}",
                    sheet.name,
                    undeclared.join(", ")
                )));
            }
            warn!(
                "Sheet {} write carries undeclared columns: {}",
                sheet.id,
                undeclared.join(", ")
            );
        }
        Ok(fields)
    }

    fn check_identities(&self, incoming: &[FieldMap]) -> Result<()> {
        let degenerate = degenerate_rows(incoming, &self.options.identity);
        if degenerate.is_empty() {
            return Ok(());
        }
        if self.options.strict_validation {
            let indexes: Vec<String> = degenerate.iter().map(usize::to_string).collect();
            return Err(Error::InvalidInput(format!(
                "Rows missing both '{}' and '{}': {}",
                self.options.identity.first_column,
                self.options.identity.last_column,
                indexes.join(", ")
            )));
        }
        warn!(
            "{} incoming rows have an empty identity and will be matched together",
            degenerate.len()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cipher::CipherMode;
    use crate::db::init_memory_database;
    use crate::fields::field_map;
    use std::time::Duration;

    async fn roster_with(options: ReconcileOptions) -> Roster {
        let pool = init_memory_database().await.unwrap();
        let cipher = FieldCipher::new([7u8; 32], CipherMode::FixedIv);
        Roster::new(pool, Arc::new(cipher), options)
    }

    async fn roster() -> Roster {
        roster_with(ReconcileOptions::default()).await
    }

    fn columns() -> Vec<String> {
        vec!["Student First".to_string(), "Student Last".to_string()]
    }

    #[tokio::test]
    async fn test_missing_sheets_leave_no_lock_entries() {
        let roster = roster().await;

        for _ in 0..50 {
            let id = Uuid::new_v4();
            let updated = roster.update_sheet(id, "Band", columns()).await;
            assert!(matches!(updated, Err(Error::NotFound(_))));
            assert!(matches!(roster.delete_sheet(id).await, Err(Error::NotFound(_))));
            let upserted = roster
                .upsert_row(id, field_map([("Student First", "Amy")]))
                .await;
            assert!(matches!(upserted, Err(Error::NotFound(_))));
        }

        assert_eq!(roster.locks.len().await, 0);
    }

    #[tokio::test]
    async fn test_upsert_queued_behind_delete_reports_not_found() {
        let roster = Arc::new(roster().await);
        let sheet = roster.add_sheet("Band", columns()).await.unwrap();

        let guard = roster.locks.lock(sheet.id).await;
        let writer = {
            let roster = Arc::clone(&roster);
            tokio::spawn(async move {
                roster
                    .upsert_row(sheet.id, field_map([("Student First", "Amy"), ("Student Last", "Lee")]))
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        // Delete while the writer waits on the lock
        assert!(sheets::delete_sheet(&roster.pool, sheet.id).await.unwrap());
        roster.registry.invalidate(sheet.id).await;
        drop(guard);

        let outcome = writer.await.unwrap();
        assert!(matches!(outcome, Err(Error::NotFound(_))));
        assert_eq!(rows::find_rows_by_sheet(&roster.pool, sheet.id).await.unwrap().len(), 0);
        assert_eq!(roster.locks.len().await, 0);
    }

    #[tokio::test]
    async fn test_update_row_sees_columns_edited_while_waiting() {
        let options = ReconcileOptions {
            strict_validation: true,
            ..ReconcileOptions::default()
        };
        let roster = Arc::new(roster_with(options).await);
        let sheet = roster.add_sheet("Band", columns()).await.unwrap();
        let row = roster
            .upsert_row(sheet.id, field_map([("Student First", "Amy"), ("Student Last", "Lee")]))
            .await
            .unwrap();

        let guard = roster.locks.lock(sheet.id).await;
        let writer = {
            let roster = Arc::clone(&roster);
            tokio::spawn(async move {
                roster
                    .update_row(row.id, field_map([("Student First", "Amy"), ("Student Last", "Lee")]))
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        // Columns renamed while the writer waits: "Student Last" is no longer declared
        let renamed = vec!["Student First".to_string(), "Surname".to_string()];
        sheets::update_sheet(&roster.pool, sheet.id, "Band", &renamed)
            .await
            .unwrap();
        roster.registry.invalidate(sheet.id).await;
        drop(guard);

        let outcome = writer.await.unwrap();
        assert!(matches!(outcome, Err(Error::InvalidInput(_))));
    }
}
