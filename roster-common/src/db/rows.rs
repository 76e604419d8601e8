//! Sheet row persistence
//!
//! Rows are stored exactly as handed in: callers encrypt before writing and
//! decrypt after reading. Row order within a sheet is insertion order.

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row as _, SqliteExecutor, SqlitePool};
use uuid::Uuid;

use super::{parse_guid, StoredRow};
use crate::fields::StoredFields;
use crate::{Error, Result};

const ROW_COLUMNS: &str = "guid, sheet_id, data, created_at, updated_at";

fn stored_row_from(row: &SqliteRow) -> Result<StoredRow> {
    let guid: String = row.try_get("guid")?;
    let sheet_id: String = row.try_get("sheet_id")?;
    let data: String = row.try_get("data")?;

    let data = match serde_json::from_str::<Value>(&data)
        .map_err(|e| Error::Corrupt(format!("row {} data: {}", guid, e)))?
    {
        Value::Object(map) => map,
        other => {
            return Err(Error::Corrupt(format!(
                "row {} data is not an object: {}",
                guid, other
            )))
        }
    };

    Ok(StoredRow {
        id: parse_guid(&guid)?,
        sheet_id: parse_guid(&sheet_id)?,
        data,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
        updated_at: row.try_get::<DateTime<Utc>, _>("updated_at")?,
    })
}

/// All rows of a sheet, oldest first
pub async fn find_rows_by_sheet<'e, E>(executor: E, sheet_id: Uuid) -> Result<Vec<StoredRow>>
where
    E: SqliteExecutor<'e>,
{
    let rows = sqlx::query(&format!(
        "SELECT {} FROM sheet_rows WHERE sheet_id = ? ORDER BY rowid",
        ROW_COLUMNS
    ))
    .bind(sheet_id.to_string())
    .fetch_all(executor)
    .await?;

    rows.iter().map(stored_row_from).collect()
}

/// One row by id
pub async fn find_row<'e, E>(executor: E, row_id: Uuid) -> Result<Option<StoredRow>>
where
    E: SqliteExecutor<'e>,
{
    let row = sqlx::query(&format!("SELECT {} FROM sheet_rows WHERE guid = ?", ROW_COLUMNS))
        .bind(row_id.to_string())
        .fetch_optional(executor)
        .await?;

    row.as_ref().map(stored_row_from).transpose()
}

/// Insert one row
pub async fn insert_row<'e, E>(executor: E, sheet_id: Uuid, data: StoredFields) -> Result<StoredRow>
where
    E: SqliteExecutor<'e>,
{
    let now = Utc::now();
    let row = StoredRow {
        id: Uuid::new_v4(),
        sheet_id,
        data,
        created_at: now,
        updated_at: now,
    };

    sqlx::query(
        "INSERT INTO sheet_rows (guid, sheet_id, data, created_at, updated_at) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(row.id.to_string())
    .bind(sheet_id.to_string())
    .bind(serde_json::to_string(&row.data)?)
    .bind(row.created_at)
    .bind(row.updated_at)
    .execute(executor)
    .await?;

    Ok(row)
}

/// Insert a batch in one transaction; nothing is written if any insert fails
pub async fn insert_rows(
    pool: &SqlitePool,
    sheet_id: Uuid,
    batch: Vec<StoredFields>,
) -> Result<Vec<StoredRow>> {
    let mut tx = pool.begin().await?;
    let mut inserted = Vec::with_capacity(batch.len());
    for data in batch {
        inserted.push(insert_row(&mut *tx, sheet_id, data).await?);
    }
    tx.commit().await?;
    Ok(inserted)
}

/// Replace a row's field map; `None` if the row does not exist
pub async fn update_row_fields<'e, E>(
    executor: E,
    row_id: Uuid,
    data: &StoredFields,
) -> Result<Option<StoredRow>>
where
    E: SqliteExecutor<'e>,
{
    let row = sqlx::query(&format!(
        "UPDATE sheet_rows SET data = ?, updated_at = ? WHERE guid = ? RETURNING {}",
        ROW_COLUMNS
    ))
    .bind(serde_json::to_string(data)?)
    .bind(Utc::now())
    .bind(row_id.to_string())
    .fetch_optional(executor)
    .await?;

    row.as_ref().map(stored_row_from).transpose()
}

/// Delete one row; false if it did not exist
pub async fn delete_row<'e, E>(executor: E, row_id: Uuid) -> Result<bool>
where
    E: SqliteExecutor<'e>,
{
    let result = sqlx::query("DELETE FROM sheet_rows WHERE guid = ?")
        .bind(row_id.to_string())
        .execute(executor)
        .await?;

    Ok(result.rows_affected() > 0)
}

/// Delete every row of a sheet, returning how many were removed
pub async fn delete_rows_by_sheet<'e, E>(executor: E, sheet_id: Uuid) -> Result<u64>
where
    E: SqliteExecutor<'e>,
{
    let result = sqlx::query("DELETE FROM sheet_rows WHERE sheet_id = ?")
        .bind(sheet_id.to_string())
        .execute(executor)
        .await?;

    Ok(result.rows_affected())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{init_memory_database, sheets};
    use serde_json::json;

    fn data(value: Value) -> StoredFields {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[tokio::test]
    async fn test_insert_and_find_in_order() {
        let pool = init_memory_database().await.unwrap();
        let sheet = sheets::create_sheet(&pool, "Band", &[]).await.unwrap();

        let rows = insert_rows(
            &pool,
            sheet.id,
            vec![data(json!({"a": "1"})), data(json!({"a": "2"})), data(json!({"a": "3"}))],
        )
        .await
        .unwrap();
        assert_eq!(rows.len(), 3);

        let found = find_rows_by_sheet(&pool, sheet.id).await.unwrap();
        let values: Vec<&Value> = found.iter().map(|r| &r.data["a"]).collect();
        assert_eq!(values, vec![&json!("1"), &json!("2"), &json!("3")]);
    }

    #[tokio::test]
    async fn test_insert_rows_unknown_sheet_writes_nothing() {
        let pool = init_memory_database().await.unwrap();
        let missing = Uuid::new_v4();

        let result = insert_rows(&pool, missing, vec![data(json!({"a": "1"}))]).await;
        assert!(result.is_err(), "foreign key should reject the batch");

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sheet_rows")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_update_replaces_data() {
        let pool = init_memory_database().await.unwrap();
        let sheet = sheets::create_sheet(&pool, "Band", &[]).await.unwrap();
        let row = insert_row(&pool, sheet.id, data(json!({"a": "1", "b": "2"})))
            .await
            .unwrap();

        let updated = update_row_fields(&pool, row.id, &data(json!({"a": "9"})))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.data, data(json!({"a": "9"})));
        assert_eq!(updated.created_at, row.created_at);

        assert!(update_row_fields(&pool, Uuid::new_v4(), &StoredFields::new())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_delete_and_cascade() {
        let pool = init_memory_database().await.unwrap();
        let sheet = sheets::create_sheet(&pool, "Band", &[]).await.unwrap();
        let a = insert_row(&pool, sheet.id, StoredFields::new()).await.unwrap();
        insert_row(&pool, sheet.id, StoredFields::new()).await.unwrap();
        insert_row(&pool, sheet.id, StoredFields::new()).await.unwrap();

        assert!(delete_row(&pool, a.id).await.unwrap());
        assert!(find_row(&pool, a.id).await.unwrap().is_none());
        assert_eq!(delete_rows_by_sheet(&pool, sheet.id).await.unwrap(), 2);

        insert_row(&pool, sheet.id, StoredFields::new()).await.unwrap();
        sheets::delete_sheet(&pool, sheet.id).await.unwrap();
        assert!(find_rows_by_sheet(&pool, sheet.id).await.unwrap().is_empty());
    }
}
