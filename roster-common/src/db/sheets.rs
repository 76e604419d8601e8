//! Sheet persistence

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row as _, SqliteExecutor};
use uuid::Uuid;

use super::{parse_guid, Sheet};
use crate::{Error, Result};

const SHEET_COLUMNS: &str = "guid, name, columns, created_at, updated_at";

fn sheet_from_row(row: &SqliteRow) -> Result<Sheet> {
    let guid: String = row.try_get("guid")?;
    let columns: String = row.try_get("columns")?;
    Ok(Sheet {
        id: parse_guid(&guid)?,
        name: row.try_get("name")?,
        columns: serde_json::from_str(&columns)
            .map_err(|e| Error::Corrupt(format!("sheet {} columns: {}", guid, e)))?,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
        updated_at: row.try_get::<DateTime<Utc>, _>("updated_at")?,
    })
}

/// Insert a new sheet
pub async fn create_sheet<'e, E>(executor: E, name: &str, columns: &[String]) -> Result<Sheet>
where
    E: SqliteExecutor<'e>,
{
    let now = Utc::now();
    let sheet = Sheet {
        id: Uuid::new_v4(),
        name: name.to_string(),
        columns: columns.to_vec(),
        created_at: now,
        updated_at: now,
    };

    sqlx::query(
        "INSERT INTO sheets (guid, name, columns, created_at, updated_at) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(sheet.id.to_string())
    .bind(&sheet.name)
    .bind(serde_json::to_string(&sheet.columns)?)
    .bind(sheet.created_at)
    .bind(sheet.updated_at)
    .execute(executor)
    .await?;

    Ok(sheet)
}

/// Load one sheet
pub async fn get_sheet<'e, E>(executor: E, sheet_id: Uuid) -> Result<Option<Sheet>>
where
    E: SqliteExecutor<'e>,
{
    let row = sqlx::query(&format!("SELECT {} FROM sheets WHERE guid = ?", SHEET_COLUMNS))
        .bind(sheet_id.to_string())
        .fetch_optional(executor)
        .await?;

    row.as_ref().map(sheet_from_row).transpose()
}

/// All sheets in creation order
pub async fn list_sheets<'e, E>(executor: E) -> Result<Vec<Sheet>>
where
    E: SqliteExecutor<'e>,
{
    let rows = sqlx::query(&format!(
        "SELECT {} FROM sheets ORDER BY created_at, rowid",
        SHEET_COLUMNS
    ))
    .fetch_all(executor)
    .await?;

    rows.iter().map(sheet_from_row).collect()
}

/// Replace a sheet's name and columns; `None` if the sheet does not exist
pub async fn update_sheet<'e, E>(
    executor: E,
    sheet_id: Uuid,
    name: &str,
    columns: &[String],
) -> Result<Option<Sheet>>
where
    E: SqliteExecutor<'e>,
{
    let row = sqlx::query(&format!(
        "UPDATE sheets SET name = ?, columns = ?, updated_at = ? WHERE guid = ? RETURNING {}",
        SHEET_COLUMNS
    ))
    .bind(name)
    .bind(serde_json::to_string(columns)?)
    .bind(Utc::now())
    .bind(sheet_id.to_string())
    .fetch_optional(executor)
    .await?;

    row.as_ref().map(sheet_from_row).transpose()
}

/// Delete a sheet (rows cascade); false if it did not exist
pub async fn delete_sheet<'e, E>(executor: E, sheet_id: Uuid) -> Result<bool>
where
    E: SqliteExecutor<'e>,
{
    let result = sqlx::query("DELETE FROM sheets WHERE guid = ?")
        .bind(sheet_id.to_string())
        .execute(executor)
        .await?;

    Ok(result.rows_affected() > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_memory_database;

    fn cols(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_sheet_crud() {
        let pool = init_memory_database().await.unwrap();

        let created = create_sheet(&pool, "Choir", &cols(&["Student First", "Student Last"]))
            .await
            .unwrap();
        let loaded = get_sheet(&pool, created.id).await.unwrap().unwrap();
        assert_eq!(loaded.name, "Choir");
        assert_eq!(loaded.columns, created.columns);

        let updated = update_sheet(&pool, created.id, "Choir 2", &cols(&["First", "Last"]))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.name, "Choir 2");
        assert_eq!(updated.columns, cols(&["First", "Last"]));

        assert!(delete_sheet(&pool, created.id).await.unwrap());
        assert!(get_sheet(&pool, created.id).await.unwrap().is_none());
        assert!(!delete_sheet(&pool, created.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_list_in_creation_order() {
        let pool = init_memory_database().await.unwrap();
        create_sheet(&pool, "Band", &[]).await.unwrap();
        create_sheet(&pool, "Orchestra", &[]).await.unwrap();

        let names: Vec<String> = list_sheets(&pool)
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.name)
            .collect();
        assert_eq!(names, vec!["Band", "Orchestra"]);
    }

    #[tokio::test]
    async fn test_update_missing_sheet() {
        let pool = init_memory_database().await.unwrap();
        let result = update_sheet(&pool, Uuid::new_v4(), "x", &[]).await.unwrap();
        assert!(result.is_none());
    }
}
