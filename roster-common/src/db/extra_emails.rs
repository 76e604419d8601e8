//! Extra email recipients (singleton record)

use chrono::{DateTime, Utc};
use sqlx::{Row as _, SqlitePool};

use super::ExtraEmails;
use crate::{Error, Result};

fn parse_list(column: &str, raw: &str) -> Result<Vec<String>> {
    serde_json::from_str(raw).map_err(|e| Error::Corrupt(format!("extra_emails.{}: {}", column, e)))
}

/// Load the lists, creating an empty record on first access
pub async fn load_extra_emails(pool: &SqlitePool) -> Result<ExtraEmails> {
    sqlx::query("INSERT OR IGNORE INTO extra_emails (id) VALUES (1)")
        .execute(pool)
        .await?;

    let row = sqlx::query(
        "SELECT director_emails, other_emails, updated_at FROM extra_emails WHERE id = 1",
    )
    .fetch_one(pool)
    .await?;

    let director: String = row.try_get("director_emails")?;
    let other: String = row.try_get("other_emails")?;
    Ok(ExtraEmails {
        director_emails: parse_list("director_emails", &director)?,
        other_emails: parse_list("other_emails", &other)?,
        updated_at: row.try_get::<Option<DateTime<Utc>>, _>("updated_at")?,
    })
}

/// Replace both lists
pub async fn save_extra_emails(pool: &SqlitePool, emails: &ExtraEmails) -> Result<ExtraEmails> {
    let now = Utc::now();
    sqlx::query(
        r#"
        INSERT INTO extra_emails (id, director_emails, other_emails, updated_at)
        VALUES (1, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            director_emails = excluded.director_emails,
            other_emails = excluded.other_emails,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(serde_json::to_string(&emails.director_emails)?)
    .bind(serde_json::to_string(&emails.other_emails)?)
    .bind(now)
    .execute(pool)
    .await?;

    Ok(ExtraEmails {
        director_emails: emails.director_emails.clone(),
        other_emails: emails.other_emails.clone(),
        updated_at: Some(now),
    })
}
