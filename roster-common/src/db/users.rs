//! Account persistence

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row as _, SqlitePool};
use uuid::Uuid;

use super::{is_unique_violation, parse_guid, User};
use crate::{Error, Result};

fn user_from_row(row: &SqliteRow) -> Result<User> {
    let guid: String = row.try_get("guid")?;
    Ok(User {
        id: parse_guid(&guid)?,
        full_name: row.try_get("full_name")?,
        email: row.try_get("email")?,
        password_hash: row.try_get("password_hash")?,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
    })
}

/// Insert a new account. The email is stored lowercased; a second account
/// with the same email is a [`Error::Conflict`].
pub async fn create_user(
    pool: &SqlitePool,
    full_name: &str,
    email: &str,
    password_hash: &str,
) -> Result<User> {
    let user = User {
        id: Uuid::new_v4(),
        full_name: full_name.to_string(),
        email: email.trim().to_lowercase(),
        password_hash: password_hash.to_string(),
        created_at: Utc::now(),
    };

    sqlx::query(
        "INSERT INTO users (guid, full_name, email, password_hash, created_at) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(user.id.to_string())
    .bind(&user.full_name)
    .bind(&user.email)
    .bind(&user.password_hash)
    .bind(user.created_at)
    .execute(pool)
    .await
    .map_err(|e| {
        if is_unique_violation(&e) {
            Error::Conflict("User already exists".to_string())
        } else {
            Error::Database(e)
        }
    })?;

    Ok(user)
}

/// Look up an account by email (case-insensitive)
pub async fn find_user_by_email(pool: &SqlitePool, email: &str) -> Result<Option<User>> {
    let row = sqlx::query(
        "SELECT guid, full_name, email, password_hash, created_at FROM users WHERE email = ?",
    )
    .bind(email.trim().to_lowercase())
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(user_from_row).transpose()
}
