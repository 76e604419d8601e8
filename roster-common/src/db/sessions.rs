//! Login session persistence
//!
//! Only the SHA-256 of a bearer token is stored.

use chrono::{DateTime, Utc};
use sqlx::{Row as _, SqlitePool};
use uuid::Uuid;

use super::{parse_guid, CallerIdentity};
use crate::Result;

/// Record a session for `user_id`
pub async fn create_session(
    pool: &SqlitePool,
    token_hash: &str,
    user_id: Uuid,
    expires_at: DateTime<Utc>,
) -> Result<()> {
    sqlx::query("INSERT INTO sessions (token_hash, user_id, expires_at) VALUES (?, ?, ?)")
        .bind(token_hash)
        .bind(user_id.to_string())
        .bind(expires_at)
        .execute(pool)
        .await?;

    Ok(())
}

/// Resolve an unexpired session to its caller
pub async fn find_caller(
    pool: &SqlitePool,
    token_hash: &str,
    now: DateTime<Utc>,
) -> Result<Option<CallerIdentity>> {
    let row = sqlx::query(
        r#"
        SELECT u.guid, u.email, s.expires_at
        FROM sessions s
        JOIN users u ON u.guid = s.user_id
        WHERE s.token_hash = ?
        "#,
    )
    .bind(token_hash)
    .fetch_optional(pool)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    let expires_at: DateTime<Utc> = row.try_get("expires_at")?;
    if expires_at <= now {
        return Ok(None);
    }

    let guid: String = row.try_get("guid")?;
    Ok(Some(CallerIdentity {
        user_id: parse_guid(&guid)?,
        email: row.try_get("email")?,
    }))
}

/// Remove expired sessions, returning how many were deleted
pub async fn delete_expired_sessions(pool: &SqlitePool, now: DateTime<Utc>) -> Result<u64> {
    let result = sqlx::query("DELETE FROM sessions WHERE expires_at <= ?")
        .bind(now)
        .execute(pool)
        .await?;

    Ok(result.rows_affected())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{init_memory_database, users};
    use chrono::Duration;

    #[tokio::test]
    async fn test_session_lookup_and_expiry() {
        let pool = init_memory_database().await.unwrap();
        let user = users::create_user(&pool, "Ada Director", "ada@school.org", "hash")
            .await
            .unwrap();
        let now = Utc::now();

        create_session(&pool, "live", user.id, now + Duration::hours(1)).await.unwrap();
        create_session(&pool, "stale", user.id, now - Duration::hours(1)).await.unwrap();

        let caller = find_caller(&pool, "live", now).await.unwrap().unwrap();
        assert_eq!(caller.user_id, user.id);
        assert_eq!(caller.email, "ada@school.org");

        assert!(find_caller(&pool, "stale", now).await.unwrap().is_none());
        assert!(find_caller(&pool, "unknown", now).await.unwrap().is_none());

        assert_eq!(delete_expired_sessions(&pool, now).await.unwrap(), 1);
    }
}
