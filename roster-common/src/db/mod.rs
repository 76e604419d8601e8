//! Database models and queries
//!
//! Row and sheet queries are generic over [`sqlx::SqliteExecutor`] so they
//! run against a pool or inside a caller's transaction (`&mut *tx`).

pub mod extra_emails;
pub mod init;
pub mod models;
pub mod rows;
pub mod sessions;
pub mod sheets;
pub mod users;

pub use init::*;
pub use models::*;

use uuid::Uuid;

use crate::{Error, Result};

/// Parse a TEXT guid column
pub(crate) fn parse_guid(value: &str) -> Result<Uuid> {
    Uuid::parse_str(value).map_err(|e| Error::Corrupt(format!("invalid guid '{}': {}", value, e)))
}

/// True when `err` is a UNIQUE constraint violation
pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}
