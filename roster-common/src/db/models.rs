//! Database models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::fields::{FieldMap, StoredFields};

/// A named table definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sheet {
    #[serde(rename = "_id")]
    pub id: Uuid,
    pub name: String,
    pub columns: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A row as persisted: field values are ciphertext
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRow {
    pub id: Uuid,
    pub sheet_id: Uuid,
    pub data: StoredFields,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A decrypted row as returned to callers.
///
/// Serializes flat: `{"_id", "sheetId", <columns...>, "createdAt", "updatedAt"}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Row {
    #[serde(rename = "_id")]
    pub id: Uuid,
    pub sheet_id: Uuid,
    #[serde(flatten)]
    pub fields: FieldMap,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Registered account
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    #[serde(rename = "_id")]
    pub id: Uuid,
    pub full_name: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}

/// Identity attached to an authenticated request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallerIdentity {
    pub user_id: Uuid,
    pub email: String,
}

/// Extra recipients for bulk emails (singleton record)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtraEmails {
    #[serde(default)]
    pub director_emails: Vec<String>,
    #[serde(default)]
    pub other_emails: Vec<String>,
    #[serde(default, skip_deserializing)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl ExtraEmails {
    /// Director addresses followed by the other addresses
    pub fn all(&self) -> impl Iterator<Item = &str> {
        self.director_emails
            .iter()
            .chain(self.other_emails.iter())
            .map(String::as_str)
    }
}
