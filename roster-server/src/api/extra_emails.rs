//! Extra bulk-email recipients (directors and other staff)

use axum::{extract::State, Json};
use roster_common::api::auth::is_valid_email;
use roster_common::db::extra_emails::{load_extra_emails, save_extra_emails};
use roster_common::db::ExtraEmails;
use tracing::info;

use crate::{ApiError, ApiResult, AppState};

/// GET /api/extra-emails
pub async fn get_extra_emails(State(state): State<AppState>) -> ApiResult<Json<ExtraEmails>> {
    Ok(Json(load_extra_emails(state.roster.pool()).await?))
}

/// PUT /api/extra-emails
///
/// Replaces both lists. Blank entries are dropped; anything else must look
/// like an address.
pub async fn put_extra_emails(
    State(state): State<AppState>,
    Json(body): Json<ExtraEmails>,
) -> ApiResult<Json<ExtraEmails>> {
    let emails = ExtraEmails {
        director_emails: clean(body.director_emails)?,
        other_emails: clean(body.other_emails)?,
        updated_at: None,
    };
    let saved = save_extra_emails(state.roster.pool(), &emails).await?;
    info!(
        "Saved extra emails: {} director, {} other",
        saved.director_emails.len(),
        saved.other_emails.len()
    );
    Ok(Json(saved))
}

fn clean(addresses: Vec<String>) -> ApiResult<Vec<String>> {
    addresses
        .into_iter()
        .map(|a| a.trim().to_string())
        .filter(|a| !a.is_empty())
        .map(|a| {
            if is_valid_email(&a) {
                Ok(a)
            } else {
                Err(ApiError::BadRequest(format!("Invalid email address: {}", a)))
            }
        })
        .collect()
}
