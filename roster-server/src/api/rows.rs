//! Single-row endpoints

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use roster_common::db::Row;
use roster_common::fields::FieldMap;
use uuid::Uuid;

use crate::{ApiResult, AppState};

/// PATCH /api/rows/:row_id
///
/// Replaces the row's field map.
pub async fn update_row(
    State(state): State<AppState>,
    Path(row_id): Path<Uuid>,
    Json(fields): Json<FieldMap>,
) -> ApiResult<Json<Row>> {
    Ok(Json(state.roster.update_row(row_id, fields).await?))
}

/// DELETE /api/rows/:row_id
pub async fn delete_row(
    State(state): State<AppState>,
    Path(row_id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    state.roster.delete_row(row_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
