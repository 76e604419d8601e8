//! Sheet and row-batch endpoints

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use roster_common::db::{Row, Sheet};
use roster_common::fields::FieldMap;
use roster_common::roster::{SheetWithRows, UpsertOutcome};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::{ApiError, ApiResult, AppState};

/// Body of sheet create and edit requests
#[derive(Debug, Deserialize)]
pub struct SheetDefinition {
    pub name: String,
    #[serde(default)]
    pub columns: Vec<String>,
}

/// A single row or a batch
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum RowsBody {
    Batch(Vec<FieldMap>),
    Single(FieldMap),
}

/// Identity lookup parameters
#[derive(Debug, Deserialize)]
pub struct IdentityQuery {
    pub first: String,
    pub last: String,
}

/// GET /api/sheet
pub async fn list_sheets(State(state): State<AppState>) -> ApiResult<Json<Vec<SheetWithRows>>> {
    Ok(Json(state.roster.list_sheets().await?))
}

/// GET /api/sheet/:sheet_id
pub async fn get_sheet(
    State(state): State<AppState>,
    Path(sheet_id): Path<Uuid>,
) -> ApiResult<Json<SheetWithRows>> {
    Ok(Json(state.roster.sheet_with_rows(sheet_id).await?))
}

/// POST /api/sheet
pub async fn add_sheet(
    State(state): State<AppState>,
    Json(body): Json<SheetDefinition>,
) -> ApiResult<(StatusCode, Json<Sheet>)> {
    let sheet = state.roster.add_sheet(&body.name, body.columns).await?;
    Ok((StatusCode::CREATED, Json(sheet)))
}

/// PUT /api/sheet/:sheet_id
///
/// Renames the sheet and/or replaces its columns; existing rows are
/// migrated to the new column names.
pub async fn update_sheet(
    State(state): State<AppState>,
    Path(sheet_id): Path<Uuid>,
    Json(body): Json<SheetDefinition>,
) -> ApiResult<Json<Sheet>> {
    let sheet = state
        .roster
        .update_sheet(sheet_id, &body.name, body.columns)
        .await?;
    Ok(Json(sheet))
}

/// DELETE /api/sheet/:sheet_id
pub async fn delete_sheet(
    State(state): State<AppState>,
    Path(sheet_id): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    let removed = state.roster.delete_sheet(sheet_id).await?;
    Ok(Json(json!({ "deleted": sheet_id, "rowsRemoved": removed })))
}

/// POST /api/sheet/:sheet_id/rows
///
/// An object upserts one row (201 with the row); an array upserts the
/// batch (200 with the created and updated rows).
pub async fn add_rows(
    State(state): State<AppState>,
    Path(sheet_id): Path<Uuid>,
    Json(body): Json<RowsBody>,
) -> ApiResult<Response> {
    match body {
        RowsBody::Single(fields) => {
            let row: Row = state.roster.upsert_row(sheet_id, fields).await?;
            Ok((StatusCode::CREATED, Json(row)).into_response())
        }
        RowsBody::Batch(batch) => {
            let outcome: UpsertOutcome = state.roster.upsert_rows(sheet_id, batch).await?;
            Ok(Json(outcome).into_response())
        }
    }
}

/// GET /api/sheet/:sheet_id/rows?first=..&last=..
pub async fn find_row(
    State(state): State<AppState>,
    Path(sheet_id): Path<Uuid>,
    Query(query): Query<IdentityQuery>,
) -> ApiResult<Json<Row>> {
    state
        .roster
        .find_row_by_identity(sheet_id, &query.first, &query.last)
        .await?
        .map(Json)
        .ok_or_else(|| {
            ApiError::NotFound(format!("No row for {} {}", query.first, query.last))
        })
}

/// POST /api/sheet/:sheet_id/import
///
/// Body is CSV text with a header row.
pub async fn import_csv(
    State(state): State<AppState>,
    Path(sheet_id): Path<Uuid>,
    body: String,
) -> ApiResult<Json<UpsertOutcome>> {
    if body.trim().is_empty() {
        return Err(ApiError::BadRequest("Empty CSV body".to_string()));
    }
    Ok(Json(state.roster.import_csv(sheet_id, &body).await?))
}

/// GET /api/sheet/:sheet_id/export
pub async fn export_csv(
    State(state): State<AppState>,
    Path(sheet_id): Path<Uuid>,
) -> ApiResult<Response> {
    let sheet = state.roster.get_sheet(sheet_id).await?;
    let csv = state.roster.export_csv(sheet_id).await?;
    Ok(csv_response(&sheet.name, csv))
}

/// `text/csv` attachment response
pub(crate) fn csv_response(name: &str, csv: String) -> Response {
    let filename: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    (
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}.csv\"", filename),
            ),
        ],
        csv,
    )
        .into_response()
}
