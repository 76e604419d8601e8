//! Combined view endpoints: paged rows, CSV export, and mailing lists
//!
//! Query parameters shared by all three:
//! - `sheets`: comma-separated sheet ids (default: every sheet)
//! - `dedupe`: merge rows of the same student across sheets
//! - `filter`: `;`-separated `column:value1|value2` clauses, AND-ed
//! - `search`: case-insensitive student name search (first, last, or both)
//! - `sort`: `,`-separated `column[:asc|desc]` keys, applied in order

use axum::{
    extract::{Query, State},
    response::Response,
    Json,
};
use roster_common::csv_io::write_csv;
use roster_common::db::extra_emails::load_extra_emails;
use roster_common::fields::FieldMap;
use roster_common::mailing::{Audience, EmailFormat, MailingList};
use roster_common::roster::{RowError, ViewQuery};
use roster_common::view::{RowFilter, SortKey};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::sheets::csv_response;
use crate::pagination::{calculate_pagination, PAGE_SIZE};
use crate::{ApiError, ApiResult, AppState};

/// Raw view query string
#[derive(Debug, Default, Deserialize)]
pub struct ViewParams {
    pub sheets: Option<String>,
    #[serde(default)]
    pub dedupe: bool,
    pub filter: Option<String>,
    pub search: Option<String>,
    pub sort: Option<String>,
    #[serde(default = "default_page")]
    pub page: usize,
}

fn default_page() -> usize {
    1
}

impl ViewParams {
    /// Parse into a service query; malformed ids or clauses are a 400
    pub fn to_query(&self) -> ApiResult<ViewQuery> {
        let sheet_ids = match self.sheets.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(list) => Some(
                list.split(',')
                    .map(|id| {
                        Uuid::parse_str(id.trim())
                            .map_err(|_| ApiError::BadRequest(format!("Invalid sheet id: {}", id)))
                    })
                    .collect::<ApiResult<Vec<_>>>()?,
            ),
        };

        let filters = split_clauses(self.filter.as_deref(), ';')
            .map(|clause| {
                RowFilter::parse(clause)
                    .ok_or_else(|| ApiError::BadRequest(format!("Invalid filter: {}", clause)))
            })
            .collect::<ApiResult<Vec<_>>>()?;

        let sort = split_clauses(self.sort.as_deref(), ',')
            .map(|clause| {
                SortKey::parse(clause)
                    .ok_or_else(|| ApiError::BadRequest(format!("Invalid sort key: {}", clause)))
            })
            .collect::<ApiResult<Vec<_>>>()?;

        let search = self
            .search
            .as_deref()
            .map(str::trim)
            .filter(|term| !term.is_empty())
            .map(str::to_string);

        Ok(ViewQuery {
            sheet_ids,
            dedupe: self.dedupe,
            filters,
            search,
            sort,
        })
    }
}

fn split_clauses(raw: Option<&str>, separator: char) -> impl Iterator<Item = &str> {
    raw.unwrap_or("")
        .split(separator)
        .map(str::trim)
        .filter(|clause| !clause.is_empty())
}

/// One page of the combined view
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewPage {
    pub columns: Vec<String>,
    pub rows: Vec<FieldMap>,
    pub total_rows: usize,
    pub page: usize,
    pub page_size: usize,
    pub total_pages: usize,
    /// Rows left out because they could not be decrypted
    pub skipped: Vec<RowError>,
}

/// GET /api/view
pub async fn combined_view(
    State(state): State<AppState>,
    Query(params): Query<ViewParams>,
) -> ApiResult<Json<ViewPage>> {
    let view = state.roster.combined_view(&params.to_query()?).await?;

    let total_rows = view.rows.len();
    let pagination = calculate_pagination(total_rows, params.page);
    let rows = view.rows[pagination.range(total_rows)].to_vec();

    Ok(Json(ViewPage {
        columns: view.columns,
        rows,
        total_rows,
        page: pagination.page,
        page_size: PAGE_SIZE,
        total_pages: pagination.total_pages,
        skipped: view.skipped,
    }))
}

/// GET /api/view/export
///
/// The whole filtered, sorted view (no paging) as CSV.
pub async fn export_view(
    State(state): State<AppState>,
    Query(params): Query<ViewParams>,
) -> ApiResult<Response> {
    let view = state.roster.combined_view(&params.to_query()?).await?;
    let csv = write_csv(&view.columns, &view.rows)?;
    Ok(csv_response("roster", csv))
}

/// Mailing-list parameters: the view parameters (minus `page`) plus the
/// audience and output format
#[derive(Debug, Deserialize)]
pub struct EmailParams {
    pub sheets: Option<String>,
    #[serde(default)]
    pub dedupe: bool,
    pub filter: Option<String>,
    pub search: Option<String>,
    pub sort: Option<String>,
    /// `students`, `parents` or `both`
    pub audience: Option<String>,
    #[serde(default)]
    pub format: EmailFormat,
    #[serde(default)]
    pub include_extra: bool,
    pub subject: Option<String>,
    /// Pre-filled message text for the `mailto:` link
    pub body: Option<String>,
}

impl EmailParams {
    fn view_params(&self) -> ViewParams {
        ViewParams {
            sheets: self.sheets.clone(),
            dedupe: self.dedupe,
            filter: self.filter.clone(),
            search: self.search.clone(),
            sort: self.sort.clone(),
            page: 1,
        }
    }
}

fn parse_audience(raw: Option<&str>) -> ApiResult<Audience> {
    match raw.map(str::trim) {
        None | Some("") | Some("both") => Ok(Audience::default()),
        Some("students") => Ok(Audience {
            students: true,
            parents: false,
        }),
        Some("parents") => Ok(Audience {
            students: false,
            parents: true,
        }),
        Some(other) => Err(ApiError::BadRequest(format!("Invalid audience: {}", other))),
    }
}

#[derive(Debug, Serialize)]
pub struct EmailListResponse {
    pub recipients: Vec<String>,
    pub count: usize,
    /// Recipients joined for the requested format
    pub joined: String,
    pub mailto: String,
}

/// GET /api/view/emails
pub async fn view_emails(
    State(state): State<AppState>,
    Query(params): Query<EmailParams>,
) -> ApiResult<Json<EmailListResponse>> {
    let audience = parse_audience(params.audience.as_deref())?;
    let view = state.roster.combined_view(&params.view_params().to_query()?).await?;

    let extra = if params.include_extra {
        load_extra_emails(state.roster.pool()).await?
    } else {
        Default::default()
    };
    let list = MailingList::collect(&view.rows, audience, extra.all());

    Ok(Json(EmailListResponse {
        count: list.len(),
        joined: list.join(params.format),
        mailto: list.mailto_link(
            params.subject.as_deref().unwrap_or(""),
            params.body.as_deref(),
        ),
        recipients: list.recipients,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use roster_common::view::SortDirection;

    #[test]
    fn test_params_parse_into_query() {
        let id = Uuid::new_v4();
        let params = ViewParams {
            sheets: Some(format!(" {} ", id)),
            dedupe: true,
            filter: Some("Grade:9|10; Ensemble:Choir".into()),
            search: Some("  lee ".into()),
            sort: Some("Student Last,Grade:desc".into()),
            page: 1,
        };
        let query = params.to_query().unwrap();
        assert_eq!(query.sheet_ids, Some(vec![id]));
        assert!(query.dedupe);
        assert_eq!(query.filters.len(), 2);
        assert_eq!(query.filters[0].values, vec!["9".to_string(), "10".to_string()]);
        assert_eq!(query.search.as_deref(), Some("lee"));
        assert_eq!(query.sort[1].direction, SortDirection::Desc);
    }

    #[test]
    fn test_empty_params_select_everything() {
        let query = ViewParams::default().to_query().unwrap();
        assert_eq!(query.sheet_ids, None);
        assert!(query.filters.is_empty());
        assert_eq!(query.search, None);
        assert!(query.sort.is_empty());
    }

    #[test]
    fn test_bad_sheet_id_is_bad_request() {
        let params = ViewParams {
            sheets: Some("not-a-uuid".into()),
            ..ViewParams::default()
        };
        assert!(matches!(params.to_query(), Err(ApiError::BadRequest(_))));
    }

    #[test]
    fn test_audience_parsing() {
        assert_eq!(parse_audience(None).unwrap(), Audience::default());
        assert!(!parse_audience(Some("students")).unwrap().parents);
        assert!(!parse_audience(Some("parents")).unwrap().students);
        assert!(parse_audience(Some("teachers")).is_err());
    }
}
