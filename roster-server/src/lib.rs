//! roster-server library - HTTP API over the roster service

use std::sync::Arc;

use axum::Router;
use roster_common::config::RosterConfig;
use roster_common::Roster;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

pub mod api;
pub mod error;
pub mod pagination;

pub use error::{ApiError, ApiResult};

/// Application state shared across HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub roster: Arc<Roster>,
    pub config: Arc<RosterConfig>,
}

impl AppState {
    /// Create new application state
    pub fn new(roster: Roster, config: RosterConfig) -> Self {
        Self {
            roster: Arc::new(roster),
            config: Arc::new(config),
        }
    }
}

/// Build application router
///
/// `/health` and `/api/auth/*` are public; every other `/api` route sits
/// behind the bearer-session middleware.
pub fn build_router(state: AppState) -> Router {
    use axum::middleware;
    use axum::routing::{get, patch, post};

    let protected = Router::new()
        .route("/api/sheet", get(api::list_sheets).post(api::add_sheet))
        .route(
            "/api/sheet/:sheet_id",
            get(api::get_sheet)
                .put(api::update_sheet)
                .delete(api::delete_sheet),
        )
        .route(
            "/api/sheet/:sheet_id/rows",
            get(api::find_row).post(api::add_rows),
        )
        .route("/api/sheet/:sheet_id/import", post(api::import_csv))
        .route("/api/sheet/:sheet_id/export", get(api::export_csv))
        .route("/api/rows/:row_id", patch(api::update_row).delete(api::delete_row))
        .route("/api/view", get(api::combined_view))
        .route("/api/view/export", get(api::export_view))
        .route("/api/view/emails", get(api::view_emails))
        .route(
            "/api/extra-emails",
            get(api::get_extra_emails).put(api::put_extra_emails),
        )
        .layer(middleware::from_fn_with_state(
            state.clone(),
            api::auth_middleware,
        ));

    let public = Router::new()
        .merge(api::auth_routes())
        .merge(api::health_routes());

    Router::new()
        .merge(protected)
        .merge(public)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
