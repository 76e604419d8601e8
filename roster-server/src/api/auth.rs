//! Bearer-session authentication and account endpoints

use axum::{
    extract::{Request, State},
    http::{header, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use roster_common::api::auth::{self, LoginRequest, LoginResponse, RegisterRequest};
use serde_json::json;
use tracing::{debug, info};

use crate::{ApiError, ApiResult, AppState};

/// Token from an `Authorization: Bearer <token>` header value
pub fn bearer_token(value: &str) -> Option<&str> {
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

/// Authentication middleware
///
/// Resolves the bearer token to a session and stores the caller's
/// `CallerIdentity` in the request extensions. Applied to protected routes
/// only; skipped entirely when `require_auth` is off.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if !state.config.require_auth {
        return Ok(next.run(request).await);
    }

    let token = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(bearer_token)
        .ok_or_else(|| ApiError::Unauthorized("Missing bearer token".to_string()))?;

    let caller = auth::authenticate(state.roster.pool(), token).await?;
    debug!("Authenticated request from user {}", caller.user_id);
    request.extensions_mut().insert(caller);

    Ok(next.run(request).await)
}

/// POST /api/auth/register
pub async fn register(
    State(state): State<AppState>,
    Json(request): Json<RegisterRequest>,
) -> ApiResult<Response> {
    let user = auth::register(
        state.roster.pool(),
        &request,
        state.config.register_token.as_deref(),
    )
    .await?;
    info!("Registered user {}", user.id);

    Ok((
        StatusCode::CREATED,
        Json(json!({ "message": "User created", "userId": user.id })),
    )
        .into_response())
}

/// POST /api/auth/login
pub async fn login(
    State(state): State<AppState>,
    Json(request): Json<LoginRequest>,
) -> ApiResult<Json<LoginResponse>> {
    let session = auth::login(state.roster.pool(), &request, state.config.session_ttl()).await?;
    Ok(Json(session))
}

/// Public account routes
pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/api/auth/register", post(register))
        .route("/api/auth/login", post(login))
}
