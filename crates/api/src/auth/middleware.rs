//! Authentication middleware

use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::{IntoResponse, Response},
};
use subtle::ConstantTimeEq;
use teamwallet_shared::TeamId;

use crate::{error::ApiError, state::AppState};

/// Header carrying the authenticated team
pub const TEAM_ID_HEADER: &str = "x-team-id";

/// Team the request acts on, inserted as a request extension
#[derive(Debug, Clone, Copy)]
pub struct TeamContext {
    pub team_id: TeamId,
}

fn extract_team_id(request: &Request) -> Option<TeamId> {
    request
        .headers()
        .get(TEAM_ID_HEADER)
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.parse().ok())
}

fn extract_bearer_token(request: &Request) -> Option<&str> {
    request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
}

/// Middleware that requires a well-formed `X-Team-Id` header
pub async fn require_team(mut request: Request, next: Next) -> Response {
    match extract_team_id(&request) {
        Some(team_id) => {
            tracing::debug!(team_id = %team_id, path = %request.uri().path(), "require_team: team resolved");
            request.extensions_mut().insert(TeamContext { team_id });
            next.run(request).await
        }
        None => {
            tracing::warn!(path = %request.uri().path(), "require_team: missing or malformed team header");
            ApiError::Unauthorized.into_response()
        }
    }
}

/// Middleware that requires the operator bearer token
pub async fn require_admin(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let authorized = extract_bearer_token(&request)
        .map(|token| {
            bool::from(
                token
                    .as_bytes()
                    .ct_eq(state.config.admin_api_token.as_bytes()),
            )
        })
        .unwrap_or(false);

    if !authorized {
        tracing::warn!(path = %request.uri().path(), "require_admin: invalid or missing admin token");
        return ApiError::Unauthorized.into_response();
    }

    next.run(request).await
}
