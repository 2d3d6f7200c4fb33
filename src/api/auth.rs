// =============================================================================
// Admin authentication — Axum extractor over AppState
// =============================================================================
//
// Tracking changes and AI runs cost exchange connections and model calls, so
// those handlers take an `AdminAuth` argument:
//
//   async fn handler(_admin: AdminAuth, State(state): State<Arc<AppState>>, ...)
//
// The token is captured from `SENTINEL_ADMIN_TOKEN` once at startup and kept
// in `AppState`. No token configured means every admin request is refused.
// =============================================================================

use std::sync::Arc;

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use tracing::warn;

use crate::app_state::AppState;

pub const ADMIN_TOKEN_ENV: &str = "SENTINEL_ADMIN_TOKEN";

/// Read the admin token from the environment; blank counts as unset.
pub fn admin_token_from_env() -> Option<String> {
    std::env::var(ADMIN_TOKEN_ENV)
        .ok()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}

/// XOR-fold comparison whose running time depends only on the length.
fn tokens_match(presented: &str, expected: &str) -> bool {
    let (a, b) = (presented.as_bytes(), expected.as_bytes());
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Token carried by `Authorization: Bearer <token>`, if well formed.
fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

// =============================================================================
// Extractor
// =============================================================================

/// Proof that the request carried the admin token.
#[derive(Debug)]
pub struct AdminAuth;

#[derive(Debug, PartialEq, Eq)]
pub enum AuthRejection {
    NotConfigured,
    MissingToken,
    InvalidToken,
}

impl IntoResponse for AuthRejection {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::NotConfigured => (StatusCode::FORBIDDEN, "admin token not configured on server"),
            Self::MissingToken => (StatusCode::UNAUTHORIZED, "missing bearer token"),
            Self::InvalidToken => (StatusCode::FORBIDDEN, "invalid bearer token"),
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AdminAuth {
    type Rejection = AuthRejection;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let Some(expected) = state.admin_token() else {
            warn!(path = %parts.uri.path(), "{ADMIN_TOKEN_ENV} unset, refusing admin request");
            return Err(AuthRejection::NotConfigured);
        };

        let Some(presented) = bearer_token(&parts.headers) else {
            return Err(AuthRejection::MissingToken);
        };

        if !tokens_match(presented, expected) {
            warn!(path = %parts.uri.path(), "admin request with wrong token");
            return Err(AuthRejection::InvalidToken);
        }

        Ok(AdminAuth)
    }
}
