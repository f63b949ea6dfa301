// Skiff Server — Auth middleware
// Credential issuance is out of scope: the bearer token *is* the caller's
// opaque external identifier, and the store maps it to the integer
// surrogate id (created on first sight). SSE clients may pass ?token=
// instead of the header, since EventSource cannot set headers.

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use super::{ApiError, AppState};

/// Scoped identity injected into every authenticated request.
#[derive(Debug, Clone)]
pub struct UserContext {
    pub user_id: i64,
    pub external_id: String,
}

pub async fn require_user(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Response {
    let token = bearer_token(req.headers())
        .or_else(|| query_token(req.uri().query().unwrap_or_default()));

    let Some(token) = token.filter(|t| !t.is_empty()) else {
        return ApiError::unauthorized("missing or invalid Authorization header").into_response();
    };

    match state.store.get_or_create_user(&token) {
        Ok(user_id) => {
            req.extensions_mut().insert(UserContext { user_id, external_id: token });
            next.run(req).await
        }
        Err(e) => ApiError::from(e).into_response(),
    }
}

fn bearer_token(headers: &axum::http::HeaderMap) -> Option<String> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|v| v.to_string())
}

fn query_token(query: &str) -> Option<String> {
    query
        .split('&')
        .find_map(|pair| pair.strip_prefix("token="))
        .map(|v| v.to_string())
}
