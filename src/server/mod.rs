// Skiff Server — HTTP API
// axum router, bearer auth, chat endpoints, and the SSE event stream.
// Handlers receive an already-scoped UserContext from the auth middleware
// and talk only to the store and the dispatcher.

pub mod auth;
pub mod chat;
pub mod sse;

use std::sync::Arc;

use axum::http::StatusCode;
use axum::middleware;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use tower_http::cors::CorsLayer;

use crate::atoms::error::EngineError;
use crate::config::AppConfig;
use crate::queue::SqliteQueue;
use crate::store::Store;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<Store>,
    pub queue: Arc<SqliteQueue>,
    pub config: Arc<AppConfig>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/chat", post(chat::create_chat))
        .route("/chat/message", post(chat::post_message))
        .route("/chat/approve", post(chat::approve))
        .route("/chat/stop", post(chat::stop))
        .route("/chat/auto_approve", post(chat::auto_approve))
        .route("/chat/list", get(chat::list))
        .route("/chat/detail", get(chat::detail))
        .route("/chat/messages", get(sse::chat_events))
        .layer(middleware::from_fn_with_state(state.clone(), auth::require_user))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ── Error envelope ─────────────────────────────────────────────────────────

/// JSON error responses: `{"error": "..."}` with the right status code.
pub struct ApiError(pub StatusCode, pub String);

impl ApiError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        ApiError(StatusCode::BAD_REQUEST, msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        ApiError(StatusCode::NOT_FOUND, msg.into())
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        ApiError(StatusCode::UNAUTHORIZED, msg.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.0, Json(json!({ "error": self.1 }))).into_response()
    }
}

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::NotFound(what) => ApiError::not_found(what),
            other => ApiError(StatusCode::INTERNAL_SERVER_ERROR, other.to_string()),
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
