// Skiff Server — Chat endpoints
// Create/continue chats, decide tool approvals, stop, toggle auto-approve,
// list and inspect. Every mutation lands in the store before a job is
// enqueued, so the worker always observes the decided state.

use std::collections::HashMap;

use axum::extract::{Extension, Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::atoms::types::{Chat, Job, Message, Role, ToolCallStatus};
use crate::engine::messages::{
    backfill_tool_results, build_message_path, create_message, generate_chat_id,
    has_pending_tool_calls, iso8601_timestamp, last_assistant_with_tool_calls, BackfillMode,
};
use crate::queue::JobDispatcher;
use super::auth::UserContext;
use super::{ApiError, ApiResult, AppState};

// ── POST /chat ─────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct CreateChatRequest {
    pub prompt: String,
    #[serde(default)]
    pub bot_name: Option<String>,
    #[serde(default)]
    pub chat_id: Option<String>,
    #[serde(default)]
    pub auto_approve: Option<bool>,
    /// Fork: seed the new chat from an existing one. With an
    /// origin_message_id, only the provenance path down to that message is
    /// carried over; without it, the whole log.
    #[serde(default)]
    pub origin_chat_id: Option<String>,
    #[serde(default)]
    pub origin_message_id: Option<String>,
}

/// Messages seeding a fork of `origin`.
fn fork_seed(origin: &Chat, origin_message_id: Option<&str>) -> Vec<Message> {
    match origin_message_id {
        Some(id) => build_message_path(&origin.messages, id),
        None => origin.messages.clone(),
    }
}

pub async fn create_chat(
    State(state): State<AppState>,
    Extension(user): Extension<UserContext>,
    Json(req): Json<CreateChatRequest>,
) -> ApiResult<Json<Value>> {
    if req.prompt.is_empty() {
        return Err(ApiError::bad_request("prompt must not be empty"));
    }

    let mut messages = Vec::new();
    if let Some(origin_id) = req.origin_chat_id.as_deref() {
        let Some(origin) = state.store.get_chat(user.user_id, origin_id)? else {
            return Err(ApiError::not_found("origin chat not found"));
        };
        messages = fork_seed(&origin, req.origin_message_id.as_deref());
    }
    let mut user_msg = create_message(Role::User, &req.prompt);
    user_msg.parent_id = messages.last().and_then(|m| m.id.clone());
    messages.push(user_msg);

    let chat_id = req
        .chat_id
        .filter(|id| !id.is_empty())
        .unwrap_or_else(generate_chat_id);
    let timestamp = iso8601_timestamp();
    let mut chat = Chat {
        id: chat_id,
        create_time: timestamp.clone(),
        update_time: timestamp,
        messages,
        origin_chat_id: req.origin_chat_id,
        origin_message_id: req.origin_message_id,
        auto_approve: req.auto_approve.unwrap_or(false),
        interrupted: false,
        bot_name: req.bot_name.clone(),
    };
    state.store.save_chat(user.user_id, &mut chat)?;

    state
        .queue
        .enqueue(Job {
            chat_id: chat.id.clone(),
            bot_name: req.bot_name,
            user_id: Some(user.user_id),
        })
        .await?;

    Ok(Json(json!({ "chat_id": chat.id })))
}

// ── POST /chat/message ─────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct PostMessageRequest {
    pub chat_id: String,
    pub prompt: String,
    #[serde(default)]
    pub bot_name: Option<String>,
}

pub async fn post_message(
    State(state): State<AppState>,
    Extension(user): Extension<UserContext>,
    Json(req): Json<PostMessageRequest>,
) -> ApiResult<Json<Value>> {
    let Some(mut chat) = state.store.get_chat(user.user_id, &req.chat_id)? else {
        return Err(ApiError::not_found("chat not found"));
    };

    if chat.interrupted {
        // A stopped chat must be coverage-complete before the new user
        // turn; unhandled calls from before the stop become cancellations.
        backfill_tool_results(&mut chat.messages, BackfillMode::Cancelled);
        chat.interrupted = false;
    }

    let mut msg = create_message(Role::User, &req.prompt);
    msg.parent_id = chat.messages.last().and_then(|m| m.id.clone());
    chat.messages.push(msg);
    state.store.save_chat(user.user_id, &mut chat)?;

    state
        .queue
        .enqueue(Job {
            chat_id: req.chat_id,
            bot_name: req.bot_name.or(chat.bot_name),
            user_id: Some(user.user_id),
        })
        .await?;

    Ok(Json(json!({ "ok": true })))
}

// ── POST /chat/approve ─────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ApproveRequest {
    pub chat_id: String,
    pub decisions: HashMap<String, bool>,
    #[serde(default)]
    pub user_message: Option<String>,
}

/// What the approval changed: resume the worker, or keep waiting for the
/// rest of the decisions.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum ApprovalOutcome {
    Run,
    Wait,
}

/// Apply a decisions map to the pending calls of the last assistant
/// message, backfill denial results for fresh rejections, and append the
/// optional follow-up user message. Pure on the chat value; the handler
/// persists and enqueues.
pub(crate) fn apply_approval(
    chat: &mut Chat,
    decisions: &HashMap<String, bool>,
    user_message: Option<&str>,
) -> Result<ApprovalOutcome, &'static str> {
    let Some(idx) = last_assistant_with_tool_calls(&chat.messages) else {
        return Err("chat has no pending tool calls");
    };
    let had_pending = chat.messages[idx]
        .tool_calls
        .as_ref()
        .is_some_and(|calls| {
            calls.iter().any(|tc| tc.effective_status() == ToolCallStatus::Pending)
        });
    if !had_pending {
        return Err("chat has no pending tool calls");
    }

    if let Some(calls) = chat.messages[idx].tool_calls.as_mut() {
        for tc in calls.iter_mut() {
            if tc.effective_status() != ToolCallStatus::Pending {
                continue;
            }
            if let Some(&approved) = decisions.get(&tc.id) {
                tc.status = Some(if approved {
                    ToolCallStatus::Approved
                } else {
                    ToolCallStatus::Rejected
                });
            }
            // Calls absent from the map stay pending.
        }
    }

    backfill_tool_results(&mut chat.messages, BackfillMode::Rejected);

    if let Some(text) = user_message.filter(|t| !t.is_empty()) {
        let mut msg = create_message(Role::User, text);
        msg.parent_id = chat.messages.last().and_then(|m| m.id.clone());
        chat.messages.push(msg);
    }

    if has_pending_tool_calls(&chat.messages) {
        // Partial decision: the client is expected to finish deciding.
        Ok(ApprovalOutcome::Wait)
    } else {
        Ok(ApprovalOutcome::Run)
    }
}

pub async fn approve(
    State(state): State<AppState>,
    Extension(user): Extension<UserContext>,
    Json(req): Json<ApproveRequest>,
) -> ApiResult<Json<Value>> {
    let Some(mut chat) = state.store.get_chat(user.user_id, &req.chat_id)? else {
        return Err(ApiError::not_found("chat not found"));
    };

    let outcome = apply_approval(&mut chat, &req.decisions, req.user_message.as_deref())
        .map_err(ApiError::bad_request)?;
    state.store.save_chat(user.user_id, &mut chat)?;

    if outcome == ApprovalOutcome::Run {
        state
            .queue
            .enqueue(Job {
                chat_id: req.chat_id,
                bot_name: chat.bot_name.clone(),
                user_id: Some(user.user_id),
            })
            .await?;
    }

    Ok(Json(json!({ "ok": true })))
}

// ── POST /chat/stop ────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct StopRequest {
    pub chat_id: String,
}

pub async fn stop(
    State(state): State<AppState>,
    Extension(user): Extension<UserContext>,
    Json(req): Json<StopRequest>,
) -> ApiResult<Json<Value>> {
    let Some(mut chat) = state.store.get_chat(user.user_id, &req.chat_id)? else {
        return Err(ApiError::not_found("chat not found"));
    };
    // Messages are not touched here; a running loop observes the flag at
    // its next iteration, an idle chat is cancel-backfilled on the next
    // wake-up.
    chat.interrupted = true;
    state.store.save_chat(user.user_id, &mut chat)?;
    Ok(Json(json!({ "ok": true })))
}

// ── POST /chat/auto_approve ────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct AutoApproveRequest {
    pub chat_id: String,
    pub auto_approve: bool,
}

pub async fn auto_approve(
    State(state): State<AppState>,
    Extension(user): Extension<UserContext>,
    Json(req): Json<AutoApproveRequest>,
) -> ApiResult<Json<Value>> {
    let Some(mut chat) = state.store.get_chat(user.user_id, &req.chat_id)? else {
        return Err(ApiError::not_found("chat not found"));
    };
    chat.auto_approve = req.auto_approve;
    state.store.save_chat(user.user_id, &mut chat)?;
    Ok(Json(json!({ "ok": true, "auto_approve": req.auto_approve })))
}

// ── GET /chat/list ─────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ListParams {
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub limit: Option<i64>,
}

pub async fn list(
    State(state): State<AppState>,
    Extension(user): Extension<UserContext>,
    Query(params): Query<ListParams>,
) -> ApiResult<Json<Value>> {
    let limit = params.limit.unwrap_or(50).clamp(1, 200);
    let query = params.query.as_deref().filter(|q| !q.is_empty());
    let summaries = state.store.list_chats(user.user_id, query, limit)?;
    Ok(Json(json!(summaries)))
}

// ── GET /chat/detail ───────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct DetailParams {
    pub chat_id: String,
}

pub async fn detail(
    State(state): State<AppState>,
    Extension(user): Extension<UserContext>,
    Query(params): Query<DetailParams>,
) -> ApiResult<Json<Value>> {
    let Some(chat) = state.store.get_chat(user.user_id, &params.chat_id)? else {
        return Err(ApiError::not_found("chat not found"));
    };
    Ok(Json(json!({ "chat_id": chat.id, "auto_approve": chat.auto_approve })))
}
