// ── Skiff Atoms: Pure Data Types ───────────────────────────────────────────
// All plain struct/enum definitions for the engine, with only derived or
// trivially pure logic. These types flow through every layer and are
// independent of any specific AI provider or storage backend.
//
// Serialization convention: optional fields are omitted when absent and
// boolean flags are omitted when false, so a chat blob round-trips
// bit-identically (modulo field order) with what older deployments wrote.

use serde::{Deserialize, Serialize};

fn is_false(b: &bool) -> bool {
    !*b
}

fn default_call_type() -> String {
    "function".to_string()
}

// ── Messages ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    Tool,
}

/// One entry in a chat's ordered message log.
///
/// `timestamp` (ISO-8601, local offset) and `unix_timestamp` (ms) are both
/// required; the redundancy is intentional — the former for display, the
/// latter for ordering. `id`/`parent_id` form a provenance tree resolved by
/// lookup, never by owning pointers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    #[serde(default)]
    pub content: String,
    pub timestamp: String,
    pub unix_timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    /// Model that produced this message (assistant messages only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Upstream endpoint that produced this message (assistant messages only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    /// Tool invocations requested by an assistant message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    /// Tool name (tool messages only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    /// Decoded tool arguments (tool messages only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<serde_json::Value>,
    /// The assistant ToolCall this tool message answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    /// Whether this is a plain-text assistant reply (the loop's terminal shape).
    pub fn is_final_assistant(&self) -> bool {
        self.role == Role::Assistant
            && self.tool_calls.as_ref().map_or(true, |tc| tc.is_empty())
    }
}

// ── Tool calling ───────────────────────────────────────────────────────────

/// Lifecycle of a requested tool call. Transitions only ever move
/// `pending → {approved, rejected, cancelled}`; a decided status never
/// returns to pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolCallStatus {
    Pending,
    Approved,
    Rejected,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type", default = "default_call_type")]
    pub call_type: String,
    pub function: FunctionCall,
    /// Absent on messages written before approval tracking existed; absence
    /// reads as approved.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ToolCallStatus>,
}

impl ToolCall {
    pub fn effective_status(&self) -> ToolCallStatus {
        self.status.unwrap_or(ToolCallStatus::Approved)
    }

    /// Decode the JSON-encoded argument string. Malformed arguments decode
    /// as `{}` — the agent never fails for this reason.
    pub fn parsed_arguments(&self) -> serde_json::Value {
        serde_json::from_str(&self.function.arguments)
            .unwrap_or_else(|_| serde_json::Value::Object(Default::default()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    /// JSON-encoded argument string, exactly as the provider emitted it.
    pub arguments: String,
}

/// OpenAI-format tool spec offered to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    #[serde(rename = "type")]
    pub tool_type: String,
    pub function: FunctionDefinition,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionDefinition {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

// ── Chat ───────────────────────────────────────────────────────────────────

/// A per-user conversation. Persisted as a single JSON blob; `chat_id` is an
/// opaque short token unique per user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chat {
    pub id: String,
    pub create_time: String,
    pub update_time: String,
    pub messages: Vec<Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_chat_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_message_id: Option<String>,
    /// Per-chat latch: approve every future tool call without asking.
    #[serde(default, skip_serializing_if = "is_false")]
    pub auto_approve: bool,
    /// Cooperative cancellation flag, observed once per loop iteration.
    #[serde(default, skip_serializing_if = "is_false")]
    pub interrupted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bot_name: Option<String>,
}

impl Chat {
    /// Title shown in listings: the first 100 chars of the first user message.
    pub fn title(&self) -> String {
        for m in &self.messages {
            if m.role == Role::User {
                return truncate_utf8(&m.content, crate::atoms::constants::TITLE_MAX_CHARS)
                    .to_string();
            }
        }
        String::new()
    }
}

/// Listing row — metadata only, the message blob is never materialized.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatSummary {
    pub chat_id: String,
    pub title: String,
    pub created_at: String,
    pub updated_at: String,
}

// ── Bot / VM config ────────────────────────────────────────────────────────

/// Which chat-completions dialect a bot speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiDialect {
    OpenAi,
    Anthropic,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotConfig {
    pub name: String,
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    /// Absent means the OpenAI dialect.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_type: Option<ApiDialect>,
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_api_path: Option<String>,
}

impl BotConfig {
    pub fn dialect(&self) -> ApiDialect {
        self.api_type.unwrap_or(ApiDialect::OpenAi)
    }
}

/// Remote sandbox binding for the tool runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VmConfig {
    pub api_token: String,
    pub vm_name: String,
}

// ── Jobs ───────────────────────────────────────────────────────────────────

/// A queued request to advance a chat. Created by the dispatcher, consumed
/// once by a worker; redelivery is harmless because the worker keys all
/// decisions off persisted chat state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub chat_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bot_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<i64>,
}

// ── Loop result ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopStatus {
    /// Last assistant response contained no tool calls.
    Completed,
    /// At least one tool call is pending a human decision.
    ApprovalNeeded,
    /// The interrupt flag was observed.
    Interrupted,
    /// Iteration cap exhausted; chat left in a non-terminal state.
    MaxIterations,
    /// Non-retryable upstream or internal error.
    Error,
}

/// Terminal record of one agent-loop invocation.
#[derive(Debug)]
pub struct LoopResult {
    pub status: LoopStatus,
    /// Messages appended during this invocation, in append order.
    pub new_messages: Vec<Message>,
    /// Detail for `LoopStatus::Error` outcomes that appended no message.
    pub error: Option<String>,
}

impl LoopResult {
    pub fn new(status: LoopStatus, new_messages: Vec<Message>) -> Self {
        LoopResult { status, new_messages, error: None }
    }
}

// ── Provider boundary ──────────────────────────────────────────────────────

/// Normalized result of one non-streaming chat-completions round trip.
/// Dialect translation lives entirely inside each provider implementation.
#[derive(Debug, Clone, Default)]
pub struct ProviderReply {
    pub content: Option<String>,
    pub tool_calls: Option<Vec<ToolCall>>,
    pub model: Option<String>,
    pub provider: Option<String>,
}

// ── Utility ────────────────────────────────────────────────────────────────

/// UTF-8–safe string truncation. Returns a `&str` of at most `max_bytes`
/// bytes, backing up to the previous char boundary if `max_bytes` falls
/// inside a multi-byte character.
///
/// Use this instead of `&s[..s.len().min(N)]` which panics on non-ASCII.
pub fn truncate_utf8(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
