// Skiff Server — Event stream
// GET /chat/messages — server-sent events derived purely from persisted
// chat state, polled at a fixed cadence. Three event kinds: `message` for
// each log entry at index ≥ last_index, one `ask` per quiet period while
// approval is outstanding, and a terminal `done` that closes the stream.
// The endpoint is read-only, so any number of concurrent streams over the
// same chat emit identical sequences.

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::{Extension, Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::Stream;
use serde::Deserialize;
use serde_json::json;

use crate::atoms::constants::EVENT_POLL_INTERVAL_MS;
use crate::atoms::types::{Chat, Message, ToolCall};
use crate::engine::messages::pending_tool_calls;
use super::auth::UserContext;
use super::AppState;

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    pub chat_id: String,
    #[serde(default)]
    pub last_index: usize,
}

// ── Event derivation (pure) ────────────────────────────────────────────────

#[derive(Debug)]
pub(crate) enum ChatEvent {
    Message { index: usize, message: Message },
    Ask { tool_calls: Vec<ToolCall> },
    Done { status: &'static str },
}

pub(crate) struct PollStep {
    pub events: Vec<ChatEvent>,
    pub next_index: usize,
    pub asked: bool,
    /// Terminal: the stream closes after emitting these events.
    pub closed: bool,
}

/// One polling step over chat state. `asked` carries the "client already
/// saw an ask for this pause" latch between polls; any new message resets
/// it.
pub(crate) fn collect_events(chat: &Chat, from_index: usize, already_asked: bool) -> PollStep {
    let mut events = Vec::new();
    let mut index = from_index;
    let mut asked = already_asked;

    while index < chat.messages.len() {
        events.push(ChatEvent::Message { index, message: chat.messages[index].clone() });
        index += 1;
        asked = false;
    }

    if !chat.interrupted && !asked {
        let pending = pending_tool_calls(&chat.messages);
        if !pending.is_empty() {
            events.push(ChatEvent::Ask { tool_calls: pending });
            asked = true;
        }
    }

    let done = if chat.interrupted {
        Some("interrupted")
    } else if chat
        .messages
        .last()
        .map(|m| m.is_final_assistant())
        .unwrap_or(false)
    {
        Some("completed")
    } else {
        None
    };
    if let Some(status) = done {
        events.push(ChatEvent::Done { status });
    }

    PollStep { events, next_index: index, asked, closed: done.is_some() }
}

fn to_sse(event: ChatEvent) -> Event {
    let (name, payload) = match event {
        ChatEvent::Message { index, message } => (
            "message",
            json!({ "index": index, "type": "message", "data": message }),
        ),
        ChatEvent::Ask { tool_calls } => ("ask", json!({ "tool_calls": tool_calls })),
        ChatEvent::Done { status } => ("done", json!({ "status": status })),
    };
    Event::default().event(name).data(payload.to_string())
}

fn error_event(message: &str) -> Event {
    Event::default()
        .event("error")
        .data(json!({ "error": message }).to_string())
}

// ── Handler ────────────────────────────────────────────────────────────────

pub async fn chat_events(
    State(state): State<AppState>,
    Extension(user): Extension<UserContext>,
    Query(params): Query<EventsQuery>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = async_stream::stream! {
        let mut next_index = params.last_index;
        let mut asked = false;

        loop {
            let chat = match state.store.get_chat(user.user_id, &params.chat_id) {
                Ok(Some(chat)) => chat,
                Ok(None) => {
                    yield Ok(error_event("chat not found"));
                    break;
                }
                Err(e) => {
                    yield Ok(error_event(&e.to_string()));
                    break;
                }
            };

            let step = collect_events(&chat, next_index, asked);
            next_index = step.next_index;
            asked = step.asked;
            let closed = step.closed;
            for event in step.events {
                yield Ok(to_sse(event));
            }
            if closed {
                break;
            }

            tokio::time::sleep(Duration::from_millis(EVENT_POLL_INTERVAL_MS)).await;
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}
