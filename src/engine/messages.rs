// Skiff Engine — Message utilities
// ID/timestamp generation, message constructors, the unhandled-call scan
// shared by the agent loop and the approval endpoints, and the backfill
// primitive that keeps tool-result coverage complete.

use std::collections::HashSet;

use chrono::{Local, Utc};

use crate::atoms::types::{Message, Role, ToolCall, ToolCallStatus};

// ── IDs and timestamps ─────────────────────────────────────────────────────

/// Opaque short chat token (6 hex chars).
pub fn generate_chat_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..6].to_string()
}

/// Message ID in the form `msg_<unix_ms>_<8 random chars>`.
pub fn generate_message_id() -> String {
    let rand = uuid::Uuid::new_v4().simple().to_string();
    format!("msg_{}_{}", unix_timestamp_ms(), &rand[..8])
}

/// Current time as a 13-digit unix timestamp (milliseconds).
pub fn unix_timestamp_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Current local time as ISO-8601 with a `±HH:MM` offset.
pub fn iso8601_timestamp() -> String {
    Local::now().format("%Y-%m-%dT%H:%M:%S%:z").to_string()
}

/// Build a message with fresh id and timestamps; optional fields unset.
pub fn create_message(role: Role, content: impl Into<String>) -> Message {
    Message {
        role,
        content: content.into(),
        timestamp: iso8601_timestamp(),
        unix_timestamp: unix_timestamp_ms(),
        id: Some(generate_message_id()),
        parent_id: None,
        model: None,
        provider: None,
        tool_calls: None,
        tool: None,
        arguments: None,
        tool_call_id: None,
    }
}

// ── Fixed result strings ───────────────────────────────────────────────────
// Downstream prompts (and tests) depend on this exact wording.

pub fn denied_text(tool_name: &str, args: &serde_json::Value) -> String {
    format!(
        "ERROR: User denied execution of {} with args {}. The command was NOT executed. \
         Do NOT proceed as if it succeeded.",
        tool_name,
        serde_json::to_string(args).unwrap_or_else(|_| "{}".to_string())
    )
}

pub fn cancelled_text(tool_name: &str) -> String {
    format!(
        "ERROR: Execution of {} was cancelled due to interruption. The command was NOT executed.",
        tool_name
    )
}

// ── Unhandled-call scan ────────────────────────────────────────────────────

/// Index of the most recent assistant message carrying tool calls.
pub fn last_assistant_with_tool_calls(messages: &[Message]) -> Option<usize> {
    messages.iter().rposition(|m| {
        m.role == Role::Assistant && m.tool_calls.as_ref().is_some_and(|tc| !tc.is_empty())
    })
}

/// IDs of tool calls already answered by a tool message after `assistant_idx`.
pub fn satisfied_call_ids(messages: &[Message], assistant_idx: usize) -> HashSet<String> {
    messages[assistant_idx + 1..]
        .iter()
        .filter(|m| m.role == Role::Tool)
        .filter_map(|m| m.tool_call_id.clone())
        .collect()
}

/// Whether the last assistant message still has a pending tool call.
pub fn has_pending_tool_calls(messages: &[Message]) -> bool {
    last_assistant_with_tool_calls(messages).is_some_and(|idx| {
        messages[idx]
            .tool_calls
            .as_ref()
            .map(|calls| {
                calls.iter().any(|tc| tc.effective_status() == ToolCallStatus::Pending)
            })
            .unwrap_or(false)
    })
}

/// The pending tool calls of the last assistant message, for approval UIs.
pub fn pending_tool_calls(messages: &[Message]) -> Vec<ToolCall> {
    let Some(idx) = last_assistant_with_tool_calls(messages) else {
        return Vec::new();
    };
    messages[idx]
        .tool_calls
        .as_ref()
        .map(|calls| {
            calls
                .iter()
                .filter(|tc| tc.effective_status() == ToolCallStatus::Pending)
                .cloned()
                .collect()
        })
        .unwrap_or_default()
}

// ── Backfill ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackfillMode {
    /// Synthesize results only for calls already marked rejected.
    Rejected,
    /// Synthesize results for every unhandled call and mark it cancelled.
    Cancelled,
}

/// Backfill tool results for unhandled tool calls that lack responses, so a
/// chat always reaches a coverage-complete state (every ToolCall of the last
/// assistant message has a matching tool message) before anything else is
/// appended. Mutates `messages` in place; returns the inserted messages.
///
/// Synthetic results are inserted immediately after any tool messages that
/// already answer the same assistant message, in ToolCall array order. In
/// cancelled mode, each backfilled call's status is flipped to `cancelled`
/// so a decided status never reverts to pending.
pub fn backfill_tool_results(messages: &mut Vec<Message>, mode: BackfillMode) -> Vec<Message> {
    let Some(assistant_idx) = last_assistant_with_tool_calls(messages) else {
        return Vec::new();
    };
    let assistant_id = messages[assistant_idx].id.clone();
    let satisfied = satisfied_call_ids(messages, assistant_idx);

    // Collect (array position, call) for every unhandled call up front; the
    // status mutation below needs a second pass over the same indices.
    let unhandled: Vec<(usize, ToolCall)> = messages[assistant_idx]
        .tool_calls
        .as_ref()
        .map(|calls| {
            calls
                .iter()
                .enumerate()
                .filter(|(_, tc)| !satisfied.contains(&tc.id))
                .filter(|(_, tc)| match mode {
                    BackfillMode::Rejected => {
                        tc.effective_status() == ToolCallStatus::Rejected
                    }
                    BackfillMode::Cancelled => true,
                })
                .map(|(i, tc)| (i, tc.clone()))
                .collect()
        })
        .unwrap_or_default();

    if unhandled.is_empty() {
        return Vec::new();
    }

    if mode == BackfillMode::Cancelled {
        if let Some(calls) = messages[assistant_idx].tool_calls.as_mut() {
            for (i, _) in &unhandled {
                calls[*i].status = Some(ToolCallStatus::Cancelled);
            }
        }
    }

    // Insert after the run of tool messages already following the assistant.
    let mut insert_idx = assistant_idx + 1;
    while insert_idx < messages.len() && messages[insert_idx].role == Role::Tool {
        insert_idx += 1;
    }

    let mut inserted = Vec::new();
    for (_, tc) in &unhandled {
        let tool_name = tc.function.name.clone();
        let args = tc.parsed_arguments();
        let content = match mode {
            BackfillMode::Rejected => denied_text(&tool_name, &args),
            BackfillMode::Cancelled => cancelled_text(&tool_name),
        };
        let mut msg = create_message(Role::Tool, content);
        msg.parent_id = assistant_id.clone();
        msg.tool = Some(tool_name);
        msg.arguments = Some(args);
        msg.tool_call_id = Some(tc.id.clone());
        inserted.push(msg);
    }

    for (offset, msg) in inserted.iter().enumerate() {
        messages.insert(insert_idx + offset, msg.clone());
    }

    inserted
}

// ── Provenance path ────────────────────────────────────────────────────────

/// Walk `parent_id` links from `message_id` back to the root, returning the
/// path in root-first order. Cycles break the walk; the path is capped at
/// 20 steps. Used to materialize the conversation line of a share fork.
pub fn build_message_path(messages: &[Message], message_id: &str) -> Vec<Message> {
    let by_id: std::collections::HashMap<&str, &Message> = messages
        .iter()
        .filter_map(|m| m.id.as_deref().map(|id| (id, m)))
        .collect();

    let mut path = Vec::new();
    let mut visited = HashSet::new();
    let mut current = Some(message_id.to_string());
    const MAX_STEPS: usize = 20;

    while let Some(id) = current {
        if path.len() >= MAX_STEPS || !visited.insert(id.clone()) {
            break;
        }
        let Some(msg) = by_id.get(id.as_str()) else { break };
        path.push((*msg).clone());
        current = msg.parent_id.clone();
    }

    path.reverse();
    path
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atoms::types::FunctionCall;

    fn tool_call(id: &str, name: &str, args: &str, status: Option<ToolCallStatus>) -> ToolCall {
        ToolCall {
            id: id.into(),
            call_type: "function".into(),
            function: FunctionCall { name: name.into(), arguments: args.into() },
            status,
        }
    }

    fn assistant_with_calls(calls: Vec<ToolCall>) -> Message {
        let mut m = create_message(Role::Assistant, "");
        m.tool_calls = Some(calls);
        m
    }

    #[test]
    fn backfill_rejected_only_touches_rejected_calls() {
        let mut messages = vec![
            create_message(Role::User, "do things"),
            assistant_with_calls(vec![
                tool_call("c1", "bash", r#"{"command":"ls"}"#, Some(ToolCallStatus::Rejected)),
                tool_call("c2", "bash", r#"{"command":"pwd"}"#, Some(ToolCallStatus::Pending)),
            ]),
        ];
        let inserted = backfill_tool_results(&mut messages, BackfillMode::Rejected);

        assert_eq!(inserted.len(), 1);
        assert_eq!(messages.len(), 3);
        let tool_msg = &messages[2];
        assert_eq!(tool_msg.role, Role::Tool);
        assert_eq!(tool_msg.tool_call_id.as_deref(), Some("c1"));
        assert_eq!(tool_msg.parent_id, messages[1].id);
        assert!(tool_msg.content.starts_with("ERROR: User denied execution of bash"));
        assert!(tool_msg.content.contains("The command was NOT executed."));

        // The pending sibling stays pending with no result.
        let calls = messages[1].tool_calls.as_ref().unwrap();
        assert_eq!(calls[1].effective_status(), ToolCallStatus::Pending);
    }

    #[test]
    fn backfill_rejected_is_idempotent() {
        let mut messages = vec![assistant_with_calls(vec![tool_call(
            "c1",
            "bash",
            r#"{"command":"rm x"}"#,
            Some(ToolCallStatus::Rejected),
        )])];
        assert_eq!(backfill_tool_results(&mut messages, BackfillMode::Rejected).len(), 1);
        assert_eq!(backfill_tool_results(&mut messages, BackfillMode::Rejected).len(), 0);
        assert_eq!(messages.len(), 2);
    }

    #[test]
    fn backfill_cancelled_covers_all_unhandled_and_flips_status() {
        let mut messages = vec![assistant_with_calls(vec![
            tool_call("c1", "file_read", r#"{"path":"a"}"#, Some(ToolCallStatus::Approved)),
            tool_call("c2", "bash", r#"{"command":"rm a"}"#, Some(ToolCallStatus::Pending)),
        ])];
        let inserted = backfill_tool_results(&mut messages, BackfillMode::Cancelled);

        assert_eq!(inserted.len(), 2);
        let calls = messages[0].tool_calls.as_ref().unwrap();
        assert_eq!(calls[0].effective_status(), ToolCallStatus::Cancelled);
        assert_eq!(calls[1].effective_status(), ToolCallStatus::Cancelled);
        assert!(messages[1].content.contains("cancelled due to interruption"));
        // Tool messages land in call order, right after the assistant.
        assert_eq!(messages[1].tool_call_id.as_deref(), Some("c1"));
        assert_eq!(messages[2].tool_call_id.as_deref(), Some("c2"));
    }

    #[test]
    fn backfill_inserts_after_existing_tool_results() {
        let mut messages = vec![assistant_with_calls(vec![
            tool_call("c1", "bash", "{}", Some(ToolCallStatus::Approved)),
            tool_call("c2", "bash", "{}", Some(ToolCallStatus::Rejected)),
        ])];
        let assistant_id = messages[0].id.clone();
        let mut done = create_message(Role::Tool, "ok");
        done.tool_call_id = Some("c1".into());
        done.parent_id = assistant_id;
        messages.push(done);
        // A later user message must not displace the insertion point.
        messages.push(create_message(Role::User, "and now?"));

        backfill_tool_results(&mut messages, BackfillMode::Rejected);

        assert_eq!(messages[2].tool_call_id.as_deref(), Some("c2"));
        assert_eq!(messages[3].role, Role::User);
    }

    #[test]
    fn backfill_without_tool_calls_is_a_no_op() {
        let mut messages = vec![
            create_message(Role::User, "hi"),
            create_message(Role::Assistant, "hello"),
        ];
        assert!(backfill_tool_results(&mut messages, BackfillMode::Cancelled).is_empty());
        assert_eq!(messages.len(), 2);
    }

    #[test]
    fn pending_detection() {
        let mut messages = vec![assistant_with_calls(vec![tool_call(
            "c1",
            "bash",
            "{}",
            Some(ToolCallStatus::Pending),
        )])];
        assert!(has_pending_tool_calls(&messages));
        assert_eq!(pending_tool_calls(&messages).len(), 1);

        messages[0].tool_calls.as_mut().unwrap()[0].status = Some(ToolCallStatus::Approved);
        assert!(!has_pending_tool_calls(&messages));
        assert!(pending_tool_calls(&messages).is_empty());
    }

    #[test]
    fn message_path_follows_parents_and_survives_cycles() {
        let mut a = create_message(Role::User, "root");
        a.id = Some("a".into());
        let mut b = create_message(Role::Assistant, "mid");
        b.id = Some("b".into());
        b.parent_id = Some("a".into());
        let mut c = create_message(Role::User, "leaf");
        c.id = Some("c".into());
        c.parent_id = Some("b".into());
        let messages = vec![a, b, c];

        let path = build_message_path(&messages, "c");
        let ids: Vec<_> = path.iter().filter_map(|m| m.id.as_deref()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);

        // Introduce a cycle: a → c.
        let mut cyclic = messages.clone();
        cyclic[0].parent_id = Some("c".into());
        let path = build_message_path(&cyclic, "c");
        assert_eq!(path.len(), 3);
    }

    #[test]
    fn message_ids_have_expected_shape() {
        let id = generate_message_id();
        assert!(id.starts_with("msg_"));
        assert_eq!(id.split('_').count(), 3);
        assert_eq!(generate_chat_id().len(), 6);
    }
}
