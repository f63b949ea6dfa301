// Skiff Engine — Agent loop
// The chat → tool-call → tool-result → chat state machine. One invocation
// drives the provider until it answers with plain text, a tool call needs a
// human decision, the interrupt flag is raised, or the iteration cap hits.
//
// The loop is restartable: a resume phase first settles any tool calls left
// over from a persisted pause (executing approved ones, synthesizing results
// for rejected/cancelled ones) before the next model call. Every appended
// message is handed to the on_message hook so the caller can persist
// incrementally.

use crate::atoms::constants::{MAX_TOOL_RESULT_BYTES, TRUNCATION_SUFFIX};
use crate::atoms::types::{
    truncate_utf8, LoopResult, LoopStatus, Message, Role, ToolCallStatus,
};
use crate::engine::messages::{
    cancelled_text, create_message, denied_text, last_assistant_with_tool_calls,
    satisfied_call_ids,
};
use crate::engine::permissions::PermissionManager;
use crate::engine::providers::Provider;
use crate::engine::tools::ToolRegistry;
use log::{info, warn};

// ── Hooks ──────────────────────────────────────────────────────────────────

/// Callbacks threaded into one loop invocation. All three read *fresh* state
/// on every call — the interrupt flag and the auto-approve latch can be
/// flipped out-of-band while the loop is running.
pub struct LoopHooks<'a> {
    /// Per-chat latch: approve every tool call without consulting the
    /// permission evaluator.
    pub auto_approve: Box<dyn Fn() -> bool + Send + Sync + 'a>,
    /// Invoked for every appended message, before the loop moves on.
    pub on_message: Box<dyn Fn(&Message) + Send + Sync + 'a>,
    /// Cooperative cancellation, polled once per iteration.
    pub check_interrupted: Box<dyn Fn() -> bool + Send + Sync + 'a>,
}

impl LoopHooks<'static> {
    /// Inert hooks for callers that don't persist incrementally.
    pub fn none() -> Self {
        LoopHooks {
            auto_approve: Box::new(|| false),
            on_message: Box::new(|_| {}),
            check_interrupted: Box::new(|| false),
        }
    }
}

// ── Entry point ────────────────────────────────────────────────────────────

pub async fn run_agent_loop(
    provider: &dyn Provider,
    messages: &mut Vec<Message>,
    system_prompt: Option<&str>,
    registry: &ToolRegistry,
    permissions: &PermissionManager,
    hooks: &LoopHooks<'_>,
    max_iterations: u32,
) -> LoopResult {
    let mut new_messages: Vec<Message> = Vec::new();
    let specs = registry.specs();

    // ── Resume phase ───────────────────────────────────────────────────
    // Settle tool calls persisted by a previous invocation before talking
    // to the model again. A still-pending call means the human hasn't
    // decided yet: bail out without executing anything, so redelivered
    // jobs are no-ops.
    match settle_unhandled_calls(messages, &mut new_messages, registry, hooks).await {
        Settle::Pending => {
            return LoopResult::new(LoopStatus::ApprovalNeeded, new_messages);
        }
        Settle::Clear => {}
    }

    for iteration in 0..max_iterations {
        if (hooks.check_interrupted)() {
            info!("[skiff] loop interrupted at iteration {}", iteration);
            return LoopResult::new(LoopStatus::Interrupted, new_messages);
        }

        let reply = match provider.call(messages, system_prompt, &specs).await {
            Ok(reply) => reply,
            Err(e) if e.is_client_error() => {
                // Terminal: surface the upstream complaint as an assistant
                // message so the chat reaches a final, streamable state.
                warn!("[skiff] provider client error: {}", e);
                let mut msg = create_message(Role::Assistant, e.to_string());
                msg.parent_id = messages.last().and_then(|m| m.id.clone());
                push_message(messages, &mut new_messages, hooks, msg);
                let mut result = LoopResult::new(LoopStatus::Error, new_messages);
                result.error = Some(e.to_string());
                return result;
            }
            Err(e) => {
                warn!("[skiff] provider error: {}", e);
                let mut result = LoopResult::new(LoopStatus::Error, new_messages);
                result.error = Some(e.to_string());
                return result;
            }
        };

        let parent_id = messages.last().and_then(|m| m.id.clone());
        let mut assistant = create_message(Role::Assistant, reply.content.unwrap_or_default());
        assistant.parent_id = parent_id;
        assistant.model = reply.model;
        assistant.provider = reply.provider;

        let Some(mut calls) = reply.tool_calls.filter(|c| !c.is_empty()) else {
            // Plain text: the conversation round is complete.
            push_message(messages, &mut new_messages, hooks, assistant);
            return LoopResult::new(LoopStatus::Completed, new_messages);
        };

        // ── Status annotation ──────────────────────────────────────────
        // One pass, in array order. The first call that needs a human
        // decision marks itself and every later sibling pending — tools
        // must not run out of order around an undecided call.
        let mut needs_approval = false;
        for tc in calls.iter_mut() {
            if needs_approval {
                tc.status = Some(ToolCallStatus::Pending);
                continue;
            }
            let unknown = registry.get(&tc.function.name).is_none();
            if unknown
                || (hooks.auto_approve)()
                || permissions.is_allowed(&tc.function.name, &tc.parsed_arguments())
            {
                tc.status = Some(ToolCallStatus::Approved);
            } else {
                tc.status = Some(ToolCallStatus::Pending);
                needs_approval = true;
            }
        }

        assistant.tool_calls = Some(calls);
        push_message(messages, &mut new_messages, hooks, assistant);

        if needs_approval {
            // Persist the annotated statuses and pause. Nothing executes —
            // re-entry settles the decided calls in order.
            return LoopResult::new(LoopStatus::ApprovalNeeded, new_messages);
        }

        match settle_unhandled_calls(messages, &mut new_messages, registry, hooks).await {
            Settle::Pending => {
                return LoopResult::new(LoopStatus::ApprovalNeeded, new_messages);
            }
            Settle::Clear => {}
        }
    }

    info!("[skiff] loop hit the iteration cap ({})", max_iterations);
    LoopResult::new(LoopStatus::MaxIterations, new_messages)
}

// ── Tool-call settlement ───────────────────────────────────────────────────

enum Settle {
    /// Every call of the last tool-bearing assistant message has a result.
    Clear,
    /// An undecided call remains; nothing was executed.
    Pending,
}

/// Produce a tool message for every unhandled call of the most recent
/// assistant-with-tool-calls, in ToolCall array order:
/// approved → the tool's (truncated) output, rejected → the fixed denial
/// string, cancelled → the fixed cancellation string. If any unhandled call
/// is still pending, nothing runs at all.
async fn settle_unhandled_calls(
    messages: &mut Vec<Message>,
    new_messages: &mut Vec<Message>,
    registry: &ToolRegistry,
    hooks: &LoopHooks<'_>,
) -> Settle {
    let Some(idx) = last_assistant_with_tool_calls(messages) else {
        return Settle::Clear;
    };
    let assistant_id = messages[idx].id.clone();
    let satisfied = satisfied_call_ids(messages, idx);
    let unhandled: Vec<_> = messages[idx]
        .tool_calls
        .clone()
        .unwrap_or_default()
        .into_iter()
        .filter(|tc| !satisfied.contains(&tc.id))
        .collect();

    if unhandled
        .iter()
        .any(|tc| tc.effective_status() == ToolCallStatus::Pending)
    {
        return Settle::Pending;
    }

    for tc in unhandled {
        let name = tc.function.name.clone();
        let args = tc.parsed_arguments();
        let content = match tc.effective_status() {
            ToolCallStatus::Approved => {
                info!("[skiff] executing tool {} id={}", name, tc.id);
                let result = match registry.get(&name) {
                    Some(tool) => tool.execute(&args).await,
                    None => format!("Unknown tool: {}", name),
                };
                truncate_tool_result(result)
            }
            ToolCallStatus::Rejected => denied_text(&name, &args),
            ToolCallStatus::Cancelled => cancelled_text(&name),
            // Unreachable: pending short-circuits above.
            ToolCallStatus::Pending => return Settle::Pending,
        };

        let mut msg = create_message(Role::Tool, content);
        msg.parent_id = assistant_id.clone();
        msg.tool = Some(name);
        msg.arguments = Some(args);
        msg.tool_call_id = Some(tc.id.clone());
        push_message(messages, new_messages, hooks, msg);
    }

    Settle::Clear
}

fn push_message(
    messages: &mut Vec<Message>,
    new_messages: &mut Vec<Message>,
    hooks: &LoopHooks<'_>,
    msg: Message,
) {
    (hooks.on_message)(&msg);
    messages.push(msg.clone());
    new_messages.push(msg);
}

/// Cap a tool result at the persisted limit, cutting at a char boundary.
/// The original output is discarded.
fn truncate_tool_result(result: String) -> String {
    if result.len() <= MAX_TOOL_RESULT_BYTES {
        return result;
    }
    let mut out = truncate_utf8(&result, MAX_TOOL_RESULT_BYTES).to_string();
    out.push_str(TRUNCATION_SUFFIX);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atoms::types::{FunctionCall, ProviderReply, ToolCall};
    use crate::engine::messages::backfill_tool_results;
    use crate::engine::messages::BackfillMode;
    use crate::engine::providers::ProviderError;
    use crate::engine::tools::Tool;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::{json, Value};
    use std::collections::VecDeque;
    use std::sync::Arc;

    // ── Scripted provider ──────────────────────────────────────────────

    struct ScriptedProvider {
        replies: Mutex<VecDeque<Result<ProviderReply, ProviderError>>>,
        calls_made: Mutex<usize>,
    }

    impl ScriptedProvider {
        fn new(replies: Vec<Result<ProviderReply, ProviderError>>) -> Self {
            ScriptedProvider {
                replies: Mutex::new(replies.into()),
                calls_made: Mutex::new(0),
            }
        }

        fn calls_made(&self) -> usize {
            *self.calls_made.lock()
        }
    }

    #[async_trait]
    impl Provider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn call(
            &self,
            _messages: &[Message],
            _system_prompt: Option<&str>,
            _tools: &[crate::atoms::types::ToolDefinition],
        ) -> Result<ProviderReply, ProviderError> {
            *self.calls_made.lock() += 1;
            self.replies
                .lock()
                .pop_front()
                .unwrap_or(Err(ProviderError::Transport("script exhausted".into())))
        }
    }

    // ── Recording tool ─────────────────────────────────────────────────

    struct RecordingTool {
        name: &'static str,
        output: String,
        executions: Arc<Mutex<Vec<Value>>>,
    }

    #[async_trait]
    impl Tool for RecordingTool {
        fn name(&self) -> &'static str {
            self.name
        }
        fn description(&self) -> &'static str {
            "test tool"
        }
        fn parameters(&self) -> Value {
            json!({"type": "object", "properties": {}})
        }
        async fn execute(&self, arguments: &Value) -> String {
            self.executions.lock().push(arguments.clone());
            self.output.clone()
        }
    }

    struct Harness {
        registry: ToolRegistry,
        executions: Arc<Mutex<Vec<Value>>>,
    }

    fn harness_with(outputs: &[(&'static str, &str)]) -> Harness {
        let executions = Arc::new(Mutex::new(Vec::new()));
        let tools: Vec<Box<dyn Tool>> = outputs
            .iter()
            .map(|(name, output)| {
                Box::new(RecordingTool {
                    name,
                    output: output.to_string(),
                    executions: executions.clone(),
                }) as Box<dyn Tool>
            })
            .collect();
        Harness { registry: ToolRegistry::with_tools(tools), executions }
    }

    fn text_reply(content: &str) -> Result<ProviderReply, ProviderError> {
        Ok(ProviderReply {
            content: Some(content.to_string()),
            tool_calls: None,
            model: Some("test-model".into()),
            provider: Some("test".into()),
        })
    }

    fn tool_reply(calls: &[(&str, &str, &str)]) -> Result<ProviderReply, ProviderError> {
        Ok(ProviderReply {
            content: None,
            tool_calls: Some(
                calls
                    .iter()
                    .map(|(id, name, args)| ToolCall {
                        id: id.to_string(),
                        call_type: "function".into(),
                        function: FunctionCall {
                            name: name.to_string(),
                            arguments: args.to_string(),
                        },
                        status: None,
                    })
                    .collect(),
            ),
            model: Some("test-model".into()),
            provider: Some("test".into()),
        })
    }

    fn auto_approve_hooks() -> LoopHooks<'static> {
        LoopHooks { auto_approve: Box::new(|| true), ..hooks_none() }
    }

    fn hooks_none() -> LoopHooks<'static> {
        LoopHooks::none()
    }

    fn user_prompt(text: &str) -> Vec<Message> {
        vec![create_message(Role::User, text)]
    }

    #[tokio::test]
    async fn plain_completion_appends_one_assistant_message() {
        let provider = ScriptedProvider::new(vec![text_reply("hi")]);
        let h = harness_with(&[("bash", "ok")]);
        let mut messages = user_prompt("say hi");

        let result = run_agent_loop(
            &provider,
            &mut messages,
            None,
            &h.registry,
            &PermissionManager::default(),
            &hooks_none(),
            50,
        )
        .await;

        assert_eq!(result.status, LoopStatus::Completed);
        assert_eq!(result.new_messages.len(), 1);
        assert_eq!(messages.len(), 2);
        let assistant = &messages[1];
        assert_eq!(assistant.content, "hi");
        assert_eq!(assistant.model.as_deref(), Some("test-model"));
        assert_eq!(assistant.parent_id, messages[0].id);
        assert!(assistant.is_final_assistant());
    }

    #[tokio::test]
    async fn auto_approved_tool_runs_then_completes() {
        let provider = ScriptedProvider::new(vec![
            tool_reply(&[("c1", "bash", r#"{"command":"ls /"}"#)]),
            text_reply("done"),
        ]);
        let h = harness_with(&[("bash", "root contents")]);
        let mut messages = user_prompt("list root");

        let result = run_agent_loop(
            &provider,
            &mut messages,
            Some("sys"),
            &h.registry,
            &PermissionManager::default(),
            &auto_approve_hooks(),
            50,
        )
        .await;

        assert_eq!(result.status, LoopStatus::Completed);
        // user, assistant(tool_calls), tool, assistant("done")
        assert_eq!(messages.len(), 4);
        let assistant = &messages[1];
        let calls = assistant.tool_calls.as_ref().unwrap();
        assert_eq!(calls[0].effective_status(), ToolCallStatus::Approved);

        let tool_msg = &messages[2];
        assert_eq!(tool_msg.role, Role::Tool);
        assert_eq!(tool_msg.content, "root contents");
        assert_eq!(tool_msg.tool.as_deref(), Some("bash"));
        assert_eq!(tool_msg.tool_call_id.as_deref(), Some("c1"));
        assert_eq!(tool_msg.parent_id, assistant.id);
        assert_eq!(tool_msg.arguments.as_ref().unwrap()["command"], "ls /");

        assert_eq!(messages[3].content, "done");
        assert_eq!(h.executions.lock().len(), 1);
        assert_eq!(provider.calls_made(), 2);
    }

    #[tokio::test]
    async fn unauthorized_call_pauses_before_any_execution() {
        // Two calls in one message: file_read is always allowed, bash is
        // not. Neither runs — the loop persists statuses and pauses.
        let provider = ScriptedProvider::new(vec![tool_reply(&[
            ("c1", "file_read", r#"{"path":"a"}"#),
            ("c2", "bash", r#"{"command":"rm a"}"#),
        ])]);
        let h = harness_with(&[("file_read", "contents"), ("bash", "gone")]);
        let mut messages = user_prompt("read then delete");

        let result = run_agent_loop(
            &provider,
            &mut messages,
            None,
            &h.registry,
            &PermissionManager::default(),
            &hooks_none(),
            50,
        )
        .await;

        assert_eq!(result.status, LoopStatus::ApprovalNeeded);
        // Messages end at the annotated assistant — no tool messages yet.
        assert_eq!(messages.len(), 2);
        let calls = messages[1].tool_calls.as_ref().unwrap();
        assert_eq!(calls[0].effective_status(), ToolCallStatus::Approved);
        assert_eq!(calls[1].effective_status(), ToolCallStatus::Pending);
        assert!(h.executions.lock().is_empty());
    }

    #[tokio::test]
    async fn pending_stops_the_line_for_later_siblings() {
        let provider = ScriptedProvider::new(vec![tool_reply(&[
            ("c1", "bash", r#"{"command":"rm a"}"#),
            ("c2", "file_read", r#"{"path":"a"}"#),
        ])]);
        let h = harness_with(&[("file_read", "contents"), ("bash", "gone")]);
        let mut messages = user_prompt("go");

        let result = run_agent_loop(
            &provider,
            &mut messages,
            None,
            &h.registry,
            &PermissionManager::default(),
            &hooks_none(),
            50,
        )
        .await;

        assert_eq!(result.status, LoopStatus::ApprovalNeeded);
        let calls = messages[1].tool_calls.as_ref().unwrap();
        // file_read would have been approved on its own, but it sits
        // behind the undecided bash call.
        assert_eq!(calls[0].effective_status(), ToolCallStatus::Pending);
        assert_eq!(calls[1].effective_status(), ToolCallStatus::Pending);
    }

    #[tokio::test]
    async fn resume_executes_approved_and_skips_rejected() {
        let h = harness_with(&[("file_read", "contents"), ("bash", "gone")]);

        // First run pauses with [approved file_read, pending bash].
        let provider = ScriptedProvider::new(vec![tool_reply(&[
            ("c1", "file_read", r#"{"path":"a"}"#),
            ("c2", "bash", r#"{"command":"rm a"}"#),
        ])]);
        let mut messages = user_prompt("read then delete");
        let result = run_agent_loop(
            &provider,
            &mut messages,
            None,
            &h.registry,
            &PermissionManager::default(),
            &hooks_none(),
            50,
        )
        .await;
        assert_eq!(result.status, LoopStatus::ApprovalNeeded);

        // The approval endpoint approves c1's sibling decision: c2 is
        // rejected, then backfill synthesizes its denial.
        {
            let calls = messages[1].tool_calls.as_mut().unwrap();
            calls[0].status = Some(ToolCallStatus::Approved);
            calls[1].status = Some(ToolCallStatus::Rejected);
        }
        backfill_tool_results(&mut messages, BackfillMode::Rejected);

        // Second run settles c1, then the model wraps up.
        let provider = ScriptedProvider::new(vec![text_reply("all settled")]);
        let result = run_agent_loop(
            &provider,
            &mut messages,
            None,
            &h.registry,
            &PermissionManager::default(),
            &hooks_none(),
            50,
        )
        .await;

        assert_eq!(result.status, LoopStatus::Completed);
        // user, assistant, tool(denial for c2), tool(result for c1), assistant
        assert_eq!(messages.len(), 5);
        assert!(messages[2].content.starts_with("ERROR: User denied execution of bash"));
        assert_eq!(messages[3].content, "contents");
        assert_eq!(messages[3].tool_call_id.as_deref(), Some("c1"));
        assert_eq!(messages[4].content, "all settled");

        // The rejected bash call never produced a side effect.
        let executed = h.executions.lock();
        assert_eq!(executed.len(), 1);
        assert_eq!(executed[0]["path"], "a");
    }

    #[tokio::test]
    async fn redelivered_job_with_pending_calls_is_a_no_op() {
        let h = harness_with(&[("file_read", "contents"), ("bash", "gone")]);
        let mut messages = user_prompt("go");
        let mut assistant = create_message(Role::Assistant, "");
        assistant.tool_calls = Some(vec![
            ToolCall {
                id: "c1".into(),
                call_type: "function".into(),
                function: FunctionCall {
                    name: "file_read".into(),
                    arguments: r#"{"path":"a"}"#.into(),
                },
                status: Some(ToolCallStatus::Approved),
            },
            ToolCall {
                id: "c2".into(),
                call_type: "function".into(),
                function: FunctionCall {
                    name: "bash".into(),
                    arguments: r#"{"command":"rm a"}"#.into(),
                },
                status: Some(ToolCallStatus::Pending),
            },
        ]);
        messages.push(assistant);

        let provider = ScriptedProvider::new(vec![]);
        let before = messages.len();
        let result = run_agent_loop(
            &provider,
            &mut messages,
            None,
            &h.registry,
            &PermissionManager::default(),
            &hooks_none(),
            50,
        )
        .await;

        assert_eq!(result.status, LoopStatus::ApprovalNeeded);
        assert!(result.new_messages.is_empty());
        assert_eq!(messages.len(), before);
        // Even the approved sibling stays un-executed while a decision is
        // outstanding.
        assert!(h.executions.lock().is_empty());
        assert_eq!(provider.calls_made(), 0);
    }

    #[tokio::test]
    async fn unknown_tool_is_approved_and_reports_downstream() {
        let provider = ScriptedProvider::new(vec![
            tool_reply(&[("c1", "web_search", r#"{"q":"rust"}"#)]),
            text_reply("sorry, no such tool"),
        ]);
        let h = harness_with(&[("bash", "ok")]);
        let mut messages = user_prompt("search the web");

        let result = run_agent_loop(
            &provider,
            &mut messages,
            None,
            &h.registry,
            &PermissionManager::default(),
            &hooks_none(),
            50,
        )
        .await;

        assert_eq!(result.status, LoopStatus::Completed);
        assert_eq!(messages[2].content, "Unknown tool: web_search");
        assert_eq!(
            messages[1].tool_calls.as_ref().unwrap()[0].effective_status(),
            ToolCallStatus::Approved
        );
    }

    #[tokio::test]
    async fn long_tool_results_are_truncated() {
        let long_output = "x".repeat(MAX_TOOL_RESULT_BYTES + 5_000);
        let provider = ScriptedProvider::new(vec![
            tool_reply(&[("c1", "bash", r#"{"command":"cat big"}"#)]),
            text_reply("done"),
        ]);
        let h = harness_with(&[("bash", long_output.as_str())]);
        let mut messages = user_prompt("dump it");

        run_agent_loop(
            &provider,
            &mut messages,
            None,
            &h.registry,
            &PermissionManager::default(),
            &auto_approve_hooks(),
            50,
        )
        .await;

        let tool_msg = &messages[2];
        assert!(tool_msg.content.ends_with(TRUNCATION_SUFFIX));
        assert_eq!(
            tool_msg.content.len(),
            MAX_TOOL_RESULT_BYTES + TRUNCATION_SUFFIX.len()
        );
    }

    #[tokio::test]
    async fn malformed_arguments_reach_the_tool_as_empty_object() {
        let provider = ScriptedProvider::new(vec![
            tool_reply(&[("c1", "bash", "{{{not json")]),
            text_reply("done"),
        ]);
        let h = harness_with(&[("bash", "ok")]);
        let mut messages = user_prompt("go");

        run_agent_loop(
            &provider,
            &mut messages,
            None,
            &h.registry,
            &PermissionManager::default(),
            &auto_approve_hooks(),
            50,
        )
        .await;

        assert_eq!(h.executions.lock()[0], json!({}));
        assert_eq!(messages[2].arguments.as_ref().unwrap(), &json!({}));
    }

    #[tokio::test]
    async fn client_error_becomes_synthetic_assistant_message() {
        let provider = ScriptedProvider::new(vec![Err(ProviderError::Api {
            status: 400,
            message: "bad request".into(),
        })]);
        let h = harness_with(&[("bash", "ok")]);
        let mut messages = user_prompt("go");

        let result = run_agent_loop(
            &provider,
            &mut messages,
            None,
            &h.registry,
            &PermissionManager::default(),
            &hooks_none(),
            50,
        )
        .await;

        assert_eq!(result.status, LoopStatus::Error);
        let last = messages.last().unwrap();
        assert_eq!(last.role, Role::Assistant);
        assert!(last.content.contains("bad request"));
        assert!(last.is_final_assistant());
    }

    #[tokio::test]
    async fn transport_error_returns_error_without_messages() {
        let provider =
            ScriptedProvider::new(vec![Err(ProviderError::Transport("connection reset".into()))]);
        let h = harness_with(&[("bash", "ok")]);
        let mut messages = user_prompt("go");

        let result = run_agent_loop(
            &provider,
            &mut messages,
            None,
            &h.registry,
            &PermissionManager::default(),
            &hooks_none(),
            50,
        )
        .await;

        assert_eq!(result.status, LoopStatus::Error);
        assert!(result.new_messages.is_empty());
        assert!(result.error.unwrap().contains("connection reset"));
        assert_eq!(messages.len(), 1);
    }

    #[tokio::test]
    async fn interrupt_flag_stops_before_the_model_call() {
        let provider = ScriptedProvider::new(vec![text_reply("never sent")]);
        let h = harness_with(&[("bash", "ok")]);
        let mut messages = user_prompt("go");

        let hooks = LoopHooks {
            check_interrupted: Box::new(|| true),
            ..LoopHooks::none()
        };
        let result = run_agent_loop(
            &provider,
            &mut messages,
            None,
            &h.registry,
            &PermissionManager::default(),
            &hooks,
            50,
        )
        .await;

        assert_eq!(result.status, LoopStatus::Interrupted);
        assert_eq!(provider.calls_made(), 0);
        assert_eq!(messages.len(), 1);
    }

    #[tokio::test]
    async fn iteration_cap_bounds_a_single_invocation() {
        let provider = ScriptedProvider::new(vec![
            tool_reply(&[("c1", "bash", r#"{"command":"a"}"#)]),
            tool_reply(&[("c2", "bash", r#"{"command":"b"}"#)]),
            tool_reply(&[("c3", "bash", r#"{"command":"c"}"#)]),
        ]);
        let h = harness_with(&[("bash", "ok")]);
        let mut messages = user_prompt("loop forever");

        let result = run_agent_loop(
            &provider,
            &mut messages,
            None,
            &h.registry,
            &PermissionManager::default(),
            &auto_approve_hooks(),
            2,
        )
        .await;

        assert_eq!(result.status, LoopStatus::MaxIterations);
        assert_eq!(provider.calls_made(), 2);
        assert_eq!(h.executions.lock().len(), 2);
    }

    #[tokio::test]
    async fn on_message_hook_sees_every_append() {
        let seen: Arc<Mutex<Vec<Role>>> = Arc::new(Mutex::new(Vec::new()));
        let seen_hook = seen.clone();
        let hooks = LoopHooks {
            auto_approve: Box::new(|| true),
            on_message: Box::new(move |m| seen_hook.lock().push(m.role)),
            check_interrupted: Box::new(|| false),
        };

        let provider = ScriptedProvider::new(vec![
            tool_reply(&[("c1", "bash", r#"{"command":"ls"}"#)]),
            text_reply("done"),
        ]);
        let h = harness_with(&[("bash", "ok")]);
        let mut messages = user_prompt("go");

        run_agent_loop(
            &provider,
            &mut messages,
            None,
            &h.registry,
            &PermissionManager::default(),
            &hooks,
            50,
        )
        .await;

        assert_eq!(*seen.lock(), vec![Role::Assistant, Role::Tool, Role::Assistant]);
    }
}
