// Skiff — Worker runtime
// Claims jobs, runs the agent loop for one chat, and persists the outcome.
// At most one worker advances a given chat at a time (the dispatcher's
// busy set); everything else a worker decides is derived from persisted
// chat state, so redelivered jobs are no-ops.

use std::sync::Arc;

use log::{info, warn};
use tokio::task::JoinHandle;

use crate::atoms::error::{EngineError, EngineResult};
use crate::atoms::types::{Job, LoopStatus, Role};
use crate::config::AppConfig;
use crate::engine::agent_loop::{run_agent_loop, LoopHooks};
use crate::engine::messages::{backfill_tool_results, create_message, BackfillMode};
use crate::engine::permissions::PermissionManager;
use crate::engine::providers::AnyProvider;
use crate::engine::tools::runtime::{LocalRuntime, RemoteRuntime, ToolRuntime};
use crate::engine::tools::ToolRegistry;
use crate::queue::SqliteQueue;
use crate::store::Store;

/// Spawn the worker pool. Each task loops forever: claim, process, release.
pub fn spawn_workers(
    count: usize,
    store: Arc<Store>,
    queue: Arc<SqliteQueue>,
    permissions: Arc<PermissionManager>,
    config: Arc<AppConfig>,
) -> Vec<JoinHandle<()>> {
    (0..count)
        .map(|worker_id| {
            let store = store.clone();
            let queue = queue.clone();
            let permissions = permissions.clone();
            let config = config.clone();
            tokio::spawn(async move {
                info!("[skiff] worker {} up", worker_id);
                loop {
                    let job = queue.next_job().await;
                    let chat_id = job.chat_id.clone();
                    match process_job(store.clone(), permissions.clone(), config.clone(), job)
                        .await
                    {
                        Ok(status) => {
                            info!(
                                "[skiff] worker {}: chat {} finished status={:?}",
                                worker_id, chat_id, status
                            );
                        }
                        Err(e) => {
                            warn!("[skiff] worker {}: chat {} failed: {}", worker_id, chat_id, e);
                        }
                    }
                    queue.finish(&chat_id);
                }
            })
        })
        .collect()
}

/// Run one job to a terminal loop state and persist the result.
pub async fn process_job(
    store: Arc<Store>,
    permissions: Arc<PermissionManager>,
    config: Arc<AppConfig>,
    job: Job,
) -> EngineResult<LoopStatus> {
    let chat_id = job.chat_id.clone();
    let Some(mut chat) = store.get_chat_by_id(&chat_id)? else {
        return Err(EngineError::NotFound(format!("chat {}", chat_id)));
    };

    if chat.interrupted {
        // The chat was stopped since this job was queued. Cover any still
        // unhandled calls with cancellation results and go back to sleep —
        // invariant: a stopped chat is coverage-complete.
        let inserted = backfill_tool_results(&mut chat.messages, BackfillMode::Cancelled);
        if !inserted.is_empty() {
            store.save_chat_by_id(&mut chat)?;
        }
        return Ok(LoopStatus::Interrupted);
    }

    // Resolve the caller: the job's user when present, else the chat owner.
    let user_id = match job.user_id {
        Some(id) => id,
        None => match store.get_chat_owner(&chat_id)? {
            Some(id) => id,
            None => store.default_user_id()?,
        },
    };

    let bot_name = job.bot_name.as_deref().or(chat.bot_name.as_deref());
    let Some(bot) = store.resolve_bot_config(user_id, bot_name)? else {
        // Without a bot there is nothing to call; surface the problem as
        // the final assistant message so the event stream can close.
        warn!("[skiff] no bot config for user {} chat {}", user_id, chat_id);
        let mut msg = create_message(
            Role::Assistant,
            "ERROR: No bot is configured for this account. \
             Seed a default bot in config.toml and restart.",
        );
        msg.parent_id = chat.messages.last().and_then(|m| m.id.clone());
        store.append_message(&chat_id, &msg)?;
        return Ok(LoopStatus::Error);
    };
    info!(
        "[skiff] chat {}: bot={} dialect={:?} model={}",
        chat_id,
        bot.name,
        bot.dialect(),
        bot.model
    );

    let provider = AnyProvider::from_config(&bot);
    let runtime: Arc<dyn ToolRuntime> = if config.remote_sandbox {
        match store.resolve_vm_config(user_id)? {
            Some(vm) => Arc::new(RemoteRuntime::new(&config.sandbox_api_url, vm)),
            None => {
                warn!("[skiff] remote sandbox enabled but user {} has no VM; using local", user_id);
                Arc::new(LocalRuntime)
            }
        }
    } else {
        Arc::new(LocalRuntime)
    };
    let registry = ToolRegistry::new(runtime);

    let mut messages = chat.messages.clone();

    // Hooks read fresh chat state so approve/stop/auto_approve issued while
    // the loop is running take effect on the next iteration.
    let hooks = {
        let auto_store = store.clone();
        let auto_id = chat_id.clone();
        let append_store = store.clone();
        let append_id = chat_id.clone();
        let int_store = store.clone();
        let int_id = chat_id.clone();
        LoopHooks {
            auto_approve: Box::new(move || {
                auto_store
                    .get_chat_by_id(&auto_id)
                    .ok()
                    .flatten()
                    .map(|c| c.auto_approve)
                    .unwrap_or(false)
            }),
            on_message: Box::new(move |msg| {
                if let Err(e) = append_store.append_message(&append_id, msg) {
                    warn!("[skiff] append_message failed for chat {}: {}", append_id, e);
                }
            }),
            check_interrupted: Box::new(move || {
                int_store
                    .get_chat_by_id(&int_id)
                    .ok()
                    .flatten()
                    .map(|c| c.interrupted)
                    .unwrap_or(false)
            }),
        }
    };

    let result = run_agent_loop(
        provider.as_ref(),
        &mut messages,
        None,
        &registry,
        &permissions,
        &hooks,
        config.max_iterations,
    )
    .await;

    if result.status == LoopStatus::Interrupted {
        // Cover every unhandled call with a cancellation result so the chat
        // is coverage-complete across the interruption.
        backfill_tool_results(&mut messages, BackfillMode::Cancelled);
    }

    if result.status == LoopStatus::Error
        && !messages.last().map(|m| m.is_final_assistant()).unwrap_or(false)
    {
        // The local queue has no redelivery; surface transport-level
        // failures as the final assistant message so clients aren't left
        // with a half-open stream.
        if let Some(detail) = &result.error {
            let mut msg = create_message(Role::Assistant, format!("ERROR: {}", detail));
            msg.parent_id = messages.last().and_then(|m| m.id.clone());
            messages.push(msg);
        }
    }

    // Re-save the whole list: in-place mutations (statuses, backfill) only
    // exist here, the incremental appends already landed via the hook.
    chat.messages = messages;
    let interrupted_now = store
        .get_chat_by_id(&chat_id)?
        .map(|c| c.interrupted)
        .unwrap_or(chat.interrupted);
    chat.interrupted = interrupted_now;
    store.save_chat_by_id(&mut chat)?;

    Ok(result.status)
}
