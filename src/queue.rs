// Skiff — Job dispatcher
// Reliable at-least-once delivery of "advance this chat" tokens to the
// worker pool. The trait admits an external cloud queue binding; the one
// shipped here is a single-process transport backed by the store's jobs
// table plus a tokio Notify for wake-up. The in-flight chat set doubles as
// the per-chat lock: a chat's next job is not handed out while a worker is
// still on it.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::info;
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::atoms::error::EngineResult;
use crate::atoms::types::Job;
use crate::store::Store;

#[async_trait]
pub trait JobDispatcher: Send + Sync {
    async fn enqueue(&self, job: Job) -> EngineResult<()>;
}

pub struct SqliteQueue {
    store: Arc<Store>,
    notify: Notify,
    busy: Mutex<HashSet<String>>,
}

impl SqliteQueue {
    pub fn new(store: Arc<Store>) -> Self {
        SqliteQueue {
            store,
            notify: Notify::new(),
            busy: Mutex::new(HashSet::new()),
        }
    }

    /// Block until a job for an idle chat is available, then claim it and
    /// mark its chat busy. The 1 s poll fallback covers wake-ups lost to
    /// races between claim and notify.
    pub async fn next_job(&self) -> Job {
        loop {
            {
                let mut busy = self.busy.lock();
                if let Ok(Some(job)) = self.store.claim_next_job(&busy) {
                    busy.insert(job.chat_id.clone());
                    return job;
                }
            }
            let _ = tokio::time::timeout(Duration::from_secs(1), self.notify.notified()).await;
        }
    }

    /// Release the per-chat lock after a worker finishes. Jobs skipped
    /// while the chat was busy become claimable again.
    pub fn finish(&self, chat_id: &str) {
        self.busy.lock().remove(chat_id);
        self.notify.notify_waiters();
    }
}

#[async_trait]
impl JobDispatcher for SqliteQueue {
    async fn enqueue(&self, job: Job) -> EngineResult<()> {
        info!("[skiff] enqueue chat={} bot={:?}", job.chat_id, job.bot_name);
        self.store.enqueue_job(&job)?;
        self.notify.notify_waiters();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue() -> SqliteQueue {
        SqliteQueue::new(Arc::new(Store::open_in_memory().unwrap()))
    }

    fn job(chat_id: &str) -> Job {
        Job { chat_id: chat_id.into(), bot_name: None, user_id: None }
    }

    #[tokio::test]
    async fn enqueued_jobs_are_delivered() {
        let q = queue();
        q.enqueue(job("a")).await.unwrap();
        let claimed = q.next_job().await;
        assert_eq!(claimed.chat_id, "a");
    }

    #[tokio::test]
    async fn one_runner_per_chat() {
        let q = queue();
        q.enqueue(job("a")).await.unwrap();
        q.enqueue(job("a")).await.unwrap();

        let first = q.next_job().await;
        assert_eq!(first.chat_id, "a");

        // The second job for the same chat is withheld while the first is
        // in flight.
        let blocked = tokio::time::timeout(Duration::from_millis(1500), q.next_job()).await;
        assert!(blocked.is_err());

        q.finish("a");
        let second = tokio::time::timeout(Duration::from_secs(3), q.next_job())
            .await
            .expect("job should unblock after finish");
        assert_eq!(second.chat_id, "a");
    }

    #[tokio::test]
    async fn other_chats_are_not_blocked() {
        let q = queue();
        q.enqueue(job("a")).await.unwrap();
        q.enqueue(job("b")).await.unwrap();

        let first = q.next_job().await;
        let second = q.next_job().await;
        let mut chats = vec![first.chat_id, second.chat_id];
        chats.sort();
        assert_eq!(chats, vec!["a", "b"]);
    }
}
