// Durable queue rows for the local job dispatcher. At-least-once: a row is
// deleted on claim, and a crash between claim and completion simply loses
// the wake-up — the chat state itself makes redelivery (or a manual poke)
// safe.

use std::collections::HashSet;

use rusqlite::params;

use crate::atoms::error::EngineResult;
use crate::atoms::types::Job;
use super::Store;

impl Store {
    pub fn enqueue_job(&self, job: &Job) -> EngineResult<i64> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO jobs (chat_id, bot_name, user_id) VALUES (?1, ?2, ?3)",
            params![job.chat_id, job.bot_name, job.user_id],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Pop the oldest job whose chat is not currently being processed.
    /// `busy` is the dispatcher's in-flight chat set — skipping those rows
    /// is what serializes workers per chat.
    pub fn claim_next_job(&self, busy: &HashSet<String>) -> EngineResult<Option<Job>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, chat_id, bot_name, user_id FROM jobs ORDER BY id LIMIT 50",
        )?;
        let rows: Vec<(i64, Job)> = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    Job {
                        chat_id: row.get(1)?,
                        bot_name: row.get(2)?,
                        user_id: row.get(3)?,
                    },
                ))
            })?
            .filter_map(|r| r.ok())
            .collect();

        for (row_id, job) in rows {
            if busy.contains(&job.chat_id) {
                continue;
            }
            conn.execute("DELETE FROM jobs WHERE id = ?1", params![row_id])?;
            return Ok(Some(job));
        }
        Ok(None)
    }

    pub fn pending_job_count(&self) -> EngineResult<i64> {
        let count = self
            .conn()
            .query_row("SELECT COUNT(*) FROM jobs", [], |row| row.get(0))?;
        Ok(count)
    }
}
