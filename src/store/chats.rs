// Chat persistence. Each chat is one row: indexed metadata columns plus the
// full message log as a JSON blob. Scoped accessors take the owning user;
// the *_by_id variants are for the worker, which has no user context.

use log::warn;
use rusqlite::{params, OptionalExtension};

use crate::atoms::error::{EngineError, EngineResult};
use crate::atoms::types::{Chat, ChatSummary, Message};
use crate::engine::messages::iso8601_timestamp;
use super::Store;

fn parse_chat(raw: &str) -> Option<Chat> {
    match serde_json::from_str::<Chat>(raw) {
        Ok(mut chat) => {
            // Stable display/order: by unix timestamp, ties keep insertion
            // order.
            chat.messages.sort_by_key(|m| m.unix_timestamp);
            Some(chat)
        }
        Err(e) => {
            warn!("[skiff] failed to parse chat blob: {}", e);
            None
        }
    }
}

impl Store {
    /// Upsert a chat for its owner, refreshing update_time and the derived
    /// title column.
    pub fn save_chat(&self, user_id: i64, chat: &mut Chat) -> EngineResult<()> {
        chat.update_time = iso8601_timestamp();
        let blob = serde_json::to_string(chat)?;
        self.conn().execute(
            "INSERT INTO chats (user_id, chat_id, title, origin_chat_id, json_content)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT (user_id, chat_id) DO UPDATE SET
                title = excluded.title,
                origin_chat_id = excluded.origin_chat_id,
                json_content = excluded.json_content,
                updated_at = datetime('now')",
            params![user_id, chat.id, chat.title(), chat.origin_chat_id, blob],
        )?;
        Ok(())
    }

    pub fn get_chat(&self, user_id: i64, chat_id: &str) -> EngineResult<Option<Chat>> {
        let conn = self.conn();
        let raw: Option<String> = conn
            .query_row(
                "SELECT json_content FROM chats WHERE user_id = ?1 AND chat_id = ?2",
                params![user_id, chat_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(raw.as_deref().and_then(parse_chat))
    }

    /// Unscoped fetch for the worker. `chat_id` collisions across users are
    /// ruled out by the id generator, not the schema; first match wins.
    pub fn get_chat_by_id(&self, chat_id: &str) -> EngineResult<Option<Chat>> {
        let conn = self.conn();
        let raw: Option<String> = conn
            .query_row(
                "SELECT json_content FROM chats WHERE chat_id = ?1",
                params![chat_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(raw.as_deref().and_then(parse_chat))
    }

    /// Owning user of a chat (worker-side bot resolution).
    pub fn get_chat_owner(&self, chat_id: &str) -> EngineResult<Option<i64>> {
        let conn = self.conn();
        let owner = conn
            .query_row(
                "SELECT user_id FROM chats WHERE chat_id = ?1",
                params![chat_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(owner)
    }

    /// Unscoped save for the worker; the chat must already exist.
    pub fn save_chat_by_id(&self, chat: &mut Chat) -> EngineResult<()> {
        chat.update_time = iso8601_timestamp();
        let blob = serde_json::to_string(chat)?;
        let changed = self.conn().execute(
            "UPDATE chats SET title = ?2, json_content = ?3, updated_at = datetime('now')
             WHERE chat_id = ?1",
            params![chat.id, chat.title(), blob],
        )?;
        if changed == 0 {
            return Err(EngineError::NotFound(format!("chat {}", chat.id)));
        }
        Ok(())
    }

    /// Append-only fast path used by the worker's message callback. One
    /// read-modify-write under the store lock.
    pub fn append_message(&self, chat_id: &str, message: &Message) -> EngineResult<()> {
        let conn = self.conn();
        let raw: String = conn
            .query_row(
                "SELECT json_content FROM chats WHERE chat_id = ?1",
                params![chat_id],
                |row| row.get(0),
            )
            .optional()?
            .ok_or_else(|| EngineError::NotFound(format!("chat {}", chat_id)))?;
        let mut chat: Chat = serde_json::from_str(&raw)?;
        chat.messages.push(message.clone());
        chat.update_time = iso8601_timestamp();
        let blob = serde_json::to_string(&chat)?;
        conn.execute(
            "UPDATE chats SET title = ?2, json_content = ?3, updated_at = datetime('now')
             WHERE chat_id = ?1",
            params![chat_id, chat.title(), blob],
        )?;
        Ok(())
    }

    /// Listing reads metadata columns only — the blob column never leaves
    /// the database.
    pub fn list_chats(
        &self,
        user_id: i64,
        query: Option<&str>,
        limit: i64,
    ) -> EngineResult<Vec<ChatSummary>> {
        let conn = self.conn();
        let mut sql = String::from(
            "SELECT chat_id, COALESCE(title, ''), created_at, updated_at
             FROM chats WHERE user_id = ?1",
        );
        if query.is_some() {
            sql.push_str(" AND title LIKE ?3");
        }
        sql.push_str(" ORDER BY updated_at DESC LIMIT ?2");

        let map_row = |row: &rusqlite::Row<'_>| {
            Ok(ChatSummary {
                chat_id: row.get(0)?,
                title: row.get(1)?,
                created_at: row.get(2)?,
                updated_at: row.get(3)?,
            })
        };

        let mut stmt = conn.prepare(&sql)?;
        let summaries = match query {
            Some(q) => {
                let like = format!("%{}%", q);
                stmt.query_map(params![user_id, limit, like], map_row)?
                    .filter_map(|r| r.ok())
                    .collect()
            }
            None => stmt
                .query_map(params![user_id, limit], map_row)?
                .filter_map(|r| r.ok())
                .collect(),
        };
        Ok(summaries)
    }

    pub fn delete_chat(&self, user_id: i64, chat_id: &str) -> EngineResult<bool> {
        let changed = self.conn().execute(
            "DELETE FROM chats WHERE user_id = ?1 AND chat_id = ?2",
            params![user_id, chat_id],
        )?;
        Ok(changed > 0)
    }
}
