// User rows: the authenticated external identifier (e.g. an email or an
// opaque token subject) maps to a stable integer surrogate id. Users are
// created on first authenticated request and soft-deleted via a flag.

use rusqlite::{params, OptionalExtension};

use crate::atoms::error::EngineResult;
use super::Store;

/// The platform-default user owns fallback bot/VM configs.
pub const DEFAULT_USER: &str = "default";

impl Store {
    /// Resolve an external identifier to the integer surrogate id, creating
    /// the row on first sight.
    pub fn get_or_create_user(&self, external_id: &str) -> EngineResult<i64> {
        let conn = self.conn();

        let existing: Option<i64> = conn
            .query_row(
                "SELECT id FROM users WHERE user_id = ?1 AND deleted = 0",
                params![external_id],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(id) = existing {
            return Ok(id);
        }

        // Derive display fields when the identifier looks like an email.
        let (username, email) = match external_id.split_once('@') {
            Some((local, _)) => (Some(local.to_string()), Some(external_id.to_string())),
            None => (None, None),
        };

        conn.execute(
            "INSERT INTO users (user_id, username, email) VALUES (?1, ?2, ?3)",
            params![external_id, username, email],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// The platform-default user's id, creating it if necessary.
    pub fn default_user_id(&self) -> EngineResult<i64> {
        self.get_or_create_user(DEFAULT_USER)
    }

    /// Soft-delete: the row stays, lookups stop resolving it.
    pub fn delete_user(&self, external_id: &str) -> EngineResult<bool> {
        let changed = self.conn().execute(
            "UPDATE users SET deleted = 1 WHERE user_id = ?1 AND deleted = 0",
            params![external_id],
        )?;
        Ok(changed > 0)
    }
}
