// Skiff Store — SQLite persistence
// One rusqlite connection behind a parking_lot::Mutex, WAL-journaled, with
// idempotent migrations run at open. The message log of a chat is stored as
// a single JSON blob; only title/user/updated_at are indexed columns, so
// listing never materializes the blob.
//
// Module layout:
//   schema  — migrations
//   users   — external id → integer surrogate id
//   bots    — per-user bot configs + resolution chain
//   chats   — chat blob CRUD, append fast path, summaries
//   jobs    — durable queue rows for the local dispatcher

mod bots;
mod chats;
mod jobs;
mod schema;
mod users;

use std::path::Path;

use log::info;
use parking_lot::Mutex;
use rusqlite::Connection;

use crate::atoms::error::EngineResult;

/// Thread-safe database wrapper. All reads and writes go through the
/// single connection; per-chat serialization above this layer keeps write
/// contention low.
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    /// Open (or create) the database and initialize tables.
    pub fn open(path: &Path) -> EngineResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        info!("[skiff] opening store at {:?}", path);
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    /// In-memory store for tests.
    pub fn open_in_memory() -> EngineResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> EngineResult<Self> {
        conn.execute_batch("PRAGMA journal_mode=WAL;").ok();
        conn.execute_batch("PRAGMA foreign_keys=ON;").ok();
        schema::run_migrations(&conn)?;
        Ok(Store { conn: Mutex::new(conn) })
    }

    pub(crate) fn conn(&self) -> parking_lot::MutexGuard<'_, Connection> {
        self.conn.lock()
    }
}
