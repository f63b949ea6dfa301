// Database schema and migrations for the Skiff store.
// Called once at startup by Store::open() after WAL is enabled.
// Adding a new table or column: append an idempotent CREATE TABLE IF NOT
// EXISTS or ALTER TABLE … ADD COLUMN (errors are swallowed) at the end of
// run_migrations() — never modify existing SQL to keep upgrade paths clean.

use rusqlite::Connection;

use crate::atoms::error::EngineResult;

pub(crate) fn run_migrations(conn: &Connection) -> EngineResult<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id TEXT NOT NULL UNIQUE,
            username TEXT,
            email TEXT,
            deleted INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_users_email ON users(email);

        CREATE TABLE IF NOT EXISTS chats (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            chat_id TEXT NOT NULL,
            title TEXT,
            origin_chat_id TEXT,
            json_content TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at TEXT NOT NULL DEFAULT (datetime('now')),
            UNIQUE (user_id, chat_id)
        );

        CREATE INDEX IF NOT EXISTS idx_chats_user_updated
            ON chats(user_id, updated_at DESC);
        CREATE INDEX IF NOT EXISTS idx_chats_origin ON chats(origin_chat_id);
        CREATE INDEX IF NOT EXISTS idx_chats_title ON chats(title);

        CREATE TABLE IF NOT EXISTS bot_configs (
            user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            name TEXT NOT NULL,
            base_url TEXT NOT NULL DEFAULT 'https://openrouter.ai/api/v1',
            api_key TEXT NOT NULL DEFAULT '',
            api_type TEXT,
            model TEXT NOT NULL DEFAULT '',
            description TEXT,
            max_tokens INTEGER,
            custom_api_path TEXT,
            PRIMARY KEY (user_id, name)
        );

        CREATE TABLE IF NOT EXISTS vm_configs (
            user_id INTEGER PRIMARY KEY REFERENCES users(id) ON DELETE CASCADE,
            api_token TEXT NOT NULL DEFAULT '',
            vm_name TEXT NOT NULL DEFAULT ''
        );

        CREATE TABLE IF NOT EXISTS jobs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            chat_id TEXT NOT NULL,
            bot_name TEXT,
            user_id INTEGER,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_jobs_chat ON jobs(chat_id);
    ",
    )?;

    Ok(())
}
