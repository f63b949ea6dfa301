// Bot and VM configs, keyed by user. Resolution falls back to the user's
// "default" bot, then to the platform-default user's "default" bot, so a
// fresh tenant can run against the operator-seeded config.

use rusqlite::{params, OptionalExtension, Row};

use crate::atoms::error::EngineResult;
use crate::atoms::types::{ApiDialect, BotConfig, VmConfig};
use super::users::DEFAULT_USER;
use super::Store;

fn dialect_to_str(d: ApiDialect) -> &'static str {
    match d {
        ApiDialect::OpenAi => "openai",
        ApiDialect::Anthropic => "anthropic",
    }
}

fn dialect_from_str(s: &str) -> Option<ApiDialect> {
    match s {
        "openai" => Some(ApiDialect::OpenAi),
        "anthropic" => Some(ApiDialect::Anthropic),
        _ => None,
    }
}

fn row_to_bot(row: &Row<'_>) -> rusqlite::Result<BotConfig> {
    let api_type: Option<String> = row.get(3)?;
    Ok(BotConfig {
        name: row.get(0)?,
        base_url: row.get(1)?,
        api_key: row.get(2)?,
        api_type: api_type.as_deref().and_then(dialect_from_str),
        model: row.get(4)?,
        description: row.get(5)?,
        max_tokens: row.get(6)?,
        custom_api_path: row.get(7)?,
    })
}

const BOT_COLUMNS: &str =
    "name, base_url, api_key, api_type, model, description, max_tokens, custom_api_path";

impl Store {
    // ── Bot configs ────────────────────────────────────────────────────

    pub fn get_bot_config(&self, user_id: i64, name: &str) -> EngineResult<Option<BotConfig>> {
        let conn = self.conn();
        let bot = conn
            .query_row(
                &format!("SELECT {BOT_COLUMNS} FROM bot_configs WHERE user_id = ?1 AND name = ?2"),
                params![user_id, name],
                row_to_bot,
            )
            .optional()?;
        Ok(bot)
    }

    /// Insert or update a bot config.
    pub fn set_bot_config(&self, user_id: i64, config: &BotConfig) -> EngineResult<()> {
        self.conn().execute(
            "INSERT INTO bot_configs
                (user_id, name, base_url, api_key, api_type, model, description,
                 max_tokens, custom_api_path)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT (user_id, name) DO UPDATE SET
                base_url = excluded.base_url,
                api_key = excluded.api_key,
                api_type = excluded.api_type,
                model = excluded.model,
                description = excluded.description,
                max_tokens = excluded.max_tokens,
                custom_api_path = excluded.custom_api_path",
            params![
                user_id,
                config.name,
                config.base_url,
                config.api_key,
                config.api_type.map(dialect_to_str),
                config.model,
                config.description,
                config.max_tokens,
                config.custom_api_path,
            ],
        )?;
        Ok(())
    }

    pub fn list_bot_configs(&self, user_id: i64) -> EngineResult<Vec<BotConfig>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {BOT_COLUMNS} FROM bot_configs WHERE user_id = ?1 ORDER BY name"
        ))?;
        let bots = stmt
            .query_map(params![user_id], row_to_bot)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(bots)
    }

    /// The "default" bot cannot be deleted.
    pub fn delete_bot_config(&self, user_id: i64, name: &str) -> EngineResult<bool> {
        if name == "default" {
            return Ok(false);
        }
        let changed = self.conn().execute(
            "DELETE FROM bot_configs WHERE user_id = ?1 AND name = ?2",
            params![user_id, name],
        )?;
        Ok(changed > 0)
    }

    /// Resolution chain: the user's named bot, the user's default bot, then
    /// the platform-default user's default bot.
    pub fn resolve_bot_config(
        &self,
        user_id: i64,
        name: Option<&str>,
    ) -> EngineResult<Option<BotConfig>> {
        if let Some(name) = name {
            if let Some(bot) = self.get_bot_config(user_id, name)? {
                return Ok(Some(bot));
            }
        }
        if let Some(bot) = self.get_bot_config(user_id, "default")? {
            return Ok(Some(bot));
        }
        let fallback_user = self.get_or_create_user(DEFAULT_USER)?;
        if fallback_user != user_id {
            return self.get_bot_config(fallback_user, "default");
        }
        Ok(None)
    }

    // ── VM configs ─────────────────────────────────────────────────────

    pub fn get_vm_config(&self, user_id: i64) -> EngineResult<Option<VmConfig>> {
        let conn = self.conn();
        let vm = conn
            .query_row(
                "SELECT api_token, vm_name FROM vm_configs WHERE user_id = ?1",
                params![user_id],
                |row| Ok(VmConfig { api_token: row.get(0)?, vm_name: row.get(1)? }),
            )
            .optional()?;
        Ok(vm)
    }

    pub fn set_vm_config(&self, user_id: i64, config: &VmConfig) -> EngineResult<()> {
        self.conn().execute(
            "INSERT INTO vm_configs (user_id, api_token, vm_name) VALUES (?1, ?2, ?3)
             ON CONFLICT (user_id) DO UPDATE SET
                api_token = excluded.api_token,
                vm_name = excluded.vm_name",
            params![user_id, config.api_token, config.vm_name],
        )?;
        Ok(())
    }

    /// Falls back to the platform-default user's VM, mirroring bot
    /// resolution.
    pub fn resolve_vm_config(&self, user_id: i64) -> EngineResult<Option<VmConfig>> {
        if let Some(vm) = self.get_vm_config(user_id)? {
            return Ok(Some(vm));
        }
        let fallback_user = self.get_or_create_user(DEFAULT_USER)?;
        if fallback_user != user_id {
            return self.get_vm_config(fallback_user);
        }
        Ok(None)
    }
}
