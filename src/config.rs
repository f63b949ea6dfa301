// Skiff — Service configuration
// Loaded once at startup from $SKIFF_HOME/config.toml (default ~/.skiff),
// every section optional:
//
//   [server]
//   bind_address = "127.0.0.1"
//   port = 8000
//
//   [database]
//   path = "/var/lib/skiff/skiff.db"
//
//   [worker]
//   count = 2
//   max_iterations = 50
//
//   [sandbox]
//   remote = false
//   api_url = "https://sandbox.internal.example"
//
//   [[bots]]               # seeded into the platform-default user at boot
//   name = "default"
//   base_url = "https://openrouter.ai/api/v1"
//   api_key = "sk-…"
//   model = "anthropic/claude-sonnet-4"

use std::path::{Path, PathBuf};

use log::info;
use serde::Deserialize;

use crate::atoms::constants::DEFAULT_MAX_ITERATIONS;
use crate::atoms::error::{EngineError, EngineResult};
use crate::atoms::types::BotConfig;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub home: PathBuf,
    pub bind_address: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub workers: usize,
    pub max_iterations: u32,
    pub remote_sandbox: bool,
    pub sandbox_api_url: String,
    /// Bot configs seeded into the platform-default user at startup.
    pub bots: Vec<BotConfig>,
}

impl AppConfig {
    pub fn permissions_path(&self) -> PathBuf {
        self.home.join("permissions.json")
    }

    /// Resolve $SKIFF_HOME (default ~/.skiff) and read config.toml if
    /// present.
    pub fn load() -> EngineResult<Self> {
        let home = match std::env::var("SKIFF_HOME") {
            Ok(dir) if !dir.is_empty() => PathBuf::from(dir),
            _ => dirs::home_dir()
                .ok_or_else(|| EngineError::Config("cannot determine home directory".into()))?
                .join(".skiff"),
        };
        Self::load_from(&home)
    }

    pub fn load_from(home: &Path) -> EngineResult<Self> {
        let config_path = home.join("config.toml");
        let file: FileConfig = match std::fs::read_to_string(&config_path) {
            Ok(raw) => toml::from_str(&raw)
                .map_err(|e| EngineError::Config(format!("{:?}: {}", config_path, e)))?,
            Err(_) => {
                info!("[skiff] no config.toml at {:?}, using defaults", config_path);
                FileConfig::default()
            }
        };
        Self::from_file(home.to_path_buf(), file)
    }

    fn from_file(home: PathBuf, file: FileConfig) -> EngineResult<Self> {
        let config = AppConfig {
            bind_address: file.server.bind_address,
            port: file.server.port,
            db_path: file
                .database
                .path
                .map(PathBuf::from)
                .unwrap_or_else(|| home.join("skiff.db")),
            workers: file.worker.count,
            max_iterations: file.worker.max_iterations,
            remote_sandbox: file.sandbox.remote,
            sandbox_api_url: file.sandbox.api_url,
            bots: file.bots,
            home,
        };
        if config.remote_sandbox && config.sandbox_api_url.is_empty() {
            return Err(EngineError::Config(
                "[sandbox] remote = true requires api_url".into(),
            ));
        }
        if config.workers == 0 {
            return Err(EngineError::Config("[worker] count must be at least 1".into()));
        }
        Ok(config)
    }
}

// ── File shape ─────────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    #[serde(default)]
    server: ServerSection,
    #[serde(default)]
    database: DatabaseSection,
    #[serde(default)]
    worker: WorkerSection,
    #[serde(default)]
    sandbox: SandboxSection,
    #[serde(default)]
    bots: Vec<BotConfig>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ServerSection {
    #[serde(default = "default_bind_address")]
    bind_address: String,
    #[serde(default = "default_port")]
    port: u16,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct DatabaseSection {
    #[serde(default)]
    path: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct WorkerSection {
    #[serde(default = "default_worker_count")]
    count: usize,
    #[serde(default = "default_max_iterations")]
    max_iterations: u32,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SandboxSection {
    #[serde(default)]
    remote: bool,
    #[serde(default)]
    api_url: String,
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_worker_count() -> usize {
    2
}

fn default_max_iterations() -> u32 {
    DEFAULT_MAX_ITERATIONS
}

impl Default for ServerSection {
    fn default() -> Self {
        ServerSection { bind_address: default_bind_address(), port: default_port() }
    }
}

impl Default for WorkerSection {
    fn default() -> Self {
        WorkerSection {
            count: default_worker_count(),
            max_iterations: default_max_iterations(),
        }
    }
}

impl Default for SandboxSection {
    fn default() -> Self {
        SandboxSection { remote: false, api_url: String::new() }
    }
}
