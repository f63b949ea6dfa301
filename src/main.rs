// Skiff — service entry point.
// One process runs both the HTTP API and the worker pool; the dispatcher
// between them is the store-backed local queue.

use std::sync::Arc;

use anyhow::Context;
use log::info;

use skiff::config::AppConfig;
use skiff::engine::permissions::PermissionManager;
use skiff::queue::SqliteQueue;
use skiff::server::{self, AppState};
use skiff::store::Store;
use skiff::worker;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Arc::new(AppConfig::load().context("loading configuration")?);
    std::fs::create_dir_all(&config.home).ok();

    let store = Arc::new(Store::open(&config.db_path).context("opening store")?);

    // Seed operator-provided bot configs into the platform-default user so
    // fresh tenants resolve to something runnable.
    if !config.bots.is_empty() {
        let default_user = store.default_user_id()?;
        for bot in &config.bots {
            store.set_bot_config(default_user, bot)?;
            info!("[skiff] seeded bot '{}' model={}", bot.name, bot.model);
        }
    }

    let permissions = Arc::new(PermissionManager::load(&config.permissions_path()));
    let queue = Arc::new(SqliteQueue::new(store.clone()));

    let _workers = worker::spawn_workers(
        config.workers,
        store.clone(),
        queue.clone(),
        permissions,
        config.clone(),
    );
    info!("[skiff] {} worker(s) started", config.workers);

    let app = server::router(AppState { store, queue, config: config.clone() });
    let addr = format!("{}:{}", config.bind_address, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {}", addr))?;
    info!("[skiff] listening on http://{}", addr);
    axum::serve(listener, app).await.context("serving HTTP")?;

    Ok(())
}
