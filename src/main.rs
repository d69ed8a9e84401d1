// This is the entry point of the group moderation bot.
//
// **Architecture Overview:**
// - `core/` = Business logic (platform-agnostic)
// - `infra/` = Implementations of core traits (databases)
// - `chat/` = Transport adapters (commands, event routing, console transport)
//
// This file's job is to:
// 1. Load configuration
// 2. Initialize services (dependency injection)
// 3. Run the transport

// These attrs point each module declaration at a more descriptive root file
// so we don't end up with half a dozen mod.rs files that all look the same.
#[path = "chat/chat_layer.rs"]
mod chat;
#[path = "core/core_layer.rs"]
mod core;
#[path = "infra/infra_layer.rs"]
mod infra;

use crate::chat::{run_console, LoggingSink};
use crate::core::moderation::{ModerationConfig, ModerationPipeline, ModerationStore};
use crate::infra::moderation::{InMemoryModerationStore, SqliteModerationStore};
use anyhow::Context;
use std::sync::Arc;

const DEFAULT_WORKERS: usize = 4;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file (if it exists)
    dotenv::dotenv().ok();

    // Logs go to stderr; stdout carries outbound actions.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .init();

    let config = ModerationConfig::from_env();
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid moderation config: {}", e))?;

    let workers = std::env::var("MODERATION_WORKERS")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|w| *w > 0)
        .unwrap_or(DEFAULT_WORKERS);

    // ========================================================================
    // DEPENDENCY INJECTION
    // ========================================================================

    let backend = std::env::var("MODERATION_STORE").unwrap_or_else(|_| "sqlite".to_string());
    match backend.as_str() {
        "memory" => {
            tracing::warn!("Using in-memory store, counters are lost on restart");
            serve(Arc::new(InMemoryModerationStore::new()), config, workers).await
        }
        "sqlite" => {
            // Keep runtime databases in a dedicated folder so the repo root stays tidy.
            let data_dir = std::env::var("DATA_DIR").unwrap_or_else(|_| "data".to_string());
            std::fs::create_dir_all(&data_dir)
                .with_context(|| format!("Failed to create data directory {}", data_dir))?;
            let db_path = format!("{}/moderation.db", data_dir);

            let store = SqliteModerationStore::connect(&db_path)
                .await
                .context("Failed to open moderation database")?;
            store
                .migrate()
                .await
                .context("Failed to migrate moderation database")?;

            tracing::info!(db_path = %db_path, "Moderation database ready");
            serve(Arc::new(store), config, workers).await
        }
        other => anyhow::bail!("Unknown MODERATION_STORE '{}' (expected sqlite or memory)", other),
    }
}

async fn serve<S: ModerationStore + 'static>(
    store: Arc<S>,
    config: ModerationConfig,
    workers: usize,
) -> anyhow::Result<()> {
    tracing::info!(
        workers,
        flood_window_seconds = config.flood_window_seconds,
        flood_trigger_count = config.flood_trigger_count,
        warn_ban_threshold = config.warn_ban_threshold,
        "Moderation bot starting"
    );

    let pipeline = Arc::new(ModerationPipeline::new(store, config)?);
    let sink = Arc::new(LoggingSink);

    run_console(pipeline, sink, workers)
        .await
        .context("Console transport failed")?;

    Ok(())
}
