//! cyberstrike - HTTP Server Entry Point
//!
//! Wires the model client, tool bridge and store together and starts the
//! HTTP API.

use std::sync::Arc;

use cyberstrike::{
    api::{self, AppState},
    config::Config,
    llm::OpenAiClient,
    store::{InMemoryStore, SqliteStore, Store},
    tools::{LocalToolBridge, ToolContext, ToolRegistry},
};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cyberstrike=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env()?;
    info!(
        "Loaded configuration: model={}, max_iterations={}, roles={}",
        config.model,
        config.max_iterations,
        config.roles.names().len()
    );

    let store: Arc<dyn Store> = match &config.database_path {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                tokio::fs::create_dir_all(parent).await?;
            }
            info!("Using SQLite store at {}", path.display());
            Arc::new(SqliteStore::open(path).await?)
        }
        None => {
            warn!("DATABASE_PATH is empty; conversations and queues will not survive a restart");
            Arc::new(InMemoryStore::new())
        }
    };

    let registry = ToolRegistry::new();
    let catalog = registry.definitions();
    let ctx = ToolContext {
        timeout: config.tool_timeout,
        skills_dir: config.skills_dir.clone(),
        knowledge_dir: config.knowledge_dir.clone(),
        ..ToolContext::default()
    };
    info!("Registered {} tools", registry.len());

    let llm = Arc::new(OpenAiClient::new(config.base_url.clone(), config.api_key.clone()));
    let bridge = Arc::new(LocalToolBridge::new(registry, ctx));
    let state = Arc::new(AppState::new(&config, llm, bridge, catalog, store));

    let restored = state.batch.restore().await?;
    if restored > 0 {
        info!("Restored {} batch queues", restored);
    }

    api::serve(&config, state).await?;

    Ok(())
}
