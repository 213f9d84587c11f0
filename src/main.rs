//! Market Backend - prediction market AMM server
//!
//! Quotes and executes YES/NO trades against pooled volume and keeps
//! per-user positions at their volume-weighted entry price.

mod api;
mod config_manager;
mod db;
mod trading;
mod types;

use crate::api::create_router;
use crate::config_manager::{ConfigManager, ServerConfig};
use crate::db::{Database, MarketStore, MemoryStore};
use crate::trading::MarketEngine;

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Application state shared across all handlers
pub struct AppState {
    pub engine: Arc<MarketEngine>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_thread_ids(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("Market Backend v{}", env!("CARGO_PKG_VERSION"));

    let config = ServerConfig::from_env()?;

    // Initialize storage
    let store: Arc<dyn MarketStore> = match config.database_url.as_deref() {
        Some(database_url) => {
            info!("Connecting to database...");
            let db = Database::new(database_url, config.max_connections).await?;
            db.init_schema().await?;
            info!("Database connected");
            Arc::new(db)
        }
        None => {
            warn!("DATABASE_URL not set, using in-memory store (data is lost on restart)");
            Arc::new(MemoryStore::new())
        }
    };

    let pricing = Arc::new(ConfigManager::new(config.pricing.clone()));
    let engine = Arc::new(MarketEngine::new(store, pricing));

    // Create application state
    let state = Arc::new(AppState { engine });

    // Create router with all API endpoints
    let app = create_router(state);

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    info!("Starting API server on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown...");
}
