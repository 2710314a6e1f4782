//! Agency Sync Server - HTTP and WebSocket host for the agency sync store.
//!
//! This server exposes the portal's versioned entities over HTTP, persists
//! them in PostgreSQL, and streams accepted changes to connected portal tabs
//! over WebSocket using the agency-sync-engine store.

mod auth;
mod config;
mod db;
mod error;
mod handlers;
mod routes;
mod websocket;

use crate::config::Config;
use crate::db::PgBackend;
use crate::websocket::ConnectionManager;
use agency_sync::SyncStore;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<SyncStore>,
    pub conn_manager: Arc<ConnectionManager>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "agency_sync_server=debug,agency_sync=info,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    tracing::info!("Starting Agency Sync Server on {}:{}", config.host, config.port);

    // Create database pool
    let pool = db::create_pool(&config.database_url).await?;

    // Run migrations
    tracing::info!("Running database migrations...");
    db::run_migrations(&pool).await?;

    // Build the store over Postgres
    let sync_config = config.sync_config();
    tracing::info!(
        entity_fresh_secs = sync_config.entity_cache.fresh_ttl.as_secs(),
        entity_stale_secs = sync_config.entity_cache.stale_ttl.as_secs(),
        list_fresh_secs = sync_config.list_cache.fresh_ttl.as_secs(),
        history_limit = sync_config.history_limit,
        "Sync store configured"
    );
    let store = SyncStore::new(Arc::new(PgBackend::new(pool)), sync_config);

    // Build application state
    let state = AppState {
        store: Arc::new(store),
        conn_manager: ConnectionManager::new_shared(),
    };

    let app = routes::create_app(state);

    // Start server
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
