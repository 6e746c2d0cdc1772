//! Kasa POS server binary.

use std::net::SocketAddr;
use std::sync::Arc;

use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

use kasa_server::config::ServerConfig;
use kasa_server::db::Database;
use kasa_server::registry::{CachedRegistry, HttpCompanyRegistry};
use kasa_server::{router, AppState};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    info!("Starting Kasa POS server...");

    let config = ServerConfig::load()?;
    info!(port = config.port, db_url = %config.database_url, "Configuration loaded");

    let db = Database::connect(&config.database_url).await?;
    info!("Database ready");

    let registry = Arc::new(CachedRegistry::new(HttpCompanyRegistry::new(
        &config.registry_base_url,
    )?));

    let state = AppState::new(&db, registry);
    let app = router(state).layer(TraceLayer::new_for_http());

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        // No signal handler available; run until killed.
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
