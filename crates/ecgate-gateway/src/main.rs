//! ecgate gateway
//!
//! This is the main entry point for the gateway service. Configuration comes
//! from the JSON file named by `ECGATE_CONFIG`, with `LISTEN_ADDR` and
//! `DATA_DIR` taking precedence.

use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ecgate_gateway::{GatewayConfig, GatewayServer, GatewayState};
use ecgate_store::RocksStore;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,ecgate=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting ecgate gateway");

    let config = GatewayConfig::from_env()?;
    tracing::info!(
        listen_addr = %config.listen_addr,
        data_dir = %config.data_dir.display(),
        socket_timeout_seconds = config.socket_timeout_seconds,
        mover_refresh_seconds = config.mover_refresh_seconds,
        "Gateway configuration loaded"
    );

    tracing::info!(path = %config.data_dir.display(), "Opening RocksDB store");
    let store = Arc::new(RocksStore::open(&config.data_dir)?);

    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    let state = GatewayState::new(store, config);
    let movers = state.seed()?;
    tracing::info!(movers, "Coordinator initialized");

    let server = GatewayServer::new(state);
    let shutdown = Arc::clone(&server);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received");
            shutdown.shutdown();
        }
    });

    server.run(listener).await?;
    Ok(())
}
