//! Pong Arena Server
//!
//! Binary entry point: reads configuration from the environment and runs
//! the WebSocket server until Ctrl-C.

use anyhow::Context;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use pong_arena::{
    network::auth::AuthConfig,
    GameServer, ServerConfig, TICK_RATE, VERSION,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = ServerConfig::from_env();
    let auth = AuthConfig::from_env();

    info!("Pong Arena Server v{}", VERSION);
    info!("Tick Rate: {} Hz (default {})", config.tick_rate, TICK_RATE);
    info!("Win score: {}, binary snapshots: {}", config.win_score, config.binary_snapshots);

    let server = std::sync::Arc::new(GameServer::new(config, auth));

    let signal_server = server.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Ctrl-C received, shutting down");
                signal_server.shutdown();
            }
            Err(e) => error!("Failed to listen for Ctrl-C: {}", e),
        }
    });

    server.run().await.context("game server failed")?;

    info!("Server stopped");
    Ok(())
}
