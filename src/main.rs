//! gpmd registry daemon.
//!
//! Serves the HTTP directory that gpmd servers heartbeat to and clients
//! discover from.

use gpmd_registry::{Config, Registry};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            // Only an explicitly-specified config file can fail to load.
            tracing::error!("failed to load config: {}", e);
            return Err(e.into());
        }
    };

    tracing::info!("starting gpmd registry");
    tracing::info!("  bind address: {}", config.bind_addr);
    tracing::info!("  path: {}", config.path);
    if config.timeout().is_zero() {
        tracing::info!("  entry timeout: none");
    } else {
        tracing::info!("  entry timeout: {:?}", config.timeout());
    }

    let registry = Arc::new(Registry::new(config.timeout()));
    let listener = TcpListener::bind(config.bind_addr).await?;
    tracing::info!("registry listening on {}{}", config.bind_addr, config.path);

    registry.serve(listener, &config.path).await?;
    Ok(())
}
