//! share-relay binary entry point.
//!
//! Usage:
//! ```bash
//! peershare-relay --config relay.toml
//! ```
//!
//! A missing config file falls back to defaults. `RUST_LOG` overrides the
//! configured log level.

use anyhow::Context;
use peershare_relay::cleanup::spawn_cleanup_task;
use peershare_relay::config::Config;
use peershare_relay::error::RelayError;
use peershare_relay::http::{build_router, health::init_start_time};
use peershare_relay::server::ShareRelay;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = get_config_path();
    let config = load_config(&config_path)?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let address: SocketAddr =
        config
            .server
            .bind_address
            .parse()
            .map_err(|source| RelayError::BindAddress {
                address: config.server.bind_address.clone(),
                source,
            })?;

    init_start_time();
    let relay = Arc::new(ShareRelay::new(config));
    let cleanup = spawn_cleanup_task(relay.clone());
    let app = build_router(relay.clone());

    let listener = tokio::net::TcpListener::bind(address)
        .await
        .with_context(|| format!("failed to bind {}", address))?;
    tracing::info!(
        "peershare-relay v{} listening on {} (public url {})",
        env!("CARGO_PKG_VERSION"),
        address,
        relay.config().server.public_url
    );

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("server error")?;

    cleanup.abort();
    tracing::info!("Relay stopped");
    Ok(())
}

fn get_config_path() -> PathBuf {
    std::env::args()
        .skip_while(|arg| arg != "--config")
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("relay.toml"))
}

fn load_config(path: &Path) -> anyhow::Result<Config> {
    if path.exists() {
        Config::from_file(path).with_context(|| format!("loading {}", path.display()))
    } else {
        Ok(Config::default())
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
