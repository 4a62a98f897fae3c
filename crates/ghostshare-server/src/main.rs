//! # ghostshare-server
//!
//! Signaling broker for GhostShare.
//!
//! This binary provides:
//! - a **room registry** that pairs at most two participants per room
//! - a **signaling relay** that forwards opaque handshake payloads between
//!   the two participants until they have a direct peer connection
//! - a small HTTP surface (health, info, room status) and, optionally, the
//!   static web client

mod api;
mod broker;
mod config;
mod error;
mod registry;
mod relay;
mod socket;

use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::api::AppState;
use crate::broker::Broker;
use crate::config::ServerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,ghostshare_server=debug")),
        )
        .init();

    info!("Starting GhostShare broker v{}", env!("CARGO_PKG_VERSION"));

    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");
    if let Some(dir) = &config.static_dir {
        if dir.join("index.html").exists() {
            info!(path = %dir.display(), "Serving web client");
        } else {
            tracing::warn!(path = %dir.display(), "STATIC_DIR has no index.html");
        }
    }

    let http_addr = config.http_addr;
    let app_state = AppState {
        broker: Broker::new(),
        config: Arc::new(config),
    };

    tokio::select! {
        result = api::serve(app_state, http_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
