//! Collab Pad server binary
//!
//! Usage: `collab-pad [config.toml]`. With no argument every knob takes its
//! default (bind on 127.0.0.1:1234).

use std::sync::Arc;

use anyhow::Result;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use collab_core::{serve, CollabConfig, Hub};
use collab_sync::YrsEngine;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => CollabConfig::load(path)?,
        None => CollabConfig::default(),
    };

    let listener = TcpListener::bind(&config.bind_addr).await?;
    tracing::info!(addr = %config.bind_addr, "collab-pad listening");

    let hub = Arc::new(Hub::new(config, YrsEngine::new()));

    tokio::select! {
        result = serve(hub, listener) => result,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutting down");
            Ok(())
        }
    }
}
