//! quic-dispatcher echo server
//!
//! Serves echo sessions behind a `DispatchServer`. Packets use the public
//! header format; payloads are echoed back, and a payload of `close` closes
//! the connection.
//!
//! Environment variables:
//! - ECHO_BIND_ADDR: Bind address (default 0.0.0.0:4433)
//! - ECHO_CONFIG: Path to a TOML dispatcher configuration (optional)
//! - ECHO_STATELESS_REJECT_THRESHOLD: Session count that triggers stateless rejects
//! - RUST_LOG: tracing filter (default info)

mod session;

use std::error::Error;
use std::net::SocketAddr;

use quic_dispatcher::prelude::*;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::session::EchoFactory;

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:4433";

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();
}

fn load_config() -> Result<DispatcherConfig, Box<dyn Error + Send + Sync>> {
    let mut config = match std::env::var("ECHO_CONFIG") {
        Ok(path) => {
            let text = std::fs::read_to_string(&path)?;
            tracing::info!(%path, "loaded dispatcher configuration");
            DispatcherConfig::from_toml_str(&text)?
        }
        Err(_) => DispatcherConfig::default(),
    };

    if let Ok(threshold) = std::env::var("ECHO_STATELESS_REJECT_THRESHOLD") {
        config.stateless_reject_threshold = Some(threshold.parse()?);
    }
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    init_logging();

    let bind_addr: SocketAddr = std::env::var("ECHO_BIND_ADDR")
        .unwrap_or_else(|_| DEFAULT_BIND_ADDR.to_string())
        .parse()?;
    let config = load_config()?;

    let mut server = DispatchServer::bind(bind_addr, config, EchoFactory).await?;
    server
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for ctrl-c");
            }
        })
        .await?;

    let stats = server.dispatcher().stats();
    tracing::info!(
        received = stats.packets_received,
        sessions = stats.sessions_created,
        time_wait = stats.time_wait_added,
        resets = stats.public_resets,
        "echo server stopped"
    );
    Ok(())
}
