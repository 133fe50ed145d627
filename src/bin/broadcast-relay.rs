//! Broadcast relay server
//!
//! Run with: cargo run --bin broadcast-relay
//!
//! Configuration comes from the environment:
//!
//! ```text
//!   PORT                        listening port (default 3001)
//!   RELAY_BIND_ADDR             listening IP (default 0.0.0.0)
//!   RELAY_PATH                  WebSocket path (default /relay)
//!   RELAY_MAX_CONNECTIONS       connection limit, 0 = unlimited
//!   RELAY_HANDSHAKE_TIMEOUT_MS  WebSocket handshake timeout
//!   KMS_WS_URI                  media server (default ws://localhost:8888/kurento)
//!   RELAY_ENGINE_TIMEOUT_MS     media server request timeout, 0 = none
//!   RELAY_OVERLAY_COMMAND       GStreamer filter between presenter and viewers
//!   RUST_LOG                    log filter (default info)
//! ```

use std::sync::Arc;

use broadcast_relay::relay::{RelayConfig, SessionRelay};
use broadcast_relay::server::{RelayServer, ServerConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let server_config = ServerConfig::from_env()?;
    let relay_config = RelayConfig::from_env()?;

    tracing::info!(
        media_server = %relay_config.media_server_uri,
        filters = relay_config.chain.filters().len(),
        "Starting broadcast relay"
    );

    let relay = Arc::new(SessionRelay::with_kurento(relay_config));
    let server = RelayServer::new(server_config, relay);

    server
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for Ctrl+C");
                std::future::pending::<()>().await;
            }
        })
        .await?;

    tracing::info!("Shut down");
    Ok(())
}
