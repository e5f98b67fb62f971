//! Tri-escrow relay HTTP server.
//!
//! # Usage
//!
//! ```bash
//! # Run with default config (config.toml in current directory)
//! cargo run -p tri-escrow-relay --release
//!
//! # Run with custom config path
//! CONFIG=/path/to/config.toml cargo run -p tri-escrow-relay
//!
//! # Configure logging level
//! RUST_LOG=debug cargo run -p tri-escrow-relay
//! ```
//!
//! # Environment Variables
//!
//! - `CONFIG`: Path to TOML configuration file (default: `config.toml`)
//! - `HOST`: Override bind address (default: `0.0.0.0`)
//! - `PORT`: Override port (default: `4021`)
//! - `RUST_LOG`: Log level filter (default: `info`)
//!
//! A `.env` file in the working directory is loaded first.

use std::net::SocketAddr;

use axum::http::Method;
use tower_http::cors;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use tri_escrow_relay::config::RelayConfig;
use tri_escrow_relay::{RelayState, relay_router};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if let Err(e) = run().await {
        tracing::error!("Relay failed: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = RelayConfig::load()?;
    let ledger = config.ledger()?;
    tracing::info!(
        host = %config.host,
        port = config.port,
        network = %config.network,
        escrow = %config.protocol.escrow_address,
        relayer = %config.relayer,
        tokens = config.tokens.len(),
        now = %ledger.now(),
        "Loaded configuration"
    );

    if config.tokens.is_empty() {
        tracing::warn!("No tokens configured, every escrow creation will fail");
    }
    if config.dev_routes {
        tracing::warn!("Dev routes enabled, any caller can act as any participant");
    }

    let state = RelayState::new(ledger, config.relayer);

    let app = relay_router(state, config.dev_routes)
        .layer(TraceLayer::new_for_http())
        .layer(
            cors::CorsLayer::new()
                .allow_origin(cors::Any)
                .allow_methods([Method::GET, Method::POST])
                .allow_headers(cors::Any),
        );

    let addr = SocketAddr::new(config.host, config.port);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Relay listening on http://{addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Relay shut down gracefully");
    Ok(())
}

/// Waits for Ctrl-C or SIGTERM (Unix) to initiate graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => tracing::info!("Received Ctrl-C, shutting down..."),
            _ = sigterm.recv() => tracing::info!("Received SIGTERM, shutting down..."),
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.expect("failed to listen for Ctrl-C");
        tracing::info!("Received Ctrl-C, shutting down...");
    }
}
