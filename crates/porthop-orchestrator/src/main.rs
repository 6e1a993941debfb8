//! Porthop daemon
//!
//! Loads the tunnel configuration, auto-starts the tunnels marked for it,
//! and serves the status/control HTTP API until shutdown.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use porthop_core::config::{self, PorthopConfig};
use porthop_orchestrator::{api, StatusStore, TunnelRegistry};
use porthop_ssh::SshSessionFactory;

#[derive(Parser)]
#[command(name = "porthop")]
#[command(about = "Double-hop SSH tunnel daemon")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen address for the HTTP API (overrides config)
    #[arg(short, long)]
    listen: Option<String>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| args.log_level.clone()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Porthop starting...");

    // Load configuration
    let config = if let Some(config_path) = &args.config {
        config::load_config(config_path)
            .with_context(|| format!("Failed to load config from {:?}", config_path))?
    } else {
        let default_path = config::default_config_path();
        if default_path.exists() {
            config::load_config(&default_path).unwrap_or_else(|e| {
                tracing::warn!("Failed to load config from {:?}: {}", default_path, e);
                PorthopConfig::default()
            })
        } else {
            tracing::info!("Using default configuration");
            PorthopConfig::default()
        }
    };

    let listen_addr = args.listen.unwrap_or_else(|| config.listen_address.clone());

    // Wire up the orchestrator
    let factory = Arc::new(SshSessionFactory::new(
        config.worker.connect_timeout,
        config.worker.close_grace,
    ));
    let store = Arc::new(StatusStore::new());
    let registry = Arc::new(TunnelRegistry::new(
        factory,
        Arc::clone(&store),
        config.worker.clone(),
    ));

    // Auto-start configured tunnels
    registry.start_auto(config.tunnels.clone());

    // Create cancellation token for graceful shutdown
    let cancel = CancellationToken::new();

    // Setup signal handlers
    let cancel_clone = cancel.clone();
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        let terminate = async {
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install signal handler")
                .recv()
                .await;
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                tracing::info!("Received Ctrl+C, initiating shutdown...");
            }
            _ = terminate => {
                tracing::info!("Received SIGTERM, initiating shutdown...");
            }
        }

        cancel_clone.cancel();
    });

    // Serve the status/control API
    let app = api::router(Arc::clone(&registry));
    let listener = tokio::net::TcpListener::bind(&listen_addr)
        .await
        .with_context(|| format!("Failed to bind {}", listen_addr))?;
    tracing::info!("Serving status API on {}", listen_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;

    // Tear down every known tunnel before exiting, waiting out each close
    registry.drain().await;

    tracing::info!("Porthop shutdown complete");
    Ok(())
}
