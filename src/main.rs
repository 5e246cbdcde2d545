//! # redfishd - process entry point
//!
//! ## Startup
//!
//! 1. parse the CLI and load the configuration
//! 2. initialise tracing
//! 3. assemble the service with the built-in plugins
//! 4. seed the default resource tree
//! 5. serve HTTP until Ctrl+C

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![forbid(clippy::panic)]
#![deny(clippy::expect_used)]

mod cli;

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use redfishd::redfishd_core::Config;
use redfishd::redfishd_web::{AppState, StaticAccounts, run_server};
use redfishd::{bootstrap, build_service};

use crate::cli::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    let start_time = Instant::now();
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => Config::default(),
    };
    if let Some(bind) = cli.bind {
        config.server.bind_address = bind;
    }
    if let Some(filter) = cli.log_filter {
        config.logging.filter = filter;
    }

    init_tracing(&config.logging.filter);
    info!("redfishd starting...");

    let bind_address = config.server.bind_address.clone();
    let accounts = StaticAccounts::from_config(&config.accounts);
    if accounts.is_empty() {
        warn!("No accounts configured; only anonymous requests will be accepted");
    }

    let service = Arc::new(
        build_service(config)
            .await
            .context("Failed to assemble the Redfish service")?,
    );
    bootstrap::seed(&service)
        .await
        .context("Failed to seed the resource tree")?;

    let listener = TcpListener::bind(&bind_address)
        .await
        .with_context(|| format!("Failed to bind {bind_address}"))?;

    info!(
        elapsed_ms = start_time.elapsed().as_millis(),
        resources = service.tree().len(),
        "redfishd started. Press Ctrl+C to stop."
    );

    let state = AppState::new(Arc::clone(&service), Arc::new(accounts));
    run_server(listener, state, wait_for_shutdown())
        .await
        .context("HTTP server failed")?;

    service.shutdown();
    info!("redfishd stopped gracefully");
    Ok(())
}

/// Initialize tracing; `RUST_LOG` takes precedence over `default_filter`.
fn init_tracing(default_filter: &str) {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Wait for shutdown signal (Ctrl+C).
async fn wait_for_shutdown() {
    match signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C, initiating graceful shutdown"),
        Err(err) => error!("Failed to listen for shutdown signal: {}", err),
    }
}
