// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Tagrelay drain - Pub/Sub push endpoint writing to BigQuery
//!
//! # Usage
//!
//! ```bash
//! # Start with a config file
//! tagrelay-drain --config drain.toml
//!
//! # Override the listen address
//! tagrelay-drain --config drain.toml --listen 127.0.0.1:9000
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tagrelay_drain::{build_router, AppState, BigQueryWarehouse, DrainConfig, DrainConsumer, Warehouse};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Tagrelay cloud drain
#[derive(Parser, Debug)]
#[command(name = "tagrelay-drain")]
#[command(about = "Tagrelay drain - materializes pushed batches into BigQuery")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen address (overrides config)
    #[arg(short, long)]
    listen: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let mut config = match &args.config {
        Some(path) => DrainConfig::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => DrainConfig::default(),
    };
    if let Some(listen) = args.listen {
        config.listen = listen;
    }

    let warehouse = BigQueryWarehouse::new(&config.warehouse).context("Invalid warehouse config")?;
    info!("Tagrelay drain v{}", env!("CARGO_PKG_VERSION"));
    info!("Warehouse: {}", warehouse.url());

    let warehouse: Arc<dyn Warehouse> = Arc::new(warehouse);
    let state = Arc::new(AppState::new(DrainConsumer::new(
        warehouse,
        config.max_rows_per_insert,
    )));
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&config.listen)
        .await
        .with_context(|| format!("Failed to bind {}", config.listen))?;
    info!("HTTP server: http://{}", config.listen);

    axum::serve(listener, app)
        .with_graceful_shutdown(tagrelay::shutdown_signal())
        .await
        .context("Server error")?;

    info!("Drain stopped");
    Ok(())
}
