// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Tagrelay capture CLI
//!
//! Reads JSON advertisements from stdin (one per line) and queues the
//! decoded readings in the local batch store.
//!
//! # Usage
//!
//! ```bash
//! # Pipe a radio bridge into the capture process
//! ble-scan --json --hci 0 | tagrelay-capture --config gateway.toml --radio 0
//!
//! # Drop weak signals, write every 20 readings
//! ble-scan --json | tagrelay-capture --db measurements.db --min-rssi -90 --bundle-size 20
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tagrelay::{CaptureService, GatewayConfig, JsonLinesSource, SqliteBatchStore};
use tokio::io::BufReader;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "tagrelay-capture")]
#[command(about = "Tagrelay capture - queue sensor-tag readings from a radio", long_about = None)]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Database path (SQLite file)
    #[arg(short, long)]
    db: Option<PathBuf>,

    /// Radio (hci) index the input comes from
    #[arg(short, long)]
    radio: Option<u32>,

    /// Readings per store write
    #[arg(short, long)]
    bundle_size: Option<usize>,

    /// Drop advertisements weaker than this (dBm)
    #[arg(long, allow_hyphen_values = true)]
    min_rssi: Option<i32>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // stdout may carry data downstream; logs go to stderr
    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let mut config = match &args.config {
        Some(path) => GatewayConfig::from_file(path)
            .with_context(|| format!("loading configuration {}", path.display()))?,
        None => GatewayConfig::default(),
    };
    if let Some(db) = &args.db {
        config.database = db.clone();
    }
    if let Some(radio) = args.radio {
        config.capture.radio_index = radio;
    }
    if let Some(bundle_size) = args.bundle_size {
        config.capture.bundle_size = bundle_size;
    }
    if args.min_rssi.is_some() {
        config.capture.min_rssi = args.min_rssi;
    }
    config.validate().context("invalid configuration")?;

    let store = Arc::new(
        SqliteBatchStore::open_with_timeout(&config.database, config.busy_timeout())
            .with_context(|| format!("opening batch store {}", config.database.display()))?,
    );

    tracing::info!("Tagrelay capture starting...");
    tracing::info!("  Database: {}", config.database.display());
    tracing::info!("  Radio: hci{}", config.capture.radio_index);
    tracing::info!(
        "  Bundle: {} readings / {}s",
        config.capture.bundle_size,
        config.capture.flush_interval_secs
    );

    let source = JsonLinesSource::new(BufReader::new(tokio::io::stdin()));
    let service = CaptureService::new(&config.capture, store, source);
    let stats = service.run(tagrelay::shutdown_signal()).await;

    if stats.store_errors > 0 {
        tracing::warn!("{} store writes failed during capture", stats.store_errors);
    }
    Ok(())
}
