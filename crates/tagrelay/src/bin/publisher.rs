// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Tagrelay publisher CLI
//!
//! Claims batches from the local store and publishes them to Pub/Sub.
//!
//! # Usage
//!
//! ```bash
//! # Publish continuously
//! tagrelay-publisher --config gateway.toml
//!
//! # One claim/publish cycle
//! tagrelay-publisher --db measurements.db once
//!
//! # Inspect or maintain the queue
//! tagrelay-publisher stats
//! tagrelay-publisher requeue-dead
//! tagrelay-publisher reset --confirm
//!
//! # Fill the queue with synthetic readings
//! tagrelay-publisher seed --count 50000
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tagrelay::codec::Measurement;
use tagrelay::publisher::unix_now;
use tagrelay::{
    BatchPublisher, BatchStore, GatewayConfig, PubSubTransport, PublisherSettings, Reading,
    SqliteBatchStore, TickOutcome,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "tagrelay-publisher")]
#[command(about = "Tagrelay publisher - durable batch delivery to the cloud", long_about = None)]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Database path (SQLite file)
    #[arg(short, long)]
    db: Option<PathBuf>,

    /// Records per batch
    #[arg(short, long)]
    batch_size: Option<usize>,

    /// Tick interval in milliseconds
    #[arg(short, long)]
    interval: Option<u64>,

    /// Gateway identity (defaults to the host name)
    #[arg(long)]
    hub_id: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Publish continuously until interrupted (default)
    Run,
    /// Run a single claim/publish cycle
    Once,
    /// Claim a batch without publishing it
    Claim,
    /// Show queue statistics
    Stats,
    /// Delete every queued record, including dead letters
    Reset {
        /// Confirm deletion
        #[arg(long)]
        confirm: bool,
    },
    /// Return dead-lettered records to the queue
    RequeueDead,
    /// Insert synthetic readings
    Seed {
        /// Number of readings
        #[arg(short = 'n', long, default_value_t = 1000)]
        count: usize,

        /// Number of distinct tags
        #[arg(long, default_value_t = 10)]
        tags: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let config = load_config(&args)?;
    let store = Arc::new(
        SqliteBatchStore::open_with_timeout(&config.database, config.busy_timeout())
            .with_context(|| format!("opening batch store {}", config.database.display()))?,
    );

    match args.command.unwrap_or(Commands::Run) {
        Commands::Run => run(config, store).await,
        Commands::Once => once(config, store).await,
        Commands::Claim => {
            match store.claim_batch(config.publisher.batch_size)? {
                Some(batch_id) => println!("Claimed batch {}", batch_id),
                None => println!(
                    "Not enough unassigned records for a batch of {}",
                    config.publisher.batch_size
                ),
            }
            Ok(())
        }
        Commands::Stats => {
            let stats = store.stats()?;
            println!("Unassigned records: {}", stats.unassigned);
            println!("Claimed records:    {}", stats.claimed);
            println!("Claimed batches:    {}", stats.batches);
            println!("Dead letters:       {}", stats.dead_letters);
            if let Some(oldest) = store.find_oldest_unpublished()? {
                println!("Oldest batch:       {}", oldest);
                if let Some(failure) = store.failure_record(oldest)? {
                    println!(
                        "  {} failed attempts since {}",
                        failure.attempts, failure.first_failure_at
                    );
                }
            }
            Ok(())
        }
        Commands::Reset { confirm } => {
            if confirm {
                store.reset()?;
                println!("All queued records deleted.");
            } else {
                println!("Use --confirm to actually delete records.");
            }
            Ok(())
        }
        Commands::RequeueDead => {
            let requeued = store.requeue_dead_letters()?;
            println!("Requeued {} dead-lettered records.", requeued);
            Ok(())
        }
        Commands::Seed { count, tags } => {
            let readings = synthetic_readings(count, tags, unix_now());
            let inserted = store.insert_many(config.capture.radio_index, &readings)?;
            println!("Inserted {} synthetic readings.", inserted);
            Ok(())
        }
    }
}

fn load_config(args: &Args) -> Result<GatewayConfig> {
    let mut config = match &args.config {
        Some(path) => GatewayConfig::from_file(path)
            .with_context(|| format!("loading configuration {}", path.display()))?,
        None => GatewayConfig::default(),
    };

    if let Some(db) = &args.db {
        config.database = db.clone();
    }
    if let Some(batch_size) = args.batch_size {
        config.publisher.batch_size = batch_size;
    }
    if let Some(interval) = args.interval {
        config.publisher.tick_interval_ms = interval;
    }
    if let Some(hub_id) = &args.hub_id {
        config.hub_id = Some(hub_id.clone());
    }

    config.validate().context("invalid configuration")?;
    Ok(config)
}

fn build_publisher(
    config: &GatewayConfig,
    store: Arc<SqliteBatchStore>,
) -> Result<BatchPublisher<SqliteBatchStore, PubSubTransport>> {
    let transport = PubSubTransport::new(&config.transport, config.publisher.publish_timeout())
        .context("configuring Pub/Sub transport")?;
    Ok(BatchPublisher::new(
        PublisherSettings::from_config(config),
        store,
        transport,
    ))
}

async fn run(config: GatewayConfig, store: Arc<SqliteBatchStore>) -> Result<()> {
    let mut publisher = build_publisher(&config, store)?;

    tracing::info!("Tagrelay publisher starting...");
    tracing::info!("  Database: {}", config.database.display());
    tracing::info!("  Hub: {}", publisher.settings().hub_id);
    tracing::info!(
        "  Topic: projects/{}/topics/{}",
        config.transport.project,
        config.transport.topic
    );

    publisher.run(tagrelay::shutdown_signal()).await;
    Ok(())
}

async fn once(config: GatewayConfig, store: Arc<SqliteBatchStore>) -> Result<()> {
    let mut publisher = build_publisher(&config, store)?;

    match publisher.tick().await? {
        TickOutcome::Idle => println!("Nothing to publish."),
        TickOutcome::Delivered {
            batch_id,
            records,
            message_id,
        } => println!(
            "Delivered batch {} ({} records) as message {}",
            batch_id, records, message_id
        ),
        TickOutcome::Failed { batch_id, attempts } => {
            println!("Batch {} failed (attempt {}), will retry", batch_id, attempts)
        }
        TickOutcome::DeadLettered { batch_id, records } => println!(
            "Batch {} dead-lettered ({} records)",
            batch_id, records
        ),
    }
    Ok(())
}

/// Readings spread over `tags` synthetic tags, one second apart per tag.
fn synthetic_readings(count: usize, tags: usize, now: i64) -> Vec<Reading> {
    let tags = tags.max(1);
    (0..count)
        .map(|i| {
            let step = (i / tags) as i64;
            let wave = (i % 200) as i16;
            Reading {
                tag_id: format!("feed{:08x}", i % tags),
                rssi: -40 - (i % 50) as i32,
                timestamp: now - step,
                measurement: Measurement::from_raw([800 + wave, wave - 100, -wave, 1000 + wave]),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_synthetic_readings_are_unique() {
        let readings = synthetic_readings(100, 7, 1_000_000);
        assert_eq!(readings.len(), 100);

        let keys: std::collections::HashSet<_> = readings
            .iter()
            .map(|r| (r.tag_id.clone(), r.timestamp))
            .collect();
        assert_eq!(keys.len(), 100);
        assert!(readings.iter().all(|r| r.tag_id.len() == 12));
    }
}
