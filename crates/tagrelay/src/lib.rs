// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Tagrelay edge gateway
//!
//! Captures sensor-tag advertisements, queues decoded readings in a local
//! SQLite file and ships them to the cloud in large batches, surviving
//! process restarts and uplink outages.
//!
//! # Features
//!
//! - **Payload codec** -- Fixed-layout manufacturer data to physical units
//! - **Bundling** -- One store write per bundle of readings
//! - **Durable queue** -- SQLite batch store shared by two processes
//! - **At-least-once delivery** -- A batch is deleted only after acknowledgement
//! - **Dead letters** -- Batches failing too long are parked, not lost
//!
//! # Architecture
//!
//! ```text
//! tagrelay-capture                          tagrelay-publisher
//! +-- AdvertisementSource                   +-- BatchPublisher
//! +-- Extractor -> codec                    |   +-- claim / publish / delete
//! +-- Bundler --------> SqliteBatchStore <--+-- Transport (Pub/Sub)
//! ```
//!
//! # Example
//!
//! ```ignore
//! use tagrelay::{BatchPublisher, GatewayConfig, PubSubTransport, PublisherSettings, SqliteBatchStore};
//! use std::sync::Arc;
//!
//! let config = GatewayConfig::from_file("gateway.toml")?;
//! let store = Arc::new(SqliteBatchStore::open(&config.database)?);
//! let transport = PubSubTransport::new(&config.transport, config.publisher.publish_timeout())?;
//! let mut publisher = BatchPublisher::new(PublisherSettings::from_config(&config), store, transport);
//! publisher.run(tagrelay::shutdown_signal()).await;
//! ```

pub mod advertisement;
pub mod batch;
pub mod bundler;
pub mod capture;
pub mod codec;
pub mod config;
pub mod envelope;
pub mod publisher;
pub mod pubsub;
pub mod reading;
pub mod sqlite;
pub mod store;
pub mod transport;

pub use advertisement::{Advertisement, Extractor, ScanEntry};
pub use batch::{BatchLine, FormatError};
pub use bundler::{Bundler, BundlerStats};
pub use capture::{AdvertisementSource, CaptureService, CaptureStats, JsonLinesSource};
pub use codec::Measurement;
pub use config::{ConfigError, GatewayConfig};
pub use envelope::{Envelope, EnvelopeError};
pub use publisher::{BatchPublisher, PublishError, PublisherSettings, PublisherStats, TickOutcome};
pub use pubsub::PubSubTransport;
pub use reading::{BatchId, QueueRecord, Reading};
pub use sqlite::SqliteBatchStore;
pub use store::{BatchStore, StoreError, StoreStats};
pub use transport::{MockOutcome, MockTransport, Transport, TransportError};

/// Resolves on SIGINT, or SIGTERM on Unix.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
