// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Tagrelay drain
//!
//! Cloud-side consumer: receives batches pushed by the messaging layer and
//! writes one warehouse row per reading.
//!
//! # Endpoints
//!
//! - `POST /push` - Pub/Sub push delivery
//! - `GET /healthz` - Liveness and counters

pub mod bigquery;
pub mod config;
pub mod handlers;
pub mod ingest;
pub mod routes;
pub mod warehouse;

pub use bigquery::BigQueryWarehouse;
pub use config::{DrainConfig, WarehouseConfig};
pub use ingest::{DrainConsumer, IngestError, IngestReport};
pub use warehouse::{InsertError, MockWarehouse, Warehouse, WarehouseError, WarehouseRow};

use axum::Router;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Shared application state
pub struct AppState {
    consumer: DrainConsumer<Arc<dyn Warehouse>>,
    envelopes: AtomicU64,
    rows: AtomicU64,
    rejected: AtomicU64,
    failed: AtomicU64,
}

impl AppState {
    pub fn new(consumer: DrainConsumer<Arc<dyn Warehouse>>) -> Self {
        Self {
            consumer,
            envelopes: AtomicU64::new(0),
            rows: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }
}

/// Build the HTTP router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(routes::api_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
