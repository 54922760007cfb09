// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Drain consumer
//!
//! Turns one delivered envelope into warehouse rows.
//!
//! # Operation
//!
//! 1. Parse the batch text, restoring tags omitted on repeated lines
//! 2. Attach the gateway identity from the envelope attributes
//! 3. Insert in chunks of at most `max_rows_per_insert`, in order
//! 4. Stop at the first chunk the warehouse rejects

use crate::warehouse::{InsertError, Warehouse, WarehouseError, WarehouseRow};
use tagrelay::batch::{self, FormatError};
use tagrelay::envelope::{Envelope, EnvelopeError, ATTR_HUB_ID};
use thiserror::Error;

/// Default rows per warehouse insert call.
pub const DEFAULT_MAX_ROWS_PER_INSERT: usize = 10_000;

/// Ingestion errors.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("malformed envelope: {0}")]
    Envelope(#[from] EnvelopeError),

    #[error("malformed batch: {0}")]
    Format(#[from] FormatError),

    #[error("envelope has no {} attribute", ATTR_HUB_ID)]
    MissingHubId,

    #[error("warehouse rejected {} rows of chunk {chunk} (first: {})", .errors.len(), first_reason(.errors))]
    Insert {
        chunk: usize,
        errors: Vec<InsertError>,
    },

    #[error("warehouse unavailable: {0}")]
    Warehouse(#[from] WarehouseError),
}

fn first_reason(errors: &[InsertError]) -> String {
    errors
        .first()
        .map(|e| format!("row {}: {}", e.index, e.reason))
        .unwrap_or_default()
}

impl IngestError {
    /// True when redelivering the same envelope cannot succeed.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            IngestError::Envelope(_) | IngestError::Format(_) | IngestError::MissingHubId
        )
    }
}

/// Outcome of a successful ingestion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestReport {
    pub rows: usize,
    pub chunks: usize,
}

/// Drain consumer
pub struct DrainConsumer<W: Warehouse> {
    warehouse: W,
    max_rows_per_insert: usize,
}

impl<W: Warehouse> DrainConsumer<W> {
    /// Create a new consumer; `max_rows_per_insert` is raised to at least 1.
    pub fn new(warehouse: W, max_rows_per_insert: usize) -> Self {
        Self {
            warehouse,
            max_rows_per_insert: max_rows_per_insert.max(1),
        }
    }

    pub fn max_rows_per_insert(&self) -> usize {
        self.max_rows_per_insert
    }

    /// Ingest one envelope.
    pub async fn ingest(&self, envelope: &Envelope) -> Result<IngestReport, IngestError> {
        let hub_id = envelope.hub_id().ok_or(IngestError::MissingHubId)?;
        let rows = to_rows(hub_id, envelope.text()?)?;

        let mut report = IngestReport::default();
        for (chunk, rows) in rows.chunks(self.max_rows_per_insert).enumerate() {
            let errors = self.warehouse.insert_rows(rows).await?;
            if !errors.is_empty() {
                tracing::error!(
                    "Warehouse rejected {} of {} rows from {} (chunk {})",
                    errors.len(),
                    rows.len(),
                    hub_id,
                    chunk
                );
                return Err(IngestError::Insert { chunk, errors });
            }
            report.rows += rows.len();
            report.chunks += 1;
        }

        tracing::info!(
            "Ingested {} rows from {} in {} chunks",
            report.rows,
            hub_id,
            report.chunks
        );
        Ok(report)
    }
}

/// Parse batch text into rows for `hub_id`.
pub fn to_rows(hub_id: &str, text: &str) -> Result<Vec<WarehouseRow>, FormatError> {
    Ok(batch::parse(text)?
        .into_iter()
        .map(|line| WarehouseRow {
            tag_id: line.tag_id,
            measurements: line.measurements,
            hub_id: hub_id.to_string(),
            timestamp: line.timestamp,
            rssi: line.rssi,
            hci: line.hci,
        })
        .collect())
}
