// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Warehouse abstraction
//!
//! # Implementations
//!
//! - `BigQueryWarehouse` -- BigQuery streaming inserts
//! - `MockWarehouse` -- records inserted rows, scripted outcomes

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Mutex;
use thiserror::Error;

/// Warehouse call failures (the insert was not evaluated).
#[derive(Debug, Error)]
pub enum WarehouseError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("insert rejected with status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("missing credentials: {0}")]
    Credentials(String),

    #[error("{0}")]
    Other(String),
}

/// One destination table row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarehouseRow {
    pub tag_id: String,
    /// 16-hex-character field block as transmitted
    pub measurements: String,
    pub hub_id: String,
    /// Unix seconds, gateway clock
    pub timestamp: i64,
    pub rssi: i32,
    pub hci: u32,
}

impl WarehouseRow {
    /// Stable per-capture id, so redelivered rows can be de-duplicated.
    pub fn insert_id(&self) -> String {
        format!(
            "{}-{}-{}-{}",
            self.hub_id, self.tag_id, self.timestamp, self.hci
        )
    }
}

/// A row rejected by the warehouse. `index` is relative to the insert call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InsertError {
    pub index: usize,
    pub reason: String,
}

/// Row sink.
#[async_trait]
pub trait Warehouse: Send + Sync {
    /// Insert rows; an empty list means every row was accepted.
    async fn insert_rows(&self, rows: &[WarehouseRow]) -> Result<Vec<InsertError>, WarehouseError>;
}

#[async_trait]
impl<T: Warehouse + ?Sized> Warehouse for std::sync::Arc<T> {
    async fn insert_rows(&self, rows: &[WarehouseRow]) -> Result<Vec<InsertError>, WarehouseError> {
        (**self).insert_rows(rows).await
    }
}

// ============================================================================
// Mock Implementation for Testing
// ============================================================================

/// Scripted result of one mock insert.
#[derive(Debug, Clone)]
pub enum MockInsert {
    /// Accept every row
    Accept,
    /// Reject the rows at these indices
    RejectRows(Vec<usize>),
    /// Fail the call
    Fail(String),
}

/// In-memory warehouse for tests.
///
/// Every insert call is recorded, including rejected ones.
#[derive(Default)]
pub struct MockWarehouse {
    script: Mutex<VecDeque<MockInsert>>,
    calls: Mutex<Vec<Vec<WarehouseRow>>>,
}

impl MockWarehouse {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue outcomes for the next inserts; afterwards everything is accepted.
    pub fn with_script(outcomes: impl IntoIterator<Item = MockInsert>) -> Self {
        Self {
            script: Mutex::new(outcomes.into_iter().collect()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Rows of each insert call, in order.
    pub fn calls(&self) -> Vec<Vec<WarehouseRow>> {
        match self.calls.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// All rows passed to the warehouse.
    pub fn rows(&self) -> Vec<WarehouseRow> {
        self.calls().into_iter().flatten().collect()
    }
}

#[async_trait]
impl Warehouse for MockWarehouse {
    async fn insert_rows(&self, rows: &[WarehouseRow]) -> Result<Vec<InsertError>, WarehouseError> {
        match self.calls.lock() {
            Ok(mut guard) => guard.push(rows.to_vec()),
            Err(poisoned) => poisoned.into_inner().push(rows.to_vec()),
        }

        let next = match self.script.lock() {
            Ok(mut guard) => guard.pop_front(),
            Err(poisoned) => poisoned.into_inner().pop_front(),
        };

        match next.unwrap_or(MockInsert::Accept) {
            MockInsert::Accept => Ok(Vec::new()),
            MockInsert::RejectRows(indices) => Ok(indices
                .into_iter()
                .map(|index| InsertError {
                    index,
                    reason: "invalid".to_string(),
                })
                .collect()),
            MockInsert::Fail(msg) => Err(WarehouseError::Other(msg)),
        }
    }
}
