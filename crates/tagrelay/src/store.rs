// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Batch store abstraction
//!
//! The durable queue between the capture process and the publisher process.
//! Records enter unassigned, are claimed into numbered batches, and leave
//! only after confirmed delivery.
//!
//! ```text
//! insert_many --> [batch_id = 0] --claim_batch--> [batch_id = N] --delete_batch--> (gone)
//!                       ^                                |
//!                       +------ requeue_dead_letters <---+-- dead_letter_batch
//! ```

use crate::reading::{BatchId, QueueRecord, Reading};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// How long a writer waits for another process to release the write lock.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(30);

/// Batch store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Another process held the write lock past the busy timeout.
    /// Transient: retry on the next tick.
    #[error("database is locked by another process")]
    Busy,

    #[error("SQLite error: {0}")]
    Sqlite(rusqlite::Error),

    #[error("corrupt record in batch store: {0}")]
    Corrupt(String),

    #[error("store mutex poisoned")]
    Poisoned,
}

impl StoreError {
    /// Returns true for errors worth retrying later.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Busy)
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        match err.sqlite_error_code() {
            Some(rusqlite::ErrorCode::DatabaseBusy) | Some(rusqlite::ErrorCode::DatabaseLocked) => {
                StoreError::Busy
            }
            _ => StoreError::Sqlite(err),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Delivery failure bookkeeping for a claimed batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub batch_id: BatchId,
    /// Failed delivery attempts so far
    pub attempts: u32,
    /// When the first failure was recorded (Unix seconds)
    pub first_failure_at: i64,
}

/// Store occupancy counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStats {
    /// Records waiting to be claimed
    pub unassigned: usize,
    /// Records claimed but not yet delivered
    pub claimed: usize,
    /// Distinct claimed batches
    pub batches: usize,
    /// Records parked in the dead-letter table
    pub dead_letters: usize,
}

/// Batch store trait
///
/// # Implementations
///
/// - `SqliteBatchStore` -- file-backed, shared between local processes
pub trait BatchStore {
    /// Append unassigned records captured on `radio_index`.
    ///
    /// A record identical to a stored one in `(tag_id, timestamp, radio_index)`
    /// is ignored. Returns the number of rows actually inserted.
    fn insert_many(&self, radio_index: u32, readings: &[Reading]) -> StoreResult<usize>;

    /// Claim the `max_size` oldest unassigned records into a new batch.
    ///
    /// Only claims when strictly more than `max_size` records are waiting;
    /// otherwise returns `None` and changes nothing.
    fn claim_batch(&self, max_size: usize) -> StoreResult<Option<BatchId>>;

    /// All records of a batch, ordered by tag then timestamp.
    fn read_batch(&self, batch_id: BatchId) -> StoreResult<Vec<QueueRecord>>;

    /// Delete a delivered batch and reclaim its storage.
    fn delete_batch(&self, batch_id: BatchId) -> StoreResult<usize>;

    /// Smallest claimed batch id still present.
    fn find_oldest_unpublished(&self) -> StoreResult<Option<BatchId>>;

    /// Record a failed delivery attempt for a batch.
    fn record_failure(&self, batch_id: BatchId, error: &str) -> StoreResult<FailureRecord>;

    /// Move a batch's records to the dead-letter table.
    fn dead_letter_batch(&self, batch_id: BatchId) -> StoreResult<usize>;

    /// Return every dead-lettered record to the unassigned pool.
    fn requeue_dead_letters(&self) -> StoreResult<usize>;

    /// Occupancy counters.
    fn stats(&self) -> StoreResult<StoreStats>;

    /// Drop every record, including dead letters.
    fn reset(&self) -> StoreResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_busy_is_transient() {
        assert!(StoreError::Busy.is_transient());
        assert!(!StoreError::Poisoned.is_transient());
        assert!(!StoreError::Corrupt("x".into()).is_transient());
    }

    #[test]
    fn test_busy_error_mapping() {
        let err = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            None,
        );
        assert!(matches!(StoreError::from(err), StoreError::Busy));

        let err = rusqlite::Error::QueryReturnedNoRows;
        assert!(matches!(StoreError::from(err), StoreError::Sqlite(_)));
    }
}
