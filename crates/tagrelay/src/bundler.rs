// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Ingest buffer for decoded readings.
//!
//! Groups readings so the batch store sees one multi-row insert instead of
//! one transaction per advertisement. Readings are written either when the
//! bundle is full or when the configured interval has elapsed.
//!
//! Nothing held here survives a crash; callers flush on shutdown.
//!
//! After a failed write the bundle stops writing on append and waits for the
//! caller's next timed flush. While the store stays unavailable the buffer is
//! capped at [`MAX_BUFFER_FACTOR`] times the capacity, oldest readings first
//! out.

use crate::reading::Reading;
use crate::store::{BatchStore, StoreResult};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Default number of readings per store write.
pub const DEFAULT_BUNDLE_SIZE: usize = 100;

/// Default maximum time a reading waits in the bundle.
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(60);

/// Buffered readings allowed per unit of capacity while writes fail.
pub const MAX_BUFFER_FACTOR: usize = 10;

/// Bundler statistics
#[derive(Debug, Default, Clone)]
pub struct BundlerStats {
    /// Store writes performed
    pub flushes: u64,
    /// Readings handed to the store
    pub readings_written: u64,
    /// Rows the store actually inserted (replays are ignored)
    pub rows_inserted: u64,
    /// Store writes that failed
    pub write_errors: u64,
    /// Readings discarded because the buffer was full
    pub dropped: u64,
}

/// A bundling buffer in front of a [`BatchStore`].
pub struct Bundler<S: BatchStore> {
    store: Arc<S>,
    radio_index: u32,
    readings: Vec<Reading>,
    capacity: usize,
    flush_interval: Duration,
    last_flush: Instant,
    retry_pending: bool,
    dropping: bool,
    stats: BundlerStats,
}

impl<S: BatchStore> Bundler<S> {
    /// Create a new bundler for readings captured on `radio_index`.
    ///
    /// # Arguments
    /// - `capacity` - Readings per automatic flush (at least 1)
    /// - `flush_interval` - Maximum time between flushes
    pub fn new(store: Arc<S>, radio_index: u32, capacity: usize, flush_interval: Duration) -> Self {
        let capacity = capacity.max(1);
        Self {
            store,
            radio_index,
            readings: Vec::with_capacity(capacity),
            capacity,
            flush_interval,
            last_flush: Instant::now(),
            retry_pending: false,
            dropping: false,
            stats: BundlerStats::default(),
        }
    }

    /// Add a reading, flushing when the bundle reaches capacity.
    ///
    /// Returns `Some(inserted)` when this call triggered a flush. On a failed
    /// write the readings stay buffered and are retried by the next timed
    /// flush, not by later appends.
    pub fn append(&mut self, reading: Reading) -> StoreResult<Option<usize>> {
        self.readings.push(reading);

        let limit = self.capacity.saturating_mul(MAX_BUFFER_FACTOR);
        if self.readings.len() > limit {
            let excess = self.readings.len() - limit;
            self.readings.drain(..excess);
            if !self.dropping {
                self.dropping = true;
                tracing::error!(
                    "Bundle full ({} readings) while the store is unavailable, dropping oldest",
                    limit
                );
            }
            self.stats.dropped += excess as u64;
        }

        if self.readings.len() >= self.capacity && !self.retry_pending {
            self.flush().map(Some)
        } else {
            Ok(None)
        }
    }

    /// Check if a timed flush is due: the interval elapsed or a failed write
    /// awaits retry.
    pub fn should_flush(&self) -> bool {
        !self.readings.is_empty()
            && (self.retry_pending || self.last_flush.elapsed() >= self.flush_interval)
    }

    /// Write all buffered readings to the store. No-op when empty.
    pub fn flush(&mut self) -> StoreResult<usize> {
        if self.readings.is_empty() {
            return Ok(0);
        }

        match self.store.insert_many(self.radio_index, &self.readings) {
            Ok(inserted) => {
                self.stats.flushes += 1;
                self.stats.readings_written += self.readings.len() as u64;
                self.stats.rows_inserted += inserted as u64;
                self.readings.clear();
                self.last_flush = Instant::now();
                self.retry_pending = false;
                if self.dropping {
                    self.dropping = false;
                    tracing::warn!("Store writable again, {} readings dropped so far", self.stats.dropped);
                }
                Ok(inserted)
            }
            Err(e) => {
                self.stats.write_errors += 1;
                self.retry_pending = true;
                tracing::warn!(
                    "Failed to write {} buffered readings: {}",
                    self.readings.len(),
                    e
                );
                Err(e)
            }
        }
    }

    /// Get the current number of buffered readings.
    pub fn len(&self) -> usize {
        self.readings.len()
    }

    /// Check if the bundle is empty.
    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }

    /// Get bundler statistics
    pub fn stats(&self) -> &BundlerStats {
        &self.stats
    }
}
