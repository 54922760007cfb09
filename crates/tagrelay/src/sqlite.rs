// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! SQLite batch store
//!
//! One database file shared by the capture and publisher processes. SQLite
//! serializes writers; every connection waits up to the busy timeout for the
//! write lock before giving up with [`StoreError::Busy`].

use crate::codec;
use crate::reading::{BatchId, QueueRecord, Reading};
use crate::store::{
    BatchStore, FailureRecord, StoreError, StoreResult, StoreStats, DEFAULT_BUSY_TIMEOUT,
};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

/// SQLite batch store
///
/// Thread-safe via internal Mutex (SQLite Connection is not Sync).
///
/// # Schema
///
/// ```sql
/// CREATE TABLE measurements (
///     batch_id INTEGER NOT NULL DEFAULT 0,
///     timestamp INTEGER NOT NULL,
///     tag_id TEXT NOT NULL,
///     measurements TEXT NOT NULL,
///     hci INTEGER NOT NULL,
///     rssi INTEGER NOT NULL
/// );
/// CREATE INDEX timestamp_idx ON measurements(timestamp);
/// CREATE INDEX batched_idx ON measurements(batch_id);
/// CREATE INDEX tag_idx ON measurements(tag_id);
/// CREATE UNIQUE INDEX capture_idx ON measurements(tag_id, timestamp, hci);
/// ```
pub struct SqliteBatchStore {
    conn: Mutex<Connection>,
}

impl SqliteBatchStore {
    /// Open (or create) a file-backed store with the default busy timeout.
    pub fn open<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        Self::open_with_timeout(path, DEFAULT_BUSY_TIMEOUT)
    }

    /// Open (or create) a file-backed store.
    pub fn open_with_timeout<P: AsRef<Path>>(path: P, busy_timeout: Duration) -> StoreResult<Self> {
        let conn = Connection::open(path.as_ref()).map_err(StoreError::Sqlite)?;
        conn.busy_timeout(busy_timeout)?;

        // WAL lets the publisher read while the capture process writes.
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        if !mode.eq_ignore_ascii_case("wal") {
            tracing::warn!("SQLite journal mode is {} (WAL unavailable)", mode);
        }
        conn.pragma_update(None, "synchronous", "NORMAL")?;

        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Create an in-memory store (for testing)
    pub fn new_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory().map_err(StoreError::Sqlite)?;

        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn conn(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    /// Initialize database schema
    fn init_schema(&self) -> StoreResult<()> {
        let conn = self.conn()?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS measurements (
                batch_id INTEGER NOT NULL DEFAULT 0,
                timestamp INTEGER NOT NULL,
                tag_id TEXT NOT NULL,
                measurements TEXT NOT NULL,
                hci INTEGER NOT NULL,
                rssi INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS timestamp_idx ON measurements(timestamp);
            CREATE INDEX IF NOT EXISTS batched_idx ON measurements(batch_id);
            CREATE INDEX IF NOT EXISTS tag_idx ON measurements(tag_id);
            CREATE UNIQUE INDEX IF NOT EXISTS capture_idx
                ON measurements(tag_id, timestamp, hci);

            CREATE TABLE IF NOT EXISTS batch_attempts (
                batch_id INTEGER PRIMARY KEY,
                attempts INTEGER NOT NULL,
                first_failure_at INTEGER NOT NULL,
                last_error TEXT
            );

            CREATE TABLE IF NOT EXISTS dead_letters (
                batch_id INTEGER NOT NULL,
                timestamp INTEGER NOT NULL,
                tag_id TEXT NOT NULL,
                measurements TEXT NOT NULL,
                hci INTEGER NOT NULL,
                rssi INTEGER NOT NULL,
                dead_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS store_meta (
                key TEXT PRIMARY KEY,
                value INTEGER NOT NULL
            );",
        )?;

        Ok(())
    }

    /// Next batch id: one past the highest id ever handed out.
    fn next_batch_id(conn: &Connection) -> rusqlite::Result<i64> {
        let current: i64 = conn.query_row(
            "SELECT MAX(
                 COALESCE((SELECT value FROM store_meta WHERE key = 'last_batch_id'), 0),
                 COALESCE((SELECT MAX(batch_id) FROM measurements), 0)
             )",
            [],
            |row| row.get(0),
        )?;
        Ok(current + 1)
    }

    fn reclaim_space(conn: &Connection) {
        if let Err(e) = conn.execute_batch("VACUUM") {
            tracing::warn!("Failed to reclaim storage: {}", e);
        }
    }

    fn row_to_record(
        (batch_id, timestamp, tag_id, fields, hci, rssi): (i64, i64, String, String, i64, i64),
    ) -> StoreResult<QueueRecord> {
        let measurement = codec::decode_fields(&fields).ok_or_else(|| {
            StoreError::Corrupt(format!("bad measurements {:?} for tag {}", fields, tag_id))
        })?;

        Ok(QueueRecord {
            reading: Reading {
                tag_id,
                rssi: rssi as i32,
                timestamp,
                measurement,
            },
            batch_id: BatchId(batch_id),
            radio_index: hci as u32,
        })
    }
}

impl BatchStore for SqliteBatchStore {
    fn insert_many(&self, radio_index: u32, readings: &[Reading]) -> StoreResult<usize> {
        if readings.is_empty() {
            return Ok(0);
        }

        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let mut inserted = 0;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT OR IGNORE INTO measurements (timestamp, tag_id, measurements, hci, rssi)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for reading in readings {
                inserted += stmt.execute(params![
                    reading.timestamp,
                    reading.tag_id,
                    reading.measurement.fields_hex(),
                    radio_index,
                    reading.rssi,
                ])?;
            }
        }
        tx.commit()?;

        tracing::debug!(
            "Stored {} of {} readings from hci{}",
            inserted,
            readings.len(),
            radio_index
        );
        Ok(inserted)
    }

    fn claim_batch(&self, max_size: usize) -> StoreResult<Option<BatchId>> {
        if max_size == 0 {
            return Ok(None);
        }

        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let waiting: i64 = tx.query_row(
            "SELECT COUNT(*) FROM measurements WHERE batch_id = 0",
            [],
            |row| row.get(0),
        )?;
        if waiting as usize <= max_size {
            tracing::debug!(
                "{} more readings needed to create another batch",
                max_size + 1 - waiting as usize
            );
            return Ok(None);
        }

        let batch_id = Self::next_batch_id(&tx)?;
        let claimed = tx.execute(
            "UPDATE measurements SET batch_id = ?1
             WHERE rowid IN (
                 SELECT rowid FROM measurements
                 WHERE batch_id = 0
                 ORDER BY timestamp ASC, rowid ASC
                 LIMIT ?2
             )",
            params![batch_id, max_size as i64],
        )?;
        tx.execute(
            "INSERT INTO store_meta (key, value) VALUES ('last_batch_id', ?1)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            [batch_id],
        )?;
        tx.commit()?;

        tracing::info!("Batch {} created with {} readings", batch_id, claimed);
        Ok(Some(BatchId(batch_id)))
    }

    fn read_batch(&self, batch_id: BatchId) -> StoreResult<Vec<QueueRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(
            "SELECT batch_id, timestamp, tag_id, measurements, hci, rssi
             FROM measurements
             WHERE batch_id = ?1
             ORDER BY tag_id ASC, timestamp ASC, rowid ASC",
        )?;

        let rows: Vec<(i64, i64, String, String, i64, i64)> = stmt
            .query_map([batch_id.0], |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                ))
            })?
            .collect::<Result<_, _>>()?;

        rows.into_iter().map(Self::row_to_record).collect()
    }

    fn delete_batch(&self, batch_id: BatchId) -> StoreResult<usize> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let deleted = tx.execute("DELETE FROM measurements WHERE batch_id = ?1", [batch_id.0])?;
        tx.execute("DELETE FROM batch_attempts WHERE batch_id = ?1", [batch_id.0])?;
        tx.commit()?;

        // SQLite does not shrink the file on delete.
        Self::reclaim_space(&conn);

        tracing::debug!("Deleted {} rows of batch {}", deleted, batch_id);
        Ok(deleted)
    }

    fn find_oldest_unpublished(&self) -> StoreResult<Option<BatchId>> {
        let conn = self.conn()?;
        let oldest: Option<i64> = conn.query_row(
            "SELECT MIN(batch_id) FROM measurements WHERE batch_id > 0",
            [],
            |row| row.get(0),
        )?;
        Ok(oldest.map(BatchId))
    }

    fn record_failure(&self, batch_id: BatchId, error: &str) -> StoreResult<FailureRecord> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO batch_attempts (batch_id, attempts, first_failure_at, last_error)
             VALUES (?1, 1, CAST(strftime('%s', 'now') AS INTEGER), ?2)
             ON CONFLICT(batch_id) DO UPDATE SET
                 attempts = attempts + 1,
                 last_error = excluded.last_error",
            params![batch_id.0, error],
        )?;

        let (attempts, first_failure_at): (i64, i64) = conn.query_row(
            "SELECT attempts, first_failure_at FROM batch_attempts WHERE batch_id = ?1",
            [batch_id.0],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        Ok(FailureRecord {
            batch_id,
            attempts: attempts as u32,
            first_failure_at,
        })
    }

    fn dead_letter_batch(&self, batch_id: BatchId) -> StoreResult<usize> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let moved = tx.execute(
            "INSERT INTO dead_letters (batch_id, timestamp, tag_id, measurements, hci, rssi, dead_at)
             SELECT batch_id, timestamp, tag_id, measurements, hci, rssi,
                    CAST(strftime('%s', 'now') AS INTEGER)
             FROM measurements WHERE batch_id = ?1",
            [batch_id.0],
        )?;
        tx.execute("DELETE FROM measurements WHERE batch_id = ?1", [batch_id.0])?;
        tx.execute("DELETE FROM batch_attempts WHERE batch_id = ?1", [batch_id.0])?;
        tx.commit()?;

        Ok(moved)
    }

    fn requeue_dead_letters(&self) -> StoreResult<usize> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let requeued = tx.execute(
            "INSERT OR IGNORE INTO measurements (batch_id, timestamp, tag_id, measurements, hci, rssi)
             SELECT 0, timestamp, tag_id, measurements, hci, rssi FROM dead_letters",
            [],
        )?;
        tx.execute("DELETE FROM dead_letters", [])?;
        tx.commit()?;

        Ok(requeued)
    }

    fn stats(&self) -> StoreResult<StoreStats> {
        let conn = self.conn()?;
        let (unassigned, claimed, batches): (i64, i64, i64) = conn.query_row(
            "SELECT
                 COALESCE(SUM(batch_id = 0), 0),
                 COALESCE(SUM(batch_id > 0), 0),
                 COUNT(DISTINCT NULLIF(batch_id, 0))
             FROM measurements",
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;
        let dead_letters: i64 =
            conn.query_row("SELECT COUNT(*) FROM dead_letters", [], |row| row.get(0))?;

        Ok(StoreStats {
            unassigned: unassigned as usize,
            claimed: claimed as usize,
            batches: batches as usize,
            dead_letters: dead_letters as usize,
        })
    }

    fn reset(&self) -> StoreResult<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        tx.execute_batch(
            "DELETE FROM measurements;
             DELETE FROM batch_attempts;
             DELETE FROM dead_letters;
             DELETE FROM store_meta;",
        )?;
        tx.commit()?;
        Self::reclaim_space(&conn);
        Ok(())
    }
}

/// Failure bookkeeping lookup, used by operators and tests.
impl SqliteBatchStore {
    /// Current failure record of a batch, if it has failed before.
    pub fn failure_record(&self, batch_id: BatchId) -> StoreResult<Option<FailureRecord>> {
        let conn = self.conn()?;
        let row: Option<(i64, i64)> = conn
            .query_row(
                "SELECT attempts, first_failure_at FROM batch_attempts WHERE batch_id = ?1",
                [batch_id.0],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        Ok(row.map(|(attempts, first_failure_at)| FailureRecord {
            batch_id,
            attempts: attempts as u32,
            first_failure_at,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Measurement;

    fn reading(tag: &str, timestamp: i64) -> Reading {
        Reading {
            tag_id: tag.to_string(),
            rssi: -60,
            timestamp,
            measurement: Measurement::from_raw([895, 933, -60, 1961]),
        }
    }

    fn readings(count: i64) -> Vec<Reading> {
        (0..count).map(|i| reading("aabbccddeeff", 1000 + i)).collect()
    }

    #[test]
    fn test_insert_and_stats() {
        let store = SqliteBatchStore::new_in_memory().unwrap();
        assert_eq!(store.insert_many(0, &readings(10)).unwrap(), 10);

        let stats = store.stats().unwrap();
        assert_eq!(stats.unassigned, 10);
        assert_eq!(stats.claimed, 0);
        assert_eq!(stats.batches, 0);
    }

    #[test]
    fn test_insert_ignores_replayed_frame() {
        let store = SqliteBatchStore::new_in_memory().unwrap();
        let r = reading("aabbccddeeff", 1000);

        assert_eq!(store.insert_many(0, &[r.clone()]).unwrap(), 1);
        assert_eq!(store.insert_many(0, &[r.clone()]).unwrap(), 0);
        assert_eq!(store.stats().unwrap().unassigned, 1);
    }

    #[test]
    fn test_insert_keeps_captures_from_other_radio() {
        let store = SqliteBatchStore::new_in_memory().unwrap();
        let r = reading("aabbccddeeff", 1000);

        store.insert_many(0, &[r.clone()]).unwrap();
        store.insert_many(1, &[r]).unwrap();
        assert_eq!(store.stats().unwrap().unassigned, 2);
    }

    #[test]
    fn test_claim_takes_oldest() {
        let store = SqliteBatchStore::new_in_memory().unwrap();
        // inserted newest first to prove ordering is by timestamp
        let mut rows = readings(6);
        rows.reverse();
        store.insert_many(0, &rows).unwrap();

        let batch = store.claim_batch(5).unwrap().unwrap();
        assert_eq!(batch, BatchId(1));

        let claimed = store.read_batch(batch).unwrap();
        assert_eq!(claimed.len(), 5);
        assert!(claimed.iter().all(|r| r.reading.timestamp < 1005));
        assert!(claimed.iter().all(|r| r.batch_id == batch));

        let stats = store.stats().unwrap();
        assert_eq!(stats.unassigned, 1);
        assert_eq!(stats.claimed, 5);
    }

    #[test]
    fn test_claim_requires_more_than_max_size() {
        let store = SqliteBatchStore::new_in_memory().unwrap();
        store.insert_many(0, &readings(5)).unwrap();

        assert!(store.claim_batch(5).unwrap().is_none());
        assert_eq!(store.stats().unwrap().unassigned, 5);
        assert!(store.claim_batch(0).unwrap().is_none());
    }

    #[test]
    fn test_batch_ids_increase() {
        let store = SqliteBatchStore::new_in_memory().unwrap();
        store.insert_many(0, &readings(7)).unwrap();

        let first = store.claim_batch(3).unwrap().unwrap();
        let second = store.claim_batch(3).unwrap().unwrap();
        assert!(second > first);

        // deleting the newest batch must not recycle its id
        store.delete_batch(second).unwrap();
        store.insert_many(0, &readings(20)[10..]).unwrap();
        let third = store.claim_batch(3).unwrap().unwrap();
        assert!(third > second);
    }

    #[test]
    fn test_read_batch_orders_by_tag() {
        let store = SqliteBatchStore::new_in_memory().unwrap();
        store
            .insert_many(
                0,
                &[
                    reading("bb", 1),
                    reading("aa", 2),
                    reading("bb", 3),
                    reading("aa", 4),
                    reading("cc", 5),
                ],
            )
            .unwrap();
        let batch = store.claim_batch(4).unwrap().unwrap();

        let tags: Vec<_> = store
            .read_batch(batch)
            .unwrap()
            .into_iter()
            .map(|r| (r.reading.tag_id, r.reading.timestamp))
            .collect();
        assert_eq!(
            tags,
            vec![
                ("aa".to_string(), 2),
                ("aa".to_string(), 4),
                ("bb".to_string(), 1),
                ("bb".to_string(), 3),
            ]
        );
    }

    #[test]
    fn test_delete_batch_is_exact() {
        let store = SqliteBatchStore::new_in_memory().unwrap();
        store.insert_many(0, &readings(10)).unwrap();
        let first = store.claim_batch(3).unwrap().unwrap();
        let second = store.claim_batch(3).unwrap().unwrap();

        assert_eq!(store.delete_batch(first).unwrap(), 3);

        assert!(store.read_batch(first).unwrap().is_empty());
        assert_eq!(store.read_batch(second).unwrap().len(), 3);
        assert_eq!(store.stats().unwrap().unassigned, 4);
    }

    #[test]
    fn test_find_oldest_unpublished() {
        let store = SqliteBatchStore::new_in_memory().unwrap();
        assert!(store.find_oldest_unpublished().unwrap().is_none());

        store.insert_many(0, &readings(10)).unwrap();
        let first = store.claim_batch(3).unwrap().unwrap();
        let second = store.claim_batch(3).unwrap().unwrap();

        assert_eq!(store.find_oldest_unpublished().unwrap(), Some(first));
        store.delete_batch(first).unwrap();
        assert_eq!(store.find_oldest_unpublished().unwrap(), Some(second));
    }

    #[test]
    fn test_failure_bookkeeping() {
        let store = SqliteBatchStore::new_in_memory().unwrap();
        store.insert_many(0, &readings(4)).unwrap();
        let batch = store.claim_batch(3).unwrap().unwrap();

        let first = store.record_failure(batch, "timeout").unwrap();
        let second = store.record_failure(batch, "503").unwrap();
        assert_eq!(first.attempts, 1);
        assert_eq!(second.attempts, 2);
        assert_eq!(first.first_failure_at, second.first_failure_at);

        store.delete_batch(batch).unwrap();
        assert!(store.failure_record(batch).unwrap().is_none());
    }

    #[test]
    fn test_dead_letter_and_requeue() {
        let store = SqliteBatchStore::new_in_memory().unwrap();
        store.insert_many(0, &readings(4)).unwrap();
        let batch = store.claim_batch(3).unwrap().unwrap();
        store.record_failure(batch, "forbidden").unwrap();

        assert_eq!(store.dead_letter_batch(batch).unwrap(), 3);
        let stats = store.stats().unwrap();
        assert_eq!(stats.claimed, 0);
        assert_eq!(stats.dead_letters, 3);
        assert!(store.find_oldest_unpublished().unwrap().is_none());

        assert_eq!(store.requeue_dead_letters().unwrap(), 3);
        let stats = store.stats().unwrap();
        assert_eq!(stats.unassigned, 4);
        assert_eq!(stats.dead_letters, 0);
    }

    #[test]
    fn test_reset() {
        let store = SqliteBatchStore::new_in_memory().unwrap();
        store.insert_many(0, &readings(4)).unwrap();
        store.claim_batch(3).unwrap();

        store.reset().unwrap();
        assert_eq!(store.stats().unwrap(), StoreStats::default());
    }

    #[test]
    fn test_reset_while_locked_leaves_store_usable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("measurements.db");
        let store = SqliteBatchStore::open_with_timeout(&path, Duration::from_millis(20)).unwrap();
        store.insert_many(0, &readings(3)).unwrap();

        let holder = Connection::open(&path).unwrap();
        holder.execute_batch("BEGIN IMMEDIATE").unwrap();
        assert!(store.reset().unwrap_err().is_transient());
        holder.execute_batch("ROLLBACK").unwrap();

        // no transaction left open on the store connection
        assert!(store.conn().unwrap().is_autocommit());
        assert_eq!(store.stats().unwrap().unassigned, 3);
        store.reset().unwrap();
        assert_eq!(store.stats().unwrap().unassigned, 0);
    }

    #[test]
    fn test_file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("measurements.db");

        {
            let store = SqliteBatchStore::open(&path).unwrap();
            store.insert_many(2, &readings(3)).unwrap();
        }

        let store = SqliteBatchStore::open(&path).unwrap();
        assert_eq!(store.stats().unwrap().unassigned, 3);
        store.insert_many(0, &readings(1)).unwrap();
        let batch = store.claim_batch(3).unwrap().unwrap();
        let records = store.read_batch(batch).unwrap();
        assert_eq!(records[0].radio_index, 2);
        assert_eq!(
            records[0].reading.measurement,
            Measurement::from_raw([895, 933, -60, 1961])
        );
    }

    #[test]
    fn test_locked_store_reports_busy() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("measurements.db");
        let _store = SqliteBatchStore::open(&path).unwrap();
        let writer = SqliteBatchStore::open_with_timeout(&path, Duration::from_millis(50)).unwrap();

        // Another process holding the write lock
        let holder = Connection::open(&path).unwrap();
        holder.execute_batch("BEGIN IMMEDIATE").unwrap();

        let err = writer.insert_many(0, &readings(1)).unwrap_err();
        assert!(err.is_transient(), "unexpected error: {err}");

        holder.execute_batch("ROLLBACK").unwrap();
        assert_eq!(writer.insert_many(0, &readings(1)).unwrap(), 1);
    }
}
