// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Batch publisher
//!
//! Drains the batch store towards the cloud, one batch per tick.
//!
//! # Operation
//!
//! 1. Claim the oldest unassigned records into a new batch (when enough are waiting)
//! 2. Pick the smallest claimed batch id still present
//! 3. Serialize it and publish the envelope under a timeout
//! 4. Delete the batch on a non-empty message id, otherwise record the failure
//!
//! A failed batch stays claimed and is retried with identical content on the
//! next tick, ahead of any newer batch. A batch that keeps failing past the
//! retry age is moved to the dead-letter table.

use crate::config::GatewayConfig;
use crate::envelope::Envelope;
use crate::reading::BatchId;
use crate::store::{BatchStore, StoreError};
use crate::transport::{Transport, TransportError};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Publisher errors that abort a tick.
///
/// Delivery failures are not errors: they are reported as
/// [`TickOutcome::Failed`] and retried.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("batch store: {0}")]
    Store(#[from] StoreError),
}

/// Why a delivery attempt did not succeed.
#[derive(Debug, Error)]
pub enum DeliveryFailure {
    #[error("{0}")]
    Transport(#[from] TransportError),

    #[error("no acknowledgement within {0:?}")]
    Timeout(Duration),

    #[error("publish returned no message id")]
    NoMessageId,
}

/// Publisher settings.
#[derive(Debug, Clone)]
pub struct PublisherSettings {
    /// Records per batch
    pub batch_size: usize,
    /// Time between ticks
    pub tick_interval: Duration,
    /// Overall time allowed for one publish call
    pub publish_timeout: Duration,
    /// Dead-letter a batch failing for longer than this (`None` = never)
    pub max_retry_age: Option<Duration>,
    /// Gateway identity attached to every envelope
    pub hub_id: String,
}

impl Default for PublisherSettings {
    fn default() -> Self {
        Self::from_config(&GatewayConfig::default())
    }
}

impl PublisherSettings {
    pub fn from_config(config: &GatewayConfig) -> Self {
        Self {
            batch_size: config.publisher.batch_size,
            tick_interval: config.publisher.tick_interval(),
            publish_timeout: config.publisher.publish_timeout(),
            max_retry_age: config.publisher.max_retry_age(),
            hub_id: config.hub_id(),
        }
    }
}

/// Publisher statistics
#[derive(Debug, Default, Clone)]
pub struct PublisherStats {
    /// Ticks executed
    pub ticks: u64,
    /// Batches created by claiming
    pub batches_claimed: u64,
    /// Batches delivered and deleted
    pub batches_delivered: u64,
    /// Records in delivered batches
    pub records_delivered: u64,
    /// Failed delivery attempts
    pub publish_failures: u64,
    /// Batches moved to the dead-letter table
    pub batches_dead_lettered: u64,
    /// Ticks aborted by a store error
    pub store_errors: u64,
}

/// Result of one tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// Nothing to publish
    Idle,
    /// Batch delivered and deleted
    Delivered {
        batch_id: BatchId,
        records: usize,
        message_id: String,
    },
    /// Delivery failed; the batch stays claimed for retry
    Failed { batch_id: BatchId, attempts: u32 },
    /// Delivery failed past the retry age; records moved to dead letters
    DeadLettered { batch_id: BatchId, records: usize },
}

/// Batch publisher
///
/// Owns the claim/publish/delete cycle for one store and one transport.
pub struct BatchPublisher<S: BatchStore, T: Transport> {
    settings: PublisherSettings,
    store: Arc<S>,
    transport: T,
    clock: fn() -> i64,
    stats: PublisherStats,
}

impl<S: BatchStore, T: Transport> BatchPublisher<S, T> {
    /// Create a new batch publisher
    pub fn new(settings: PublisherSettings, store: Arc<S>, transport: T) -> Self {
        Self {
            settings,
            store,
            transport,
            clock: unix_now,
            stats: PublisherStats::default(),
        }
    }

    /// Replace the wall clock (Unix seconds) used for the retry age.
    pub fn with_clock(mut self, clock: fn() -> i64) -> Self {
        self.clock = clock;
        self
    }

    /// Get publisher statistics
    pub fn stats(&self) -> &PublisherStats {
        &self.stats
    }

    pub fn settings(&self) -> &PublisherSettings {
        &self.settings
    }

    /// Run one claim/publish cycle.
    pub async fn tick(&mut self) -> Result<TickOutcome, PublishError> {
        self.stats.ticks += 1;

        if let Some(batch_id) = self.store.claim_batch(self.settings.batch_size)? {
            self.stats.batches_claimed += 1;
            tracing::info!(
                "Claimed batch {} ({} records)",
                batch_id,
                self.settings.batch_size
            );
        }

        match self.store.find_oldest_unpublished()? {
            Some(batch_id) => self.publish_batch(batch_id).await,
            None => Ok(TickOutcome::Idle),
        }
    }

    /// Publish one claimed batch.
    pub async fn publish_batch(&mut self, batch_id: BatchId) -> Result<TickOutcome, PublishError> {
        let records = self.store.read_batch(batch_id)?;
        if records.is_empty() {
            tracing::debug!("Batch {} is empty, nothing to publish", batch_id);
            return Ok(TickOutcome::Idle);
        }

        let envelope = Envelope::for_batch(&self.settings.hub_id, batch_id, &records);
        tracing::debug!(
            "Publishing batch {} ({} records, {} bytes)",
            batch_id,
            records.len(),
            envelope.data.len()
        );

        match self.deliver(&envelope).await {
            Ok(message_id) => {
                let deleted = self.store.delete_batch(batch_id)?;
                self.stats.batches_delivered += 1;
                self.stats.records_delivered += deleted as u64;
                tracing::info!(
                    "Delivered batch {} ({} records) as message {}",
                    batch_id,
                    deleted,
                    message_id
                );
                Ok(TickOutcome::Delivered {
                    batch_id,
                    records: deleted,
                    message_id,
                })
            }
            Err(failure) => self.handle_failure(batch_id, failure),
        }
    }

    /// Run until `shutdown` resolves. Errors are logged, never fatal.
    pub async fn run<F: Future<Output = ()>>(&mut self, shutdown: F) {
        tracing::info!(
            "Batch publisher started (batch size {}, tick {:?})",
            self.settings.batch_size,
            self.settings.tick_interval
        );

        let mut interval = tokio::time::interval(self.settings.tick_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = interval.tick() => {
                    if let Err(e) = self.tick().await {
                        self.stats.store_errors += 1;
                        match &e {
                            PublishError::Store(store) if store.is_transient() => {
                                tracing::warn!("Tick skipped: {}", e)
                            }
                            _ => tracing::error!("Tick failed: {}", e),
                        }
                    }
                }
            }
        }

        tracing::info!(
            "Batch publisher stopped: {} delivered, {} failures, {} dead-lettered",
            self.stats.batches_delivered,
            self.stats.publish_failures,
            self.stats.batches_dead_lettered
        );
    }

    async fn deliver(&self, envelope: &Envelope) -> Result<String, DeliveryFailure> {
        let timeout = self.settings.publish_timeout;
        match tokio::time::timeout(timeout, self.transport.publish(envelope)).await {
            Err(_) => Err(DeliveryFailure::Timeout(timeout)),
            Ok(Err(e)) => Err(e.into()),
            Ok(Ok(Some(id))) if !id.is_empty() => Ok(id),
            Ok(Ok(_)) => Err(DeliveryFailure::NoMessageId),
        }
    }

    fn handle_failure(
        &mut self,
        batch_id: BatchId,
        failure: DeliveryFailure,
    ) -> Result<TickOutcome, PublishError> {
        self.stats.publish_failures += 1;
        let record = self.store.record_failure(batch_id, &failure.to_string())?;
        tracing::warn!(
            "Failed to publish batch {} (attempt {}): {}",
            batch_id,
            record.attempts,
            failure
        );

        if let Some(max_age) = self.settings.max_retry_age {
            let failing_for = (self.clock)().saturating_sub(record.first_failure_at);
            if failing_for >= 0 && failing_for as u64 >= max_age.as_secs() {
                let records = self.store.dead_letter_batch(batch_id)?;
                self.stats.batches_dead_lettered += 1;
                tracing::error!(
                    "Batch {} failed for {}s over {} attempts; moved {} records to dead letters",
                    batch_id,
                    failing_for,
                    record.attempts,
                    records
                );
                return Ok(TickOutcome::DeadLettered { batch_id, records });
            }
        }

        Ok(TickOutcome::Failed {
            batch_id,
            attempts: record.attempts,
        })
    }
}

/// Current Unix time in seconds.
pub fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
