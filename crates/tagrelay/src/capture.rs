// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Capture service
//!
//! Feeds advertisements from a radio source into the batch store.
//!
//! # Operation
//!
//! 1. Receive advertisements from an [`AdvertisementSource`]
//! 2. Extract and decode tag readings, stamped with the capture time
//! 3. Bundle readings and write them to the store when full or on a timer
//! 4. Flush whatever is buffered when the source ends or shutdown is requested

use crate::advertisement::{Advertisement, Extractor};
use crate::bundler::Bundler;
use crate::config::CaptureConfig;
use crate::publisher::unix_now;
use crate::store::BatchStore;
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, Lines};

/// Source of scanned advertisements.
#[async_trait]
pub trait AdvertisementSource: Send {
    /// Next advertisement, or `None` once the source is exhausted.
    async fn next_advertisement(&mut self) -> std::io::Result<Option<Advertisement>>;
}

/// Reads one JSON advertisement per line.
///
/// ```text
/// {"address":"d5:bb:5c:b3:0c:1c","rssi":-66,"entries":[{"adtype":255,"value":"5900..."}]}
/// ```
///
/// Lines that do not parse are logged and skipped.
pub struct JsonLinesSource<R> {
    lines: Lines<R>,
    line_no: u64,
    skipped: u64,
}

impl<R: AsyncBufRead + Unpin + Send> JsonLinesSource<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
            line_no: 0,
            skipped: 0,
        }
    }

    /// Lines skipped as unparsable so far.
    pub fn skipped(&self) -> u64 {
        self.skipped
    }
}

#[async_trait]
impl<R: AsyncBufRead + Unpin + Send> AdvertisementSource for JsonLinesSource<R> {
    async fn next_advertisement(&mut self) -> std::io::Result<Option<Advertisement>> {
        while let Some(line) = self.lines.next_line().await? {
            self.line_no += 1;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<Advertisement>(line) {
                Ok(adv) => return Ok(Some(adv)),
                Err(e) => {
                    self.skipped += 1;
                    tracing::warn!("Skipping input line {}: {}", self.line_no, e);
                }
            }
        }
        Ok(None)
    }
}

/// Capture statistics
#[derive(Debug, Default, Clone)]
pub struct CaptureStats {
    /// Advertisements received from the source
    pub advertisements: u64,
    /// Tag readings extracted
    pub readings: u64,
    /// Advertisements without a usable tag payload
    pub ignored: u64,
    /// Failed store writes
    pub store_errors: u64,
}

/// Capture service
///
/// One instance per radio.
pub struct CaptureService<S: BatchStore, A: AdvertisementSource> {
    source: A,
    intake: Intake<S>,
    flush_check: Duration,
}

/// Extraction and bundling, kept apart from the source so both can be
/// borrowed independently while waiting for input.
struct Intake<S: BatchStore> {
    extractor: Extractor,
    bundler: Bundler<S>,
    clock: fn() -> i64,
    stats: CaptureStats,
}

impl<S: BatchStore, A: AdvertisementSource> CaptureService<S, A> {
    /// Create a new capture service
    pub fn new(config: &CaptureConfig, store: Arc<S>, source: A) -> Self {
        let flush_interval = config.flush_interval();
        Self {
            source,
            intake: Intake {
                extractor: Extractor::new().with_min_rssi(config.min_rssi),
                bundler: Bundler::new(
                    store,
                    config.radio_index,
                    config.bundle_size,
                    flush_interval,
                ),
                clock: unix_now,
                stats: CaptureStats::default(),
            },
            flush_check: flush_interval.clamp(Duration::from_millis(10), Duration::from_secs(1)),
        }
    }

    /// Replace the capture clock (Unix seconds).
    pub fn with_clock(mut self, clock: fn() -> i64) -> Self {
        self.intake.clock = clock;
        self
    }

    /// Get capture statistics
    pub fn stats(&self) -> &CaptureStats {
        &self.intake.stats
    }

    /// Readings waiting in the bundle.
    pub fn buffered(&self) -> usize {
        self.intake.bundler.len()
    }

    /// Handle one advertisement.
    pub fn ingest(&mut self, adv: &Advertisement) {
        self.intake.ingest(adv);
    }

    /// Run until the source ends or `shutdown` resolves, then flush.
    pub async fn run<F: Future<Output = ()>>(mut self, shutdown: F) -> CaptureStats {
        tracing::info!("Capture service started");

        let mut ticker = tokio::time::interval(self.flush_check);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("Shutdown requested");
                    break;
                }
                next = self.source.next_advertisement() => match next {
                    Ok(Some(adv)) => self.intake.ingest(&adv),
                    Ok(None) => {
                        tracing::info!("Advertisement source closed");
                        break;
                    }
                    Err(e) => {
                        tracing::error!("Advertisement source failed: {}", e);
                        break;
                    }
                },
                _ = ticker.tick() => {
                    if self.intake.bundler.should_flush() {
                        self.intake.flush();
                    }
                }
            }
        }

        let intake = &mut self.intake;
        intake.flush();
        if !intake.bundler.is_empty() {
            tracing::error!(
                "Exiting with {} readings not written to the store",
                intake.bundler.len()
            );
        }

        tracing::info!(
            "Capture service stopped: {} advertisements, {} readings, {} ignored",
            intake.stats.advertisements,
            intake.stats.readings,
            intake.stats.ignored
        );
        self.intake.stats
    }
}

impl<S: BatchStore> Intake<S> {
    fn ingest(&mut self, adv: &Advertisement) {
        self.stats.advertisements += 1;

        let Some(reading) = self.extractor.extract(adv, (self.clock)()) else {
            self.stats.ignored += 1;
            return;
        };

        tracing::trace!(
            "Reading from {}: {:.2} C, rssi {}",
            reading.tag_id,
            reading.temperature(),
            reading.rssi
        );
        self.stats.readings += 1;

        match self.bundler.append(reading) {
            Ok(Some(inserted)) => tracing::debug!("Bundle written ({} new rows)", inserted),
            Ok(None) => {}
            Err(e) => {
                self.stats.store_errors += 1;
                tracing::error!("Store write failed, keeping readings buffered: {}", e);
            }
        }
    }

    fn flush(&mut self) {
        match self.bundler.flush() {
            Ok(0) => {}
            Ok(inserted) => tracing::debug!("Flushed bundle ({} new rows)", inserted),
            Err(e) => {
                self.stats.store_errors += 1;
                tracing::error!("Bundle flush failed: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::advertisement::{ScanEntry, MANUFACTURER_DATA_AD_TYPE};
    use crate::sqlite::SqliteBatchStore;
    use tokio::sync::mpsc;

    const PAYLOAD: &str = "59000100030003007F03A503C4FFA907";

    fn config(bundle_size: usize) -> CaptureConfig {
        CaptureConfig {
            radio_index: 1,
            bundle_size,
            flush_interval_secs: 60,
            min_rssi: None,
        }
    }

    fn adv_json(address: &str, rssi: i32) -> String {
        format!(
            r#"{{"address":"{}","rssi":{},"entries":[{{"adtype":255,"description":"Manufacturer","value":"{}"}}]}}"#,
            address, rssi, PAYLOAD
        )
    }

    fn adv(address: &str) -> Advertisement {
        Advertisement {
            address: address.to_string(),
            rssi: -60,
            entries: vec![ScanEntry {
                adtype: MANUFACTURER_DATA_AD_TYPE,
                description: String::new(),
                value: PAYLOAD.to_string(),
            }],
        }
    }

    struct ChannelSource(mpsc::Receiver<Advertisement>);

    #[async_trait]
    impl AdvertisementSource for ChannelSource {
        async fn next_advertisement(&mut self) -> std::io::Result<Option<Advertisement>> {
            Ok(self.0.recv().await)
        }
    }

    #[tokio::test]
    async fn test_json_lines_source_skips_garbage() {
        let input = format!(
            "{}\nnot json\n\n{}\n",
            adv_json("d5:bb:5c:b3:0c:1c", -66),
            adv_json("f2:46:1f:bd:a1:d4", -71)
        );
        let mut source = JsonLinesSource::new(input.as_bytes());

        let first = source.next_advertisement().await.unwrap().unwrap();
        assert_eq!(first.rssi, -66);
        let second = source.next_advertisement().await.unwrap().unwrap();
        assert_eq!(second.address, "f2:46:1f:bd:a1:d4");
        assert!(source.next_advertisement().await.unwrap().is_none());
        assert_eq!(source.skipped(), 1);
    }

    #[tokio::test]
    async fn test_run_flushes_at_end_of_input() {
        let store = Arc::new(SqliteBatchStore::new_in_memory().unwrap());
        let input = format!(
            "{}\n{}\n{}\n",
            adv_json("d5:bb:5c:b3:0c:1c", -66),
            adv_json("f2:46:1f:bd:a1:d4", -71),
            r#"{"address":"11:22:33:44:55:66","rssi":-50,"entries":[]}"#
        );

        fn fixed_clock() -> i64 {
            1_539_206_911
        }

        let service = CaptureService::new(
            &config(100),
            Arc::clone(&store),
            JsonLinesSource::new(input.as_bytes()),
        )
        .with_clock(fixed_clock);
        let stats = service.run(std::future::pending()).await;

        assert_eq!(stats.advertisements, 3);
        assert_eq!(stats.readings, 2);
        assert_eq!(stats.ignored, 1);
        assert_eq!(store.stats().unwrap().unassigned, 2);

        let batch = store.claim_batch(1).unwrap().unwrap();
        let records = store.read_batch(batch).unwrap();
        assert_eq!(records[0].radio_index, 1);
        assert_eq!(records[0].reading.timestamp, 1_539_206_911);
    }

    #[tokio::test]
    async fn test_min_rssi_filter() {
        let store = Arc::new(SqliteBatchStore::new_in_memory().unwrap());
        let mut cfg = config(100);
        cfg.min_rssi = Some(-70);
        let input = format!(
            "{}\n{}\n",
            adv_json("d5:bb:5c:b3:0c:1c", -66),
            adv_json("f2:46:1f:bd:a1:d4", -71)
        );

        let stats = CaptureService::new(&cfg, Arc::clone(&store), JsonLinesSource::new(input.as_bytes()))
            .run(std::future::pending())
            .await;

        assert_eq!(stats.readings, 1);
        assert_eq!(store.stats().unwrap().unassigned, 1);
    }

    #[tokio::test]
    async fn test_bundle_written_when_full() {
        let store = Arc::new(SqliteBatchStore::new_in_memory().unwrap());
        let (_tx, rx) = mpsc::channel(1);
        let mut service = CaptureService::new(&config(2), Arc::clone(&store), ChannelSource(rx));

        service.ingest(&adv("aa:aa:aa:aa:aa:01"));
        assert_eq!(service.buffered(), 1);
        service.ingest(&adv("aa:aa:aa:aa:aa:02"));
        assert_eq!(service.buffered(), 0);
        assert_eq!(store.stats().unwrap().unassigned, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_time_based_flush_and_shutdown() {
        let store = Arc::new(SqliteBatchStore::new_in_memory().unwrap());
        let (tx, rx) = mpsc::channel(8);
        let mut cfg = config(100);
        cfg.flush_interval_secs = 5;

        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let service = CaptureService::new(&cfg, Arc::clone(&store), ChannelSource(rx));
        let handle = tokio::spawn(service.run(async {
            let _ = stop_rx.await;
        }));

        tx.send(adv("aa:aa:aa:aa:aa:01")).await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(store.stats().unwrap().unassigned, 0);

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(store.stats().unwrap().unassigned, 1);

        tx.send(adv("aa:aa:aa:aa:aa:02")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        stop_tx.send(()).unwrap();
        let stats = handle.await.unwrap();

        assert_eq!(stats.readings, 2);
        assert_eq!(store.stats().unwrap().unassigned, 2);
    }
}
