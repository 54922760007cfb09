// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! End-to-end tests: capture process and publisher process sharing one
//! store file.

use std::sync::Arc;
use std::time::Duration;
use tagrelay::batch;
use tagrelay::config::CaptureConfig;
use tagrelay::publisher::unix_now;
use tagrelay::{
    BatchPublisher, BatchStore, CaptureService, JsonLinesSource, MockOutcome, MockTransport,
    PublisherSettings, SqliteBatchStore, TickOutcome,
};

const PAYLOAD: &str = "59000100030003007F03A503C4FFA907";

fn advertisements(tags: usize, per_tag: usize) -> String {
    let mut out = String::new();
    for t in 0..tags {
        for _ in 0..per_tag {
            out.push_str(&format!(
                r#"{{"address":"aa:bb:cc:dd:ee:{:02x}","rssi":-{},"entries":[{{"adtype":255,"value":"{}"}}]}}"#,
                t,
                50 + t,
                PAYLOAD
            ));
            out.push('\n');
        }
    }
    out
}

fn settings(batch_size: usize) -> PublisherSettings {
    PublisherSettings {
        batch_size,
        tick_interval: Duration::from_millis(10),
        publish_timeout: Duration::from_secs(5),
        max_retry_age: Some(Duration::from_secs(24 * 3600)),
        hub_id: "hub-it".to_string(),
    }
}

fn capture_config(radio_index: u32) -> CaptureConfig {
    CaptureConfig {
        radio_index,
        bundle_size: 4,
        flush_interval_secs: 60,
        min_rssi: None,
    }
}

/// Each reading gets a distinct capture second.
fn counting_clock() -> i64 {
    use std::sync::atomic::{AtomicI64, Ordering};
    static NEXT: AtomicI64 = AtomicI64::new(1_600_000_000);
    NEXT.fetch_add(1, Ordering::Relaxed)
}

#[tokio::test]
async fn capture_then_publish_through_shared_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("measurements.db");

    // capture side
    let capture_store = Arc::new(SqliteBatchStore::open(&path).unwrap());
    let input = advertisements(3, 5);
    let stats = CaptureService::new(
        &capture_config(0),
        capture_store,
        JsonLinesSource::new(input.as_bytes()),
    )
    .with_clock(counting_clock)
    .run(std::future::pending())
    .await;
    assert_eq!(stats.readings, 15);

    // publisher side, separate connection
    let store = Arc::new(SqliteBatchStore::open(&path).unwrap());
    assert_eq!(store.stats().unwrap().unassigned, 15);

    let transport = Arc::new(MockTransport::new());
    let mut publisher = BatchPublisher::new(settings(10), Arc::clone(&store), Arc::clone(&transport));

    assert!(matches!(
        publisher.tick().await.unwrap(),
        TickOutcome::Delivered { records: 10, .. }
    ));
    assert_eq!(publisher.tick().await.unwrap(), TickOutcome::Idle);

    let sent = transport.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].hub_id(), Some("hub-it"));

    let lines = batch::parse(sent[0].text().unwrap()).unwrap();
    assert_eq!(lines.len(), 10);
    assert!(lines.iter().all(|l| l.measurements == "7f03a503c4ffa907"));
    // grouped by tag, so each tag appears in one run
    let mut runs = 1;
    for pair in lines.windows(2) {
        if pair[0].tag_id != pair[1].tag_id {
            runs += 1;
        }
    }
    let distinct: std::collections::HashSet<_> = lines.iter().map(|l| &l.tag_id).collect();
    assert_eq!(runs, distinct.len());

    assert_eq!(store.stats().unwrap().unassigned, 5);
}

#[tokio::test]
async fn failed_publish_keeps_rows_and_retries_identically() {
    let store = Arc::new(SqliteBatchStore::new_in_memory().unwrap());
    let input = advertisements(2, 3);
    CaptureService::new(
        &capture_config(1),
        Arc::clone(&store),
        JsonLinesSource::new(input.as_bytes()),
    )
    .with_clock(counting_clock)
    .run(std::future::pending())
    .await;

    let transport = Arc::new(MockTransport::with_script([MockOutcome::Fail(
        "connection reset".into(),
    )]));
    let mut publisher = BatchPublisher::new(settings(5), Arc::clone(&store), Arc::clone(&transport));

    assert!(matches!(
        publisher.tick().await.unwrap(),
        TickOutcome::Failed { attempts: 1, .. }
    ));
    let stats = store.stats().unwrap();
    assert_eq!(stats.claimed, 5);
    assert_eq!(stats.unassigned, 1);

    assert!(matches!(
        publisher.tick().await.unwrap(),
        TickOutcome::Delivered { records: 5, .. }
    ));
    let sent = transport.sent();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0].data, sent[1].data);
    assert_eq!(store.stats().unwrap().claimed, 0);
}

#[tokio::test]
async fn dead_letters_can_be_requeued() {
    fn next_week() -> i64 {
        unix_now() + 7 * 24 * 3600
    }

    let store = Arc::new(SqliteBatchStore::new_in_memory().unwrap());
    let input = advertisements(1, 4);
    CaptureService::new(
        &capture_config(0),
        Arc::clone(&store),
        JsonLinesSource::new(input.as_bytes()),
    )
    .with_clock(counting_clock)
    .run(std::future::pending())
    .await;

    let failing = MockTransport::with_script([MockOutcome::Fail("403 forbidden".into())]);
    let mut publisher =
        BatchPublisher::new(settings(3), Arc::clone(&store), failing).with_clock(next_week);
    assert!(matches!(
        publisher.tick().await.unwrap(),
        TickOutcome::DeadLettered { records: 3, .. }
    ));
    assert_eq!(store.stats().unwrap().dead_letters, 3);

    assert_eq!(store.requeue_dead_letters().unwrap(), 3);
    let stats = store.stats().unwrap();
    assert_eq!(stats.dead_letters, 0);
    assert_eq!(stats.unassigned, 4);

    let mut publisher = BatchPublisher::new(settings(3), Arc::clone(&store), MockTransport::new());
    assert!(matches!(
        publisher.tick().await.unwrap(),
        TickOutcome::Delivered { records: 3, .. }
    ));
}

#[tokio::test]
async fn replayed_frames_are_stored_once() {
    let store = Arc::new(SqliteBatchStore::new_in_memory().unwrap());

    fn fixed_clock() -> i64 {
        1_700_000_000
    }

    // same tag, same second, same radio: one row
    let input = advertisements(1, 3);
    CaptureService::new(
        &capture_config(0),
        Arc::clone(&store),
        JsonLinesSource::new(input.as_bytes()),
    )
    .with_clock(fixed_clock)
    .run(std::future::pending())
    .await;
    assert_eq!(store.stats().unwrap().unassigned, 1);

    // a second radio hearing the same frame keeps its own row
    CaptureService::new(
        &capture_config(1),
        Arc::clone(&store),
        JsonLinesSource::new(input.as_bytes()),
    )
    .with_clock(fixed_clock)
    .run(std::future::pending())
    .await;
    assert_eq!(store.stats().unwrap().unassigned, 2);
}
