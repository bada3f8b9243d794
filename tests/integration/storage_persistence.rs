//! Integration tests for SQLite persistence
//!
//! These tests verify that:
//! - Snapshots published to the storage actor land in the database
//! - Records survive closing and reopening the file
//! - Rollups and purges behave the same through the actor and the store

use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use health_monitor::actors::{SnapshotEvent, StorageHandle, StorageSettings};
use health_monitor::monitors::RisingEdges;
use health_monitor::storage::sqlite::SqliteBackend;
use health_monitor::storage::{Granularity, MetricStore, WindowMetric};
use pretty_assertions::assert_eq;
use tempfile::tempdir;
use tokio::sync::broadcast;

use crate::helpers::snapshot_at;

fn event(snapshot: health_monitor::HealthSnapshot) -> SnapshotEvent {
    SnapshotEvent {
        snapshot,
        edges: RisingEdges::default(),
    }
}

#[tokio::test]
async fn test_full_persistence_pipeline() {
    let temp_dir = tempdir().unwrap();
    let db_path = temp_dir.path().join("nested").join("metrics.db");

    let backend = SqliteBackend::new(&db_path).await.unwrap();
    let (event_tx, _) = broadcast::channel(64);
    let handle = StorageHandle::spawn(
        MetricStore::new(Arc::new(backend)),
        event_tx.subscribe(),
        StorageSettings {
            persist_interval: Duration::from_secs(60),
            retention_days: Some(30),
            ..Default::default()
        },
    );

    let base = Utc::now() - ChronoDuration::minutes(10);
    // one sample every 30 s; the 60 s cadence keeps every other one
    for i in 0..6 {
        event_tx
            .send(event(snapshot_at(
                base + ChronoDuration::seconds(i * 30),
                40 + i as u32,
                50,
                60,
            )))
            .unwrap();
    }

    let mut stats = handle.stats().await.unwrap();
    for _ in 0..100 {
        if stats.appended + stats.skipped == 6 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
        stats = handle.stats().await.unwrap();
    }
    assert_eq!(stats.appended, 3);
    assert_eq!(stats.skipped, 3);
    assert!(stats.backend.unwrap().starts_with("SQLite: 3 rows"));

    handle.shutdown().await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    // reopen the file with a fresh backend
    let store = MetricStore::new(Arc::new(SqliteBackend::new(&db_path).await.unwrap()));
    let records = store.latest(10).await.unwrap();
    let cpu: Vec<f64> = records.iter().map(|r| r.cpu_usage).collect();
    assert_eq!(cpu, vec![40.0, 42.0, 44.0]);
    assert!(records.windows(2).all(|w| w[0].id < w[1].id));

    let avg = store
        .windowed_average(WindowMetric::Cpu, 15, Utc::now())
        .await
        .unwrap();
    assert_eq!(avg.sample_count, 3);
    assert_eq!(avg.average, Some(42.0));

    store.close().await.unwrap();
}

#[tokio::test]
async fn test_hourly_rollup_over_sqlite() {
    let temp_dir = tempdir().unwrap();
    let store = MetricStore::new(Arc::new(
        SqliteBackend::new(temp_dir.path().join("rollup.db"))
            .await
            .unwrap(),
    ));

    let now = Utc.with_ymd_and_hms(2025, 3, 10, 14, 50, 0).unwrap();
    for (minute, cpu) in [(5, 20), (20, 40), (45, 90)] {
        let timestamp = Utc.with_ymd_and_hms(2025, 3, 10, 13, minute, 0).unwrap();
        store
            .append(&snapshot_at(timestamp, cpu, 30, 10))
            .await
            .unwrap();
    }
    store
        .append(&snapshot_at(now, 10, 30, 10))
        .await
        .unwrap();

    let buckets = store.rollup(Granularity::Hourly, now).await.unwrap();
    assert_eq!(buckets.len(), 2);
    assert_eq!(buckets[0].time_period, "2025-03-10 13:00:00");
    assert_eq!(buckets[0].avg_cpu, 50.0);
    assert_eq!(buckets[0].max_cpu, 90.0);
    assert_eq!(buckets[0].min_cpu, 20.0);
    assert_eq!(buckets[1].time_period, "2025-03-10 14:00:00");

    store.close().await.unwrap();
}

#[tokio::test]
async fn test_purge_keeps_boundary_records() {
    let temp_dir = tempdir().unwrap();
    let store = MetricStore::new(Arc::new(
        SqliteBackend::new(temp_dir.path().join("purge.db"))
            .await
            .unwrap(),
    ));

    let now = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
    let boundary = now - ChronoDuration::days(7);
    for timestamp in [
        boundary - ChronoDuration::days(2),
        boundary - ChronoDuration::seconds(1),
        boundary,
        now,
    ] {
        store
            .append(&snapshot_at(timestamp, 10, 10, 10))
            .await
            .unwrap();
    }

    assert_eq!(store.purge(7, now).await.unwrap(), 2);
    assert_eq!(store.purge(7, now).await.unwrap(), 0);

    let remaining = store.latest(10).await.unwrap();
    assert_eq!(remaining.len(), 2);
    assert_eq!(remaining[0].timestamp, boundary);

    store.close().await.unwrap();
}
