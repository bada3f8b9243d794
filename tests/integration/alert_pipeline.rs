//! End-to-end tests of the running pipeline
//!
//! The sampler runs on an hour-long interval so only its first tick fires;
//! further samples are driven with `sample_now`.

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use chrono::Utc;
use health_monitor::ResourceKind;
use health_monitor::alerts::{AlertContext, Evaluation, EvaluationMode};
use health_monitor::config::{Config, StorageConfig};
use health_monitor::notifier::Notifier;
use health_monitor::pipeline::{Pipeline, open_store};
use health_monitor::storage::Granularity;
use pretty_assertions::assert_eq;

use crate::helpers::{
    CapturingNotifier, FixedProcesses, ReplayMetrics, process, wait_until,
};

fn config(cpu_threshold: f64) -> Config {
    let mut config = Config::default();
    config.sampling.interval_secs = 3600;
    config.sampling.persist_interval_secs = 0;
    config.thresholds.cpu = Some(cpu_threshold);
    config.storage = StorageConfig::Memory {
        retention_days: 7,
        cleanup_interval_hours: 24,
    };
    config
}

async fn start(
    config: &Config,
    metrics: ReplayMetrics,
    processes: FixedProcesses,
) -> (Pipeline, Arc<CapturingNotifier>) {
    let notifier = Arc::new(CapturingNotifier::default());
    let pipeline = Pipeline::start(
        config,
        Arc::new(metrics),
        Arc::new(processes),
        open_store(&config.storage).await,
        Some(notifier.clone() as Arc<dyn Notifier>),
    );

    let queries = pipeline.queries();
    assert!(wait_until(|| queries.latest_snapshot().is_some()).await);

    (pipeline, notifier)
}

async fn wait_for_records(pipeline: &Pipeline, expected: usize) {
    let storage = pipeline.storage().expect("pipeline has a store");
    for _ in 0..200 {
        if storage.latest(100).await.unwrap().len() >= expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("store never reached {expected} records");
}

#[tokio::test]
async fn test_rising_sequence_alerts_once() {
    let config = config(60.0);
    let (pipeline, notifier) = start(
        &config,
        ReplayMetrics::cpu_sequence(&[30.0, 45.0, 70.0, 70.0, 40.0]),
        FixedProcesses(vec![]),
    )
    .await;

    for _ in 0..4 {
        pipeline.sampler().sample_now().await.unwrap();
    }
    wait_for_records(&pipeline, 5).await;
    assert!(wait_until(|| !notifier.sent().is_empty()).await);

    // give the fast path a moment to process anything still queued
    tokio::time::sleep(Duration::from_millis(50)).await;

    let sent = notifier.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].kind, ResourceKind::Cpu);
    assert_eq!(sent[0].current_value, 70.0);
    assert_eq!(sent[0].mode, EvaluationMode::Instantaneous);

    let state = pipeline.fast_alerts().unwrap().states().await.unwrap();
    assert!(state[&ResourceKind::Cpu].last_sent_at.is_some());

    let buckets = pipeline
        .queries()
        .rollup(Granularity::Daily)
        .await
        .unwrap();
    assert!(!buckets.is_empty());

    pipeline.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_pegged_metric_alerts_through_scheduled_path() {
    let config = config(80.0);
    let (pipeline, notifier) = start(
        &config,
        ReplayMetrics::cpu_sequence(&[90.0, 90.0, 90.0]),
        FixedProcesses(vec![]),
    )
    .await;

    pipeline.sampler().sample_now().await.unwrap();
    pipeline.sampler().sample_now().await.unwrap();
    wait_for_records(&pipeline, 3).await;

    // a flat line never rises, so the fast path stays quiet
    assert!(notifier.sent().is_empty());

    let scheduled = pipeline.scheduled_alerts().unwrap();
    let results = scheduled.check_now(Utc::now()).await.unwrap();
    assert_matches!(
        results[0],
        (ResourceKind::Cpu, Evaluation::Dispatched { value }) if value == 90.0
    );

    let sent = notifier.sent();
    assert_eq!(sent.len(), 1);
    assert_matches!(
        sent[0].mode,
        EvaluationMode::Windowed {
            window_minutes: 5,
            samples: 3
        }
    );

    pipeline.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_scheduled_path_waits_for_evidence() {
    let config = config(80.0);
    let (pipeline, notifier) = start(
        &config,
        ReplayMetrics::cpu_sequence(&[95.0, 95.0]),
        FixedProcesses(vec![]),
    )
    .await;

    pipeline.sampler().sample_now().await.unwrap();
    wait_for_records(&pipeline, 2).await;

    let results = pipeline
        .scheduled_alerts()
        .unwrap()
        .check_now(Utc::now())
        .await
        .unwrap();
    assert_eq!(
        results[0],
        (ResourceKind::Cpu, Evaluation::InsufficientEvidence { samples: 2 })
    );
    assert!(notifier.sent().is_empty());

    pipeline.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_alert_carries_top_processes() {
    let config = config(60.0);
    let (pipeline, notifier) = start(
        &config,
        ReplayMetrics::cpu_sequence(&[10.0, 85.0]),
        FixedProcesses(vec![
            process(10, "nginx", 5.0, 1.0),
            process(20, "postgres", 60.0, 12.0),
            process(30, "cron", 0.1, 0.1),
            process(40, "java", 15.0, 30.0),
        ]),
    )
    .await;

    pipeline.sampler().sample_now().await.unwrap();
    assert!(wait_until(|| !notifier.sent().is_empty()).await);

    let sent = notifier.sent();
    let AlertContext::Cpu {
        core_count,
        top_processes,
    } = &sent[0].context
    else {
        panic!("expected a cpu context, got {:?}", sent[0].context);
    };

    assert_eq!(*core_count, 8);
    let names: Vec<&str> = top_processes.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(names, vec!["postgres", "java", "nginx"]);

    pipeline.shutdown().await.unwrap();
}
