//! Degraded operation: stalled accessors, missing history, broken transports

use std::sync::Arc;

use assert_matches::assert_matches;
use async_trait::async_trait;
use chrono::Utc;
use health_monitor::ResourceKind;
use health_monitor::alerts::{AlertPayload, Evaluation, EvaluationMode};
use health_monitor::config::{Config, StorageConfig};
use health_monitor::monitors::{AccessorError, ProcessAccessor, ProcessInfo};
use health_monitor::notifier::{Notifier, NotifierError};
use health_monitor::pipeline::Pipeline;

use crate::helpers::{
    CapturingNotifier, FixedProcesses, ReplayMetrics, StalledMetrics, reading, wait_until,
};

fn config() -> Config {
    let mut config = Config::default();
    config.call_timeout_secs = 1;
    config.sampling.interval_secs = 3600;
    config.storage = StorageConfig::None;
    config
}

struct BrokenProcesses;

#[async_trait]
impl ProcessAccessor for BrokenProcesses {
    async fn list_processes(&self) -> Result<Vec<ProcessInfo>, AccessorError> {
        Err(AccessorError::Unavailable("permission denied".to_string()))
    }
}

struct RejectingNotifier;

#[async_trait]
impl Notifier for RejectingNotifier {
    fn name(&self) -> &'static str {
        "rejecting"
    }

    async fn send(&self, _payload: &AlertPayload) -> Result<(), NotifierError> {
        Err(NotifierError::Status {
            code: 429,
            body: "rate limited".to_string(),
        })
    }
}

#[tokio::test]
async fn test_stalled_accessor_skips_tick() {
    let pipeline = Pipeline::start(
        &config(),
        Arc::new(StalledMetrics),
        Arc::new(FixedProcesses(vec![])),
        None,
        None,
    );

    let result = pipeline.sampler().sample_now().await;
    assert!(result.is_err());
    assert!(pipeline.queries().latest_snapshot().is_none());

    pipeline.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_process_listing_failure_keeps_sample() {
    let pipeline = Pipeline::start(
        &config(),
        Arc::new(ReplayMetrics::new(vec![Ok(reading(97.0, 90, 10))])),
        Arc::new(BrokenProcesses),
        None,
        None,
    );

    let queries = pipeline.queries();
    assert!(wait_until(|| queries.latest_snapshot().is_some()).await);

    let snapshot = queries.latest_snapshot().unwrap();
    assert_eq!(snapshot.cpu.usage_percent, 97);
    assert!(snapshot.cpu.top_processes.is_empty());
    assert!(snapshot.memory.top_processes.is_empty());

    pipeline.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_scheduled_path_without_history_uses_snapshot() {
    let notifier = Arc::new(CapturingNotifier::default());
    let pipeline = Pipeline::start(
        &config(),
        Arc::new(ReplayMetrics::new(vec![Ok(reading(20.0, 92, 10))])),
        Arc::new(FixedProcesses(vec![])),
        None,
        Some(notifier.clone() as Arc<dyn Notifier>),
    );

    let queries = pipeline.queries();
    assert!(wait_until(|| queries.latest_snapshot().is_some()).await);

    let results = pipeline
        .scheduled_alerts()
        .unwrap()
        .check_now(Utc::now())
        .await
        .unwrap();
    assert_matches!(results[1], (ResourceKind::Memory, Evaluation::Dispatched { .. }));

    let sent = notifier.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].mode, EvaluationMode::Instantaneous);

    pipeline.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_rejected_dispatch_does_not_start_cooldown() {
    let pipeline = Pipeline::start(
        &config(),
        Arc::new(ReplayMetrics::new(vec![Ok(reading(95.0, 20, 10))])),
        Arc::new(FixedProcesses(vec![])),
        None,
        Some(Arc::new(RejectingNotifier)),
    );

    let queries = pipeline.queries();
    assert!(wait_until(|| queries.latest_snapshot().is_some()).await);

    let scheduled = pipeline.scheduled_alerts().unwrap();
    for _ in 0..2 {
        let results = scheduled.check_now(Utc::now()).await.unwrap();
        assert_matches!(
            &results[0],
            (ResourceKind::Cpu, Evaluation::DispatchFailed(NotifierError::Status { code: 429, .. }))
        );
    }

    let states = scheduled.states().await.unwrap();
    assert_eq!(states[&ResourceKind::Cpu].last_sent_at, None);

    pipeline.shutdown().await.unwrap();
}
