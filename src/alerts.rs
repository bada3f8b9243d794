use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, info, instrument, warn};

use crate::monitors::resources::{AlertPhase, AlertState};
use crate::notifier::{Notifier, NotifierError};
use crate::storage::{MetricStore, StorageError, StorageResult, WindowMetric, WindowedAverage};
use crate::util::bounded;
use crate::{HealthSnapshot, ResourceKind, TopProcess};

/// How the value in an alert was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EvaluationMode {
    Instantaneous,
    Windowed { window_minutes: u32, samples: u64 },
}

/// Resource-specific details attached to an alert
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "resource", rename_all = "lowercase")]
pub enum AlertContext {
    Cpu {
        core_count: usize,
        top_processes: Vec<TopProcess>,
    },
    Memory {
        total_gb: u64,
        used_gb: u64,
        free_gb: u64,
        top_processes: Vec<TopProcess>,
    },
    Disk {
        total_gb: u64,
        used_gb: u64,
        free_gb: u64,
        mount_point: String,
    },
}

impl AlertContext {
    pub fn from_snapshot(kind: ResourceKind, snapshot: &HealthSnapshot) -> Self {
        match kind {
            ResourceKind::Cpu => AlertContext::Cpu {
                core_count: snapshot.cpu.core_count,
                top_processes: snapshot.cpu.top_processes.clone(),
            },
            ResourceKind::Memory => AlertContext::Memory {
                total_gb: snapshot.memory.total_gb,
                used_gb: snapshot.memory.used_gb,
                free_gb: snapshot.memory.free_gb,
                top_processes: snapshot.memory.top_processes.clone(),
            },
            ResourceKind::Disk => AlertContext::Disk {
                total_gb: snapshot.disk.total_gb,
                used_gb: snapshot.disk.used_gb,
                free_gb: snapshot.disk.free_gb,
                mount_point: snapshot.disk.mount_point.clone(),
            },
        }
    }

    fn empty(kind: ResourceKind) -> Self {
        match kind {
            ResourceKind::Cpu => AlertContext::Cpu {
                core_count: 0,
                top_processes: Vec::new(),
            },
            ResourceKind::Memory => AlertContext::Memory {
                total_gb: 0,
                used_gb: 0,
                free_gb: 0,
                top_processes: Vec::new(),
            },
            ResourceKind::Disk => AlertContext::Disk {
                total_gb: 0,
                used_gb: 0,
                free_gb: 0,
                mount_point: "/".to_string(),
            },
        }
    }
}

/// Everything a transport needs to render one alert
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertPayload {
    pub kind: ResourceKind,
    pub current_value: f64,
    pub threshold: f64,
    pub timestamp: DateTime<Utc>,
    pub mode: EvaluationMode,
    pub context: AlertContext,
}

/// Result of evaluating one resource kind on one tick
#[derive(Debug, Clone, PartialEq)]
pub enum Evaluation {
    Dispatched { value: f64 },
    BelowThreshold { value: f64 },
    CoolingDown { remaining: Duration },
    /// Too few samples in the window to trust the average
    InsufficientEvidence { samples: u64 },
    /// Neither a stored average nor a snapshot was available
    NoReading,
    DispatchFailed(NotifierError),
}

impl Evaluation {
    pub fn dispatched(&self) -> bool {
        matches!(self, Evaluation::Dispatched { .. })
    }
}

/// Read access to windowed averages of stored history
#[async_trait]
pub trait AverageSource: Send + Sync {
    async fn windowed_average(
        &self,
        metric: WindowMetric,
        window_minutes: u32,
        now: DateTime<Utc>,
    ) -> StorageResult<WindowedAverage>;
}

#[async_trait]
impl AverageSource for MetricStore {
    async fn windowed_average(
        &self,
        metric: WindowMetric,
        window_minutes: u32,
        now: DateTime<Utc>,
    ) -> StorageResult<WindowedAverage> {
        MetricStore::windowed_average(self, metric, window_minutes, now).await
    }
}

#[derive(Debug, Clone, Copy)]
pub struct WindowSettings {
    pub minutes: u32,
    pub min_samples: u64,
}

impl Default for WindowSettings {
    fn default() -> Self {
        Self {
            minutes: 5,
            min_samples: 3,
        }
    }
}

/// Threshold checks with per-kind cooldown, for one alert path
pub struct AlertEvaluator {
    thresholds: BTreeMap<ResourceKind, f64>,
    cooldown: Duration,
    call_timeout: Duration,
    notifier: Arc<dyn Notifier>,
    states: BTreeMap<ResourceKind, AlertState>,
}

impl AlertEvaluator {
    pub fn new(
        thresholds: BTreeMap<ResourceKind, f64>,
        cooldown: Duration,
        notifier: Arc<dyn Notifier>,
        call_timeout: Duration,
    ) -> Self {
        Self {
            thresholds,
            cooldown,
            call_timeout,
            notifier,
            states: BTreeMap::new(),
        }
    }

    pub fn state(&self, kind: ResourceKind) -> AlertState {
        self.states.get(&kind).copied().unwrap_or_default()
    }

    pub fn states(&self) -> BTreeMap<ResourceKind, AlertState> {
        ResourceKind::ALL
            .into_iter()
            .map(|kind| (kind, self.state(kind)))
            .collect()
    }

    /// Compare the snapshot's values for `kinds` with their thresholds.
    /// Kinds without a threshold are skipped.
    #[instrument(skip(self, snapshot), fields(timestamp = %snapshot.timestamp))]
    pub async fn evaluate_instant(
        &mut self,
        snapshot: &HealthSnapshot,
        kinds: &[ResourceKind],
        now: DateTime<Utc>,
    ) -> Vec<(ResourceKind, Evaluation)> {
        let mut results = Vec::new();

        for &kind in kinds {
            let Some(threshold) = self.thresholds.get(&kind).copied() else {
                continue;
            };

            let evaluation = match self.cooling_down(kind, now) {
                Some(cooling) => cooling,
                None => {
                    let value = f64::from(snapshot.usage(kind));
                    let context = AlertContext::from_snapshot(kind, snapshot);
                    self.decide(kind, value, threshold, EvaluationMode::Instantaneous, context, now)
                        .await
                }
            };

            results.push((kind, evaluation));
        }

        results
    }

    /// Evaluate every kind through windowed averages. CPU and memory use the
    /// source when it answers; disk, a failing source, or no source at all
    /// fall back to the snapshot for this tick.
    #[instrument(skip_all)]
    pub async fn evaluate_windowed(
        &mut self,
        snapshot: Option<&HealthSnapshot>,
        source: Option<&dyn AverageSource>,
        window: WindowSettings,
        now: DateTime<Utc>,
    ) -> Vec<(ResourceKind, Evaluation)> {
        let mut results = Vec::new();

        for kind in ResourceKind::ALL {
            let Some(threshold) = self.thresholds.get(&kind).copied() else {
                continue;
            };

            if let Some(cooling) = self.cooling_down(kind, now) {
                results.push((kind, cooling));
                continue;
            }

            let metric = match kind {
                ResourceKind::Cpu => Some(WindowMetric::Cpu),
                ResourceKind::Memory => Some(WindowMetric::Memory),
                ResourceKind::Disk => None,
            };

            let averaged = match (metric, source) {
                (Some(metric), Some(source)) => {
                    Some(self.query_average(source, metric, window.minutes, now).await)
                }
                _ => None,
            };

            let (value, mode) = match averaged {
                Some(Ok(avg)) if avg.sample_count < window.min_samples || avg.average.is_none() => {
                    debug!(
                        "{kind}: {} samples in the last {} minutes, skipping",
                        avg.sample_count, window.minutes
                    );
                    results.push((
                        kind,
                        Evaluation::InsufficientEvidence {
                            samples: avg.sample_count,
                        },
                    ));
                    continue;
                }
                Some(Ok(avg)) => (
                    avg.average.unwrap_or_default(),
                    EvaluationMode::Windowed {
                        window_minutes: window.minutes,
                        samples: avg.sample_count,
                    },
                ),
                fallback => {
                    if let Some(Err(e)) = fallback {
                        warn!("{kind}: windowed average unavailable, using current value: {e}");
                    }
                    let Some(snapshot) = snapshot else {
                        results.push((kind, Evaluation::NoReading));
                        continue;
                    };
                    (
                        f64::from(snapshot.usage(kind)),
                        EvaluationMode::Instantaneous,
                    )
                }
            };

            let context = snapshot
                .map(|s| AlertContext::from_snapshot(kind, s))
                .unwrap_or_else(|| AlertContext::empty(kind));

            let evaluation = self
                .decide(kind, value, threshold, mode, context, now)
                .await;
            results.push((kind, evaluation));
        }

        results
    }

    fn cooling_down(&self, kind: ResourceKind, now: DateTime<Utc>) -> Option<Evaluation> {
        match self.state(kind).phase(now, self.cooldown) {
            AlertPhase::Idle => None,
            AlertPhase::Cooldown { remaining } => {
                debug!("{kind}: cooling down for another {remaining:?}");
                Some(Evaluation::CoolingDown { remaining })
            }
        }
    }

    async fn query_average(
        &self,
        source: &dyn AverageSource,
        metric: WindowMetric,
        minutes: u32,
        now: DateTime<Utc>,
    ) -> StorageResult<WindowedAverage> {
        bounded(
            self.call_timeout,
            source.windowed_average(metric, minutes, now),
        )
        .await
        .unwrap_or(Err(StorageError::Timeout("windowed average")))
    }

    async fn decide(
        &mut self,
        kind: ResourceKind,
        value: f64,
        threshold: f64,
        mode: EvaluationMode,
        context: AlertContext,
        now: DateTime<Utc>,
    ) -> Evaluation {
        if value <= threshold {
            return Evaluation::BelowThreshold { value };
        }

        let payload = AlertPayload {
            kind,
            current_value: value,
            threshold,
            timestamp: now,
            mode,
            context,
        };

        let outcome = bounded(self.call_timeout, self.notifier.send(&payload))
            .await
            .unwrap_or(Err(NotifierError::Timeout));

        match outcome {
            Ok(()) => {
                self.states.entry(kind).or_default().record_dispatch(now);
                info!(
                    "{kind} alert sent via {} ({value:.1}% > {threshold}%)",
                    self.notifier.name()
                );
                Evaluation::Dispatched { value }
            }
            Err(e) => {
                error!("{kind} alert via {} failed: {e}", self.notifier.name());
                Evaluation::DispatchFailed(e)
            }
        }
    }
}

pub fn describe_mode(mode: &EvaluationMode) -> String {
    match mode {
        EvaluationMode::Instantaneous => "current reading".to_string(),
        EvaluationMode::Windowed {
            window_minutes,
            samples,
        } => format!("{window_minutes}-minute average of {samples} samples"),
    }
}

/// Backslash-escape the characters legacy Telegram Markdown treats as markup
fn escape_markdown(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '_' | '*' | '`' | '[') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Plain-text alert (Telegram-flavoured Markdown)
pub fn format_alert_message(payload: &AlertPayload, host: &str) -> String {
    let heading = match payload.kind {
        ResourceKind::Cpu => "🚨 *High CPU Usage*",
        ResourceKind::Memory => "🚨 *High Memory Usage*",
        ResourceKind::Disk => "🚨 *High Disk Usage*",
    };

    let mut lines = vec![
        format!("{heading} on `{host}`"),
        String::new(),
        format!(
            "Current: *{:.1}%* (threshold {}%)",
            payload.current_value, payload.threshold
        ),
        format!("Measured: {}", escape_markdown(&describe_mode(&payload.mode))),
    ];

    let processes = match &payload.context {
        AlertContext::Cpu {
            core_count,
            top_processes,
        } => {
            lines.push(format!("Cores: {core_count}"));
            top_processes.as_slice()
        }
        AlertContext::Memory {
            total_gb,
            used_gb,
            free_gb,
            top_processes,
        } => {
            lines.push(format!(
                "Memory: {used_gb} GB used of {total_gb} GB ({free_gb} GB free)"
            ));
            top_processes.as_slice()
        }
        AlertContext::Disk {
            total_gb,
            used_gb,
            free_gb,
            mount_point,
        } => {
            lines.push(format!(
                "Filesystem `{mount_point}`: {used_gb} GB used of {total_gb} GB ({free_gb} GB free)"
            ));
            &[]
        }
    };

    if !processes.is_empty() {
        lines.push(String::new());
        lines.push("Top processes:".to_string());
        for (i, p) in processes.iter().enumerate() {
            lines.push(format!(
                "{}. `{}` (pid {}, user {}): {:.1}% CPU, {:.1}% MEM",
                i + 1,
                p.name,
                p.pid,
                escape_markdown(&p.user),
                p.cpu_percent,
                p.mem_percent
            ));
        }
    }

    lines.push(String::new());
    lines.push(format!(
        "Time: {}",
        payload.timestamp.format("%Y-%m-%d %H:%M:%S UTC")
    ));

    lines.join("\n")
}
