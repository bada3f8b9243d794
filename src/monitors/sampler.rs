//! Snapshot production and rising-edge detection

use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, instrument, warn};

use super::accessor::{
    AccessorError, FilesystemReading, MetricsAccessor, ProcessAccessor, ProcessInfo, SystemReading,
};
use crate::util::{bounded, round_gb, rounded_percent};
use crate::{CpuHealth, DiskHealth, HealthSnapshot, MemoryHealth, ResourceKind, TopProcess};

#[derive(Debug, Clone)]
pub struct SamplerSettings {
    /// Maximum processes attached to a resource
    pub top_processes: usize,
    /// Processes are only enumerated when usage is strictly above this
    pub inspect_floor: u32,
    pub call_timeout: Duration,
}

impl Default for SamplerSettings {
    fn default() -> Self {
        Self {
            top_processes: 3,
            inspect_floor: 50,
            call_timeout: Duration::from_secs(10),
        }
    }
}

/// Kinds whose usage rose strictly between two consecutive snapshots
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RisingEdges {
    pub cpu: bool,
    pub memory: bool,
    pub disk: bool,
}

impl RisingEdges {
    /// Compare `current` with the previous snapshot. The first snapshot
    /// (no previous) never rises.
    pub fn between(previous: Option<&HealthSnapshot>, current: &HealthSnapshot) -> Self {
        let Some(previous) = previous else {
            return Self::default();
        };

        Self {
            cpu: current.cpu.usage_percent > previous.cpu.usage_percent,
            memory: current.memory.usage_percent > previous.memory.usage_percent,
            disk: current.disk.usage_percent > previous.disk.usage_percent,
        }
    }

    pub fn escalate(&self) -> bool {
        self.cpu || self.memory || self.disk
    }

    pub fn rose(&self, kind: ResourceKind) -> bool {
        match kind {
            ResourceKind::Cpu => self.cpu,
            ResourceKind::Memory => self.memory,
            ResourceKind::Disk => self.disk,
        }
    }

    pub fn kinds(&self) -> Vec<ResourceKind> {
        ResourceKind::ALL
            .into_iter()
            .filter(|kind| self.rose(*kind))
            .collect()
    }
}

/// Builds snapshots from the accessors and remembers the previous one
pub struct Sampler {
    metrics: Arc<dyn MetricsAccessor>,
    processes: Arc<dyn ProcessAccessor>,
    settings: SamplerSettings,
    previous: Option<HealthSnapshot>,
}

impl Sampler {
    pub fn new(
        metrics: Arc<dyn MetricsAccessor>,
        processes: Arc<dyn ProcessAccessor>,
        settings: SamplerSettings,
    ) -> Self {
        Self {
            metrics,
            processes,
            settings,
            previous: None,
        }
    }

    pub fn previous(&self) -> Option<&HealthSnapshot> {
        self.previous.as_ref()
    }

    /// Take one snapshot. Fails only if the metrics accessor fails; a failing
    /// process accessor leaves the process lists empty.
    #[instrument(skip(self))]
    pub async fn sample(&self) -> Result<HealthSnapshot, AccessorError> {
        let reading = bounded(self.settings.call_timeout, self.metrics.read())
            .await
            .ok_or(AccessorError::Timeout)??;

        let mut snapshot = snapshot_from_reading(&reading);

        let floor = self.settings.inspect_floor;
        let inspect_cpu = snapshot.cpu.usage_percent > floor;
        let inspect_memory = snapshot.memory.usage_percent > floor;

        if self.settings.top_processes > 0 && (inspect_cpu || inspect_memory) {
            match bounded(self.settings.call_timeout, self.processes.list_processes()).await {
                Some(Ok(processes)) => {
                    let top_n = self.settings.top_processes;
                    if inspect_cpu {
                        snapshot.cpu.top_processes =
                            top_by(&processes, top_n, |a, b| b.cpu.total_cmp(&a.cpu));
                    }
                    if inspect_memory {
                        snapshot.memory.top_processes =
                            top_by(&processes, top_n, |a, b| b.mem.total_cmp(&a.mem));
                    }
                }
                Some(Err(e)) => warn!("process listing failed, continuing without it: {e}"),
                None => warn!("process listing timed out, continuing without it"),
            }
        }

        Ok(snapshot)
    }

    /// Make `current` the new baseline and report what rose relative to the old one
    pub fn tick(&mut self, current: HealthSnapshot) -> RisingEdges {
        let edges = RisingEdges::between(self.previous.as_ref(), &current);
        self.previous = Some(current);
        edges
    }

    /// Sample and advance. A failed sample leaves the baseline untouched.
    pub async fn next(&mut self) -> Result<(HealthSnapshot, RisingEdges), AccessorError> {
        let snapshot = self.sample().await?;
        let edges = self.tick(snapshot.clone());
        debug!(
            "cpu {}% memory {}% disk {}% (escalate: {})",
            snapshot.cpu.usage_percent,
            snapshot.memory.usage_percent,
            snapshot.disk.usage_percent,
            edges.escalate()
        );
        Ok((snapshot, edges))
    }
}

fn top_by<F>(processes: &[ProcessInfo], n: usize, order: F) -> Vec<TopProcess>
where
    F: Fn(&ProcessInfo, &ProcessInfo) -> Ordering,
{
    let mut sorted: Vec<&ProcessInfo> = processes.iter().collect();
    sorted.sort_by(|a, b| order(a, b));
    sorted
        .into_iter()
        .take(n)
        .map(|p| TopProcess {
            pid: p.pid,
            name: p.name.clone(),
            user: p.user.clone(),
            cpu_percent: p.cpu,
            mem_percent: p.mem,
        })
        .collect()
}

/// The filesystem mounted at `/`, or the first one reported
fn primary_filesystem(filesystems: &[FilesystemReading]) -> Option<&FilesystemReading> {
    filesystems
        .iter()
        .find(|fs| fs.mount == "/")
        .or_else(|| filesystems.first())
}

pub fn snapshot_from_reading(reading: &SystemReading) -> HealthSnapshot {
    let total = reading.memory_total;
    // "active" memory excludes reclaimable cache and buffers
    let active = reading
        .memory_available
        .map(|available| total.saturating_sub(available))
        .unwrap_or(reading.memory_used)
        .min(total);

    let disk = match primary_filesystem(&reading.filesystems) {
        Some(fs) => DiskHealth {
            usage_percent: rounded_percent(fs.used, fs.total),
            total_gb: round_gb(fs.total),
            used_gb: round_gb(fs.used),
            free_gb: round_gb(fs.total.saturating_sub(fs.used)),
            mount_point: fs.mount.clone(),
        },
        None => DiskHealth {
            mount_point: "/".to_string(),
            ..Default::default()
        },
    };

    HealthSnapshot {
        timestamp: Utc::now(),
        cpu: CpuHealth {
            usage_percent: reading.cpu_load.clamp(0.0, 100.0).round() as u32,
            core_count: reading.core_count,
            top_processes: Vec::new(),
        },
        memory: MemoryHealth {
            usage_percent: rounded_percent(active, total),
            total_gb: round_gb(total),
            used_gb: round_gb(active),
            free_gb: round_gb(total - active),
            top_processes: Vec::new(),
        },
        disk,
    }
}
