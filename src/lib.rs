pub mod actors;
pub mod alerts;
pub mod config;
pub mod monitors;
pub mod notifier;
pub mod pipeline;
pub mod storage;
pub mod util;

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One instantaneous reading of the host, produced on every sampling tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthSnapshot {
    pub timestamp: DateTime<Utc>,
    pub cpu: CpuHealth,
    pub memory: MemoryHealth,
    pub disk: DiskHealth,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CpuHealth {
    pub usage_percent: u32,
    pub core_count: usize,
    pub top_processes: Vec<TopProcess>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryHealth {
    pub usage_percent: u32,
    pub total_gb: u64,
    pub used_gb: u64,
    pub free_gb: u64,
    pub top_processes: Vec<TopProcess>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiskHealth {
    pub usage_percent: u32,
    pub total_gb: u64,
    pub used_gb: u64,
    pub free_gb: u64,
    pub mount_point: String,
}

/// A process worth naming in an alert
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopProcess {
    pub pid: u32,
    pub name: String,
    pub user: String,
    pub cpu_percent: f32,
    pub mem_percent: f32,
}

/// Resource kinds that carry thresholds and independent alert state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Cpu,
    Memory,
    Disk,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 3] = [ResourceKind::Cpu, ResourceKind::Memory, ResourceKind::Disk];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Cpu => "cpu",
            ResourceKind::Memory => "memory",
            ResourceKind::Disk => "disk",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl HealthSnapshot {
    /// Current usage percentage for a resource kind
    pub fn usage(&self, kind: ResourceKind) -> u32 {
        match kind {
            ResourceKind::Cpu => self.cpu.usage_percent,
            ResourceKind::Memory => self.memory.usage_percent,
            ResourceKind::Disk => self.disk.usage_percent,
        }
    }
}
