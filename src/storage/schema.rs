//! Persisted record layout
//!
//! One row per accepted sample. Usage figures are stored as plain columns
//! so windowed averages and rollups are simple aggregate queries; only the
//! single highest-CPU process of the sample is kept alongside them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::HealthSnapshot;

/// A stored sample
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRecord {
    /// Monotonic row id assigned by the backend
    pub id: i64,

    /// When the sample was taken (always UTC)
    pub timestamp: DateTime<Utc>,

    pub cpu_usage: f64,
    pub memory_usage: f64,
    pub disk_usage: f64,

    pub top_process: Option<TopProcessRecord>,
}

/// The busiest process at sample time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopProcessRecord {
    pub name: String,
    pub cpu: f64,
    pub user: String,
    pub pid: u32,
}

/// A sample that has not been assigned an id yet
#[derive(Debug, Clone, PartialEq)]
pub struct NewMetricRecord {
    pub timestamp: DateTime<Utc>,
    pub cpu_usage: f64,
    pub memory_usage: f64,
    pub disk_usage: f64,
    pub top_process: Option<TopProcessRecord>,
}

impl NewMetricRecord {
    /// Extract the persisted columns from a snapshot
    pub fn from_snapshot(snapshot: &HealthSnapshot) -> Self {
        let top_process = snapshot
            .cpu
            .top_processes
            .iter()
            .max_by(|a, b| a.cpu_percent.total_cmp(&b.cpu_percent))
            .map(|p| TopProcessRecord {
                name: p.name.clone(),
                cpu: f64::from(p.cpu_percent),
                user: p.user.clone(),
                pid: p.pid,
            });

        Self {
            timestamp: snapshot.timestamp,
            cpu_usage: f64::from(snapshot.cpu.usage_percent),
            memory_usage: f64::from(snapshot.memory.usage_percent),
            disk_usage: f64::from(snapshot.disk.usage_percent),
            top_process,
        }
    }

    /// Attach an id, clamping the timestamp so it never precedes `floor`
    pub fn into_record(self, id: i64, floor: Option<DateTime<Utc>>) -> MetricRecord {
        let timestamp = match floor {
            Some(floor) if floor > self.timestamp => floor,
            _ => self.timestamp,
        };

        MetricRecord {
            id,
            timestamp,
            cpu_usage: self.cpu_usage,
            memory_usage: self.memory_usage,
            disk_usage: self.disk_usage,
            top_process: self.top_process,
        }
    }
}
