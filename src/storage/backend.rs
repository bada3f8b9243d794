//! Storage backend trait definition
//!
//! Every backend stores [`MetricRecord`]s in insertion order and answers
//! the handful of range queries the alerting and rollup layers need.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::error::StorageResult;
use super::schema::{MetricRecord, NewMetricRecord};

/// Metrics that can be averaged over a window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WindowMetric {
    Cpu,
    Memory,
}

impl WindowMetric {
    pub fn column(&self) -> &'static str {
        match self {
            WindowMetric::Cpu => "cpu_usage",
            WindowMetric::Memory => "memory_usage",
        }
    }

    pub fn value_of(&self, record: &MetricRecord) -> f64 {
        match self {
            WindowMetric::Cpu => record.cpu_usage,
            WindowMetric::Memory => record.memory_usage,
        }
    }
}

/// Mean over a window together with the evidence behind it
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct WindowedAverage {
    /// `None` when the window holds no samples
    pub average: Option<f64>,
    pub sample_count: u64,
}

impl WindowedAverage {
    pub fn from_values(values: impl IntoIterator<Item = f64>) -> Self {
        let (sum, count) = values
            .into_iter()
            .fold((0.0, 0u64), |(sum, count), v| (sum + v, count + 1));

        Self {
            average: (count > 0).then(|| sum / count as f64),
            sample_count: count,
        }
    }
}

/// Trait for persistent storage backends
///
/// Implementations must be `Send + Sync`; the storage actor holds one
/// behind an `Arc` and is the only writer.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Append one record and return its id.
    ///
    /// A timestamp older than the newest stored one is clamped forward so
    /// timestamps never decrease in insertion order.
    async fn insert(&self, record: NewMetricRecord) -> StorageResult<i64>;

    /// Average of `metric` over records with `timestamp >= since`
    async fn windowed_average(
        &self,
        metric: WindowMetric,
        since: DateTime<Utc>,
    ) -> StorageResult<WindowedAverage>;

    /// Records with `timestamp >= since`, oldest first
    async fn records_since(&self, since: DateTime<Utc>) -> StorageResult<Vec<MetricRecord>>;

    /// The `limit` newest records, oldest first
    async fn latest(&self, limit: usize) -> StorageResult<Vec<MetricRecord>>;

    /// Delete records strictly older than `cutoff`, returning how many went
    async fn purge_before(&self, cutoff: DateTime<Utc>) -> StorageResult<usize>;

    /// Human-readable summary (e.g. "SQLite: 1200 rows, ...")
    async fn get_stats(&self) -> StorageResult<String>;

    /// Release resources
    async fn close(&self) -> StorageResult<()>;
}
