//! In-memory storage backend (no persistence)
//!
//! Keeps records in a bounded ring buffer. Useful for tests and for hosts
//! where history across restarts is not needed.
//!
//! ## Limitations
//!
//! - **No persistence**: All data lost on restart
//! - **Limited capacity**: oldest records are evicted past the bound

use std::collections::VecDeque;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::debug;

use super::backend::{StorageBackend, WindowMetric, WindowedAverage};
use super::error::StorageResult;
use super::schema::{MetricRecord, NewMetricRecord};

/// Default number of records kept in memory
pub const DEFAULT_CAPACITY: usize = 50_000;

struct Inner {
    records: VecDeque<MetricRecord>,
    next_id: i64,
}

/// In-memory storage backend
pub struct MemoryBackend {
    inner: RwLock<Inner>,
    capacity: usize,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: RwLock::new(Inner {
                records: VecDeque::new(),
                next_id: 1,
            }),
            capacity: capacity.max(1),
        }
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn insert(&self, record: NewMetricRecord) -> StorageResult<i64> {
        let mut inner = self.inner.write().await;

        let id = inner.next_id;
        inner.next_id += 1;

        let floor = inner.records.back().map(|r| r.timestamp);
        inner.records.push_back(record.into_record(id, floor));

        while inner.records.len() > self.capacity {
            inner.records.pop_front();
        }

        Ok(id)
    }

    async fn windowed_average(
        &self,
        metric: WindowMetric,
        since: DateTime<Utc>,
    ) -> StorageResult<WindowedAverage> {
        let inner = self.inner.read().await;
        Ok(WindowedAverage::from_values(
            inner
                .records
                .iter()
                .filter(|r| r.timestamp >= since)
                .map(|r| metric.value_of(r)),
        ))
    }

    async fn records_since(&self, since: DateTime<Utc>) -> StorageResult<Vec<MetricRecord>> {
        let inner = self.inner.read().await;
        Ok(inner
            .records
            .iter()
            .filter(|r| r.timestamp >= since)
            .cloned()
            .collect())
    }

    async fn latest(&self, limit: usize) -> StorageResult<Vec<MetricRecord>> {
        let inner = self.inner.read().await;
        let skip = inner.records.len().saturating_sub(limit);
        Ok(inner.records.iter().skip(skip).cloned().collect())
    }

    async fn purge_before(&self, cutoff: DateTime<Utc>) -> StorageResult<usize> {
        let mut inner = self.inner.write().await;
        let before = inner.records.len();
        inner.records.retain(|r| r.timestamp >= cutoff);
        let deleted = before - inner.records.len();
        debug!("purged {} in-memory records older than {}", deleted, cutoff);
        Ok(deleted)
    }

    async fn get_stats(&self) -> StorageResult<String> {
        let inner = self.inner.read().await;
        Ok(format!(
            "In-Memory: {} records (capacity {})",
            inner.records.len(),
            self.capacity
        ))
    }

    async fn close(&self) -> StorageResult<()> {
        debug!("closing in-memory backend (no-op)");
        Ok(())
    }
}
