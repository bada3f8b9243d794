//! Metric store: the operations the pipeline performs on top of a backend

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, instrument};

use super::backend::{StorageBackend, WindowMetric, WindowedAverage};
use super::error::StorageResult;
use super::rollup::{AggregateBucket, Granularity, rollup};
use super::schema::{MetricRecord, NewMetricRecord};
use crate::HealthSnapshot;

#[derive(Clone)]
pub struct MetricStore {
    backend: Arc<dyn StorageBackend>,
}

impl MetricStore {
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self { backend }
    }

    /// Persist one snapshot, returning the new record id
    #[instrument(skip_all, fields(timestamp = %snapshot.timestamp))]
    pub async fn append(&self, snapshot: &HealthSnapshot) -> StorageResult<i64> {
        self.backend
            .insert(NewMetricRecord::from_snapshot(snapshot))
            .await
    }

    /// Mean of `metric` over the last `window_minutes` before `now`
    pub async fn windowed_average(
        &self,
        metric: WindowMetric,
        window_minutes: u32,
        now: DateTime<Utc>,
    ) -> StorageResult<WindowedAverage> {
        let since = now - Duration::minutes(i64::from(window_minutes));
        self.backend.windowed_average(metric, since).await
    }

    #[instrument(skip(self))]
    pub async fn rollup(
        &self,
        granularity: Granularity,
        now: DateTime<Utc>,
    ) -> StorageResult<Vec<AggregateBucket>> {
        let records = self
            .backend
            .records_since(now - granularity.lookback())
            .await?;
        let buckets = rollup(&records, now, granularity);
        debug!(
            "{} records rolled up into {} buckets",
            records.len(),
            buckets.len()
        );
        Ok(buckets)
    }

    /// Delete everything older than `retention_days` before `now`
    pub async fn purge(&self, retention_days: u32, now: DateTime<Utc>) -> StorageResult<usize> {
        let cutoff = now - Duration::days(i64::from(retention_days));
        self.backend.purge_before(cutoff).await
    }

    pub async fn latest(&self, limit: usize) -> StorageResult<Vec<MetricRecord>> {
        self.backend.latest(limit).await
    }

    pub async fn stats(&self) -> StorageResult<String> {
        self.backend.get_stats().await
    }

    pub async fn close(&self) -> StorageResult<()> {
        self.backend.close().await
    }
}
