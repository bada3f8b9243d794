//! Time-bucketed aggregation over stored records
//!
//! Rollups are computed from the records themselves so every backend gets
//! identical bucket keys and statistics.

use std::collections::BTreeMap;

use chrono::{DateTime, Datelike, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::schema::MetricRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    Hourly,
    Daily,
    Weekly,
}

impl Granularity {
    /// How far back a rollup of this granularity looks
    pub fn lookback(&self) -> Duration {
        match self {
            Granularity::Hourly => Duration::hours(24),
            Granularity::Daily => Duration::days(7),
            Granularity::Weekly => Duration::days(28),
        }
    }

    /// Bucket key for a timestamp (`YYYY-MM-DD HH:00:00`, `YYYY-MM-DD` or `YYYY-Www`)
    pub fn bucket_key(&self, timestamp: &DateTime<Utc>) -> String {
        match self {
            Granularity::Hourly => timestamp.format("%Y-%m-%d %H:00:00").to_string(),
            Granularity::Daily => timestamp.format("%Y-%m-%d").to_string(),
            Granularity::Weekly => {
                let week = timestamp.iso_week();
                format!("{}-W{:02}", week.year(), week.week())
            }
        }
    }
}

/// Aggregated statistics for one time period
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateBucket {
    pub time_period: String,
    pub avg_cpu: f64,
    pub max_cpu: f64,
    pub min_cpu: f64,
    pub avg_memory: f64,
    pub max_memory: f64,
    pub min_memory: f64,
}

#[derive(Default)]
struct Accumulator {
    count: u64,
    cpu: Stats,
    memory: Stats,
}

#[derive(Clone, Copy)]
struct Stats {
    sum: f64,
    min: f64,
    max: f64,
}

impl Default for Stats {
    fn default() -> Self {
        Self {
            sum: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
        }
    }
}

impl Stats {
    fn push(&mut self, value: f64) {
        self.sum += value;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
    }
}

/// Group the records within the granularity's lookback of `now` into
/// buckets, ascending by key. Empty input yields no buckets.
pub fn rollup(
    records: &[MetricRecord],
    now: DateTime<Utc>,
    granularity: Granularity,
) -> Vec<AggregateBucket> {
    let since = now - granularity.lookback();
    let mut buckets: BTreeMap<String, Accumulator> = BTreeMap::new();

    for record in records.iter().filter(|r| r.timestamp >= since) {
        let acc = buckets
            .entry(granularity.bucket_key(&record.timestamp))
            .or_default();
        acc.count += 1;
        acc.cpu.push(record.cpu_usage);
        acc.memory.push(record.memory_usage);
    }

    buckets
        .into_iter()
        .map(|(time_period, acc)| {
            let n = acc.count as f64;
            AggregateBucket {
                time_period,
                avg_cpu: acc.cpu.sum / n,
                max_cpu: acc.cpu.max,
                min_cpu: acc.cpu.min,
                avg_memory: acc.memory.sum / n,
                max_memory: acc.memory.max,
                min_memory: acc.memory.min,
            }
        })
        .collect()
}
