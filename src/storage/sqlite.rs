//! SQLite storage backend implementation
//!
//! ## Features
//!
//! - **Embedded**: No separate database server required
//! - **WAL mode**: Reads do not block the single writer
//! - **Migrations**: Schema versioning with sqlx
//!
//! Timestamps are stored as Unix milliseconds and indexed descending, which
//! serves both the "recent window" and "newest N" queries.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Pool, Row, Sqlite};
use tracing::{debug, info, instrument};

use super::backend::{StorageBackend, WindowMetric, WindowedAverage};
use super::error::{StorageError, StorageResult};
use super::schema::{MetricRecord, NewMetricRecord, TopProcessRecord};

const SELECT_COLUMNS: &str = "id, timestamp, cpu_usage, memory_usage, disk_usage, \
     top_process_name, top_process_cpu, top_process_user, top_process_pid";

/// SQLite storage backend
pub struct SqliteBackend {
    pool: Pool<Sqlite>,
    db_path: String,
}

impl SqliteBackend {
    /// Open (or create) the database file and run migrations
    #[instrument(skip_all)]
    pub async fn new(db_path: impl AsRef<Path>) -> StorageResult<Self> {
        let db_path_str = db_path.as_ref().to_string_lossy().to_string();

        info!("initializing SQLite backend at: {}", db_path_str);

        if let Some(parent) = db_path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(&db_path_str)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::ConnectionFailed(e.to_string()))?;

        debug!("running database migrations");
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| StorageError::MigrationFailed(e.to_string()))?;

        info!("database migrations complete");

        Ok(Self {
            pool,
            db_path: db_path_str,
        })
    }

    fn timestamp_to_millis(dt: &DateTime<Utc>) -> i64 {
        dt.timestamp_millis()
    }

    fn millis_to_timestamp(millis: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(millis).unwrap_or(DateTime::UNIX_EPOCH)
    }

    fn record_from_row(row: &SqliteRow) -> MetricRecord {
        let top_process = row
            .get::<Option<String>, _>("top_process_name")
            .map(|name| TopProcessRecord {
                name,
                cpu: row
                    .get::<Option<f64>, _>("top_process_cpu")
                    .unwrap_or_default(),
                user: row
                    .get::<Option<String>, _>("top_process_user")
                    .unwrap_or_default(),
                pid: row
                    .get::<Option<i64>, _>("top_process_pid")
                    .unwrap_or_default() as u32,
            });

        MetricRecord {
            id: row.get("id"),
            timestamp: Self::millis_to_timestamp(row.get("timestamp")),
            cpu_usage: row.get("cpu_usage"),
            memory_usage: row.get("memory_usage"),
            disk_usage: row.get("disk_usage"),
            top_process,
        }
    }
}

#[async_trait]
impl StorageBackend for SqliteBackend {
    #[instrument(skip(self, record), fields(timestamp = %record.timestamp))]
    async fn insert(&self, record: NewMetricRecord) -> StorageResult<i64> {
        let timestamp = Self::timestamp_to_millis(&record.timestamp);
        let top = record.top_process.as_ref();

        let result = sqlx::query(
            r#"
            INSERT INTO metrics (
                timestamp, cpu_usage, memory_usage, disk_usage,
                top_process_name, top_process_cpu, top_process_user, top_process_pid
            )
            VALUES (
                MAX(?, COALESCE((SELECT MAX(timestamp) FROM metrics), 0)),
                ?, ?, ?, ?, ?, ?, ?
            )
            "#,
        )
        .bind(timestamp)
        .bind(record.cpu_usage)
        .bind(record.memory_usage)
        .bind(record.disk_usage)
        .bind(top.map(|p| p.name.clone()))
        .bind(top.map(|p| p.cpu))
        .bind(top.map(|p| p.user.clone()))
        .bind(top.map(|p| i64::from(p.pid)))
        .execute(&self.pool)
        .await?;

        let id = result.last_insert_rowid();
        debug!("inserted metric record {}", id);
        Ok(id)
    }

    #[instrument(skip(self), fields(metric = ?metric))]
    async fn windowed_average(
        &self,
        metric: WindowMetric,
        since: DateTime<Utc>,
    ) -> StorageResult<WindowedAverage> {
        let sql = format!(
            "SELECT AVG({column}) AS average, COUNT(*) AS sample_count \
             FROM metrics WHERE timestamp >= ?",
            column = metric.column()
        );

        let row = sqlx::query(&sql)
            .bind(Self::timestamp_to_millis(&since))
            .fetch_one(&self.pool)
            .await?;

        Ok(WindowedAverage {
            average: row.get::<Option<f64>, _>("average"),
            sample_count: row.get::<i64, _>("sample_count").max(0) as u64,
        })
    }

    #[instrument(skip(self))]
    async fn records_since(&self, since: DateTime<Utc>) -> StorageResult<Vec<MetricRecord>> {
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM metrics WHERE timestamp >= ? ORDER BY timestamp ASC, id ASC"
        );

        let rows = sqlx::query(&sql)
            .bind(Self::timestamp_to_millis(&since))
            .fetch_all(&self.pool)
            .await?;

        let records: Vec<MetricRecord> = rows.iter().map(Self::record_from_row).collect();
        debug!("query returned {} records", records.len());
        Ok(records)
    }

    #[instrument(skip(self))]
    async fn latest(&self, limit: usize) -> StorageResult<Vec<MetricRecord>> {
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM metrics ORDER BY timestamp DESC, id DESC LIMIT ?"
        );

        let rows = sqlx::query(&sql)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;

        let mut records: Vec<MetricRecord> = rows.iter().map(Self::record_from_row).collect();
        // Reverse to get chronological order (oldest first)
        records.reverse();
        Ok(records)
    }

    #[instrument(skip(self), fields(cutoff = %cutoff))]
    async fn purge_before(&self, cutoff: DateTime<Utc>) -> StorageResult<usize> {
        let result = sqlx::query("DELETE FROM metrics WHERE timestamp < ?")
            .bind(Self::timestamp_to_millis(&cutoff))
            .execute(&self.pool)
            .await?;

        let deleted = result.rows_affected() as usize;
        info!("deleted {} old metric records", deleted);

        Ok(deleted)
    }

    #[instrument(skip(self))]
    async fn get_stats(&self) -> StorageResult<String> {
        let row: (i64, Option<i64>, Option<i64>) =
            sqlx::query_as("SELECT COUNT(*), MIN(timestamp), MAX(timestamp) FROM metrics")
                .fetch_one(&self.pool)
                .await?;

        let (total_rows, oldest, newest) = row;

        let file_size = std::fs::metadata(&self.db_path)
            .map(|m| m.len())
            .unwrap_or(0);

        let file_size_mb = file_size as f64 / 1_000_000.0;

        let time_range = match (oldest, newest) {
            (Some(old), Some(new)) => format!(
                "{} to {}",
                Self::millis_to_timestamp(old).format("%Y-%m-%d %H:%M"),
                Self::millis_to_timestamp(new).format("%Y-%m-%d %H:%M")
            ),
            _ => "no data".to_string(),
        };

        Ok(format!(
            "SQLite: {} rows, {:.2} MB on disk, time range: {}",
            total_rows, file_size_mb, time_range
        ))
    }

    async fn close(&self) -> StorageResult<()> {
        info!("closing SQLite backend");
        self.pool.close().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    fn record(timestamp: DateTime<Utc>, cpu: f64) -> NewMetricRecord {
        NewMetricRecord {
            timestamp,
            cpu_usage: cpu,
            memory_usage: 55.0,
            disk_usage: 31.0,
            top_process: Some(TopProcessRecord {
                name: "postgres".to_string(),
                cpu: 42.5,
                user: "postgres".to_string(),
                pid: 812,
            }),
        }
    }

    async fn backend() -> (tempfile::TempDir, SqliteBackend) {
        let temp_dir = tempfile::tempdir().unwrap();
        let db_path = temp_dir.path().join("test.db");
        let backend = SqliteBackend::new(&db_path).await.unwrap();
        (temp_dir, backend)
    }

    #[tokio::test]
    async fn test_sqlite_backend_creation() {
        let temp_dir = tempfile::tempdir().unwrap();
        let db_path = temp_dir.path().join("nested").join("test.db");

        let backend = SqliteBackend::new(&db_path).await;
        assert!(backend.is_ok());
    }

    #[tokio::test]
    async fn test_insert_and_latest() {
        let (_dir, backend) = backend().await;
        let now = Utc::now();

        let first = backend
            .insert(record(now - ChronoDuration::seconds(60), 10.0))
            .await
            .unwrap();
        let second = backend.insert(record(now, 20.0)).await.unwrap();
        assert!(second > first);

        let records = backend.latest(10).await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].cpu_usage, 10.0);
        assert_eq!(records[1].cpu_usage, 20.0);
        assert_eq!(records[1].timestamp.timestamp_millis(), now.timestamp_millis());

        let top = records[1].top_process.as_ref().unwrap();
        assert_eq!(top.name, "postgres");
        assert_eq!(top.pid, 812);

        let newest = backend.latest(1).await.unwrap();
        assert_eq!(newest.len(), 1);
        assert_eq!(newest[0].id, second);
    }

    #[tokio::test]
    async fn test_insert_clamps_backwards_timestamp() {
        let (_dir, backend) = backend().await;
        let now = Utc::now();

        backend.insert(record(now, 10.0)).await.unwrap();
        backend
            .insert(record(now - ChronoDuration::hours(1), 20.0))
            .await
            .unwrap();

        let records = backend.latest(10).await.unwrap();
        assert_eq!(
            records[1].timestamp.timestamp_millis(),
            now.timestamp_millis()
        );
    }

    #[tokio::test]
    async fn test_windowed_average() {
        let (_dir, backend) = backend().await;
        let now = Utc::now();

        let empty = backend
            .windowed_average(WindowMetric::Cpu, now - ChronoDuration::minutes(5))
            .await
            .unwrap();
        assert_eq!(empty.sample_count, 0);
        assert_eq!(empty.average, None);

        for (minutes_ago, cpu) in [(30, 99.0), (4, 60.0), (3, 70.0), (1, 80.0)] {
            backend
                .insert(record(now - ChronoDuration::minutes(minutes_ago), cpu))
                .await
                .unwrap();
        }

        let avg = backend
            .windowed_average(WindowMetric::Cpu, now - ChronoDuration::minutes(5))
            .await
            .unwrap();
        assert_eq!(avg.sample_count, 3);
        assert_eq!(avg.average, Some(70.0));

        let mem = backend
            .windowed_average(WindowMetric::Memory, now - ChronoDuration::minutes(5))
            .await
            .unwrap();
        assert_eq!(mem.average, Some(55.0));
    }

    #[tokio::test]
    async fn test_purge_before() {
        let (_dir, backend) = backend().await;
        let now = Utc::now();

        backend
            .insert(record(now - ChronoDuration::days(10), 10.0))
            .await
            .unwrap();
        backend.insert(record(now, 20.0)).await.unwrap();

        let cutoff = now - ChronoDuration::days(5);
        assert_eq!(backend.purge_before(cutoff).await.unwrap(), 1);
        assert_eq!(backend.purge_before(cutoff).await.unwrap(), 0);

        let remaining = backend.records_since(now - ChronoDuration::days(30)).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].cpu_usage, 20.0);
    }

    #[tokio::test]
    async fn test_get_stats() {
        let (_dir, backend) = backend().await;

        let stats = backend.get_stats().await.unwrap();
        assert!(stats.contains("SQLite"));
        assert!(stats.contains("no data"));

        backend.insert(record(Utc::now(), 5.0)).await.unwrap();
        let stats = backend.get_stats().await.unwrap();
        assert!(stats.contains("1 rows"));
    }
}
