//! StorageActor - Persists snapshots and answers history queries
//!
//! ## Architecture
//!
//! The actor is the only writer of the metric store. It subscribes to the
//! snapshot broadcast and appends at most one record per persistence
//! interval; every other actor reads history through [`StorageHandle`].
//!
//! ## Retention
//!
//! When a retention period is configured the actor purges once on startup
//! and then on every cleanup tick (daily by default).

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, error, info, instrument, trace, warn};

use super::messages::{SnapshotEvent, StorageCommand, StorageStats};
use crate::alerts::AverageSource;
use crate::storage::{
    AggregateBucket, Granularity, MetricRecord, MetricStore, StorageError, StorageResult,
    WindowMetric, WindowedAverage,
};
use crate::util::bounded;

#[derive(Debug, Clone)]
pub struct StorageSettings {
    /// Minimum spacing between persisted samples (zero persists every sample)
    pub persist_interval: Duration,

    /// `None` disables purging
    pub retention_days: Option<u32>,

    pub cleanup_interval: Duration,

    /// Upper bound for each backend call and handle round trip
    pub call_timeout: Duration,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            persist_interval: Duration::from_secs(60),
            retention_days: Some(7),
            cleanup_interval: Duration::from_secs(24 * 60 * 60),
            call_timeout: Duration::from_secs(10),
        }
    }
}

pub struct StorageActor {
    store: MetricStore,

    /// Command receiver
    command_rx: mpsc::Receiver<StorageCommand>,

    /// Snapshot receiver (broadcast subscription)
    snapshot_rx: broadcast::Receiver<SnapshotEvent>,

    settings: StorageSettings,

    /// Timestamp of the last sample that made it into the store
    last_persisted: Option<DateTime<Utc>>,

    stats: StorageStats,
}

impl StorageActor {
    pub fn new(
        store: MetricStore,
        command_rx: mpsc::Receiver<StorageCommand>,
        snapshot_rx: broadcast::Receiver<SnapshotEvent>,
        settings: StorageSettings,
    ) -> Self {
        if let Some(days) = settings.retention_days {
            debug!(
                "retention cleanup enabled: {} days, every {:?}",
                days, settings.cleanup_interval
            );
        }

        Self {
            store,
            command_rx,
            snapshot_rx,
            settings,
            last_persisted: None,
            stats: StorageStats::default(),
        }
    }

    /// Run the actor's main loop
    #[instrument(skip(self))]
    pub async fn run(mut self) {
        debug!("starting storage actor");

        let has_retention = self.settings.retention_days.is_some();

        // The first tick completes immediately, which is the startup purge
        let mut cleanup_interval = time::interval(self.settings.cleanup_interval);
        cleanup_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                result = self.snapshot_rx.recv() => {
                    match result {
                        Ok(event) => self.store_snapshot(event).await,
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!("storage actor lagged, skipped {skipped} snapshots");
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            warn!("snapshot channel closed, shutting down");
                            break;
                        }
                    }
                }

                _ = cleanup_interval.tick(), if has_retention => {
                    debug!("retention cleanup triggered");
                    self.run_cleanup(Utc::now()).await;
                }

                Some(cmd) = self.command_rx.recv() => {
                    if !self.handle_command(cmd).await {
                        break;
                    }
                }

                else => {
                    warn!("command channel closed, shutting down");
                    break;
                }
            }
        }

        debug!("closing backend");
        if let Err(e) = self.store.close().await {
            error!("error closing backend: {}", e);
        }

        debug!("storage actor stopped");
    }

    async fn timed<T, F>(&self, operation: &'static str, future: F) -> StorageResult<T>
    where
        F: Future<Output = StorageResult<T>>,
    {
        bounded(self.settings.call_timeout, future)
            .await
            .unwrap_or(Err(StorageError::Timeout(operation)))
    }

    fn due(&self, timestamp: DateTime<Utc>) -> bool {
        let Some(last) = self.last_persisted else {
            return true;
        };

        match (timestamp - last).to_std() {
            Ok(elapsed) => elapsed >= self.settings.persist_interval,
            // behind the last persisted sample; the backend would clamp it anyway
            Err(_) => self.settings.persist_interval.is_zero(),
        }
    }

    async fn store_snapshot(&mut self, event: SnapshotEvent) {
        let timestamp = event.snapshot.timestamp;

        if !self.due(timestamp) {
            self.stats.skipped += 1;
            trace!("snapshot at {timestamp} skipped by persistence cadence");
            return;
        }

        match self
            .timed("append", self.store.append(&event.snapshot))
            .await
        {
            Ok(id) => {
                self.last_persisted = Some(timestamp);
                self.stats.appended += 1;
                trace!("persisted snapshot at {timestamp} as record {id}");
            }
            Err(e) => {
                self.stats.append_failures += 1;
                error!("dropping snapshot at {timestamp}: {e}");
            }
        }
    }

    async fn run_cleanup(&mut self, now: DateTime<Utc>) {
        let Some(retention_days) = self.settings.retention_days else {
            return;
        };

        match self
            .timed("purge", self.store.purge(retention_days, now))
            .await
        {
            Ok(deleted) => {
                self.stats.purged += deleted as u64;
                self.stats.last_purge = Some(now);
                if deleted > 0 {
                    info!("retention cleanup complete: deleted {deleted} old records");
                } else {
                    trace!("retention cleanup: nothing to delete");
                }
            }
            Err(e) => {
                // retried on the next cleanup tick
                error!("failed to purge old records: {}", e);
            }
        }
    }

    /// Returns false when the actor should stop
    async fn handle_command(&mut self, cmd: StorageCommand) -> bool {
        match cmd {
            StorageCommand::WindowedAverage {
                metric,
                window_minutes,
                now,
                respond_to,
            } => {
                let result = self
                    .timed(
                        "windowed average",
                        self.store.windowed_average(metric, window_minutes, now),
                    )
                    .await;
                let _ = respond_to.send(result);
            }

            StorageCommand::Rollup {
                granularity,
                now,
                respond_to,
            } => {
                let result = self
                    .timed("rollup", self.store.rollup(granularity, now))
                    .await;
                let _ = respond_to.send(result);
            }

            StorageCommand::Latest { limit, respond_to } => {
                let result = self.timed("latest", self.store.latest(limit)).await;
                let _ = respond_to.send(result);
            }

            StorageCommand::Purge {
                retention_days,
                now,
                respond_to,
            } => {
                let result = self
                    .timed("purge", self.store.purge(retention_days, now))
                    .await;
                if let Ok(deleted) = result {
                    self.stats.purged += deleted as u64;
                    self.stats.last_purge = Some(now);
                }
                let _ = respond_to.send(result);
            }

            StorageCommand::GetStats { respond_to } => {
                let mut stats = self.stats.clone();
                stats.backend = self.timed("stats", self.store.stats()).await.ok();
                let _ = respond_to.send(stats);
            }

            StorageCommand::Shutdown => {
                debug!("received shutdown command");
                return false;
            }
        }

        true
    }
}

/// Handle for the StorageActor. Every request is bounded by the call timeout.
#[derive(Clone)]
pub struct StorageHandle {
    sender: mpsc::Sender<StorageCommand>,
    call_timeout: Duration,
}

impl StorageHandle {
    pub fn spawn(
        store: MetricStore,
        snapshot_rx: broadcast::Receiver<SnapshotEvent>,
        settings: StorageSettings,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);
        let call_timeout = settings.call_timeout;

        let actor = StorageActor::new(store, cmd_rx, snapshot_rx, settings);
        tokio::spawn(actor.run());

        Self {
            sender: cmd_tx,
            call_timeout,
        }
    }

    async fn request<T>(
        &self,
        operation: &'static str,
        command: impl FnOnce(oneshot::Sender<T>) -> StorageCommand,
    ) -> StorageResult<T> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(command(tx))
            .await
            .map_err(|_| StorageError::ActorUnavailable)?;

        bounded(self.call_timeout, rx)
            .await
            .ok_or(StorageError::Timeout(operation))?
            .map_err(|_| StorageError::ActorUnavailable)
    }

    pub async fn windowed_average(
        &self,
        metric: WindowMetric,
        window_minutes: u32,
        now: DateTime<Utc>,
    ) -> StorageResult<WindowedAverage> {
        self.request("windowed average", |respond_to| {
            StorageCommand::WindowedAverage {
                metric,
                window_minutes,
                now,
                respond_to,
            }
        })
        .await?
    }

    pub async fn rollup(
        &self,
        granularity: Granularity,
        now: DateTime<Utc>,
    ) -> StorageResult<Vec<AggregateBucket>> {
        self.request("rollup", |respond_to| StorageCommand::Rollup {
            granularity,
            now,
            respond_to,
        })
        .await?
    }

    pub async fn latest(&self, limit: usize) -> StorageResult<Vec<MetricRecord>> {
        self.request("latest", |respond_to| StorageCommand::Latest {
            limit,
            respond_to,
        })
        .await?
    }

    pub async fn purge(&self, retention_days: u32, now: DateTime<Utc>) -> StorageResult<usize> {
        self.request("purge", |respond_to| StorageCommand::Purge {
            retention_days,
            now,
            respond_to,
        })
        .await?
    }

    pub async fn stats(&self) -> StorageResult<StorageStats> {
        self.request("stats", |respond_to| StorageCommand::GetStats { respond_to })
            .await
    }

    pub async fn shutdown(&self) -> anyhow::Result<()> {
        self.sender
            .send(StorageCommand::Shutdown)
            .await
            .map_err(|_| anyhow::anyhow!("failed to send Shutdown command"))?;
        Ok(())
    }
}

#[async_trait]
impl AverageSource for StorageHandle {
    async fn windowed_average(
        &self,
        metric: WindowMetric,
        window_minutes: u32,
        now: DateTime<Utc>,
    ) -> StorageResult<WindowedAverage> {
        StorageHandle::windowed_average(self, metric, window_minutes, now).await
    }
}
