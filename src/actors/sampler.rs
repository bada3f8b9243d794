//! SamplerActor - Samples the host on a fixed tick
//!
//! ## Message Flow
//!
//! ```text
//! Timer tick → Sampler::next → SnapshotEvent → [AlertActor, StorageActor, ...]
//!     ↑                      └→ watch (latest snapshot)
//!     └─── Commands (SampleNow, UpdateInterval, Shutdown)
//! ```

use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, error, instrument, trace, warn};

use crate::HealthSnapshot;
use crate::monitors::{AccessorError, Sampler};

use super::messages::{SamplerCommand, SnapshotEvent};

/// Actor that owns the [`Sampler`] and publishes its snapshots
pub struct SamplerActor {
    sampler: Sampler,

    /// Command receiver for control messages
    command_rx: mpsc::Receiver<SamplerCommand>,

    /// Broadcast sender for publishing snapshots
    event_tx: broadcast::Sender<SnapshotEvent>,

    /// Latest successful snapshot
    latest_tx: watch::Sender<Option<HealthSnapshot>>,

    interval_duration: Duration,
}

impl SamplerActor {
    pub fn new(
        sampler: Sampler,
        command_rx: mpsc::Receiver<SamplerCommand>,
        event_tx: broadcast::Sender<SnapshotEvent>,
        latest_tx: watch::Sender<Option<HealthSnapshot>>,
        interval_duration: Duration,
    ) -> Self {
        Self {
            sampler,
            command_rx,
            event_tx,
            latest_tx,
            interval_duration,
        }
    }

    /// Run the actor's main loop until Shutdown or the command channel closes
    #[instrument(skip(self), fields(interval = ?self.interval_duration))]
    pub async fn run(mut self) {
        debug!("starting sampler actor");

        let mut ticker = interval(self.interval_duration);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    // failures are logged in sample_once; the next tick retries
                    let _ = self.sample_once().await;
                }

                Some(cmd) = self.command_rx.recv() => {
                    match cmd {
                        SamplerCommand::SampleNow { respond_to } => {
                            debug!("received SampleNow command");
                            let result = self.sample_once().await;
                            let _ = respond_to.send(result);
                        }

                        SamplerCommand::UpdateInterval { interval_secs } => {
                            debug!("updating interval to {interval_secs}s");
                            self.interval_duration = Duration::from_secs(interval_secs.max(1));
                            ticker = interval(self.interval_duration);
                            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                        }

                        SamplerCommand::Shutdown => {
                            debug!("received shutdown command");
                            break;
                        }
                    }
                }

                else => {
                    warn!("command channel closed, shutting down");
                    break;
                }
            }
        }

        debug!("sampler actor stopped");
    }

    async fn sample_once(&mut self) -> Result<HealthSnapshot, AccessorError> {
        let (snapshot, edges) = self.sampler.next().await.inspect_err(|e| {
            error!("sampling tick skipped: {e}");
        })?;

        self.latest_tx.send_replace(Some(snapshot.clone()));

        // It's OK if there are no subscribers
        match self.event_tx.send(SnapshotEvent {
            snapshot: snapshot.clone(),
            edges,
        }) {
            Ok(receivers) => trace!("published snapshot to {receivers} receivers"),
            Err(_) => trace!("no receivers for snapshot event"),
        }

        Ok(snapshot)
    }
}

/// Handle for controlling a SamplerActor
#[derive(Clone)]
pub struct SamplerHandle {
    sender: mpsc::Sender<SamplerCommand>,
    latest_rx: watch::Receiver<Option<HealthSnapshot>>,
}

impl SamplerHandle {
    /// Spawn a sampler actor publishing into `event_tx`
    pub fn spawn(
        sampler: Sampler,
        interval_duration: Duration,
        event_tx: broadcast::Sender<SnapshotEvent>,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);
        let (latest_tx, latest_rx) = watch::channel(None);

        let actor = SamplerActor::new(sampler, cmd_rx, event_tx, latest_tx, interval_duration);
        tokio::spawn(actor.run());

        Self {
            sender: cmd_tx,
            latest_rx,
        }
    }

    /// Sample immediately and return the snapshot
    pub async fn sample_now(&self) -> Result<HealthSnapshot> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SamplerCommand::SampleNow { respond_to: tx })
            .await
            .context("failed to send SampleNow command")?;

        let snapshot = rx.await.context("failed to receive response")??;
        Ok(snapshot)
    }

    pub async fn update_interval(&self, interval_secs: u64) -> Result<()> {
        self.sender
            .send(SamplerCommand::UpdateInterval { interval_secs })
            .await
            .context("failed to send UpdateInterval command")?;
        Ok(())
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.sender
            .send(SamplerCommand::Shutdown)
            .await
            .context("failed to send Shutdown command")?;
        Ok(())
    }

    /// Most recent successful snapshot
    pub fn latest(&self) -> Option<HealthSnapshot> {
        self.latest_rx.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<Option<HealthSnapshot>> {
        self.latest_rx.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitors::SamplerSettings;
    use crate::monitors::accessor::fakes::{ScriptedMetrics, StaticProcesses, reading};
    use std::sync::Arc;

    fn sampler(readings: Vec<Result<crate::monitors::SystemReading, AccessorError>>) -> Sampler {
        Sampler::new(
            Arc::new(ScriptedMetrics::new(readings)),
            Arc::new(StaticProcesses(Ok(vec![]))),
            SamplerSettings::default(),
        )
    }

    #[tokio::test]
    async fn test_sample_now_publishes_event() {
        let (event_tx, mut event_rx) = broadcast::channel(16);
        // a long interval keeps the timer out of the way after its first tick
        let handle = SamplerHandle::spawn(
            sampler(vec![Ok(reading(30.0, 40, 20)), Ok(reading(45.0, 40, 20))]),
            Duration::from_secs(3600),
            event_tx,
        );

        let first = tokio::time::timeout(Duration::from_millis(500), event_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.snapshot.cpu.usage_percent, 30);
        assert!(!first.edges.escalate());

        let snapshot = handle.sample_now().await.unwrap();
        assert_eq!(snapshot.cpu.usage_percent, 45);

        let second = tokio::time::timeout(Duration::from_millis(500), event_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(second.edges.cpu);
        assert_eq!(handle.latest().unwrap().cpu.usage_percent, 45);

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_sample_reports_error() {
        let (event_tx, _event_rx) = broadcast::channel(16);
        let handle = SamplerHandle::spawn(
            sampler(vec![Err(AccessorError::Unavailable("no /proc".to_string()))]),
            Duration::from_secs(3600),
            event_tx,
        );

        // the first timer tick consumed the error; the fake now has nothing left
        let result = handle.sample_now().await;
        assert!(result.is_err());
        assert!(handle.latest().is_none());

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_update_interval() {
        let (event_tx, _event_rx) = broadcast::channel(16);
        let handle = SamplerHandle::spawn(
            sampler(vec![Ok(reading(10.0, 10, 10))]),
            Duration::from_secs(3600),
            event_tx,
        );

        handle.update_interval(5).await.unwrap();
        handle.shutdown().await.unwrap();
    }
}
