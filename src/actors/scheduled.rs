//! ScheduledAlertActor - Slow-tick alerts on smoothed values
//!
//! On every scheduled tick the actor evaluates all resource kinds through
//! windowed averages from the metric store, with the latest snapshot as the
//! instantaneous fallback. Its cooldown state is independent of the fast
//! path, so a metric that stays pegged is re-alerted once per scheduled
//! cooldown even though it never rises again.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, instrument, warn};

use super::alert::log_evaluations;
use super::messages::ScheduledCommand;
use crate::alerts::{AlertEvaluator, AverageSource, Evaluation, WindowSettings};
use crate::monitors::AlertState;
use crate::{HealthSnapshot, ResourceKind};

pub struct ScheduledAlertActor {
    evaluator: AlertEvaluator,

    command_rx: mpsc::Receiver<ScheduledCommand>,

    /// Latest snapshot published by the sampler
    latest_rx: watch::Receiver<Option<HealthSnapshot>>,

    /// Windowed averages; `None` when no store is configured
    source: Option<Arc<dyn AverageSource>>,

    window: WindowSettings,

    interval_duration: Duration,
}

impl ScheduledAlertActor {
    pub fn new(
        evaluator: AlertEvaluator,
        command_rx: mpsc::Receiver<ScheduledCommand>,
        latest_rx: watch::Receiver<Option<HealthSnapshot>>,
        source: Option<Arc<dyn AverageSource>>,
        window: WindowSettings,
        interval_duration: Duration,
    ) -> Self {
        if source.is_none() {
            debug!("no metric store, scheduled checks use instantaneous values");
        }

        Self {
            evaluator,
            command_rx,
            latest_rx,
            source,
            window,
            interval_duration,
        }
    }

    #[instrument(skip(self), fields(interval = ?self.interval_duration))]
    pub async fn run(mut self) {
        debug!("starting scheduled alert actor");

        // first check one full interval after start, once history exists
        let mut ticker = interval_at(
            Instant::now() + self.interval_duration,
            self.interval_duration,
        );
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let origin = (Instant::now(), Utc::now());

        loop {
            tokio::select! {
                deadline = ticker.tick() => {
                    let results = self.check(tick_time(origin, deadline)).await;
                    log_evaluations("scheduled", &results);
                }

                Some(cmd) = self.command_rx.recv() => {
                    match cmd {
                        ScheduledCommand::CheckNow { now, respond_to } => {
                            debug!("received CheckNow command");
                            let results = self.check(now).await;
                            log_evaluations("scheduled", &results);
                            let _ = respond_to.send(results);
                        }

                        ScheduledCommand::GetState { respond_to } => {
                            let _ = respond_to.send(self.evaluator.states());
                        }

                        ScheduledCommand::Shutdown => {
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

        debug!("scheduled alert actor stopped");
    }

    async fn check(&mut self, now: DateTime<Utc>) -> Vec<(ResourceKind, Evaluation)> {
        let snapshot = self.latest_rx.borrow().clone();

        self.evaluator
            .evaluate_windowed(snapshot.as_ref(), self.source.as_deref(), self.window, now)
            .await
    }
}

/// Wall-clock time of a tick deadline. Consecutive ticks are stamped exactly
/// one period apart regardless of how late the task wakes up.
fn tick_time(origin: (Instant, DateTime<Utc>), deadline: Instant) -> DateTime<Utc> {
    let offset = deadline.saturating_duration_since(origin.0);
    origin.1 + TimeDelta::from_std(offset).unwrap_or_else(|_| TimeDelta::zero())
}

/// Handle for controlling a ScheduledAlertActor
#[derive(Clone)]
pub struct ScheduledHandle {
    sender: mpsc::Sender<ScheduledCommand>,
}

impl ScheduledHandle {
    pub fn spawn(
        evaluator: AlertEvaluator,
        latest_rx: watch::Receiver<Option<HealthSnapshot>>,
        source: Option<Arc<dyn AverageSource>>,
        window: WindowSettings,
        interval_duration: Duration,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(8);

        let actor = ScheduledAlertActor::new(
            evaluator,
            cmd_rx,
            latest_rx,
            source,
            window,
            interval_duration,
        );
        tokio::spawn(actor.run());

        Self { sender: cmd_tx }
    }

    /// Run a scheduled evaluation now, as of `now`
    pub async fn check_now(&self, now: DateTime<Utc>) -> Result<Vec<(ResourceKind, Evaluation)>> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(ScheduledCommand::CheckNow {
                now,
                respond_to: tx,
            })
            .await
            .context("failed to send CheckNow command")?;

        rx.await.context("failed to receive response")
    }

    pub async fn states(&self) -> Result<BTreeMap<ResourceKind, AlertState>> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(ScheduledCommand::GetState { respond_to: tx })
            .await
            .context("failed to send GetState command")?;

        rx.await.context("failed to receive response")
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.sender
            .send(ScheduledCommand::Shutdown)
            .await
            .context("failed to send Shutdown command")?;
        Ok(())
    }
}
