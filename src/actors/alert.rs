//! AlertActor - Fast-path threshold alerts
//!
//! Subscribes to snapshot events and evaluates, instantaneously, only the
//! resource kinds whose usage rose since the previous sample.
//!
//! ## Cooldown State Machine
//!
//! ```text
//! IDLE ──(above threshold, dispatch ok)──▶ COOLDOWN
//!  ▲                                          │
//!  └──────────(now - last_sent ≥ cooldown)────┘
//! ```
//!
//! A failed dispatch leaves the kind IDLE, so the next rising edge retries.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info, instrument, trace, warn};

use super::messages::{AlertCommand, SnapshotEvent};
use crate::ResourceKind;
use crate::alerts::{AlertEvaluator, Evaluation};
use crate::monitors::AlertState;

/// Actor that owns the fast-path evaluator and its alert state
pub struct AlertActor {
    evaluator: AlertEvaluator,

    /// Command receiver
    command_rx: mpsc::Receiver<AlertCommand>,

    /// Snapshot receiver (broadcast subscription)
    snapshot_rx: broadcast::Receiver<SnapshotEvent>,
}

impl AlertActor {
    pub fn new(
        evaluator: AlertEvaluator,
        command_rx: mpsc::Receiver<AlertCommand>,
        snapshot_rx: broadcast::Receiver<SnapshotEvent>,
    ) -> Self {
        Self {
            evaluator,
            command_rx,
            snapshot_rx,
        }
    }

    /// Run until Shutdown or until the snapshot channel closes
    #[instrument(skip(self))]
    pub async fn run(mut self) {
        debug!("starting alert actor");

        loop {
            tokio::select! {
                result = self.snapshot_rx.recv() => {
                    match result {
                        Ok(event) => self.handle_event(event).await,
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            // the next event still compares against its own predecessor
                            warn!("alert actor lagged, skipped {skipped} snapshots");
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            debug!("snapshot channel closed, shutting down");
                            break;
                        }
                    }
                }

                Some(cmd) = self.command_rx.recv() => {
                    match cmd {
                        AlertCommand::GetState { respond_to } => {
                            let _ = respond_to.send(self.evaluator.states());
                        }

                        AlertCommand::Shutdown => {
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

        debug!("alert actor stopped");
    }

    async fn handle_event(&mut self, event: SnapshotEvent) {
        if !event.edges.escalate() {
            trace!("no rising edge at {}", event.snapshot.timestamp);
            return;
        }

        let kinds = event.edges.kinds();
        let results = self
            .evaluator
            .evaluate_instant(&event.snapshot, &kinds, event.snapshot.timestamp)
            .await;

        log_evaluations("fast", &results);
    }
}

/// Log what each evaluation decided
pub(crate) fn log_evaluations(path: &str, results: &[(ResourceKind, Evaluation)]) {
    for (kind, evaluation) in results {
        match evaluation {
            Evaluation::Dispatched { value } => {
                info!(path, %kind, value, "alert dispatched");
            }
            Evaluation::DispatchFailed(e) => {
                warn!(path, %kind, error = %e, "alert dispatch failed, cooldown not started");
            }
            Evaluation::NoReading => {
                warn!(path, %kind, "no reading available");
            }
            other => trace!(path, %kind, ?other, "evaluated"),
        }
    }
}

/// Handle for controlling an AlertActor
#[derive(Clone)]
pub struct AlertHandle {
    sender: mpsc::Sender<AlertCommand>,
}

impl AlertHandle {
    pub fn spawn(
        evaluator: AlertEvaluator,
        snapshot_rx: broadcast::Receiver<SnapshotEvent>,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);

        let actor = AlertActor::new(evaluator, cmd_rx, snapshot_rx);
        tokio::spawn(actor.run());

        Self { sender: cmd_tx }
    }

    /// Alert state per resource kind
    pub async fn states(&self) -> Result<BTreeMap<ResourceKind, AlertState>> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(AlertCommand::GetState { respond_to: tx })
            .await
            .context("failed to send GetState command")?;

        rx.await.context("failed to receive response")
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.sender
            .send(AlertCommand::Shutdown)
            .await
            .context("failed to send Shutdown command")?;
        Ok(())
    }
}
