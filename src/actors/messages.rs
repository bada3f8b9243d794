//! Message types for actor communication
//!
//! ## Design Principles
//!
//! 1. **Commands**: Request/response messages sent to specific actors via mpsc
//! 2. **Events**: Broadcast notifications published to multiple subscribers
//! 3. **Immutability**: All events are cloneable for multi-subscriber patterns

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use tokio::sync::oneshot;

use crate::alerts::Evaluation;
use crate::monitors::{AccessorError, AlertState, RisingEdges};
use crate::storage::{
    AggregateBucket, Granularity, MetricRecord, StorageResult, WindowMetric, WindowedAverage,
};
use crate::{HealthSnapshot, ResourceKind};

/// Event published after every successful sample
///
/// Slow subscribers may lag and miss events; the next one carries a full
/// snapshot again.
#[derive(Debug, Clone)]
pub struct SnapshotEvent {
    pub snapshot: HealthSnapshot,

    /// What rose compared to the previous sample
    pub edges: RisingEdges,
}

/// Commands that can be sent to the SamplerActor
#[derive(Debug)]
pub enum SamplerCommand {
    /// Sample immediately (bypassing the interval timer)
    SampleNow {
        respond_to: oneshot::Sender<Result<HealthSnapshot, AccessorError>>,
    },

    /// Update the sampling interval
    UpdateInterval { interval_secs: u64 },

    /// Gracefully shut down the sampler
    Shutdown,
}

/// Commands that can be sent to the StorageActor
#[derive(Debug)]
pub enum StorageCommand {
    WindowedAverage {
        metric: WindowMetric,
        window_minutes: u32,
        now: DateTime<Utc>,
        respond_to: oneshot::Sender<StorageResult<WindowedAverage>>,
    },

    Rollup {
        granularity: Granularity,
        now: DateTime<Utc>,
        respond_to: oneshot::Sender<StorageResult<Vec<AggregateBucket>>>,
    },

    /// Newest records, oldest first
    Latest {
        limit: usize,
        respond_to: oneshot::Sender<StorageResult<Vec<MetricRecord>>>,
    },

    /// Purge on demand (the actor also purges on its own schedule)
    Purge {
        retention_days: u32,
        now: DateTime<Utc>,
        respond_to: oneshot::Sender<StorageResult<usize>>,
    },

    GetStats {
        respond_to: oneshot::Sender<StorageStats>,
    },

    /// Gracefully shut down the storage actor
    Shutdown,
}

/// Storage statistics
#[derive(Debug, Clone, Default)]
pub struct StorageStats {
    /// Samples appended since start
    pub appended: u64,

    /// Samples dropped because the append failed
    pub append_failures: u64,

    /// Samples skipped by the persistence cadence
    pub skipped: u64,

    /// Records removed by purges since start
    pub purged: u64,

    pub last_purge: Option<DateTime<Utc>>,

    /// Backend summary, if the backend answered
    pub backend: Option<String>,
}

/// Commands that can be sent to the fast-path AlertActor
#[derive(Debug)]
pub enum AlertCommand {
    GetState {
        respond_to: oneshot::Sender<BTreeMap<ResourceKind, AlertState>>,
    },

    /// Gracefully shut down the alert actor
    Shutdown,
}

/// Commands that can be sent to the ScheduledAlertActor
#[derive(Debug)]
pub enum ScheduledCommand {
    /// Run a scheduled evaluation immediately, as of `now`
    CheckNow {
        now: DateTime<Utc>,
        respond_to: oneshot::Sender<Vec<(ResourceKind, Evaluation)>>,
    },

    GetState {
        respond_to: oneshot::Sender<BTreeMap<ResourceKind, AlertState>>,
    },

    Shutdown,
}
