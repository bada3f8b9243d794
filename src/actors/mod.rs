//! Actor-based monitoring pipeline
//!
//! Each periodic trigger runs as an independent async task communicating via
//! Tokio channels.
//!
//! ## Architecture Overview
//!
//! ```text
//!              ┌──────────────────┐   watch (latest)   ┌─────────────────────┐
//!              │   SamplerActor   │───────────────────▶│ ScheduledAlertActor │
//!              │  (sampling tick) │                    │   (scheduled tick)  │
//!              └────────┬─────────┘                    └──────────┬──────────┘
//!                       │ SnapshotEvent                           │ windowed averages
//!              ┌────────▼─────────┐                               │
//!              │ Broadcast (MPMC) │                               │
//!              └───┬──────────┬───┘                               │
//!                  │          │                                   │
//!         ┌────────▼───┐  ┌───▼──────────┐                        │
//!         │ AlertActor │  │ StorageActor │◀───────────────────────┘
//!         │ (fast path)│  │ (purge tick) │
//!         └────────────┘  └──────────────┘
//! ```
//!
//! ## Communication Patterns
//!
//! 1. **Commands**: Each actor has an mpsc command channel for control messages
//! 2. **Events**: The sampler publishes snapshots to a broadcast channel for fan-out
//! 3. **Request/Response**: oneshot channels for queries

pub mod alert;
pub mod messages;
pub mod sampler;
pub mod scheduled;
pub mod storage;

pub use alert::{AlertActor, AlertHandle};
pub use messages::{SnapshotEvent, StorageStats};
pub use sampler::{SamplerActor, SamplerHandle};
pub use scheduled::{ScheduledAlertActor, ScheduledHandle};
pub use storage::{StorageActor, StorageHandle, StorageSettings};
