//! Metric history: persistence backends and the queries built on them
//!
//! ## Design
//!
//! - **Trait-based**: `StorageBackend` allows swapping implementations
//! - **Single writer**: only the storage actor appends or purges
//! - **Pure aggregation**: rollups are computed from records, not in SQL
//!
//! ## Backends
//!
//! - **SQLite** (default, `storage-sqlite` feature): embedded database file
//! - **In-Memory**: bounded buffer, no persistence
//!
//! ## Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use health_monitor::storage::{MetricStore, sqlite::SqliteBackend};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let backend = SqliteBackend::new("./health-monitor.db").await?;
//!     let store = MetricStore::new(Arc::new(backend));
//!     println!("{}", store.stats().await?);
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod error;
pub mod memory;
pub mod rollup;
pub mod schema;
#[cfg(feature = "storage-sqlite")]
pub mod sqlite;
pub mod store;

pub use backend::{StorageBackend, WindowMetric, WindowedAverage};
pub use error::{StorageError, StorageResult};
pub use rollup::{AggregateBucket, Granularity};
pub use schema::{MetricRecord, NewMetricRecord, TopProcessRecord};
pub use store::MetricStore;
