//! Wires the actors into a running pipeline and exposes the read-only
//! query surface.
//!
//! ```text
//! Config ──▶ open_store ──▶ MetricStore? ─┐
//!        ──▶ build_alert_notifier ─────────┼──▶ Pipeline::start ──▶ MonitorQueries
//!        ──▶ Sampler ──────────────────────┘
//! ```

use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info, warn};

use crate::HealthSnapshot;
use crate::actors::{
    AlertHandle, SamplerHandle, ScheduledHandle, StorageHandle, StorageSettings,
};
use crate::alerts::{AlertEvaluator, AverageSource, WindowSettings};
use crate::config::{Config, StorageConfig};
use crate::monitors::{MetricsAccessor, ProcessAccessor, Sampler, SamplerSettings};
use crate::notifier::{Notifier, build_notifier};
use crate::storage::memory::MemoryBackend;
use crate::storage::{AggregateBucket, Granularity, MetricStore, StorageResult};

/// Capacity of the snapshot broadcast channel
const EVENT_CAPACITY: usize = 64;

/// Name used in alerts: configured, else the system host name
pub fn resolve_hostname(config: &Config) -> String {
    config
        .hostname
        .clone()
        .or_else(sysinfo::System::host_name)
        .unwrap_or_else(|| "localhost".to_string())
}

/// Open the configured backend. A backend that cannot be opened leaves
/// the pipeline without history rather than stopping it.
pub async fn open_store(storage: &StorageConfig) -> Option<MetricStore> {
    match storage {
        StorageConfig::None => {
            info!("metric history disabled");
            None
        }

        StorageConfig::Memory { .. } => {
            info!("using in-memory metric history");
            Some(MetricStore::new(Arc::new(MemoryBackend::new())))
        }

        #[cfg(feature = "storage-sqlite")]
        StorageConfig::Sqlite { path, .. } => {
            match crate::storage::sqlite::SqliteBackend::new(path).await {
                Ok(backend) => {
                    info!("using SQLite metric history at {}", path.display());
                    Some(MetricStore::new(Arc::new(backend)))
                }
                Err(e) => {
                    error!("failed to open {}: {e}; running without history", path.display());
                    None
                }
            }
        }

        #[cfg(not(feature = "storage-sqlite"))]
        StorageConfig::Sqlite { .. } => {
            warn!("built without SQLite support, falling back to in-memory history");
            Some(MetricStore::new(Arc::new(MemoryBackend::new())))
        }
    }
}

/// Build the configured transport; `None` disables alerting
pub fn build_alert_notifier(config: &Config, hostname: &str) -> Option<Arc<dyn Notifier>> {
    let Some(channel) = &config.alerting.channel else {
        warn!("no alert channel configured, alerting disabled");
        return None;
    };

    match build_notifier(channel, hostname) {
        Ok(notifier) => {
            info!("sending alerts via {}", notifier.name());
            Some(notifier)
        }
        Err(e) => {
            warn!("alerting disabled: {e}");
            None
        }
    }
}

pub fn sampler_settings(config: &Config) -> SamplerSettings {
    SamplerSettings {
        top_processes: config.sampling.top_processes,
        inspect_floor: config.sampling.inspect_floor,
        call_timeout: config.call_timeout(),
    }
}

/// Read-only view of the running pipeline
#[derive(Clone)]
pub struct MonitorQueries {
    latest_rx: watch::Receiver<Option<HealthSnapshot>>,
    storage: Option<StorageHandle>,
}

impl MonitorQueries {
    /// Most recent successful snapshot, if any tick has succeeded yet
    pub fn latest_snapshot(&self) -> Option<HealthSnapshot> {
        self.latest_rx.borrow().clone()
    }

    /// Aggregated history; empty when no store is configured
    pub async fn rollup(&self, granularity: Granularity) -> StorageResult<Vec<AggregateBucket>> {
        match &self.storage {
            Some(storage) => storage.rollup(granularity, Utc::now()).await,
            None => Ok(Vec::new()),
        }
    }
}

/// Handles to every running actor
pub struct Pipeline {
    sampler: SamplerHandle,
    storage: Option<StorageHandle>,
    fast_alerts: Option<AlertHandle>,
    scheduled_alerts: Option<ScheduledHandle>,
}

impl Pipeline {
    /// Spawn all actors. Must be called inside a Tokio runtime.
    pub fn start(
        config: &Config,
        metrics: Arc<dyn MetricsAccessor>,
        processes: Arc<dyn ProcessAccessor>,
        store: Option<MetricStore>,
        notifier: Option<Arc<dyn Notifier>>,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CAPACITY);

        // subscribers first so the sampler's first snapshot reaches them
        let storage = store.map(|store| {
            StorageHandle::spawn(
                store,
                event_tx.subscribe(),
                StorageSettings {
                    persist_interval: config.sampling.persist_interval(),
                    retention_days: config.storage.retention_days(),
                    cleanup_interval: config.storage.cleanup_interval(),
                    call_timeout: config.call_timeout(),
                },
            )
        });

        let (thresholds, problems) = config.thresholds.resolve();
        for problem in &problems {
            warn!("{problem}; alerts for it are disabled");
        }

        let alert_rx = event_tx.subscribe();

        let sampler = SamplerHandle::spawn(
            Sampler::new(metrics, processes, sampler_settings(config)),
            config.sampling.interval(),
            event_tx,
        );

        let (fast_alerts, scheduled_alerts) = match notifier {
            Some(notifier) if !thresholds.is_empty() => {
                let fast = AlertHandle::spawn(
                    AlertEvaluator::new(
                        thresholds.clone(),
                        config.alerting.fast_cooldown(),
                        notifier.clone(),
                        config.call_timeout(),
                    ),
                    alert_rx,
                );

                let source = storage
                    .clone()
                    .map(|handle| Arc::new(handle) as Arc<dyn AverageSource>);
                let scheduled = ScheduledHandle::spawn(
                    AlertEvaluator::new(
                        thresholds,
                        config.alerting.scheduled_cooldown(),
                        notifier,
                        config.call_timeout(),
                    ),
                    sampler.watch(),
                    source,
                    WindowSettings {
                        minutes: config.alerting.window_minutes,
                        min_samples: config.alerting.min_samples,
                    },
                    config.alerting.scheduled_interval(),
                );

                (Some(fast), Some(scheduled))
            }
            Some(_) => {
                warn!("no usable thresholds, alerting disabled");
                (None, None)
            }
            None => (None, None),
        };

        debug!(
            "pipeline started (history: {}, alerting: {})",
            storage.is_some(),
            fast_alerts.is_some()
        );

        Self {
            sampler,
            storage,
            fast_alerts,
            scheduled_alerts,
        }
    }

    pub fn queries(&self) -> MonitorQueries {
        MonitorQueries {
            latest_rx: self.sampler.watch(),
            storage: self.storage.clone(),
        }
    }

    pub fn sampler(&self) -> &SamplerHandle {
        &self.sampler
    }

    pub fn storage(&self) -> Option<&StorageHandle> {
        self.storage.as_ref()
    }

    pub fn fast_alerts(&self) -> Option<&AlertHandle> {
        self.fast_alerts.as_ref()
    }

    pub fn scheduled_alerts(&self) -> Option<&ScheduledHandle> {
        self.scheduled_alerts.as_ref()
    }

    /// Stop producers first, then consumers, then the store
    pub async fn shutdown(self) -> Result<()> {
        self.sampler.shutdown().await?;

        if let Some(scheduled) = &self.scheduled_alerts {
            scheduled.shutdown().await?;
        }
        if let Some(fast) = &self.fast_alerts {
            // may already be gone once the snapshot channel closed
            if let Err(e) = fast.shutdown().await {
                debug!("fast alert actor already stopped: {e}");
            }
        }
        if let Some(storage) = &self.storage {
            if let Err(e) = storage.shutdown().await {
                debug!("storage actor already stopped: {e}");
            }
        }

        info!("pipeline stopped");
        Ok(())
    }
}
