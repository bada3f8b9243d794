use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use tracing::trace;

use crate::ResourceKind;
use crate::util::{
    self, CPU_THRESHOLD, DISK_THRESHOLD, MEMORY_THRESHOLD, MONITOR_HOSTNAME, MONITOR_INTERVAL,
    TELEGRAM_BOT_TOKEN, TELEGRAM_CHAT_ID,
};

/// Storage backend configuration
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StorageConfig {
    /// No history at all; the scheduled path evaluates instantaneous values
    #[serde(rename = "none")]
    None,

    /// Bounded in-memory history (lost on restart)
    Memory {
        #[serde(default = "default_retention_days")]
        retention_days: u32,

        #[serde(default = "default_cleanup_interval_hours")]
        cleanup_interval_hours: u32,
    },

    /// SQLite database (default)
    Sqlite {
        /// Path to the SQLite database file
        #[serde(default = "default_sqlite_path")]
        path: PathBuf,

        /// Retention period in days (metrics older than this are deleted)
        #[serde(default = "default_retention_days")]
        retention_days: u32,

        #[serde(default = "default_cleanup_interval_hours")]
        cleanup_interval_hours: u32,
    },
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::Sqlite {
            path: default_sqlite_path(),
            retention_days: default_retention_days(),
            cleanup_interval_hours: default_cleanup_interval_hours(),
        }
    }
}

impl StorageConfig {
    pub fn retention_days(&self) -> Option<u32> {
        match self {
            StorageConfig::None => None,
            StorageConfig::Memory { retention_days, .. }
            | StorageConfig::Sqlite { retention_days, .. } => Some(*retention_days),
        }
    }

    pub fn cleanup_interval(&self) -> Duration {
        let hours = match self {
            StorageConfig::None => default_cleanup_interval_hours(),
            StorageConfig::Memory {
                cleanup_interval_hours,
                ..
            }
            | StorageConfig::Sqlite {
                cleanup_interval_hours,
                ..
            } => *cleanup_interval_hours,
        };
        Duration::from_secs(u64::from(hours.max(1)) * 3600)
    }
}

fn default_sqlite_path() -> PathBuf {
    PathBuf::from("./health-monitor.db")
}

fn default_retention_days() -> u32 {
    7
}

fn default_cleanup_interval_hours() -> u32 {
    24
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct Config {
    /// Name used in alert messages (defaults to the system host name)
    #[serde(default)]
    pub hostname: Option<String>,

    /// Upper bound for every external call (accessor, storage, notifier)
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,

    #[serde(default)]
    pub sampling: SamplingConfig,

    #[serde(default)]
    pub thresholds: Thresholds,

    #[serde(default)]
    pub alerting: AlertingConfig,

    #[serde(default)]
    pub storage: StorageConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            hostname: None,
            call_timeout_secs: default_call_timeout_secs(),
            sampling: SamplingConfig::default(),
            thresholds: Thresholds::default(),
            alerting: AlertingConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct SamplingConfig {
    #[serde(default = "default_sampling_interval")]
    pub interval_secs: u64,

    /// Minimum spacing between persisted samples (0 persists every sample)
    #[serde(default = "default_persist_interval")]
    pub persist_interval_secs: u64,

    /// How many processes to attach to a high-usage reading
    #[serde(default = "default_top_processes")]
    pub top_processes: usize,

    /// Usage percentage above which processes are enumerated
    #[serde(default = "default_inspect_floor")]
    pub inspect_floor: u32,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_sampling_interval(),
            persist_interval_secs: default_persist_interval(),
            top_processes: default_top_processes(),
            inspect_floor: default_inspect_floor(),
        }
    }
}

impl SamplingConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }

    pub fn persist_interval(&self) -> Duration {
        Duration::from_secs(self.persist_interval_secs)
    }
}

fn default_sampling_interval() -> u64 {
    5
}

fn default_persist_interval() -> u64 {
    60
}

fn default_top_processes() -> usize {
    3
}

fn default_inspect_floor() -> u32 {
    50
}

/// Alert thresholds in percent. An explicit `null` disables the kind.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct Thresholds {
    #[serde(default = "default_threshold")]
    pub cpu: Option<f64>,

    #[serde(default = "default_threshold")]
    pub memory: Option<f64>,

    #[serde(default = "default_threshold")]
    pub disk: Option<f64>,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            cpu: default_threshold(),
            memory: default_threshold(),
            disk: default_threshold(),
        }
    }
}

impl Thresholds {
    pub fn for_kind(&self, kind: ResourceKind) -> Result<f64, ConfigError> {
        let value = match kind {
            ResourceKind::Cpu => self.cpu,
            ResourceKind::Memory => self.memory,
            ResourceKind::Disk => self.disk,
        };

        let Some(value) = value else {
            return Err(ConfigError::MissingThreshold(kind));
        };

        if !value.is_finite() || !(0.0..=100.0).contains(&value) {
            return Err(ConfigError::InvalidThreshold { kind, value });
        }

        Ok(value)
    }

    /// Thresholds for every kind that is usable, plus the reasons the others are not
    pub fn resolve(&self) -> (BTreeMap<ResourceKind, f64>, Vec<ConfigError>) {
        let mut enabled = BTreeMap::new();
        let mut errors = Vec::new();

        for kind in ResourceKind::ALL {
            match self.for_kind(kind) {
                Ok(value) => {
                    enabled.insert(kind, value);
                }
                Err(e) => errors.push(e),
            }
        }

        (enabled, errors)
    }

    fn set(&mut self, kind: ResourceKind, value: f64) {
        match kind {
            ResourceKind::Cpu => self.cpu = Some(value),
            ResourceKind::Memory => self.memory = Some(value),
            ResourceKind::Disk => self.disk = Some(value),
        }
    }
}

fn default_threshold() -> Option<f64> {
    Some(80.0)
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct AlertingConfig {
    /// Where alerts go. Without a channel, alerting is disabled.
    #[serde(default)]
    pub channel: Option<AlertChannel>,

    #[serde(default = "default_fast_cooldown")]
    pub fast_cooldown_secs: u64,

    #[serde(default = "default_scheduled_cooldown")]
    pub scheduled_cooldown_secs: u64,

    #[serde(default = "default_scheduled_interval")]
    pub scheduled_interval_secs: u64,

    #[serde(default = "default_window_minutes")]
    pub window_minutes: u32,

    /// Samples required in the window before the average is trusted
    #[serde(default = "default_min_samples")]
    pub min_samples: u64,
}

impl Default for AlertingConfig {
    fn default() -> Self {
        Self {
            channel: None,
            fast_cooldown_secs: default_fast_cooldown(),
            scheduled_cooldown_secs: default_scheduled_cooldown(),
            scheduled_interval_secs: default_scheduled_interval(),
            window_minutes: default_window_minutes(),
            min_samples: default_min_samples(),
        }
    }
}

impl AlertingConfig {
    pub fn fast_cooldown(&self) -> Duration {
        Duration::from_secs(self.fast_cooldown_secs)
    }

    pub fn scheduled_cooldown(&self) -> Duration {
        Duration::from_secs(self.scheduled_cooldown_secs)
    }

    pub fn scheduled_interval(&self) -> Duration {
        Duration::from_secs(self.scheduled_interval_secs.max(1))
    }
}

fn default_fast_cooldown() -> u64 {
    60
}

fn default_scheduled_cooldown() -> u64 {
    15 * 60
}

fn default_scheduled_interval() -> u64 {
    15 * 60
}

fn default_window_minutes() -> u32 {
    5
}

fn default_min_samples() -> u64 {
    3
}

fn default_call_timeout_secs() -> u64 {
    10
}

#[derive(Debug, Clone, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertChannel {
    Discord(Discord),
    Webhook(Webhook),
    Telegram(Telegram),
}

impl AlertChannel {
    pub fn name(&self) -> &'static str {
        match self {
            AlertChannel::Discord(_) => "discord",
            AlertChannel::Webhook(_) => "webhook",
            AlertChannel::Telegram(_) => "telegram",
        }
    }
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct Webhook {
    pub url: String,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct Discord {
    pub url: String,
    pub user_id: Option<String>,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct Telegram {
    #[serde(default)]
    pub bot_token: Option<String>,

    #[serde(default)]
    pub chat_id: Option<String>,

    #[serde(default = "default_telegram_api")]
    pub api_base: String,
}

impl Default for Telegram {
    fn default() -> Self {
        Self {
            bot_token: None,
            chat_id: None,
            api_base: default_telegram_api(),
        }
    }
}

fn default_telegram_api() -> String {
    String::from("https://api.telegram.org")
}

impl Config {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs.max(1))
    }

    /// Apply overrides from the process environment
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(util::env_lookup);
    }

    /// Apply overrides from an arbitrary variable source
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        for (kind, key) in [
            (ResourceKind::Cpu, CPU_THRESHOLD),
            (ResourceKind::Memory, MEMORY_THRESHOLD),
            (ResourceKind::Disk, DISK_THRESHOLD),
        ] {
            if let Some(value) = lookup(key).as_deref().and_then(util::parse_threshold) {
                trace!("{key} overrides {kind} threshold: {value}");
                self.thresholds.set(kind, value);
            }
        }

        if let Some(secs) = lookup(MONITOR_INTERVAL)
            .as_deref()
            .and_then(util::parse_interval_ms)
        {
            self.sampling.interval_secs = secs;
        }

        if let Some(hostname) = lookup(MONITOR_HOSTNAME) {
            self.hostname = Some(hostname);
        }

        let token = lookup(TELEGRAM_BOT_TOKEN);
        let chat_id = lookup(TELEGRAM_CHAT_ID);
        match &mut self.alerting.channel {
            Some(AlertChannel::Telegram(telegram)) => {
                if telegram.bot_token.is_none() {
                    telegram.bot_token = token;
                }
                if telegram.chat_id.is_none() {
                    telegram.chat_id = chat_id;
                }
            }
            None if token.is_some() || chat_id.is_some() => {
                self.alerting.channel = Some(AlertChannel::Telegram(Telegram {
                    bot_token: token,
                    chat_id,
                    ..Telegram::default()
                }));
            }
            _ => {}
        }
    }
}

pub fn read_config_file(path: &str) -> anyhow::Result<Config> {
    let file_content =
        std::fs::read_to_string(path).with_context(|| format!("failed to read {path}"))?;
    serde_json::from_str(&file_content)
        .map_err(|e| anyhow::anyhow!("Invalid configuration file provided: {e}"))
        .inspect(|config| trace!("loaded config: {config:?}"))
}

/// Load the config file (or defaults) and apply environment overrides
pub fn load_config(path: Option<&str>) -> anyhow::Result<Config> {
    let mut config = match path {
        Some(path) => read_config_file(path)?,
        None => Config::default(),
    };
    config.apply_env_overrides();
    Ok(config)
}

/// Configuration problems that disable part of the pipeline at startup
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// Threshold explicitly unset
    MissingThreshold(ResourceKind),

    /// Threshold outside 0..=100
    InvalidThreshold { kind: ResourceKind, value: f64 },

    /// Notification channel lacks a required credential
    MissingCredential {
        channel: &'static str,
        field: &'static str,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::MissingThreshold(kind) => {
                write!(f, "no threshold configured for {kind}")
            }
            ConfigError::InvalidThreshold { kind, value } => {
                write!(f, "invalid {kind} threshold {value} (expected 0-100)")
            }
            ConfigError::MissingCredential { channel, field } => {
                write!(f, "{channel} alert channel is missing `{field}`")
            }
        }
    }
}

impl std::error::Error for ConfigError {}
