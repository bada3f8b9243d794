use std::future::Future;
use std::time::Duration;

pub const CPU_THRESHOLD: &str = "CPU_THRESHOLD";
pub const MEMORY_THRESHOLD: &str = "MEMORY_THRESHOLD";
pub const DISK_THRESHOLD: &str = "DISK_THRESHOLD";

/// Sampling interval in milliseconds
pub const MONITOR_INTERVAL: &str = "MONITOR_INTERVAL";

pub const MONITOR_HOSTNAME: &str = "MONITOR_HOSTNAME";

pub const TELEGRAM_BOT_TOKEN: &str = "TELEGRAM_BOT_TOKEN";
pub const TELEGRAM_CHAT_ID: &str = "TELEGRAM_CHAT_ID";

const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Look up a variable in the process environment, ignoring empty values
pub fn env_lookup(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.trim().is_empty())
}

pub fn parse_threshold(raw: &str) -> Option<f64> {
    raw.trim().parse::<f64>().ok().filter(|value| value.is_finite())
}

/// Parse a millisecond interval into whole seconds (at least one)
pub fn parse_interval_ms(raw: &str) -> Option<u64> {
    let millis = raw.trim().parse::<u64>().ok()?;
    Some((millis / 1000).max(1))
}

/// Whole gigabytes, rounded
pub fn round_gb(bytes: u64) -> u64 {
    (bytes as f64 / BYTES_PER_GB).round() as u64
}

/// `part / total` as a rounded integer percentage (0 when total is 0)
pub fn rounded_percent(part: u64, total: u64) -> u32 {
    if total == 0 {
        return 0;
    }
    ((part as f64 / total as f64) * 100.0).round() as u32
}

/// Run a future with an upper bound on its duration. `None` means it timed out.
pub async fn bounded<F, T>(limit: Duration, future: F) -> Option<T>
where
    F: Future<Output = T>,
{
    tokio::time::timeout(limit, future).await.ok()
}
