//! Fakes and builders shared by the integration tests

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use health_monitor::alerts::AlertPayload;
use health_monitor::monitors::{
    AccessorError, FilesystemReading, MetricsAccessor, ProcessAccessor, ProcessInfo, SystemReading,
};
use health_monitor::notifier::{Notifier, NotifierError};
use health_monitor::{CpuHealth, DiskHealth, HealthSnapshot, MemoryHealth};

const GB: u64 = 1024 * 1024 * 1024;

/// Reading of a host with 100 GB of memory and a 100 GB root filesystem
pub fn reading(cpu: f32, memory_percent: u64, disk_percent: u64) -> SystemReading {
    SystemReading {
        cpu_load: cpu,
        core_count: 8,
        memory_total: 100 * GB,
        memory_used: memory_percent * GB,
        memory_available: Some((100 - memory_percent) * GB),
        filesystems: vec![FilesystemReading {
            mount: "/".to_string(),
            total: 100 * GB,
            used: disk_percent * GB,
        }],
    }
}

pub fn snapshot_at(timestamp: DateTime<Utc>, cpu: u32, memory: u32, disk: u32) -> HealthSnapshot {
    HealthSnapshot {
        timestamp,
        cpu: CpuHealth {
            usage_percent: cpu,
            core_count: 8,
            top_processes: vec![],
        },
        memory: MemoryHealth {
            usage_percent: memory,
            total_gb: 100,
            used_gb: u64::from(memory),
            free_gb: 100 - u64::from(memory),
            top_processes: vec![],
        },
        disk: DiskHealth {
            usage_percent: disk,
            total_gb: 100,
            used_gb: u64::from(disk),
            free_gb: 100 - u64::from(disk),
            mount_point: "/".to_string(),
        },
    }
}

/// Replays readings in order, then keeps answering with the last one
pub struct ReplayMetrics {
    readings: Mutex<VecDeque<Result<SystemReading, AccessorError>>>,
    last: Mutex<Option<SystemReading>>,
}

impl ReplayMetrics {
    pub fn new(readings: Vec<Result<SystemReading, AccessorError>>) -> Self {
        Self {
            readings: Mutex::new(readings.into()),
            last: Mutex::new(None),
        }
    }

    pub fn cpu_sequence(values: &[f32]) -> Self {
        Self::new(values.iter().map(|cpu| Ok(reading(*cpu, 40, 30))).collect())
    }
}

#[async_trait]
impl MetricsAccessor for ReplayMetrics {
    async fn read(&self) -> Result<SystemReading, AccessorError> {
        let next = self.readings.lock().unwrap().pop_front();
        match next {
            Some(Ok(reading)) => {
                *self.last.lock().unwrap() = Some(reading.clone());
                Ok(reading)
            }
            Some(Err(e)) => Err(e),
            None => self
                .last
                .lock()
                .unwrap()
                .clone()
                .ok_or(AccessorError::NoData("replay exhausted")),
        }
    }
}

/// Never answers within any sensible timeout
pub struct StalledMetrics;

#[async_trait]
impl MetricsAccessor for StalledMetrics {
    async fn read(&self) -> Result<SystemReading, AccessorError> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Err(AccessorError::Timeout)
    }
}

pub struct FixedProcesses(pub Vec<ProcessInfo>);

#[async_trait]
impl ProcessAccessor for FixedProcesses {
    async fn list_processes(&self) -> Result<Vec<ProcessInfo>, AccessorError> {
        Ok(self.0.clone())
    }
}

pub fn process(pid: u32, name: &str, cpu: f32, mem: f32) -> ProcessInfo {
    ProcessInfo {
        pid,
        name: name.to_string(),
        user: "app".to_string(),
        cpu,
        mem,
        command: format!("/usr/bin/{name}"),
    }
}

/// Collects every payload it is asked to send
#[derive(Default)]
pub struct CapturingNotifier {
    sent: Mutex<Vec<AlertPayload>>,
}

impl CapturingNotifier {
    pub fn sent(&self) -> Vec<AlertPayload> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for CapturingNotifier {
    fn name(&self) -> &'static str {
        "capturing"
    }

    async fn send(&self, payload: &AlertPayload) -> Result<(), NotifierError> {
        self.sent.lock().unwrap().push(payload.clone());
        Ok(())
    }
}

/// Poll `condition` every 10 ms for up to two seconds
pub async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
