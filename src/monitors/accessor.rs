//! Accessors for raw host readings
//!
//! The sampler only talks to the two traits here, so tests can drive it
//! with scripted readings while production uses `sysinfo`.

use std::fmt;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use sysinfo::{Disks, ProcessesToUpdate, System, Users};
use tracing::{debug, trace};

/// Raw system-wide reading in bytes
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SystemReading {
    /// Global CPU load in percent
    pub cpu_load: f32,
    pub core_count: usize,
    pub memory_total: u64,
    pub memory_used: u64,
    /// Memory available without swapping, if the platform reports it
    pub memory_available: Option<u64>,
    pub filesystems: Vec<FilesystemReading>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FilesystemReading {
    pub mount: String,
    pub total: u64,
    pub used: u64,
}

/// One running process
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessInfo {
    pub pid: u32,
    pub name: String,
    pub user: String,
    /// CPU usage in percent of one core
    pub cpu: f32,
    /// Resident memory in percent of total memory
    pub mem: f32,
    pub command: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AccessorError {
    /// The underlying source failed
    Unavailable(String),
    /// The call did not complete within its time bound
    Timeout,
    /// The source answered but had nothing usable
    NoData(&'static str),
}

impl fmt::Display for AccessorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccessorError::Unavailable(msg) => write!(f, "metrics source unavailable: {msg}"),
            AccessorError::Timeout => write!(f, "metrics source timed out"),
            AccessorError::NoData(what) => write!(f, "metrics source reported no {what}"),
        }
    }
}

impl std::error::Error for AccessorError {}

#[async_trait]
pub trait MetricsAccessor: Send + Sync {
    async fn read(&self) -> Result<SystemReading, AccessorError>;
}

#[async_trait]
pub trait ProcessAccessor: Send + Sync {
    async fn list_processes(&self) -> Result<Vec<ProcessInfo>, AccessorError>;
}

/// `sysinfo` based accessor for the local host
///
/// CPU figures are deltas between refreshes, so the first read refreshes
/// twice with the minimum update interval in between.
#[derive(Clone)]
pub struct SysinfoAccessor {
    system: Arc<Mutex<Probe>>,
}

struct Probe {
    system: System,
    cpu_primed: bool,
    processes_primed: bool,
}

impl SysinfoAccessor {
    pub fn new() -> Self {
        Self {
            system: Arc::new(Mutex::new(Probe {
                system: System::new(),
                cpu_primed: false,
                processes_primed: false,
            })),
        }
    }

    async fn with_probe<T, F>(&self, f: F) -> Result<T, AccessorError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Probe) -> Result<T, AccessorError> + Send + 'static,
    {
        let system = self.system.clone();
        tokio::task::spawn_blocking(move || {
            let mut probe = system
                .lock()
                .map_err(|_| AccessorError::Unavailable("sysinfo state poisoned".to_string()))?;
            f(&mut probe)
        })
        .await
        .map_err(|e| AccessorError::Unavailable(e.to_string()))?
    }
}

impl Default for SysinfoAccessor {
    fn default() -> Self {
        Self::new()
    }
}

fn read_system(probe: &mut Probe) -> Result<SystemReading, AccessorError> {
    let sys = &mut probe.system;

    sys.refresh_cpu_usage();
    if !probe.cpu_primed {
        std::thread::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL);
        sys.refresh_cpu_usage();
        probe.cpu_primed = true;
    }
    sys.refresh_memory();

    let memory_total = sys.total_memory();
    if memory_total == 0 {
        return Err(AccessorError::NoData("memory figures"));
    }

    let available = sys.available_memory();
    let disks = Disks::new_with_refreshed_list();
    let filesystems = disks
        .list()
        .iter()
        .map(|disk| FilesystemReading {
            mount: mount_string(disk.mount_point()),
            total: disk.total_space(),
            used: disk.total_space().saturating_sub(disk.available_space()),
        })
        .collect();

    let reading = SystemReading {
        cpu_load: sys.global_cpu_usage(),
        core_count: sys.cpus().len(),
        memory_total,
        memory_used: sys.used_memory(),
        memory_available: (available > 0).then_some(available),
        filesystems,
    };

    trace!("system reading: {reading:?}");
    Ok(reading)
}

fn read_processes(probe: &mut Probe) -> Result<Vec<ProcessInfo>, AccessorError> {
    let sys = &mut probe.system;

    sys.refresh_memory();
    sys.refresh_processes(ProcessesToUpdate::All, true);
    if !probe.processes_primed {
        std::thread::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL);
        sys.refresh_processes(ProcessesToUpdate::All, true);
        probe.processes_primed = true;
    }

    let total_memory = sys.total_memory().max(1) as f64;
    let users = Users::new_with_refreshed_list();

    let processes: Vec<ProcessInfo> = sys
        .processes()
        .iter()
        .map(|(pid, process)| {
            let user = process
                .user_id()
                .and_then(|uid| users.get_user_by_id(uid))
                .map(|user| user.name().to_string())
                .unwrap_or_default();

            let command = process
                .cmd()
                .iter()
                .map(|arg| arg.to_string_lossy())
                .collect::<Vec<_>>()
                .join(" ");

            ProcessInfo {
                pid: pid.as_u32(),
                name: process.name().to_string_lossy().to_string(),
                user,
                cpu: process.cpu_usage(),
                mem: (process.memory() as f64 / total_memory * 100.0) as f32,
                command,
            }
        })
        .collect();

    debug!("enumerated {} processes", processes.len());
    Ok(processes)
}

fn mount_string(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

#[async_trait]
impl MetricsAccessor for SysinfoAccessor {
    async fn read(&self) -> Result<SystemReading, AccessorError> {
        self.with_probe(read_system).await
    }
}

#[async_trait]
impl ProcessAccessor for SysinfoAccessor {
    async fn list_processes(&self) -> Result<Vec<ProcessInfo>, AccessorError> {
        self.with_probe(read_processes).await
    }
}
