//! Process enumeration and signalling on the local host.
//!
//! [`ProcessTable`] is the seam between the engine and the operating
//! system. [`SysinfoTable`] is the real implementation; tests substitute a
//! scripted table.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sysinfo::{
    Pid, ProcessRefreshKind, ProcessStatus, ProcessesToUpdate, Signal, System, Uid, UpdateKind,
    Users,
};
use tracing::debug;

use crate::error::MonitorError;

/// One process as seen during a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessRecord {
    pub pid: u32,
    pub user: String,
    pub node: String,
    /// Resident memory in bytes.
    pub memory: u64,
    /// Resident memory as a percentage of total host memory.
    pub percentage: f64,
}

/// Result of signalling a single process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Termination {
    Signalled,
    /// The pid is gone, or now belongs to someone else.
    NotFound,
    Failed(String),
}

/// Host-level process inspection and signalling.
pub trait ProcessTable: Send + Sync {
    /// Name this host reports for its processes.
    fn node_name(&self) -> String;

    /// All processes currently visible. Processes that vanish while being
    /// read are left out rather than reported as errors.
    fn list(&self) -> Vec<ProcessRecord>;

    /// Send a termination signal to `process`, provided it still exists and
    /// is still owned by `process.user`.
    fn terminate(&self, process: &ProcessRecord) -> Termination;
}

/// Processes captured at one instant.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessSnapshot {
    pub node: String,
    pub captured_at: DateTime<Utc>,
    pub processes: Vec<ProcessRecord>,
}

impl ProcessSnapshot {
    pub fn capture(table: &dyn ProcessTable) -> Self {
        let processes = table.list();
        debug!(count = processes.len(), "process snapshot captured");
        Self {
            node: table.node_name(),
            captured_at: Utc::now(),
            processes,
        }
    }

    /// Capture on the blocking pool; process tables read `/proc`.
    pub async fn capture_blocking(table: Arc<dyn ProcessTable>) -> Result<Self, MonitorError> {
        tokio::task::spawn_blocking(move || Self::capture(table.as_ref()))
            .await
            .map_err(|e| MonitorError::Inspect(e.to_string()))
    }
}

// ── sysinfo-backed table ─────────────────────────────────────────────

/// Reads the live process table through `sysinfo`.
#[derive(Debug, Clone)]
pub struct SysinfoTable {
    node: String,
}

impl SysinfoTable {
    /// `node` overrides the host name reported for every process.
    pub fn new(node: Option<String>) -> Self {
        let node = node
            .or_else(System::host_name)
            .unwrap_or_else(|| "localhost".to_string());
        Self { node }
    }
}

impl Default for SysinfoTable {
    fn default() -> Self {
        Self::new(None)
    }
}

fn owner_name(users: &Users, uid: &Uid) -> String {
    // Directory users (LDAP, SSSD) may be missing from the local list.
    users
        .get_user_by_id(uid)
        .map(|u| u.name().to_string())
        .unwrap_or_else(|| (**uid).to_string())
}

fn percent_of(bytes: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    bytes as f64 / total as f64 * 100.0
}

impl ProcessTable for SysinfoTable {
    fn node_name(&self) -> String {
        self.node.clone()
    }

    fn list(&self) -> Vec<ProcessRecord> {
        let mut sys = System::new();
        sys.refresh_memory();
        sys.refresh_processes_specifics(
            ProcessesToUpdate::All,
            true,
            ProcessRefreshKind::new()
                .with_memory()
                .with_user(UpdateKind::OnlyIfNotSet),
        );
        let users = Users::new_with_refreshed_list();
        let total = sys.total_memory();

        let mut records: Vec<ProcessRecord> = sys
            .processes()
            .iter()
            .filter_map(|(pid, process)| {
                // Linux threads appear as tasks carrying the whole group's RSS.
                if process.thread_kind().is_some() {
                    return None;
                }
                if matches!(process.status(), ProcessStatus::Zombie | ProcessStatus::Dead) {
                    debug!(pid = pid.as_u32(), "skipping exited process");
                    return None;
                }
                let Some(uid) = process.user_id() else {
                    debug!(pid = pid.as_u32(), "skipping process without owner");
                    return None;
                };
                Some(ProcessRecord {
                    pid: pid.as_u32(),
                    user: owner_name(&users, uid),
                    node: self.node.clone(),
                    memory: process.memory(),
                    percentage: percent_of(process.memory(), total),
                })
            })
            .collect();
        records.sort_by_key(|r| r.pid);
        records
    }

    fn terminate(&self, target: &ProcessRecord) -> Termination {
        let pid = Pid::from_u32(target.pid);
        let mut sys = System::new();
        sys.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[pid]),
            true,
            ProcessRefreshKind::new().with_user(UpdateKind::Always),
        );

        let Some(process) = sys.process(pid) else {
            return Termination::NotFound;
        };

        let users = Users::new_with_refreshed_list();
        let owner = process.user_id().map(|uid| owner_name(&users, uid));
        if owner.as_deref() != Some(target.user.as_str()) {
            debug!(pid = target.pid, expected = %target.user, "pid now owned by another user");
            return Termination::NotFound;
        }

        match process.kill_with(Signal::Term) {
            Some(true) => Termination::Signalled,
            Some(false) => {
                Termination::Failed("signal was rejected (permission denied or already exiting)".into())
            }
            None => Termination::Failed("SIGTERM is not supported on this platform".into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percent_of_handles_zero_total() {
        assert_eq!(percent_of(100, 0), 0.0);
        assert_eq!(percent_of(25, 100), 25.0);
    }

    #[test]
    fn node_override_is_used() {
        let table = SysinfoTable::new(Some("login1".to_string()));
        assert_eq!(table.node_name(), "login1");
    }

    #[test]
    fn live_table_lists_this_process() {
        let table = SysinfoTable::new(Some("test-node".to_string()));
        let me = std::process::id();
        let records = table.list();
        let own = records.iter().find(|r| r.pid == me);
        assert!(own.is_some(), "own pid {me} missing from snapshot");
        assert!(records.iter().all(|r| r.node == "test-node"));
        assert!(records.windows(2).all(|w| w[0].pid < w[1].pid));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn threads_are_not_listed_as_processes() {
        use std::sync::mpsc;

        let (release, gate) = mpsc::channel::<()>();
        let gate = Arc::new(std::sync::Mutex::new(gate));
        let (report, tids) = mpsc::channel::<u32>();
        let workers: Vec<_> = (0..4)
            .map(|_| {
                let gate = Arc::clone(&gate);
                let report = report.clone();
                std::thread::spawn(move || {
                    // "<pid>/task/<tid>"
                    let link = std::fs::read_link("/proc/thread-self").unwrap();
                    let tid = link.file_name().unwrap().to_str().unwrap().parse().unwrap();
                    report.send(tid).unwrap();
                    let _ = gate.lock().unwrap().recv();
                })
            })
            .collect();
        let tids: Vec<u32> = (0..4).map(|_| tids.recv().unwrap()).collect();

        let me = std::process::id();
        let records = SysinfoTable::new(None).list();
        assert_eq!(records.iter().filter(|r| r.pid == me).count(), 1);
        for tid in &tids {
            assert_ne!(*tid, me);
            assert!(
                records.iter().all(|r| r.pid != *tid),
                "thread {tid} listed as a process"
            );
        }

        drop(release);
        for worker in workers {
            worker.join().unwrap();
        }
    }

    #[test]
    fn terminate_unknown_pid_is_not_found() {
        let table = SysinfoTable::new(None);
        let ghost = ProcessRecord {
            pid: u32::MAX - 7,
            user: "nobody".to_string(),
            node: table.node_name(),
            memory: 0,
            percentage: 0.0,
        };
        assert_eq!(table.terminate(&ghost), Termination::NotFound);
    }
}
