//! Per-user aggregation of a process snapshot.
//!
//! Totals are plain sums: memory in bytes and each process's individual
//! percentage. Results keep the order in which users were first seen.

use indexmap::IndexMap;
use serde::Serialize;

use crate::snapshot::ProcessRecord;

/// Aggregate usage for one user during one pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UsageResult {
    pub user: String,
    pub memory: u64,
    pub percentage: f64,
    pub processes: Vec<ProcessRecord>,
}

impl UsageResult {
    pub fn empty(user: &str) -> Self {
        Self {
            user: user.to_string(),
            memory: 0,
            percentage: 0.0,
            processes: Vec::new(),
        }
    }

    fn push(&mut self, record: &ProcessRecord) {
        self.memory = self.memory.saturating_add(record.memory);
        self.percentage += record.percentage;
        self.processes.push(record.clone());
    }

    pub fn exceeds(&self, limit: f64) -> bool {
        self.percentage > limit
    }
}

/// Whole-host totals.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct SystemUsage {
    pub memory: u64,
    pub percentage: f64,
    pub process_count: usize,
    pub user_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope<'a> {
    All,
    User(&'a str),
}

/// Group `processes` by owner.
///
/// With [`Scope::User`] exactly one result is returned, zeroed when the
/// user has no processes.
pub fn aggregate(processes: &[ProcessRecord], scope: Scope<'_>) -> Vec<UsageResult> {
    match scope {
        Scope::User(user) => vec![user_usage(processes, user)],
        Scope::All => {
            let mut by_user: IndexMap<&str, UsageResult> = IndexMap::new();
            for record in processes {
                by_user
                    .entry(record.user.as_str())
                    .or_insert_with(|| UsageResult::empty(&record.user))
                    .push(record);
            }
            by_user.into_values().collect()
        }
    }
}

pub fn user_usage(processes: &[ProcessRecord], user: &str) -> UsageResult {
    let mut usage = UsageResult::empty(user);
    for record in processes.iter().filter(|r| r.user == user) {
        usage.push(record);
    }
    usage
}

pub fn system_usage(processes: &[ProcessRecord]) -> SystemUsage {
    let mut users: Vec<&str> = processes.iter().map(|r| r.user.as_str()).collect();
    users.sort_unstable();
    users.dedup();

    SystemUsage {
        memory: processes.iter().fold(0u64, |acc, r| acc.saturating_add(r.memory)),
        percentage: processes.iter().map(|r| r.percentage).sum(),
        process_count: processes.len(),
        user_count: users.len(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn proc(pid: u32, user: &str, memory: u64, percentage: f64) -> ProcessRecord {
        ProcessRecord {
            pid,
            user: user.to_string(),
            node: "login1".to_string(),
            memory,
            percentage,
        }
    }

    fn sample() -> Vec<ProcessRecord> {
        vec![
            proc(10, "carol", 100, 1.0),
            proc(11, "alice", 3000, 30.0),
            proc(12, "carol", 200, 2.0),
            proc(13, "alice", 2500, 25.0),
        ]
    }

    #[test]
    fn all_scope_sums_per_user_in_first_seen_order() {
        let results = aggregate(&sample(), Scope::All);
        let users: Vec<&str> = results.iter().map(|r| r.user.as_str()).collect();
        assert_eq!(users, vec!["carol", "alice"]);

        let alice = &results[1];
        assert_eq!(alice.memory, 5500);
        assert!((alice.percentage - 55.0).abs() < 1e-9);
        let pids: Vec<u32> = alice.processes.iter().map(|p| p.pid).collect();
        assert_eq!(pids, vec![11, 13]);
    }

    #[test]
    fn user_scope_returns_single_result() {
        let results = aggregate(&sample(), Scope::User("carol"));
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].memory, 300);
        assert_eq!(results[0].processes.len(), 2);
    }

    #[test]
    fn user_without_processes_is_zero_not_error() {
        let usage = user_usage(&sample(), "fake_username");
        assert_eq!(usage, UsageResult::empty("fake_username"));
        assert!(!usage.exceeds(0.0));
    }

    #[test]
    fn exceeds_is_strict() {
        let mut usage = UsageResult::empty("alice");
        usage.percentage = 50.0;
        assert!(!usage.exceeds(50.0));
        assert!(usage.exceeds(49.9));
    }

    #[test]
    fn system_totals() {
        let total = system_usage(&sample());
        assert_eq!(total.memory, 5800);
        assert_eq!(total.process_count, 4);
        assert_eq!(total.user_count, 2);
        assert!((total.percentage - 58.0).abs() < 1e-9);
    }
}
