//! Text and JSON rendering of command results.

use anyhow::Result;
use serde::Serialize;

use nanny_core::{Notification, Whitelist};
use nanny_monitor::{Exemption, KillReport, NotificationOutcome, Outcome, ScanReport};

const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn gib(bytes: u64) -> String {
    format!("{:.2} GiB", bytes as f64 / GIB)
}

fn describe_alert(alert: &NotificationOutcome) -> String {
    match alert {
        NotificationOutcome::Delivered { address } => format!("emailed {address}"),
        NotificationOutcome::Quiet => "recorded, email skipped (quiet)".to_string(),
        NotificationOutcome::Unconfigured => "recorded, no mail transport".to_string(),
        NotificationOutcome::NoAddress => "recorded, WARNING: no email address".to_string(),
        NotificationOutcome::DeliveryFailed { error, .. } => {
            format!("recorded, WARNING: email failed: {error}")
        }
        NotificationOutcome::Suppressed => "already notified recently".to_string(),
        NotificationOutcome::RecordFailed { error } => {
            format!("WARNING: violation not recorded: {error}")
        }
    }
}

pub fn kill_report_lines(report: &KillReport) -> Vec<String> {
    let head = format!(
        "{}@{}: {:.1}% ({}) limit {:.1}%",
        report.user,
        report.node,
        report.usage.percentage,
        gib(report.usage.memory),
        report.limit
    );

    match &report.outcome {
        Outcome::WithinLimit => vec![format!("{head} - within limit")],
        Outcome::Exempt { exemption } => {
            let scope = match exemption {
                Exemption::Global(_) => "global",
                Exemption::Scoped(_) => "scoped",
            };
            let until = exemption
                .entry()
                .end_time
                .map_or_else(|| "permanently".to_string(), |t| format!("until {}", t.to_rfc3339()));
            vec![format!(
                "{head} - EXCEEDED, whitelisted ({scope} entry #{}, {until})",
                exemption.entry().id
            )]
        }
        Outcome::Grace => vec![format!("{head} - EXCEEDED during grace period, rechecked next pass")],
        Outcome::Enforced {
            terminated,
            vanished,
            spared,
            failures,
            alert,
            ..
        } => {
            let mut lines = vec![format!(
                "{head} - EXCEEDED, terminated {} process(es), {}",
                terminated.len(),
                describe_alert(alert)
            )];
            if !vanished.is_empty() {
                lines.push(format!("  already exited: {vanished:?}"));
            }
            if !spared.is_empty() {
                lines.push(format!("  left running: {spared:?}"));
            }
            for failure in failures {
                lines.push(format!("  pid {}: {}", failure.pid, failure.reason));
            }
            lines
        }
    }
}

pub fn print_kill(report: &KillReport) {
    for line in kill_report_lines(report) {
        println!("{line}");
    }
}

pub fn print_scan(scan: &ScanReport) {
    println!(
        "{}: {} user(s) checked at {}, limit {:.1}%",
        scan.node,
        scan.reports.len() + scan.failures.len(),
        scan.checked_at.to_rfc3339(),
        scan.limit
    );
    println!(
        "  host: {} process(es), {} in use ({:.1}%)",
        scan.system.process_count,
        gib(scan.system.memory),
        scan.system.percentage
    );
    for report in scan.violations() {
        print_kill(report);
    }
    for failure in &scan.failures {
        println!("{}: evaluation failed: {}", failure.user, failure.error);
    }
}

pub fn whitelist_line(entry: &Whitelist) -> String {
    let who = if entry.global {
        "*".to_string()
    } else {
        format!(
            "{}@{}",
            entry.user.as_deref().unwrap_or("?"),
            entry.node.as_deref().unwrap_or("?")
        )
    };
    let until = entry
        .end_time
        .map_or_else(|| "permanent".to_string(), |t| t.to_rfc3339());
    format!("#{:<5} {:<28} {} -> {}", entry.id, who, entry.start_time.to_rfc3339(), until)
}

pub fn print_whitelist(entries: &[Whitelist]) {
    if entries.is_empty() {
        println!("No whitelist entries in effect.");
        return;
    }
    for entry in entries {
        println!("{}", whitelist_line(entry));
    }
}

pub fn print_history(records: &[Notification]) {
    if records.is_empty() {
        println!("No notifications found.");
        return;
    }
    for n in records {
        println!(
            "{}  {:<12} {:<16} {:>6.1}% of {:>5.1}%  {}",
            n.time.to_rfc3339(),
            n.user,
            n.node,
            n.percentage,
            n.limit,
            gib(n.memory)
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use nanny_monitor::{TerminationFailure, UsageResult};

    fn report(outcome: Outcome) -> KillReport {
        KillReport {
            user: "alice".into(),
            node: "login1".into(),
            limit: 50.0,
            checked_at: Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
            usage: UsageResult {
                percentage: 55.0,
                memory: 2 * 1024 * 1024 * 1024,
                ..UsageResult::empty("alice")
            },
            outcome,
        }
    }

    #[test]
    fn enforced_report_lists_failures() {
        let lines = kill_report_lines(&report(Outcome::Enforced {
            terminated: vec![11, 13],
            vanished: vec![],
            spared: vec![],
            failures: vec![TerminationFailure {
                pid: 17,
                reason: "operation not permitted".into(),
            }],
            notification: None,
            alert: NotificationOutcome::NoAddress,
        }));
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("alice@login1: 55.0% (2.00 GiB) limit 50.0%"));
        assert!(lines[0].contains("terminated 2 process(es)"));
        assert!(lines[0].contains("no email address"));
        assert_eq!(lines[1], "  pid 17: operation not permitted");
    }

    #[test]
    fn grace_outcome_is_one_line() {
        let lines = kill_report_lines(&report(Outcome::Grace));
        assert_eq!(lines.len(), 1);
        assert!(lines[0].ends_with("EXCEEDED during grace period, rechecked next pass"));
    }

    #[test]
    fn global_entry_renders_as_wildcard() {
        let entry = Whitelist {
            id: 3,
            user: None,
            node: None,
            start_time: Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap(),
            end_time: None,
            global: true,
        };
        let line = whitelist_line(&entry);
        assert!(line.contains(" * "));
        assert!(line.ends_with("permanent"));
    }
}
