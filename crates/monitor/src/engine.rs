//! [`MonitorUtility`]: whitelist management and the enforcement pass.
//!
//! For each user the sequence is strict: exemption lookup, then the kill
//! decision, then notification. Different users are evaluated concurrently
//! within a scan and share no in-memory state.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use futures::future::join_all;
use nanny_core::{NannyError, NewNotification, NewWhitelist, Notification, Whitelist};
use nanny_notify::{AddressResolver, Notifier, TemplateRenderer, ViolationContext};
use nanny_store::{Store, WhitelistSelector};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::aggregate::{aggregate, system_usage, user_usage, Scope, SystemUsage, UsageResult};
use crate::error::MonitorError;
use crate::snapshot::{ProcessRecord, ProcessSnapshot, ProcessTable, Termination};
use crate::tracker::{DedupPolicy, NotificationTracker};
use crate::whitelist::{Exemption, WhitelistEvaluator};

// ── Options and reports ──────────────────────────────────────────────

/// Per-call knobs for `kill` and `scan`.
#[derive(Debug, Clone, PartialEq)]
pub struct KillOptions {
    /// Record the violation but do not send the alert.
    pub quiet: bool,
    /// Processes below this share of host memory are never signalled.
    pub min_process_percent: f64,
    /// Accounts whose processes are never signalled.
    pub protected_users: Vec<String>,
    /// How long `scan` lets a user stay over the limit before enforcing.
    /// Zero enforces on the first snapshot.
    pub grace: std::time::Duration,
}

impl Default for KillOptions {
    fn default() -> Self {
        Self {
            quiet: false,
            min_process_percent: 0.0,
            protected_users: vec!["root".to_string()],
            grace: std::time::Duration::ZERO,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TerminationFailure {
    pub pid: u32,
    pub reason: String,
}

/// What happened to the alert for an enforced violation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum NotificationOutcome {
    Delivered { address: String },
    /// Recorded; delivery skipped at the caller's request.
    Quiet,
    /// Recorded; no delivery channel is configured.
    Unconfigured,
    /// Recorded; the user has no resolvable address.
    NoAddress,
    /// Recorded; rendering or transport failed.
    DeliveryFailed { address: Option<String>, error: String },
    /// Not recorded and not sent: inside the dedup cooldown.
    Suppressed,
    /// The record could not be written, so no alert was attempted.
    RecordFailed { error: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum Outcome {
    WithinLimit,
    /// Over the limit but whitelisted; nothing was signalled.
    Exempt { exemption: Exemption },
    /// Went over the limit during the grace period; checked again next pass.
    Grace,
    Enforced {
        terminated: Vec<u32>,
        /// Gone before they could be signalled.
        vanished: Vec<u32>,
        /// Individually exempt processes that were left running.
        spared: Vec<u32>,
        failures: Vec<TerminationFailure>,
        notification: Option<Notification>,
        alert: NotificationOutcome,
    },
}

/// Result of evaluating one user on one node.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KillReport {
    pub user: String,
    pub node: String,
    pub limit: f64,
    pub checked_at: DateTime<Utc>,
    pub usage: UsageResult,
    pub outcome: Outcome,
}

impl KillReport {
    fn new(
        usage: UsageResult,
        node: &str,
        limit: f64,
        checked_at: DateTime<Utc>,
        outcome: Outcome,
    ) -> Self {
        Self {
            user: usage.user.clone(),
            node: node.to_string(),
            limit,
            checked_at,
            usage,
            outcome,
        }
    }

    pub fn is_violation(&self) -> bool {
        !matches!(self.outcome, Outcome::WithinLimit)
    }

    pub fn terminated(&self) -> &[u32] {
        match &self.outcome {
            Outcome::Enforced { terminated, .. } => terminated,
            _ => &[],
        }
    }

    /// Enforced, but the violation could not be written to history.
    pub fn record_failed(&self) -> bool {
        matches!(
            &self.outcome,
            Outcome::Enforced {
                alert: NotificationOutcome::RecordFailed { .. },
                ..
            }
        )
    }
}

/// A user whose evaluation failed without affecting the rest of the pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserFailure {
    pub user: String,
    pub error: String,
}

/// Result of one full polling pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScanReport {
    pub node: String,
    pub limit: f64,
    pub checked_at: DateTime<Utc>,
    /// Host totals from the snapshot the pass enforced on.
    pub system: SystemUsage,
    pub reports: Vec<KillReport>,
    pub failures: Vec<UserFailure>,
}

impl ScanReport {
    pub fn violations(&self) -> impl Iterator<Item = &KillReport> {
        self.reports.iter().filter(|r| r.is_violation())
    }

    /// Every user was evaluated and every violation was recorded.
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty() && !self.reports.iter().any(KillReport::record_failed)
    }
}

// ── Alerting ─────────────────────────────────────────────────────────

/// Delivery side of the engine: address lookup, rendering, transport.
#[derive(Clone)]
pub struct Alerting {
    notifier: Arc<dyn Notifier>,
    resolver: Arc<dyn AddressResolver>,
    renderer: TemplateRenderer,
}

impl Alerting {
    pub fn new(
        notifier: Arc<dyn Notifier>,
        resolver: Arc<dyn AddressResolver>,
        renderer: TemplateRenderer,
    ) -> Self {
        Self {
            notifier,
            resolver,
            renderer,
        }
    }

    async fn send(&self, record: &Notification, terminated: &[u32]) -> NotificationOutcome {
        let Some(address) = self.resolver.resolve(&record.user) else {
            warn!(user = %record.user, "no email address for user, alert not sent");
            return NotificationOutcome::NoAddress;
        };

        let ctx = ViolationContext::new(
            &record.user,
            &record.node,
            record.memory,
            record.percentage,
            record.limit,
            record.time.to_rfc3339(),
            terminated.to_vec(),
        );
        let message = match self.renderer.render(&ctx) {
            Ok(message) => message,
            Err(e) => {
                warn!(user = %record.user, error = %e, "alert rendering failed");
                return NotificationOutcome::DeliveryFailed {
                    address: Some(address),
                    error: e.to_string(),
                };
            }
        };

        match self.notifier.deliver(&address, &message).await {
            Ok(()) => NotificationOutcome::Delivered { address },
            Err(e) => {
                warn!(
                    user = %record.user,
                    channel = self.notifier.channel_name(),
                    error = %e,
                    "alert delivery failed"
                );
                NotificationOutcome::DeliveryFailed {
                    address: Some(address),
                    error: e.to_string(),
                }
            }
        }
    }
}

// ── Engine ───────────────────────────────────────────────────────────

pub struct MonitorUtility {
    store: Arc<dyn Store>,
    processes: Arc<dyn ProcessTable>,
    whitelist: WhitelistEvaluator,
    tracker: NotificationTracker,
    alerting: Option<Alerting>,
    own_pid: u32,
}

impl MonitorUtility {
    /// Engine without alert delivery and with the default dedup policy.
    pub fn new(store: Arc<dyn Store>, processes: Arc<dyn ProcessTable>) -> Self {
        Self {
            whitelist: WhitelistEvaluator::new(Arc::clone(&store)),
            tracker: NotificationTracker::new(Arc::clone(&store), DedupPolicy::default()),
            store,
            processes,
            alerting: None,
            own_pid: std::process::id(),
        }
    }

    pub fn with_alerting(mut self, alerting: Alerting) -> Self {
        self.alerting = Some(alerting);
        self
    }

    pub fn with_dedup_policy(mut self, policy: DedupPolicy) -> Self {
        self.tracker = NotificationTracker::new(Arc::clone(&self.store), policy);
        self
    }

    /// Name of the node this engine enforces on.
    pub fn node(&self) -> String {
        self.processes.node_name()
    }

    // ── Whitelist management ─────────────────────────────────────────

    /// Whitelist `user` on `node` (or everyone, when `global`) starting now,
    /// replacing any entry already held for the same scope.
    ///
    /// `None` or a zero `duration` makes the entry permanent.
    pub async fn add(
        &self,
        user: Option<&str>,
        node: Option<&str>,
        duration: Option<Duration>,
        global: bool,
    ) -> Result<Whitelist, MonitorError> {
        let entry = NewWhitelist::starting_at(user, node, Utc::now(), duration, global)?;
        let stored = self.store.replace_whitelist(entry).await?;
        info!(
            id = stored.id,
            user = stored.user.as_deref().unwrap_or("*"),
            node = stored.node.as_deref().unwrap_or("*"),
            global = stored.global,
            until = %stored.end_time.map_or_else(|| "forever".to_string(), |t| t.to_rfc3339()),
            "whitelist entry added"
        );
        Ok(stored)
    }

    /// Delete whitelist entries. Global removal drops every global entry and
    /// names no user or node; otherwise both are required. Returns the count.
    pub async fn remove(
        &self,
        user: Option<&str>,
        node: Option<&str>,
        global: bool,
    ) -> Result<u64, MonitorError> {
        let selector = if global {
            if user.is_some() || node.is_some() {
                return Err(NannyError::Validation(
                    "global removal deletes every global entry; \
                     it cannot name a user or node"
                        .to_string(),
                )
                .into());
            }
            WhitelistSelector::Global
        } else {
            match (user, node) {
                (Some(user), Some(node)) if !user.is_empty() && !node.is_empty() => {
                    WhitelistSelector::Scoped {
                        user: user.to_string(),
                        node: node.to_string(),
                    }
                }
                _ => {
                    return Err(NannyError::Validation(
                        "must either specify a user and node name or set global".to_string(),
                    )
                    .into());
                }
            }
        };

        let removed = self.store.delete_whitelist(&selector).await?;
        info!(?selector, removed, "whitelist entries removed");
        Ok(removed)
    }

    /// Entries in effect right now.
    pub async fn whitelist(&self) -> Result<Vec<Whitelist>, MonitorError> {
        Ok(self.whitelist.effective(Utc::now()).await?)
    }

    /// Past notifications, newest first.
    pub async fn history(
        &self,
        user: Option<&str>,
        limit: Option<f64>,
    ) -> Result<Vec<Notification>, MonitorError> {
        Ok(self.tracker.history(user, limit).await?)
    }

    // ── Enforcement ──────────────────────────────────────────────────

    /// Enforce `limit` (percent of host memory) on one user.
    ///
    /// Only the local node can be inspected; naming another one is an error.
    /// The grace period does not apply.
    pub async fn kill(
        &self,
        user: &str,
        node: &str,
        limit: f64,
        options: &KillOptions,
    ) -> Result<KillReport, MonitorError> {
        let local = self.node();
        if node != local {
            return Err(NannyError::Validation(format!(
                "cannot inspect node {node:?} from {local:?}; run kill on that node"
            ))
            .into());
        }

        let snapshot = ProcessSnapshot::capture_blocking(Arc::clone(&self.processes)).await?;
        let on_node: Vec<ProcessRecord> = snapshot
            .processes
            .into_iter()
            .filter(|p| p.node == node)
            .collect();
        let usage = user_usage(&on_node, user);
        self.enforce(usage, node, limit, options).await
    }

    /// One polling pass over every user on this node.
    ///
    /// With a non-zero grace period, a pass that finds users over the limit
    /// waits, takes a second snapshot, and enforces only on users who were
    /// over the limit in both. Storage being unreachable aborts the pass;
    /// any other failure is confined to the user it happened for.
    pub async fn scan(&self, limit: f64, options: &KillOptions) -> Result<ScanReport, MonitorError> {
        if let Err(e) = self.store.health().await {
            error!(backend = self.store.backend_name(), error = %e, "store unavailable, aborting pass");
            return Err(e.into());
        }

        let mut snapshot = ProcessSnapshot::capture_blocking(Arc::clone(&self.processes)).await?;
        let mut pending: HashSet<String> = HashSet::new();
        if !options.grace.is_zero() {
            let first: HashSet<String> = offenders(&snapshot, limit).collect();
            if !first.is_empty() {
                info!(
                    users = first.len(),
                    grace_ms = options.grace.as_millis() as u64,
                    "users over the limit, waiting out the grace period"
                );
                tokio::time::sleep(options.grace).await;
                snapshot = ProcessSnapshot::capture_blocking(Arc::clone(&self.processes)).await?;
                pending = offenders(&snapshot, limit)
                    .filter(|user| !first.contains(user))
                    .collect();
            }
        }

        let node = snapshot.node.clone();
        let system = system_usage(&snapshot.processes);
        let usages = aggregate(&snapshot.processes, Scope::All);
        info!(
            node = %node,
            users = usages.len(),
            processes = snapshot.processes.len(),
            limit,
            "scan started"
        );

        let evaluations = usages.into_iter().map(|usage| {
            let node = node.as_str();
            let deferred = pending.contains(&usage.user);
            async move {
                let user = usage.user.clone();
                let result = if deferred {
                    debug!(
                        user = %user,
                        percentage = usage.percentage,
                        limit,
                        "over the limit only since the grace period began"
                    );
                    Ok(KillReport::new(usage, node, limit, Utc::now(), Outcome::Grace))
                } else {
                    self.enforce(usage, node, limit, options).await
                };
                (user, result)
            }
        });

        let mut reports = Vec::new();
        let mut failures = Vec::new();
        for (user, result) in join_all(evaluations).await {
            match result {
                Ok(report) => reports.push(report),
                Err(e) => {
                    warn!(user = %user, error = %e, "evaluation failed");
                    failures.push(UserFailure {
                        user,
                        error: e.to_string(),
                    });
                }
            }
        }

        Ok(ScanReport {
            node,
            limit,
            checked_at: snapshot.captured_at,
            system,
            reports,
            failures,
        })
    }

    async fn enforce(
        &self,
        usage: UsageResult,
        node: &str,
        limit: f64,
        options: &KillOptions,
    ) -> Result<KillReport, MonitorError> {
        let now = Utc::now();
        let mut report = KillReport::new(usage, node, limit, now, Outcome::WithinLimit);

        if !report.usage.exceeds(limit) {
            debug!(user = %report.user, percentage = report.usage.percentage, limit, "within limit");
            return Ok(report);
        }

        // Never kill on an uncertain exemption status: a lookup failure
        // aborts this user before anything is signalled.
        if let Some(exemption) = self.whitelist.exemption(&report.user, node, now).await? {
            info!(
                user = %report.user,
                node,
                percentage = report.usage.percentage,
                limit,
                entry = exemption.entry().id,
                "limit exceeded but user is whitelisted"
            );
            report.outcome = Outcome::Exempt { exemption };
            return Ok(report);
        }

        let (targets, spared): (Vec<ProcessRecord>, Vec<ProcessRecord>) = report
            .usage
            .processes
            .iter()
            .filter(|p| p.user == report.user && p.node == node)
            .cloned()
            .partition(|p| !self.individually_exempt(p, options));

        let results = self.terminate_all(targets).await?;
        let mut terminated = Vec::new();
        let mut vanished = Vec::new();
        let mut failures = Vec::new();
        for (process, result) in results {
            match result {
                Termination::Signalled => {
                    info!(user = %process.user, pid = process.pid, memory = process.memory, "process terminated");
                    terminated.push(process.pid);
                }
                Termination::NotFound => {
                    debug!(user = %process.user, pid = process.pid, "process already gone");
                    vanished.push(process.pid);
                }
                Termination::Failed(reason) => {
                    warn!(user = %process.user, pid = process.pid, reason = %reason, "failed to terminate process");
                    failures.push(TerminationFailure {
                        pid: process.pid,
                        reason,
                    });
                }
            }
        }

        let (notification, alert) = self.notify(&report, &terminated, options, now).await;
        info!(
            user = %report.user,
            node,
            percentage = report.usage.percentage,
            limit,
            terminated = terminated.len(),
            failed = failures.len(),
            "memory limit enforced"
        );

        report.outcome = Outcome::Enforced {
            terminated,
            vanished,
            spared: spared.iter().map(|p| p.pid).collect(),
            failures,
            notification,
            alert,
        };
        Ok(report)
    }

    fn individually_exempt(&self, process: &ProcessRecord, options: &KillOptions) -> bool {
        process.pid == self.own_pid
            || process.percentage < options.min_process_percent
            || options.protected_users.iter().any(|u| *u == process.user)
    }

    async fn terminate_all(
        &self,
        targets: Vec<ProcessRecord>,
    ) -> Result<Vec<(ProcessRecord, Termination)>, MonitorError> {
        if targets.is_empty() {
            return Ok(Vec::new());
        }
        let table = Arc::clone(&self.processes);
        tokio::task::spawn_blocking(move || {
            targets
                .into_iter()
                .map(|process| {
                    let result = table.terminate(&process);
                    (process, result)
                })
                .collect::<Vec<_>>()
        })
        .await
        .map_err(|e| MonitorError::Inspect(e.to_string()))
    }

    /// Record the violation, then attempt delivery. The record stands
    /// regardless of what happens to the alert.
    async fn notify(
        &self,
        report: &KillReport,
        terminated: &[u32],
        options: &KillOptions,
        now: DateTime<Utc>,
    ) -> (Option<Notification>, NotificationOutcome) {
        match self.tracker.should_notify(&report.user, report.limit, now).await {
            Ok(true) => {}
            Ok(false) => return (None, NotificationOutcome::Suppressed),
            Err(e) => {
                warn!(user = %report.user, error = %e, "notification history lookup failed");
                return (None, NotificationOutcome::RecordFailed { error: e.to_string() });
            }
        }

        let record = match self
            .tracker
            .record(NewNotification {
                user: report.user.clone(),
                node: report.node.clone(),
                time: now,
                memory: report.usage.memory,
                percentage: report.usage.percentage,
                limit: report.limit,
            })
            .await
        {
            Ok(record) => record,
            Err(e) => {
                warn!(user = %report.user, error = %e, "failed to record notification");
                return (None, NotificationOutcome::RecordFailed { error: e.to_string() });
            }
        };

        let outcome = if options.quiet {
            NotificationOutcome::Quiet
        } else {
            match &self.alerting {
                Some(alerting) => alerting.send(&record, terminated).await,
                None => NotificationOutcome::Unconfigured,
            }
        };
        (Some(record), outcome)
    }
}

/// Users whose aggregate usage in `snapshot` is over `limit`.
fn offenders(snapshot: &ProcessSnapshot, limit: f64) -> impl Iterator<Item = String> {
    aggregate(&snapshot.processes, Scope::All)
        .into_iter()
        .filter(move |usage| usage.exceeds(limit))
        .map(|usage| usage.user)
}
