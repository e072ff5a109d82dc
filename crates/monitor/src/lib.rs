//! Monitoring and enforcement engine.
//!
//! One polling pass flows through:
//! [`ProcessSnapshot`] → [`aggregate`] → [`MonitorUtility`], which consults
//! the [`WhitelistEvaluator`] and the [`NotificationTracker`] before
//! terminating processes and alerting users.
//!
//! The engine never loops on its own; an external scheduler (cron, a
//! systemd timer) invokes it once per pass.

pub mod aggregate;
pub mod engine;
pub mod error;
pub mod snapshot;
pub mod tracker;
pub mod whitelist;

pub use aggregate::{aggregate, system_usage, user_usage, Scope, SystemUsage, UsageResult};
pub use engine::{
    Alerting, KillOptions, KillReport, MonitorUtility, NotificationOutcome, Outcome, ScanReport,
    TerminationFailure, UserFailure,
};
pub use error::MonitorError;
pub use snapshot::{ProcessRecord, ProcessSnapshot, ProcessTable, SysinfoTable, Termination};
pub use tracker::{DedupPolicy, NotificationTracker};
pub use whitelist::{Exemption, WhitelistEvaluator};
