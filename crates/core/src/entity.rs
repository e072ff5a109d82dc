use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::NannyError;

/// Row id assigned by the persistence layer.
pub type RecordId = i64;

/// A user account, keyed by its unique login name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: RecordId,
    pub name: String,
}

/// Immutable record of an alert sent (or attempted) for a limit violation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: RecordId,
    pub user: String,
    pub node: String,
    pub time: DateTime<Utc>,
    /// Resident memory in bytes at the time of the violation.
    pub memory: u64,
    /// Percentage of total host memory.
    pub percentage: f64,
    /// The limit that was exceeded, in percent.
    pub limit: f64,
}

/// A notification that has not been persisted yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewNotification {
    pub user: String,
    pub node: String,
    pub time: DateTime<Utc>,
    pub memory: u64,
    pub percentage: f64,
    pub limit: f64,
}

/// An exemption from enforcement.
///
/// Global entries apply to every user on every node for their window and
/// ignore the `user` and `node` fields. Scoped entries apply only to the
/// exact (user, node) pair. A missing `end_time` means the entry never
/// expires on its own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Whitelist {
    pub id: RecordId,
    pub user: Option<String>,
    pub node: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub global: bool,
}

impl Whitelist {
    /// Whether the window contains `at`. Both bounds are inclusive.
    pub fn is_active(&self, at: DateTime<Utc>) -> bool {
        window_contains(self.start_time, self.end_time, at)
    }

    /// Whether this entry covers the given user on the given node,
    /// ignoring the time window.
    pub fn covers(&self, user: &str, node: &str) -> bool {
        self.global
            || (self.user.as_deref() == Some(user) && self.node.as_deref() == Some(node))
    }

    pub fn is_permanent(&self) -> bool {
        self.end_time.is_none()
    }
}

/// A whitelist entry that has not been persisted yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewWhitelist {
    pub user: Option<String>,
    pub node: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub global: bool,
}

impl NewWhitelist {
    /// Build an entry starting at `start` that lasts for `duration`.
    ///
    /// `None` or a zero duration produces a permanent entry. Negative
    /// durations, scoped entries without both a user and a node, and global
    /// entries that name either are rejected.
    pub fn starting_at(
        user: Option<&str>,
        node: Option<&str>,
        start: DateTime<Utc>,
        duration: Option<Duration>,
        global: bool,
    ) -> Result<Self, NannyError> {
        let end_time = match duration {
            None => None,
            Some(d) if d < Duration::zero() => {
                return Err(NannyError::Validation(format!(
                    "duration must not be negative (got {}s)",
                    d.num_seconds()
                )));
            }
            Some(d) if d.is_zero() => None,
            Some(d) => Some(start.checked_add_signed(d).ok_or_else(|| {
                NannyError::Validation(format!(
                    "duration of {}s overflows the supported time range",
                    d.num_seconds()
                ))
            })?),
        };

        let entry = Self {
            user: user.map(str::to_string),
            node: node.map(str::to_string),
            start_time: start,
            end_time,
            global,
        };
        entry.validate()?;
        Ok(entry)
    }

    /// Check the invariants a stored entry must satisfy.
    pub fn validate(&self) -> Result<(), NannyError> {
        if let Some(end) = self.end_time {
            if end < self.start_time {
                return Err(NannyError::Validation(format!(
                    "end time {} is before start time {}",
                    end.to_rfc3339(),
                    self.start_time.to_rfc3339()
                )));
            }
        }

        if self.global {
            if self.user.is_some() || self.node.is_some() {
                return Err(NannyError::Validation(
                    "a global entry applies to every user on every node; \
                     it cannot name a user or node"
                        .to_string(),
                ));
            }
        } else {
            if self.user.as_deref().map_or(true, str::is_empty) {
                return Err(NannyError::Validation(
                    "a user name is required unless the entry is global".to_string(),
                ));
            }
            if self.node.as_deref().map_or(true, str::is_empty) {
                return Err(NannyError::Validation(
                    "a node name is required unless the entry is global".to_string(),
                ));
            }
        }

        Ok(())
    }

    pub fn is_active(&self, at: DateTime<Utc>) -> bool {
        window_contains(self.start_time, self.end_time, at)
    }
}

fn window_contains(
    start: DateTime<Utc>,
    end: Option<DateTime<Utc>>,
    at: DateTime<Utc>,
) -> bool {
    start <= at && end.map_or(true, |end| at <= end)
}
