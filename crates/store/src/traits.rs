//! Store trait definition and the query shapes it accepts.

use chrono::{DateTime, Utc};
use nanny_core::{NewNotification, NewWhitelist, Notification, User, Whitelist};

use crate::error::StoreError;

/// Filter for reading whitelist entries. `None` fields match anything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WhitelistQuery {
    pub global: Option<bool>,
    pub user: Option<String>,
    pub node: Option<String>,
    /// Only entries whose window contains this instant (bounds inclusive).
    pub active_at: Option<DateTime<Utc>>,
}

impl WhitelistQuery {
    /// Global entries effective at `at`.
    pub fn global_at(at: DateTime<Utc>) -> Self {
        Self {
            global: Some(true),
            active_at: Some(at),
            ..Self::default()
        }
    }

    /// Entries scoped to exactly (`user`, `node`) effective at `at`.
    pub fn scoped_at(user: &str, node: &str, at: DateTime<Utc>) -> Self {
        Self {
            global: Some(false),
            user: Some(user.to_string()),
            node: Some(node.to_string()),
            active_at: Some(at),
        }
    }

    pub fn matches(&self, entry: &Whitelist) -> bool {
        self.global.map_or(true, |g| entry.global == g)
            && self
                .user
                .as_deref()
                .map_or(true, |u| entry.user.as_deref() == Some(u))
            && self
                .node
                .as_deref()
                .map_or(true, |n| entry.node.as_deref() == Some(n))
            && self.active_at.map_or(true, |at| entry.is_active(at))
    }
}

/// Selects whitelist entries for deletion.
///
/// Global selectors match every global entry; scoped selectors match the
/// (user, node) pair exactly.
#[derive(Debug, Clone, PartialEq)]
pub enum WhitelistSelector {
    Global,
    Scoped { user: String, node: String },
}

impl WhitelistSelector {
    /// The selector matching every entry that `entry` supersedes.
    pub fn covering(entry: &NewWhitelist) -> Self {
        if entry.global {
            Self::Global
        } else {
            Self::Scoped {
                user: entry.user.clone().unwrap_or_default(),
                node: entry.node.clone().unwrap_or_default(),
            }
        }
    }

    pub fn matches(&self, entry: &Whitelist) -> bool {
        match self {
            Self::Global => entry.global,
            Self::Scoped { user, node } => {
                !entry.global
                    && entry.user.as_deref() == Some(user.as_str())
                    && entry.node.as_deref() == Some(node.as_str())
            }
        }
    }
}

/// Filter for notification history. Results are ordered newest first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NotificationQuery {
    pub user: Option<String>,
    /// Only notifications recorded for this exceeded limit.
    pub limit: Option<f64>,
    /// Only notifications at or after this instant.
    pub since: Option<DateTime<Utc>>,
}

impl NotificationQuery {
    pub fn for_user(user: &str) -> Self {
        Self {
            user: Some(user.to_string()),
            ..Self::default()
        }
    }

    pub fn matches(&self, notification: &Notification) -> bool {
        self.user.as_deref().map_or(true, |u| notification.user == u)
            && self.limit.map_or(true, |l| notification.limit == l)
            && self.since.map_or(true, |s| notification.time >= s)
    }
}

/// The persistence boundary consumed by the enforcement engine.
///
/// Implementations are shared across concurrent per-user evaluations, so
/// they must serialize conflicting writes themselves.
#[async_trait::async_trait]
pub trait Store: Send + Sync {
    /// Cheap round trip used to fail a pass early when storage is down.
    async fn health(&self) -> Result<(), StoreError>;

    /// Users are created by the writes that first mention them; unknown
    /// names return `None`.
    async fn find_user(&self, name: &str) -> Result<Option<User>, StoreError>;

    /// Validate `entry` and store it in place of every entry with the same
    /// scope (the same user and node, or all global entries). Delete and
    /// insert commit together; nothing is written when validation fails.
    async fn replace_whitelist(&self, entry: NewWhitelist) -> Result<Whitelist, StoreError>;

    /// Delete matching entries and return how many were removed.
    async fn delete_whitelist(&self, selector: &WhitelistSelector) -> Result<u64, StoreError>;

    async fn find_whitelist(&self, query: &WhitelistQuery) -> Result<Vec<Whitelist>, StoreError>;

    /// Insert a notification, creating its user on first sight.
    async fn insert_notification(
        &self,
        notification: NewNotification,
    ) -> Result<Notification, StoreError>;

    async fn find_notifications(
        &self,
        query: &NotificationQuery,
    ) -> Result<Vec<Notification>, StoreError>;

    /// Short label for logs (e.g. `"postgres"`).
    fn backend_name(&self) -> &str;
}
