//! Notification history and the dedup decision.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use nanny_core::{NewNotification, Notification};
use nanny_store::{NotificationQuery, Store, StoreError};
use tracing::debug;

const MAX_COOLDOWN_SECS: u64 = 100 * 365 * 24 * 3600;

/// When a violation should produce a new notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DedupPolicy {
    /// Record and alert on every enforcement attempt that finds a violation.
    #[default]
    EveryViolation,
    /// Skip users already notified for the same limit within the window.
    Cooldown(Duration),
}

impl DedupPolicy {
    /// `0` selects [`DedupPolicy::EveryViolation`].
    pub fn from_cooldown_secs(secs: u64) -> Self {
        match secs {
            0 => Self::EveryViolation,
            s => Self::Cooldown(Duration::seconds(s.min(MAX_COOLDOWN_SECS) as i64)),
        }
    }
}

#[derive(Clone)]
pub struct NotificationTracker {
    store: Arc<dyn Store>,
    policy: DedupPolicy,
}

impl NotificationTracker {
    pub fn new(store: Arc<dyn Store>, policy: DedupPolicy) -> Self {
        Self { store, policy }
    }

    /// Whether a violation of `limit` by `user` at `at` warrants a new
    /// notification. Users with no history always do.
    pub async fn should_notify(
        &self,
        user: &str,
        limit: f64,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let window = match self.policy {
            DedupPolicy::EveryViolation => return Ok(true),
            DedupPolicy::Cooldown(window) => window,
        };

        let since = at.checked_sub_signed(window).unwrap_or(DateTime::<Utc>::MIN_UTC);
        let recent = self
            .store
            .find_notifications(&NotificationQuery {
                user: Some(user.to_string()),
                limit: Some(limit),
                since: Some(since),
            })
            .await?;

        if let Some(last) = recent.first() {
            debug!(user, limit, last = %last.time, "notification suppressed by cooldown");
            return Ok(false);
        }
        Ok(true)
    }

    pub async fn record(&self, notification: NewNotification) -> Result<Notification, StoreError> {
        self.store.insert_notification(notification).await
    }

    /// Past notifications, newest first. Unknown users yield an empty list.
    pub async fn history(
        &self,
        user: Option<&str>,
        limit: Option<f64>,
    ) -> Result<Vec<Notification>, StoreError> {
        if let Some(name) = user {
            if self.store.find_user(name).await?.is_none() {
                debug!(user = name, "no such user, history is empty");
                return Ok(Vec::new());
            }
        }
        self.store
            .find_notifications(&NotificationQuery {
                user: user.map(str::to_string),
                limit,
                since: None,
            })
            .await
    }
}
