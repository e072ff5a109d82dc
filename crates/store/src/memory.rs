//! In-memory [`Store`] used by tests and single-shot dry runs.
//!
//! All tables live behind one `RwLock`, so each write is atomic with
//! respect to concurrent readers.

use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use nanny_core::{NewNotification, NewWhitelist, Notification, RecordId, User, Whitelist};

use crate::error::StoreError;
use crate::traits::{NotificationQuery, Store, WhitelistQuery, WhitelistSelector};

#[derive(Debug, Default)]
struct Tables {
    users: Vec<User>,
    whitelists: Vec<Whitelist>,
    notifications: Vec<Notification>,
    last_id: RecordId,
}

impl Tables {
    fn next_id(&mut self) -> RecordId {
        self.last_id += 1;
        self.last_id
    }

    fn ensure_user(&mut self, name: &str) -> User {
        if let Some(user) = self.users.iter().find(|u| u.name == name) {
            return user.clone();
        }
        let user = User {
            id: self.next_id(),
            name: name.to_string(),
        };
        self.users.push(user.clone());
        user
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Tables>, StoreError> {
        self.tables
            .read()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Tables>, StoreError> {
        self.tables
            .write()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".to_string()))
    }
}

#[async_trait::async_trait]
impl Store for MemoryStore {
    async fn health(&self) -> Result<(), StoreError> {
        self.read().map(|_| ())
    }

    async fn find_user(&self, name: &str) -> Result<Option<User>, StoreError> {
        Ok(self.read()?.users.iter().find(|u| u.name == name).cloned())
    }

    async fn replace_whitelist(&self, entry: NewWhitelist) -> Result<Whitelist, StoreError> {
        entry.validate()?;

        let selector = WhitelistSelector::covering(&entry);
        let mut tables = self.write()?;
        if let Some(name) = entry.user.as_deref() {
            tables.ensure_user(name);
        }
        tables.whitelists.retain(|existing| !selector.matches(existing));
        let record = Whitelist {
            id: tables.next_id(),
            user: entry.user,
            node: entry.node,
            start_time: entry.start_time,
            end_time: entry.end_time,
            global: entry.global,
        };
        tables.whitelists.push(record.clone());
        Ok(record)
    }

    async fn delete_whitelist(&self, selector: &WhitelistSelector) -> Result<u64, StoreError> {
        let mut tables = self.write()?;
        let before = tables.whitelists.len();
        tables.whitelists.retain(|entry| !selector.matches(entry));
        Ok((before - tables.whitelists.len()) as u64)
    }

    async fn find_whitelist(&self, query: &WhitelistQuery) -> Result<Vec<Whitelist>, StoreError> {
        let tables = self.read()?;
        let mut rows: Vec<Whitelist> = tables
            .whitelists
            .iter()
            .filter(|entry| query.matches(entry))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.start_time.cmp(&a.start_time).then(b.id.cmp(&a.id)));
        Ok(rows)
    }

    async fn insert_notification(
        &self,
        notification: NewNotification,
    ) -> Result<Notification, StoreError> {
        let mut tables = self.write()?;
        tables.ensure_user(&notification.user);
        let record = Notification {
            id: tables.next_id(),
            user: notification.user,
            node: notification.node,
            time: notification.time,
            memory: notification.memory,
            percentage: notification.percentage,
            limit: notification.limit,
        };
        tables.notifications.push(record.clone());
        Ok(record)
    }

    async fn find_notifications(
        &self,
        query: &NotificationQuery,
    ) -> Result<Vec<Notification>, StoreError> {
        let tables = self.read()?;
        let mut rows: Vec<Notification> = tables
            .notifications
            .iter()
            .filter(|n| query.matches(n))
            .cloned()
            .collect();
        // newest first; ids break ties between records sharing a timestamp
        rows.sort_by(|a, b| b.time.cmp(&a.time).then(b.id.cmp(&a.id)));
        Ok(rows)
    }

    fn backend_name(&self) -> &str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    fn scoped(user: &str, node: &str, hours: i64) -> NewWhitelist {
        NewWhitelist::starting_at(Some(user), Some(node), t0(), Some(Duration::hours(hours)), false)
            .unwrap()
    }

    fn notification(user: &str, minutes: i64, limit: f64) -> NewNotification {
        NewNotification {
            user: user.to_string(),
            node: "login1".to_string(),
            time: t0() + Duration::minutes(minutes),
            memory: 1024,
            percentage: 55.0,
            limit,
        }
    }

    #[tokio::test]
    async fn users_are_created_once() {
        let store = MemoryStore::new();
        store.replace_whitelist(scoped("alice", "login1", 1)).await.unwrap();
        store.insert_notification(notification("alice", 0, 50.0)).await.unwrap();
        let a = store.find_user("alice").await.unwrap().unwrap();
        let n = store.find_notifications(&NotificationQuery::for_user("alice")).await.unwrap();
        assert_eq!(n[0].user, a.name);
        assert!(store.find_user("bob").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn whitelist_insert_registers_user() {
        let store = MemoryStore::new();
        store.replace_whitelist(scoped("bob", "login1", 1)).await.unwrap();
        assert!(store.find_user("bob").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn invalid_whitelist_is_not_persisted() {
        let store = MemoryStore::new();
        let mut entry = scoped("bob", "login1", 1);
        entry.end_time = Some(t0() - Duration::seconds(1));

        let err = store.replace_whitelist(entry).await.unwrap_err();
        assert!(matches!(err, StoreError::Invalid(_)), "got: {err}");
        let all = store.find_whitelist(&WhitelistQuery::default()).await.unwrap();
        assert!(all.is_empty());
    }

    #[tokio::test]
    async fn query_filters_by_scope_and_time() {
        let store = MemoryStore::new();
        store.replace_whitelist(scoped("bob", "login1", 1)).await.unwrap();
        store.replace_whitelist(scoped("bob", "login2", 1)).await.unwrap();
        store
            .replace_whitelist(NewWhitelist::starting_at(None, None, t0(), None, true).unwrap())
            .await
            .unwrap();

        let at = t0() + Duration::minutes(30);
        let scoped_hits = store
            .find_whitelist(&WhitelistQuery::scoped_at("bob", "login1", at))
            .await
            .unwrap();
        assert_eq!(scoped_hits.len(), 1);
        assert_eq!(scoped_hits[0].node.as_deref(), Some("login1"));

        let global_hits = store.find_whitelist(&WhitelistQuery::global_at(at)).await.unwrap();
        assert_eq!(global_hits.len(), 1);

        let later = t0() + Duration::hours(2);
        let expired = store
            .find_whitelist(&WhitelistQuery::scoped_at("bob", "login1", later))
            .await
            .unwrap();
        assert!(expired.is_empty());
    }

    #[tokio::test]
    async fn replace_keeps_one_entry_per_scope() {
        let store = MemoryStore::new();
        let first = store.replace_whitelist(scoped("bob", "login1", 1)).await.unwrap();
        let second = store.replace_whitelist(scoped("bob", "login1", 5)).await.unwrap();
        store.replace_whitelist(scoped("bob", "login2", 1)).await.unwrap();
        assert_ne!(first.id, second.id);

        let at = t0() + Duration::hours(3);
        let hits = store
            .find_whitelist(&WhitelistQuery::scoped_at("bob", "login1", at))
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, second.id);
        assert_eq!(hits[0].end_time, Some(t0() + Duration::hours(5)));

        let all = store.find_whitelist(&WhitelistQuery::default()).await.unwrap();
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn global_replace_supersedes_previous_global() {
        let store = MemoryStore::new();
        store
            .replace_whitelist(NewWhitelist::starting_at(None, None, t0(), None, true).unwrap())
            .await
            .unwrap();
        let timed = NewWhitelist::starting_at(None, None, t0(), Some(Duration::hours(1)), true)
            .unwrap();
        store.replace_whitelist(timed).await.unwrap();
        store.replace_whitelist(scoped("bob", "login1", 1)).await.unwrap();

        let globals = store
            .find_whitelist(&WhitelistQuery::global_at(t0()))
            .await
            .unwrap();
        assert_eq!(globals.len(), 1);
        assert!(globals[0].end_time.is_some());
        assert_eq!(store.find_whitelist(&WhitelistQuery::default()).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn invalid_replace_keeps_existing_entry() {
        let store = MemoryStore::new();
        store.replace_whitelist(scoped("bob", "login1", 1)).await.unwrap();
        let mut bad = scoped("bob", "login1", 1);
        bad.end_time = Some(t0() - Duration::seconds(1));
        assert!(store.replace_whitelist(bad).await.is_err());
        assert_eq!(store.find_whitelist(&WhitelistQuery::default()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn delete_by_selector() {
        let store = MemoryStore::new();
        store.replace_whitelist(scoped("bob", "login1", 1)).await.unwrap();
        store.replace_whitelist(scoped("bob", "login2", 1)).await.unwrap();
        store
            .replace_whitelist(NewWhitelist::starting_at(None, None, t0(), None, true).unwrap())
            .await
            .unwrap();

        let removed = store
            .delete_whitelist(&WhitelistSelector::Scoped {
                user: "bob".into(),
                node: "login1".into(),
            })
            .await
            .unwrap();
        assert_eq!(removed, 1);

        assert_eq!(store.delete_whitelist(&WhitelistSelector::Global).await.unwrap(), 1);
        assert_eq!(store.delete_whitelist(&WhitelistSelector::Global).await.unwrap(), 0);

        let left = store.find_whitelist(&WhitelistQuery::default()).await.unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].node.as_deref(), Some("login2"));
    }

    #[tokio::test]
    async fn notifications_newest_first_and_filtered() {
        let store = MemoryStore::new();
        store.insert_notification(notification("alice", 0, 50.0)).await.unwrap();
        store.insert_notification(notification("alice", 10, 50.0)).await.unwrap();
        store.insert_notification(notification("alice", 5, 20.0)).await.unwrap();
        store.insert_notification(notification("sam", 1, 50.0)).await.unwrap();

        let all = store
            .find_notifications(&NotificationQuery::for_user("alice"))
            .await
            .unwrap();
        let minutes: Vec<i64> = all.iter().map(|n| (n.time - t0()).num_minutes()).collect();
        assert_eq!(minutes, vec![10, 5, 0]);

        let at_fifty = store
            .find_notifications(&NotificationQuery {
                user: Some("alice".into()),
                limit: Some(50.0),
                since: None,
            })
            .await
            .unwrap();
        assert_eq!(at_fifty.len(), 2);

        let unknown = store
            .find_notifications(&NotificationQuery::for_user("nobody"))
            .await
            .unwrap();
        assert!(unknown.is_empty());
    }
}
