//! Exemption lookup.
//!
//! Global entries are consulted first, then entries scoped to the exact
//! (user, node) pair. Any entry whose window contains the evaluation time
//! exempts the user; entries never outrank each other.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use nanny_core::Whitelist;
use nanny_store::{Store, StoreError, WhitelistQuery};
use serde::Serialize;
use tracing::debug;

/// The entry that made a user exempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Exemption {
    Global(Whitelist),
    Scoped(Whitelist),
}

impl Exemption {
    pub fn entry(&self) -> &Whitelist {
        match self {
            Self::Global(entry) | Self::Scoped(entry) => entry,
        }
    }
}

#[derive(Clone)]
pub struct WhitelistEvaluator {
    store: Arc<dyn Store>,
}

impl WhitelistEvaluator {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Find an entry exempting `user` on `node` at `at`.
    ///
    /// A store failure is returned as an error, never as "not exempt".
    pub async fn exemption(
        &self,
        user: &str,
        node: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<Exemption>, StoreError> {
        let global = self.store.find_whitelist(&WhitelistQuery::global_at(at)).await?;
        if let Some(entry) = pick_widest(global) {
            debug!(user, node, entry = entry.id, "global whitelist applies");
            return Ok(Some(Exemption::Global(entry)));
        }

        let scoped = self
            .store
            .find_whitelist(&WhitelistQuery::scoped_at(user, node, at))
            .await?;
        if let Some(entry) = pick_widest(scoped) {
            debug!(user, node, entry = entry.id, "scoped whitelist applies");
            return Ok(Some(Exemption::Scoped(entry)));
        }

        Ok(None)
    }

    /// Every entry in effect at `at`, global and scoped, newest first.
    pub async fn effective(&self, at: DateTime<Utc>) -> Result<Vec<Whitelist>, StoreError> {
        self.store
            .find_whitelist(&WhitelistQuery {
                active_at: Some(at),
                ..WhitelistQuery::default()
            })
            .await
    }
}

/// Report the entry that stays in force the longest; permanent entries win.
/// Only affects which entry is reported, not whether the user is exempt.
fn pick_widest(entries: Vec<Whitelist>) -> Option<Whitelist> {
    entries.into_iter().max_by(|a, b| match (a.end_time, b.end_time) {
        (None, None) => std::cmp::Ordering::Equal,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (Some(_), None) => std::cmp::Ordering::Less,
        (Some(x), Some(y)) => x.cmp(&y),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use nanny_core::NewWhitelist;
    use nanny_store::MemoryStore;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    async fn evaluator_with(entries: Vec<NewWhitelist>) -> WhitelistEvaluator {
        let store = Arc::new(MemoryStore::new());
        for entry in entries {
            store.replace_whitelist(entry).await.unwrap();
        }
        WhitelistEvaluator::new(store)
    }

    async fn exempt(evaluator: &WhitelistEvaluator, user: &str, node: &str, at: DateTime<Utc>) -> bool {
        evaluator.exemption(user, node, at).await.unwrap().is_some()
    }

    fn entry(id: i64, end_time: Option<DateTime<Utc>>) -> Whitelist {
        Whitelist {
            id,
            user: Some("bob".into()),
            node: Some("login1".into()),
            start_time: t0(),
            end_time,
            global: false,
        }
    }

    fn scoped(user: &str, node: &str, secs: i64) -> NewWhitelist {
        NewWhitelist::starting_at(Some(user), Some(node), t0(), Some(Duration::seconds(secs)), false)
            .unwrap()
    }

    #[tokio::test]
    async fn no_entries_means_not_exempt() {
        let evaluator = evaluator_with(vec![]).await;
        assert!(!exempt(&evaluator, "alice", "login1", t0()).await);
    }

    #[tokio::test]
    async fn scoped_entry_only_covers_its_pair() {
        let evaluator = evaluator_with(vec![scoped("bob", "login1", 3600)]).await;
        let at = t0() + Duration::minutes(1);
        assert!(exempt(&evaluator, "bob", "login1", at).await);
        assert!(!exempt(&evaluator, "bob", "login2", at).await);
        assert!(!exempt(&evaluator, "alice", "login1", at).await);
    }

    #[tokio::test]
    async fn end_of_window_is_inclusive() {
        let evaluator = evaluator_with(vec![scoped("bob", "login1", 3600)]).await;
        let end = t0() + Duration::seconds(3600);
        assert!(exempt(&evaluator, "bob", "login1", end).await);
        assert!(!exempt(&evaluator, "bob", "login1", end + Duration::milliseconds(1)).await);
    }

    #[tokio::test]
    async fn global_entry_covers_everyone() {
        let permanent = NewWhitelist::starting_at(None, None, t0(), Some(Duration::zero()), true).unwrap();
        let evaluator = evaluator_with(vec![permanent]).await;
        let later = t0() + Duration::days(400);
        match evaluator.exemption("anyone", "any-node", later).await.unwrap() {
            Some(Exemption::Global(entry)) => assert!(entry.is_permanent()),
            other => panic!("expected global exemption, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn global_checked_before_scoped() {
        let global = NewWhitelist::starting_at(None, None, t0(), None, true).unwrap();
        let evaluator = evaluator_with(vec![scoped("bob", "login1", 60), global]).await;
        let found = evaluator.exemption("bob", "login1", t0()).await.unwrap();
        assert!(matches!(found, Some(Exemption::Global(_))));
    }

    #[test]
    fn overlapping_windows_report_the_widest() {
        let short = entry(1, Some(t0() + Duration::seconds(60)));
        let long = entry(2, Some(t0() + Duration::seconds(7200)));
        let widest = pick_widest(vec![short.clone(), long.clone()]).unwrap();
        assert_eq!(widest.id, 2);

        let permanent = entry(3, None);
        assert_eq!(pick_widest(vec![long, permanent, short]).unwrap().id, 3);
        assert!(pick_widest(vec![]).is_none());
    }

    #[tokio::test]
    async fn effective_lists_only_active_entries() {
        let evaluator = evaluator_with(vec![
            scoped("bob", "login1", 60),
            scoped("carol", "login2", 7200),
            NewWhitelist::starting_at(None, None, t0(), None, true).unwrap(),
        ])
        .await;
        let active = evaluator.effective(t0() + Duration::minutes(5)).await.unwrap();
        assert_eq!(active.len(), 2);
        assert!(active.iter().all(|e| e.user.as_deref() != Some("bob")));
    }
}
