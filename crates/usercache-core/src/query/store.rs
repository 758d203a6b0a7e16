// ── Reactive query cache store ──
//
// Concurrent map of query slots with push-based change notification via
// `watch` channels. Every effective change bumps a store-wide version
// that the persistence writer listens on.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use tokio::sync::watch;
use tracing::debug;

use super::{QueryData, QueryEntry, QueryFilter, QueryKey};

/// Freshness and eviction windows applied to new slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryDefaults {
    pub stale_after: Duration,
    pub expire_after: Duration,
}

impl Default for QueryDefaults {
    fn default() -> Self {
        Self {
            stale_after: Duration::seconds(2),
            expire_after: Duration::hours(24),
        }
    }
}

struct Slot {
    entry: watch::Sender<Arc<QueryEntry>>,
    /// Number of live `QueryObserver`s for this key.
    observers: usize,
    /// When the last observer went away; `None` while observed.
    inactive_since: Option<DateTime<Utc>>,
}

impl Slot {
    fn new(entry: QueryEntry) -> Self {
        let (entry, _) = watch::channel(Arc::new(entry));
        Self {
            entry,
            observers: 0,
            inactive_since: Some(Utc::now()),
        }
    }
}

/// The authoritative mapping from `QueryKey` to `QueryEntry`.
///
/// Readers get immutable snapshots (`Arc<QueryEntry>`); all writes go
/// through [`QueryStore::set`].
pub struct QueryStore {
    slots: DashMap<QueryKey, Slot>,
    defaults: QueryDefaults,
    /// Version counter, bumped on every effective change.
    version: watch::Sender<u64>,
}

impl QueryStore {
    pub fn new(defaults: QueryDefaults) -> Self {
        let (version, _) = watch::channel(0u64);
        Self {
            slots: DashMap::new(),
            defaults,
            version,
        }
    }

    pub fn defaults(&self) -> QueryDefaults {
        self.defaults
    }

    fn new_entry(&self, key: &QueryKey) -> QueryEntry {
        QueryEntry::new(key.clone(), self.defaults.stale_after, self.defaults.expire_after)
    }

    /// Current snapshot of a slot. No side effects.
    pub fn get(&self, key: &QueryKey) -> Option<Arc<QueryEntry>> {
        self.slots.get(key).map(|slot| slot.entry.borrow().clone())
    }

    /// Apply a transition to a slot, creating it on first reference.
    ///
    /// Subscribers are notified only when the entry actually changed.
    pub fn set<R>(&self, key: &QueryKey, update: impl FnOnce(&mut QueryEntry) -> R) -> R {
        let (result, changed) = {
            let slot = self
                .slots
                .entry(key.clone())
                .or_insert_with(|| Slot::new(self.new_entry(key)));

            let current = slot.entry.borrow().clone();
            let mut next = (*current).clone();
            let result = update(&mut next);
            let changed = next != *current;
            if changed {
                // `send_replace` updates unconditionally, even with zero receivers.
                slot.entry.send_replace(Arc::new(next));
            }
            (result, changed)
        };

        if changed {
            self.bump_version();
        }
        result
    }

    /// Mark every matching entry stale. Returns the matched keys.
    pub fn invalidate(&self, filter: &QueryFilter) -> Vec<QueryKey> {
        let matched: Vec<QueryKey> = self
            .slots
            .iter()
            .filter(|r| filter.matches(r.key()))
            .map(|r| r.key().clone())
            .collect();

        for key in &matched {
            self.set(key, QueryEntry::invalidate);
        }
        debug!(count = matched.len(), "Invalidated queries");
        matched
    }

    /// Register an observer and return its receiver.
    pub(crate) fn subscribe(&self, key: &QueryKey) -> watch::Receiver<Arc<QueryEntry>> {
        let mut slot = self
            .slots
            .entry(key.clone())
            .or_insert_with(|| Slot::new(self.new_entry(key)));
        slot.observers += 1;
        slot.inactive_since = None;
        slot.entry.subscribe()
    }

    /// Drop one observer registration.
    pub(crate) fn release(&self, key: &QueryKey) {
        if let Some(mut slot) = self.slots.get_mut(key) {
            slot.observers = slot.observers.saturating_sub(1);
            if slot.observers == 0 {
                slot.inactive_since = Some(Utc::now());
            }
        }
    }

    pub fn is_observed(&self, key: &QueryKey) -> bool {
        self.slots.get(key).map(|slot| slot.observers > 0).unwrap_or(false)
    }

    pub fn observed_keys(&self) -> Vec<QueryKey> {
        self.slots
            .iter()
            .filter(|r| r.value().observers > 0)
            .map(|r| r.key().clone())
            .collect()
    }

    pub fn keys(&self) -> Vec<QueryKey> {
        self.slots.iter().map(|r| r.key().clone()).collect()
    }

    /// Snapshot of every entry, for persistence.
    pub fn entries(&self) -> Vec<Arc<QueryEntry>> {
        self.slots.iter().map(|r| r.value().entry.borrow().clone()).collect()
    }

    /// Seed a slot from persisted data.
    pub fn hydrate(&self, key: &QueryKey, data: QueryData, updated_at: DateTime<Utc>) {
        self.set(key, |entry| entry.hydrate(data, updated_at));
    }

    /// Evict unobserved entries whose `expire_after` has elapsed since they
    /// became inactive. Returns the number evicted.
    pub fn collect_garbage(&self, now: DateTime<Utc>) -> usize {
        let before = self.slots.len();
        self.slots.retain(|_, slot| {
            if slot.observers > 0 {
                return true;
            }
            let expire_after = slot.entry.borrow().expire_after;
            match slot.inactive_since {
                Some(since) => now - since < expire_after,
                None => true,
            }
        });
        let evicted = before.saturating_sub(self.slots.len());
        if evicted > 0 {
            debug!(evicted, "Evicted expired queries");
            self.bump_version();
        }
        evicted
    }

    /// Subscribe to store-wide change notifications.
    pub fn subscribe_changes(&self) -> watch::Receiver<u64> {
        self.version.subscribe()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    fn bump_version(&self) {
        self.version.send_modify(|v| *v += 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{QueryKind, QueryStatus};

    fn store() -> QueryStore {
        QueryStore::new(QueryDefaults::default())
    }

    #[test]
    fn test_get_has_no_side_effects() {
        let s = store();
        assert!(s.get(&QueryKey::Users).is_none());
        assert!(s.is_empty());
    }

    #[test]
    fn test_structurally_equal_keys_share_entry() {
        let s = store();
        s.hydrate(&QueryKey::UserPosts(4), QueryData::Posts(vec![]), Utc::now());
        let a = s.get(&QueryKey::UserPosts(4)).expect("entry exists");
        let b = s.get(&QueryKey::UserPosts(4)).expect("entry exists");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(s.len(), 1);
    }

    #[test]
    fn test_set_creates_and_notifies() {
        let s = store();
        let mut rx = s.subscribe(&QueryKey::Users);
        let mut changes = s.subscribe_changes();

        s.set(&QueryKey::Users, |e| e.begin_fetch());

        assert!(rx.has_changed().unwrap_or(false));
        assert_eq!(rx.borrow_and_update().status, QueryStatus::Loading);
        assert!(changes.has_changed().unwrap_or(false));
    }

    #[test]
    fn test_noop_set_does_not_notify() {
        let s = store();
        s.set(&QueryKey::Users, |_| ());
        let mut changes = s.subscribe_changes();
        changes.borrow_and_update();

        s.set(&QueryKey::Users, |_| ());
        assert!(!changes.has_changed().unwrap_or(true));
    }

    #[test]
    fn test_invalidate_by_kind_prefix() {
        let s = store();
        let now = Utc::now();
        s.hydrate(&QueryKey::Comments(1), QueryData::Comments(vec![]), now);
        s.hydrate(&QueryKey::Comments(2), QueryData::Comments(vec![]), now);
        s.hydrate(&QueryKey::Users, QueryData::Users(vec![]), now);

        let mut matched = s.invalidate(&QueryFilter::kind(QueryKind::Comments));
        matched.sort_by_key(|k| k.to_string());
        assert_eq!(matched, vec![QueryKey::Comments(1), QueryKey::Comments(2)]);

        assert!(s.get(&QueryKey::Comments(1)).map(|e| e.is_invalidated).unwrap_or(false));
        assert!(!s.get(&QueryKey::Users).map(|e| e.is_invalidated).unwrap_or(true));
    }

    #[test]
    fn test_observer_accounting() {
        let s = store();
        let _rx1 = s.subscribe(&QueryKey::User(1));
        let _rx2 = s.subscribe(&QueryKey::User(1));
        assert!(s.is_observed(&QueryKey::User(1)));

        s.release(&QueryKey::User(1));
        assert!(s.is_observed(&QueryKey::User(1)));
        s.release(&QueryKey::User(1));
        assert!(!s.is_observed(&QueryKey::User(1)));
        assert!(s.observed_keys().is_empty());
    }

    #[test]
    fn test_gc_evicts_only_expired_unobserved() {
        let s = QueryStore::new(QueryDefaults {
            stale_after: Duration::seconds(2),
            expire_after: Duration::minutes(5),
        });
        let now = Utc::now();
        s.hydrate(&QueryKey::Users, QueryData::Users(vec![]), now);
        let _rx = s.subscribe(&QueryKey::User(1));

        assert_eq!(s.collect_garbage(now), 0);
        assert_eq!(s.collect_garbage(now + Duration::minutes(10)), 1);
        assert!(s.get(&QueryKey::Users).is_none());
        // Observed entries survive regardless of age
        assert!(s.get(&QueryKey::User(1)).is_some());
    }
}
