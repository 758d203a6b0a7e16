use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::mutation::{MutationExecutor, QueuedMutation};
use crate::query::{QueryData, QueryKey, QueryStatus, QueryStore};

use super::{PersistError, RestoreGate, SnapshotStorage};

/// Maximum snapshot entry age before it is dropped at restore (24 hours)
pub const MAX_SNAPSHOT_AGE_HOURS: i64 = 24;

/// Snapshot format version. Snapshots with another version are discarded.
const SNAPSHOT_VERSION: u32 = 1;

/// One successful query as written to storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedQuery {
    pub key: QueryKey,
    pub data: QueryData,
    pub updated_at: DateTime<Utc>,
}

/// The durable form of the cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheSnapshot {
    pub version: u32,
    pub saved_at: DateTime<Utc>,
    pub queries: Vec<PersistedQuery>,
    #[serde(default)]
    pub mutations: Vec<QueuedMutation>,
}

impl CacheSnapshot {
    /// Capture every successful entry plus the paused mutation queue.
    /// Loading and failed entries are never persisted.
    pub fn capture(store: &QueryStore, mutations: Vec<QueuedMutation>, now: DateTime<Utc>) -> Self {
        let mut queries: Vec<PersistedQuery> = store
            .entries()
            .into_iter()
            .filter(|e| e.status == QueryStatus::Success)
            .filter_map(|e| {
                let data = e.data.as_ref()?;
                Some(PersistedQuery {
                    key: e.key.clone(),
                    data: (**data).clone(),
                    updated_at: e.last_updated?,
                })
            })
            .collect();
        // Stable file contents regardless of map iteration order
        queries.sort_by_key(|q| q.key.to_string());

        Self {
            version: SNAPSHOT_VERSION,
            saved_at: now,
            queries,
            mutations,
        }
    }

    /// Drop queries and mutations older than `max_age`. Returns how many
    /// were dropped.
    pub fn retain_fresh(&mut self, now: DateTime<Utc>, max_age: Duration) -> usize {
        let before = self.queries.len() + self.mutations.len();
        self.queries.retain(|q| now - q.updated_at <= max_age);
        self.mutations.retain(|m| now - m.submitted_at <= max_age);
        before - (self.queries.len() + self.mutations.len())
    }
}

/// Moves the cache between memory and `SnapshotStorage`.
pub struct PersistenceBridge {
    storage: Arc<dyn SnapshotStorage>,
    max_age: Duration,
    throttle: std::time::Duration,
}

impl PersistenceBridge {
    pub fn new(storage: Arc<dyn SnapshotStorage>, throttle: std::time::Duration) -> Self {
        Self {
            storage,
            max_age: Duration::hours(MAX_SNAPSHOT_AGE_HOURS),
            throttle,
        }
    }

    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }

    /// Read the stored snapshot.
    ///
    /// Missing, unreadable, corrupt or mismatched-version snapshots all
    /// yield `None`; the cache then simply starts empty.
    pub fn load(&self, now: DateTime<Utc>) -> Option<CacheSnapshot> {
        let raw = match self.storage.load() {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                debug!("No cache snapshot found");
                return None;
            }
            Err(e) => {
                warn!(error = %e, "Failed to read cache snapshot");
                return None;
            }
        };

        let mut snapshot: CacheSnapshot = match serde_json::from_str(&raw) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(error = %e, "Discarding unreadable cache snapshot");
                return None;
            }
        };

        if snapshot.version != SNAPSHOT_VERSION {
            warn!(version = snapshot.version, "Discarding cache snapshot with unknown version");
            return None;
        }

        let dropped = snapshot.retain_fresh(now, self.max_age);
        if dropped > 0 {
            debug!(dropped, "Dropped expired snapshot entries");
        }
        Some(snapshot)
    }

    /// Hydrate `store` from storage. Returns the restored paused mutations.
    pub fn restore_into(&self, store: &QueryStore, now: DateTime<Utc>) -> Vec<QueuedMutation> {
        let Some(snapshot) = self.load(now) else {
            return Vec::new();
        };

        info!(
            queries = snapshot.queries.len(),
            mutations = snapshot.mutations.len(),
            saved_at = %snapshot.saved_at,
            "Restoring query cache"
        );
        for query in snapshot.queries {
            store.hydrate(&query.key, query.data, query.updated_at);
        }
        snapshot.mutations
    }

    /// Write the current state of `store` and the paused queue.
    pub fn persist(&self, store: &QueryStore, executor: &MutationExecutor) -> Result<(), PersistError> {
        let snapshot = CacheSnapshot::capture(store, executor.paused(), Utc::now());
        let json = serde_json::to_string(&snapshot)?;
        self.storage.save(&json)?;
        debug!(queries = snapshot.queries.len(), "Persisted query cache");
        Ok(())
    }

    pub fn clear(&self) -> Result<(), PersistError> {
        self.storage.remove()
    }

    /// Mirror changes to storage, at most once per throttle window.
    ///
    /// Nothing is written until `restoration` finishes, so a slow restore
    /// never races a write of the still-empty cache. Runs until aborted.
    pub fn spawn_writer(
        self: &Arc<Self>,
        store: Arc<QueryStore>,
        executor: MutationExecutor,
        restoration: RestoreGate,
    ) -> JoinHandle<()> {
        let bridge = Arc::clone(self);
        let mut store_changes = store.subscribe_changes();
        let mut queue_changes = executor.subscribe_queue();

        tokio::spawn(async move {
            restoration.wait().await;
            loop {
                tokio::select! {
                    r = store_changes.changed() => if r.is_err() { break },
                    r = queue_changes.changed() => if r.is_err() { break },
                }

                // Coalesce the burst of changes that follows a single event
                tokio::time::sleep(bridge.throttle).await;
                store_changes.borrow_and_update();
                queue_changes.borrow_and_update();

                // Storage writes block
                let writer = Arc::clone(&bridge);
                let (source, queue) = (Arc::clone(&store), executor.clone());
                match tokio::task::spawn_blocking(move || writer.persist(&source, &queue)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => warn!(error = %e, "Failed to persist query cache"),
                    Err(e) => warn!(error = %e, "Cache persist task failed"),
                }
            }
        })
    }
}
