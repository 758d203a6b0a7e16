//! Fetch decisions and execution.
//!
//! The decision rule is a pure function of the entry, connectivity and
//! restoration state (`should_fetch` / `decide`). `FetchCoordinator`
//! applies a decision atomically against the store and runs the request.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::api::ApiError;
use crate::cache::RestoreGate;
use crate::connectivity::Connectivity;

use super::{QueryEntry, QueryError, QueryFilter, QueryKey, QueryStatus, QueryStore, ResourceBackend};

/// Outcome of evaluating one key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchDecision {
    /// Cache restore still running; nothing may fetch yet.
    Suppressed,
    /// Offline with nothing cached.
    Paused,
    /// A request for this key is already running.
    InFlight,
    /// Last attempt failed; waits for an explicit refetch.
    Settled,
    /// Cached data is fresh.
    Fresh,
    /// Cached data is stale but the network is down; serve it as is.
    Deferred,
    /// Serve cached data and refresh in the background.
    Revalidate,
    /// No data; a foreground request was started.
    Fetch,
}

impl FetchDecision {
    pub fn starts_request(&self) -> bool {
        matches!(self, FetchDecision::Fetch | FetchDecision::Revalidate)
    }
}

/// Whether a query may resolve at all: never while restoring, and
/// offline only when there is cached data to show.
pub fn should_fetch(entry: Option<&QueryEntry>, online: bool, restoring: bool) -> bool {
    !restoring && (online || entry.map(QueryEntry::has_data).unwrap_or(false))
}

/// Full decision for an observed key.
pub fn decide(entry: &QueryEntry, online: bool, restoring: bool, now: DateTime<Utc>) -> FetchDecision {
    if restoring {
        return FetchDecision::Suppressed;
    }
    if entry.is_fetching {
        return FetchDecision::InFlight;
    }
    if !should_fetch(Some(entry), online, restoring) {
        return FetchDecision::Paused;
    }
    if entry.status == QueryStatus::Error && !entry.is_invalidated {
        return FetchDecision::Settled;
    }
    if !entry.is_stale(now) {
        return FetchDecision::Fresh;
    }
    if !online {
        return FetchDecision::Deferred;
    }
    if entry.has_data() {
        FetchDecision::Revalidate
    } else {
        FetchDecision::Fetch
    }
}

/// Runs fetches for observed keys.
/// Clone is cheap - every field is shared.
#[derive(Clone)]
pub struct FetchCoordinator {
    store: Arc<QueryStore>,
    backend: Arc<dyn ResourceBackend>,
    connectivity: Connectivity,
    restoration: RestoreGate,
}

impl FetchCoordinator {
    pub fn new(
        store: Arc<QueryStore>,
        backend: Arc<dyn ResourceBackend>,
        connectivity: Connectivity,
        restoration: RestoreGate,
    ) -> Self {
        Self {
            store,
            backend,
            connectivity,
            restoration,
        }
    }

    pub fn store(&self) -> &Arc<QueryStore> {
        &self.store
    }

    /// Decide for `key` and act on the decision.
    pub fn evaluate(&self, key: &QueryKey) -> FetchDecision {
        let online = self.connectivity.is_online();
        let restoring = self.restoration.is_restoring();
        let now = Utc::now();

        let (decision, generation) = self.store.set(key, |entry| {
            let decision = decide(entry, online, restoring, now);
            let generation = match decision {
                FetchDecision::Fetch | FetchDecision::Revalidate => Some(entry.begin_fetch()),
                FetchDecision::Paused | FetchDecision::Deferred => {
                    entry.pause();
                    None
                }
                _ => None,
            };
            (decision, generation)
        });

        debug!(key = %key, ?decision, "Evaluated query");
        if let Some(generation) = generation {
            self.spawn_fetch(key.clone(), generation);
        }
        decision
    }

    /// User-triggered refetch. Ignores freshness and supersedes any
    /// request already in flight for the key.
    pub fn refetch(&self, key: &QueryKey) -> FetchDecision {
        if self.restoration.is_restoring() {
            return FetchDecision::Suppressed;
        }

        if !self.connectivity.is_online() {
            return self.store.set(key, |entry| {
                entry.pause();
                if entry.has_data() {
                    FetchDecision::Deferred
                } else {
                    FetchDecision::Paused
                }
            });
        }

        let (generation, had_data) = self.store.set(key, |entry| (entry.begin_fetch(), entry.has_data()));
        debug!(key = %key, generation, "Explicit refetch");
        self.spawn_fetch(key.clone(), generation);
        if had_data {
            FetchDecision::Revalidate
        } else {
            FetchDecision::Fetch
        }
    }

    /// Mark matching entries stale and re-evaluate the observed ones.
    ///
    /// A request already in flight may have been issued before whatever
    /// caused the invalidation, so it is superseded rather than reused.
    pub fn invalidate(&self, filter: &QueryFilter) -> Vec<QueryKey> {
        let matched = self.store.invalidate(filter);
        for key in &matched {
            if !self.store.is_observed(key) {
                continue;
            }
            let fetching = self.store.get(key).map(|e| e.is_fetching).unwrap_or(false);
            if fetching {
                self.refetch(key);
            } else {
                self.evaluate(key);
            }
        }
        matched
    }

    /// Re-evaluate observed keys whose fetch was deferred while offline.
    pub fn resume_paused(&self) {
        for key in self.store.observed_keys() {
            let paused = self.store.get(&key).map(|e| e.is_paused).unwrap_or(false);
            if paused {
                self.evaluate(&key);
            }
        }
    }

    fn spawn_fetch(&self, key: QueryKey, generation: u64) {
        let request = self.backend.fetch_query(&key);
        let store = Arc::clone(&self.store);

        tokio::spawn(async move {
            let result = request.await.map_err(|e| {
                log_query_error(&key, &e);
                QueryError::from(&e)
            });

            let applied = store.set(&key, |entry| entry.complete(generation, result, Utc::now()));
            if !applied {
                debug!(key = %key, generation, "Discarded superseded response");
            }
        });
    }
}

/// Central error log for every failed query.
fn log_query_error(key: &QueryKey, err: &ApiError) {
    match err {
        ApiError::InvalidData { .. } => {
            warn!(key = %key, kind = "validation", error = %err, "Query error");
        }
        ApiError::Status { status, .. } => {
            warn!(key = %key, kind = "protocol", status, error = %err, "Query error");
        }
        ApiError::Network { .. } => {
            debug!(key = %key, kind = "transport", error = %err, "Query error");
        }
    }
}
