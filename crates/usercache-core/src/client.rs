//! The cache service a front end holds.
//!
//! `QueryClient` owns one store, coordinator, mutation executor and
//! persistence bridge. It is constructed explicitly and passed to
//! whoever needs it; several independent instances can coexist.
//!
//! Lifecycle:
//! 1. `new` wires the parts together (no tasks yet)
//! 2. `init` restores the snapshot in the background and starts the
//!    persistence writer, mutation resumer, reconnect watcher and GC sweep
//! 3. `teardown` stops every task and flushes a final snapshot; mutations
//!    still replaying stay queued in it

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::{PersistError, PersistenceBridge, RestoreGate, SnapshotStorage, MAX_SNAPSHOT_AGE_HOURS};
use crate::config::Config;
use crate::connectivity::{spawn_monitor, Connectivity, ConnectivitySource};
use crate::models::{NewUser, UserPatch};
use crate::mutation::{MutationExecutor, MutationHandle, Notification, UserMutation};
use crate::query::{
    FetchCoordinator, FetchDecision, QueryDefaults, QueryEntry, QueryFilter, QueryKey, QueryObserver,
    QueryStore, ResourceBackend,
};

/// How often unobserved entries are checked for expiry
const DEFAULT_GC_INTERVAL_SECS: u64 = 60;

#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub defaults: QueryDefaults,
    pub persist_throttle: Duration,
    pub max_snapshot_age: chrono::Duration,
    pub gc_interval: Duration,
    /// Initial connectivity, before any signal arrives.
    pub start_online: bool,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            defaults: QueryDefaults::default(),
            persist_throttle: Duration::from_millis(1000),
            max_snapshot_age: chrono::Duration::hours(MAX_SNAPSHOT_AGE_HOURS),
            gc_interval: Duration::from_secs(DEFAULT_GC_INTERVAL_SECS),
            start_online: true,
        }
    }
}

impl From<&Config> for ClientOptions {
    fn from(config: &Config) -> Self {
        Self {
            defaults: QueryDefaults {
                stale_after: chrono::Duration::seconds(config.stale_after_secs as i64),
                expire_after: chrono::Duration::seconds(config.expire_after_secs as i64),
            },
            persist_throttle: Duration::from_millis(config.persist_throttle_ms),
            start_online: !config.offline_mode,
            ..Self::default()
        }
    }
}

pub struct QueryClient {
    store: Arc<QueryStore>,
    coordinator: FetchCoordinator,
    executor: MutationExecutor,
    connectivity: Connectivity,
    restoration: RestoreGate,
    persistence: Arc<PersistenceBridge>,
    gc_interval: Duration,
    initialized: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl QueryClient {
    pub fn new(
        backend: Arc<dyn ResourceBackend>,
        storage: Arc<dyn SnapshotStorage>,
        options: ClientOptions,
    ) -> Self {
        let store = Arc::new(QueryStore::new(options.defaults));
        let connectivity = Connectivity::new(options.start_online);
        let restoration = RestoreGate::new();
        let coordinator = FetchCoordinator::new(
            Arc::clone(&store),
            Arc::clone(&backend),
            connectivity.clone(),
            restoration.clone(),
        );
        let executor = MutationExecutor::new(backend, coordinator.clone(), connectivity.clone());
        let persistence = Arc::new(
            PersistenceBridge::new(storage, options.persist_throttle).with_max_age(options.max_snapshot_age),
        );

        Self {
            store,
            coordinator,
            executor,
            connectivity,
            restoration,
            persistence,
            gc_interval: options.gc_interval,
            initialized: AtomicBool::new(false),
            tasks: Mutex::new(Vec::new()),
        }
    }

    // ===== Lifecycle =====

    /// Start restoration and the background tasks. Calling it twice is a
    /// no-op.
    pub fn init(&self) {
        if self.initialized.swap(true, Ordering::SeqCst) {
            warn!("QueryClient already initialized");
            return;
        }

        let mut tasks = self.lock_tasks();
        tasks.push(self.spawn_restore());
        tasks.push(self.persistence.spawn_writer(
            Arc::clone(&self.store),
            self.executor.clone(),
            self.restoration.clone(),
        ));
        tasks.push(self.executor.spawn_resumer());
        tasks.push(self.spawn_reconnect_watcher());
        tasks.push(self.spawn_gc());
        debug!("QueryClient initialized");
    }

    fn spawn_restore(&self) -> JoinHandle<()> {
        let store = Arc::clone(&self.store);
        let persistence = Arc::clone(&self.persistence);
        let restoration = self.restoration.clone();
        let coordinator = self.coordinator.clone();
        let executor = self.executor.clone();

        tokio::spawn(async move {
            // Storage reads block
            let hydrate_store = Arc::clone(&store);
            let mutations = tokio::task::spawn_blocking(move || {
                persistence.restore_into(&hydrate_store, Utc::now())
            })
            .await
            .unwrap_or_else(|e| {
                warn!(error = %e, "Cache restore task failed");
                Vec::new()
            });

            executor.restore_paused(mutations);
            restoration.finish();
            info!(entries = store.len(), "Cache restore complete");

            // Restored data is stale; observers held back while restoring
            // fetch now instead of waiting out the replay.
            coordinator.invalidate(&QueryFilter::All);

            let replayed = executor.resume_paused().await;
            if replayed > 0 {
                // Reads issued during the replay may predate the writes
                coordinator.invalidate(&QueryFilter::All);
            }
        })
    }

    fn spawn_reconnect_watcher(&self) -> JoinHandle<()> {
        let coordinator = self.coordinator.clone();
        let mut online = self.connectivity.subscribe();
        tokio::spawn(async move {
            while online.changed().await.is_ok() {
                let is_online = *online.borrow_and_update();
                if is_online {
                    coordinator.resume_paused();
                }
            }
        })
    }

    fn spawn_gc(&self) -> JoinHandle<()> {
        let store = Arc::clone(&self.store);
        let period = self.gc_interval;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            // The first tick completes immediately
            interval.tick().await;
            loop {
                interval.tick().await;
                store.collect_garbage(Utc::now());
            }
        })
    }

    /// Poll `source` for connectivity for as long as the client lives.
    pub fn spawn_connectivity_monitor<S: ConnectivitySource>(&self, source: S, interval: Duration) {
        let handle = spawn_monitor(source, self.connectivity.clone(), interval);
        self.lock_tasks().push(handle);
    }

    /// Resolve once the snapshot has been loaded (or found absent).
    pub async fn wait_restored(&self) {
        self.restoration.wait().await;
    }

    /// Resolve once queued mutations have been replayed, or immediately
    /// while offline.
    pub async fn wait_replayed(&self) {
        self.executor.wait_replayed().await;
    }

    /// Stop background tasks and write a final snapshot. The snapshot is
    /// skipped if restoration never finished, so an interrupted start
    /// cannot clobber the stored cache.
    pub fn teardown(&self) -> Result<(), PersistError> {
        let tasks: Vec<JoinHandle<()>> = self.lock_tasks().drain(..).collect();
        for task in &tasks {
            task.abort();
        }
        debug!(tasks = tasks.len(), "QueryClient torn down");

        if self.restoration.is_restoring() {
            return Ok(());
        }
        self.persistence.persist(&self.store, &self.executor)
    }

    fn lock_tasks(&self) -> std::sync::MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.tasks.lock().unwrap_or_else(|e| e.into_inner())
    }

    // ===== Queries =====

    /// Subscribe a view to `key`. Evaluates the key immediately.
    pub fn observe(&self, key: QueryKey) -> QueryObserver {
        QueryObserver::new(self.coordinator.clone(), key)
    }

    pub fn get(&self, key: &QueryKey) -> Option<Arc<QueryEntry>> {
        self.store.get(key)
    }

    pub fn refetch(&self, key: &QueryKey) -> FetchDecision {
        self.coordinator.refetch(key)
    }

    pub fn invalidate(&self, filter: &QueryFilter) -> Vec<QueryKey> {
        self.coordinator.invalidate(filter)
    }

    pub fn store(&self) -> &Arc<QueryStore> {
        &self.store
    }

    // ===== Mutations =====

    pub fn mutate(&self, mutation: UserMutation) -> MutationHandle {
        self.executor.submit(mutation)
    }

    pub fn create_user(&self, user: NewUser) -> MutationHandle {
        self.executor.create(user)
    }

    pub fn update_user(&self, id: u64, patch: UserPatch) -> MutationHandle {
        self.executor.update(id, patch)
    }

    pub fn delete_user(&self, id: u64) -> MutationHandle {
        self.executor.delete(id)
    }

    pub fn notifications(&self) -> broadcast::Receiver<Notification> {
        self.executor.notifications()
    }

    pub fn executor(&self) -> &MutationExecutor {
        &self.executor
    }

    // ===== Connectivity =====

    pub fn set_online(&self, online: bool) {
        self.connectivity.set_online(online);
    }

    pub fn is_online(&self) -> bool {
        self.connectivity.is_online()
    }

    pub fn is_restoring(&self) -> bool {
        self.restoration.is_restoring()
    }

    pub fn connectivity(&self) -> &Connectivity {
        &self.connectivity
    }
}

impl Drop for QueryClient {
    fn drop(&mut self) {
        for task in self.lock_tasks().drain(..) {
            task.abort();
        }
    }
}
