//! Create, update and delete of user records.
//!
//! Mutations issued while offline are queued in issue order and replayed
//! once connectivity returns. A successful mutation invalidates the user
//! list (and the user's detail query for update/delete) and emits a
//! success notification; a failure emits an error notification and leaves
//! the cache untouched.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::api::ApiError;
use crate::connectivity::Connectivity;
use crate::messages;
use crate::models::{NewUser, User, UserPatch};
use crate::query::{FetchCoordinator, QueryFilter, QueryKey, QueryKind, ResourceBackend};

/// Buffer size for the notification channel.
/// Slow subscribers lose the oldest notifications first.
const NOTIFICATION_BUFFER_SIZE: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum UserMutation {
    Create { user: NewUser },
    Update { id: u64, patch: UserPatch },
    Delete { id: u64 },
}

impl UserMutation {
    pub fn verb(&self) -> &'static str {
        match self {
            UserMutation::Create { .. } => "create",
            UserMutation::Update { .. } => "update",
            UserMutation::Delete { .. } => "delete",
        }
    }

    /// Queries made stale by a successful run.
    pub fn invalidates(&self) -> Vec<QueryFilter> {
        let users = QueryFilter::kind(QueryKind::Users);
        match self {
            UserMutation::Create { .. } => vec![users],
            UserMutation::Update { id, .. } | UserMutation::Delete { id } => {
                vec![users, QueryFilter::key(&QueryKey::User(*id))]
            }
        }
    }

    pub fn success_message(&self) -> &'static str {
        match self {
            UserMutation::Create { .. } => messages::USER_CREATED,
            UserMutation::Update { .. } => messages::USER_UPDATED,
            UserMutation::Delete { .. } => messages::USER_DELETED,
        }
    }

    pub fn failure_message(&self, err: &ApiError) -> String {
        format!("Failed to {} user: {}", self.verb(), err.detail())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationOutput {
    Created(User),
    Updated(User),
    Deleted(u64),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationState {
    Pending,
    /// Waiting for connectivity.
    Paused,
    Success(MutationOutput),
    Failed(String),
}

impl MutationState {
    pub fn is_finished(&self) -> bool {
        matches!(self, MutationState::Success(_) | MutationState::Failed(_))
    }
}

/// A mutation waiting for connectivity, as persisted in the snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedMutation {
    pub id: u64,
    pub mutation: UserMutation,
    pub submitted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationLevel {
    Success,
    Error,
}

/// User-visible outcome of a mutation (a toast).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub level: NotificationLevel,
    pub message: String,
}

/// The caller's view of one submitted mutation.
///
/// `is_pending` is what a submit or delete button checks to disable itself.
pub struct MutationHandle {
    id: u64,
    state: watch::Receiver<MutationState>,
}

impl MutationHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> MutationState {
        self.state.borrow().clone()
    }

    pub fn is_pending(&self) -> bool {
        !self.state.borrow().is_finished()
    }

    /// Wait for success or failure.
    pub async fn wait(&mut self) -> MutationState {
        if let Ok(state) = self.state.wait_for(MutationState::is_finished).await {
            return state.clone();
        }
        self.state()
    }
}

struct PausedMutation {
    queued: QueuedMutation,
    state: watch::Sender<MutationState>,
}

struct ExecutorInner {
    backend: Arc<dyn ResourceBackend>,
    coordinator: FetchCoordinator,
    connectivity: Connectivity,
    queue: Mutex<VecDeque<PausedMutation>>,
    /// Bumped whenever the paused queue changes, for persistence.
    queue_version: watch::Sender<u64>,
    next_id: AtomicU64,
    /// Mutations submitted online and still running. Replayed ones stay
    /// in `queue` until they finish, so they are not counted here.
    in_flight: AtomicUsize,
    notifications: broadcast::Sender<Notification>,
    /// Serializes replay so paused mutations run strictly in order.
    resume_lock: tokio::sync::Mutex<()>,
}

/// Runs user mutations. Clone is cheap.
#[derive(Clone)]
pub struct MutationExecutor {
    inner: Arc<ExecutorInner>,
}

impl MutationExecutor {
    pub fn new(
        backend: Arc<dyn ResourceBackend>,
        coordinator: FetchCoordinator,
        connectivity: Connectivity,
    ) -> Self {
        let (queue_version, _) = watch::channel(0u64);
        let (notifications, _) = broadcast::channel(NOTIFICATION_BUFFER_SIZE);
        Self {
            inner: Arc::new(ExecutorInner {
                backend,
                coordinator,
                connectivity,
                queue: Mutex::new(VecDeque::new()),
                queue_version,
                next_id: AtomicU64::new(1),
                in_flight: AtomicUsize::new(0),
                notifications,
                resume_lock: tokio::sync::Mutex::new(()),
            }),
        }
    }

    pub fn create(&self, user: NewUser) -> MutationHandle {
        self.submit(UserMutation::Create { user })
    }

    pub fn update(&self, id: u64, patch: UserPatch) -> MutationHandle {
        self.submit(UserMutation::Update { id, patch })
    }

    pub fn delete(&self, id: u64) -> MutationHandle {
        self.submit(UserMutation::Delete { id })
    }

    /// Run now, or queue if offline.
    pub fn submit(&self, mutation: UserMutation) -> MutationHandle {
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        let (state_tx, state_rx) = watch::channel(MutationState::Pending);
        let handle = MutationHandle { id, state: state_rx };

        if !self.inner.connectivity.is_online() {
            info!(id, op = mutation.verb(), "Offline, pausing mutation");
            state_tx.send_replace(MutationState::Paused);
            self.enqueue_back(PausedMutation {
                queued: QueuedMutation {
                    id,
                    mutation,
                    submitted_at: Utc::now(),
                },
                state: state_tx,
            });
            return handle;
        }

        let executor = self.clone();
        self.inner.in_flight.fetch_add(1, Ordering::SeqCst);
        tokio::spawn(async move {
            let result = executor.execute(id, &mutation).await;
            executor.inner.in_flight.fetch_sub(1, Ordering::SeqCst);
            executor.finish(&mutation, &state_tx, result);
        });
        handle
    }

    async fn execute(&self, id: u64, mutation: &UserMutation) -> Result<MutationOutput, ApiError> {
        debug!(id, op = mutation.verb(), "Executing mutation");
        self.inner.backend.execute_mutation(mutation).await
    }

    fn finish(
        &self,
        mutation: &UserMutation,
        state: &watch::Sender<MutationState>,
        result: Result<MutationOutput, ApiError>,
    ) {
        match result {
            Ok(output) => {
                for filter in mutation.invalidates() {
                    self.inner.coordinator.invalidate(&filter);
                }
                self.notify(NotificationLevel::Success, mutation.success_message().to_string());
                state.send_replace(MutationState::Success(output));
            }
            Err(e) => {
                warn!(op = mutation.verb(), error = %e, "Mutation error");
                let message = mutation.failure_message(&e);
                self.notify(NotificationLevel::Error, message.clone());
                state.send_replace(MutationState::Failed(message));
            }
        }
    }

    /// Replay paused mutations in issue order. Stops early if connectivity
    /// drops mid-replay; the interrupted mutation stays at the front.
    ///
    /// A mutation leaves the queue only once its request has finished, so
    /// a replay cut short (task aborted, process exit) still finds it in
    /// the persisted snapshot.
    pub async fn resume_paused(&self) -> usize {
        let _guard = self.inner.resume_lock.lock().await;
        let mut resumed = 0;

        while self.inner.connectivity.is_online() {
            let Some(queued) = self.front() else {
                break;
            };

            self.set_queued_state(queued.id, MutationState::Pending);
            let result = self.execute(queued.id, &queued.mutation).await;

            match result {
                Err(e) if e.is_transport() && !self.inner.connectivity.is_online() => {
                    debug!(id = queued.id, "Connectivity lost during replay, re-pausing");
                    self.set_queued_state(queued.id, MutationState::Paused);
                    break;
                }
                result => {
                    match self.remove(queued.id) {
                        Some(paused) => self.finish(&queued.mutation, &paused.state, result),
                        None => warn!(id = queued.id, "Replayed mutation left the queue early"),
                    }
                    resumed += 1;
                }
            }
        }

        if resumed > 0 {
            info!(resumed, "Resumed paused mutations");
        }
        resumed
    }

    /// Mutations waiting for connectivity, oldest first.
    pub fn paused(&self) -> Vec<QueuedMutation> {
        self.lock_queue().iter().map(|p| p.queued.clone()).collect()
    }

    /// Re-queue mutations loaded from a snapshot.
    pub fn restore_paused(&self, mutations: Vec<QueuedMutation>) {
        if mutations.is_empty() {
            return;
        }
        let max_id = mutations.iter().map(|m| m.id).max().unwrap_or(0);
        self.inner.next_id.fetch_max(max_id + 1, Ordering::SeqCst);

        info!(count = mutations.len(), "Restored paused mutations");
        for queued in mutations {
            let (state, _) = watch::channel(MutationState::Paused);
            self.enqueue_back(PausedMutation { queued, state });
        }
    }

    /// Paused plus in-flight mutations.
    pub fn pending_count(&self) -> usize {
        self.lock_queue().len() + self.inner.in_flight.load(Ordering::SeqCst)
    }

    /// Resolve once the paused queue is empty, or immediately when offline
    /// (nothing will drain it until connectivity returns).
    pub async fn wait_replayed(&self) {
        let mut queue = self.inner.queue_version.subscribe();
        let mut online = self.inner.connectivity.subscribe();
        loop {
            if self.lock_queue().is_empty() || !*online.borrow_and_update() {
                return;
            }
            tokio::select! {
                r = queue.changed() => if r.is_err() { return },
                r = online.changed() => if r.is_err() { return },
            }
        }
    }

    pub fn notifications(&self) -> broadcast::Receiver<Notification> {
        self.inner.notifications.subscribe()
    }

    pub fn subscribe_queue(&self) -> watch::Receiver<u64> {
        self.inner.queue_version.subscribe()
    }

    /// Replay the queue every time connectivity comes back.
    pub fn spawn_resumer(&self) -> JoinHandle<()> {
        let executor = self.clone();
        let mut online = self.inner.connectivity.subscribe();
        tokio::spawn(async move {
            while online.changed().await.is_ok() {
                let is_online = *online.borrow_and_update();
                if is_online {
                    executor.resume_paused().await;
                }
            }
        })
    }

    fn notify(&self, level: NotificationLevel, message: String) {
        // No receivers is fine; nobody is showing toasts
        let _ = self.inner.notifications.send(Notification { level, message });
    }

    fn lock_queue(&self) -> std::sync::MutexGuard<'_, VecDeque<PausedMutation>> {
        self.inner.queue.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn enqueue_back(&self, paused: PausedMutation) {
        self.lock_queue().push_back(paused);
        self.bump_queue();
    }

    fn front(&self) -> Option<QueuedMutation> {
        self.lock_queue().front().map(|p| p.queued.clone())
    }

    fn set_queued_state(&self, id: u64, state: MutationState) {
        if let Some(paused) = self.lock_queue().iter().find(|p| p.queued.id == id) {
            paused.state.send_replace(state);
        }
    }

    fn remove(&self, id: u64) -> Option<PausedMutation> {
        let removed = {
            let mut queue = self.lock_queue();
            let index = queue.iter().position(|p| p.queued.id == id)?;
            queue.remove(index)
        };
        self.bump_queue();
        removed
    }

    fn bump_queue(&self) {
        self.inner.queue_version.send_modify(|v| *v += 1);
    }
}
