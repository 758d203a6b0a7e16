#![allow(clippy::unwrap_used)]
// End-to-end behavior of `QueryClient` against a scripted backend:
// restore gating, offline reads, mutation invalidation and replay,
// request ordering and snapshot persistence.

mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use reqwest::StatusCode;

use common::{eventually, new_user, post, users, within, ScriptedBackend};
use usercache_core::cache::{CacheSnapshot, MemoryStorage, SnapshotStorage};
use usercache_core::models::UserPatch;
use usercache_core::mutation::{MutationOutput, MutationState, NotificationLevel, QueuedMutation, UserMutation};
use usercache_core::query::{FetchDecision, QueryData, QueryDefaults, QueryKey, QueryStore, QueryView, ResourceBackend};
use usercache_core::{ClientOptions, QueryClient};

// ── Helpers ─────────────────────────────────────────────────────────

fn client(backend: &Arc<ScriptedBackend>, storage: &Arc<MemoryStorage>, online: bool) -> QueryClient {
    let backend: Arc<dyn ResourceBackend> = backend.clone();
    let storage: Arc<dyn SnapshotStorage> = storage.clone();
    let options = ClientOptions {
        defaults: QueryDefaults {
            // Long enough that only invalidation triggers refetches
            stale_after: chrono::Duration::hours(1),
            expire_after: chrono::Duration::hours(24),
        },
        persist_throttle: Duration::from_millis(10),
        start_online: online,
        ..ClientOptions::default()
    };
    QueryClient::new(backend, storage, options)
}

async fn started(backend: &Arc<ScriptedBackend>, storage: &Arc<MemoryStorage>, online: bool) -> QueryClient {
    let client = client(backend, storage, online);
    client.init();
    within(client.wait_restored()).await;
    client
}

/// A stored snapshot holding `data` for `key`, last updated `age` ago.
fn snapshot_storage(key: QueryKey, data: QueryData, age: chrono::Duration) -> Arc<MemoryStorage> {
    let now = Utc::now();
    let store = QueryStore::new(QueryDefaults::default());
    store.hydrate(&key, data, now - age);
    let snapshot = CacheSnapshot::capture(&store, vec![], now);
    Arc::new(MemoryStorage::with_contents(serde_json::to_string(&snapshot).unwrap()))
}

/// A stored snapshot holding one mutation queued while offline.
fn queued_storage(mutation: UserMutation) -> Arc<MemoryStorage> {
    let queued = QueuedMutation {
        id: 1,
        mutation,
        submitted_at: Utc::now(),
    };
    let snapshot = CacheSnapshot::capture(&QueryStore::new(QueryDefaults::default()), vec![queued], Utc::now());
    Arc::new(MemoryStorage::with_contents(serde_json::to_string(&snapshot).unwrap()))
}

fn user_ids(view: &QueryView) -> Vec<u64> {
    view.data()
        .and_then(|d| d.as_users())
        .map(|users| users.iter().map(|u| u.id).collect())
        .unwrap_or_default()
}

// ── Restoration ─────────────────────────────────────────────────────

#[tokio::test]
async fn test_no_fetch_while_restoring() {
    let backend = ScriptedBackend::with_users(users(3));
    let storage = Arc::new(MemoryStorage::new());
    let client = client(&backend, &storage, true);

    let mut observer = client.observe(QueryKey::Users);
    assert!(client.is_restoring());
    assert!(observer.view().is_pending());
    assert_eq!(client.refetch(&QueryKey::Users), FetchDecision::Suppressed);
    tokio::task::yield_now().await;
    assert_eq!(backend.fetch_count(&QueryKey::Users), 0);

    client.init();
    within(client.wait_restored()).await;
    let view = within(observer.resolve()).await;

    assert_eq!(user_ids(&view), vec![1, 2, 3]);
    assert_eq!(backend.fetch_count(&QueryKey::Users), 1);
}

#[tokio::test]
async fn test_restore_does_not_wait_for_mutation_replay() {
    let backend = ScriptedBackend::with_users(users(8));
    backend.set_posts(vec![post(1, 1)]);
    backend.set_mutation_delay(Duration::from_millis(500));
    let storage = queued_storage(UserMutation::Delete { id: 7 });
    let client = client(&backend, &storage, true);

    let mut observer = client.observe(QueryKey::UserPosts(1));
    client.init();
    within(client.wait_restored()).await;

    let view = tokio::time::timeout(Duration::from_millis(200), observer.resolve())
        .await
        .expect("view resolves while the replay is still running");
    assert_eq!(view.data().and_then(|d| d.as_posts()).map(|p| p.len()), Some(1));
    assert_eq!(client.executor().pending_count(), 1);
}

#[tokio::test]
async fn test_teardown_mid_replay_keeps_mutation_queued() {
    let backend = ScriptedBackend::with_users(users(8));
    backend.set_mutation_delay(Duration::from_millis(500));
    let storage = queued_storage(UserMutation::Delete { id: 7 });
    let client = started(&backend, &storage, true).await;

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(backend.mutations(), vec![UserMutation::Delete { id: 7 }], "replay has started");
    client.teardown().unwrap();

    let snapshot: CacheSnapshot = serde_json::from_str(&storage.contents().unwrap()).unwrap();
    assert_eq!(snapshot.mutations.len(), 1);
    assert_eq!(snapshot.mutations[0].mutation, UserMutation::Delete { id: 7 });
}

#[tokio::test]
async fn test_wait_replayed_drains_restored_queue() {
    let backend = ScriptedBackend::with_users(users(8));
    backend.set_mutation_delay(Duration::from_millis(100));
    let storage = queued_storage(UserMutation::Delete { id: 7 });
    let client = started(&backend, &storage, true).await;
    assert_eq!(client.executor().pending_count(), 1);

    within(client.wait_replayed()).await;
    assert_eq!(client.executor().pending_count(), 0);
    assert_eq!(backend.mutations(), vec![UserMutation::Delete { id: 7 }]);

    client.teardown().unwrap();
    assert!(!storage.contents().unwrap().contains("\"op\":\"delete\""));
}

#[tokio::test]
async fn test_offline_serves_cached_users() {
    let backend = ScriptedBackend::with_users(users(10));
    let storage = snapshot_storage(QueryKey::Users, QueryData::Users(users(10)), chrono::Duration::hours(1));
    let client = started(&backend, &storage, false).await;

    let mut observer = client.observe(QueryKey::Users);
    let view = observer.view();
    assert!(!client.is_online());
    assert!(matches!(view, QueryView::Ready { is_paused: true, .. }));
    assert_eq!(user_ids(&view).len(), 10);
    assert_eq!(backend.fetch_count(&QueryKey::Users), 0);

    // Reconnecting revalidates the stale entry in the background
    client.set_online(true);
    eventually(|| backend.fetch_count(&QueryKey::Users) == 1).await;
    let view = within(observer.settled()).await;
    assert!(matches!(view, QueryView::Ready { is_fetching: false, is_paused: false, .. }));
}

#[tokio::test]
async fn test_offline_without_cache_is_paused_not_failed() {
    let backend = ScriptedBackend::with_users(users(4));
    let storage = Arc::new(MemoryStorage::new());
    let client = started(&backend, &storage, false).await;

    let mut observer = client.observe(QueryKey::User(3));
    assert_eq!(observer.view(), QueryView::PausedNoData);
    assert_eq!(backend.fetch_count(&QueryKey::User(3)), 0);

    client.set_online(true);
    let entry = within(observer.wait_for(|e| e.has_data())).await.unwrap();
    let user = entry.data.as_ref().and_then(|d| d.as_user()).cloned().unwrap();
    assert_eq!(user.id, 3);
    assert!(!entry.is_paused);
}

#[tokio::test]
async fn test_snapshot_older_than_a_day_is_dropped() {
    let backend = ScriptedBackend::with_users(users(2));
    let storage = snapshot_storage(QueryKey::Users, QueryData::Users(users(2)), chrono::Duration::hours(25));
    let client = started(&backend, &storage, false).await;

    let observer = client.observe(QueryKey::Users);
    assert_eq!(observer.view(), QueryView::PausedNoData);
}

#[tokio::test]
async fn test_cache_survives_restart() {
    let backend = ScriptedBackend::with_users(users(1));
    backend.set_posts(vec![post(1, 1), post(1, 2), post(2, 3)]);
    let storage = Arc::new(MemoryStorage::new());

    let first = started(&backend, &storage, true).await;
    let mut observer = first.observe(QueryKey::UserPosts(1));
    within(observer.settled()).await;
    eventually(|| storage.contents().is_some_and(|c| c.contains("userPosts"))).await;
    drop(observer);
    first.teardown().unwrap();

    let second = started(&backend, &storage, false).await;
    let observer = second.observe(QueryKey::UserPosts(1));
    let posts = observer.view().data().and_then(|d| d.as_posts()).map(|p| p.len());
    assert_eq!(posts, Some(2));
    assert_eq!(backend.fetch_count(&QueryKey::UserPosts(1)), 1);
}

#[tokio::test]
async fn test_teardown_during_restore_keeps_snapshot() {
    let backend = ScriptedBackend::with_users(users(2));
    let storage = snapshot_storage(QueryKey::Users, QueryData::Users(users(2)), chrono::Duration::hours(1));
    let before = storage.contents();

    let client = client(&backend, &storage, true);
    client.teardown().unwrap();
    assert_eq!(storage.contents(), before);
}

// ── Queries ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_concurrent_observers_share_one_request() {
    let backend = ScriptedBackend::with_users(users(3));
    backend.push_delay(Duration::from_millis(50));
    let storage = Arc::new(MemoryStorage::new());
    let client = started(&backend, &storage, true).await;

    let mut a = client.observe(QueryKey::Users);
    let mut b = client.observe(QueryKey::Users);
    within(a.resolve()).await;
    within(b.resolve()).await;
    assert_eq!(backend.fetch_count(&QueryKey::Users), 1);
}

#[tokio::test]
async fn test_later_request_wins_over_slower_earlier_one() {
    let backend = ScriptedBackend::with_users(users(2));
    let storage = Arc::new(MemoryStorage::new());
    let client = started(&backend, &storage, true).await;

    // First request answers with 2 users but arrives late
    backend.push_delay(Duration::from_millis(200));
    let mut observer = client.observe(QueryKey::Users);

    backend.set_users(users(5));
    assert_eq!(client.refetch(&QueryKey::Users), FetchDecision::Fetch);

    within(observer.wait_for(|e| e.data.as_ref().map(|d| d.len()) == Some(5))).await;
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(user_ids(&observer.view()).len(), 5);
    assert_eq!(backend.fetch_count(&QueryKey::Users), 2);
}

#[tokio::test]
async fn test_failed_query_waits_for_explicit_retry() {
    let backend = ScriptedBackend::with_users(users(3));
    backend.fail_queries(Some(StatusCode::NOT_FOUND));
    let storage = Arc::new(MemoryStorage::new());
    let client = started(&backend, &storage, true).await;

    let mut observer = client.observe(QueryKey::Users);
    match within(observer.resolve()).await {
        QueryView::Failed { error, data } => {
            assert_eq!(error.message, "Failed to fetch users: Not Found");
            assert!(data.is_none());
        }
        other => panic!("expected failure, got {other:?}"),
    }

    // No automatic retry for another observer
    let _second = client.observe(QueryKey::Users);
    assert_eq!(backend.fetch_count(&QueryKey::Users), 1);

    backend.fail_queries(None);
    assert_eq!(observer.refetch(), FetchDecision::Fetch);
    let view = within(observer.wait_for(|e| e.error.is_none())).await;
    assert!(view.is_some());
    assert_eq!(backend.fetch_count(&QueryKey::Users), 2);
}

// ── Mutations ───────────────────────────────────────────────────────

#[tokio::test]
async fn test_delete_invalidates_user_list() {
    let backend = ScriptedBackend::with_users(users(6));
    let storage = Arc::new(MemoryStorage::new());
    let client = started(&backend, &storage, true).await;
    let mut notifications = client.notifications();

    let mut observer = client.observe(QueryKey::Users);
    assert!(user_ids(&within(observer.settled()).await).contains(&5));

    let mut handle = client.delete_user(5);
    assert!(handle.is_pending());
    assert_eq!(within(handle.wait()).await, MutationState::Success(MutationOutput::Deleted(5)));

    let note = within(notifications.recv()).await.unwrap();
    assert_eq!(note.level, NotificationLevel::Success);
    assert_eq!(note.message, "User deleted successfully");

    let entry = within(observer.wait_for(|e| {
        !e.is_fetching && e.data.as_ref().and_then(|d| d.as_users()).is_some_and(|u| u.len() == 5)
    }))
    .await
    .unwrap();
    let ids: Vec<u64> = entry.data.as_ref().and_then(|d| d.as_users()).unwrap().iter().map(|u| u.id).collect();
    assert!(!ids.contains(&5));
    assert_eq!(backend.fetch_count(&QueryKey::Users), 2);
}

#[tokio::test]
async fn test_update_marks_unobserved_list_stale() {
    let backend = ScriptedBackend::with_users(users(3));
    let storage = Arc::new(MemoryStorage::new());
    let client = started(&backend, &storage, true).await;

    let mut observer = client.observe(QueryKey::Users);
    within(observer.settled()).await;
    drop(observer);

    let patch = UserPatch {
        name: Some("Renamed".to_string()),
        ..Default::default()
    };
    let mut handle = client.update_user(1, patch);
    assert!(matches!(within(handle.wait()).await, MutationState::Success(MutationOutput::Updated(_))));
    assert!(client.get(&QueryKey::Users).unwrap().is_invalidated);
    assert_eq!(backend.fetch_count(&QueryKey::Users), 1);

    // Still well within the freshness window, but the next read refetches
    let mut observer = client.observe(QueryKey::Users);
    let view = within(observer.settled()).await;
    let first = view.data().and_then(|d| d.as_users()).unwrap()[0].clone();
    assert_eq!(first.name, "Renamed");
    assert_eq!(backend.fetch_count(&QueryKey::Users), 2);
}

#[tokio::test]
async fn test_offline_create_runs_on_reconnect() {
    let backend = ScriptedBackend::with_users(users(2));
    let storage = Arc::new(MemoryStorage::new());
    let client = started(&backend, &storage, true).await;
    let mut notifications = client.notifications();

    let mut observer = client.observe(QueryKey::Users);
    within(observer.settled()).await;

    client.set_online(false);
    let mut handle = client.create_user(new_user("Jane Roe"));
    assert_eq!(handle.state(), MutationState::Paused);
    assert!(handle.is_pending());
    assert_eq!(client.executor().pending_count(), 1);
    assert!(backend.mutations().is_empty());

    client.set_online(true);
    match within(handle.wait()).await {
        MutationState::Success(MutationOutput::Created(user)) => assert_eq!(user.name, "Jane Roe"),
        other => panic!("expected created user, got {other:?}"),
    }
    assert_eq!(within(notifications.recv()).await.unwrap().message, "User created successfully");

    within(observer.wait_for(|e| {
        e.data
            .as_ref()
            .and_then(|d| d.as_users())
            .is_some_and(|u| u.iter().any(|u| u.name == "Jane Roe"))
    }))
    .await;
    assert_eq!(client.executor().pending_count(), 0);
}

#[tokio::test]
async fn test_paused_mutations_replay_in_issue_order() {
    let backend = ScriptedBackend::with_users(users(4));
    let storage = Arc::new(MemoryStorage::new());
    let client = started(&backend, &storage, false).await;

    let mut handles = vec![
        client.delete_user(2),
        client.delete_user(3),
        client.create_user(new_user("Jane Roe")),
    ];
    client.set_online(true);
    for handle in &mut handles {
        within(handle.wait()).await;
    }

    let ops: Vec<&'static str> = backend.mutations().iter().map(UserMutation::verb).collect();
    assert_eq!(ops, vec!["delete", "delete", "create"]);
    assert!(matches!(backend.mutations()[1], UserMutation::Delete { id: 3 }));
}

#[tokio::test]
async fn test_failed_mutation_leaves_cache_untouched() {
    let backend = ScriptedBackend::with_users(users(3));
    backend.fail_mutations(Some(StatusCode::INTERNAL_SERVER_ERROR));
    let storage = Arc::new(MemoryStorage::new());
    let client = started(&backend, &storage, true).await;
    let mut notifications = client.notifications();

    let mut observer = client.observe(QueryKey::Users);
    within(observer.settled()).await;

    let mut handle = client.delete_user(2);
    let expected = "Failed to delete user: Internal Server Error";
    assert_eq!(within(handle.wait()).await, MutationState::Failed(expected.to_string()));

    let note = within(notifications.recv()).await.unwrap();
    assert_eq!(note.level, NotificationLevel::Error);
    assert_eq!(note.message, expected);

    let entry = client.get(&QueryKey::Users).unwrap();
    assert!(!entry.is_invalidated);
    assert_eq!(backend.fetch_count(&QueryKey::Users), 1);
}

#[tokio::test]
async fn test_paused_mutation_survives_restart() {
    let backend = ScriptedBackend::with_users(users(2));
    let storage = Arc::new(MemoryStorage::new());

    let first = started(&backend, &storage, false).await;
    let handle = first.delete_user(1);
    assert_eq!(handle.state(), MutationState::Paused);
    first.teardown().unwrap();
    assert!(storage.contents().unwrap().contains("\"op\":\"delete\""));

    let second = client(&backend, &storage, true);
    let mut notifications = second.notifications();
    second.init();

    let note = within(notifications.recv()).await.unwrap();
    assert_eq!(note.message, "User deleted successfully");
    assert!(matches!(backend.mutations().as_slice(), [UserMutation::Delete { id: 1 }]));
}
