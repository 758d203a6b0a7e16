#![allow(clippy::unwrap_used, dead_code)]
// Shared fixtures: record builders and an in-memory scripted backend.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use reqwest::StatusCode;

use usercache_core::api::ApiError;
use usercache_core::models::{Address, Company, Geo, NewUser, Post, User};
use usercache_core::mutation::{MutationOutput, UserMutation};
use usercache_core::query::{QueryData, QueryKey, ResourceBackend};

// ── Records ─────────────────────────────────────────────────────────

pub fn user(id: u64, name: &str) -> User {
    let username = name.to_lowercase().replace(' ', "");
    User {
        id,
        name: name.to_string(),
        email: format!("{username}@example.com"),
        username,
        address: Address {
            street: "Kulas Light".into(),
            suite: "Apt. 556".into(),
            city: "Gwenborough".into(),
            zipcode: "92998-3874".into(),
            geo: Geo {
                lat: "-37.3159".into(),
                lng: "81.1496".into(),
            },
        },
        phone: "1-770-736-8031".into(),
        website: "hildegard.org".into(),
        company: Company {
            name: "Romaguera-Crona".into(),
            catch_phrase: "Multi-layered client-server neural-net".into(),
            bs: "harness real-time e-markets".into(),
        },
    }
}

pub fn users(count: u64) -> Vec<User> {
    (1..=count).map(|id| user(id, &format!("User {id}"))).collect()
}

pub fn new_user(name: &str) -> NewUser {
    NewUser::from(&user(0, name))
}

pub fn post(user_id: u64, id: u64) -> Post {
    Post {
        user_id,
        id,
        title: format!("Post {id}"),
        body: "body".into(),
    }
}

// ── Scripted backend ────────────────────────────────────────────────

/// A fake user directory. Reads answer from the current state at call
/// time; writes change it.
#[derive(Default)]
pub struct ScriptedBackend {
    users: Mutex<Vec<User>>,
    posts: Mutex<Vec<Post>>,
    fetches: Mutex<HashMap<QueryKey, usize>>,
    mutations: Mutex<Vec<UserMutation>>,
    /// Per-call response delays for reads, consumed in order.
    delays: Mutex<VecDeque<Duration>>,
    fail_queries: Mutex<Option<StatusCode>>,
    fail_mutations: Mutex<Option<StatusCode>>,
    /// Response delay applied to every write.
    mutation_delay: Mutex<Option<Duration>>,
}

impl ScriptedBackend {
    pub fn with_users(users: Vec<User>) -> Arc<Self> {
        let backend = Self::default();
        *backend.users.lock().unwrap() = users;
        Arc::new(backend)
    }

    pub fn set_users(&self, users: Vec<User>) {
        *self.users.lock().unwrap() = users;
    }

    pub fn set_posts(&self, posts: Vec<Post>) {
        *self.posts.lock().unwrap() = posts;
    }

    pub fn push_delay(&self, delay: Duration) {
        self.delays.lock().unwrap().push_back(delay);
    }

    pub fn fail_queries(&self, status: Option<StatusCode>) {
        *self.fail_queries.lock().unwrap() = status;
    }

    pub fn fail_mutations(&self, status: Option<StatusCode>) {
        *self.fail_mutations.lock().unwrap() = status;
    }

    pub fn set_mutation_delay(&self, delay: Duration) {
        *self.mutation_delay.lock().unwrap() = Some(delay);
    }

    pub fn fetch_count(&self, key: &QueryKey) -> usize {
        self.fetches.lock().unwrap().get(key).copied().unwrap_or(0)
    }

    pub fn mutations(&self) -> Vec<UserMutation> {
        self.mutations.lock().unwrap().clone()
    }

    fn answer(&self, key: &QueryKey) -> Result<QueryData, ApiError> {
        if let Some(status) = *self.fail_queries.lock().unwrap() {
            return Err(ApiError::from_status("fetch users", status));
        }
        let users = self.users.lock().unwrap();
        match key {
            QueryKey::Users => Ok(QueryData::Users(users.clone())),
            QueryKey::User(id) => users
                .iter()
                .find(|u| u.id == *id)
                .cloned()
                .map(QueryData::User)
                .ok_or_else(|| ApiError::from_status("fetch user", StatusCode::NOT_FOUND)),
            QueryKey::UserPosts(user_id) => Ok(QueryData::Posts(
                self.posts
                    .lock()
                    .unwrap()
                    .iter()
                    .filter(|p| p.user_id == *user_id)
                    .cloned()
                    .collect(),
            )),
            QueryKey::Comments(_) => Ok(QueryData::Comments(vec![])),
        }
    }

    fn apply(&self, mutation: &UserMutation) -> Result<MutationOutput, ApiError> {
        self.mutations.lock().unwrap().push(mutation.clone());
        if let Some(status) = *self.fail_mutations.lock().unwrap() {
            let action = match mutation {
                UserMutation::Create { .. } => "create user",
                UserMutation::Update { .. } => "update user",
                UserMutation::Delete { .. } => "delete user",
            };
            return Err(ApiError::from_status(action, status));
        }

        let mut users = self.users.lock().unwrap();
        match mutation {
            UserMutation::Create { user: new } => {
                let id = users.iter().map(|u| u.id).max().unwrap_or(0) + 1;
                let mut created = user(id, &new.name);
                created.username = new.username.clone();
                users.push(created.clone());
                Ok(MutationOutput::Created(created))
            }
            UserMutation::Update { id, patch } => {
                let slot = users
                    .iter_mut()
                    .find(|u| u.id == *id)
                    .ok_or_else(|| ApiError::from_status("update user", StatusCode::NOT_FOUND))?;
                *slot = slot.with_patch(patch);
                Ok(MutationOutput::Updated(slot.clone()))
            }
            UserMutation::Delete { id } => {
                users.retain(|u| u.id != *id);
                Ok(MutationOutput::Deleted(*id))
            }
        }
    }
}

impl ResourceBackend for ScriptedBackend {
    fn fetch_query(&self, key: &QueryKey) -> BoxFuture<'static, Result<QueryData, ApiError>> {
        *self.fetches.lock().unwrap().entry(key.clone()).or_insert(0) += 1;
        let result = self.answer(key);
        let delay = self.delays.lock().unwrap().pop_front();
        Box::pin(async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            result
        })
    }

    fn execute_mutation(
        &self,
        mutation: &UserMutation,
    ) -> BoxFuture<'static, Result<MutationOutput, ApiError>> {
        let result = self.apply(mutation);
        let delay = *self.mutation_delay.lock().unwrap();
        Box::pin(async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            result
        })
    }
}

// ── Waiting ─────────────────────────────────────────────────────────

/// Poll `condition` until it holds, failing the test after two seconds.
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    let waited = tokio::time::timeout(Duration::from_secs(2), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "condition not reached within 2s");
}

/// Bound any future by two seconds.
pub async fn within<F: Future>(future: F) -> F::Output {
    tokio::time::timeout(Duration::from_secs(2), future)
        .await
        .expect("timed out")
}
