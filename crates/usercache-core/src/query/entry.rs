// Cache slot state and its transitions.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::api::ApiError;
use crate::models::{Comment, Post, User};

use super::QueryKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueryStatus {
    Idle,
    Loading,
    Success,
    Error,
}

/// Result payload for each query descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "camelCase")]
pub enum QueryData {
    Users(Vec<User>),
    User(User),
    Posts(Vec<Post>),
    Comments(Vec<Comment>),
}

impl QueryData {
    pub fn as_users(&self) -> Option<&[User]> {
        match self {
            QueryData::Users(users) => Some(users),
            _ => None,
        }
    }

    pub fn as_user(&self) -> Option<&User> {
        match self {
            QueryData::User(user) => Some(user),
            _ => None,
        }
    }

    pub fn as_posts(&self) -> Option<&[Post]> {
        match self {
            QueryData::Posts(posts) => Some(posts),
            _ => None,
        }
    }

    pub fn as_comments(&self) -> Option<&[Comment]> {
        match self {
            QueryData::Comments(comments) => Some(comments),
            _ => None,
        }
    }

    /// Number of records held (1 for a single record).
    pub fn len(&self) -> usize {
        match self {
            QueryData::Users(v) => v.len(),
            QueryData::User(_) => 1,
            QueryData::Posts(v) => v.len(),
            QueryData::Comments(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Failure category. Protocol and validation errors look the same to the
/// end user but are logged separately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    Transport,
    Protocol,
    Validation,
}

/// The error recorded in a cache entry.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{message}")]
pub struct QueryError {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&ApiError> for QueryError {
    fn from(err: &ApiError) -> Self {
        let kind = match err {
            ApiError::Network { .. } => ErrorKind::Transport,
            ApiError::Status { .. } => ErrorKind::Protocol,
            ApiError::InvalidData { .. } => ErrorKind::Validation,
        };
        Self {
            kind,
            message: err.to_string(),
        }
    }
}

/// One cache slot.
///
/// A completed attempt overwrites the previous terminal state: success
/// clears `error`, failure leaves `data` as the last known good value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryEntry {
    pub key: QueryKey,
    pub data: Option<Arc<QueryData>>,
    pub error: Option<QueryError>,
    pub status: QueryStatus,
    /// A fetch was wanted but deferred because the network is down.
    pub is_paused: bool,
    /// A request for this key is in flight.
    pub is_fetching: bool,
    /// Marked stale by an invalidation; refetch on next evaluation.
    pub is_invalidated: bool,
    pub last_updated: Option<DateTime<Utc>>,
    pub stale_after: Duration,
    pub expire_after: Duration,
    /// Sequence number of the most recently issued request.
    pub(crate) generation: u64,
}

impl QueryEntry {
    pub fn new(key: QueryKey, stale_after: Duration, expire_after: Duration) -> Self {
        Self {
            key,
            data: None,
            error: None,
            status: QueryStatus::Idle,
            is_paused: false,
            is_fetching: false,
            is_invalidated: false,
            last_updated: None,
            stale_after,
            expire_after,
            generation: 0,
        }
    }

    pub fn has_data(&self) -> bool {
        self.data.is_some()
    }

    /// Data is stale once `stale_after` has elapsed, or when invalidated.
    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        if self.is_invalidated {
            return true;
        }
        match self.last_updated {
            Some(updated) if self.data.is_some() => now - updated >= self.stale_after,
            _ => true,
        }
    }

    /// Start a new request and return its generation tag.
    pub(crate) fn begin_fetch(&mut self) -> u64 {
        self.generation += 1;
        self.is_fetching = true;
        self.is_paused = false;
        if self.data.is_none() {
            self.status = QueryStatus::Loading;
        }
        self.generation
    }

    /// Apply a response. Returns `false` (and changes nothing) when the
    /// response belongs to a superseded request.
    pub(crate) fn complete(
        &mut self,
        generation: u64,
        result: Result<QueryData, QueryError>,
        now: DateTime<Utc>,
    ) -> bool {
        if generation != self.generation {
            return false;
        }

        self.is_fetching = false;
        self.is_invalidated = false;
        match result {
            Ok(data) => {
                self.data = Some(Arc::new(data));
                self.error = None;
                self.status = QueryStatus::Success;
                self.last_updated = Some(now);
            }
            Err(error) => {
                self.error = Some(error);
                self.status = QueryStatus::Error;
            }
        }
        true
    }

    /// Record that a wanted fetch was deferred while offline.
    pub(crate) fn pause(&mut self) {
        self.is_paused = true;
    }

    pub(crate) fn invalidate(&mut self) {
        self.is_invalidated = true;
    }

    /// Seed the slot from a persisted snapshot.
    pub(crate) fn hydrate(&mut self, data: QueryData, updated_at: DateTime<Utc>) {
        self.data = Some(Arc::new(data));
        self.error = None;
        self.status = QueryStatus::Success;
        self.last_updated = Some(updated_at);
    }
}
