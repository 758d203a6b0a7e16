use std::fmt;

use serde::{Deserialize, Serialize};

/// Resource kind, the first element of every query key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum QueryKind {
    Users,
    User,
    UserPosts,
    Comments,
}

impl QueryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryKind::Users => "users",
            QueryKind::User => "user",
            QueryKind::UserPosts => "userPosts",
            QueryKind::Comments => "comments",
        }
    }
}

/// One element of a key tuple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyPart {
    Kind(QueryKind),
    Id(u64),
}

/// Structural identifier of a cacheable query: `(kind, params...)`.
///
/// The set of descriptors is closed; each one maps to exactly one
/// fetch in `ResourceBackend::fetch_query`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "camelCase")]
pub enum QueryKey {
    /// `["users"]`
    Users,
    /// `["user", userId]`
    User(u64),
    /// `["userPosts", userId]`
    UserPosts(u64),
    /// `["comments", postId]`
    Comments(u64),
}

impl QueryKey {
    pub fn kind(&self) -> QueryKind {
        match self {
            QueryKey::Users => QueryKind::Users,
            QueryKey::User(_) => QueryKind::User,
            QueryKey::UserPosts(_) => QueryKind::UserPosts,
            QueryKey::Comments(_) => QueryKind::Comments,
        }
    }

    /// The key as an ordered tuple.
    pub fn parts(&self) -> Vec<KeyPart> {
        let kind = KeyPart::Kind(self.kind());
        match self {
            QueryKey::Users => vec![kind],
            QueryKey::User(id) | QueryKey::UserPosts(id) | QueryKey::Comments(id) => {
                vec![kind, KeyPart::Id(*id)]
            }
        }
    }

    pub fn starts_with(&self, prefix: &[KeyPart]) -> bool {
        let parts = self.parts();
        prefix.len() <= parts.len() && parts.iter().zip(prefix).all(|(a, b)| a == b)
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryKey::Users => write!(f, "[\"{}\"]", self.kind().as_str()),
            QueryKey::User(id) | QueryKey::UserPosts(id) | QueryKey::Comments(id) => {
                write!(f, "[\"{}\", {}]", self.kind().as_str(), id)
            }
        }
    }
}

/// Selects entries for invalidation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryFilter {
    All,
    Prefix(Vec<KeyPart>),
}

impl QueryFilter {
    /// Every query of one kind, whatever its parameters.
    pub fn kind(kind: QueryKind) -> Self {
        QueryFilter::Prefix(vec![KeyPart::Kind(kind)])
    }

    /// Exactly one key (a full-length prefix).
    pub fn key(key: &QueryKey) -> Self {
        QueryFilter::Prefix(key.parts())
    }

    pub fn matches(&self, key: &QueryKey) -> bool {
        match self {
            QueryFilter::All => true,
            QueryFilter::Prefix(prefix) => key.starts_with(prefix),
        }
    }
}
