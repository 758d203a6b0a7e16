//! Core library for usercache.
//!
//! An offline-aware query cache in front of a REST user directory:
//! typed resource client, observable cache store, fetch coordination
//! driven by connectivity and freshness, snapshot persistence, offline
//! mutation queueing and list pagination.

pub mod api;
pub mod cache;
pub mod client;
pub mod config;
pub mod connectivity;
pub mod messages;
pub mod models;
pub mod mutation;
pub mod pagination;
pub mod query;
pub mod utils;

pub use api::{ApiClient, ApiError};
pub use client::{ClientOptions, QueryClient};
pub use config::Config;
pub use connectivity::Connectivity;
pub use mutation::{MutationHandle, MutationState, Notification, NotificationLevel, UserMutation};
pub use pagination::{Paginator, ITEMS_PER_PAGE};
pub use query::{QueryKey, QueryView};
