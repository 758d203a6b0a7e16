//! Offline-aware query cache.
//!
//! - `QueryKey`: structural identifier of a cacheable request
//! - `QueryStore`: the observable key → entry map
//! - `FetchCoordinator`: decides between fetching, serving cache, or pausing
//! - `QueryObserver`: a view's subscription to one key

pub mod backend;
pub mod coordinator;
pub mod entry;
pub mod key;
pub mod observer;
pub mod store;

pub use backend::ResourceBackend;
pub use coordinator::{decide, should_fetch, FetchCoordinator, FetchDecision};
pub use entry::{ErrorKind, QueryData, QueryEntry, QueryError, QueryStatus};
pub use key::{KeyPart, QueryFilter, QueryKey, QueryKind};
pub use observer::{QueryObserver, QueryView};
pub use store::{QueryDefaults, QueryStore};
