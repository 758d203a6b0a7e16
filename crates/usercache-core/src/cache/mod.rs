//! Durable storage for the query cache.
//!
//! This module provides:
//! - `SnapshotStorage`: where the serialized snapshot lives (`FileStorage`,
//!   `MemoryStorage`)
//! - `CacheSnapshot`: the persisted form of successful queries and paused
//!   mutations
//! - `PersistenceBridge`: restore at startup, throttled mirroring afterwards
//! - `RestoreGate`: the process-wide "still restoring" flag
//!
//! Snapshot entries older than 24 hours are dropped at restore time.

pub mod restore;
pub mod snapshot;
pub mod storage;

pub use restore::RestoreGate;
pub use snapshot::{CacheSnapshot, PersistedQuery, PersistenceBridge, MAX_SNAPSHOT_AGE_HOURS};
pub use storage::{FileStorage, MemoryStorage, PersistError, SnapshotStorage};
