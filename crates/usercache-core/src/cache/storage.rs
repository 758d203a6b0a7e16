use std::path::{Path, PathBuf};
use std::sync::Mutex;

use thiserror::Error;

/// Snapshot file name in the cache directory
pub const SNAPSHOT_FILE: &str = "query-cache.json";

#[derive(Error, Debug)]
pub enum PersistError {
    #[error("Failed to access cache storage: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse cache snapshot: {0}")]
    Format(#[from] serde_json::Error),
}

/// Key-value slot holding one serialized snapshot.
pub trait SnapshotStorage: Send + Sync + 'static {
    fn load(&self) -> Result<Option<String>, PersistError>;
    fn save(&self, contents: &str) -> Result<(), PersistError>;
    fn remove(&self) -> Result<(), PersistError>;
}

/// Snapshot stored as a JSON file under the cache directory.
pub struct FileStorage {
    path: PathBuf,
}

impl FileStorage {
    pub fn new(cache_dir: &Path) -> Result<Self, PersistError> {
        std::fs::create_dir_all(cache_dir)?;
        Ok(Self {
            path: cache_dir.join(SNAPSHOT_FILE),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SnapshotStorage for FileStorage {
    fn load(&self) -> Result<Option<String>, PersistError> {
        if !self.path.exists() {
            return Ok(None);
        }
        Ok(Some(std::fs::read_to_string(&self.path)?))
    }

    fn save(&self, contents: &str) -> Result<(), PersistError> {
        // Write then rename so a crash never leaves a half-written snapshot
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, contents)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn remove(&self) -> Result<(), PersistError> {
        if self.path.exists() {
            std::fs::remove_file(&self.path)?;
        }
        Ok(())
    }
}

/// In-process storage, for tests and embedders without a filesystem.
#[derive(Default)]
pub struct MemoryStorage {
    contents: Mutex<Option<String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_contents(contents: impl Into<String>) -> Self {
        Self {
            contents: Mutex::new(Some(contents.into())),
        }
    }

    pub fn contents(&self) -> Option<String> {
        self.contents.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl SnapshotStorage for MemoryStorage {
    fn load(&self) -> Result<Option<String>, PersistError> {
        Ok(self.contents())
    }

    fn save(&self, contents: &str) -> Result<(), PersistError> {
        *self.contents.lock().unwrap_or_else(|e| e.into_inner()) = Some(contents.to_string());
        Ok(())
    }

    fn remove(&self) -> Result<(), PersistError> {
        *self.contents.lock().unwrap_or_else(|e| e.into_inner()) = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_storage_roundtrip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let storage = FileStorage::new(&dir.path().join("nested")).expect("storage");

        assert!(storage.load().expect("load").is_none());
        storage.save("{\"a\":1}").expect("save");
        assert_eq!(storage.load().expect("load").as_deref(), Some("{\"a\":1}"));

        storage.remove().expect("remove");
        assert!(storage.load().expect("load").is_none());
    }

    #[test]
    fn test_memory_storage() {
        let storage = MemoryStorage::with_contents("x");
        assert_eq!(storage.load().expect("load").as_deref(), Some("x"));
        storage.remove().expect("remove");
        assert!(storage.contents().is_none());
    }
}
