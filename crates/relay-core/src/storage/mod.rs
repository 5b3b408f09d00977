//! Durable key-value storage backing the synced atoms.
//!
//! Regions are named blobs of JSON text. Backends are synchronous: an atom
//! reads its region once at construction and writes it back on every update.

pub mod atom;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use crate::error::StorageError;
use crate::utils::paths::AppPaths;

pub use atom::{AtomUpdate, SyncedAtom};

/// Region holding `agentId -> (sessionId -> Session)`.
pub const CONVERSATIONS_REGION: &str = "conversations";
/// Region holding `executionId -> ExecutionTrace`.
pub const DEBUG_REGION: &str = "debug";

pub trait KeyValueStore: Send + Sync {
    fn get(&self, region: &str) -> Result<Option<String>, StorageError>;

    fn set(&self, region: &str, value: &str) -> Result<(), StorageError>;

    fn remove(&self, region: &str) -> Result<(), StorageError>;
}

fn check_quota(region: &str, size: usize, quota: Option<usize>) -> Result<(), StorageError> {
    match quota {
        Some(quota) if size > quota => Err(StorageError::QuotaExceeded {
            region: region.to_string(),
            size,
            quota,
        }),
        _ => Ok(()),
    }
}

#[derive(Default)]
pub struct InMemoryStore {
    regions: RwLock<HashMap<String, String>>,
    quota_bytes: Option<usize>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_quota(quota_bytes: usize) -> Self {
        Self {
            regions: RwLock::default(),
            quota_bytes: Some(quota_bytes),
        }
    }
}

impl KeyValueStore for InMemoryStore {
    fn get(&self, region: &str) -> Result<Option<String>, StorageError> {
        let regions = self
            .regions
            .read()
            .map_err(|_| StorageError::lock_poisoned("regions"))?;
        Ok(regions.get(region).cloned())
    }

    fn set(&self, region: &str, value: &str) -> Result<(), StorageError> {
        check_quota(region, value.len(), self.quota_bytes)?;
        let mut regions = self
            .regions
            .write()
            .map_err(|_| StorageError::lock_poisoned("regions"))?;
        regions.insert(region.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, region: &str) -> Result<(), StorageError> {
        let mut regions = self
            .regions
            .write()
            .map_err(|_| StorageError::lock_poisoned("regions"))?;
        regions.remove(region);
        Ok(())
    }
}

/// Stores each region as `<dir>/<region>.json`.
pub struct FileStore {
    dir: PathBuf,
    quota_bytes: Option<usize>,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            quota_bytes: None,
        }
    }

    /// Store under the platform data directory, falling back to `~/.relay`.
    pub fn default_location() -> Option<Self> {
        AppPaths::user_data_dir()
            .or_else(|| dirs::home_dir().map(|home| home.join(".relay")))
            .map(Self::new)
    }

    pub fn with_quota(mut self, quota_bytes: Option<usize>) -> Self {
        self.quota_bytes = quota_bytes;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn region_path(&self, region: &str) -> PathBuf {
        self.dir.join(format!("{region}.json"))
    }

    fn io_error(region: &str, source: std::io::Error) -> StorageError {
        StorageError::Io {
            region: region.to_string(),
            source,
        }
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, region: &str) -> Result<Option<String>, StorageError> {
        match std::fs::read_to_string(self.region_path(region)) {
            Ok(contents) => Ok(Some(contents)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(Self::io_error(region, err)),
        }
    }

    fn set(&self, region: &str, value: &str) -> Result<(), StorageError> {
        check_quota(region, value.len(), self.quota_bytes)?;
        std::fs::create_dir_all(&self.dir).map_err(|e| Self::io_error(region, e))?;

        // Write-then-rename: readers never see a partially written region.
        let path = self.region_path(region);
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, value).map_err(|e| Self::io_error(region, e))?;
        std::fs::rename(&tmp, &path).map_err(|e| Self::io_error(region, e))
    }

    fn remove(&self, region: &str) -> Result<(), StorageError> {
        match std::fs::remove_file(self.region_path(region)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(Self::io_error(region, err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn in_memory_store_round_trips_and_removes() {
        let store = InMemoryStore::new();
        assert_eq!(store.get("debug").unwrap(), None);

        store.set("debug", "{}").unwrap();
        assert_eq!(store.get("debug").unwrap().as_deref(), Some("{}"));

        store.remove("debug").unwrap();
        assert_eq!(store.get("debug").unwrap(), None);
    }

    #[test]
    fn in_memory_store_rejects_writes_over_quota() {
        let store = InMemoryStore::with_quota(4);
        let err = store.set("debug", "12345").unwrap_err();
        assert!(err.is_quota_exceeded());
        assert_eq!(store.get("debug").unwrap(), None);
    }

    #[test]
    fn file_store_persists_across_instances() {
        let dir = TempDir::new().unwrap();

        FileStore::new(dir.path())
            .set("conversations", r#"{"a1":{}}"#)
            .unwrap();

        let reopened = FileStore::new(dir.path());
        assert_eq!(
            reopened.get("conversations").unwrap().as_deref(),
            Some(r#"{"a1":{}}"#)
        );
    }

    #[test]
    fn file_store_missing_region_reads_as_none() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path().join("not-created-yet"));

        assert_eq!(store.get("debug").unwrap(), None);
        store.remove("debug").unwrap();
    }

    #[test]
    fn file_store_quota_leaves_previous_value() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path()).with_quota(Some(8));

        store.set("debug", "{}").unwrap();
        let err = store.set("debug", r#"{"too":"large"}"#).unwrap_err();

        assert!(err.is_quota_exceeded());
        assert_eq!(store.get("debug").unwrap().as_deref(), Some("{}"));
    }
}
