//! Synchronous per-installation string store and the autosave snapshot that
//! lives in it.

use anyhow::Result;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::warn;

use crate::storage::{BackupError, BackupResult};
use crate::Document;

/// Key of the autosaved editor session.
pub const KEY_SESSION: &str = "cv-session";
/// Key of the last-resort backup copy.
pub const KEY_BACKUP: &str = "cv-backup-json";
/// Key of the persisted backup mode.
pub const KEY_MODE: &str = "cv-backup-mode";

/// Default quota, in bytes of keys plus values.
pub const DEFAULT_QUOTA: usize = 5 * 1024 * 1024;

/// A small string map with a size quota. Calls are synchronous and cheap.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str) -> BackupResult<()>;
    fn remove(&self, key: &str) -> BackupResult<()>;
}

fn check_quota(
    entries: &BTreeMap<String, String>,
    key: &str,
    value: &str,
    quota: usize,
) -> BackupResult<()> {
    let current: usize = entries
        .iter()
        .filter(|(k, _)| k.as_str() != key)
        .map(|(k, v)| k.len() + v.len())
        .sum();
    let needed = current + key.len() + value.len();
    if needed > quota {
        return Err(BackupError::QuotaExceeded { needed, quota });
    }
    Ok(())
}

/// In-memory store, mostly for tests and throwaway sessions.
pub struct MemoryKeyValueStore {
    entries: Mutex<BTreeMap<String, String>>,
    quota: usize,
}

impl MemoryKeyValueStore {
    pub fn new() -> Self {
        Self::with_quota(DEFAULT_QUOTA)
    }

    pub fn with_quota(quota: usize) -> Self {
        Self {
            entries: Mutex::new(BTreeMap::new()),
            quota,
        }
    }
}

impl Default for MemoryKeyValueStore {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyValueStore for MemoryKeyValueStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.lock().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> BackupResult<()> {
        let mut entries = self.entries.lock();
        check_quota(&entries, key, value, self.quota)?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> BackupResult<()> {
        self.entries.lock().remove(key);
        Ok(())
    }
}

/// Store persisted as a single JSON object file, rewritten on every change.
pub struct FileKeyValueStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, String>>,
    quota: usize,
}

impl FileKeyValueStore {
    pub fn open(path: impl AsRef<Path>, quota: usize) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let entries = if path.exists() {
            let raw = std::fs::read_to_string(&path)?;
            if raw.trim().is_empty() {
                BTreeMap::new()
            } else {
                serde_json::from_str(&raw)?
            }
        } else {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            BTreeMap::new()
        };
        Ok(Self {
            path,
            entries: Mutex::new(entries),
            quota,
        })
    }

    fn persist(&self, entries: &BTreeMap<String, String>) -> BackupResult<()> {
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec(entries)?)?;
        if let Err(e) = std::fs::rename(&tmp, &self.path) {
            let _ = std::fs::remove_file(&tmp);
            return Err(e.into());
        }
        Ok(())
    }
}

impl KeyValueStore for FileKeyValueStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.lock().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> BackupResult<()> {
        let mut entries = self.entries.lock();
        check_quota(&entries, key, value, self.quota)?;
        let previous = entries.insert(key.to_string(), value.to_string());
        if let Err(e) = self.persist(&entries) {
            // keep memory and disk in agreement
            match previous {
                Some(old) => entries.insert(key.to_string(), old),
                None => entries.remove(key),
            };
            return Err(e);
        }
        Ok(())
    }

    fn remove(&self, key: &str) -> BackupResult<()> {
        let mut entries = self.entries.lock();
        if entries.remove(key).is_some() {
            self.persist(&entries)?;
        }
        Ok(())
    }
}

/// Autosave of the current editor state, independent of the backup mode.
#[derive(Clone)]
pub struct SnapshotStore {
    store: Arc<dyn KeyValueStore>,
}

impl SnapshotStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Overwrite the snapshot. Failures are logged, never returned.
    pub fn save(&self, doc: &Document) {
        let result = serde_json::to_string(doc)
            .map_err(BackupError::from)
            .and_then(|raw| self.store.set(KEY_SESSION, &raw));
        if let Err(e) = result {
            warn!(error = %e, "saveLocal failed");
        }
    }

    pub fn load(&self) -> Option<Document> {
        let raw = self.store.get(KEY_SESSION)?;
        match serde_json::from_str::<Document>(&raw) {
            Ok(Document::Null) => None,
            Ok(doc) => Some(doc),
            Err(e) => {
                warn!(error = %e, "loadLocal failed");
                None
            }
        }
    }
}
