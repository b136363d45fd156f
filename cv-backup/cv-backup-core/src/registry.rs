//! Remembers the file handle the user granted, across restarts.
//!
//! Only one handle is kept: every `set` replaces the entry under
//! [`HANDLE_KEY`].

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

use crate::storage::native::FileHandle;
use crate::storage::BackupResult;

pub const HANDLE_KEY: &str = "cv-backup-handle";

#[async_trait]
pub trait HandleRegistry: Send + Sync {
    async fn get(&self) -> BackupResult<Option<FileHandle>>;
    async fn set(&self, handle: &FileHandle) -> BackupResult<()>;
    async fn clear(&self) -> BackupResult<()>;
}

/// Registry kept only for the lifetime of the process.
#[derive(Default)]
pub struct MemoryHandleRegistry {
    handle: Mutex<Option<FileHandle>>,
}

impl MemoryHandleRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HandleRegistry for MemoryHandleRegistry {
    async fn get(&self) -> BackupResult<Option<FileHandle>> {
        Ok(self.handle.lock().await.clone())
    }

    async fn set(&self, handle: &FileHandle) -> BackupResult<()> {
        *self.handle.lock().await = Some(handle.clone());
        Ok(())
    }

    async fn clear(&self) -> BackupResult<()> {
        *self.handle.lock().await = None;
        Ok(())
    }
}

/// Registry backed by a small JSON object store on disk. Each call reads or
/// rewrites the file under a lock, so a `get` never sees a half-written `set`.
pub struct JsonHandleRegistry {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonHandleRegistry {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            lock: Mutex::new(()),
        }
    }

    async fn load(&self) -> BackupResult<BTreeMap<String, FileHandle>> {
        match tokio::fs::read(&self.path).await {
            Ok(raw) if raw.is_empty() => Ok(BTreeMap::new()),
            Ok(raw) => Ok(serde_json::from_slice(&raw)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn store(&self, entries: &BTreeMap<String, FileHandle>) -> BackupResult<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, serde_json::to_vec_pretty(entries)?).await?;
        if let Err(e) = tokio::fs::rename(&tmp, &self.path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }
}

#[async_trait]
impl HandleRegistry for JsonHandleRegistry {
    async fn get(&self) -> BackupResult<Option<FileHandle>> {
        let _guard = self.lock.lock().await;
        Ok(self.load().await?.remove(HANDLE_KEY))
    }

    async fn set(&self, handle: &FileHandle) -> BackupResult<()> {
        let _guard = self.lock.lock().await;
        let mut entries = self.load().await?;
        entries.insert(HANDLE_KEY.to_string(), handle.clone());
        self.store(&entries).await
    }

    async fn clear(&self) -> BackupResult<()> {
        let _guard = self.lock.lock().await;
        let mut entries = self.load().await?;
        if entries.remove(HANDLE_KEY).is_some() {
            self.store(&entries).await?;
        }
        Ok(())
    }
}
