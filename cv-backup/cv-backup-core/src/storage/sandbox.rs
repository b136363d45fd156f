use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::debug;

use super::{to_pretty, BackendKind, BackupBackend, BackupError, BackupResult, BACKUP_FILE_NAME};
use crate::Document;

/// Private directory owned by this installation. Holds exactly one backup
/// file which every write replaces in full.
pub struct SandboxFsDriver {
    root: Option<PathBuf>,
}

impl SandboxFsDriver {
    pub fn new(root: Option<PathBuf>) -> Self {
        Self { root }
    }

    fn root(&self) -> BackupResult<&Path> {
        self.root
            .as_deref()
            .ok_or(BackupError::Unavailable(BackendKind::SandboxFs))
    }

    pub fn file_path(&self) -> Option<PathBuf> {
        self.root.as_ref().map(|r| r.join(BACKUP_FILE_NAME))
    }

    /// Ask for the data to be kept durably. Best effort only.
    async fn persist(file: &tokio::fs::File) {
        if let Err(e) = file.sync_all().await {
            debug!(error = %e, "durability request ignored");
        }
    }
}

#[async_trait]
impl BackupBackend for SandboxFsDriver {
    fn kind(&self) -> BackendKind {
        BackendKind::SandboxFs
    }

    async fn is_available(&self) -> bool {
        self.root.is_some()
    }

    async fn write(&self, doc: &Document) -> BackupResult<Option<Document>> {
        let root = self.root()?;
        tokio::fs::create_dir_all(root).await?;
        let mut file = tokio::fs::File::create(root.join(BACKUP_FILE_NAME)).await?;
        file.write_all(to_pretty(doc)?.as_bytes()).await?;
        file.flush().await?;
        Self::persist(&file).await;
        Ok(None)
    }

    async fn read(&self) -> BackupResult<Option<Document>> {
        let path = self.root()?.join(BACKUP_FILE_NAME);
        let text = match tokio::fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(BackupError::NotFound(path.display().to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        match serde_json::from_str::<Document>(&text)? {
            Document::Null => Ok(None),
            doc => Ok(Some(doc)),
        }
    }

    /// A missing or broken private copy never ends a read.
    fn read_falls_through(&self, _err: &BackupError) -> bool {
        true
    }
}
