//! Backups written to a file the user picked, remembered through the handle
//! registry so the picker only shows up on first use or after access is lost.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use super::{to_pretty, BackendKind, BackupBackend, BackupError, BackupResult, BACKUP_FILE_NAME};
use crate::registry::HandleRegistry;
use crate::Document;

/// Capability handle for one user-selected file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileHandle {
    path: PathBuf,
}

impl FileHandle {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AccessMode {
    Read,
    ReadWrite,
}

/// Outcome of a permission query.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Permission {
    Granted,
    Denied,
    /// Not decided yet; a request may still upgrade it.
    Prompt,
}

/// The runtime's native file capability: pickers plus per-handle permissions.
#[async_trait]
pub trait FileAccess: Send + Sync {
    /// Both pickers have to exist for the native driver to be usable.
    fn supports_pickers(&self) -> bool;
    async fn show_save_picker(&self, suggested_name: &str) -> BackupResult<FileHandle>;
    async fn show_open_picker(&self) -> BackupResult<FileHandle>;
    async fn query_permission(&self, handle: &FileHandle, mode: AccessMode) -> Permission;
    async fn request_permission(&self, handle: &FileHandle, mode: AccessMode) -> Permission;
}

/// File access on the local filesystem. The "picker" is either a fixed
/// target path or a prompt on the controlling terminal.
pub struct LocalFileAccess {
    target: Option<PathBuf>,
    interactive: bool,
}

impl LocalFileAccess {
    pub fn new(target: Option<PathBuf>, interactive: bool) -> Self {
        Self {
            target,
            interactive,
        }
    }

    async fn pick(&self, prompt: String, default: Option<PathBuf>) -> BackupResult<FileHandle> {
        if let Some(target) = &self.target {
            return Ok(FileHandle::new(target.clone()));
        }
        if !self.interactive {
            return Err(BackupError::Unavailable(BackendKind::NativeFile));
        }
        let answer = tokio::task::spawn_blocking(move || -> std::io::Result<Option<String>> {
            eprint!("{prompt}");
            let mut line = String::new();
            let read = std::io::stdin().read_line(&mut line)?;
            Ok((read > 0).then(|| line.trim().to_string()))
        })
        .await
        .map_err(|e| BackupError::Io(std::io::Error::new(ErrorKind::Other, e)))??;

        match answer {
            Some(path) if !path.is_empty() => Ok(FileHandle::new(path)),
            Some(_) => default
                .map(FileHandle::new)
                .ok_or_else(|| BackupError::PermissionDenied("no file chosen".into())),
            None => Err(BackupError::PermissionDenied("file picker cancelled".into())),
        }
    }
}

#[async_trait]
impl FileAccess for LocalFileAccess {
    fn supports_pickers(&self) -> bool {
        self.target.is_some() || self.interactive
    }

    async fn show_save_picker(&self, suggested_name: &str) -> BackupResult<FileHandle> {
        self.pick(
            format!("Save backup as [{suggested_name}]: "),
            Some(PathBuf::from(suggested_name)),
        )
        .await
    }

    async fn show_open_picker(&self) -> BackupResult<FileHandle> {
        self.pick("Open backup file: ".to_string(), None).await
    }

    async fn query_permission(&self, handle: &FileHandle, mode: AccessMode) -> Permission {
        match tokio::fs::metadata(handle.path()).await {
            Ok(meta) if meta.is_dir() => Permission::Denied,
            Ok(meta) if mode == AccessMode::ReadWrite && meta.permissions().readonly() => {
                Permission::Denied
            }
            Ok(_) => Permission::Granted,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                let parent = handle
                    .path()
                    .parent()
                    .filter(|p| !p.as_os_str().is_empty())
                    .unwrap_or_else(|| Path::new("."));
                match tokio::fs::metadata(parent).await {
                    Ok(meta) if meta.is_dir() => Permission::Granted,
                    Ok(_) => Permission::Denied,
                    Err(_) => Permission::Prompt,
                }
            }
            Err(_) => Permission::Denied,
        }
    }

    async fn request_permission(&self, handle: &FileHandle, mode: AccessMode) -> Permission {
        if mode == AccessMode::ReadWrite {
            if let Some(parent) = handle.path().parent().filter(|p| !p.as_os_str().is_empty()) {
                if let Err(e) = tokio::fs::create_dir_all(parent).await {
                    debug!(error = %e, path = %parent.display(), "could not create backup directory");
                    return Permission::Denied;
                }
            }
        }
        self.query_permission(handle, mode).await
    }
}

pub struct NativeFileDriver {
    access: Arc<dyn FileAccess>,
    registry: Arc<dyn HandleRegistry>,
}

impl NativeFileDriver {
    pub fn new(access: Arc<dyn FileAccess>, registry: Arc<dyn HandleRegistry>) -> Self {
        Self { access, registry }
    }

    /// Query first, and only ask when the answer is still open.
    async fn ensure_permission(&self, handle: &FileHandle, mode: AccessMode) -> bool {
        match self.access.query_permission(handle, mode).await {
            Permission::Granted => true,
            Permission::Prompt => {
                self.access.request_permission(handle, mode).await == Permission::Granted
            }
            Permission::Denied => false,
        }
    }

    async fn usable_handle(&self, mode: AccessMode) -> BackupResult<FileHandle> {
        if let Some(handle) = self.registry.get().await? {
            if self.ensure_permission(&handle, mode).await {
                return Ok(handle);
            }
            debug!(path = %handle.path().display(), "stored handle lost access");
        }
        let handle = match mode {
            AccessMode::ReadWrite => self.access.show_save_picker(BACKUP_FILE_NAME).await?,
            AccessMode::Read => self.access.show_open_picker().await?,
        };
        self.registry.set(&handle).await?;
        if !self.ensure_permission(&handle, mode).await {
            let what = match mode {
                AccessMode::ReadWrite => "no write permission",
                AccessMode::Read => "no read permission",
            };
            return Err(BackupError::PermissionDenied(format!(
                "{what} for {}",
                handle.path().display()
            )));
        }
        Ok(handle)
    }
}

#[async_trait]
impl BackupBackend for NativeFileDriver {
    fn kind(&self) -> BackendKind {
        BackendKind::NativeFile
    }

    async fn is_available(&self) -> bool {
        self.access.supports_pickers()
    }

    async fn write(&self, doc: &Document) -> BackupResult<Option<Document>> {
        let handle = self.usable_handle(AccessMode::ReadWrite).await?;
        tokio::fs::write(handle.path(), to_pretty(doc)?).await?;
        info!(path = %handle.path().display(), "backup written to file");
        Ok(None)
    }

    async fn read(&self) -> BackupResult<Option<Document>> {
        let handle = self.usable_handle(AccessMode::Read).await?;
        let text = tokio::fs::read_to_string(handle.path()).await?;
        match serde_json::from_str::<Document>(&text)? {
            Document::Null => Ok(None),
            doc => Ok(Some(doc)),
        }
    }
}
