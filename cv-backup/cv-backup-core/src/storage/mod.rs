//! Backup backends behind one read/write contract.
//!
//! Each driver wraps one storage medium with its own availability rules:
//! - `native`: a user-chosen file reached through a remembered handle
//! - `remote`: the companion backup server over HTTP
//! - `sandbox`: a private per-installation directory
//! - `fallback`: the quota-limited string store, always available
//! - `named`: the server-side named/legacy file store

pub mod fallback;
pub mod named;
pub mod native;
pub mod remote;
pub mod sandbox;


use async_trait::async_trait;
use serde::{Serialize, Serializer};
use std::fmt;
use thiserror::Error;

use crate::Document;

/// File name shared by the file-based drivers.
pub const BACKUP_FILE_NAME: &str = "cv-backup.json";

#[derive(Debug, Error)]
pub enum BackupError {
    #[error("backend unavailable: {0}")]
    Unavailable(BackendKind),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("quota exceeded: {needed} bytes requested, {quota} allowed")]
    QuotaExceeded { needed: usize, quota: usize },
    #[error("server_write_failed: {status} {body}")]
    Remote { status: u16, body: String },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}

impl BackupError {
    /// I/O, network, and parse failures, as opposed to refusals.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            BackupError::NotFound(_)
                | BackupError::Remote { .. }
                | BackupError::Io(_)
                | BackupError::Json(_)
                | BackupError::Http(_)
        )
    }
}

pub type BackupResult<T> = Result<T, BackupError>;

/// Identifies which medium served a request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BackendKind {
    NativeFile,
    RemoteProxy,
    SandboxFs,
    LocalStore,
    NamedFile,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::NativeFile => "file",
            BackendKind::RemoteProxy => "server",
            BackendKind::SandboxFs => "opfs",
            BackendKind::LocalStore => "localStorage",
            BackendKind::NamedFile => "named",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for BackendKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Common contract of every storage medium.
#[async_trait]
pub trait BackupBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Capability probe. A backend that reports `false` is skipped silently.
    async fn is_available(&self) -> bool;

    /// Store the whole document, replacing whatever was there.
    async fn write(&self, doc: &Document) -> BackupResult<Option<Document>>;

    /// Fetch the stored document. `Ok(None)` means "nothing here".
    async fn read(&self) -> BackupResult<Option<Document>>;

    /// Whether a read error moves on to the next backend instead of ending
    /// the read with nothing. Transient failures do; refusals do not.
    fn read_falls_through(&self, err: &BackupError) -> bool {
        err.is_transient()
    }
}

/// Pretty JSON used for every on-disk copy.
pub(crate) fn to_pretty(doc: &Document) -> BackupResult<String> {
    Ok(serde_json::to_string_pretty(doc)?)
}
