//! Chooses where a backup goes and falls back when a medium fails.
//!
//! | mode      | attempt order                         |
//! |-----------|---------------------------------------|
//! | `file`    | native file, server, sandbox, local   |
//! | `browser` | sandbox, local                        |
//!
//! Writes go to the first available backend of the chain. If it fails the
//! local store gets one more try before the failure is reported. Reads walk
//! the chain until a backend returns a document.

use anyhow::Result;
use serde::{Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::BackupConfig;
use crate::local::{FileKeyValueStore, KeyValueStore, SnapshotStore, KEY_MODE};
use crate::registry::JsonHandleRegistry;
use crate::storage::fallback::LocalStoreDriver;
use crate::storage::native::{LocalFileAccess, NativeFileDriver};
use crate::storage::remote::RemoteProxyDriver;
use crate::storage::sandbox::SandboxFsDriver;
use crate::storage::{BackendKind, BackupBackend, BackupResult};
use crate::Document;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupMode {
    #[default]
    Browser,
    File,
}

impl BackupMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackupMode::Browser => "browser",
            BackupMode::File => "file",
        }
    }

    /// Anything other than `file` means `browser`.
    pub fn lenient(raw: &str) -> Self {
        if raw.trim() == "file" {
            BackupMode::File
        } else {
            BackupMode::Browser
        }
    }
}

impl fmt::Display for BackupMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackupMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "browser" => Ok(BackupMode::Browser),
            "file" => Ok(BackupMode::File),
            other => Err(format!("unknown backup mode `{other}` (expected browser or file)")),
        }
    }
}

fn where_name<S: Serializer>(kind: &Option<BackendKind>, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(kind.map(|k| k.as_str()).unwrap_or("none"))
}

#[derive(Debug, Clone, Serialize)]
pub struct WriteOutcome {
    pub ok: bool,
    #[serde(rename = "where", serialize_with = "where_name")]
    pub backend: Option<BackendKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Extra information returned by the backend, e.g. the server's reply.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Document>,
}

impl WriteOutcome {
    fn stored(kind: BackendKind, details: Option<Document>) -> Self {
        Self {
            ok: true,
            backend: Some(kind),
            error: None,
            details,
        }
    }

    fn failed(error: String) -> Self {
        Self {
            ok: false,
            backend: None,
            error: Some(error),
            details: None,
        }
    }

    /// Name of the medium that took the write, `none` on failure.
    pub fn location(&self) -> &'static str {
        self.backend.map(|k| k.as_str()).unwrap_or("none")
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LoadOutcome {
    pub ok: bool,
    pub data: Option<Document>,
}

pub struct BackupPolicy {
    native: Arc<dyn BackupBackend>,
    remote: Arc<dyn BackupBackend>,
    sandbox: Arc<dyn BackupBackend>,
    local: Arc<dyn BackupBackend>,
    store: Arc<dyn KeyValueStore>,
    snapshots: SnapshotStore,
}

impl BackupPolicy {
    /// The local-store driver and the snapshot store both live in `store`.
    pub fn new(
        native: Arc<dyn BackupBackend>,
        remote: Arc<dyn BackupBackend>,
        sandbox: Arc<dyn BackupBackend>,
        store: Arc<dyn KeyValueStore>,
    ) -> Self {
        Self {
            native,
            remote,
            sandbox,
            local: Arc::new(LocalStoreDriver::new(store.clone())),
            snapshots: SnapshotStore::new(store.clone()),
            store,
        }
    }

    /// Replace the last-resort driver. Used to exercise its failure path.
    pub fn with_local_driver(mut self, local: Arc<dyn BackupBackend>) -> Self {
        self.local = local;
        self
    }

    pub fn from_config(config: &BackupConfig) -> Result<Self> {
        let store: Arc<dyn KeyValueStore> = Arc::new(FileKeyValueStore::open(
            config.local_store_path(),
            config.local_quota,
        )?);
        let access = Arc::new(LocalFileAccess::new(
            config.file_target.clone(),
            config.interactive,
        ));
        let registry = Arc::new(JsonHandleRegistry::new(config.handles_path()));
        Ok(Self::new(
            Arc::new(NativeFileDriver::new(access, registry)),
            Arc::new(RemoteProxyDriver::new(
                config.remote_url.clone(),
                config.remote_slot.clone(),
                config.dev_mode,
            )),
            Arc::new(SandboxFsDriver::new(config.sandbox_path())),
            store,
        ))
    }

    pub fn snapshots(&self) -> &SnapshotStore {
        &self.snapshots
    }

    pub fn backup_mode(&self) -> BackupMode {
        self.store
            .get(KEY_MODE)
            .map(|raw| BackupMode::lenient(&raw))
            .unwrap_or_default()
    }

    pub fn set_backup_mode(&self, mode: BackupMode) -> BackupResult<()> {
        self.store.set(KEY_MODE, mode.as_str())
    }

    fn chain(&self, mode: BackupMode) -> Vec<&dyn BackupBackend> {
        match mode {
            BackupMode::File => vec![
                self.native.as_ref(),
                self.remote.as_ref(),
                self.sandbox.as_ref(),
                self.local.as_ref(),
            ],
            BackupMode::Browser => vec![self.sandbox.as_ref(), self.local.as_ref()],
        }
    }

    async fn first_available(&self, mode: BackupMode) -> &dyn BackupBackend {
        for backend in self.chain(mode) {
            if backend.is_available().await {
                return backend;
            }
        }
        self.local.as_ref()
    }

    pub async fn write_backup(&self, doc: &Document, mode: Option<BackupMode>) -> WriteOutcome {
        let mode = mode.unwrap_or_else(|| self.backup_mode());
        let backend = self.first_available(mode).await;
        let err = match backend.write(doc).await {
            Ok(details) => return WriteOutcome::stored(backend.kind(), details),
            Err(e) => e,
        };
        warn!(backend = %backend.kind(), error = %err, "writeBackup failed");
        match self.local.write(doc).await {
            Ok(details) => WriteOutcome::stored(self.local.kind(), details),
            Err(e) => {
                warn!(error = %e, "last-resort backup failed");
                WriteOutcome::failed(e.to_string())
            }
        }
    }

    pub async fn read_backup(&self, mode: Option<BackupMode>) -> Option<Document> {
        let mode = mode.unwrap_or_else(|| self.backup_mode());
        for backend in self.chain(mode) {
            if !backend.is_available().await {
                continue;
            }
            match backend.read().await {
                Ok(Some(doc)) => return Some(doc),
                Ok(None) => debug!(backend = %backend.kind(), "no backup here"),
                Err(e) if backend.read_falls_through(&e) => {
                    debug!(backend = %backend.kind(), error = %e, "trying next backend")
                }
                Err(e) => {
                    warn!(backend = %backend.kind(), error = %e, "readBackup failed");
                    return None;
                }
            }
        }
        None
    }

    /// Read a backup and make it the current autosave snapshot.
    pub async fn load_backup_into_local(&self, mode: Option<BackupMode>) -> LoadOutcome {
        match self.read_backup(mode).await {
            Some(doc) => {
                self.snapshots.save(&doc);
                LoadOutcome {
                    ok: true,
                    data: Some(doc),
                }
            }
            None => LoadOutcome {
                ok: false,
                data: None,
            },
        }
    }
}
