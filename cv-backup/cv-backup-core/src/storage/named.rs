//! Named backups kept as one JSON file per slot on the server's disk, plus
//! the single unnamed legacy slot older clients still write to.
//!
//! Named files hold a wrapper record `{"__meta": {id, name, updatedAt},
//! "data": <document>}`. The legacy file holds the bare document. Reads
//! accept both shapes and hand back only the document.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use tracing::{info, warn};

use super::{to_pretty, BackendKind, BackupBackend, BackupResult};
use crate::slug::slugify;
use crate::Document;

/// Identifier the legacy slot is listed under.
pub const LEGACY_ID: &str = "legacy";
/// Display name of the legacy slot in listings.
pub const LEGACY_NAME: &str = "Legacy backup";

const META_KEY: &str = "__meta";
const DATA_KEY: &str = "data";

/// Which file a request addresses.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Slot {
    Legacy,
    Named { slug: String, label: String },
}

impl Slot {
    /// Missing or empty ids address the legacy slot, and so does any id
    /// that slugifies to [`LEGACY_ID`]: that id is reserved for it.
    pub fn from_id(id: Option<&str>) -> Self {
        match id {
            Some(raw) if !raw.is_empty() => {
                let slug = slugify(raw);
                if slug == LEGACY_ID {
                    return Slot::Legacy;
                }
                Slot::Named {
                    slug,
                    label: raw.to_string(),
                }
            }
            _ => Slot::Legacy,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Slot::Legacy => LEGACY_ID,
            Slot::Named { slug, .. } => slug,
        }
    }

    pub fn is_legacy(&self) -> bool {
        matches!(self, Slot::Legacy)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RecordMeta {
    pub id: String,
    pub name: String,
    #[serde(rename = "updatedAt")]
    pub updated_at: DateTime<Utc>,
}

/// On-disk shape of a named backup.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BackupRecord {
    #[serde(rename = "__meta")]
    pub meta: RecordMeta,
    pub data: Document,
}

/// One row of the backup listing.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ListItem {
    pub id: String,
    pub name: String,
    /// Modification time in milliseconds since the epoch.
    pub mtime: i64,
}

/// What a successful `put` wrote.
#[derive(Clone, Debug, Serialize)]
pub struct PutReceipt {
    pub id: String,
    pub name: String,
    pub path: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeleteOutcome {
    Removed(String),
    LegacyProtected,
}

/// The `__meta` object of a wrapper record, if `value` is one.
fn wrapper_meta(value: &Value) -> Option<&Map<String, Value>> {
    let obj = value.as_object()?;
    if !obj.contains_key(DATA_KEY) {
        return None;
    }
    obj.get(META_KEY)?.as_object()
}

fn meta_str<'a>(meta: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    meta.get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
}

/// Strip a wrapper record down to its document. Bare documents pass through.
pub fn unwrap_document(mut value: Value) -> Document {
    if wrapper_meta(&value).is_some() {
        if let Some(obj) = value.as_object_mut() {
            return obj.remove(DATA_KEY).unwrap_or(Value::Null);
        }
    }
    value
}

fn mtime_millis(meta: &std::fs::Metadata) -> i64 {
    meta.modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

pub struct NamedBackupStore {
    backups_dir: PathBuf,
    legacy_file: PathBuf,
}

impl NamedBackupStore {
    pub fn new(backups_dir: impl Into<PathBuf>, legacy_file: impl Into<PathBuf>) -> Self {
        Self {
            backups_dir: backups_dir.into(),
            legacy_file: legacy_file.into(),
        }
    }

    pub fn legacy_file(&self) -> &Path {
        &self.legacy_file
    }

    pub fn path_for(&self, slot: &Slot) -> PathBuf {
        match slot {
            Slot::Legacy => self.legacy_file.clone(),
            Slot::Named { slug, .. } => self.backups_dir.join(format!("{slug}.json")),
        }
    }

    /// The stored document, or `None` when the slot has no file yet.
    pub async fn get(&self, slot: &Slot) -> BackupResult<Option<Document>> {
        let text = match tokio::fs::read_to_string(self.path_for(slot)).await {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let value: Value = serde_json::from_str(&text)?;
        Ok(Some(unwrap_document(value)))
    }

    /// Store `body` for the slot addressed by the request.
    ///
    /// A wrapper record carrying its own `__meta.id` is stored under that id,
    /// even when it differs from `slot`; the file for `slot` is left alone.
    pub async fn put(&self, slot: &Slot, body: Value) -> BackupResult<PutReceipt> {
        let (target, name, data) = match wrapper_meta(&body) {
            Some(meta) => {
                let target = match meta_str(meta, "id") {
                    Some(id) => Slot::from_id(Some(id)),
                    None => slot.clone(),
                };
                let name = meta_str(meta, "name").map(str::to_string);
                (target, name, unwrap_document(body))
            }
            None => (slot.clone(), None, body),
        };

        let path = self.path_for(&target);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let name = match &target {
            Slot::Legacy => {
                tokio::fs::write(&path, to_pretty(&data)?).await?;
                name.unwrap_or_else(|| LEGACY_ID.to_string())
            }
            Slot::Named { slug, label } => {
                let record = BackupRecord {
                    meta: RecordMeta {
                        id: slug.clone(),
                        name: name.unwrap_or_else(|| label.clone()),
                        updated_at: Utc::now(),
                    },
                    data,
                };
                tokio::fs::write(&path, serde_json::to_string_pretty(&record)?).await?;
                record.meta.name
            }
        };
        info!(id = target.id(), path = %path.display(), "backup stored");
        Ok(PutReceipt {
            id: target.id().to_string(),
            name,
            path: path.display().to_string(),
        })
    }

    /// Remove a named backup. Missing files count as removed; the legacy
    /// slot is never removed.
    pub async fn delete(&self, slot: &Slot) -> BackupResult<DeleteOutcome> {
        if slot.is_legacy() {
            return Ok(DeleteOutcome::LegacyProtected);
        }
        match tokio::fs::remove_file(self.path_for(slot)).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        Ok(DeleteOutcome::Removed(slot.id().to_string()))
    }

    /// All named backups sorted by id, then the legacy slot if it exists.
    /// Files that cannot be read or parsed are skipped.
    pub async fn list(&self) -> BackupResult<Vec<ListItem>> {
        let mut items = Vec::new();
        match tokio::fs::read_dir(&self.backups_dir).await {
            Ok(mut entries) => {
                while let Some(entry) = entries.next_entry().await? {
                    let path = entry.path();
                    if path.extension().and_then(|s| s.to_str()) != Some("json") {
                        continue;
                    }
                    match Self::describe(&path).await {
                        Ok(Some(item)) => items.push(item),
                        Ok(None) => {}
                        Err(e) => warn!(path = %path.display(), error = %e, "skipping backup file"),
                    }
                }
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        items.sort_by(|a, b| a.id.cmp(&b.id));

        if let Ok(meta) = tokio::fs::metadata(&self.legacy_file).await {
            if meta.is_file() {
                items.push(ListItem {
                    id: LEGACY_ID.to_string(),
                    name: LEGACY_NAME.to_string(),
                    mtime: mtime_millis(&meta),
                });
            }
        }
        Ok(items)
    }

    async fn describe(path: &Path) -> BackupResult<Option<ListItem>> {
        let meta = tokio::fs::metadata(path).await?;
        if !meta.is_file() {
            return Ok(None);
        }
        let Some(id) = path.file_stem().and_then(|s| s.to_str()) else {
            return Ok(None);
        };
        if id == LEGACY_ID {
            warn!(path = %path.display(), "ignoring named file with the reserved legacy id");
            return Ok(None);
        }
        let value: Value = serde_json::from_str(&tokio::fs::read_to_string(path).await?)?;
        let name = wrapper_meta(&value)
            .and_then(|m| meta_str(m, "name"))
            .unwrap_or(id)
            .to_string();
        Ok(Some(ListItem {
            id: id.to_string(),
            name,
            mtime: mtime_millis(&meta),
        }))
    }
}

/// One fixed slot of the named store behind the common backend contract.
pub struct NamedSlotDriver {
    store: std::sync::Arc<NamedBackupStore>,
    slot: Slot,
}

impl NamedSlotDriver {
    pub fn new(store: std::sync::Arc<NamedBackupStore>, slot: Slot) -> Self {
        Self { store, slot }
    }
}

#[async_trait]
impl BackupBackend for NamedSlotDriver {
    fn kind(&self) -> BackendKind {
        BackendKind::NamedFile
    }

    async fn is_available(&self) -> bool {
        true
    }

    async fn write(&self, doc: &Document) -> BackupResult<Option<Document>> {
        let receipt = self.store.put(&self.slot, doc.clone()).await?;
        Ok(Some(serde_json::to_value(receipt)?))
    }

    async fn read(&self) -> BackupResult<Option<Document>> {
        match self.store.get(&self.slot).await? {
            Some(Document::Null) | None => Ok(None),
            Some(doc) => Ok(Some(doc)),
        }
    }
}
