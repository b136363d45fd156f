use async_trait::async_trait;
use std::sync::Arc;

use super::{BackendKind, BackupBackend, BackupResult};
use crate::local::{KeyValueStore, KEY_BACKUP};
use crate::Document;

/// Last-resort copy in the string store. Always available; writes may still
/// fail once the store's quota is used up.
pub struct LocalStoreDriver {
    store: Arc<dyn KeyValueStore>,
}

impl LocalStoreDriver {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl BackupBackend for LocalStoreDriver {
    fn kind(&self) -> BackendKind {
        BackendKind::LocalStore
    }

    async fn is_available(&self) -> bool {
        true
    }

    async fn write(&self, doc: &Document) -> BackupResult<Option<Document>> {
        self.store.set(KEY_BACKUP, &serde_json::to_string(doc)?)?;
        Ok(None)
    }

    async fn read(&self) -> BackupResult<Option<Document>> {
        match self.store.get(KEY_BACKUP) {
            Some(raw) if !raw.is_empty() => match serde_json::from_str::<Document>(&raw)? {
                Document::Null => Ok(None),
                doc => Ok(Some(doc)),
            },
            _ => Ok(None),
        }
    }
}
