//! Client side of the companion backup server.

use async_trait::async_trait;
use reqwest::header::CACHE_CONTROL;
use reqwest::{Client, RequestBuilder, Response};
use serde::Deserialize;
use tracing::debug;

use super::named::ListItem;
use super::{BackendKind, BackupBackend, BackupError, BackupResult};
use crate::Document;

/// Path prefix every backup route lives under.
pub const BACKUP_PREFIX: &str = "/__backup";

#[derive(Debug, Deserialize)]
struct ListResponse {
    #[serde(default)]
    items: Vec<ListItem>,
}

pub struct RemoteProxyDriver {
    client: Client,
    base_url: String,
    slot: Option<String>,
    dev_mode: bool,
}

impl RemoteProxyDriver {
    pub fn new(base_url: impl Into<String>, slot: Option<String>, dev_mode: bool) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            slot,
            dev_mode,
        }
    }

    fn url(&self, route: &str) -> String {
        format!("{}{}{}", self.base_url, BACKUP_PREFIX, route)
    }

    fn with_slot(&self, req: RequestBuilder) -> RequestBuilder {
        match &self.slot {
            Some(id) => req.query(&[("id", id.as_str())]),
            None => req,
        }
    }

    async fn failure(resp: Response) -> BackupError {
        let status = resp.status().as_u16();
        let body = resp.text().await.unwrap_or_default();
        BackupError::Remote { status, body }
    }

    /// Named backups known to the server, legacy slot last.
    pub async fn list(&self) -> BackupResult<Vec<ListItem>> {
        let resp = self
            .client
            .get(self.url("/list"))
            .header(CACHE_CONTROL, "no-store")
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(Self::failure(resp).await);
        }
        Ok(resp.json::<ListResponse>().await?.items)
    }

    pub async fn delete(&self, id: &str) -> BackupResult<Document> {
        let resp = self
            .client
            .delete(self.url("/cv"))
            .query(&[("id", id)])
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(Self::failure(resp).await);
        }
        Ok(resp.json().await?)
    }
}

#[async_trait]
impl BackupBackend for RemoteProxyDriver {
    fn kind(&self) -> BackendKind {
        BackendKind::RemoteProxy
    }

    /// The server only runs next to development builds, so the probe is
    /// skipped entirely otherwise.
    async fn is_available(&self) -> bool {
        if !self.dev_mode {
            return false;
        }
        match self
            .client
            .get(self.url("/ping"))
            .header(CACHE_CONTROL, "no-store")
            .send()
            .await
        {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                debug!(error = %e, "backup server not reachable");
                false
            }
        }
    }

    async fn write(&self, doc: &Document) -> BackupResult<Option<Document>> {
        let resp = self
            .with_slot(self.client.post(self.url("/cv")))
            .json(doc)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(Self::failure(resp).await);
        }
        let reply = resp
            .json::<Document>()
            .await
            .unwrap_or_else(|_| serde_json::json!({ "ok": true }));
        Ok(Some(reply))
    }

    async fn read(&self) -> BackupResult<Option<Document>> {
        let resp = self
            .with_slot(self.client.get(self.url("/cv")))
            .header(CACHE_CONTROL, "no-store")
            .send()
            .await?;
        if !resp.status().is_success() {
            debug!(status = resp.status().as_u16(), "no backup on server");
            return Ok(None);
        }
        match resp.json::<Document>().await? {
            Document::Null => Ok(None),
            doc => Ok(Some(doc)),
        }
    }
}
