//! Source-of-record image store.
//!
//! Getting bytes out of the source system is a two-step affair: the image
//! link returned by the catalog resolves to a listing whose first row carries
//! a `downloadHref`, and that handle is then fetched for the raw bytes.

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;
use tracing::{info, warn};

use crate::config::{HttpConfig, SourceConfig};
use crate::error::{Store, SyncError};
use crate::http::{build_client, error_body};

/// Capability to turn a source-origin link into raw image bytes.
#[async_trait]
pub trait SourceStore: Send + Sync {
    /// Resolve `link` to a download handle.
    async fn resolve_download_handle(&self, link: &str) -> Result<String, SyncError>;

    /// Fetch the bytes behind a download handle.
    ///
    /// `Ok(None)` when the store answers with a non-success status: the
    /// caller treats that as "no image available", not as a failure.
    async fn fetch_bytes(&self, handle: &str) -> Result<Option<Bytes>, SyncError>;
}

/// [`SourceStore`] over the source system's JSON REST API.
#[derive(Debug, Clone)]
pub struct HttpSourceStore {
    client: reqwest::Client,
    token: String,
}

impl HttpSourceStore {
    pub fn new(source: &SourceConfig, http: &HttpConfig) -> Result<Self, SyncError> {
        Ok(Self::with_client(build_client(http)?, source))
    }

    pub fn with_client(client: reqwest::Client, source: &SourceConfig) -> Self {
        Self {
            client,
            token: source.token.clone(),
        }
    }
}

#[async_trait]
impl SourceStore for HttpSourceStore {
    async fn resolve_download_handle(&self, link: &str) -> Result<String, SyncError> {
        info!(link, "resolving download handle");
        let response = self
            .client
            .get(link)
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(SyncError::transport(Store::Source))?;

        let status = response.status();
        if !status.is_success() {
            let body = error_body(response).await;
            return Err(SyncError::upstream(
                Store::Source,
                format!("HTTP {status} resolving {link}: {body}"),
            ));
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|e| SyncError::upstream(Store::Source, format!("invalid JSON: {e}")))?;
        let handle = download_href(&payload)?;
        info!(link, handle, "resolved download handle");
        Ok(handle)
    }

    async fn fetch_bytes(&self, handle: &str) -> Result<Option<Bytes>, SyncError> {
        info!(handle, "downloading source image");
        let response = self
            .client
            .get(handle)
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(SyncError::transport(Store::Source))?;

        let status = response.status();
        if !status.is_success() {
            warn!(handle, status = status.as_u16(), "source image download failed");
            return Ok(None);
        }

        let bytes = response
            .bytes()
            .await
            .map_err(SyncError::transport(Store::Source))?;
        info!(handle, bytes = bytes.len(), "downloaded source image");
        Ok(Some(bytes))
    }
}

/// Pull `rows[0].meta.downloadHref` out of a listing payload.
fn download_href(payload: &Value) -> Result<String, SyncError> {
    let rows = payload
        .get("rows")
        .and_then(Value::as_array)
        .ok_or_else(|| SyncError::upstream(Store::Source, "listing has no `rows` array"))?;
    let first = rows
        .first()
        .ok_or_else(|| SyncError::NotFound("no image rows in source listing".into()))?;
    first
        .pointer("/meta/downloadHref")
        .and_then(Value::as_str)
        .map(str::to_owned)
        .ok_or_else(|| {
            SyncError::upstream(Store::Source, "first row is missing `meta.downloadHref`")
        })
}
