//! Image CDN store.
//!
//! Objects are addressed by the identifier embedded in their public delivery
//! link (see [`CdnObjectId`]). Uploads go through the account's images API as
//! multipart forms; the first delivery variant of the created object is the
//! public link recorded as canonical.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use tracing::{debug, error, info, warn};

use crate::config::{CdnConfig, HttpConfig};
use crate::error::{Store, SyncError};
use crate::http::{build_client, error_body};
use crate::link::CdnObjectId;

/// Capability to store, fetch, retire and search CDN objects.
#[async_trait]
pub trait CdnStore: Send + Sync {
    /// Upload `bytes` as a new object and return its public link.
    async fn upload(&self, bytes: Bytes, filename: &str) -> Result<String, SyncError>;

    /// Fetch an object's original bytes; `Ok(None)` on a non-success status.
    async fn fetch_by_id(&self, id: &CdnObjectId) -> Result<Option<Bytes>, SyncError>;

    /// Delete an object. Failures are logged and reported as `false`.
    async fn delete_by_id(&self, id: &CdnObjectId) -> bool;

    /// Public link of the first object stored under `filename`.
    async fn find_by_filename(&self, filename: &str) -> Result<Option<String>, SyncError>;
}

/// Name under which a product's image is uploaded.
pub fn upload_filename(product_id: &str) -> String {
    format!("{product_id}.jpg")
}

/// [`CdnStore`] over the CDN's account-scoped images REST API.
#[derive(Debug, Clone)]
pub struct HttpCdnStore {
    client: reqwest::Client,
    endpoint: String,
    api_token: String,
    upload_metadata: String,
    require_signed_urls: bool,
    list_page_size: u32,
    max_list_pages: u32,
}

impl HttpCdnStore {
    pub fn new(cdn: &CdnConfig, http: &HttpConfig) -> Result<Self, SyncError> {
        Ok(Self::with_client(build_client(http)?, cdn))
    }

    pub fn with_client(client: reqwest::Client, cdn: &CdnConfig) -> Self {
        Self {
            client,
            endpoint: cdn.images_endpoint(),
            api_token: cdn.api_token.clone(),
            upload_metadata: cdn.upload_metadata.to_string(),
            require_signed_urls: cdn.require_signed_urls,
            list_page_size: cdn.list_page_size.max(1),
            max_list_pages: cdn.max_list_pages,
        }
    }

    fn object_url(&self, id: &CdnObjectId) -> String {
        format!("{}/{}", self.endpoint, id.as_str())
    }
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(default)]
    success: Option<bool>,
    result: Option<T>,
    #[serde(default)]
    errors: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct StoredObject {
    #[serde(default)]
    filename: Option<String>,
    #[serde(default)]
    variants: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ObjectPage {
    #[serde(default)]
    images: Vec<StoredObject>,
}

#[async_trait]
impl CdnStore for HttpCdnStore {
    async fn upload(&self, bytes: Bytes, filename: &str) -> Result<String, SyncError> {
        info!(filename, bytes = bytes.len(), "uploading image to CDN");
        let part = Part::bytes(bytes.to_vec())
            .file_name(filename.to_string())
            .mime_str("image/jpeg")
            .map_err(|e| SyncError::Internal(format!("invalid upload mime type: {e}")))?;
        let form = Form::new()
            .part("file", part)
            .text("metadata", self.upload_metadata.clone())
            .text(
                "requireSignedURLs",
                if self.require_signed_urls { "true" } else { "false" },
            );

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_token)
            .multipart(form)
            .send()
            .await
            .map_err(SyncError::transport(Store::Cdn))?;

        let status = response.status();
        if !status.is_success() {
            let body = error_body(response).await;
            warn!(filename, status = status.as_u16(), body = %body, "CDN rejected upload");
            return Err(SyncError::upstream(
                Store::Cdn,
                format!("upload of {filename} returned HTTP {status}: {body}"),
            ));
        }

        let envelope: Envelope<StoredObject> = response.json().await.map_err(|e| {
            SyncError::upstream(Store::Cdn, format!("invalid upload response: {e}"))
        })?;
        if envelope.success == Some(false) {
            return Err(SyncError::upstream(
                Store::Cdn,
                format!("upload of {filename} reported failure: {:?}", envelope.errors),
            ));
        }
        let link = envelope
            .result
            .and_then(|object| object.variants.into_iter().next())
            .ok_or_else(|| {
                SyncError::upstream(Store::Cdn, "upload response carries no delivery variant")
            })?;

        info!(filename, link = %link, "image uploaded to CDN");
        Ok(link)
    }

    async fn fetch_by_id(&self, id: &CdnObjectId) -> Result<Option<Bytes>, SyncError> {
        let url = format!("{}/blob", self.object_url(id));
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.api_token)
            .send()
            .await
            .map_err(SyncError::transport(Store::Cdn))?;

        let status = response.status();
        if !status.is_success() {
            error!(object_id = %id, status = status.as_u16(), "failed to download image from CDN");
            return Ok(None);
        }

        let bytes = response
            .bytes()
            .await
            .map_err(SyncError::transport(Store::Cdn))?;
        info!(object_id = %id, bytes = bytes.len(), "downloaded image from CDN");
        Ok(Some(bytes))
    }

    async fn delete_by_id(&self, id: &CdnObjectId) -> bool {
        let response = match self
            .client
            .delete(self.object_url(id))
            .bearer_auth(&self.api_token)
            .send()
            .await
        {
            Ok(response) => response,
            Err(err) => {
                error!(object_id = %id, error = %err, "failed to delete image from CDN");
                return false;
            }
        };

        let status = response.status();
        if status.is_success() {
            info!(object_id = %id, "deleted image from CDN");
            true
        } else {
            error!(object_id = %id, status = status.as_u16(), "failed to delete image from CDN");
            false
        }
    }

    async fn find_by_filename(&self, filename: &str) -> Result<Option<String>, SyncError> {
        for page in 1..=self.max_list_pages {
            let response = self
                .client
                .get(&self.endpoint)
                .bearer_auth(&self.api_token)
                .query(&[("page", page), ("per_page", self.list_page_size)])
                .send()
                .await
                .map_err(SyncError::transport(Store::Cdn))?;

            let status = response.status();
            if !status.is_success() {
                let body = error_body(response).await;
                return Err(SyncError::upstream(
                    Store::Cdn,
                    format!("listing page {page} returned HTTP {status}: {body}"),
                ));
            }

            let envelope: Envelope<ObjectPage> = response.json().await.map_err(|e| {
                SyncError::upstream(Store::Cdn, format!("invalid listing response: {e}"))
            })?;
            let objects = envelope.result.map(|p| p.images).unwrap_or_default();
            debug!(page, objects = objects.len(), "listed CDN objects");

            let fetched = objects.len();
            let hit = objects
                .into_iter()
                .find(|object| object.filename.as_deref() == Some(filename))
                .and_then(|object| object.variants.into_iter().next());
            if hit.is_some() {
                return Ok(hit);
            }
            if fetched < self.list_page_size as usize {
                break;
            }
        }
        Ok(None)
    }
}
