//! Per-product metadata store holding the canonical image link.

use std::collections::BTreeMap;

use async_trait::async_trait;
use reqwest::Url;
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::config::{HttpConfig, MetadataConfig};
use crate::error::{Store, SyncError};
use crate::http::{build_client, error_body};

/// A product's canonical image, as held by the metadata store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalImageRecord {
    pub product_id: String,
    /// `None` when the product has no image yet.
    pub image_link: Option<String>,
}

/// Capability to read and write canonical image links.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Current canonical link; `None` for a missing record or missing field.
    async fn get_link(&self, product_id: &str) -> Result<Option<String>, SyncError>;

    /// Set the canonical link, leaving every other field of the record alone.
    async fn set_link(&self, product_id: &str, link: &str) -> Result<(), SyncError>;

    /// Every product that currently has a canonical link.
    async fn get_all_links(&self) -> Result<BTreeMap<String, String>, SyncError>;

    async fn get_record(&self, product_id: &str) -> Result<CanonicalImageRecord, SyncError> {
        Ok(CanonicalImageRecord {
            product_id: product_id.to_string(),
            image_link: self.get_link(product_id).await?,
        })
    }
}

/// Reject ids that cannot address a single record: empty, containing a path
/// separator, or any of the key characters the database forbids.
pub fn check_product_id(product_id: &str) -> Result<(), SyncError> {
    let forbidden = |c: char| matches!(c, '/' | '.' | '#' | '$' | '[' | ']') || c.is_control();
    if product_id.trim().is_empty() || product_id.contains(forbidden) {
        return Err(SyncError::InvalidProductId(product_id.to_string()));
    }
    Ok(())
}

/// [`MetadataStore`] over a path-addressed JSON database
/// (`{database_url}/{collection}/{product_id}.json`).
#[derive(Debug, Clone)]
pub struct RealtimeDbStore {
    client: reqwest::Client,
    base: String,
    collection: String,
    image_field: String,
    auth_token: Option<String>,
}

impl RealtimeDbStore {
    pub fn new(metadata: &MetadataConfig, http: &HttpConfig) -> Result<Self, SyncError> {
        Ok(Self::with_client(build_client(http)?, metadata))
    }

    pub fn with_client(client: reqwest::Client, metadata: &MetadataConfig) -> Self {
        Self {
            client,
            base: metadata.database_url.trim_end_matches('/').to_string(),
            collection: metadata.collection.trim_matches('/').to_string(),
            image_field: metadata.image_field.clone(),
            auth_token: metadata.auth_token.clone(),
        }
    }

    fn collection_url(&self) -> Result<Url, SyncError> {
        Url::parse(&format!("{}/{}.json", self.base, self.collection))
            .map_err(|e| SyncError::InvalidConfig(format!("metadata.database_url: {e}")))
    }

    /// Record location with `product_id` percent-encoded as one path segment.
    fn record_url(&self, product_id: &str) -> Result<Url, SyncError> {
        check_product_id(product_id)?;
        let mut url = Url::parse(&format!("{}/{}", self.base, self.collection))
            .map_err(|e| SyncError::InvalidConfig(format!("metadata.database_url: {e}")))?;
        url.path_segments_mut()
            .map_err(|()| {
                SyncError::InvalidConfig("metadata.database_url cannot hold a path".into())
            })?
            .push(&format!("{product_id}.json"));
        Ok(url)
    }

    fn request(&self, method: reqwest::Method, url: Url) -> reqwest::RequestBuilder {
        let builder = self.client.request(method, url);
        match &self.auth_token {
            Some(token) => builder.query(&[("auth", token.as_str())]),
            None => builder,
        }
    }

    async fn read_json(&self, url: Url) -> Result<Value, SyncError> {
        let response = self
            .request(reqwest::Method::GET, url.clone())
            .send()
            .await
            .map_err(SyncError::transport(Store::Metadata))?;

        let status = response.status();
        if !status.is_success() {
            let body = error_body(response).await;
            return Err(SyncError::upstream(
                Store::Metadata,
                format!("GET {url} returned HTTP {status}: {body}"),
            ));
        }

        response
            .json()
            .await
            .map_err(|e| SyncError::upstream(Store::Metadata, format!("invalid JSON: {e}")))
    }

    fn image_of<'a>(&self, record: &'a Value) -> Option<&'a str> {
        record.get(&self.image_field).and_then(Value::as_str)
    }
}

#[async_trait]
impl MetadataStore for RealtimeDbStore {
    async fn get_link(&self, product_id: &str) -> Result<Option<String>, SyncError> {
        let record = self.read_json(self.record_url(product_id)?).await?;
        let link = self.image_of(&record).map(str::to_owned);
        match &link {
            Some(link) => info!(product_id, link = %link, "fetched canonical image link"),
            None => info!(product_id, "product has no canonical image link"),
        }
        Ok(link)
    }

    async fn set_link(&self, product_id: &str, link: &str) -> Result<(), SyncError> {
        info!(product_id, "updating canonical image link");
        let mut patch = Map::new();
        patch.insert(self.image_field.clone(), Value::String(link.to_string()));

        let url = self.record_url(product_id)?;
        let response = self
            .request(reqwest::Method::PATCH, url.clone())
            .json(&patch)
            .send()
            .await
            .map_err(SyncError::transport(Store::Metadata))?;

        let status = response.status();
        if !status.is_success() {
            let body = error_body(response).await;
            return Err(SyncError::upstream(
                Store::Metadata,
                format!("PATCH {url} returned HTTP {status}: {body}"),
            ));
        }

        info!(product_id, link, "canonical image link set");
        Ok(())
    }

    async fn get_all_links(&self) -> Result<BTreeMap<String, String>, SyncError> {
        info!("fetching all canonical image links");
        let products = self.read_json(self.collection_url()?).await?;
        let mut links = BTreeMap::new();
        if let Value::Object(products) = products {
            for (product_id, record) in &products {
                match self.image_of(record) {
                    Some(link) => {
                        links.insert(product_id.clone(), link.to_string());
                    }
                    None => debug!(product_id = %product_id, "skipping product without image"),
                }
            }
        }
        info!(count = links.len(), "fetched canonical image links");
        Ok(links)
    }
}
