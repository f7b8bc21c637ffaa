//! Configuration for the reconciliation pipeline and its store clients.
//!
//! Every field is defaulted so a partially specified file or environment
//! overlay deserializes cleanly. Credentials default to empty strings; the
//! server refuses to start until they are supplied (see [`SyncConfig::validate`]).
//!
//! ```yaml
//! source:
//!   token: "..."
//!   host_signature: "moysklad.ru/"
//! cdn:
//!   account_id: "..."
//!   api_token: "..."
//!   host_signature: "imagedelivery.net/"
//! metadata:
//!   database_url: "https://example-rtdb.firebaseio.com"
//!   collection: "Products"
//!   image_field: "img"
//! codec:
//!   jpeg_quality: 75
//! batch:
//!   serialize_products: false
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::SyncError;

/// Top-level pipeline configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SyncConfig {
    pub source: SourceConfig,
    pub cdn: CdnConfig,
    pub metadata: MetadataConfig,
    pub codec: CodecConfig,
    pub http: HttpConfig,
    pub batch: BatchConfig,
}

impl SyncConfig {
    /// Reject values that would make the pipeline misbehave at runtime.
    pub fn validate(&self) -> Result<(), SyncError> {
        if self.source.host_signature.trim().is_empty() {
            return Err(SyncError::InvalidConfig(
                "source.host_signature must not be empty".into(),
            ));
        }
        if self.cdn.host_signature.trim().is_empty() {
            return Err(SyncError::InvalidConfig(
                "cdn.host_signature must not be empty".into(),
            ));
        }
        if self.cdn.list_page_size == 0 {
            return Err(SyncError::InvalidConfig(
                "cdn.list_page_size must be greater than zero".into(),
            ));
        }
        if !self.cdn.upload_metadata.is_object() {
            return Err(SyncError::InvalidConfig(
                "cdn.upload_metadata must be a JSON object".into(),
            ));
        }
        if !(1..=100).contains(&self.codec.jpeg_quality) {
            return Err(SyncError::InvalidConfig(format!(
                "codec.jpeg_quality must be within 1..=100, got {}",
                self.codec.jpeg_quality
            )));
        }
        if self.codec.max_image_bytes == 0 {
            return Err(SyncError::InvalidConfig(
                "codec.max_image_bytes must be greater than zero".into(),
            ));
        }
        if self.http.timeout_secs == 0 {
            return Err(SyncError::InvalidConfig(
                "http.timeout_secs must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    /// Like [`validate`](Self::validate), and additionally require every
    /// credential and endpoint the HTTP clients need.
    pub fn validate_credentials(&self) -> Result<(), SyncError> {
        self.validate()?;
        let required = [
            ("source.token", &self.source.token),
            ("cdn.account_id", &self.cdn.account_id),
            ("cdn.api_token", &self.cdn.api_token),
            ("metadata.database_url", &self.metadata.database_url),
        ];
        for (name, value) in required {
            if value.trim().is_empty() {
                return Err(SyncError::InvalidConfig(format!("{name} is required")));
            }
        }
        Ok(())
    }
}

/// Source-of-record inventory system.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SourceConfig {
    /// Bearer token sent on every request.
    pub token: String,
    /// Substring that marks a link as hosted by the source system.
    pub host_signature: String,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            token: String::new(),
            host_signature: default_source_signature(),
        }
    }
}

/// Image CDN account.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CdnConfig {
    /// API root, without the account segment.
    pub api_base: String,
    pub account_id: String,
    pub api_token: String,
    /// Substring that marks a link as served by the CDN delivery host.
    pub host_signature: String,
    /// Sent as the `requireSignedURLs` form field on upload.
    pub require_signed_urls: bool,
    /// Sent as the `metadata` form field on upload.
    pub upload_metadata: serde_json::Value,
    /// Page size for listing objects when searching by filename.
    pub list_page_size: u32,
    /// Upper bound on pages walked by a filename search.
    pub max_list_pages: u32,
}

impl Default for CdnConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.cloudflare.com/client/v4".to_string(),
            account_id: String::new(),
            api_token: String::new(),
            host_signature: default_cdn_signature(),
            require_signed_urls: false,
            upload_metadata: serde_json::json!({ "key": "value" }),
            list_page_size: 100,
            max_list_pages: 50,
        }
    }
}

impl CdnConfig {
    /// `{api_base}/accounts/{account_id}/images/v1`
    pub fn images_endpoint(&self) -> String {
        format!(
            "{}/accounts/{}/images/v1",
            self.api_base.trim_end_matches('/'),
            self.account_id
        )
    }
}

/// Path-addressed JSON record store holding one record per product.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MetadataConfig {
    pub database_url: String,
    /// Collection under which product records live.
    pub collection: String,
    /// Field of the product record that carries the canonical link.
    pub image_field: String,
    /// Appended as the `auth` query parameter when present.
    pub auth_token: Option<String>,
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            database_url: String::new(),
            collection: "Products".to_string(),
            image_field: "img".to_string(),
            auth_token: None,
        }
    }
}

/// Canonical encoding parameters.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CodecConfig {
    pub jpeg_quality: u8,
    pub max_image_bytes: usize,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            jpeg_quality: 75,
            max_image_bytes: 20 * 1024 * 1024,
        }
    }
}

/// Shared HTTP client settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct HttpConfig {
    pub timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            connect_timeout_secs: 10,
            user_agent: concat!("imgsync/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl HttpConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

/// Batch runner behaviour.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BatchConfig {
    /// Hold a per-product lock while reconciling, so concurrent batches that
    /// touch the same product run one after the other.
    pub serialize_products: bool,
}

fn default_source_signature() -> String {
    "moysklad.ru/".to_string()
}

fn default_cdn_signature() -> String {
    "imagedelivery.net/".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_credentials() -> SyncConfig {
        let mut cfg = SyncConfig::default();
        cfg.source.token = "src-token".into();
        cfg.cdn.account_id = "acct".into();
        cfg.cdn.api_token = "cdn-token".into();
        cfg.metadata.database_url = "https://db.example.com".into();
        cfg
    }

    #[test]
    fn defaults_are_valid() {
        let cfg = SyncConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.codec.jpeg_quality, 75);
        assert_eq!(cfg.metadata.collection, "Products");
        assert_eq!(cfg.metadata.image_field, "img");
        assert!(!cfg.cdn.require_signed_urls);
        assert!(!cfg.batch.serialize_products);
    }

    #[test]
    fn defaults_lack_credentials() {
        let err = SyncConfig::default().validate_credentials().unwrap_err();
        assert!(err.to_string().contains("source.token"));
        assert!(with_credentials().validate_credentials().is_ok());
    }

    #[test]
    fn rejects_out_of_range_quality() {
        let mut cfg = SyncConfig::default();
        cfg.codec.jpeg_quality = 0;
        assert!(matches!(cfg.validate(), Err(SyncError::InvalidConfig(_))));
        cfg.codec.jpeg_quality = 101;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_empty_signature() {
        let mut cfg = SyncConfig::default();
        cfg.cdn.host_signature = "  ".into();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_non_object_upload_metadata() {
        let mut cfg = SyncConfig::default();
        cfg.cdn.upload_metadata = serde_json::json!("nope");
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn images_endpoint_trims_trailing_slash() {
        let mut cfg = CdnConfig::default();
        cfg.api_base = "http://127.0.0.1:9000/".into();
        cfg.account_id = "acct".into();
        assert_eq!(
            cfg.images_endpoint(),
            "http://127.0.0.1:9000/accounts/acct/images/v1"
        );
    }

    #[test]
    fn partial_json_fills_defaults() {
        let cfg: SyncConfig =
            serde_json::from_str(r#"{"source": {"token": "abc"}, "codec": {"jpeg_quality": 90}}"#)
                .unwrap();
        assert_eq!(cfg.source.token, "abc");
        assert_eq!(cfg.source.host_signature, "moysklad.ru/");
        assert_eq!(cfg.codec.jpeg_quality, 90);
        assert_eq!(cfg.codec.max_image_bytes, 20 * 1024 * 1024);
    }
}
