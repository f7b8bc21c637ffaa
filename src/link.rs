//! Link classification.
//!
//! A link is routed by which store hosts it. Classification is recomputed
//! every time a link is looked at; nothing is cached.

use std::fmt;

use crate::config::SyncConfig;

/// Which store a link points into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkOrigin {
    /// Hosted by the source-of-record system, not yet mirrored to the CDN.
    SourceOrigin,
    /// Served by the image CDN.
    CdnHosted,
    Unknown,
}

/// Pure host-signature matcher.
///
/// The source signature is checked first: a link carrying both signatures
/// classifies as [`LinkOrigin::SourceOrigin`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkClassifier {
    source_signature: String,
    cdn_signature: String,
}

impl Default for LinkClassifier {
    fn default() -> Self {
        let cfg = SyncConfig::default();
        Self::new(cfg.source.host_signature, cfg.cdn.host_signature)
    }
}

impl LinkClassifier {
    pub fn new(source_signature: impl Into<String>, cdn_signature: impl Into<String>) -> Self {
        Self {
            source_signature: source_signature.into(),
            cdn_signature: cdn_signature.into(),
        }
    }

    pub fn from_config(cfg: &SyncConfig) -> Self {
        Self::new(
            cfg.source.host_signature.clone(),
            cfg.cdn.host_signature.clone(),
        )
    }

    pub fn classify(&self, link: &str) -> LinkOrigin {
        if self.is_source(link) {
            LinkOrigin::SourceOrigin
        } else if self.is_cdn(link) {
            LinkOrigin::CdnHosted
        } else {
            LinkOrigin::Unknown
        }
    }

    pub fn is_source(&self, link: &str) -> bool {
        link.contains(self.source_signature.as_str())
    }

    pub fn is_cdn(&self, link: &str) -> bool {
        link.contains(self.cdn_signature.as_str())
    }
}

/// Identifier of a CDN object, as embedded in its public delivery link.
///
/// Delivery links look like `https://<host>/<account-hash>/<object-id>/<variant>`;
/// the identifier is the second-to-last path segment.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CdnObjectId(String);

impl CdnObjectId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn from_link(link: &str) -> Option<Self> {
        let url = reqwest::Url::parse(link).ok()?;
        let segments: Vec<&str> = url.path_segments()?.filter(|s| !s.is_empty()).collect();
        if segments.len() < 2 {
            return None;
        }
        Some(Self(segments[segments.len() - 2].to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CdnObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
