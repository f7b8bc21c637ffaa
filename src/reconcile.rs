//! Per-product reconciliation.
//!
//! For one `(product_id, candidate_link)` pair the [`Reconciler`] decides
//! whether the product's canonical link is already right, needs a fresh CDN
//! copy, or needs its stale CDN copy replaced:
//!
//! ```text
//! candidate ──classify──► source? ──no──► NoFreshImage
//!                           │
//!                   resolve + fetch ──absent──► NoFreshImage
//!                           │
//!                       normalize
//!                           │
//!                   read canonical link
//!     ┌──────────────┬──────┴─────────┬─────────────────┐
//!   absent        source link      CDN link          unknown
//!     │              │                │                 │
//!   upload        upload        fetch existing     Unsupported
//!   write         write          │          │
//!  Uploaded      Migrated     absent     compare
//!                          Existing-   equal │ differ
//!                          Unavailable   │   delete old, upload, write
//!                                   Unchanged        Replaced
//! ```
//!
//! Every failure stays inside the item: the caller receives an
//! [`ItemError`] naming the stage, and no sibling item is affected.

use std::sync::Arc;

use bytes::Bytes;
use tracing::{info, warn};

use crate::cdn::{CdnStore, upload_filename};
use crate::codec::{ImageCodec, NormalizedImage, images_equal};
use crate::error::{AtStage, ItemError, Stage};
use crate::link::{CdnObjectId, LinkClassifier, LinkOrigin};
use crate::metadata::MetadataStore;
use crate::source::SourceStore;
use crate::batch::BatchItem;

/// Terminal state of one reconciled item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemOutcome {
    /// The candidate offered no image (not a source link, or the download
    /// came back empty). Nothing was touched.
    NoFreshImage,
    /// The CDN copy already matches the source image.
    Unchanged { link: String },
    /// The product had no canonical link; a fresh copy was uploaded.
    Uploaded { link: String },
    /// The canonical link still pointed at the source system; it now points
    /// at a fresh CDN copy.
    Migrated { previous: String, link: String },
    /// The CDN copy was stale and has been replaced.
    Replaced {
        previous: String,
        link: String,
        /// `false` when the old object could not be deleted and is left dangling.
        stale_deleted: bool,
    },
    /// The existing CDN copy could not be downloaded for comparison; the
    /// canonical link was left as is.
    ExistingUnavailable { link: String },
    /// The canonical link is in a format this pipeline does not handle.
    Unsupported { link: String },
}

impl ItemOutcome {
    /// Stable label used in logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            ItemOutcome::NoFreshImage => "no_fresh_image",
            ItemOutcome::Unchanged { .. } => "unchanged",
            ItemOutcome::Uploaded { .. } => "uploaded",
            ItemOutcome::Migrated { .. } => "migrated",
            ItemOutcome::Replaced { .. } => "replaced",
            ItemOutcome::ExistingUnavailable { .. } => "existing_unavailable",
            ItemOutcome::Unsupported { .. } => "unsupported",
        }
    }

    /// The canonical link after reconciliation, when one is known.
    pub fn canonical_link(&self) -> Option<&str> {
        match self {
            ItemOutcome::NoFreshImage => None,
            ItemOutcome::Unchanged { link }
            | ItemOutcome::Uploaded { link }
            | ItemOutcome::Migrated { link, .. }
            | ItemOutcome::Replaced { link, .. }
            | ItemOutcome::ExistingUnavailable { link }
            | ItemOutcome::Unsupported { link } => Some(link),
        }
    }
}

/// The three external stores the engine talks to.
#[derive(Clone)]
pub struct Stores {
    pub source: Arc<dyn SourceStore>,
    pub cdn: Arc<dyn CdnStore>,
    pub metadata: Arc<dyn MetadataStore>,
}

/// Decision core: converges one product's canonical link with its source image.
#[derive(Clone)]
pub struct Reconciler {
    stores: Stores,
    codec: ImageCodec,
    classifier: LinkClassifier,
}

impl Reconciler {
    pub fn new(stores: Stores, codec: ImageCodec, classifier: LinkClassifier) -> Self {
        Self {
            stores,
            codec,
            classifier,
        }
    }

    pub fn stores(&self) -> &Stores {
        &self.stores
    }

    pub fn classifier(&self) -> &LinkClassifier {
        &self.classifier
    }

    /// Reconcile a single batch item.
    pub async fn reconcile(&self, item: &BatchItem) -> Result<ItemOutcome, ItemError> {
        let Some(raw) = self.fetch_fresh(&item.image_link).await? else {
            return Ok(ItemOutcome::NoFreshImage);
        };
        let fresh = self
            .codec
            .normalize_blocking(raw)
            .await
            .at(Stage::Normalize)?;

        let product_id = item.product_id.as_str();
        let current = self
            .stores
            .metadata
            .get_link(product_id)
            .await
            .at(Stage::ReadCanonical)?;

        let Some(current) = current else {
            info!(product_id, "no canonical image yet, uploading");
            let link = self.publish(product_id, &fresh).await?;
            return Ok(ItemOutcome::Uploaded { link });
        };

        match self.classifier.classify(&current) {
            LinkOrigin::SourceOrigin => {
                info!(product_id, previous = %current, "canonical link still on source, migrating");
                let link = self.publish(product_id, &fresh).await?;
                Ok(ItemOutcome::Migrated {
                    previous: current,
                    link,
                })
            }
            LinkOrigin::CdnHosted => self.refresh_cdn_copy(product_id, current, fresh).await,
            LinkOrigin::Unknown => {
                warn!(product_id, link = %current, "unknown canonical link format, leaving as is");
                Ok(ItemOutcome::Unsupported { link: current })
            }
        }
    }

    /// Download the candidate's bytes if it is a source-origin link.
    async fn fetch_fresh(&self, candidate: &str) -> Result<Option<Bytes>, ItemError> {
        if self.classifier.classify(candidate) != LinkOrigin::SourceOrigin {
            info!(link = candidate, "candidate is not a source link, nothing to fetch");
            return Ok(None);
        }
        let handle = self
            .stores
            .source
            .resolve_download_handle(candidate)
            .await
            .at(Stage::ResolveHandle)?;
        let bytes = self
            .stores
            .source
            .fetch_bytes(&handle)
            .await
            .at(Stage::FetchSource)?;
        if bytes.is_none() {
            info!(link = candidate, "source returned no image");
        }
        Ok(bytes)
    }

    async fn refresh_cdn_copy(
        &self,
        product_id: &str,
        current: String,
        fresh: NormalizedImage,
    ) -> Result<ItemOutcome, ItemError> {
        let Some(object_id) = CdnObjectId::from_link(&current) else {
            warn!(product_id, link = %current, "CDN link carries no object id, leaving as is");
            return Ok(ItemOutcome::Unsupported { link: current });
        };

        let existing = self
            .stores
            .cdn
            .fetch_by_id(&object_id)
            .await
            .at(Stage::FetchExisting)?;
        let Some(existing) = existing else {
            warn!(
                product_id,
                object_id = %object_id,
                "existing CDN image unavailable for comparison, leaving canonical link"
            );
            return Ok(ItemOutcome::ExistingUnavailable { link: current });
        };
        let existing = self
            .codec
            .normalize_blocking(existing)
            .await
            .at(Stage::NormalizeExisting)?;

        if images_equal(&existing, &fresh) {
            info!(product_id, link = %current, "image matches the CDN copy");
            return Ok(ItemOutcome::Unchanged { link: current });
        }

        info!(product_id, object_id = %object_id, "image differs from the CDN copy, replacing");
        let stale_deleted = self.stores.cdn.delete_by_id(&object_id).await;
        if !stale_deleted {
            warn!(product_id, object_id = %object_id, "stale CDN object left dangling");
        }
        let link = self.publish(product_id, &fresh).await?;
        Ok(ItemOutcome::Replaced {
            previous: current,
            link,
            stale_deleted,
        })
    }

    /// Upload `image` and record the resulting link as canonical.
    async fn publish(&self, product_id: &str, image: &NormalizedImage) -> Result<String, ItemError> {
        let link = self
            .stores
            .cdn
            .upload(image.to_bytes(), &upload_filename(product_id))
            .await
            .at(Stage::Upload)?;
        self.stores
            .metadata
            .set_link(product_id, &link)
            .await
            .at(Stage::WriteCanonical)?;
        Ok(link)
    }
}
