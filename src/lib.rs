//! Catalog image reconciliation.
//!
//! Keeps the image link recorded for each product in a metadata store
//! pointing at a CDN-hosted copy of the product's current source-of-record
//! image. Callers hand over batches of `(product_id, image_link)` pairs; each
//! item is reconciled independently and the minimum work is done to converge:
//!
//! * fresh products get one upload,
//! * links still pointing at the source system are migrated to the CDN,
//! * stale CDN copies are replaced, and the old object is retired,
//! * matching CDN copies are left alone.
//!
//! The crate is layered bottom-up:
//!
//! | Module | Role |
//! |--------|------|
//! | [`link`] | Classify links by origin; extract CDN object ids |
//! | [`codec`] | Decode anything, re-encode to one canonical JPEG form |
//! | [`source`], [`cdn`], [`metadata`] | Store capabilities and their HTTP clients |
//! | [`reconcile`] | Per-item decision core |
//! | [`batch`] | Sequential, fire-and-forget batch runner |
//! | [`fake`] | In-memory stores for tests |
//!
//! ```no_run
//! use std::sync::Arc;
//! use imgsync::{BatchItem, BatchRunner, SyncConfig, build_reconciler};
//!
//! # async fn run() -> Result<(), imgsync::SyncError> {
//! let cfg = SyncConfig::default();
//! let runner = Arc::new(BatchRunner::new(Arc::new(build_reconciler(&cfg)?), cfg.batch));
//! let report = runner
//!     .run(vec![BatchItem::new("p1", "https://api.moysklad.ru/.../images")])
//!     .await;
//! println!("{report:?}");
//! # Ok(())
//! # }
//! ```

pub mod batch;
pub mod cdn;
pub mod codec;
pub mod config;
pub mod error;
pub mod fake;
pub mod http;
pub mod link;
pub mod metadata;
pub mod reconcile;
pub mod source;

use std::sync::Arc;

pub use batch::{BatchItem, BatchReport, BatchRunner, ProductLocks, dedupe_batch};
pub use cdn::{CdnStore, HttpCdnStore, upload_filename};
pub use codec::{ColorMode, ImageCodec, NormalizedImage, images_equal};
pub use config::{
    BatchConfig, CdnConfig, CodecConfig, HttpConfig, MetadataConfig, SourceConfig, SyncConfig,
};
pub use error::{ItemError, Stage, Store, SyncError};
pub use link::{CdnObjectId, LinkClassifier, LinkOrigin};
pub use metadata::{CanonicalImageRecord, MetadataStore, RealtimeDbStore, check_product_id};
pub use reconcile::{ItemOutcome, Reconciler, Stores};
pub use source::{HttpSourceStore, SourceStore};

/// Wire the HTTP store clients from `cfg` into a [`Reconciler`].
///
/// One pooled HTTP client is shared by all three stores.
pub fn build_reconciler(cfg: &SyncConfig) -> Result<Reconciler, SyncError> {
    cfg.validate()?;
    let client = http::build_client(&cfg.http)?;
    let stores = Stores {
        source: Arc::new(HttpSourceStore::with_client(client.clone(), &cfg.source)),
        cdn: Arc::new(HttpCdnStore::with_client(client.clone(), &cfg.cdn)),
        metadata: Arc::new(RealtimeDbStore::with_client(client, &cfg.metadata)),
    };
    Ok(Reconciler::new(
        stores,
        ImageCodec::new(cfg.codec),
        LinkClassifier::from_config(cfg),
    ))
}
