//! Error types produced by the reconciliation pipeline.
//!
//! Two layers:
//!
//! | Type | Scope | Description |
//! |------|-------|-------------|
//! | [`SyncError`] | single operation | What went wrong talking to a store or decoding bytes |
//! | [`ItemError`] | single batch item | A [`SyncError`] pinned to the [`Stage`] where it happened |
//!
//! Nothing in this crate lets an [`ItemError`] escape the batch item that
//! produced it; the batch runner logs it and moves on to the next product.

use std::fmt;

use thiserror::Error;

/// The external store an operation talked to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Store {
    /// Source-of-record inventory system.
    Source,
    /// Deduplicating image CDN.
    Cdn,
    /// Per-product metadata store holding the canonical link.
    Metadata,
}

impl Store {
    pub fn as_str(self) -> &'static str {
        match self {
            Store::Source => "source",
            Store::Cdn => "cdn",
            Store::Metadata => "metadata",
        }
    }
}

impl fmt::Display for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors surfaced by the codec and the store clients.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SyncError {
    /// Bytes are not a parseable image (or exceed the configured size limit).
    #[error("image decode failed: {0}")]
    Decode(String),

    /// Non-success response, or a success response missing an expected field.
    #[error("{store} store returned an error: {message}")]
    Upstream { store: Store, message: String },

    /// An expected resource is absent, e.g. no download handle in the payload.
    #[error("not found: {0}")]
    NotFound(String),

    /// The request never produced a response (DNS, TLS, timeout, body read).
    #[error("{store} store request failed: {source}")]
    Transport {
        store: Store,
        #[source]
        source: reqwest::Error,
    },

    /// Invariant breakage inside the pipeline itself (e.g. a worker panicked).
    #[error("internal error: {0}")]
    Internal(String),

    /// Configuration is inconsistent or out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A product id that cannot be used as a metadata record key.
    #[error("invalid product id {0:?}")]
    InvalidProductId(String),
}

impl SyncError {
    pub(crate) fn upstream(store: Store, message: impl Into<String>) -> Self {
        SyncError::Upstream {
            store,
            message: message.into(),
        }
    }

    pub(crate) fn transport(store: Store) -> impl FnOnce(reqwest::Error) -> Self {
        move |source| SyncError::Transport { store, source }
    }

    /// The store involved, when the error came from one.
    pub fn store(&self) -> Option<Store> {
        match self {
            SyncError::Upstream { store, .. } | SyncError::Transport { store, .. } => Some(*store),
            _ => None,
        }
    }
}

/// Pipeline stage at which a batch item was abandoned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    ResolveHandle,
    FetchSource,
    Normalize,
    ReadCanonical,
    FetchExisting,
    NormalizeExisting,
    Upload,
    WriteCanonical,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::ResolveHandle => "resolve_handle",
            Stage::FetchSource => "fetch_source",
            Stage::Normalize => "normalize",
            Stage::ReadCanonical => "read_canonical",
            Stage::FetchExisting => "fetch_existing",
            Stage::NormalizeExisting => "normalize_existing",
            Stage::Upload => "upload",
            Stage::WriteCanonical => "write_canonical",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A [`SyncError`] attributed to the stage of the item pipeline that raised it.
#[derive(Debug, Error)]
#[error("{stage} failed: {source}")]
pub struct ItemError {
    pub stage: Stage,
    #[source]
    pub source: SyncError,
}

impl ItemError {
    pub fn new(stage: Stage, source: SyncError) -> Self {
        Self { stage, source }
    }
}

/// Attach a [`Stage`] to a fallible store or codec call.
pub(crate) trait AtStage<T> {
    fn at(self, stage: Stage) -> Result<T, ItemError>;
}

impl<T> AtStage<T> for Result<T, SyncError> {
    fn at(self, stage: Stage) -> Result<T, ItemError> {
        self.map_err(|source| ItemError::new(stage, source))
    }
}
