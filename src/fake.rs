//! In-memory store implementations for tests and local dry runs.
//!
//! Every fake records the calls made against it and can be told to fail, so
//! engine behaviour can be asserted without a network.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use bytes::Bytes;
use image::{DynamicImage, ImageBuffer, ImageFormat, Rgb};

use crate::cdn::CdnStore;
use crate::error::{Store, SyncError};
use crate::link::CdnObjectId;
use crate::metadata::MetadataStore;
use crate::source::SourceStore;

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// PNG-encoded RGB gradient; `seed` varies the pixel content.
pub fn sample_png(width: u32, height: u32, seed: u8) -> Result<Vec<u8>, SyncError> {
    let img = ImageBuffer::from_fn(width, height, |x, y| {
        Rgb([
            (x as u8).wrapping_mul(7).wrapping_add(seed),
            (y as u8).wrapping_mul(11),
            seed.wrapping_mul(31),
        ])
    });
    let mut buf = Vec::new();
    DynamicImage::ImageRgb8(img)
        .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .map_err(|e| SyncError::Internal(format!("failed to encode sample PNG: {e}")))?;
    Ok(buf)
}

/// Source store keyed by candidate link.
///
/// Links resolve to the handle `handle:{link}`. Links with no registered
/// image resolve fine but fetch to `None`, mirroring a non-success download.
#[derive(Debug, Default)]
pub struct FakeSourceStore {
    images: Mutex<HashMap<String, Bytes>>,
    failing_resolve: Mutex<HashSet<String>>,
    resolve_calls: AtomicUsize,
    fetch_calls: AtomicUsize,
}

impl FakeSourceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, link: &str, bytes: impl Into<Bytes>) {
        locked(&self.images).insert(link.to_string(), bytes.into());
    }

    /// Make resolving `link` fail with an upstream error.
    pub fn fail_resolve(&self, link: &str) {
        locked(&self.failing_resolve).insert(link.to_string());
    }

    pub fn resolve_calls(&self) -> usize {
        self.resolve_calls.load(Ordering::SeqCst)
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SourceStore for FakeSourceStore {
    async fn resolve_download_handle(&self, link: &str) -> Result<String, SyncError> {
        self.resolve_calls.fetch_add(1, Ordering::SeqCst);
        if locked(&self.failing_resolve).contains(link) {
            return Err(SyncError::upstream(
                Store::Source,
                format!("HTTP 500 resolving {link}"),
            ));
        }
        Ok(format!("handle:{link}"))
    }

    async fn fetch_bytes(&self, handle: &str) -> Result<Option<Bytes>, SyncError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        let link = handle.strip_prefix("handle:").unwrap_or(handle);
        Ok(locked(&self.images).get(link).cloned())
    }
}

/// A recorded CDN upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadRecord {
    pub id: CdnObjectId,
    pub filename: String,
    pub link: String,
    pub bytes: Bytes,
}

#[derive(Debug, Default)]
struct CdnState {
    objects: BTreeMap<String, (String, Bytes)>,
    uploads: Vec<UploadRecord>,
    deletes: Vec<CdnObjectId>,
    next_id: usize,
    fail_uploads: bool,
    fail_deletes: bool,
    unavailable: HashSet<String>,
}

/// CDN store holding objects in memory.
///
/// Objects get ids `cdn-1`, `cdn-2`, ... and links of the form
/// `https://imagedelivery.net/{account}/{id}/public`.
#[derive(Debug)]
pub struct FakeCdnStore {
    account: String,
    state: Mutex<CdnState>,
}

impl Default for FakeCdnStore {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeCdnStore {
    pub fn new() -> Self {
        Self {
            account: "acct".to_string(),
            state: Mutex::new(CdnState::default()),
        }
    }

    pub fn link_for(&self, id: &str) -> String {
        format!("https://imagedelivery.net/{}/{id}/public", self.account)
    }

    /// Place an object directly, bypassing the upload log. Returns its link.
    pub fn seed(&self, id: &str, filename: &str, bytes: impl Into<Bytes>) -> String {
        locked(&self.state)
            .objects
            .insert(id.to_string(), (filename.to_string(), bytes.into()));
        self.link_for(id)
    }

    pub fn set_fail_uploads(&self, fail: bool) {
        locked(&self.state).fail_uploads = fail;
    }

    pub fn set_fail_deletes(&self, fail: bool) {
        locked(&self.state).fail_deletes = fail;
    }

    /// Make downloads of `id` answer as a non-success status would.
    pub fn make_unavailable(&self, id: &str) {
        locked(&self.state).unavailable.insert(id.to_string());
    }

    pub fn uploads(&self) -> Vec<UploadRecord> {
        locked(&self.state).uploads.clone()
    }

    pub fn deletes(&self) -> Vec<CdnObjectId> {
        locked(&self.state).deletes.clone()
    }

    pub fn contains(&self, id: &str) -> bool {
        locked(&self.state).objects.contains_key(id)
    }

    pub fn object_count(&self) -> usize {
        locked(&self.state).objects.len()
    }
}

#[async_trait]
impl CdnStore for FakeCdnStore {
    async fn upload(&self, bytes: Bytes, filename: &str) -> Result<String, SyncError> {
        let mut state = locked(&self.state);
        if state.fail_uploads {
            return Err(SyncError::upstream(
                Store::Cdn,
                format!("upload of {filename} returned HTTP 500"),
            ));
        }
        state.next_id += 1;
        let id = format!("cdn-{}", state.next_id);
        let link = self.link_for(&id);
        state
            .objects
            .insert(id.clone(), (filename.to_string(), bytes.clone()));
        state.uploads.push(UploadRecord {
            id: CdnObjectId::new(id),
            filename: filename.to_string(),
            link: link.clone(),
            bytes,
        });
        Ok(link)
    }

    async fn fetch_by_id(&self, id: &CdnObjectId) -> Result<Option<Bytes>, SyncError> {
        let state = locked(&self.state);
        if state.unavailable.contains(id.as_str()) {
            return Ok(None);
        }
        Ok(state.objects.get(id.as_str()).map(|(_, bytes)| bytes.clone()))
    }

    async fn delete_by_id(&self, id: &CdnObjectId) -> bool {
        let mut state = locked(&self.state);
        state.deletes.push(id.clone());
        if state.fail_deletes {
            return false;
        }
        state.objects.remove(id.as_str()).is_some()
    }

    async fn find_by_filename(&self, filename: &str) -> Result<Option<String>, SyncError> {
        let state = locked(&self.state);
        Ok(state
            .objects
            .iter()
            .find(|(_, (name, _))| name == filename)
            .map(|(id, _)| self.link_for(id)))
    }
}

/// Metadata store backed by a map, with a log of every write.
#[derive(Debug, Default)]
pub struct MemoryMetadataStore {
    links: Mutex<BTreeMap<String, String>>,
    writes: Mutex<Vec<(String, String)>>,
    fail_reads: Mutex<bool>,
    fail_writes: Mutex<bool>,
}

impl MemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a canonical link without recording a write.
    pub fn seed(&self, product_id: &str, link: &str) {
        locked(&self.links).insert(product_id.to_string(), link.to_string());
    }

    pub fn link(&self, product_id: &str) -> Option<String> {
        locked(&self.links).get(product_id).cloned()
    }

    pub fn writes(&self) -> Vec<(String, String)> {
        locked(&self.writes).clone()
    }

    pub fn write_count(&self) -> usize {
        locked(&self.writes).len()
    }

    pub fn set_fail_reads(&self, fail: bool) {
        *locked(&self.fail_reads) = fail;
    }

    pub fn set_fail_writes(&self, fail: bool) {
        *locked(&self.fail_writes) = fail;
    }
}

#[async_trait]
impl MetadataStore for MemoryMetadataStore {
    async fn get_link(&self, product_id: &str) -> Result<Option<String>, SyncError> {
        if *locked(&self.fail_reads) {
            return Err(SyncError::upstream(Store::Metadata, "HTTP 503 reading record"));
        }
        Ok(self.link(product_id))
    }

    async fn set_link(&self, product_id: &str, link: &str) -> Result<(), SyncError> {
        if *locked(&self.fail_writes) {
            return Err(SyncError::upstream(Store::Metadata, "HTTP 503 writing record"));
        }
        locked(&self.writes).push((product_id.to_string(), link.to_string()));
        self.seed(product_id, link);
        Ok(())
    }

    async fn get_all_links(&self) -> Result<BTreeMap<String, String>, SyncError> {
        if *locked(&self.fail_reads) {
            return Err(SyncError::upstream(Store::Metadata, "HTTP 503 reading collection"));
        }
        Ok(locked(&self.links).clone())
    }
}
