use std::sync::Arc;

use imgsync::fake::{FakeCdnStore, FakeSourceStore, MemoryMetadataStore, sample_png};
use imgsync::{
    BatchItem, ImageCodec, ItemOutcome, LinkClassifier, Reconciler, Stage, Stores, images_equal,
};

const SOURCE_LINK: &str = "https://api.moysklad.ru/api/remap/1.2/entity/product/p1/images";

struct World {
    source: Arc<FakeSourceStore>,
    cdn: Arc<FakeCdnStore>,
    metadata: Arc<MemoryMetadataStore>,
    reconciler: Reconciler,
}

fn world() -> World {
    let source = Arc::new(FakeSourceStore::new());
    let cdn = Arc::new(FakeCdnStore::new());
    let metadata = Arc::new(MemoryMetadataStore::new());
    let reconciler = Reconciler::new(
        Stores {
            source: source.clone(),
            cdn: cdn.clone(),
            metadata: metadata.clone(),
        },
        ImageCodec::default(),
        LinkClassifier::default(),
    );
    World {
        source,
        cdn,
        metadata,
        reconciler,
    }
}

fn canonical_bytes(png: &[u8]) -> Vec<u8> {
    ImageCodec::default().normalize(png).unwrap().to_bytes().to_vec()
}

#[tokio::test]
async fn new_product_uploads_once_and_records_cdn_link() {
    let w = world();
    let png = sample_png(32, 24, 3).unwrap();
    w.source.insert(SOURCE_LINK, png.clone());

    let outcome = w
        .reconciler
        .reconcile(&BatchItem::new("p1", SOURCE_LINK))
        .await
        .unwrap();

    let uploads = w.cdn.uploads();
    assert_eq!(uploads.len(), 1);
    assert_eq!(uploads[0].filename, "p1.jpg");
    assert_eq!(uploads[0].bytes.to_vec(), canonical_bytes(&png));
    assert_eq!(
        outcome,
        ItemOutcome::Uploaded {
            link: uploads[0].link.clone()
        }
    );
    assert_eq!(w.metadata.link("p1"), Some(uploads[0].link.clone()));
    assert!(LinkClassifier::default().is_cdn(&uploads[0].link));
    assert!(w.cdn.deletes().is_empty());
}

#[tokio::test]
async fn identical_image_is_left_alone() {
    let w = world();
    let png = sample_png(32, 24, 3).unwrap();
    w.source.insert(SOURCE_LINK, png.clone());
    let existing = w.cdn.seed("old-1", "p1.jpg", canonical_bytes(&png));
    w.metadata.seed("p1", &existing);

    let outcome = w
        .reconciler
        .reconcile(&BatchItem::new("p1", SOURCE_LINK))
        .await
        .unwrap();

    assert_eq!(outcome, ItemOutcome::Unchanged { link: existing.clone() });
    assert!(w.cdn.uploads().is_empty());
    assert!(w.cdn.deletes().is_empty());
    assert_eq!(w.metadata.write_count(), 0);
    assert_eq!(w.metadata.link("p1"), Some(existing));
}

/// Splice a COM and an APP1 segment right after the SOI marker.
fn with_metadata_segments(jpeg: &[u8]) -> Vec<u8> {
    let mut out = jpeg[..2].to_vec();
    for (marker, payload) in [(0xFE_u8, &b"re-exported"[..]), (0xE1, &b"Exif\0\0MM"[..])] {
        out.extend_from_slice(&[0xFF, marker]);
        out.extend_from_slice(&((payload.len() + 2) as u16).to_be_bytes());
        out.extend_from_slice(payload);
    }
    out.extend_from_slice(&jpeg[2..]);
    out
}

#[tokio::test]
async fn metadata_only_difference_is_left_alone() {
    let w = world();
    let stored = canonical_bytes(&sample_png(32, 24, 3).unwrap());
    w.source
        .insert(SOURCE_LINK, with_metadata_segments(&stored));
    let existing = w.cdn.seed("old-1", "p1.jpg", stored);
    w.metadata.seed("p1", &existing);

    let outcome = w
        .reconciler
        .reconcile(&BatchItem::new("p1", SOURCE_LINK))
        .await
        .unwrap();

    assert_eq!(outcome, ItemOutcome::Unchanged { link: existing });
    assert!(w.cdn.uploads().is_empty());
    assert!(w.cdn.deletes().is_empty());
    assert_eq!(w.metadata.write_count(), 0);
}

#[tokio::test]
async fn changed_image_replaces_the_stale_copy() {
    let w = world();
    w.source.insert(SOURCE_LINK, sample_png(32, 24, 9).unwrap());
    let existing = w
        .cdn
        .seed("old-1", "p1.jpg", canonical_bytes(&sample_png(32, 24, 3).unwrap()));
    w.metadata.seed("p1", &existing);

    let outcome = w
        .reconciler
        .reconcile(&BatchItem::new("p1", SOURCE_LINK))
        .await
        .unwrap();

    let uploads = w.cdn.uploads();
    assert_eq!(uploads.len(), 1);
    assert_eq!(
        w.cdn
            .deletes()
            .iter()
            .map(|id| id.as_str().to_string())
            .collect::<Vec<_>>(),
        vec!["old-1".to_string()]
    );
    assert!(!w.cdn.contains("old-1"));
    assert_eq!(
        outcome,
        ItemOutcome::Replaced {
            previous: existing,
            link: uploads[0].link.clone(),
            stale_deleted: true,
        }
    );
    assert_eq!(w.metadata.link("p1"), Some(uploads[0].link.clone()));
}

#[tokio::test]
async fn resized_image_counts_as_changed() {
    let w = world();
    w.source.insert(SOURCE_LINK, sample_png(16, 16, 3).unwrap());
    let existing = w
        .cdn
        .seed("old-1", "p1.jpg", canonical_bytes(&sample_png(32, 16, 3).unwrap()));
    w.metadata.seed("p1", &existing);

    let outcome = w
        .reconciler
        .reconcile(&BatchItem::new("p1", SOURCE_LINK))
        .await
        .unwrap();

    assert_eq!(outcome.label(), "replaced");
    assert_eq!(w.cdn.uploads().len(), 1);
}

#[tokio::test]
async fn failed_stale_delete_still_replaces() {
    let w = world();
    w.source.insert(SOURCE_LINK, sample_png(16, 16, 9).unwrap());
    let existing = w
        .cdn
        .seed("old-1", "p1.jpg", canonical_bytes(&sample_png(16, 16, 3).unwrap()));
    w.metadata.seed("p1", &existing);
    w.cdn.set_fail_deletes(true);

    let outcome = w
        .reconciler
        .reconcile(&BatchItem::new("p1", SOURCE_LINK))
        .await
        .unwrap();

    match outcome {
        ItemOutcome::Replaced { stale_deleted, link, .. } => {
            assert!(!stale_deleted);
            assert_eq!(w.metadata.link("p1"), Some(link));
        }
        other => panic!("expected replacement, got {other:?}"),
    }
    assert!(w.cdn.contains("old-1"));
}

#[tokio::test]
async fn source_origin_canonical_link_is_migrated() {
    let w = world();
    w.source.insert(SOURCE_LINK, sample_png(16, 16, 1).unwrap());
    w.metadata.seed("p1", SOURCE_LINK);

    let outcome = w
        .reconciler
        .reconcile(&BatchItem::new("p1", SOURCE_LINK))
        .await
        .unwrap();

    let uploads = w.cdn.uploads();
    assert_eq!(uploads.len(), 1);
    assert_eq!(
        outcome,
        ItemOutcome::Migrated {
            previous: SOURCE_LINK.to_string(),
            link: uploads[0].link.clone(),
        }
    );
    assert!(w.cdn.deletes().is_empty());
    assert_eq!(w.metadata.link("p1"), Some(uploads[0].link.clone()));
}

#[tokio::test]
async fn absent_source_bytes_touch_nothing() {
    let w = world();
    let existing = w.cdn.seed("old-1", "p1.jpg", canonical_bytes(&sample_png(8, 8, 1).unwrap()));
    w.metadata.seed("p1", &existing);

    let outcome = w
        .reconciler
        .reconcile(&BatchItem::new("p1", SOURCE_LINK))
        .await
        .unwrap();

    assert_eq!(outcome, ItemOutcome::NoFreshImage);
    assert_eq!(w.source.fetch_calls(), 1);
    assert!(w.cdn.uploads().is_empty());
    assert!(w.cdn.deletes().is_empty());
    assert_eq!(w.metadata.write_count(), 0);
    assert_eq!(w.metadata.link("p1"), Some(existing));
}

#[tokio::test]
async fn unavailable_cdn_copy_is_not_reuploaded() {
    let w = world();
    w.source.insert(SOURCE_LINK, sample_png(16, 16, 1).unwrap());
    let existing = w.cdn.seed("old-1", "p1.jpg", canonical_bytes(&sample_png(16, 16, 2).unwrap()));
    w.cdn.make_unavailable("old-1");
    w.metadata.seed("p1", &existing);

    let outcome = w
        .reconciler
        .reconcile(&BatchItem::new("p1", SOURCE_LINK))
        .await
        .unwrap();

    assert_eq!(outcome, ItemOutcome::ExistingUnavailable { link: existing.clone() });
    assert!(w.cdn.uploads().is_empty());
    assert!(w.cdn.deletes().is_empty());
    assert_eq!(w.metadata.link("p1"), Some(existing));
}

#[tokio::test]
async fn corrupt_cdn_copy_fails_before_any_mutation() {
    let w = world();
    w.source.insert(SOURCE_LINK, sample_png(16, 16, 1).unwrap());
    let existing = w.cdn.seed("old-1", "p1.jpg", b"not an image".to_vec());
    w.metadata.seed("p1", &existing);

    let err = w
        .reconciler
        .reconcile(&BatchItem::new("p1", SOURCE_LINK))
        .await
        .unwrap_err();

    assert_eq!(err.stage, Stage::NormalizeExisting);
    assert!(w.cdn.uploads().is_empty());
    assert!(w.cdn.deletes().is_empty());
    assert_eq!(w.metadata.write_count(), 0);
}

#[tokio::test]
async fn cdn_link_without_object_id_is_unsupported() {
    let w = world();
    w.source.insert(SOURCE_LINK, sample_png(16, 16, 1).unwrap());
    w.metadata.seed("p1", "https://imagedelivery.net/");

    let outcome = w
        .reconciler
        .reconcile(&BatchItem::new("p1", SOURCE_LINK))
        .await
        .unwrap();

    assert_eq!(outcome.label(), "unsupported");
    assert!(w.cdn.uploads().is_empty());
}

#[tokio::test]
async fn upload_failure_never_writes_metadata() {
    let w = world();
    w.source.insert(SOURCE_LINK, sample_png(16, 16, 1).unwrap());
    w.cdn.set_fail_uploads(true);

    let err = w
        .reconciler
        .reconcile(&BatchItem::new("p1", SOURCE_LINK))
        .await
        .unwrap_err();

    assert_eq!(err.stage, Stage::Upload);
    assert_eq!(w.metadata.write_count(), 0);
    assert_eq!(w.metadata.link("p1"), None);
}

#[tokio::test]
async fn metadata_failures_are_attributed_to_their_stage() {
    let w = world();
    w.source.insert(SOURCE_LINK, sample_png(16, 16, 1).unwrap());

    w.metadata.set_fail_reads(true);
    let err = w
        .reconciler
        .reconcile(&BatchItem::new("p1", SOURCE_LINK))
        .await
        .unwrap_err();
    assert_eq!(err.stage, Stage::ReadCanonical);
    assert!(w.cdn.uploads().is_empty());

    w.metadata.set_fail_reads(false);
    w.metadata.set_fail_writes(true);
    let err = w
        .reconciler
        .reconcile(&BatchItem::new("p1", SOURCE_LINK))
        .await
        .unwrap_err();
    assert_eq!(err.stage, Stage::WriteCanonical);
    assert_eq!(w.cdn.uploads().len(), 1);
}

#[tokio::test]
async fn resolve_failure_is_reported_at_resolve_stage() {
    let w = world();
    w.source.fail_resolve(SOURCE_LINK);

    let err = w
        .reconciler
        .reconcile(&BatchItem::new("p1", SOURCE_LINK))
        .await
        .unwrap_err();

    assert_eq!(err.stage, Stage::ResolveHandle);
    assert_eq!(w.source.fetch_calls(), 0);
}

#[tokio::test]
async fn second_run_on_same_image_converges_to_unchanged() {
    let w = world();
    w.source.insert(SOURCE_LINK, sample_png(20, 20, 4).unwrap());
    let item = BatchItem::new("p1", SOURCE_LINK);

    let first = w.reconciler.reconcile(&item).await.unwrap();
    let second = w.reconciler.reconcile(&item).await.unwrap();

    assert_eq!(first.label(), "uploaded");
    assert_eq!(second.label(), "unchanged");
    assert_eq!(first.canonical_link(), second.canonical_link());
    assert_eq!(w.cdn.uploads().len(), 1);
}

#[test]
fn canonical_form_is_stable_under_renormalization() {
    let codec = ImageCodec::default();
    let once = codec.normalize(&sample_png(40, 30, 5).unwrap()).unwrap();
    let twice = codec.normalize(&once.to_bytes()).unwrap();
    assert_eq!(once.to_bytes(), twice.to_bytes());
    assert!(images_equal(&once, &twice));
}
