use std::sync::Arc;
use std::time::Duration;

use imgsync::fake::{FakeCdnStore, FakeSourceStore, MemoryMetadataStore, sample_png};
use imgsync::{
    BatchConfig, BatchItem, BatchReport, BatchRunner, ImageCodec, LinkClassifier, Reconciler,
    Stores,
};

fn source_link(product_id: &str) -> String {
    format!("https://api.moysklad.ru/api/remap/1.2/entity/product/{product_id}/images")
}

struct Fixture {
    source: Arc<FakeSourceStore>,
    cdn: Arc<FakeCdnStore>,
    metadata: Arc<MemoryMetadataStore>,
    runner: Arc<BatchRunner>,
}

fn fixture(config: BatchConfig) -> Fixture {
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
    Fixture {
        source,
        cdn,
        metadata,
        runner: Arc::new(BatchRunner::new(Arc::new(reconciler), config)),
    }
}

#[tokio::test]
async fn one_failing_item_does_not_disturb_its_siblings() {
    let f = fixture(BatchConfig::default());
    let ids = ["p0", "p1", "p2", "p3", "p4"];
    for (seed, id) in ids.iter().enumerate() {
        f.source.insert(&source_link(id), sample_png(12, 12, seed as u8).unwrap());
    }
    // p2 serves bytes that are not an image.
    f.source.insert(&source_link("p2"), b"garbage".to_vec());

    let items = ids
        .iter()
        .map(|id| BatchItem::new(*id, source_link(id)))
        .collect();
    let report = f.runner.run(items).await;

    assert_eq!(
        report,
        BatchReport {
            total: 5,
            uploaded: 4,
            failed: 1,
            ..BatchReport::default()
        }
    );
    for id in ["p0", "p1", "p3", "p4"] {
        assert!(f.metadata.link(id).is_some(), "{id} should have a canonical link");
    }
    assert_eq!(f.metadata.link("p2"), None);
}

#[tokio::test]
async fn every_failure_stage_is_contained() {
    let f = fixture(BatchConfig::default());
    f.source.insert(&source_link("ok-before"), sample_png(8, 8, 1).unwrap());
    f.source.fail_resolve(&source_link("bad-resolve"));
    f.source.insert(&source_link("bad-existing"), sample_png(8, 8, 2).unwrap());
    let broken = f.cdn.seed("broken", "bad-existing.jpg", b"???".to_vec());
    f.metadata.seed("bad-existing", &broken);
    f.source.insert(&source_link("ok-after"), sample_png(8, 8, 3).unwrap());

    let report = f
        .runner
        .run(vec![
            BatchItem::new("ok-before", source_link("ok-before")),
            BatchItem::new("bad-resolve", source_link("bad-resolve")),
            BatchItem::new("no-image", source_link("no-image")),
            BatchItem::new("bad-existing", source_link("bad-existing")),
            BatchItem::new("foreign", "https://example.com/a.png"),
            BatchItem::new("ok-after", source_link("ok-after")),
        ])
        .await;

    assert_eq!(report.total, 6);
    assert_eq!(report.uploaded, 2);
    assert_eq!(report.failed, 2);
    assert_eq!(report.no_fresh_image, 2);
    assert!(f.metadata.link("ok-before").is_some());
    assert!(f.metadata.link("ok-after").is_some());
    assert_eq!(f.metadata.link("bad-existing"), Some(broken));
}

#[tokio::test]
async fn items_are_processed_in_order() {
    let f = fixture(BatchConfig::default());
    for (seed, id) in ["c", "a", "b"].iter().enumerate() {
        f.source.insert(&source_link(id), sample_png(8, 8, seed as u8).unwrap());
    }

    f.runner
        .run(vec![
            BatchItem::new("c", source_link("c")),
            BatchItem::new("a", source_link("a")),
            BatchItem::new("b", source_link("b")),
        ])
        .await;

    let order: Vec<String> = f.metadata.writes().into_iter().map(|(id, _)| id).collect();
    assert_eq!(order, vec!["c", "a", "b"]);
}

#[tokio::test]
async fn spawned_batch_runs_after_handle_is_dropped() {
    let f = fixture(BatchConfig::default());
    f.source.insert(&source_link("p1"), sample_png(8, 8, 1).unwrap());

    drop(f.runner.spawn(vec![BatchItem::new("p1", source_link("p1"))]));

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while f.metadata.link("p1").is_none() {
        assert!(tokio::time::Instant::now() < deadline, "batch never finished");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(f.cdn.uploads().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn serialized_concurrent_batches_converge() {
    let f = fixture(BatchConfig {
        serialize_products: true,
    });
    f.source.insert(&source_link("p1"), sample_png(8, 8, 1).unwrap());
    let batch = vec![BatchItem::new("p1", source_link("p1"))];

    let first = f.runner.spawn(batch.clone());
    let second = f.runner.spawn(batch);
    let (first, second) = (first.await.unwrap(), second.await.unwrap());

    // The second batch sees the first one's write and finds the copy current.
    assert_eq!(first.uploaded + second.uploaded, 1);
    assert_eq!(first.unchanged + second.unchanged, 1);
    assert_eq!(f.cdn.uploads().len(), 1);
    assert!(f.runner.locks().is_empty(), "per-product locks outlived their batches");
}

#[tokio::test]
async fn serialized_batch_leaves_no_locks_behind() {
    let f = fixture(BatchConfig {
        serialize_products: true,
    });
    let batch: Vec<BatchItem> = (0..20)
        .map(|i| {
            let id = format!("p{i}");
            f.source.insert(&source_link(&id), sample_png(4, 4, i).unwrap());
            BatchItem::new(id.clone(), source_link(&id))
        })
        .collect();

    let report = f.runner.run(batch).await;

    assert_eq!(report.uploaded, 20);
    assert!(f.runner.locks().is_empty());
}
