//! Batch intake and the fire-and-forget runner.
//!
//! A batch is processed by one logical worker, strictly in order, yielding to
//! the scheduler between items. Independent batches run as independent tokio
//! tasks; nothing orders or excludes them unless
//! [`BatchConfig::serialize_products`] is set.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{Instrument, error, info, info_span};

use crate::config::BatchConfig;
use crate::reconcile::{ItemOutcome, Reconciler};

/// One candidate image for one product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchItem {
    pub product_id: String,
    pub image_link: String,
}

impl BatchItem {
    pub fn new(product_id: impl Into<String>, image_link: impl Into<String>) -> Self {
        Self {
            product_id: product_id.into(),
            image_link: image_link.into(),
        }
    }
}

/// Collapse repeated product ids.
///
/// Each product keeps the position of its first occurrence and the link of
/// its last one.
pub fn dedupe_batch(items: Vec<BatchItem>) -> Vec<BatchItem> {
    let mut slots: HashMap<String, usize> = HashMap::with_capacity(items.len());
    let mut out: Vec<BatchItem> = Vec::with_capacity(items.len());
    for item in items {
        match slots.get(&item.product_id) {
            Some(&slot) => out[slot].image_link = item.image_link,
            None => {
                slots.insert(item.product_id.clone(), out.len());
                out.push(item);
            }
        }
    }
    out
}

/// Per-batch tally, produced once the worker drains its items.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub total: usize,
    pub no_fresh_image: usize,
    pub uploaded: usize,
    pub migrated: usize,
    pub replaced: usize,
    pub unchanged: usize,
    /// Left untouched: unsupported link formats or an unavailable CDN copy.
    pub skipped: usize,
    pub failed: usize,
}

impl BatchReport {
    fn record(&mut self, outcome: &ItemOutcome) {
        match outcome {
            ItemOutcome::NoFreshImage => self.no_fresh_image += 1,
            ItemOutcome::Uploaded { .. } => self.uploaded += 1,
            ItemOutcome::Migrated { .. } => self.migrated += 1,
            ItemOutcome::Replaced { .. } => self.replaced += 1,
            ItemOutcome::Unchanged { .. } => self.unchanged += 1,
            ItemOutcome::ExistingUnavailable { .. } | ItemOutcome::Unsupported { .. } => {
                self.skipped += 1
            }
        }
    }

    /// Items that ended with a new canonical link.
    pub fn written(&self) -> usize {
        self.uploaded + self.migrated + self.replaced
    }
}

/// Per-product async mutexes, created on first use.
#[derive(Debug, Default)]
pub struct ProductLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl ProductLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// The lock guarding `product_id`.
    pub fn lock_for(&self, product_id: &str) -> Arc<Mutex<()>> {
        if let Some(lock) = self.locks.get(product_id) {
            return lock.clone();
        }
        self.locks
            .entry(product_id.to_string())
            .or_default()
            .clone()
    }

    /// Drop `lock` and forget the product once nobody else holds its mutex.
    pub fn release(&self, product_id: &str, lock: Arc<Mutex<()>>) {
        drop(lock);
        self.locks
            .remove_if(product_id, |_, lock| Arc::strong_count(lock) == 1);
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

/// Drives batches through a shared [`Reconciler`].
pub struct BatchRunner {
    reconciler: Arc<Reconciler>,
    config: BatchConfig,
    locks: ProductLocks,
}

impl BatchRunner {
    pub fn new(reconciler: Arc<Reconciler>, config: BatchConfig) -> Self {
        Self {
            reconciler,
            config,
            locks: ProductLocks::new(),
        }
    }

    pub fn reconciler(&self) -> &Arc<Reconciler> {
        &self.reconciler
    }

    pub fn locks(&self) -> &ProductLocks {
        &self.locks
    }

    /// Process `items` in order. Item failures are logged and counted; the
    /// batch always runs to the end.
    pub async fn run(&self, items: Vec<BatchItem>) -> BatchReport {
        let mut report = BatchReport {
            total: items.len(),
            ..BatchReport::default()
        };
        info!(items = report.total, "batch started");

        for item in &items {
            tokio::task::yield_now().await;

            let span = info_span!(
                "reconcile",
                product_id = %item.product_id,
                link = %item.image_link
            );
            let result = async {
                if self.config.serialize_products {
                    let lock = self.locks.lock_for(&item.product_id);
                    let result = {
                        let _guard = lock.lock().await;
                        self.reconciler.reconcile(item).await
                    };
                    self.locks.release(&item.product_id, lock);
                    result
                } else {
                    self.reconciler.reconcile(item).await
                }
            }
            .instrument(span)
            .await;

            match result {
                Ok(outcome) => {
                    info!(
                        product_id = %item.product_id,
                        outcome = outcome.label(),
                        "item reconciled"
                    );
                    record_outcome(outcome.label());
                    report.record(&outcome);
                }
                Err(err) => {
                    error!(
                        product_id = %item.product_id,
                        link = %item.image_link,
                        stage = %err.stage,
                        error = %err.source,
                        "item failed"
                    );
                    record_outcome("failed");
                    report.failed += 1;
                }
            }
        }

        #[cfg(feature = "metrics")]
        metrics::counter!("imgsync_batches_total").increment(1);
        info!(
            total = report.total,
            written = report.written(),
            unchanged = report.unchanged,
            skipped = report.skipped,
            failed = report.failed,
            "batch finished"
        );
        report
    }

    /// Start `items` on the runtime and return at once. The handle may be
    /// dropped; the batch keeps running.
    pub fn spawn(self: &Arc<Self>, items: Vec<BatchItem>) -> JoinHandle<BatchReport> {
        let runner = Arc::clone(self);
        tokio::spawn(async move { runner.run(items).await })
    }
}

#[cfg(feature = "metrics")]
fn record_outcome(outcome: &'static str) {
    metrics::counter!("imgsync_items_total", "outcome" => outcome).increment(1);
}

#[cfg(not(feature = "metrics"))]
fn record_outcome(_outcome: &'static str) {}
