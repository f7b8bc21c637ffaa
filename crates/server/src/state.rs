use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use imgsync::{BatchRunner, CdnStore, MetadataStore, Reconciler, build_reconciler};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use subtle::ConstantTimeEq;

/// Shared application state
#[derive(Clone)]
pub struct ServerState {
    /// Server configuration
    pub config: Arc<ServerConfig>,

    /// Background batch runner (shared across requests)
    pub runner: Arc<BatchRunner>,

    /// Metadata store, for the bulk link listing
    pub metadata: Arc<dyn MetadataStore>,

    /// CDN store, for filename lookups
    pub cdn: Arc<dyn CdnStore>,

    /// Prometheus render handle; `None` when metrics are disabled
    pub metrics: Option<PrometheusHandle>,
}

impl ServerState {
    /// Create new server state backed by the HTTP store clients
    pub fn new(config: ServerConfig, metrics: Option<PrometheusHandle>) -> ServerResult<Self> {
        let reconciler =
            build_reconciler(&config.sync).map_err(|e| ServerError::Config(e.to_string()))?;
        Ok(Self::with_reconciler(config, reconciler, metrics))
    }

    /// Create server state around an already wired reconciler
    pub fn with_reconciler(
        config: ServerConfig,
        reconciler: Reconciler,
        metrics: Option<PrometheusHandle>,
    ) -> Self {
        let stores = reconciler.stores().clone();
        let runner = Arc::new(BatchRunner::new(Arc::new(reconciler), config.sync.batch));
        Self {
            config: Arc::new(config),
            runner,
            metadata: stores.metadata,
            cdn: stores.cdn,
            metrics,
        }
    }

    /// Check a presented `Authorization` value against the configured token.
    ///
    /// Exact byte equality, compared in constant time.
    pub fn is_authorized(&self, presented: &str) -> bool {
        let expected = self.config.api_token.as_bytes();
        !expected.is_empty() && bool::from(presented.as_bytes().ct_eq(expected))
    }
}
