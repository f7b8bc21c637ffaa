//! Shared reqwest client construction.

use crate::config::HttpConfig;
use crate::error::SyncError;

/// Build a pooled client honouring the configured timeouts.
///
/// Compressed responses are accepted and transparently inflated.
pub fn build_client(cfg: &HttpConfig) -> Result<reqwest::Client, SyncError> {
    reqwest::Client::builder()
        .timeout(cfg.timeout())
        .connect_timeout(cfg.connect_timeout())
        .user_agent(cfg.user_agent.as_str())
        .gzip(true)
        .pool_max_idle_per_host(8)
        .build()
        .map_err(|e| SyncError::InvalidConfig(format!("failed to build HTTP client: {e}")))
}

/// Short, log-safe rendering of an error response body.
pub(crate) async fn error_body(response: reqwest::Response) -> String {
    const LIMIT: usize = 512;
    let mut body = response.text().await.unwrap_or_default();
    if body.len() > LIMIT {
        let mut cut = LIMIT;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
        body.push_str("...");
    }
    body
}
