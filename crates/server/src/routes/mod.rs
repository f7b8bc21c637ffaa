//! API route handlers
//!
//! - `health`: liveness and Prometheus metrics
//! - `images`: batch intake, canonical link listing, CDN lookup

pub mod health;
pub mod images;

use crate::error::ServerError;

/// 404 Not Found handler
pub async fn not_found() -> ServerError {
    ServerError::NotFound("no such route".to_string())
}
