//! imgsync server - HTTP trigger for catalog image reconciliation
//!
//! Accepts batches of `{product_id, image_link}` pairs, answers immediately
//! and reconciles each batch in the background against the source system,
//! the image CDN and the metadata store.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use server::ServerConfig;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ServerConfig::load()?;
//!     server::start_server(config).await?;
//!     Ok(())
//! }
//! ```
//!
//! # API Endpoints
//!
//! ## Public Endpoints (No Authentication)
//!
//! - `GET /health` - Liveness probe
//! - `GET /metrics` - Prometheus metrics
//!
//! ## Protected Endpoints (`Authorization: <token>`)
//!
//! - `POST /product-images` - Submit a batch; `204` once accepted
//! - `GET /product-images` - Canonical link of every product
//! - `GET /cdn/images?filename=` - Look up a CDN object by filename

pub mod config;
pub mod error;
pub mod middleware;
pub mod routes;
pub mod server;
pub mod state;

pub use config::ServerConfig;
pub use error::{ServerError, ServerResult};
pub use server::{build_router, start_server};
pub use state::ServerState;
