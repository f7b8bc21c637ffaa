use crate::error::{ServerError, ServerResult};
use crate::state::ServerState;
use axum::Json;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use imgsync::{BatchItem, check_product_id, dedupe_batch};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

/// Accept a batch of `{product_id, image_link}` pairs for background
/// reconciliation.
///
/// Responds `204 No Content` as soon as the batch is handed to the runner;
/// processing continues after the response and its outcome is visible only
/// in logs and metrics.
pub async fn submit_product_images(
    State(state): State<Arc<ServerState>>,
    payload: Result<Json<Vec<BatchItem>>, JsonRejection>,
) -> ServerResult<impl IntoResponse> {
    let Json(items) = payload?;
    for (position, item) in items.iter().enumerate() {
        check_product_id(&item.product_id)
            .map_err(|e| ServerError::BadRequest(format!("item {position}: {e}")))?;
    }

    let received = items.len();
    let batch = dedupe_batch(items);
    tracing::info!(received, unique = batch.len(), "batch accepted");

    if !batch.is_empty() {
        // Detached: the batch outlives this request.
        drop(state.runner.spawn(batch));
    }

    Ok(StatusCode::NO_CONTENT)
}

/// Every product's canonical image link
pub async fn list_product_images(
    State(state): State<Arc<ServerState>>,
) -> ServerResult<impl IntoResponse> {
    let links = state.metadata.get_all_links().await?;
    Ok(Json(json!({
        "count": links.len(),
        "links": links,
    })))
}

#[derive(Debug, Deserialize)]
pub struct FilenameQuery {
    pub filename: String,
}

#[derive(Debug, Serialize)]
pub struct CdnImageResponse {
    pub filename: String,
    pub link: String,
}

/// Look up a CDN object by its upload filename
pub async fn find_cdn_image(
    State(state): State<Arc<ServerState>>,
    query: Result<Query<FilenameQuery>, QueryRejection>,
) -> ServerResult<impl IntoResponse> {
    let Query(query) = query?;
    if query.filename.trim().is_empty() {
        return Err(ServerError::BadRequest("filename must not be empty".into()));
    }

    let link = state
        .cdn
        .find_by_filename(&query.filename)
        .await?
        .ok_or_else(|| ServerError::NotFound(format!("no CDN image named {}", query.filename)))?;

    Ok(Json(CdnImageResponse {
        filename: query.filename,
        link,
    }))
}
