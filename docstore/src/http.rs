use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::IntoResponse,
    routing::get,
    Router,
};
use backend_api::{BackendError, ObjectStorage};
use tracing::{info, warn};

#[derive(Clone)]
pub struct MediaState {
    storage: Arc<dyn ObjectStorage>,
}

/// Read-only HTTP surface over the object store so stored URLs resolve.
pub fn media_router(storage: Arc<dyn ObjectStorage>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/objects/:id", get(download_object))
        .with_state(MediaState { storage })
}

async fn health() -> &'static str {
    "ok"
}

async fn download_object(
    State(state): State<MediaState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, StatusCode> {
    let storage = state.storage.clone();
    let found = tokio::task::spawn_blocking(move || storage.get(&id))
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    let (object, data) = match found {
        Ok(Some(found)) => found,
        Ok(None) => return Err(StatusCode::NOT_FOUND),
        Err(BackendError::InvalidArgument(_)) => return Err(StatusCode::BAD_REQUEST),
        Err(e) => {
            warn!(error = %e, "object read failed");
            return Err(StatusCode::INTERNAL_SERVER_ERROR);
        }
    };
    let mut headers = HeaderMap::new();
    let content_type = HeaderValue::from_str(&object.content_type)
        .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream"));
    headers.insert(header::CONTENT_TYPE, content_type);
    // ids are content hashes, so a given URL never changes
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("public, max-age=31536000, immutable"),
    );
    Ok((headers, data))
}

/// Serve media until the task is cancelled.
pub async fn serve_media(bind: SocketAddr, storage: Arc<dyn ObjectStorage>) -> Result<()> {
    info!(%bind, "media server listening");
    axum::Server::bind(&bind)
        .serve(media_router(storage).into_make_service())
        .await?;
    Ok(())
}
