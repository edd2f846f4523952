use axum::{
    Json,
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
};

use roadpack::ContentId;
use roadpack::http_client::UploadResponse;

use super::{ApiError, blocking, require_token};
use crate::state::SharedState;

/// `POST /upload`
///
/// Stores the raw request body and returns its content id. Uploading the
/// same bytes twice yields the same id.
pub async fn upload(
    State(state): State<SharedState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<UploadResponse>), ApiError> {
    require_token(&state, &headers)?;
    if body.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "empty upload".to_string()));
    }

    let blobs = state.blobs.clone();
    let size = body.len();
    let cid = blocking(move || blobs.put(&body)).await?;
    tracing::info!(cid = %cid, bytes = size, "stored blob");

    Ok((StatusCode::CREATED, Json(UploadResponse { cid })))
}

/// `GET /ipfs/{cid}`
pub async fn download(
    State(state): State<SharedState>,
    Path(cid): Path<String>,
) -> Result<Response, ApiError> {
    let blobs = state.blobs.clone();
    let id = ContentId::from(cid);
    let lookup = id.clone();
    match blocking(move || blobs.get(&lookup)).await? {
        Some(bytes) => Ok((
            [(header::CONTENT_TYPE, "application/octet-stream")],
            bytes,
        )
            .into_response()),
        None => Err((StatusCode::NOT_FOUND, format!("unknown content id {id}"))),
    }
}
