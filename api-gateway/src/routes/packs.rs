use axum::{
    Json,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
};
use serde::{Deserialize, Serialize};

use roadpack::storage::DEFAULT_LIST_LIMIT;
use roadpack::{
    ArchiveHash, CachedKeyVerifier, ContentId, DefaultPackVerifier, InMemoryDedupLedger,
    IndexEntry, PackError, PackVerification,
};

use super::{ApiError, blocking, require_token};
use crate::state::SharedState;

/// Query string for `GET /packs`.
#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub channel: Option<String>,
    pub limit: Option<usize>,
}

/// `POST /packs`
///
/// Publishes an index entry. Re-publishing a `packId` replaces the entry.
pub async fn publish(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Json(entry): Json<IndexEntry>,
) -> Result<StatusCode, ApiError> {
    require_token(&state, &headers)?;
    if entry.channel.trim().is_empty() {
        return Err((StatusCode::BAD_REQUEST, "channel must not be empty".to_string()));
    }

    let index = state.index.clone();
    let pack_id = entry.pack_id.clone();
    let channel = entry.channel.clone();
    blocking(move || index.publish(entry)).await?;
    tracing::info!(pack_id = %pack_id, channel = %channel, "published index entry");

    Ok(StatusCode::CREATED)
}

/// `GET /packs?channel=&limit=`
///
/// Newest first.
pub async fn list(
    State(state): State<SharedState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<IndexEntry>>, ApiError> {
    let index = state.index.clone();
    let limit = query.limit.unwrap_or(DEFAULT_LIST_LIMIT);
    let entries = blocking(move || index.list(query.channel.as_deref(), limit)).await?;
    Ok(Json(entries))
}

/// Query string for `POST /packs/{cid}/verify`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyQuery {
    pub expected_hash: Option<String>,
}

/// Per-report result returned by the verify endpoint.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportResult {
    pub id: String,
    pub sig_ok: bool,
    pub img_ok: bool,
    pub duplicate: bool,
    pub accepted: bool,
    pub reasons: Vec<String>,
}

/// Response body of `POST /packs/{cid}/verify`.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyResponse {
    pub archive_hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archive_hash_matches: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pack_sig_ok: Option<bool>,
    pub channel: String,
    pub uploader_id: String,
    pub total: usize,
    pub accepted: usize,
    pub duplicates: usize,
    pub reports: Vec<ReportResult>,
}

impl From<&PackVerification> for VerifyResponse {
    fn from(v: &PackVerification) -> Self {
        let summary = v.summary();
        Self {
            archive_hash: v.archive_hash.to_string(),
            archive_hash_matches: v.archive_hash_matches,
            pack_sig_ok: v.pack_sig_ok,
            channel: v.manifest.channel.clone(),
            uploader_id: v.manifest.uploader_id.to_string(),
            total: summary.total,
            accepted: summary.accepted,
            duplicates: summary.duplicates,
            reports: v
                .verdicts
                .iter()
                .map(|verdict| ReportResult {
                    id: verdict.label(),
                    sig_ok: verdict.sig_ok,
                    img_ok: verdict.img_ok,
                    duplicate: verdict.duplicate,
                    accepted: verdict.accepted(),
                    reasons: verdict.reasons.iter().map(ToString::to_string).collect(),
                })
                .collect(),
        }
    }
}

/// `POST /packs/{cid}/verify`
///
/// Verifies a stored archive on behalf of a client. Each call uses a fresh
/// dedup ledger, so duplicates are only detected within the pack itself.
pub async fn verify(
    State(state): State<SharedState>,
    Path(cid): Path<String>,
    Query(query): Query<VerifyQuery>,
) -> Result<Json<VerifyResponse>, ApiError> {
    let blobs = state.blobs.clone();
    let id = ContentId::from(cid);
    let lookup = id.clone();
    let Some(archive) = blocking(move || blobs.get(&lookup)).await? else {
        return Err((StatusCode::NOT_FOUND, format!("unknown content id {id}")));
    };

    let limits = state.verify.clone();
    let metrics = state.metrics.pack.clone();
    let expected = query.expected_hash.map(ArchiveHash::from);
    let outcome = tokio::task::spawn_blocking(move || {
        DefaultPackVerifier::new(CachedKeyVerifier::new())
            .with_limits(limits)
            .with_metrics(metrics)
            .verify(&archive, expected.as_ref(), &InMemoryDedupLedger::new())
    })
    .await
    .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("verification task failed: {e}")))?;

    match outcome {
        Ok(verification) => Ok(Json(VerifyResponse::from(&verification))),
        Err(PackError::Storage(e)) => Err((StatusCode::INTERNAL_SERVER_ERROR, e.to_string())),
        Err(e) => Err((StatusCode::UNPROCESSABLE_ENTITY, e.to_string())),
    }
}
