//! HTTP routes.
//!
//! - `GET  /health`
//! - `POST /upload`, `GET /ipfs/{cid}`: content-addressed blob store
//! - `POST /packs`, `GET /packs`: channel index
//! - `POST /packs/{cid}/verify`: server-side verification of a stored pack

pub mod blobs;
pub mod health;
pub mod packs;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    http::{HeaderMap, StatusCode, header},
    routing::{get, post},
};

use roadpack::StorageError;

use crate::state::SharedState;

/// Error half of every handler's result.
pub type ApiError = (StatusCode, String);

/// Builds the gateway router.
pub fn router(state: SharedState, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .route(
            "/upload",
            post(blobs::upload).layer(DefaultBodyLimit::max(max_upload_bytes)),
        )
        .route("/ipfs/{cid}", get(blobs::download))
        .route("/packs", post(packs::publish).get(packs::list))
        .route("/packs/{cid}/verify", post(packs::verify))
        .with_state(state)
}

/// Rejects the request unless it carries the configured bearer token.
fn require_token(state: &SharedState, headers: &HeaderMap) -> Result<(), ApiError> {
    let Some(expected) = &state.upload_token else {
        return Ok(());
    };
    let presented = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    if presented == Some(expected.as_str()) {
        Ok(())
    } else {
        Err((StatusCode::UNAUTHORIZED, "missing or invalid token".to_string()))
    }
}

/// Runs a storage call off the async executor.
async fn blocking<T, F>(f: F) -> Result<T, ApiError>
where
    F: FnOnce() -> Result<T, StorageError> + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => {
            tracing::error!(error = %e, "storage error");
            Err((StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
        }
        Err(e) => Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("storage task failed: {e}"),
        )),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::Request;
    use chrono::{TimeZone, Utc};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use roadpack::{
        BlobStore, Identity, InMemoryStore, IndexEntry, LocalReport, MetricsRegistry, Observation,
        PackBuilder, PackId, Report, ReportAssembler, Severity, VerifyConfig,
    };

    use super::packs::VerifyResponse;
    use super::*;
    use crate::state::AppState;

    fn state(token: Option<&str>) -> SharedState {
        let store = Arc::new(InMemoryStore::new());
        Arc::new(AppState {
            blobs: store.clone(),
            index: store,
            metrics: Arc::new(MetricsRegistry::new().unwrap()),
            verify: VerifyConfig::default(),
            upload_token: token.map(str::to_string),
        })
    }

    fn app(state: &SharedState) -> Router {
        router(state.clone(), 1024 * 1024)
    }

    async fn body_bytes(resp: axum::response::Response) -> Vec<u8> {
        resp.into_body().collect().await.unwrap().to_bytes().to_vec()
    }

    fn pack_archive() -> (Vec<u8>, IndexEntry) {
        let identity = Identity::generate();
        let assembler = ReportAssembler::default();
        let locals: Vec<LocalReport> = (0..2)
            .map(|i| {
                let obs = Observation {
                    lat: 12.9 + i as f64,
                    lng: 77.6,
                    severity: Severity::moderate(),
                    score: 80.0,
                    area_px: 3200.0,
                    depth_cm: None,
                };
                // Distinct capture times keep the two reports' dedup keys apart.
                let at = Utc
                    .timestamp_millis_opt(1_700_000_000_000 + i as i64 * 1_000)
                    .unwrap();
                assembler
                    .assemble_at(&identity, &obs, format!("photo-{i}").as_bytes(), at)
                    .unwrap()
            })
            .collect();
        let reports: Vec<Report> = locals.iter().map(LocalReport::sanitized).collect();
        let built = PackBuilder::new("bengaluru", identity.anon_id().clone())
            .created_at(1_700_000_000_000)
            .build(&reports, locals.as_slice())
            .unwrap();
        let entry = built.index_entry(
            PackId::generate(built.manifest.created_at),
            roadpack::ContentId::of(&built.archive),
        );
        (built.archive, entry)
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let state = state(None);
        let resp = app(&state)
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body: serde_json::Value = serde_json::from_slice(&body_bytes(resp).await).unwrap();
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn upload_then_download_roundtrip() {
        let state = state(None);
        let resp = app(&state)
            .oneshot(
                Request::post("/upload")
                    .body(Body::from(&b"archive bytes"[..]))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);
        let body: serde_json::Value = serde_json::from_slice(&body_bytes(resp).await).unwrap();
        let cid = body["cid"].as_str().unwrap().to_string();
        assert_eq!(cid, roadpack::ContentId::of(b"archive bytes").to_string());

        let resp = app(&state)
            .oneshot(
                Request::get(format!("/ipfs/{cid}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_bytes(resp).await, b"archive bytes");
    }

    #[tokio::test]
    async fn unknown_blob_is_404_and_empty_upload_is_400() {
        let state = state(None);
        let resp = app(&state)
            .oneshot(Request::get("/ipfs/nothing").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let resp = app(&state)
            .oneshot(Request::post("/upload").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn uploads_require_the_configured_token() {
        let state = state(Some("s3cret"));
        let resp = app(&state)
            .oneshot(Request::post("/upload").body(Body::from("x")).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        let resp = app(&state)
            .oneshot(
                Request::post("/upload")
                    .header(header::AUTHORIZATION, "Bearer s3cret")
                    .body(Body::from("x"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);
    }

    #[tokio::test]
    async fn publish_list_and_verify_a_pack() {
        let state = state(None);
        let (archive, entry) = pack_archive();

        let resp = app(&state)
            .oneshot(Request::post("/upload").body(Body::from(archive)).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);

        let resp = app(&state)
            .oneshot(
                Request::post("/packs")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(serde_json::to_vec(&entry).unwrap()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);

        let resp = app(&state)
            .oneshot(
                Request::get("/packs?channel=bengaluru&limit=5")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let listed: Vec<IndexEntry> = serde_json::from_slice(&body_bytes(resp).await).unwrap();
        assert_eq!(listed, vec![entry.clone()]);

        let uri = format!(
            "/packs/{}/verify?expectedHash={}",
            entry.content_id, entry.archive_hash
        );
        let resp = app(&state)
            .oneshot(Request::post(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let verdict: VerifyResponse = serde_json::from_slice(&body_bytes(resp).await).unwrap();
        assert_eq!(verdict.total, 2);
        assert_eq!(verdict.accepted, 2);
        assert_eq!(verdict.archive_hash_matches, Some(true));
        assert_eq!(verdict.channel, "bengaluru");
        assert!(verdict.reports.iter().all(|r| r.sig_ok && r.img_ok));
    }

    #[tokio::test]
    async fn unreadable_report_entry_is_rejected_alone() {
        let state = state(None);
        let (archive, _) = pack_archive();

        let decoded = roadpack::pack::PackArchive::decode(&archive).unwrap();
        let mut broken = roadpack::pack::PackArchive::new();
        for entry in decoded.entries() {
            let mut bytes = entry.bytes.clone();
            if entry.path == roadpack::pack::MANIFEST_PATH {
                let mut manifest: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
                manifest["reports"][1]["sig"] = serde_json::Value::Null;
                bytes = serde_json::to_vec(&manifest).unwrap();
            }
            broken.push(entry.path.clone(), bytes).unwrap();
        }
        let cid = state.blobs.put(&broken.encode().unwrap()).unwrap();

        let resp = app(&state)
            .oneshot(
                Request::post(format!("/packs/{cid}/verify"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let verdict: VerifyResponse = serde_json::from_slice(&body_bytes(resp).await).unwrap();
        assert_eq!(verdict.total, 2);
        assert_eq!(verdict.accepted, 1);
        assert_eq!(verdict.reports[1].id, "#1");
        assert!(!verdict.reports[1].accepted);
        assert!(verdict.reports[1].reasons[0].starts_with("malformed report"));
    }

    #[tokio::test]
    async fn verifying_garbage_is_unprocessable() {
        let state = state(None);
        let cid = state.blobs.put(b"not an archive").unwrap();
        let resp = app(&state)
            .oneshot(
                Request::post(format!("/packs/{cid}/verify"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }
}
