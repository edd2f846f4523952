//! Shared application state.

use std::sync::Arc;

use roadpack::{BlobStore, MetadataIndex, MetricsRegistry, VerifyConfig};

/// Shared state held by the request handlers.
///
/// This is wrapped in an [`Arc`] and passed to request handlers via Axum's
/// `State` extractor.
pub struct AppState {
    /// Content-addressed archive storage.
    pub blobs: Arc<dyn BlobStore>,
    /// Channel index of published packs.
    pub index: Arc<dyn MetadataIndex>,
    /// Metrics registry shared with the `/metrics` exporter.
    pub metrics: Arc<MetricsRegistry>,
    /// Limits for server-side verification.
    pub verify: VerifyConfig,
    pub upload_token: Option<String>,
}

/// Thread-safe alias for `AppState`.
pub type SharedState = Arc<AppState>;
