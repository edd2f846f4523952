//! Top-level configuration.
//!
//! This module aggregates configuration for:
//!
//! - storage (RocksDB path and creation flags),
//! - the HTTP client for the blob store and metadata index,
//! - the metrics exporter (enable flag + listen address),
//! - pack building defaults,
//! - verification limits.
//!
//! Every section has a `Default`; [`RoadpackConfig::from_env`] applies the
//! `ROADPACK_*` environment overrides on top.

use std::net::SocketAddr;
use std::time::Duration;

use tracing::warn;

use crate::storage::RocksDbConfig;

pub const ENV_DB_PATH: &str = "ROADPACK_DB_PATH";
pub const ENV_BLOB_URL: &str = "ROADPACK_BLOB_URL";
pub const ENV_BLOB_TOKEN: &str = "ROADPACK_BLOB_TOKEN";
pub const ENV_CHANNEL: &str = "ROADPACK_CHANNEL";
pub const ENV_METRICS_ADDR: &str = "ROADPACK_METRICS_ADDR";

/// Configuration for the HTTP blob store / metadata index client.
#[derive(Clone, Debug)]
pub struct BlobClientConfig {
    /// Base URL of the gateway, e.g. `"http://127.0.0.1:8081"`.
    pub base_url: String,
    /// Request timeout.
    pub timeout: Duration,
    /// Bearer token sent with uploads, if the gateway requires one.
    pub upload_token: Option<String>,
}

impl Default for BlobClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8081".to_string(),
            timeout: Duration::from_secs(10),
            upload_token: None,
        }
    }
}

/// Configuration for the Prometheus metrics exporter.
#[derive(Clone, Debug)]
pub struct MetricsConfig {
    /// Whether to run a `/metrics` HTTP exporter.
    pub enabled: bool,
    /// Address to bind the metrics HTTP server to.
    pub listen_addr: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 9898)),
        }
    }
}

/// Defaults applied when building packs and reports.
#[derive(Clone, Debug)]
pub struct PackConfig {
    pub default_channel: String,
    /// MIME type recorded for captured photos.
    pub img_mime: String,
}

impl Default for PackConfig {
    fn default() -> Self {
        Self {
            default_channel: "global".to_string(),
            img_mime: "image/jpeg".to_string(),
        }
    }
}

/// Bounds on a single verification run.
#[derive(Clone, Debug)]
pub struct VerifyConfig {
    /// Archives larger than this are refused before decoding.
    pub max_archive_bytes: usize,
    /// Manifests listing more reports than this are refused.
    pub max_reports: usize,
}

impl Default for VerifyConfig {
    fn default() -> Self {
        Self {
            max_archive_bytes: 64 * 1024 * 1024,
            max_reports: 10_000,
        }
    }
}

/// Top-level configuration.
#[derive(Clone, Debug, Default)]
pub struct RoadpackConfig {
    pub storage: RocksDbConfig,
    pub blob_client: BlobClientConfig,
    pub metrics: MetricsConfig,
    pub pack: PackConfig,
    pub verify: VerifyConfig,
}

impl RoadpackConfig {
    /// Defaults with `ROADPACK_*` environment overrides applied.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`RoadpackConfig::from_env`] but reading variables through
    /// `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut cfg = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(path) = get(ENV_DB_PATH) {
            cfg.storage.path = path;
        }
        if let Some(url) = get(ENV_BLOB_URL) {
            cfg.blob_client.base_url = url;
        }
        if let Some(token) = get(ENV_BLOB_TOKEN) {
            cfg.blob_client.upload_token = Some(token);
        }
        if let Some(channel) = get(ENV_CHANNEL) {
            cfg.pack.default_channel = channel;
        }
        if let Some(addr) = get(ENV_METRICS_ADDR) {
            match addr.parse() {
                Ok(addr) => cfg.metrics.listen_addr = addr,
                Err(e) => warn!(value = %addr, error = %e, "ignoring invalid {ENV_METRICS_ADDR}"),
            }
        }
        cfg
    }
}
