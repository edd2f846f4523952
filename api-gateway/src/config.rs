//! API gateway configuration.
//!
//! The gateway reuses the library's `RoadpackConfig` for storage, metrics
//! and verification limits; this module only adds what is specific to the
//! HTTP server.

use std::net::SocketAddr;

use roadpack::config::ENV_BLOB_TOKEN;
use tracing::warn;

pub const ENV_API_ADDR: &str = "ROADPACK_API_ADDR";
pub const ENV_BACKEND: &str = "ROADPACK_GATEWAY_BACKEND";

/// Where the gateway keeps blobs and index entries.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Backend {
    /// Lost on restart.
    Memory,
    RocksDb,
}

/// Configuration for the API gateway HTTP server.
#[derive(Clone, Debug)]
pub struct ApiConfig {
    /// Address to bind the HTTP server to.
    pub listen_addr: SocketAddr,
    pub backend: Backend,
    /// When set, `POST /upload` and `POST /packs` require
    /// `Authorization: Bearer <token>`.
    pub upload_token: Option<String>,
    /// Largest request body accepted by `POST /upload`.
    pub max_upload_bytes: usize,
}

impl Default for ApiConfig {
    fn default() -> Self {
        // Bind to all interfaces so the container port mapping (8081→8081) is reachable
        // from the host when running under docker-compose.
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 8081)),
            backend: Backend::RocksDb,
            upload_token: None,
            max_upload_bytes: 64 * 1024 * 1024,
        }
    }
}

impl ApiConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut cfg = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(addr) = get(ENV_API_ADDR) {
            match addr.parse() {
                Ok(addr) => cfg.listen_addr = addr,
                Err(e) => warn!(value = %addr, error = %e, "ignoring invalid {ENV_API_ADDR}"),
            }
        }
        match get(ENV_BACKEND).as_deref().map(str::to_ascii_lowercase).as_deref() {
            None | Some("rocksdb") => {}
            Some("memory") => cfg.backend = Backend::Memory,
            Some(other) => warn!(value = %other, "ignoring unknown {ENV_BACKEND}"),
        }
        cfg.upload_token = get(ENV_BLOB_TOKEN);
        cfg
    }
}
