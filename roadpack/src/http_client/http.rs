//! HTTP clients for the gateway.
//!
//! Blob store:
//!
//! ```text
//! POST /upload            raw body, optional `Authorization: Bearer <token>`
//!   -> { "cid": "<content id>" }
//! GET  /ipfs/{cid}        -> raw bytes, 404 if unknown
//! ```
//!
//! Metadata index:
//!
//! ```text
//! POST /packs             IndexEntry as JSON
//! GET  /packs?channel=&limit=
//!   -> [IndexEntry, ...]  newest first
//! ```

use std::fmt;

use reqwest::StatusCode;
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::BlobClientConfig;
use crate::storage::{BlobStore, MetadataIndex, StorageError};
use crate::types::{ContentId, IndexEntry};

/// Errors that can occur while contacting the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    /// Transport-level error (e.g. connection refused, timeout).
    Transport(String),
    /// The gateway returned a malformed or unexpected response.
    Protocol(String),
    /// The gateway answered with an error status.
    Service { status: u16, message: String },
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientError::Transport(msg) => write!(f, "transport error: {msg}"),
            ClientError::Protocol(msg) => write!(f, "protocol error: {msg}"),
            ClientError::Service { status, message } => {
                write!(f, "gateway returned HTTP {status}: {message}")
            }
        }
    }
}

impl std::error::Error for ClientError {}

/// Body returned by `POST /upload`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadResponse {
    pub cid: ContentId,
}

/// Shared plumbing for both clients.
#[derive(Clone)]
struct Endpoint {
    base_url: String,
    client: Client,
    token: Option<String>,
}

impl Endpoint {
    fn new(cfg: &BlobClientConfig) -> Result<Self, ClientError> {
        let client = Client::builder()
            .timeout(cfg.timeout)
            .build()
            .map_err(|e| ClientError::Transport(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            base_url: cfg.base_url.clone(),
            client,
            token: cfg.upload_token.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    fn authorized(&self, req: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => req.header(AUTHORIZATION, format!("Bearer {token}")),
            None => req,
        }
    }

    fn send(&self, req: RequestBuilder, what: &str) -> Result<Response, ClientError> {
        req.send()
            .map_err(|e| ClientError::Transport(format!("{what} failed: {e}")))
    }
}

fn check_status(resp: Response) -> Result<Response, ClientError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let message = resp.text().unwrap_or_default();
    Err(ClientError::Service {
        status: status.as_u16(),
        message,
    })
}

/// [`BlobStore`] backed by a gateway's `/upload` and `/ipfs` endpoints.
///
/// Uses the blocking `reqwest` client; call it from plain threads or from
/// `spawn_blocking` inside a Tokio runtime.
#[derive(Clone)]
pub struct HttpBlobStore {
    endpoint: Endpoint,
}

impl HttpBlobStore {
    pub fn new(cfg: &BlobClientConfig) -> Result<Self, ClientError> {
        Ok(Self {
            endpoint: Endpoint::new(cfg)?,
        })
    }

    /// Uploads `bytes` and returns the identifier the gateway assigned.
    pub fn upload(&self, bytes: &[u8]) -> Result<ContentId, ClientError> {
        let url = self.endpoint.url("/upload");
        let req = self
            .endpoint
            .authorized(self.endpoint.client.post(&url))
            .header(CONTENT_TYPE, "application/octet-stream")
            .body(bytes.to_vec());
        let resp = check_status(self.endpoint.send(req, &format!("HTTP POST {url}"))?)?;
        let body = resp
            .json::<UploadResponse>()
            .map_err(|e| ClientError::Protocol(format!("failed to parse upload response: {e}")))?;
        debug!(cid = %body.cid, bytes = bytes.len(), "uploaded blob");
        Ok(body.cid)
    }

    /// Downloads a blob; `None` if the gateway does not know it.
    pub fn download(&self, id: &ContentId) -> Result<Option<Vec<u8>>, ClientError> {
        let url = self.endpoint.url(&format!("/ipfs/{id}"));
        let resp = self
            .endpoint
            .send(self.endpoint.client.get(&url), &format!("HTTP GET {url}"))?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let bytes = check_status(resp)?
            .bytes()
            .map_err(|e| ClientError::Transport(format!("reading {url} failed: {e}")))?;
        Ok(Some(bytes.to_vec()))
    }
}

impl BlobStore for HttpBlobStore {
    fn put(&self, bytes: &[u8]) -> Result<ContentId, StorageError> {
        Ok(self.upload(bytes)?)
    }

    fn get(&self, id: &ContentId) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.download(id)?)
    }
}

/// [`MetadataIndex`] backed by a gateway's `/packs` endpoints.
#[derive(Clone)]
pub struct HttpMetadataIndex {
    endpoint: Endpoint,
}

impl HttpMetadataIndex {
    pub fn new(cfg: &BlobClientConfig) -> Result<Self, ClientError> {
        Ok(Self {
            endpoint: Endpoint::new(cfg)?,
        })
    }

    pub fn publish_entry(&self, entry: &IndexEntry) -> Result<(), ClientError> {
        let url = self.endpoint.url("/packs");
        let req = self
            .endpoint
            .authorized(self.endpoint.client.post(&url))
            .json(entry);
        check_status(self.endpoint.send(req, &format!("HTTP POST {url}"))?)?;
        Ok(())
    }

    pub fn list_entries(
        &self,
        channel: Option<&str>,
        limit: usize,
    ) -> Result<Vec<IndexEntry>, ClientError> {
        let url = self.endpoint.url("/packs");
        let mut query = vec![("limit", limit.to_string())];
        if let Some(channel) = channel {
            query.push(("channel", channel.to_string()));
        }
        let req = self.endpoint.client.get(&url).query(&query);
        let resp = check_status(self.endpoint.send(req, &format!("HTTP GET {url}"))?)?;
        resp.json::<Vec<IndexEntry>>()
            .map_err(|e| ClientError::Protocol(format!("failed to parse index listing: {e}")))
    }
}

impl MetadataIndex for HttpMetadataIndex {
    fn publish(&self, entry: IndexEntry) -> Result<(), StorageError> {
        Ok(self.publish_entry(&entry)?)
    }

    fn list(&self, channel: Option<&str>, limit: usize) -> Result<Vec<IndexEntry>, StorageError> {
        Ok(self.list_entries(channel, limit)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(base: &str) -> BlobClientConfig {
        BlobClientConfig {
            base_url: base.to_string(),
            ..BlobClientConfig::default()
        }
    }

    #[test]
    fn urls_never_double_slash() {
        let ep = Endpoint::new(&cfg("http://gateway:8081/")).unwrap();
        assert_eq!(ep.url("/upload"), "http://gateway:8081/upload");
        assert_eq!(ep.url("ipfs/abc"), "http://gateway:8081/ipfs/abc");
    }

    #[test]
    fn upload_response_can_be_deserialized() {
        let resp: UploadResponse =
            serde_json::from_str(r#"{ "cid": "Qm123" }"#).expect("UploadResponse should parse");
        assert_eq!(resp.cid, ContentId::from("Qm123"));
    }

    #[test]
    fn unreachable_gateway_is_a_transport_error() {
        // Port 9 (discard) on localhost is essentially never served over HTTP.
        let store = HttpBlobStore::new(&BlobClientConfig {
            base_url: "http://127.0.0.1:9".to_string(),
            timeout: std::time::Duration::from_millis(500),
            upload_token: None,
        })
        .unwrap();
        assert!(matches!(
            store.upload(b"bytes"),
            Err(ClientError::Transport(_))
        ));
    }

    #[test]
    fn client_errors_convert_into_storage_errors() {
        let err: StorageError = ClientError::Service {
            status: 500,
            message: "boom".to_string(),
        }
        .into();
        assert!(err.to_string().contains("HTTP 500"));
    }
}
