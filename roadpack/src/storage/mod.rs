//! Storage contracts and backends.
//!
//! The core talks to its external collaborators through three small
//! traits:
//!
//! - [`IdentityStore`]: get/set of the serialized identity bundle,
//! - [`BlobStore`]: content-addressed `put`/`get` of pack archives,
//! - [`MetadataIndex`]: `publish`/`list` of [`IndexEntry`] records.
//!
//! Backends:
//!
//! - an in-memory store ([`mem::InMemoryStore`]) for tests and the gateway's
//!   ephemeral mode,
//! - a RocksDB-backed store ([`rocksdb::RocksDbStore`]) that also persists
//!   the dedup ledger across runs,
//! - HTTP clients in [`crate::http_client`] that speak to a gateway.

use std::fmt;
use std::sync::Arc;

use crate::http_client::ClientError;
use crate::types::{ContentId, IndexEntry};

pub mod mem;
pub mod rocksdb;

pub use self::mem::InMemoryStore;
pub use self::rocksdb::{RocksDbConfig, RocksDbStore};
pub use crate::pack::ledger::DedupLedger;

/// Default number of entries returned by [`MetadataIndex::list`] callers.
pub const DEFAULT_LIST_LIMIT: usize = 50;

/// Upper bound applied to any `list` request.
pub const MAX_LIST_LIMIT: usize = 500;

/// Storage-level error type.
#[derive(Debug)]
pub enum StorageError {
    /// Underlying RocksDB error.
    RocksDb(::rocksdb::Error),
    /// Required column family was not found.
    MissingColumnFamily(&'static str),
    /// A stored record could not be encoded or decoded.
    Codec(String),
    /// A remote backend failed.
    Remote(ClientError),
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::RocksDb(e) => write!(f, "rocksdb: {e}"),
            StorageError::MissingColumnFamily(name) => write!(f, "missing column family `{name}`"),
            StorageError::Codec(msg) => write!(f, "corrupted record: {msg}"),
            StorageError::Remote(e) => write!(f, "remote store: {e}"),
        }
    }
}

impl std::error::Error for StorageError {}

impl From<::rocksdb::Error> for StorageError {
    fn from(e: ::rocksdb::Error) -> Self {
        StorageError::RocksDb(e)
    }
}

impl From<ClientError> for StorageError {
    fn from(e: ClientError) -> Self {
        StorageError::Remote(e)
    }
}

/// Persistence for the serialized identity bundle.
pub trait IdentityStore {
    fn load(&self) -> Result<Option<Vec<u8>>, StorageError>;
    fn save(&self, bundle: &[u8]) -> Result<(), StorageError>;
}

/// Content-addressed blob storage.
///
/// Returned bytes are not trusted: the pack verifier re-hashes everything
/// it reads.
pub trait BlobStore: Send + Sync {
    /// Stores `bytes` and returns their identifier.
    fn put(&self, bytes: &[u8]) -> Result<ContentId, StorageError>;

    fn get(&self, id: &ContentId) -> Result<Option<Vec<u8>>, StorageError>;
}

/// Discovery index of published packs.
pub trait MetadataIndex: Send + Sync {
    /// Inserts `entry`, replacing any entry with the same `pack_id`.
    fn publish(&self, entry: IndexEntry) -> Result<(), StorageError>;

    /// Entries newest first (by `created_at`), optionally filtered by
    /// channel, at most `limit` (capped at [`MAX_LIST_LIMIT`]).
    fn list(&self, channel: Option<&str>, limit: usize) -> Result<Vec<IndexEntry>, StorageError>;
}

impl<T: IdentityStore + ?Sized> IdentityStore for &T {
    fn load(&self) -> Result<Option<Vec<u8>>, StorageError> {
        (**self).load()
    }

    fn save(&self, bundle: &[u8]) -> Result<(), StorageError> {
        (**self).save(bundle)
    }
}

impl<T: BlobStore + ?Sized> BlobStore for Arc<T> {
    fn put(&self, bytes: &[u8]) -> Result<ContentId, StorageError> {
        (**self).put(bytes)
    }

    fn get(&self, id: &ContentId) -> Result<Option<Vec<u8>>, StorageError> {
        (**self).get(id)
    }
}

impl<T: MetadataIndex + ?Sized> MetadataIndex for Arc<T> {
    fn publish(&self, entry: IndexEntry) -> Result<(), StorageError> {
        (**self).publish(entry)
    }

    fn list(&self, channel: Option<&str>, limit: usize) -> Result<Vec<IndexEntry>, StorageError> {
        (**self).list(channel, limit)
    }
}

/// Applies the `list` contract to an unordered set of entries.
pub(crate) fn select_entries(
    entries: impl IntoIterator<Item = IndexEntry>,
    channel: Option<&str>,
    limit: usize,
) -> Vec<IndexEntry> {
    let mut selected: Vec<IndexEntry> = entries
        .into_iter()
        .filter(|e| channel.is_none_or(|c| e.channel == c))
        .collect();
    selected.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| b.pack_id.cmp(&a.pack_id))
    });
    selected.truncate(limit.min(MAX_LIST_LIMIT));
    selected
}
