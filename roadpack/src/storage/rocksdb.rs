//! RocksDB-backed store.
//!
//! This implementation persists everything a node needs in a single RocksDB
//! instance with dedicated column families:
//!
//! - `"identity"`: the identity bundle under the fixed key `"bundle"`,
//! - `"blobs"`:    `ContentId` -> archive bytes,
//! - `"index"`:    `PackId` -> bincode-encoded `IndexEntry`,
//! - `"dedup"`:    `nullifier:ts` -> empty value, the persistent dedup ledger.

use std::path::Path;
use std::sync::{Mutex, PoisonError};

use ::rocksdb::{ColumnFamily, ColumnFamilyDescriptor, DB, IteratorMode, Options};

use super::{BlobStore, IdentityStore, MetadataIndex, StorageError, select_entries};
use crate::pack::ledger::{DedupKey, DedupLedger};
use crate::types::{ContentId, IndexEntry};

const CF_IDENTITY: &str = "identity";
const CF_BLOBS: &str = "blobs";
const CF_INDEX: &str = "index";
const CF_DEDUP: &str = "dedup";

const IDENTITY_KEY: &[u8] = b"bundle";

/// Configuration for [`RocksDbStore`].
#[derive(Clone, Debug)]
pub struct RocksDbConfig {
    /// Filesystem path to the RocksDB database directory.
    pub path: String,
    /// Whether to create the database and missing column families if they
    /// do not yet exist.
    pub create_if_missing: bool,
}

impl Default for RocksDbConfig {
    fn default() -> Self {
        Self {
            path: "data/roadpack-db".to_string(),
            create_if_missing: true,
        }
    }
}

/// RocksDB-backed implementation of the storage traits and of
/// [`DedupLedger`].
pub struct RocksDbStore {
    db: DB,
    // Serializes read-then-write on the dedup column family.
    dedup_lock: Mutex<()>,
}

impl RocksDbStore {
    /// Opens (or creates) a store at the configured path.
    pub fn open(cfg: &RocksDbConfig) -> Result<Self, StorageError> {
        let path = Path::new(&cfg.path);

        let mut opts = Options::default();
        opts.create_if_missing(cfg.create_if_missing);
        opts.create_missing_column_families(cfg.create_if_missing);

        let cfs = vec![
            ColumnFamilyDescriptor::new("default", Options::default()),
            ColumnFamilyDescriptor::new(CF_IDENTITY, Options::default()),
            ColumnFamilyDescriptor::new(CF_BLOBS, Options::default()),
            ColumnFamilyDescriptor::new(CF_INDEX, Options::default()),
            ColumnFamilyDescriptor::new(CF_DEDUP, Options::default()),
        ];

        let db = DB::open_cf_descriptors(&opts, path, cfs)?;

        Ok(Self {
            db,
            dedup_lock: Mutex::new(()),
        })
    }

    fn cf(&self, name: &'static str) -> Result<&ColumnFamily, StorageError> {
        self.db
            .cf_handle(name)
            .ok_or(StorageError::MissingColumnFamily(name))
    }

    fn encode_entry(entry: &IndexEntry) -> Result<Vec<u8>, StorageError> {
        bincode::serde::encode_to_vec(entry, bincode::config::standard())
            .map_err(|e| StorageError::Codec(e.to_string()))
    }

    fn decode_entry(bytes: &[u8]) -> Result<IndexEntry, StorageError> {
        let (entry, _): (IndexEntry, usize) =
            bincode::serde::decode_from_slice(bytes, bincode::config::standard())
                .map_err(|e| StorageError::Codec(e.to_string()))?;
        Ok(entry)
    }
}

impl IdentityStore for RocksDbStore {
    fn load(&self) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.db.get_cf(self.cf(CF_IDENTITY)?, IDENTITY_KEY)?)
    }

    fn save(&self, bundle: &[u8]) -> Result<(), StorageError> {
        self.db.put_cf(self.cf(CF_IDENTITY)?, IDENTITY_KEY, bundle)?;
        Ok(())
    }
}

impl BlobStore for RocksDbStore {
    fn put(&self, bytes: &[u8]) -> Result<ContentId, StorageError> {
        let id = ContentId::of(bytes);
        self.db.put_cf(self.cf(CF_BLOBS)?, id.as_str(), bytes)?;
        Ok(id)
    }

    fn get(&self, id: &ContentId) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.db.get_cf(self.cf(CF_BLOBS)?, id.as_str())?)
    }
}

impl MetadataIndex for RocksDbStore {
    fn publish(&self, entry: IndexEntry) -> Result<(), StorageError> {
        let bytes = Self::encode_entry(&entry)?;
        self.db
            .put_cf(self.cf(CF_INDEX)?, entry.pack_id.as_str(), bytes)?;
        Ok(())
    }

    fn list(&self, channel: Option<&str>, limit: usize) -> Result<Vec<IndexEntry>, StorageError> {
        let mut entries = Vec::new();
        for item in self.db.iterator_cf(self.cf(CF_INDEX)?, IteratorMode::Start) {
            let (_, value) = item?;
            entries.push(Self::decode_entry(&value)?);
        }
        Ok(select_entries(entries, channel, limit))
    }
}

impl DedupLedger for RocksDbStore {
    fn check_and_insert(&self, key: &DedupKey) -> Result<bool, StorageError> {
        let _guard = self.dedup_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let cf = self.cf(CF_DEDUP)?;
        let db_key = key.storage_key();
        if self.db.get_pinned_cf(cf, &db_key)?.is_some() {
            return Ok(false);
        }
        self.db.put_cf(cf, &db_key, b"")?;
        Ok(true)
    }

    fn contains(&self, key: &DedupKey) -> Result<bool, StorageError> {
        Ok(self
            .db
            .get_pinned_cf(self.cf(CF_DEDUP)?, key.storage_key())?
            .is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::tests::entry;
    use crate::types::Nullifier;
    use tempfile::TempDir;

    fn open(tmp: &TempDir) -> RocksDbStore {
        let cfg = RocksDbConfig {
            path: tmp.path().to_string_lossy().to_string(),
            create_if_missing: true,
        };
        RocksDbStore::open(&cfg).expect("open RocksDB")
    }

    #[test]
    fn rocksdb_store_roundtrip_identity_and_blobs() {
        let tmp = TempDir::new().expect("create temp dir");
        let store = open(&tmp);

        assert!(store.load().unwrap().is_none());
        store.save(b"{\"publicKey\":\"pk\"}").unwrap();
        assert_eq!(
            store.load().unwrap().as_deref(),
            Some(&b"{\"publicKey\":\"pk\"}"[..])
        );

        let id = store.put(b"archive bytes").unwrap();
        assert_eq!(id, ContentId::of(b"archive bytes"));
        assert_eq!(
            store.get(&id).unwrap().as_deref(),
            Some(&b"archive bytes"[..])
        );
        assert!(store.get(&ContentId::from("nope")).unwrap().is_none());
    }

    #[test]
    fn rocksdb_index_lists_newest_first() {
        let tmp = TempDir::new().expect("create temp dir");
        let store = open(&tmp);

        store.publish(entry("pack-1", "global", 100)).unwrap();
        store.publish(entry("pack-2", "global", 300)).unwrap();
        store.publish(entry("pack-3", "kolkata", 200)).unwrap();

        let all = store.list(None, 50).unwrap();
        let ids: Vec<_> = all.iter().map(|e| e.pack_id.as_str()).collect();
        assert_eq!(ids, ["pack-2", "pack-3", "pack-1"]);

        let kolkata = store.list(Some("kolkata"), 50).unwrap();
        assert_eq!(kolkata.len(), 1);
        assert_eq!(kolkata[0], entry("pack-3", "kolkata", 200));
    }

    #[test]
    fn dedup_ledger_survives_reopen() {
        let tmp = TempDir::new().expect("create temp dir");
        let key = DedupKey::new(Nullifier::from("n"), "2024-05-01T00:00:00.000Z");

        {
            let store = open(&tmp);
            assert!(!store.contains(&key).unwrap());
            assert!(store.check_and_insert(&key).unwrap());
            assert!(!store.check_and_insert(&key).unwrap());
        }

        let reopened = open(&tmp);
        assert!(reopened.contains(&key).unwrap());
        assert!(!reopened.check_and_insert(&key).unwrap());
    }
}
