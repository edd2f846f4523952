//! In-memory store.
//!
//! This implementation is useful for unit tests and for running the
//! gateway without a database. Clones share the same underlying state.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::{BlobStore, IdentityStore, MetadataIndex, StorageError, select_entries};
use crate::types::{ContentId, IndexEntry, PackId};

#[derive(Default)]
struct Inner {
    identity: Option<Vec<u8>>,
    blobs: HashMap<ContentId, Vec<u8>>,
    index: HashMap<PackId, IndexEntry>,
}

/// In-memory implementation of every storage trait.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl InMemoryStore {
    /// Creates a new, empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the number of blobs currently stored.
    pub fn blob_count(&self) -> usize {
        self.lock().blobs.len()
    }

    /// Returns the number of index entries currently stored.
    pub fn entry_count(&self) -> usize {
        self.lock().index.len()
    }
}

impl IdentityStore for InMemoryStore {
    fn load(&self) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.lock().identity.clone())
    }

    fn save(&self, bundle: &[u8]) -> Result<(), StorageError> {
        self.lock().identity = Some(bundle.to_vec());
        Ok(())
    }
}

impl BlobStore for InMemoryStore {
    fn put(&self, bytes: &[u8]) -> Result<ContentId, StorageError> {
        let id = ContentId::of(bytes);
        self.lock()
            .blobs
            .entry(id.clone())
            .or_insert_with(|| bytes.to_vec());
        Ok(id)
    }

    fn get(&self, id: &ContentId) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.lock().blobs.get(id).cloned())
    }
}

impl MetadataIndex for InMemoryStore {
    fn publish(&self, entry: IndexEntry) -> Result<(), StorageError> {
        self.lock().index.insert(entry.pack_id.clone(), entry);
        Ok(())
    }

    fn list(&self, channel: Option<&str>, limit: usize) -> Result<Vec<IndexEntry>, StorageError> {
        let entries: Vec<IndexEntry> = self.lock().index.values().cloned().collect();
        Ok(select_entries(entries, channel, limit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::tests::entry;

    #[test]
    fn identity_roundtrip() {
        let store = InMemoryStore::new();
        assert!(store.load().unwrap().is_none());
        store.save(b"bundle").unwrap();
        assert_eq!(store.load().unwrap().as_deref(), Some(&b"bundle"[..]));
    }

    #[test]
    fn blobs_are_content_addressed_and_idempotent() {
        let store = InMemoryStore::new();
        let a = store.put(b"archive").unwrap();
        let b = store.put(b"archive").unwrap();
        assert_eq!(a, b);
        assert_eq!(a, ContentId::of(b"archive"));
        assert_eq!(store.blob_count(), 1);
        assert_eq!(store.get(&a).unwrap().as_deref(), Some(&b"archive"[..]));
        assert!(store.get(&ContentId::from("missing")).unwrap().is_none());
    }

    #[test]
    fn publish_upserts_by_pack_id() {
        let store = InMemoryStore::new();
        store.publish(entry("pack-1", "global", 1)).unwrap();
        let mut updated = entry("pack-1", "global", 5);
        updated.report_count = 9;
        store.publish(updated).unwrap();

        assert_eq!(store.entry_count(), 1);
        let listed = store.list(None, 10).unwrap();
        assert_eq!(listed[0].report_count, 9);
    }

    #[test]
    fn clones_share_state() {
        let store = InMemoryStore::new();
        let clone = store.clone();
        store.put(b"x").unwrap();
        assert_eq!(clone.blob_count(), 1);
    }
}
