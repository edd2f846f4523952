//! Dedup ledger: the set of `(nullifier, payload.ts)` keys already accepted.

use std::collections::HashSet;
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};

use crate::storage::StorageError;
use crate::types::{Nullifier, Report};

/// Identifies one submission: the same device, day and capture instant.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DedupKey {
    pub nullifier: Nullifier,
    pub ts: String,
}

impl DedupKey {
    pub fn new(nullifier: Nullifier, ts: impl Into<String>) -> Self {
        Self {
            nullifier,
            ts: ts.into(),
        }
    }

    pub fn of(report: &Report) -> Self {
        Self::new(report.nullifier.clone(), report.payload.ts.clone())
    }

    /// Byte key used by persistent ledgers: the nullifier length as a
    /// big-endian `u32`, the nullifier, then `ts`.
    pub fn storage_key(&self) -> Vec<u8> {
        let nullifier = self.nullifier.as_str().as_bytes();
        let mut out = Vec::with_capacity(4 + nullifier.len() + self.ts.len());
        out.extend_from_slice(&(nullifier.len() as u32).to_be_bytes());
        out.extend_from_slice(nullifier);
        out.extend_from_slice(self.ts.as_bytes());
        out
    }
}

/// Running record of accepted submissions.
///
/// `check_and_insert` must be atomic: when two callers race on the same
/// key exactly one of them sees `true`.
pub trait DedupLedger: Send + Sync {
    /// Inserts `key`; returns `true` if it was not present before.
    fn check_and_insert(&self, key: &DedupKey) -> Result<bool, StorageError>;

    /// Returns `true` if `key` has been inserted. Never modifies the ledger.
    fn contains(&self, key: &DedupKey) -> Result<bool, StorageError>;
}

/// Ledger scoped to the lifetime of the value, e.g. one verification run.
#[derive(Debug, Default)]
pub struct InMemoryDedupLedger {
    seen: Mutex<HashSet<DedupKey>>,
}

impl InMemoryDedupLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.seen.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl DedupLedger for InMemoryDedupLedger {
    fn check_and_insert(&self, key: &DedupKey) -> Result<bool, StorageError> {
        let mut seen = self.seen.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(seen.insert(key.clone()))
    }

    fn contains(&self, key: &DedupKey) -> Result<bool, StorageError> {
        let seen = self.seen.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(seen.contains(key))
    }
}

impl<L> DedupLedger for std::sync::Arc<L>
where
    L: DedupLedger + ?Sized,
{
    fn check_and_insert(&self, key: &DedupKey) -> Result<bool, StorageError> {
        (**self).check_and_insert(key)
    }

    fn contains(&self, key: &DedupKey) -> Result<bool, StorageError> {
        (**self).contains(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    fn key(n: &str, ts: &str) -> DedupKey {
        DedupKey::new(Nullifier::from(n), ts)
    }

    #[test]
    fn first_insert_wins_and_repeats_are_flagged() {
        let ledger = InMemoryDedupLedger::new();
        let k = key("n1", "2024-05-01T00:00:00.000Z");

        assert!(!ledger.contains(&k).unwrap());
        assert!(ledger.check_and_insert(&k).unwrap());
        assert!(!ledger.check_and_insert(&k).unwrap());
        assert!(ledger.contains(&k).unwrap());
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn keys_differ_by_nullifier_or_timestamp() {
        let ledger = InMemoryDedupLedger::new();
        assert!(ledger.check_and_insert(&key("n1", "t1")).unwrap());
        assert!(ledger.check_and_insert(&key("n1", "t2")).unwrap());
        assert!(ledger.check_and_insert(&key("n2", "t1")).unwrap());
        assert_eq!(ledger.len(), 3);
    }

    #[test]
    fn contains_does_not_insert() {
        let ledger = InMemoryDedupLedger::new();
        let k = key("n", "t");
        assert!(!ledger.contains(&k).unwrap());
        assert!(ledger.is_empty());
    }

    #[test]
    fn racing_inserts_admit_exactly_one_winner() {
        let ledger = Arc::new(InMemoryDedupLedger::new());
        let winners = Arc::new(AtomicUsize::new(0));
        let k = key("racer", "2024-05-01T00:00:00.000Z");

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let ledger = ledger.clone();
                let winners = winners.clone();
                let k = k.clone();
                thread::spawn(move || {
                    if ledger.check_and_insert(&k).unwrap() {
                        winners.fetch_add(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(winners.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn storage_key_prefixes_nullifier_length() {
        assert_eq!(key("abc", "ts").storage_key(), b"\0\0\0\x03abcts".to_vec());
    }

    #[test]
    fn storage_keys_do_not_collide_across_the_split() {
        let a = key("n:2024", "x");
        let b = key("n", "2024:x");
        assert_ne!(a.storage_key(), b.storage_key());
        let c = key("ab", "c");
        let d = key("a", "bc");
        assert_ne!(c.storage_key(), d.storage_key());
    }
}
