//! Publishing packs to, and importing packs from, a blob store + index.
//!
//! Publishing: build -> `put` the archive -> `publish` an [`IndexEntry`].
//! Importing: `get` the archive named by an entry -> verify it against the
//! entry's claimed archive hash -> keep the accepted reports. A ledger
//! shared across imports gives cross-pack duplicate detection.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::crypto::SignatureCheck;
use crate::pack::{
    BuiltPack, DedupLedger, PackBuilder, PackError, PackVerification, PackVerifier, PhotoSource,
};
use crate::storage::{BlobStore, MetadataIndex, StorageError};
use crate::types::{ArchiveHash, ContentId, IndexEntry, PackId, Report};

/// Errors raised by the feed workflow.
#[derive(Debug)]
pub enum FeedError {
    Pack(PackError),
    Storage(StorageError),
    /// The blob store has no archive under this id.
    NotFound(ContentId),
    /// Writing imported reports to disk failed.
    Io(io::Error),
}

impl fmt::Display for FeedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeedError::Pack(e) => write!(f, "{e}"),
            FeedError::Storage(e) => write!(f, "{e}"),
            FeedError::NotFound(cid) => write!(f, "archive {cid} not found in blob store"),
            FeedError::Io(e) => write!(f, "cannot save reports: {e}"),
        }
    }
}

impl std::error::Error for FeedError {}

impl From<PackError> for FeedError {
    fn from(e: PackError) -> Self {
        FeedError::Pack(e)
    }
}

impl From<StorageError> for FeedError {
    fn from(e: StorageError) -> Self {
        FeedError::Storage(e)
    }
}

impl From<io::Error> for FeedError {
    fn from(e: io::Error) -> Self {
        FeedError::Io(e)
    }
}

/// What a publisher learns after publishing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PublishReceipt {
    pub pack_id: PackId,
    pub content_id: ContentId,
    pub archive_hash: ArchiveHash,
    pub report_count: usize,
}

/// Stores an already built pack and announces it in the index.
pub fn publish_built(
    built: &BuiltPack,
    blobs: &dyn BlobStore,
    index: &dyn MetadataIndex,
) -> Result<PublishReceipt, FeedError> {
    let content_id = blobs.put(&built.archive)?;
    let pack_id = PackId::generate(built.manifest.created_at);
    index.publish(built.index_entry(pack_id.clone(), content_id.clone()))?;

    info!(
        pack_id = %pack_id,
        content_id = %content_id,
        channel = %built.manifest.channel,
        reports = built.manifest.report_count,
        "published pack"
    );
    Ok(PublishReceipt {
        pack_id,
        content_id,
        archive_hash: built.archive_hash.clone(),
        report_count: built.manifest.report_count,
    })
}

/// Builds a pack from `reports` and publishes it.
pub fn publish_pack<P>(
    builder: &PackBuilder,
    reports: &[Report],
    photos: &P,
    blobs: &dyn BlobStore,
    index: &dyn MetadataIndex,
) -> Result<PublishReceipt, FeedError>
where
    P: PhotoSource + ?Sized,
{
    let built = builder.build(reports, photos)?;
    publish_built(&built, blobs, index)
}

/// Result of importing one indexed pack.
#[derive(Clone, Debug)]
pub struct ImportOutcome {
    pub entry: IndexEntry,
    pub verification: PackVerification,
    /// Reports accepted into the caller's collection.
    pub added: usize,
    /// Reports rejected for any reason.
    pub skipped: usize,
}

impl ImportOutcome {
    pub fn accepted(&self) -> impl Iterator<Item = &Report> {
        self.verification.accepted()
    }
}

/// Fetches and verifies the archive an index entry points at.
pub fn import_pack<C>(
    entry: &IndexEntry,
    blobs: &dyn BlobStore,
    verifier: &PackVerifier<C>,
    ledger: &dyn DedupLedger,
) -> Result<ImportOutcome, FeedError>
where
    C: SignatureCheck,
{
    let archive = blobs
        .get(&entry.content_id)?
        .ok_or_else(|| FeedError::NotFound(entry.content_id.clone()))?;
    let verification = verifier.verify(&archive, Some(&entry.archive_hash), ledger)?;

    let summary = verification.summary();
    info!(
        pack_id = %entry.pack_id,
        added = summary.accepted,
        skipped = summary.total - summary.accepted,
        "imported pack"
    );
    Ok(ImportOutcome {
        entry: entry.clone(),
        added: summary.accepted,
        skipped: summary.total - summary.accepted,
        verification,
    })
}

/// Imports the newest `limit` packs of `channel`.
///
/// A pack that cannot be fetched or opened is logged and skipped; the
/// remaining packs are still imported.
pub fn import_feed<C>(
    index: &dyn MetadataIndex,
    blobs: &dyn BlobStore,
    verifier: &PackVerifier<C>,
    ledger: &dyn DedupLedger,
    channel: Option<&str>,
    limit: usize,
) -> Result<Vec<ImportOutcome>, FeedError>
where
    C: SignatureCheck,
{
    let mut outcomes = Vec::new();
    for entry in index.list(channel, limit)? {
        match import_pack(&entry, blobs, verifier, ledger) {
            Ok(outcome) => outcomes.push(outcome),
            // A broken ledger affects every later pack as well.
            Err(FeedError::Pack(PackError::Storage(e))) => return Err(FeedError::Storage(e)),
            Err(e) => warn!(pack_id = %entry.pack_id, error = %e, "skipping pack"),
        }
    }
    Ok(outcomes)
}

/// Path an accepted report is saved under: `<dir>/<id>.json`.
///
/// Returns `None` for an id that is not a plain file name.
pub fn report_path(dir: &Path, report: &Report) -> Option<PathBuf> {
    report
        .id
        .is_file_safe()
        .then(|| dir.join(format!("{}.json", report.id)))
}

/// Writes every accepted report of `outcome` into `dir` and returns how
/// many files were written.
pub fn save_accepted(outcome: &ImportOutcome, dir: &Path) -> Result<usize, FeedError> {
    fs::create_dir_all(dir)?;
    let mut written = 0;
    for report in outcome.accepted() {
        let Some(path) = report_path(dir, report) else {
            warn!(pack_id = %outcome.entry.pack_id, report_id = %report.id, "unsafe report id");
            continue;
        };
        let json = serde_json::to_vec_pretty(report).map_err(io::Error::from)?;
        fs::write(&path, json)?;
        written += 1;
    }
    Ok(written)
}
