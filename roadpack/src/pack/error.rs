use std::fmt;

use crate::encoding::CanonicalError;
use crate::storage::StorageError;
use crate::types::ReportId;

/// Errors that abort building or opening a pack.
///
/// Per-report integrity failures during verification are not errors; they
/// are recorded on each [`crate::pack::ReportVerdict`].
#[derive(Debug)]
pub enum PackError {
    /// No reports were supplied.
    EmptyReportSet,
    /// The photo source has no bytes for this report.
    MissingPhoto(ReportId),
    /// The photo bytes do not hash to the report's `img_hash`.
    ImageHashMismatch(ReportId),
    /// The report id cannot be used as a file name.
    InvalidReportId(ReportId),
    /// Two reports in the set share an id.
    DuplicateReportId(ReportId),
    /// Canonical encoding failed.
    Canonical(CanonicalError),
    /// Archive or manifest serialization failed.
    Encode(String),
    /// Archive container is unreadable.
    MalformedArchive(String),
    /// The archive has no `pack.json`.
    MissingManifest,
    /// `pack.json` does not parse as a manifest.
    InvalidManifest(String),
    /// Archive exceeds the configured size limit.
    ArchiveTooLarge { size: usize, max: usize },
    /// Manifest lists more reports than the configured limit.
    TooManyReports { count: usize, max: usize },
    /// The dedup ledger failed.
    Storage(StorageError),
}

impl fmt::Display for PackError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PackError::EmptyReportSet => write!(f, "no reports to pack"),
            PackError::MissingPhoto(id) => write!(f, "missing image data for report {id}"),
            PackError::ImageHashMismatch(id) => write!(f, "image hash mismatch for report {id}"),
            PackError::InvalidReportId(id) => write!(f, "invalid report id \"{id}\""),
            PackError::DuplicateReportId(id) => write!(f, "report {id} appears more than once"),
            PackError::Canonical(e) => write!(f, "canonical encoding failed: {e}"),
            PackError::Encode(msg) => write!(f, "cannot encode pack: {msg}"),
            PackError::MalformedArchive(msg) => write!(f, "malformed archive: {msg}"),
            PackError::MissingManifest => write!(f, "pack.json missing from archive"),
            PackError::InvalidManifest(msg) => write!(f, "invalid pack.json: {msg}"),
            PackError::ArchiveTooLarge { size, max } => {
                write!(f, "archive is {size} bytes, limit is {max}")
            }
            PackError::TooManyReports { count, max } => {
                write!(f, "pack lists {count} reports, limit is {max}")
            }
            PackError::Storage(e) => write!(f, "dedup ledger: {e}"),
        }
    }
}

impl std::error::Error for PackError {}

impl From<CanonicalError> for PackError {
    fn from(e: CanonicalError) -> Self {
        PackError::Canonical(e)
    }
}

impl From<StorageError> for PackError {
    fn from(e: StorageError) -> Self {
        PackError::Storage(e)
    }
}
