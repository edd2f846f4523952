//! Pack building and verification.
//!
//! - [`builder::PackBuilder`] re-checks each report's photo hash and writes
//!   manifest + images into a single archive.
//! - [`verifier::PackVerifier`] opens a received archive and judges every
//!   report on its own: signature, image hash, duplicate status.
//! - [`ledger::DedupLedger`] is the one piece of shared state between
//!   verifications.

pub mod archive;
pub mod builder;
pub mod error;
pub mod ledger;
pub mod verifier;

pub use archive::{ArchiveEntry, MANIFEST_PATH, PackArchive, image_extension, image_path};
pub use builder::{BuiltPack, PackBuilder, PhotoSource};
pub use error::PackError;
pub use ledger::{DedupKey, DedupLedger, InMemoryDedupLedger};
pub use verifier::{
    ImageFetcher, PackVerification, PackVerifier, RejectReason, ReportVerdict,
    VerificationSummary,
};
