//! Verifies received pack archives report by report.
//!
//! Each report is judged independently: its signature over the canonical
//! signed view, the hash of its embedded image, and whether its
//! `(nullifier, ts)` key was already accepted. The archive hash and the
//! optional pack signature are computed as well, but only reported; the
//! per-report checks are what a consumer should trust.

use std::fmt;
use std::time::Instant;

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::PackError;
use super::archive::PackArchive;
use super::ledger::{DedupKey, DedupLedger};
use crate::config::VerifyConfig;
use crate::crypto::SignatureCheck;
use crate::encoding::canonicalize;
use crate::metrics::PackMetrics;
use crate::types::{ArchiveHash, ImageHash, PackManifest, Report};

/// Fallback source for images that are not embedded in the archive.
pub trait ImageFetcher: Send + Sync {
    fn fetch(&self, report: &Report) -> Option<Vec<u8>>;
}

impl<F> ImageFetcher for F
where
    F: Fn(&Report) -> Option<Vec<u8>> + Send + Sync,
{
    fn fetch(&self, report: &Report) -> Option<Vec<u8>> {
        self(report)
    }
}

/// Why a report was not accepted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RejectReason {
    /// The manifest entry is not a usable report.
    Malformed(String),
    /// The signature does not verify under the report's public key.
    BadSignature,
    /// The signed view could not be canonicalized.
    Unencodable(String),
    /// The image was found but does not hash to `img_hash`.
    ImageMismatch,
    /// No image bytes could be located.
    ImageUnavailable,
    /// The `(nullifier, ts)` key was already accepted.
    Duplicate,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::Malformed(msg) => write!(f, "malformed report: {msg}"),
            RejectReason::BadSignature => write!(f, "signature invalid"),
            RejectReason::Unencodable(msg) => write!(f, "cannot canonicalize: {msg}"),
            RejectReason::ImageMismatch => write!(f, "image hash mismatch"),
            RejectReason::ImageUnavailable => write!(f, "image unavailable"),
            RejectReason::Duplicate => write!(f, "duplicate submission"),
        }
    }
}

/// Outcome for one manifest entry.
#[derive(Clone, Debug)]
pub struct ReportVerdict {
    /// Position of the entry in the manifest.
    pub index: usize,
    /// `None` when the entry could not be read as a report.
    pub report: Option<Report>,
    pub sig_ok: bool,
    pub img_ok: bool,
    pub duplicate: bool,
    /// Empty exactly when the report is accepted.
    pub reasons: Vec<RejectReason>,
}

impl ReportVerdict {
    pub fn accepted(&self) -> bool {
        self.report.is_some() && self.sig_ok && self.img_ok && !self.duplicate
    }

    /// Report id, or `#<index>` for an unreadable entry.
    pub fn label(&self) -> String {
        match &self.report {
            Some(report) => report.id.to_string(),
            None => format!("#{}", self.index),
        }
    }

    fn malformed(index: usize, reason: String) -> Self {
        Self {
            index,
            report: None,
            sig_ok: false,
            img_ok: false,
            duplicate: false,
            reasons: vec![RejectReason::Malformed(reason)],
        }
    }
}

/// Counts over a verification run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct VerificationSummary {
    pub total: usize,
    pub sig_ok: usize,
    pub img_ok: usize,
    pub duplicates: usize,
    pub accepted: usize,
}

/// Result of verifying one archive.
#[derive(Clone, Debug)]
pub struct PackVerification {
    /// The manifest as received; report entries are left as raw JSON.
    pub manifest: PackManifest<Value>,
    /// Hash recomputed over the received bytes.
    pub archive_hash: ArchiveHash,
    /// Whether `archive_hash` equals the claimed hash, if one was given.
    pub archive_hash_matches: Option<bool>,
    /// Whether the pack-level signature verifies, if the manifest has one.
    pub pack_sig_ok: Option<bool>,
    /// One verdict per manifest report, in manifest order.
    pub verdicts: Vec<ReportVerdict>,
}

impl PackVerification {
    pub fn summary(&self) -> VerificationSummary {
        let mut s = VerificationSummary {
            total: self.verdicts.len(),
            ..Default::default()
        };
        for v in &self.verdicts {
            s.sig_ok += usize::from(v.sig_ok);
            s.img_ok += usize::from(v.img_ok);
            s.duplicates += usize::from(v.duplicate);
            s.accepted += usize::from(v.accepted());
        }
        s
    }

    /// Reports that passed every check.
    pub fn accepted(&self) -> impl Iterator<Item = &Report> {
        self.verdicts
            .iter()
            .filter(|v| v.accepted())
            .filter_map(|v| v.report.as_ref())
    }
}

/// Pack verifier parameterized by the caller's signature check.
pub struct PackVerifier<C> {
    check: C,
    limits: VerifyConfig,
    fetcher: Option<Box<dyn ImageFetcher>>,
    metrics: Option<PackMetrics>,
}

impl<C> PackVerifier<C>
where
    C: SignatureCheck,
{
    pub fn new(check: C) -> Self {
        Self {
            check,
            limits: VerifyConfig::default(),
            fetcher: None,
            metrics: None,
        }
    }

    pub fn with_limits(mut self, limits: VerifyConfig) -> Self {
        self.limits = limits;
        self
    }

    /// Sets a fallback for images missing from the archive.
    pub fn with_fetcher(mut self, fetcher: impl ImageFetcher + 'static) -> Self {
        self.fetcher = Some(Box::new(fetcher));
        self
    }

    pub fn with_metrics(mut self, metrics: PackMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn signature_check(&self) -> &C {
        &self.check
    }

    /// Decodes an archive and parses its manifest, enforcing the limits.
    ///
    /// Only the manifest header must be well formed; report entries are
    /// read one at a time by [`Self::verify`].
    pub fn open(
        &self,
        archive_bytes: &[u8],
    ) -> Result<(PackArchive, PackManifest<Value>), PackError> {
        if archive_bytes.len() > self.limits.max_archive_bytes {
            return Err(PackError::ArchiveTooLarge {
                size: archive_bytes.len(),
                max: self.limits.max_archive_bytes,
            });
        }
        let archive = PackArchive::decode(archive_bytes)?;
        let manifest_bytes = archive.manifest_bytes().ok_or(PackError::MissingManifest)?;
        let manifest: PackManifest<Value> = serde_json::from_slice(manifest_bytes)
            .map_err(|e| PackError::InvalidManifest(e.to_string()))?;
        if manifest.reports.len() > self.limits.max_reports {
            return Err(PackError::TooManyReports {
                count: manifest.reports.len(),
                max: self.limits.max_reports,
            });
        }
        Ok((archive, manifest))
    }

    /// Verifies every report in `archive_bytes` against `ledger`.
    ///
    /// `expected_hash` is the archive hash claimed by whoever pointed us at
    /// this archive; a mismatch is logged and reported, never fatal.
    pub fn verify(
        &self,
        archive_bytes: &[u8],
        expected_hash: Option<&ArchiveHash>,
        ledger: &dyn DedupLedger,
    ) -> Result<PackVerification, PackError> {
        let started = Instant::now();
        let archive_hash = ArchiveHash::of(archive_bytes);
        let archive_hash_matches = expected_hash.map(|expected| *expected == archive_hash);
        if archive_hash_matches == Some(false) {
            warn!(
                expected = %expected_hash.map(ArchiveHash::as_str).unwrap_or_default(),
                actual = %archive_hash,
                "archive hash does not match claimed value"
            );
            if let Some(m) = &self.metrics {
                m.archive_hash_mismatches.inc();
            }
        }

        let (archive, manifest) = self.open(archive_bytes)?;
        let pack_sig_ok = self.check_pack_signature(&manifest);

        let mut verdicts = Vec::with_capacity(manifest.reports.len());
        for (index, entry) in manifest.reports.iter().enumerate() {
            let verdict = match read_report(entry) {
                Ok(report) => self.verify_report(index, &report, &archive, ledger)?,
                Err(reason) => {
                    warn!(index, %reason, "unreadable report entry");
                    let verdict = ReportVerdict::malformed(index, reason);
                    self.record(&verdict);
                    verdict
                }
            };
            verdicts.push(verdict);
        }

        let verification = PackVerification {
            manifest,
            archive_hash,
            archive_hash_matches,
            pack_sig_ok,
            verdicts,
        };

        let summary = verification.summary();
        info!(
            archive_hash = %verification.archive_hash,
            total = summary.total,
            accepted = summary.accepted,
            duplicates = summary.duplicates,
            "verified pack"
        );
        if let Some(m) = &self.metrics {
            m.packs_verified.inc();
            m.pack_verify_seconds.observe(started.elapsed().as_secs_f64());
        }

        Ok(verification)
    }

    /// Judges a single report.
    ///
    /// Only a report whose signature and image both check out is inserted
    /// into the ledger; any other report is merely tested against it.
    pub fn verify_report(
        &self,
        index: usize,
        report: &Report,
        archive: &PackArchive,
        ledger: &dyn DedupLedger,
    ) -> Result<ReportVerdict, PackError> {
        let mut reasons = Vec::new();

        let sig_ok = match report.canonical_bytes() {
            Ok(canonical) => {
                let ok = self.check.check(
                    report.pubkey.as_str(),
                    report.signature.as_str(),
                    &canonical,
                );
                if !ok {
                    reasons.push(RejectReason::BadSignature);
                }
                ok
            }
            Err(e) => {
                reasons.push(RejectReason::Unencodable(e.to_string()));
                false
            }
        };

        let img_ok = match self.locate_image(report, archive) {
            Some(bytes) => {
                let ok = ImageHash::of(&bytes) == report.media.img_hash;
                if !ok {
                    reasons.push(RejectReason::ImageMismatch);
                }
                ok
            }
            None => {
                reasons.push(RejectReason::ImageUnavailable);
                false
            }
        };

        let key = DedupKey::of(report);
        let duplicate = if sig_ok && img_ok {
            !ledger.check_and_insert(&key)?
        } else {
            ledger.contains(&key)?
        };
        if duplicate {
            reasons.push(RejectReason::Duplicate);
        }

        let verdict = ReportVerdict {
            index,
            report: Some(report.clone()),
            sig_ok,
            img_ok,
            duplicate,
            reasons,
        };
        self.record(&verdict);
        Ok(verdict)
    }

    fn locate_image(&self, report: &Report, archive: &PackArchive) -> Option<Vec<u8>> {
        let embedded = report
            .media
            .img_filename
            .as_deref()
            .and_then(|path| archive.get(path));
        match embedded {
            Some(bytes) => Some(bytes.to_vec()),
            None => self.fetcher.as_ref().and_then(|f| f.fetch(report)),
        }
    }

    fn check_pack_signature(&self, manifest: &PackManifest<Value>) -> Option<bool> {
        match (&manifest.pack_sig, &manifest.signer) {
            (None, None) => None,
            (Some(sig), Some(signer)) => {
                let ok = canonicalize(&manifest.unsigned())
                    .map(|bytes| self.check.check(signer.as_str(), sig.as_str(), &bytes))
                    .unwrap_or(false);
                if !ok {
                    warn!(signer = %signer, "pack signature does not verify");
                }
                Some(ok)
            }
            _ => {
                warn!("manifest carries only one of packSig/signer");
                Some(false)
            }
        }
    }

    fn record(&self, verdict: &ReportVerdict) {
        if !verdict.accepted() {
            debug!(
                report = %verdict.label(),
                sig_ok = verdict.sig_ok,
                img_ok = verdict.img_ok,
                duplicate = verdict.duplicate,
                "report rejected"
            );
        }
        let Some(m) = &self.metrics else {
            return;
        };
        if verdict.report.is_none() {
            m.reports_malformed.inc();
            return;
        }
        if verdict.accepted() {
            m.reports_accepted.inc();
        }
        if !verdict.sig_ok {
            m.reports_rejected_signature.inc();
        }
        if !verdict.img_ok {
            m.reports_rejected_image.inc();
        }
        if verdict.duplicate {
            m.reports_duplicate.inc();
        }
    }
}

/// Reads one manifest entry as a report.
///
/// The id is not signed, so one that cannot serve as a file name is treated
/// as malformed rather than passed on to consumers.
fn read_report(entry: &Value) -> Result<Report, String> {
    let report = Report::deserialize(entry).map_err(|e| e.to_string())?;
    if !report.id.is_file_safe() {
        return Err(format!("invalid report id \"{}\"", report.id));
    }
    Ok(report)
}
