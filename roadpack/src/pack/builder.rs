//! Builds pack archives from signed reports.

use std::collections::{HashMap, HashSet};
use std::time::Instant;

use tracing::info;

use super::PackError;
use super::archive::{MANIFEST_PATH, PackArchive, image_path};
use crate::encoding::canonicalize;
use crate::identity::Identity;
use crate::metrics::PackMetrics;
use crate::types::{
    AnonId, ArchiveHash, ContentId, ImageHash, IndexEntry, LocalReport, PackId, PackManifest,
    Report, ReportId, SeverityCounts,
};
use crate::types::pack::MANIFEST_VERSION;

/// Supplies raw photo bytes by report id.
pub trait PhotoSource {
    fn photo(&self, id: &ReportId) -> Option<&[u8]>;
}

impl PhotoSource for HashMap<ReportId, Vec<u8>> {
    fn photo(&self, id: &ReportId) -> Option<&[u8]> {
        self.get(id).map(Vec::as_slice)
    }
}

impl PhotoSource for [LocalReport] {
    fn photo(&self, id: &ReportId) -> Option<&[u8]> {
        self.iter()
            .find(|local| &local.report.id == id)
            .map(|local| local.photo.as_slice())
    }
}

/// Output of [`PackBuilder::build`].
#[derive(Clone, Debug)]
pub struct BuiltPack {
    /// Final serialized archive.
    pub archive: Vec<u8>,
    /// Hash of `archive`.
    pub archive_hash: ArchiveHash,
    pub manifest: PackManifest,
}

impl BuiltPack {
    /// Index record for this pack once it has been stored under `content_id`.
    pub fn index_entry(&self, pack_id: PackId, content_id: ContentId) -> IndexEntry {
        IndexEntry {
            pack_id,
            content_id,
            channel: self.manifest.channel.clone(),
            archive_hash: self.archive_hash.clone(),
            report_count: self.manifest.report_count as u64,
            uploader_id: self.manifest.uploader_id.clone(),
            created_at: self.manifest.created_at,
            counts: self.manifest.counts,
        }
    }
}

/// Bundles signed reports and their photos into one archive.
#[derive(Clone)]
pub struct PackBuilder {
    channel: String,
    uploader_id: AnonId,
    created_at: Option<i64>,
    signer: Option<Identity>,
    metrics: Option<PackMetrics>,
}

impl PackBuilder {
    pub fn new(channel: impl Into<String>, uploader_id: AnonId) -> Self {
        Self {
            channel: channel.into(),
            uploader_id,
            created_at: None,
            signer: None,
            metrics: None,
        }
    }

    /// Fixes the manifest `createdAt` (Unix ms) instead of using the clock.
    pub fn created_at(mut self, created_at_ms: i64) -> Self {
        self.created_at = Some(created_at_ms);
        self
    }

    /// Adds a pack-level signature by `identity` to the manifest.
    pub fn signed_by(mut self, identity: &Identity) -> Self {
        self.signer = Some(identity.clone());
        self
    }

    pub fn with_metrics(mut self, metrics: PackMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Builds the archive.
    ///
    /// Every report's photo is re-hashed and must equal its `img_hash`.
    /// Any failure aborts the whole build; no partial archive is returned.
    pub fn build<P>(&self, reports: &[Report], photos: &P) -> Result<BuiltPack, PackError>
    where
        P: PhotoSource + ?Sized,
    {
        let started = Instant::now();
        if reports.is_empty() {
            return Err(PackError::EmptyReportSet);
        }

        let mut seen = HashSet::new();
        let mut sanitized = Vec::with_capacity(reports.len());
        let mut images = Vec::with_capacity(reports.len());

        for report in reports {
            if !report.id.is_file_safe() {
                return Err(PackError::InvalidReportId(report.id.clone()));
            }
            if !seen.insert(&report.id) {
                return Err(PackError::DuplicateReportId(report.id.clone()));
            }
            let photo = photos
                .photo(&report.id)
                .ok_or_else(|| PackError::MissingPhoto(report.id.clone()))?;
            if ImageHash::of(photo) != report.media.img_hash {
                return Err(PackError::ImageHashMismatch(report.id.clone()));
            }

            let path = image_path(report.id.as_str(), &report.media.img_mime);
            let mut clean = report.clone();
            clean.media.img_filename = Some(path.clone());
            sanitized.push(clean);
            images.push((path, photo.to_vec()));
        }

        let mut manifest = PackManifest {
            version: MANIFEST_VERSION.to_string(),
            channel: self.channel.clone(),
            uploader_id: self.uploader_id.clone(),
            created_at: self
                .created_at
                .unwrap_or_else(|| chrono::Utc::now().timestamp_millis()),
            counts: SeverityCounts::from_reports(&sanitized),
            report_count: sanitized.len(),
            reports: sanitized,
            pack_sig: None,
            signer: None,
        };

        if let Some(identity) = &self.signer {
            let canonical = canonicalize(&manifest.unsigned())?;
            manifest.pack_sig = Some(identity.sign(&canonical));
            manifest.signer = Some(identity.public_key().clone());
        }

        let manifest_json =
            serde_json::to_vec(&manifest).map_err(|e| PackError::Encode(e.to_string()))?;

        let mut archive = PackArchive::new();
        archive.push(MANIFEST_PATH, manifest_json)?;
        for (path, bytes) in images {
            archive.push(path, bytes)?;
        }
        let archive = archive.encode()?;
        let archive_hash = ArchiveHash::of(&archive);

        info!(
            channel = %manifest.channel,
            reports = manifest.report_count,
            bytes = archive.len(),
            archive_hash = %archive_hash,
            "built pack"
        );
        if let Some(metrics) = &self.metrics {
            metrics.packs_built.inc();
            metrics
                .pack_build_seconds
                .observe(started.elapsed().as_secs_f64());
        }

        Ok(BuiltPack {
            archive,
            archive_hash,
            manifest,
        })
    }
}
