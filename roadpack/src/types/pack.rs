// roadpack/src/types/pack.rs

//! Pack manifest and index entry types.
//!
//! The manifest is the `pack.json` document stored inside every pack
//! archive. An [`IndexEntry`] is the much smaller record a publisher hands to
//! the metadata index so that consumers can discover archives by channel.

use serde::{Deserialize, Serialize};

use super::report::to_base36;
use super::{AnonId, ArchiveHash, ContentId, PublicKeyText, Report, Severity, SignatureText};
use super::text_newtype;

/// Manifest format version written by this crate.
pub const MANIFEST_VERSION: &str = "1";

text_newtype!(
    /// Identifier of a published pack in the metadata index.
    PackId
);

impl PackId {
    /// Generates `pack-<base36 millis>` for the given publish time.
    pub fn generate(created_at_ms: i64) -> Self {
        PackId(format!("pack-{}", to_base36(created_at_ms.max(0) as u64)))
    }
}

/// Number of reports per known severity bucket.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeverityCounts {
    #[serde(rename = "MINOR", default)]
    pub minor: u64,
    #[serde(rename = "MODERATE", default)]
    pub moderate: u64,
    #[serde(rename = "CRITICAL", default)]
    pub critical: u64,
}

impl SeverityCounts {
    /// Tallies the known severities; unknown labels are not counted.
    pub fn from_reports<'a>(reports: impl IntoIterator<Item = &'a Report>) -> Self {
        let mut counts = SeverityCounts::default();
        for report in reports {
            match report.payload.severity.as_str() {
                Severity::MINOR => counts.minor += 1,
                Severity::MODERATE => counts.moderate += 1,
                Severity::CRITICAL => counts.critical += 1,
                _ => {}
            }
        }
        counts
    }

    /// Sum of all counted buckets.
    pub fn total(&self) -> u64 {
        self.minor + self.moderate + self.critical
    }
}

/// The `pack.json` document inside a pack archive.
///
/// Builders produce `PackManifest<Report>`. A verifier reads
/// `PackManifest<serde_json::Value>` so that one unreadable report entry
/// does not hide its siblings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackManifest<R = Report> {
    /// Manifest format version, currently `"1"`.
    pub version: String,
    /// Channel label the pack is published under.
    pub channel: String,
    /// Pseudonym of the uploader.
    pub uploader_id: AnonId,
    /// Creation time in Unix milliseconds.
    pub created_at: i64,
    /// Sanitized reports, each with `media.img_filename` set.
    pub reports: Vec<R>,
    /// Reports per severity bucket.
    pub counts: SeverityCounts,
    /// Number of reports in the pack.
    pub report_count: usize,
    /// Optional signature by `signer` over the canonical manifest with
    /// `packSig` and `signer` removed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pack_sig: Option<SignatureText>,
    /// Public key of the optional pack signer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signer: Option<PublicKeyText>,
}

impl<R: Clone> PackManifest<R> {
    /// Copy of the manifest without the pack-level signature fields, i.e.
    /// the value the pack signature covers.
    pub fn unsigned(&self) -> PackManifest<R> {
        PackManifest {
            pack_sig: None,
            signer: None,
            ..self.clone()
        }
    }
}

/// Metadata index record describing one published archive.
///
/// Entries are discovery hints only. Nothing in an entry is trusted; the
/// archive it points at is verified report by report.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexEntry {
    pub pack_id: PackId,
    /// Where the archive lives in the blob store.
    pub content_id: ContentId,
    pub channel: String,
    /// Archive hash claimed by the publisher.
    pub archive_hash: ArchiveHash,
    pub report_count: u64,
    pub uploader_id: AnonId,
    /// Publish time in Unix milliseconds.
    pub created_at: i64,
    #[serde(default)]
    pub counts: SeverityCounts,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ImageHash, Media, Nullifier, Payload, ReportId};

    fn report_with_severity(severity: &str) -> Report {
        Report {
            id: ReportId::from("pot-1"),
            pubkey: PublicKeyText::from("pk"),
            anon_id: AnonId::from("anon"),
            nullifier: Nullifier::from("n"),
            payload: Payload {
                lat: 1.0,
                lng: 2.0,
                severity: Severity::from(severity),
                score: 10.0,
                area_px: 100.0,
                depth_cm: Some(1.5),
                ts: "2024-05-01T00:00:00.000Z".to_string(),
            },
            media: Media {
                img_hash: ImageHash::from("h"),
                img_mime: "image/jpeg".to_string(),
                img_filename: None,
            },
            signature: SignatureText::from("s"),
        }
    }

    #[test]
    fn counts_only_known_severities() {
        let reports = vec![
            report_with_severity("MINOR"),
            report_with_severity("CRITICAL"),
            report_with_severity("CRITICAL"),
            report_with_severity("LOW"),
        ];
        let counts = SeverityCounts::from_reports(&reports);
        assert_eq!(counts.minor, 1);
        assert_eq!(counts.moderate, 0);
        assert_eq!(counts.critical, 2);
        assert_eq!(counts.total(), 3);
    }

    #[test]
    fn counts_serialize_with_uppercase_keys() {
        let counts = SeverityCounts {
            minor: 1,
            moderate: 2,
            critical: 3,
        };
        let json = serde_json::to_value(counts).unwrap();
        assert_eq!(json["MINOR"], 1);
        assert_eq!(json["MODERATE"], 2);
        assert_eq!(json["CRITICAL"], 3);
    }

    #[test]
    fn manifest_omits_absent_pack_signature() {
        let manifest = PackManifest {
            version: MANIFEST_VERSION.to_string(),
            channel: "global".to_string(),
            uploader_id: AnonId::from("anon"),
            created_at: 1_714_566_896_789,
            reports: vec![report_with_severity("MINOR")],
            counts: SeverityCounts::default(),
            report_count: 1,
            pack_sig: None,
            signer: None,
        };
        let json = serde_json::to_value(&manifest).unwrap();
        assert!(json.get("packSig").is_none());
        assert!(json.get("signer").is_none());
        assert_eq!(json["uploaderId"], "anon");
        assert_eq!(json["reportCount"], 1);
    }

    #[test]
    fn index_entry_roundtrips_with_bincode2() {
        let entry = IndexEntry {
            pack_id: PackId::generate(1_714_566_896_789),
            content_id: ContentId::from("cid"),
            channel: "kolkata-south".to_string(),
            archive_hash: ArchiveHash::from("hash"),
            report_count: 3,
            uploader_id: AnonId::from("anon"),
            created_at: 1_714_566_896_789,
            counts: SeverityCounts {
                minor: 1,
                moderate: 1,
                critical: 1,
            },
        };

        let cfg = bincode::config::standard();
        let bytes = bincode::serde::encode_to_vec(&entry, cfg).expect("IndexEntry encode");
        let (decoded, _): (IndexEntry, usize) =
            bincode::serde::decode_from_slice(&bytes, cfg).expect("IndexEntry decode");
        assert_eq!(decoded, entry);
    }

    #[test]
    fn pack_id_uses_base36_millis() {
        assert_eq!(PackId::generate(36).as_str(), "pack-10");
    }
}
