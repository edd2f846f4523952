// roadpack/src/types/report.rs

//! Report types and the signed view.
//!
//! A [`Report`] is immutable once signed: the signature covers the
//! canonical encoding of its [`SignedView`], which is the payload plus a
//! reduced media view (`img_hash`, `img_mime`). Anything outside that view
//! (the report id, the archive file name) can be assigned after signing
//! without invalidating the signature.

use rand::Rng;
use serde::{Deserialize, Serialize};

use super::{AnonId, ImageHash, Nullifier, PublicKeyText, SignatureText, text_newtype};
use crate::encoding::{CanonicalError, canonicalize};

text_newtype!(
    /// Locally generated report identifier, e.g. `pot-k3j9x2lw5m1q8`.
    ReportId
);

impl ReportId {
    /// Longest id accepted in a pack.
    pub const MAX_LEN: usize = 64;

    /// Whether the id can name a file: 1 to [`Self::MAX_LEN`] ASCII
    /// letters, digits, `-` or `_`.
    ///
    /// The id is not covered by the report signature, so ids read from a
    /// received pack must pass this before they touch a path.
    pub fn is_file_safe(&self) -> bool {
        !self.0.is_empty()
            && self.0.len() <= Self::MAX_LEN
            && self
                .0
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
    }

    /// Generates a fresh identifier from a random suffix and the current
    /// time, both in base 36.
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        let random: String = (0..6)
            .map(|_| char::from_digit(rng.gen_range(0..36), 36).unwrap_or('0'))
            .collect();
        let millis = chrono::Utc::now().timestamp_millis().max(0) as u64;
        ReportId(format!("pot-{random}{}", to_base36(millis)))
    }
}

pub(crate) fn to_base36(mut n: u64) -> String {
    if n == 0 {
        return "0".to_string();
    }
    let mut digits = Vec::new();
    while n > 0 {
        digits.push(char::from_digit((n % 36) as u32, 36).unwrap_or('0'));
        n /= 36;
    }
    digits.iter().rev().collect()
}

/// Severity label produced by the external classifier.
///
/// The core treats the label as opaque. Only the three known buckets are
/// counted in pack manifests; any other label is carried through verbatim
/// so that the signed bytes are reproduced exactly.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Severity(pub String);

impl Severity {
    pub const MINOR: &'static str = "MINOR";
    pub const MODERATE: &'static str = "MODERATE";
    pub const CRITICAL: &'static str = "CRITICAL";

    pub fn minor() -> Self {
        Severity(Self::MINOR.to_string())
    }

    pub fn moderate() -> Self {
        Severity(Self::MODERATE.to_string())
    }

    pub fn critical() -> Self {
        Severity(Self::CRITICAL.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Severity {
    fn from(s: &str) -> Self {
        Severity(s.to_string())
    }
}

/// Observation payload covered by the report signature.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Payload {
    /// Latitude in decimal degrees.
    pub lat: f64,
    /// Longitude in decimal degrees.
    pub lng: f64,
    /// Classifier severity bucket.
    pub severity: Severity,
    /// Classifier score.
    pub score: f64,
    /// Damaged area in pixels.
    pub area_px: f64,
    /// Estimated depth, when the classifier produced one.
    ///
    /// Serialized as `null` when absent; it is part of the signed bytes.
    pub depth_cm: Option<f64>,
    /// Capture time, RFC 3339 UTC with millisecond precision.
    pub ts: String,
}

/// Media descriptor for the photo attached to a report.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Media {
    /// Hash of the photo bytes.
    pub img_hash: ImageHash,
    /// MIME type of the photo, e.g. `image/jpeg`.
    pub img_mime: String,
    /// Location of the photo inside a pack archive.
    ///
    /// Assigned by the pack builder after signing and deliberately excluded
    /// from the signed view.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub img_filename: Option<String>,
}

/// Signed, serializable report. This is what travels inside packs.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    pub id: ReportId,
    /// Signer's public key.
    pub pubkey: PublicKeyText,
    /// Pseudonym derived from `pubkey`.
    pub anon_id: AnonId,
    /// Nullifier for the capture day.
    pub nullifier: Nullifier,
    pub payload: Payload,
    pub media: Media,
    /// Signature over the canonical [`SignedView`].
    #[serde(rename = "sig")]
    pub signature: SignatureText,
}

/// The reduced media view fed into the signature.
#[derive(Clone, Copy, Debug, Serialize)]
pub struct MediaView<'a> {
    pub img_hash: &'a ImageHash,
    pub img_mime: &'a str,
}

/// Exactly the material a report signature covers.
#[derive(Clone, Copy, Debug, Serialize)]
pub struct SignedView<'a> {
    pub payload: &'a Payload,
    pub media: MediaView<'a>,
}

impl<'a> SignedView<'a> {
    /// Builds the signed view from a payload and media descriptor,
    /// dropping any storage-location field.
    pub fn new(payload: &'a Payload, media: &'a Media) -> Self {
        SignedView {
            payload,
            media: MediaView {
                img_hash: &media.img_hash,
                img_mime: &media.img_mime,
            },
        }
    }

    /// Canonical bytes that are signed and verified.
    pub fn canonical_bytes(&self) -> Result<Vec<u8>, CanonicalError> {
        canonicalize(self)
    }
}

impl Report {
    /// Returns the signed view of this report.
    pub fn signed_view(&self) -> SignedView<'_> {
        SignedView::new(&self.payload, &self.media)
    }

    /// Canonical bytes covered by [`Report::signature`].
    pub fn canonical_bytes(&self) -> Result<Vec<u8>, CanonicalError> {
        self.signed_view().canonical_bytes()
    }
}

/// A report as held by the submitting client.
///
/// Carries local-only state (the raw photo, the result of the post-signing
/// self check) that must never be serialized into a pack.
#[derive(Clone, Debug)]
pub struct LocalReport {
    pub report: Report,
    /// Raw photo bytes.
    pub photo: Vec<u8>,
    /// Whether the signature verified locally right after signing.
    pub verified: bool,
}

impl LocalReport {
    /// Copy of the report with all local-only state removed.
    pub fn sanitized(&self) -> Report {
        self.report.clone()
    }
}
