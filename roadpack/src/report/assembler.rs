//! Builds and signs reports.
//!
//! The assembler hashes the photo, stamps the capture time and the day's
//! nullifier, canonicalizes `{payload, media:{img_hash, img_mime}}`, signs
//! it, and then verifies the fresh signature before handing the report
//! back. A report that fails its own check is never returned.

use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::crypto;
use crate::encoding::CanonicalError;
use crate::identity::{Identity, IdentityError, date_key, derive_nullifier};
use crate::types::{ImageHash, LocalReport, Media, Payload, Report, ReportId, Severity, SignedView};

/// Externally produced classification and location for one capture.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub lat: f64,
    pub lng: f64,
    pub severity: Severity,
    pub score: f64,
    pub area_px: f64,
    #[serde(default)]
    pub depth_cm: Option<f64>,
}

/// Errors raised while assembling a report.
#[derive(Debug, Clone, PartialEq)]
pub enum AssembleError {
    /// A numeric observation field is NaN or infinite.
    NonFiniteField(&'static str),
    /// Latitude or longitude outside its valid range.
    OutOfRange(&'static str, f64),
    /// The photo has no bytes.
    EmptyPhoto,
    Canonical(CanonicalError),
    Identity(IdentityError),
    /// The freshly produced signature did not verify.
    SelfVerifyFailed(ReportId),
}

impl fmt::Display for AssembleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssembleError::NonFiniteField(name) => write!(f, "field `{name}` is not finite"),
            AssembleError::OutOfRange(name, v) => write!(f, "field `{name}` out of range: {v}"),
            AssembleError::EmptyPhoto => write!(f, "photo is empty"),
            AssembleError::Canonical(e) => write!(f, "canonical encoding failed: {e}"),
            AssembleError::Identity(e) => write!(f, "{e}"),
            AssembleError::SelfVerifyFailed(id) => {
                write!(f, "signature of report {id} failed local verification")
            }
        }
    }
}

impl std::error::Error for AssembleError {}

impl From<CanonicalError> for AssembleError {
    fn from(e: CanonicalError) -> Self {
        AssembleError::Canonical(e)
    }
}

impl From<IdentityError> for AssembleError {
    fn from(e: IdentityError) -> Self {
        AssembleError::Identity(e)
    }
}

/// Renders a capture time as RFC 3339 UTC with millisecond precision.
pub fn format_ts(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

impl Observation {
    fn validate(&self) -> Result<(), AssembleError> {
        let fields = [
            ("lat", Some(self.lat)),
            ("lng", Some(self.lng)),
            ("score", Some(self.score)),
            ("area_px", Some(self.area_px)),
            ("depth_cm", self.depth_cm),
        ];
        for (name, value) in fields {
            if let Some(v) = value {
                if !v.is_finite() {
                    return Err(AssembleError::NonFiniteField(name));
                }
            }
        }
        if !(-90.0..=90.0).contains(&self.lat) {
            return Err(AssembleError::OutOfRange("lat", self.lat));
        }
        if !(-180.0..=180.0).contains(&self.lng) {
            return Err(AssembleError::OutOfRange("lng", self.lng));
        }
        Ok(())
    }
}

/// Assembles signed reports for one identity.
///
/// Holds no state besides the MIME type applied to photos; the identity
/// is passed to each call.
#[derive(Clone, Debug)]
pub struct ReportAssembler {
    img_mime: String,
}

impl Default for ReportAssembler {
    fn default() -> Self {
        Self::new("image/jpeg")
    }
}

impl ReportAssembler {
    pub fn new(img_mime: impl Into<String>) -> Self {
        Self {
            img_mime: img_mime.into(),
        }
    }

    /// Assembles a report captured now.
    pub fn assemble(
        &self,
        identity: &Identity,
        observation: &Observation,
        photo: &[u8],
    ) -> Result<LocalReport, AssembleError> {
        self.assemble_at(identity, observation, photo, Utc::now())
    }

    /// Assembles a report captured at `captured_at`. The nullifier is the
    /// one for the UTC day of `captured_at`.
    pub fn assemble_at(
        &self,
        identity: &Identity,
        observation: &Observation,
        photo: &[u8],
        captured_at: DateTime<Utc>,
    ) -> Result<LocalReport, AssembleError> {
        observation.validate()?;
        if photo.is_empty() {
            return Err(AssembleError::EmptyPhoto);
        }

        let payload = Payload {
            lat: observation.lat,
            lng: observation.lng,
            severity: observation.severity.clone(),
            score: observation.score,
            area_px: observation.area_px,
            depth_cm: observation.depth_cm,
            ts: format_ts(captured_at),
        };
        let media = Media {
            img_hash: ImageHash::of(photo),
            img_mime: self.img_mime.clone(),
            img_filename: None,
        };

        let canonical = SignedView::new(&payload, &media).canonical_bytes()?;
        let signature = identity.sign(&canonical);
        let nullifier = derive_nullifier(&date_key(captured_at), identity)?;

        let report = Report {
            id: ReportId::generate(),
            pubkey: identity.public_key().clone(),
            anon_id: identity.anon_id().clone(),
            nullifier,
            payload,
            media,
            signature,
        };

        // Post-condition: the report must verify with the bytes a verifier
        // will recompute from the report itself.
        let recomputed = report.canonical_bytes()?;
        let verifies = crypto::verify(&report.pubkey, &report.signature, &recomputed);
        if recomputed != canonical || !verifies {
            error!(report_id = %report.id, "freshly signed report failed self-verification");
            return Err(AssembleError::SelfVerifyFailed(report.id));
        }

        debug!(
            report_id = %report.id,
            severity = report.payload.severity.as_str(),
            "assembled report"
        );
        Ok(LocalReport {
            report,
            photo: photo.to_vec(),
            verified: true,
        })
    }
}
