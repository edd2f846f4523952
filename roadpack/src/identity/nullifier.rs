//! Daily nullifiers.
//!
//! `nullifier = base64url(sha256(secret ‖ dateKey ‖ "pothole"))`. The same
//! identity produces the same tag all day, and tags from different days
//! cannot be linked without the recovery secret.

use chrono::{DateTime, NaiveDate, Utc};

use super::{Identity, IdentityError};
use crate::types::{Hash256, Nullifier};

/// Domain separator appended to every nullifier preimage.
pub const NULLIFIER_DOMAIN: &[u8] = b"pothole";

/// Formats the UTC calendar day of `at` as a date key (`YYYY-MM-DD`).
pub fn date_key(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d").to_string()
}

/// Date key for the current UTC day.
pub fn today_key() -> String {
    date_key(Utc::now())
}

/// Checks that `key` is a `YYYY-MM-DD` calendar date.
pub fn parse_date_key(key: &str) -> Result<NaiveDate, IdentityError> {
    NaiveDate::parse_from_str(key, "%Y-%m-%d")
        .map_err(|e| IdentityError::InvalidDateKey(format!("{key}: {e}")))
}

/// Derives the nullifier from raw secret bytes.
pub fn nullifier_from_secret(secret: &[u8], date_key: &str) -> Result<Nullifier, IdentityError> {
    if secret.is_empty() {
        return Err(IdentityError::MissingRecoverySecret);
    }
    let digest = Hash256::compute_parts(&[secret, date_key.as_bytes(), NULLIFIER_DOMAIN]);
    Ok(Nullifier(digest.to_base64url()))
}

/// Derives `identity`'s nullifier for `date_key`. Pure; no side effects.
pub fn derive_nullifier(date_key: &str, identity: &Identity) -> Result<Nullifier, IdentityError> {
    nullifier_from_secret(identity.recovery_secret(), date_key)
}
