//! Core domain types used by the protocol.
//!
//! Hashes, pseudonyms, keys and signatures all travel as text. This module
//! wraps each of them in its own newtype so that a nullifier can never be
//! passed where an image hash is expected, and keeps the hashing rules that
//! derive them in one place.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::encoding::text;

/// Report, payload and media types.
pub mod report;

/// Pack manifest and index entry types.
pub mod pack;

pub use pack::{IndexEntry, PackId, PackManifest, SeverityCounts};
pub use report::{LocalReport, Media, MediaView, Payload, Report, ReportId, Severity, SignedView};

/// Length in bytes of all 256-bit hash types used in this module.
pub const HASH_LEN: usize = 32;

/// Strongly-typed SHA-256 digest.
///
/// Every content hash in the protocol (image hashes, archive hashes,
/// nullifiers, pseudonyms, content identifiers) is a SHA-256 digest
/// rendered in one of two text encodings.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct Hash256(pub [u8; HASH_LEN]);

impl Hash256 {
    /// Computes the SHA-256 digest of `data`.
    pub fn compute(data: &[u8]) -> Self {
        Self::compute_parts(&[data])
    }

    /// Computes the SHA-256 digest of the concatenation of `parts`.
    pub fn compute_parts(parts: &[&[u8]]) -> Self {
        let mut hasher = Sha256::new();
        for part in parts {
            hasher.update(part);
        }
        let digest = hasher.finalize();
        let mut out = [0u8; HASH_LEN];
        out.copy_from_slice(&digest);
        Hash256(out)
    }

    /// Returns the underlying 32-byte digest.
    pub fn as_bytes(&self) -> &[u8; HASH_LEN] {
        &self.0
    }

    /// URL-safe base64 (no padding) rendering used for content hashes.
    pub fn to_base64url(&self) -> String {
        text::to_base64url(&self.0)
    }

    /// Base58 rendering used for pseudonyms and content identifiers.
    pub fn to_base58(&self) -> String {
        text::to_base58(&self.0)
    }
}

macro_rules! text_newtype {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash,
            ::serde::Serialize, ::serde::Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            /// Returns the text form.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                $name(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                $name(s.to_string())
            }
        }
    };
}

pub(crate) use text_newtype;

text_newtype!(
    /// `base64url(sha256(image bytes))`, bound into every report signature.
    ImageHash
);

text_newtype!(
    /// `base64url(sha256(archive bytes))`, computed over the final archive.
    ///
    /// This is an index and integrity convenience, never a trust boundary.
    ArchiveHash
);

text_newtype!(
    /// Daily pseudonymous tag derived from an identity's recovery secret.
    Nullifier
);

text_newtype!(
    /// Stable pseudonym: `base58(sha256(public key bytes))`.
    AnonId
);

text_newtype!(
    /// Identifier of a blob in the content-addressed store.
    ContentId
);

text_newtype!(
    /// Ed25519 public key, 32 raw bytes as URL-safe base64.
    PublicKeyText
);

text_newtype!(
    /// Ed25519 signature, 64 raw bytes as URL-safe base64.
    SignatureText
);

impl ImageHash {
    /// Hashes raw image bytes.
    pub fn of(image: &[u8]) -> Self {
        ImageHash(Hash256::compute(image).to_base64url())
    }
}

impl ArchiveHash {
    /// Hashes the final serialized archive bytes.
    pub fn of(archive: &[u8]) -> Self {
        ArchiveHash(Hash256::compute(archive).to_base64url())
    }
}

impl AnonId {
    /// Derives the pseudonym from raw public key bytes.
    ///
    /// The caller must pass the raw 32-byte key, not its text encoding.
    pub fn from_public_key(pk_bytes: &[u8]) -> Self {
        AnonId(Hash256::compute(pk_bytes).to_base58())
    }
}

impl ContentId {
    /// Derives the content identifier of a blob.
    pub fn of(bytes: &[u8]) -> Self {
        ContentId(Hash256::compute(bytes).to_base58())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_matches_known_vector() {
        let h = Hash256::compute(b"abc");
        assert_eq!(
            h.as_bytes()[..4],
            [0xba, 0x78, 0x16, 0xbf],
            "sha256(\"abc\") starts with ba7816bf"
        );
    }

    #[test]
    fn compute_parts_equals_concatenation() {
        let joined = Hash256::compute(b"secret2024-05-01pothole");
        let parts = Hash256::compute_parts(&[&b"secret"[..], &b"2024-05-01"[..], &b"pothole"[..]]);
        assert_eq!(joined, parts);
    }

    #[test]
    fn image_hash_is_unpadded_base64url() {
        let h = ImageHash::of(b"jpeg bytes");
        assert_eq!(h.as_str().len(), 43);
        assert!(!h.as_str().contains('='));
        assert!(!h.as_str().contains('+'));
        assert!(!h.as_str().contains('/'));
    }

    #[test]
    fn anon_id_is_deterministic_per_key() {
        let a = AnonId::from_public_key(&[7u8; 32]);
        let b = AnonId::from_public_key(&[7u8; 32]);
        let c = AnonId::from_public_key(&[8u8; 32]);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn content_id_changes_with_content() {
        assert_eq!(ContentId::of(b"pack"), ContentId::of(b"pack"));
        assert_ne!(ContentId::of(b"pack"), ContentId::of(b"pack!"));
    }

    #[test]
    fn newtypes_serialize_as_plain_strings() {
        let n = Nullifier::from("abc");
        assert_eq!(serde_json::to_string(&n).unwrap(), "\"abc\"");
        let back: Nullifier = serde_json::from_str("\"abc\"").unwrap();
        assert_eq!(back, n);
    }
}
