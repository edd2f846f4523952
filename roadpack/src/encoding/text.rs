//! Text encodings for binary material.
//!
//! Keys, signatures and content hashes travel as URL-safe base64 without
//! padding. Pseudonyms and the recovery secret use base58 (Bitcoin
//! alphabet) so they survive copy/paste and contain no ambiguous glyphs.

use std::fmt;

use base64::Engine;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, general_purpose};

/// URL-safe base64 that never emits padding but tolerates it on input.
const URL_SAFE_LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    general_purpose::NO_PAD.with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Error returned when a text-encoded value cannot be decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TextError {
    /// Input is not valid URL-safe base64.
    Base64(String),
    /// Input is not valid base58.
    Base58(String),
}

impl fmt::Display for TextError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TextError::Base64(msg) => write!(f, "invalid base64url text: {msg}"),
            TextError::Base58(msg) => write!(f, "invalid base58 text: {msg}"),
        }
    }
}

impl std::error::Error for TextError {}

/// Encodes `bytes` as URL-safe base64 without padding.
pub fn to_base64url(bytes: &[u8]) -> String {
    URL_SAFE_LENIENT.encode(bytes)
}

/// Decodes URL-safe base64, with or without trailing `=` padding.
pub fn from_base64url(text: &str) -> Result<Vec<u8>, TextError> {
    URL_SAFE_LENIENT
        .decode(text.trim())
        .map_err(|e| TextError::Base64(e.to_string()))
}

/// Encodes `bytes` as base58. Leading zero bytes become leading `1`s.
pub fn to_base58(bytes: &[u8]) -> String {
    bs58::encode(bytes).into_string()
}

/// Decodes base58 text produced by [`to_base58`].
pub fn from_base58(text: &str) -> Result<Vec<u8>, TextError> {
    bs58::decode(text.trim())
        .into_vec()
        .map_err(|e| TextError::Base58(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base64url_uses_url_safe_alphabet_without_padding() {
        // 0xfb 0xff encodes to "+/8=" in standard base64.
        let text = to_base64url(&[0xfb, 0xff]);
        assert_eq!(text, "-_8");
        assert!(!text.contains('='));
    }

    #[test]
    fn base64url_decode_accepts_padded_and_unpadded() {
        assert_eq!(from_base64url("-_8").unwrap(), vec![0xfb, 0xff]);
        assert_eq!(from_base64url("-_8=").unwrap(), vec![0xfb, 0xff]);
    }

    #[test]
    fn base64url_rejects_standard_alphabet() {
        let err = from_base64url("+/8").unwrap_err();
        assert!(matches!(err, TextError::Base64(_)));
    }

    #[test]
    fn base58_preserves_leading_zero_bytes() {
        let bytes = [0u8, 0, 1, 2, 3];
        let text = to_base58(&bytes);
        assert!(text.starts_with("11"));
        assert_eq!(from_base58(&text).unwrap(), bytes);
    }

    #[test]
    fn base58_rejects_ambiguous_characters() {
        // '0', 'O', 'I' and 'l' are not part of the alphabet.
        for bad in ["0abc", "Oabc", "Iabc", "labc"] {
            assert!(from_base58(bad).is_err(), "{bad} should be rejected");
        }
    }

    #[test]
    fn empty_input_encodes_to_empty_text() {
        assert_eq!(to_base58(&[]), "");
        assert_eq!(to_base64url(&[]), "");
        assert!(from_base58("").unwrap().is_empty());
    }
}
