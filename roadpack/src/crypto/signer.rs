//! Key pairs, signing, and the signature-check seam used by the verifier.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, PoisonError};

use ed25519_dalek::pkcs8::{DecodePrivateKey, EncodePrivateKey};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;

use crate::encoding::{TextError, from_base64url, to_base64url};
use crate::types::{PublicKeyText, SignatureText};

/// Length of a raw Ed25519 seed / private scalar.
const SEED_LEN: usize = 32;

/// Errors raised while importing key material.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyError {
    /// Key text is not valid base64url.
    Encoding(TextError),
    /// Private key bytes are neither PKCS#8 DER nor a raw 32-byte seed.
    InvalidPrivateKey(String),
    /// Public key bytes are not a valid curve point.
    InvalidPublicKey(String),
    /// PKCS#8 export failed.
    Export(String),
}

impl fmt::Display for KeyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyError::Encoding(e) => write!(f, "key encoding: {e}"),
            KeyError::InvalidPrivateKey(msg) => write!(f, "invalid private key: {msg}"),
            KeyError::InvalidPublicKey(msg) => write!(f, "invalid public key: {msg}"),
            KeyError::Export(msg) => write!(f, "cannot export private key: {msg}"),
        }
    }
}

impl std::error::Error for KeyError {}

impl From<TextError> for KeyError {
    fn from(e: TextError) -> Self {
        KeyError::Encoding(e)
    }
}

/// An Ed25519 signing key pair.
#[derive(Clone)]
pub struct KeyPair {
    signing: SigningKey,
}

impl KeyPair {
    /// Generates a fresh key pair from the OS RNG.
    pub fn generate() -> Self {
        Self {
            signing: SigningKey::generate(&mut OsRng),
        }
    }

    /// Builds a key pair from a raw 32-byte seed.
    pub fn from_seed(seed: &[u8; SEED_LEN]) -> Self {
        Self {
            signing: SigningKey::from_bytes(seed),
        }
    }

    /// Imports a private key from its text form.
    ///
    /// Accepts base64url PKCS#8 DER (the exported form) and, for
    /// convenience, a bare base64url 32-byte seed.
    pub fn from_private_key_text(text: &str) -> Result<Self, KeyError> {
        let bytes = from_base64url(text)?;
        if let Ok(signing) = SigningKey::from_pkcs8_der(&bytes) {
            return Ok(Self { signing });
        }
        let seed: [u8; SEED_LEN] = bytes.as_slice().try_into().map_err(|_| {
            KeyError::InvalidPrivateKey(format!(
                "expected PKCS#8 DER or a {SEED_LEN}-byte seed, got {} bytes",
                bytes.len()
            ))
        })?;
        Ok(Self::from_seed(&seed))
    }

    /// Base64url PKCS#8 DER encoding of the private key.
    pub fn private_key_text(&self) -> Result<String, KeyError> {
        let doc = self
            .signing
            .to_pkcs8_der()
            .map_err(|e| KeyError::Export(e.to_string()))?;
        Ok(to_base64url(doc.as_bytes()))
    }

    /// Raw 32-byte public key.
    pub fn public_key_bytes(&self) -> [u8; 32] {
        self.signing.verifying_key().to_bytes()
    }

    pub fn public_key_text(&self) -> PublicKeyText {
        PublicKeyText(to_base64url(&self.public_key_bytes()))
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing.verifying_key()
    }

    /// Signs `message` and returns the base64url signature.
    pub fn sign(&self, message: &[u8]) -> SignatureText {
        let sig: Signature = self.signing.sign(message);
        SignatureText(to_base64url(&sig.to_bytes()))
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("public_key", &self.public_key_text())
            .field("private_key", &"<redacted>")
            .finish()
    }
}

/// Parses a base64url public key into a verifying key.
pub fn parse_public_key(text: &PublicKeyText) -> Result<VerifyingKey, KeyError> {
    let bytes = from_base64url(text.as_str())?;
    let raw: [u8; 32] = bytes.as_slice().try_into().map_err(|_| {
        KeyError::InvalidPublicKey(format!("expected 32 bytes, got {}", bytes.len()))
    })?;
    VerifyingKey::from_bytes(&raw).map_err(|e| KeyError::InvalidPublicKey(e.to_string()))
}

fn parse_signature(text: &str) -> Option<Signature> {
    let bytes = from_base64url(text).ok()?;
    Signature::from_slice(&bytes).ok()
}

/// Verifies `signature` over `message` with an already parsed key.
pub fn verify_with_key(key: &VerifyingKey, signature: &str, message: &[u8]) -> bool {
    match parse_signature(signature) {
        Some(sig) => key.verify(message, &sig).is_ok(),
        None => false,
    }
}

/// Verifies `signature` over `message` under `public_key`.
///
/// Returns `false` for any malformed input instead of an error.
pub fn verify(public_key: &PublicKeyText, signature: &SignatureText, message: &[u8]) -> bool {
    match parse_public_key(public_key) {
        Ok(key) => verify_with_key(&key, signature.as_str(), message),
        Err(_) => false,
    }
}

/// Caller-supplied public-key resolution callback used by the pack
/// verifier: `(public key text, signature text, canonical bytes) -> ok`.
pub trait SignatureCheck: Send + Sync {
    fn check(&self, public_key: &str, signature: &str, canonical: &[u8]) -> bool;
}

impl<F> SignatureCheck for F
where
    F: Fn(&str, &str, &[u8]) -> bool + Send + Sync,
{
    fn check(&self, public_key: &str, signature: &str, canonical: &[u8]) -> bool {
        self(public_key, signature, canonical)
    }
}

/// [`SignatureCheck`] that caches parsed verifying keys, so a run over
/// many reports from the same few devices decodes each key once.
#[derive(Default)]
pub struct CachedKeyVerifier {
    keys: Mutex<HashMap<String, VerifyingKey>>,
}

impl CachedKeyVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct keys currently cached.
    pub fn cached_keys(&self) -> usize {
        self.keys
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn resolve(&self, public_key: &str) -> Option<VerifyingKey> {
        let mut keys = self.keys.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(key) = keys.get(public_key) {
            return Some(*key);
        }
        let key = parse_public_key(&PublicKeyText::from(public_key)).ok()?;
        keys.insert(public_key.to_string(), key);
        Some(key)
    }
}

impl SignatureCheck for CachedKeyVerifier {
    fn check(&self, public_key: &str, signature: &str, canonical: &[u8]) -> bool {
        match self.resolve(public_key) {
            Some(key) => verify_with_key(&key, signature, canonical),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_then_verify_succeeds() {
        let kp = KeyPair::generate();
        let sig = kp.sign(b"canonical bytes");
        assert!(verify(&kp.public_key_text(), &sig, b"canonical bytes"));
    }

    #[test]
    fn flipping_any_message_byte_breaks_the_signature() {
        let kp = KeyPair::generate();
        let message = br#"{"media":{},"payload":{"lat":1}}"#.to_vec();
        let sig = kp.sign(&message);

        for i in 0..message.len() {
            let mut tampered = message.clone();
            tampered[i] ^= 0x01;
            assert!(
                !verify(&kp.public_key_text(), &sig, &tampered),
                "byte {i} flip should invalidate"
            );
        }
    }

    #[test]
    fn wrong_key_does_not_verify() {
        let signer = KeyPair::generate();
        let other = KeyPair::generate();
        let sig = signer.sign(b"msg");
        assert!(!verify(&other.public_key_text(), &sig, b"msg"));
    }

    #[test]
    fn malformed_inputs_yield_false() {
        let kp = KeyPair::generate();
        let sig = kp.sign(b"msg");
        assert!(!verify(&PublicKeyText::from("not base64 !!"), &sig, b"msg"));
        assert!(!verify(&PublicKeyText::from("AAAA"), &sig, b"msg"));
        assert!(!verify(&kp.public_key_text(), &SignatureText::from("short"), b"msg"));
        assert!(!verify(&kp.public_key_text(), &SignatureText::from(""), b"msg"));
    }

    #[test]
    fn public_key_text_is_32_raw_bytes() {
        let kp = KeyPair::generate();
        let raw = from_base64url(kp.public_key_text().as_str()).unwrap();
        assert_eq!(raw.len(), 32);
    }

    #[test]
    fn private_key_roundtrips_through_pkcs8_text() {
        let kp = KeyPair::generate();
        let text = kp.private_key_text().unwrap();
        let back = KeyPair::from_private_key_text(&text).unwrap();
        assert_eq!(back.public_key_text(), kp.public_key_text());
    }

    #[test]
    fn private_key_import_accepts_raw_seed() {
        let seed = [9u8; 32];
        let text = to_base64url(&seed);
        let kp = KeyPair::from_private_key_text(&text).unwrap();
        assert_eq!(kp.public_key_text(), KeyPair::from_seed(&seed).public_key_text());
    }

    #[test]
    fn private_key_import_rejects_garbage() {
        let err = KeyPair::from_private_key_text(&to_base64url(&[1, 2, 3])).unwrap_err();
        assert!(matches!(err, KeyError::InvalidPrivateKey(_)));
    }

    #[test]
    fn debug_output_redacts_private_key() {
        let kp = KeyPair::generate();
        let text = kp.private_key_text().unwrap();
        let dbg = format!("{kp:?}");
        assert!(dbg.contains("<redacted>"));
        assert!(!dbg.contains(&text));
    }

    #[test]
    fn cached_verifier_parses_each_key_once() {
        let kp = KeyPair::generate();
        let pk = kp.public_key_text();
        let verifier = CachedKeyVerifier::new();

        for msg in [b"one".as_slice(), b"two", b"three"] {
            let sig = kp.sign(msg);
            assert!(verifier.check(pk.as_str(), sig.as_str(), msg));
        }
        assert_eq!(verifier.cached_keys(), 1);
        assert!(!verifier.check("bogus", "sig", b"one"));
        assert_eq!(verifier.cached_keys(), 1);
    }

    #[test]
    fn closures_are_signature_checks() {
        let always = |_: &str, _: &str, _: &[u8]| true;
        assert!(always.check("pk", "sig", b""));
    }
}
