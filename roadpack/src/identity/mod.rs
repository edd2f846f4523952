//! Pseudonymous device identities.
//!
//! An [`Identity`] couples a long-lived Ed25519 key pair with a 32-byte
//! recovery secret. The key pair signs reports; the secret only feeds the
//! daily [`nullifier`]. The pseudonym (`anonId`) is always recomputed from
//! the public key.
//!
//! [`IdentityManager`] owns persistence. It does not act as a global: the
//! caller receives an [`Identity`] value and passes it explicitly to
//! whatever needs to sign.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::crypto::{KeyError, KeyPair};
use crate::encoding::{from_base58, from_base64url, to_base58};
use crate::storage::{IdentityStore, StorageError};
use crate::types::{AnonId, PublicKeyText, SignatureText};

pub mod nullifier;

pub use nullifier::{date_key, derive_nullifier, nullifier_from_secret, today_key};

/// Bundle format version written by [`IdentityManager::export`].
pub const BUNDLE_VERSION: &str = "1";

/// Length of a freshly generated recovery secret.
pub const RECOVERY_SECRET_LEN: usize = 32;

/// Errors raised by identity management.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityError {
    /// No identity has been created or imported yet.
    NoIdentity,
    /// Bundle is not valid JSON or not an object.
    Malformed(String),
    /// A required bundle field is absent or empty.
    MissingField(&'static str),
    /// Key material could not be decoded.
    Key(KeyError),
    /// The private key does not belong to the supplied public key.
    KeyMismatch,
    /// Recovery secret is absent.
    MissingRecoverySecret,
    /// Recovery secret text is not base58.
    InvalidRecoverySecret(String),
    /// Date key is not `YYYY-MM-DD`.
    InvalidDateKey(String),
    /// Identity persistence failed.
    Storage(String),
}

impl fmt::Display for IdentityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdentityError::NoIdentity => write!(f, "no identity exists yet"),
            IdentityError::Malformed(msg) => write!(f, "malformed identity bundle: {msg}"),
            IdentityError::MissingField(name) => {
                write!(f, "identity bundle is missing required field `{name}`")
            }
            IdentityError::Key(e) => write!(f, "identity key: {e}"),
            IdentityError::KeyMismatch => {
                write!(f, "private key does not match the bundle public key")
            }
            IdentityError::MissingRecoverySecret => write!(f, "identity has no recovery secret"),
            IdentityError::InvalidRecoverySecret(msg) => {
                write!(f, "invalid recovery secret: {msg}")
            }
            IdentityError::InvalidDateKey(msg) => write!(f, "invalid date key: {msg}"),
            IdentityError::Storage(msg) => write!(f, "identity storage: {msg}"),
        }
    }
}

impl std::error::Error for IdentityError {}

impl From<KeyError> for IdentityError {
    fn from(e: KeyError) -> Self {
        IdentityError::Key(e)
    }
}

impl From<StorageError> for IdentityError {
    fn from(e: StorageError) -> Self {
        IdentityError::Storage(e.to_string())
    }
}

/// Serialized identity as exported for backup and persisted at rest.
///
/// Every field is optional on input so that a missing one can be
/// reported by name.
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityBundle {
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub public_key: Option<String>,
    #[serde(default)]
    pub private_key: Option<String>,
    #[serde(default)]
    pub recovery_secret: Option<String>,
    /// Informational only; always re-derived on import.
    #[serde(default)]
    pub anon_id: Option<String>,
}

impl fmt::Debug for IdentityBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityBundle")
            .field("version", &self.version)
            .field("public_key", &self.public_key)
            .field("anon_id", &self.anon_id)
            .finish_non_exhaustive()
    }
}

fn required<'a>(field: &'a Option<String>, name: &'static str) -> Result<&'a str, IdentityError> {
    match field.as_deref().map(str::trim) {
        Some(value) if !value.is_empty() => Ok(value),
        _ => Err(IdentityError::MissingField(name)),
    }
}

/// An active identity.
#[derive(Clone)]
pub struct Identity {
    keys: KeyPair,
    public_key: PublicKeyText,
    recovery_secret: Vec<u8>,
    anon_id: AnonId,
}

impl Identity {
    /// Generates a fresh key pair and recovery secret.
    pub fn generate() -> Self {
        use rand::RngCore;

        let mut secret = vec![0u8; RECOVERY_SECRET_LEN];
        rand::rngs::OsRng.fill_bytes(&mut secret);
        Self::from_parts(KeyPair::generate(), secret)
    }

    /// Assembles an identity, deriving its public key text and pseudonym.
    pub fn from_parts(keys: KeyPair, recovery_secret: Vec<u8>) -> Self {
        let public_key = keys.public_key_text();
        let anon_id = AnonId::from_public_key(&keys.public_key_bytes());
        Self {
            keys,
            public_key,
            recovery_secret,
            anon_id,
        }
    }

    /// Validates a bundle and builds the identity it describes.
    ///
    /// `publicKey`, `privateKey` and `recoverySecret` are required. The
    /// private key must belong to the public key. A supplied `anonId` is
    /// ignored in favour of the one derived from the public key.
    pub fn from_bundle(bundle: &IdentityBundle) -> Result<Self, IdentityError> {
        let public_key = required(&bundle.public_key, "publicKey")?;
        let private_key = required(&bundle.private_key, "privateKey")?;
        let recovery_secret = required(&bundle.recovery_secret, "recoverySecret")?;

        let keys = KeyPair::from_private_key_text(private_key)?;
        let claimed = from_base64url(public_key).map_err(KeyError::from)?;
        if claimed.as_slice() != keys.public_key_bytes().as_slice() {
            return Err(IdentityError::KeyMismatch);
        }

        let secret = from_base58(recovery_secret)
            .map_err(|e| IdentityError::InvalidRecoverySecret(e.to_string()))?;
        if secret.is_empty() {
            return Err(IdentityError::MissingRecoverySecret);
        }

        let identity = Self::from_parts(keys, secret);
        if let Some(claimed_anon) = bundle.anon_id.as_deref() {
            if claimed_anon != identity.anon_id.as_str() {
                warn!(
                    claimed = claimed_anon,
                    derived = %identity.anon_id,
                    "bundle anonId does not match public key; using derived value"
                );
            }
        }
        Ok(identity)
    }

    /// Full bundle, including private key material.
    pub fn to_bundle(&self) -> Result<IdentityBundle, IdentityError> {
        Ok(IdentityBundle {
            version: Some(BUNDLE_VERSION.to_string()),
            public_key: Some(self.public_key.0.clone()),
            private_key: Some(self.keys.private_key_text()?),
            recovery_secret: Some(to_base58(&self.recovery_secret)),
            anon_id: Some(self.anon_id.0.clone()),
        })
    }

    pub fn public_key(&self) -> &PublicKeyText {
        &self.public_key
    }

    pub fn anon_id(&self) -> &AnonId {
        &self.anon_id
    }

    pub fn recovery_secret(&self) -> &[u8] {
        &self.recovery_secret
    }

    pub fn keys(&self) -> &KeyPair {
        &self.keys
    }

    /// Signs `message` with the identity's private key.
    pub fn sign(&self, message: &[u8]) -> SignatureText {
        self.keys.sign(message)
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("public_key", &self.public_key)
            .field("anon_id", &self.anon_id)
            .field("private_key", &"<redacted>")
            .field("recovery_secret", &"<redacted>")
            .finish()
    }
}

fn encode_bundle(identity: &Identity) -> Result<Vec<u8>, IdentityError> {
    serde_json::to_vec(&identity.to_bundle()?).map_err(|e| IdentityError::Malformed(e.to_string()))
}

fn decode_bundle(bytes: &[u8]) -> Result<IdentityBundle, IdentityError> {
    serde_json::from_slice(bytes).map_err(|e| IdentityError::Malformed(e.to_string()))
}

/// Creates, caches, exports and imports the device identity.
pub struct IdentityManager<S> {
    store: S,
    cached: Option<Identity>,
}

impl<S> IdentityManager<S>
where
    S: IdentityStore,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cached: None,
        }
    }

    /// Returns the persisted identity, creating and persisting one first if
    /// none exists. Repeated calls return the same identity.
    ///
    /// A persisted bundle that fails validation is reported as an error
    /// rather than silently replaced.
    pub fn create_or_load(&mut self) -> Result<Identity, IdentityError> {
        if let Some(identity) = &self.cached {
            return Ok(identity.clone());
        }

        let identity = match self.store.load()? {
            Some(bytes) => Identity::from_bundle(&decode_bundle(&bytes)?)?,
            None => {
                let identity = Identity::generate();
                self.store.save(&encode_bundle(&identity)?)?;
                info!(anon_id = %identity.anon_id, "created new identity");
                identity
            }
        };

        self.cached = Some(identity.clone());
        Ok(identity)
    }

    /// Serializes the full identity for backup.
    ///
    /// Fails with [`IdentityError::NoIdentity`] if none was ever created.
    pub fn export(&mut self) -> Result<Vec<u8>, IdentityError> {
        if self.cached.is_none() {
            let Some(bytes) = self.store.load()? else {
                return Err(IdentityError::NoIdentity);
            };
            self.cached = Some(Identity::from_bundle(&decode_bundle(&bytes)?)?);
        }
        match &self.cached {
            Some(identity) => encode_bundle(identity),
            None => Err(IdentityError::NoIdentity),
        }
    }

    /// Validates `bytes` and replaces the active identity with it.
    pub fn import(&mut self, bytes: &[u8]) -> Result<Identity, IdentityError> {
        let identity = Identity::from_bundle(&decode_bundle(bytes)?)?;
        self.store.save(&encode_bundle(&identity)?)?;
        info!(anon_id = %identity.anon_id, "imported identity");
        self.cached = Some(identity.clone());
        Ok(identity)
    }

    /// The cached identity, if one has been loaded.
    pub fn current(&self) -> Option<&Identity> {
        self.cached.as_ref()
    }

    pub fn store(&self) -> &S {
        &self.store
    }
}
