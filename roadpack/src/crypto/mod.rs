//! Ed25519 signing and verification.
//!
//! Keys and signatures cross every boundary as URL-safe base64 text; this
//! module is the only place that parses them back into curve points. The
//! verification entry points never fail loudly: a malformed key or
//! signature simply does not verify.

pub mod signer;

pub use signer::{
    CachedKeyVerifier, KeyError, KeyPair, SignatureCheck, parse_public_key, verify,
    verify_with_key,
};
