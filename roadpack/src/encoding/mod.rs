//! Byte-level encodings shared by every layer of the protocol.
//!
//! - [`canonical`]: the deterministic JSON encoding that signatures are
//!   computed over. Every signer and verifier, in any language, must emit
//!   the same bytes for the same logical value.
//! - [`text`]: base58 and URL-safe base64 helpers for keys, hashes and
//!   pseudonyms.

pub mod canonical;
pub mod text;

pub use canonical::{CanonicalError, MAX_DEPTH, canonicalize, canonicalize_value};
pub use text::{TextError, from_base58, from_base64url, to_base58, to_base64url};
