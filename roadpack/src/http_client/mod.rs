//! Clients for a remote blob store and metadata index.
//!
//! This module provides HTTP implementations of the
//! [`crate::storage::BlobStore`] and [`crate::storage::MetadataIndex`]
//! traits, so the feed workflow runs unchanged against a local database or
//! a gateway on another machine.

pub mod http;

pub use http::{ClientError, HttpBlobStore, HttpMetadataIndex, UploadResponse};
