//! Roadpack library crate.
//!
//! This crate provides the building blocks for signed road-hazard reports
//! and the packs they travel in:
//!
//! - strongly-typed domain types (`types`),
//! - canonical JSON and text encodings (`encoding`),
//! - Ed25519 signing and verification (`crypto`),
//! - the device identity and its daily nullifier (`identity`),
//! - report assembly (`report`),
//! - pack building, verification and the dedup ledger (`pack`),
//! - publishing to and importing from a blob store + index (`feed`),
//! - storage backends (`storage`) and HTTP clients (`http_client`),
//! - Prometheus-based metrics (`metrics`),
//! - and a top-level configuration (`config`).

pub mod config;
pub mod crypto;
pub mod encoding;
pub mod feed;
pub mod http_client;
pub mod identity;
pub mod metrics;
pub mod pack;
pub mod report;
pub mod storage;
pub mod types;

// Re-export top-level configuration types.
pub use config::{BlobClientConfig, MetricsConfig, PackConfig, RoadpackConfig, VerifyConfig};

pub use crypto::{CachedKeyVerifier, KeyError, KeyPair, SignatureCheck};
pub use identity::{Identity, IdentityBundle, IdentityError, IdentityManager};
pub use report::{AssembleError, Observation, ReportAssembler};

pub use pack::{
    BuiltPack, DedupKey, DedupLedger, InMemoryDedupLedger, PackBuilder, PackError,
    PackVerification, PackVerifier, RejectReason, ReportVerdict, VerificationSummary,
};
pub use feed::{
    FeedError, ImportOutcome, PublishReceipt, import_feed, import_pack, publish_built,
    publish_pack, report_path, save_accepted,
};

// Re-export storage backends and contracts.
pub use storage::{
    BlobStore, IdentityStore, InMemoryStore, MetadataIndex, RocksDbConfig, RocksDbStore,
    StorageError,
};
pub use http_client::{ClientError, HttpBlobStore, HttpMetadataIndex};

pub use metrics::{MetricsRegistry, PackMetrics, run_prometheus_http_server};

// Re-export domain types at the crate root for convenience.
pub use types::*;

/// Type alias for the verifier a typical node runs: Ed25519 with a
/// per-key parse cache.
pub type DefaultPackVerifier = PackVerifier<CachedKeyVerifier>;

/// Type alias for the default local store.
pub type DefaultStore = RocksDbStore;
