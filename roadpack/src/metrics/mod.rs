//! Metrics and instrumentation.
//!
//! This module defines Prometheus-compatible metrics for pack building and
//! verification and exposes a small HTTP exporter that serves `/metrics`
//! in Prometheus text format.
//!
//! ```ignore
//! use std::sync::Arc;
//! use roadpack::metrics::{MetricsRegistry, run_prometheus_http_server};
//!
//! let registry = Arc::new(MetricsRegistry::new()?);
//! tokio::spawn(run_prometheus_http_server(registry.clone(), "127.0.0.1:9898".parse()?));
//!
//! let verifier = PackVerifier::new(CachedKeyVerifier::new())
//!     .with_metrics(registry.pack.clone());
//! ```

pub mod prometheus;

pub use prometheus::{MetricsRegistry, PackMetrics, run_prometheus_http_server};
