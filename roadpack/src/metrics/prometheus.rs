//! Prometheus-backed metrics and HTTP exporter.
//!
//! This module defines a [`MetricsRegistry`] that owns a Prometheus
//! registry and a set of strongly-typed pack metrics, and an async HTTP
//! exporter that serves `/metrics` using `hyper`.

use std::{convert::Infallible, net::SocketAddr, sync::Arc};

use bytes::Bytes;
use http_body_util::Full;
use hyper::{
    Method, Request, Response, StatusCode, body::Incoming, header, server::conn::http1,
    service::service_fn,
};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tracing::{error, warn};

use prometheus::{self, Encoder, Histogram, HistogramOpts, IntCounter, Opts, Registry, TextEncoder};

/// Pack-related Prometheus metrics.
///
/// Handles are cheap to clone and can be shared by the builder, the
/// verifier and the gateway.
#[derive(Clone)]
pub struct PackMetrics {
    /// Packs built successfully.
    pub packs_built: IntCounter,
    /// Time to build and encode a pack, in seconds.
    pub pack_build_seconds: Histogram,
    /// Verification runs completed.
    pub packs_verified: IntCounter,
    /// Time to verify a whole pack, in seconds.
    pub pack_verify_seconds: Histogram,
    pub reports_accepted: IntCounter,
    pub reports_rejected_signature: IntCounter,
    pub reports_rejected_image: IntCounter,
    pub reports_duplicate: IntCounter,
    /// Manifest entries that could not be read as reports.
    pub reports_malformed: IntCounter,
    /// Archives whose recomputed hash differed from the claimed one.
    pub archive_hash_mismatches: IntCounter,
}

fn counter(registry: &Registry, name: &str, help: &str) -> Result<IntCounter, prometheus::Error> {
    let c = IntCounter::with_opts(Opts::new(name, help))?;
    registry.register(Box::new(c.clone()))?;
    Ok(c)
}

fn seconds_histogram(
    registry: &Registry,
    name: &str,
    help: &str,
) -> Result<Histogram, prometheus::Error> {
    let h = Histogram::with_opts(HistogramOpts::new(name, help).buckets(vec![
        0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
    ]))?;
    registry.register(Box::new(h.clone()))?;
    Ok(h)
}

impl PackMetrics {
    /// Registers pack metrics into the given `Registry`.
    pub fn register(registry: &Registry) -> Result<Self, prometheus::Error> {
        Ok(Self {
            packs_built: counter(registry, "packs_built", "Total number of packs built")?,
            pack_build_seconds: seconds_histogram(
                registry,
                "pack_build_seconds",
                "Time to build and encode a pack in seconds",
            )?,
            packs_verified: counter(registry, "packs_verified", "Total number of packs verified")?,
            pack_verify_seconds: seconds_histogram(
                registry,
                "pack_verify_seconds",
                "Time to verify all reports of a pack in seconds",
            )?,
            reports_accepted: counter(
                registry,
                "reports_accepted",
                "Reports that passed signature, image and dedup checks",
            )?,
            reports_rejected_signature: counter(
                registry,
                "reports_rejected_signature",
                "Reports whose signature did not verify",
            )?,
            reports_rejected_image: counter(
                registry,
                "reports_rejected_image",
                "Reports whose image was missing or did not match img_hash",
            )?,
            reports_duplicate: counter(
                registry,
                "reports_duplicate",
                "Reports flagged as resubmissions of an accepted (nullifier, ts) key",
            )?,
            reports_malformed: counter(
                registry,
                "reports_malformed",
                "Manifest entries that were not well-formed reports",
            )?,
            archive_hash_mismatches: counter(
                registry,
                "archive_hash_mismatches",
                "Archives whose hash differed from the externally claimed value",
            )?,
        })
    }
}

/// Wrapper around a Prometheus registry and the pack metrics.
///
/// This is the main handle you pass around. It can be wrapped in an
/// [`Arc`] and shared across threads/tasks.
#[derive(Clone)]
pub struct MetricsRegistry {
    registry: Registry,
    pub pack: PackMetrics,
}

impl MetricsRegistry {
    /// Creates a registry under the `roadpack` namespace and registers the
    /// pack metrics.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new_custom(Some("roadpack".to_string()), None)?;
        let pack = PackMetrics::register(&registry)?;
        Ok(Self { registry, pack })
    }

    /// Encodes all metrics in this registry into the Prometheus text format.
    pub fn gather_text(&self) -> String {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
            error!(error = %e, "failed to encode Prometheus metrics");
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

/// Runs an HTTP server that exposes Prometheus metrics.
///
/// The server listens on `addr` and serves `GET /metrics` with the
/// Prometheus text exposition format. All other paths return 404.
pub async fn run_prometheus_http_server(
    metrics: Arc<MetricsRegistry>,
    addr: SocketAddr,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let listener = TcpListener::bind(addr).await?;

    loop {
        let (stream, _) = listener.accept().await?;
        let io = TokioIo::new(stream);
        let metrics = metrics.clone();

        tokio::spawn(async move {
            let svc = service_fn(move |req| {
                let metrics = metrics.clone();
                handle_request(req, metrics)
            });

            if let Err(err) = http1::Builder::new().serve_connection(io, svc).await {
                warn!(error = %err, "prometheus HTTP connection error");
            }
        });
    }
}

fn text_response(status: StatusCode, content_type: &str, body: String) -> Response<Full<Bytes>> {
    let mut resp = Response::new(Full::new(Bytes::from(body)));
    *resp.status_mut() = status;
    if let Ok(value) = header::HeaderValue::from_str(content_type) {
        resp.headers_mut().insert(header::CONTENT_TYPE, value);
    }
    resp
}

async fn handle_request(
    req: Request<Incoming>,
    metrics: Arc<MetricsRegistry>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    match (req.method(), req.uri().path()) {
        (&Method::GET, "/metrics") => Ok(text_response(
            StatusCode::OK,
            "text/plain; version=0.0.4",
            metrics.gather_text(),
        )),
        _ => Ok(text_response(
            StatusCode::NOT_FOUND,
            "text/plain",
            "not found".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prometheus::Registry;

    #[test]
    fn pack_metrics_register_and_record() {
        let registry = Registry::new();
        let metrics = PackMetrics::register(&registry).expect("register metrics");

        metrics.packs_built.inc();
        metrics.pack_build_seconds.observe(0.012);
        metrics.reports_accepted.inc_by(3);
        metrics.reports_duplicate.inc();

        let metric_families = registry.gather();
        assert_eq!(metric_families.len(), 9);
        assert_eq!(metrics.reports_accepted.get(), 3);
    }

    #[test]
    fn registering_twice_into_one_registry_fails() {
        let registry = Registry::new();
        PackMetrics::register(&registry).expect("first registration");
        assert!(PackMetrics::register(&registry).is_err());
    }

    #[test]
    fn metrics_registry_gather_text_is_namespaced() {
        let registry = MetricsRegistry::new().expect("create metrics registry");
        registry.pack.pack_verify_seconds.observe(0.01);
        registry.pack.archive_hash_mismatches.inc();
        let text = registry.gather_text();
        assert!(text.contains("roadpack_pack_verify_seconds"));
        assert!(text.contains("roadpack_archive_hash_mismatches 1"));
    }
}
