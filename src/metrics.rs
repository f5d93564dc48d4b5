// src/metrics.rs
//
// Prometheus metrics for the migration run, plus the HTTP listener that
// exposes them. Per-object outcomes are recorded here and delegated to the
// progress tracker so both views stay consistent.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use bytes::Bytes;
use http_body_util::Full;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::constants::DURATION_BUCKETS;
use crate::progress::ProgressTracker;

const OBJECTS_TOTAL: &str = "migrate_objects_total";
const BYTES_TOTAL: &str = "migrate_bytes_total";
const INFLIGHT_WORKERS: &str = "migrate_inflight_workers";
const OBJECT_DURATION: &str = "migrate_object_duration_seconds";

/// HTTP body type for metrics responses
type Body = Full<Bytes>;

pub struct MetricsCollector {
    // None when another recorder is already installed in this process
    // (only happens under test); recording becomes a no-op then.
    handle: Option<PrometheusHandle>,
    tracker: Arc<ProgressTracker>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        let handle = PrometheusBuilder::new()
            .set_buckets_for_metric(Matcher::Full(OBJECT_DURATION.to_string()), DURATION_BUCKETS)
            .ok()
            .and_then(|builder| builder.install_recorder().ok());
        if handle.is_none() {
            debug!("prometheus recorder already installed, metrics recording disabled");
        }

        describe_counter!(OBJECTS_TOTAL, "Total number of objects processed");
        describe_counter!(BYTES_TOTAL, "Total bytes migrated");
        describe_gauge!(INFLIGHT_WORKERS, "Number of workers currently processing");
        describe_histogram!(OBJECT_DURATION, "Time taken to migrate an object");

        Self {
            handle,
            tracker: Arc::new(ProgressTracker::new()),
        }
    }

    pub fn tracker(&self) -> Arc<ProgressTracker> {
        self.tracker.clone()
    }

    pub fn set_total(&self, objects: u64, bytes: u64) {
        self.tracker.set_total(objects, bytes);
    }

    pub fn inc_success(&self, bytes: u64) {
        counter!(OBJECTS_TOTAL, "status" => "success").increment(1);
        counter!(BYTES_TOTAL).increment(bytes);
        self.tracker.add_success(bytes);
    }

    pub fn inc_failed(&self) {
        counter!(OBJECTS_TOTAL, "status" => "failed").increment(1);
        self.tracker.add_failed();
    }

    pub fn inc_skipped(&self, bytes: u64) {
        counter!(OBJECTS_TOTAL, "status" => "skipped").increment(1);
        self.tracker.add_skipped(bytes);
    }

    pub fn worker_busy(&self) {
        gauge!(INFLIGHT_WORKERS).increment(1.0);
    }

    pub fn worker_idle(&self) {
        gauge!(INFLIGHT_WORKERS).decrement(1.0);
    }

    pub fn observe_duration(&self, duration: Duration) {
        histogram!(OBJECT_DURATION).record(duration.as_secs_f64());
    }

    /// Serve `GET /metrics` until cancelled. Bind failures are reported to
    /// the caller; per-connection errors are only logged.
    pub async fn serve(&self, addr: SocketAddr, cancel: CancellationToken) -> Result<()> {
        let Some(handle) = self.handle.clone() else {
            warn!("metrics recorder unavailable, not starting metrics listener");
            return Ok(());
        };

        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind metrics listener on {addr}"))?;
        info!(addr = %addr, "metrics listener started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                accepted = listener.accept() => {
                    let (stream, _) = accepted.context("metrics listener accept failed")?;
                    let io = TokioIo::new(stream);
                    let handle = handle.clone();
                    tokio::spawn(async move {
                        let service = service_fn(move |req| {
                            let handle = handle.clone();
                            async move { handle_request(req, &handle) }
                        });
                        if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                            debug!("error serving metrics connection: {e}");
                        }
                    });
                }
            }
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

fn handle_request(
    req: Request<hyper::body::Incoming>,
    handle: &PrometheusHandle,
) -> std::result::Result<Response<Body>, std::convert::Infallible> {
    let response = match (req.method(), req.uri().path()) {
        (&Method::GET, "/metrics") => Response::builder()
            .status(StatusCode::OK)
            .header("content-type", "text/plain; version=0.0.4")
            .body(Full::new(Bytes::from(handle.render()))),
        _ => Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body(Full::new(Bytes::from("not found"))),
    };
    // the builder only fails on malformed headers, which are constant here
    Ok(response.unwrap_or_else(|_| Response::new(Full::new(Bytes::new()))))
}
