//! Prometheus Metrics Definitions
//!
//! Defines all canvas metrics with appropriate labels and types.
//! Exposes a /metrics endpoint for Prometheus scraping.

use axum::{http::StatusCode, response::IntoResponse};
use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_gauge, register_histogram, register_histogram_vec, CounterVec,
    Encoder, Gauge, Histogram, HistogramVec, TextEncoder,
};

use crate::error::{ApiError, ApiResult};

/// HTTP request latency buckets (seconds)
/// Covers: 1ms, 5ms, 10ms, 25ms, 50ms, 100ms, 250ms, 500ms, 1s, 2.5s, 5s, 10s
const HTTP_LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.0, 2.5, 5.0, 10.0,
];

/// Placement latency buckets (seconds)
const PLACEMENT_LATENCY_BUCKETS: &[f64] =
    &[0.0005, 0.001, 0.0025, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 1.0];

/// Global metrics instance - initialized once at startup
pub static METRICS: Lazy<ApiResult<CanvasMetrics>> = Lazy::new(CanvasMetrics::new);

/// Container for all canvas metrics.
#[derive(Clone)]
pub struct CanvasMetrics {
    /// HTTP request counter - labels: method, path, status
    pub http_requests_total: CounterVec,

    /// HTTP request duration histogram - labels: method, path
    pub http_request_duration_seconds: HistogramVec,

    /// Placement attempts - labels: outcome (placed or a rejection reason)
    pub placements_total: CounterVec,

    /// End-to-end placement duration, admitted or not
    pub placement_duration_seconds: Histogram,

    /// Current live observer subscriptions
    pub observers: Gauge,

    /// Refused or dropped observers - labels: reason
    pub observer_rejections_total: CounterVec,

    /// Cells written at least once, as last seen by the controller
    pub cells_claimed: Gauge,
}

impl CanvasMetrics {
    /// Create and register all metrics with Prometheus.
    pub fn new() -> ApiResult<Self> {
        Ok(Self {
            http_requests_total: register_counter_vec!(
                "canvas_http_requests_total",
                "Total number of HTTP requests",
                &["method", "path", "status"]
            )
            .map_err(|e| ApiError::internal_error(format!("Failed to register http_requests_total: {}", e)))?,

            http_request_duration_seconds: register_histogram_vec!(
                "canvas_http_request_duration_seconds",
                "HTTP request duration in seconds",
                &["method", "path"],
                HTTP_LATENCY_BUCKETS.to_vec()
            )
            .map_err(|e| ApiError::internal_error(format!("Failed to register http_request_duration_seconds: {}", e)))?,

            placements_total: register_counter_vec!(
                "canvas_placements_total",
                "Placement attempts by outcome",
                &["outcome"]
            )
            .map_err(|e| ApiError::internal_error(format!("Failed to register placements_total: {}", e)))?,

            placement_duration_seconds: register_histogram!(
                "canvas_placement_duration_seconds",
                "Placement duration in seconds",
                PLACEMENT_LATENCY_BUCKETS.to_vec()
            )
            .map_err(|e| ApiError::internal_error(format!("Failed to register placement_duration_seconds: {}", e)))?,

            observers: register_gauge!(
                "canvas_observers",
                "Current number of live observer subscriptions"
            )
            .map_err(|e| ApiError::internal_error(format!("Failed to register observers: {}", e)))?,

            observer_rejections_total: register_counter_vec!(
                "canvas_observer_rejections_total",
                "Observers refused at subscribe time or dropped afterwards",
                &["reason"]
            )
            .map_err(|e| ApiError::internal_error(format!("Failed to register observer_rejections_total: {}", e)))?,

            cells_claimed: register_gauge!(
                "canvas_cells_claimed",
                "Number of cells written at least once"
            )
            .map_err(|e| ApiError::internal_error(format!("Failed to register cells_claimed: {}", e)))?,
        })
    }

    /// Record an HTTP request.
    pub fn record_http_request(&self, method: &str, path: &str, status: u16, duration_secs: f64) {
        let status_str = status.to_string();
        self.http_requests_total
            .with_label_values(&[method, path, &status_str])
            .inc();
        self.http_request_duration_seconds
            .with_label_values(&[method, path])
            .observe(duration_secs);
    }

    /// Record one placement attempt.
    pub fn record_placement(&self, outcome: &str, duration_secs: f64) {
        self.placements_total.with_label_values(&[outcome]).inc();
        self.placement_duration_seconds.observe(duration_secs);
    }

    /// Set the live observer count.
    pub fn set_observers(&self, count: usize) {
        self.observers.set(count as f64);
    }

    /// Record a refused or dropped observer.
    pub fn record_observer_rejection(&self, reason: &str) {
        self.observer_rejections_total
            .with_label_values(&[reason])
            .inc();
    }

    pub fn set_cells_claimed(&self, count: u64) {
        self.cells_claimed.set(count as f64);
    }
}

/// Run `f` against the global metrics if they registered.
pub fn with_metrics(f: impl FnOnce(&CanvasMetrics)) {
    if let Ok(metrics) = METRICS.as_ref() {
        f(metrics);
    }
}

/// Handler for GET /metrics endpoint.
///
/// Returns Prometheus text format metrics.
#[utoipa::path(
    get,
    path = "/metrics",
    tag = "Observability",
    responses(
        (status = 200, description = "Prometheus metrics in text format", content_type = "text/plain"),
        (status = 500, description = "Failed to encode metrics"),
    ),
)]
pub async fn metrics_handler() -> impl IntoResponse {
    // Register the canvas collectors before gathering.
    Lazy::force(&METRICS);

    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    match encoder.encode(&metric_families, &mut buffer) {
        Ok(_) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            buffer,
        ),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [("content-type", "text/plain")],
                format!("Failed to encode metrics: {}", e).into_bytes(),
            )
        }
    }
}
