//! Prometheus metrics for Mnemosyne.
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `mnemosyne_idempotency_outcomes_total` | Counter | `outcome` | Gate decisions |
//! | `mnemosyne_store_errors_total` | Counter | `operation` | Failed store calls |
//! | `mnemosyne_requests_total` | Counter | `method`, `status` | Requests served by the sidecar |
//! | `mnemosyne_request_duration_seconds` | Histogram | `method` | Sidecar request latency |
//! | `mnemosyne_in_flight_requests` | Gauge | - | Requests currently being served |
//!
//! Every `record_*` function is a no-op until a recorder is installed, so
//! library code can call them unconditionally.

use crate::error::TelemetryError;
use crate::TelemetryResult;
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::sync::OnceLock;
use std::time::Duration;

/// Global metrics handle for rendering.
static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Outcome label values for `mnemosyne_idempotency_outcomes_total`.
pub mod outcome {
    /// Unseen key; a pending record was created and the handler ran.
    pub const CREATED: &str = "created";
    /// Settled record matched; the stored response was replayed.
    pub const REPLAYED: &str = "replayed";
    /// Record still pending.
    pub const CONFLICT: &str = "conflict";
    /// Key reused for a different target or body.
    pub const MISMATCH: &str = "mismatch";
    /// Request rejected before the store was consulted.
    pub const REJECTED: &str = "rejected";
    /// Store failure decided the response.
    pub const STORE_ERROR: &str = "store_error";
}

/// Metrics configuration.
#[derive(Debug, Clone)]
pub struct MetricsConfig {
    /// Whether metrics are enabled.
    pub enabled: bool,

    /// Address to expose metrics on (e.g., "0.0.0.0:9090").
    pub addr: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            addr: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Installs the Prometheus recorder and its scrape listener.
///
/// Must be called from within a Tokio runtime; the exporter runs as a task.
///
/// # Errors
///
/// Returns `TelemetryError::InvalidAddress` for an unparsable address and
/// `TelemetryError::MetricsInit` if a recorder is already installed.
pub fn init_metrics(config: &MetricsConfig) -> TelemetryResult<()> {
    if !config.enabled {
        return Ok(());
    }

    let addr: SocketAddr = config
        .addr
        .parse()
        .map_err(|e| TelemetryError::InvalidAddress(format!("{}: {e}", config.addr)))?;

    let handle = PrometheusBuilder::new()
        .with_http_listener(addr)
        .install_recorder()
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;

    let _ = METRICS_HANDLE.set(handle);

    register_metric_descriptions();
    tracing::info!(%addr, "prometheus exporter listening");

    Ok(())
}

/// Renders metrics in Prometheus format.
///
/// Returns `None` if metrics are not initialized.
#[must_use]
pub fn render_metrics() -> Option<String> {
    METRICS_HANDLE.get().map(PrometheusHandle::render)
}

fn register_metric_descriptions() {
    describe_counter!(
        "mnemosyne_idempotency_outcomes_total",
        "Idempotency gate decisions by outcome"
    );
    describe_counter!(
        "mnemosyne_store_errors_total",
        "Failed idempotency store calls by operation"
    );
    describe_counter!(
        "mnemosyne_requests_total",
        "Total number of HTTP requests served"
    );
    describe_histogram!(
        "mnemosyne_request_duration_seconds",
        "HTTP request duration in seconds"
    );
    describe_gauge!(
        "mnemosyne_in_flight_requests",
        "Number of HTTP requests currently being served"
    );
}

/// Records one gate decision. See [`outcome`] for label values.
pub fn record_idempotency_outcome(outcome: &'static str) {
    counter!("mnemosyne_idempotency_outcomes_total", "outcome" => outcome).increment(1);
}

/// Records a failed store call (`get`, `set`, `insert_if_absent`).
pub fn record_store_error(operation: &'static str) {
    counter!("mnemosyne_store_errors_total", "operation" => operation).increment(1);
}

/// Records a completed request.
pub fn record_request(method: &str, status_code: u16, duration: Duration) {
    counter!(
        "mnemosyne_requests_total",
        "method" => method.to_string(),
        "status" => status_code.to_string()
    )
    .increment(1);

    histogram!(
        "mnemosyne_request_duration_seconds",
        "method" => method.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Guard that holds one unit of the in-flight gauge until dropped.
pub struct InFlightGuard {
    _private: (),
}

impl InFlightGuard {
    /// Creates a new guard and increments the in-flight gauge.
    #[must_use]
    pub fn new() -> Self {
        gauge!("mnemosyne_in_flight_requests").increment(1.0);
        Self { _private: () }
    }
}

impl Default for InFlightGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        gauge!("mnemosyne_in_flight_requests").decrement(1.0);
    }
}
