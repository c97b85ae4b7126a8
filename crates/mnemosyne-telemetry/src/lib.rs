//! Observability for Mnemosyne.
//!
//! - **Logging**: `tracing-subscriber` with JSON or pretty output
//! - **Metrics**: Prometheus exposition via the `metrics` crate
//!
//! # Example
//!
//! ```rust,no_run
//! use mnemosyne_telemetry::{init_telemetry, LogConfig, MetricsConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     init_telemetry(&LogConfig::production(), &MetricsConfig::default())
//!         .expect("telemetry");
//! }
//! ```

#![doc(html_root_url = "https://docs.rs/mnemosyne-telemetry/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod error;
pub mod logging;
pub mod metrics;

pub use error::TelemetryError;
pub use logging::{init_logging, LogConfig};
pub use metrics::{
    init_metrics, outcome, record_idempotency_outcome, record_request, record_store_error,
    render_metrics, InFlightGuard, MetricsConfig,
};

/// Result type for telemetry operations.
pub type TelemetryResult<T> = Result<T, TelemetryError>;

/// Installs logging, then metrics.
///
/// # Errors
///
/// Returns the first initialization failure.
pub fn init_telemetry(log: &LogConfig, metrics: &MetricsConfig) -> TelemetryResult<()> {
    init_logging(log)?;
    init_metrics(metrics)?;
    Ok(())
}
