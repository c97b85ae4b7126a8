//! Error types for the Mnemosyne sidecar.

use http::StatusCode;
use mnemosyne_config::ConfigError;
use mnemosyne_core::StoreError;
use mnemosyne_telemetry::TelemetryError;
use thiserror::Error;

/// Sidecar-specific errors.
#[derive(Debug, Error)]
pub enum SidecarError {
    /// Configuration could not be loaded or validated.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A loaded setting cannot be turned into a runtime value.
    #[error("Invalid setting '{field}': {reason}")]
    InvalidSetting {
        /// Dotted path of the setting.
        field: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The idempotency store could not be built.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Logging or metrics could not be initialized.
    #[error("Telemetry error: {0}")]
    Telemetry(#[from] TelemetryError),

    /// The upstream service could not be reached or answered with a broken response.
    #[error("Upstream error: {message}")]
    Upstream {
        /// Error message.
        message: String,
        /// Whether the upstream timeout elapsed.
        timed_out: bool,
    },

    /// The request body could not be read before forwarding.
    #[error("Failed to read request body: {message}")]
    RequestBody {
        /// Error message.
        message: String,
    },

    /// Server startup error.
    #[error("Server error: {message}")]
    Server {
        /// Error message.
        message: String,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SidecarError {
    /// Create an invalid setting error.
    pub fn invalid_setting(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidSetting {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create an upstream error.
    pub fn upstream(message: impl Into<String>) -> Self {
        Self::Upstream {
            message: message.into(),
            timed_out: false,
        }
    }

    /// Create a server error.
    pub fn server(message: impl Into<String>) -> Self {
        Self::Server {
            message: message.into(),
        }
    }

    /// Get the HTTP status code for this error.
    #[allow(clippy::match_same_arms)]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Upstream { timed_out: true, .. } => StatusCode::GATEWAY_TIMEOUT,
            Self::Upstream { .. } => StatusCode::BAD_GATEWAY,
            Self::RequestBody { .. } => StatusCode::BAD_REQUEST,
            Self::Store(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Config(_)
            | Self::InvalidSetting { .. }
            | Self::Telemetry(_)
            | Self::Server { .. }
            | Self::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Machine-readable code used in JSON error bodies.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Upstream { timed_out: true, .. } => "UPSTREAM_TIMEOUT",
            Self::Upstream { .. } => "UPSTREAM_UNAVAILABLE",
            Self::RequestBody { .. } => "BODY_READ_FAILED",
            Self::Store(_) => "STORE_UNAVAILABLE",
            Self::Config(_) | Self::InvalidSetting { .. } => "CONFIGURATION_ERROR",
            Self::Telemetry(_) => "TELEMETRY_ERROR",
            Self::Server { .. } | Self::Io(_) => "INTERNAL_ERROR",
        }
    }
}

impl From<reqwest::Error> for SidecarError {
    fn from(err: reqwest::Error) -> Self {
        Self::Upstream {
            timed_out: err.is_timeout(),
            message: err.to_string(),
        }
    }
}

/// Result type for sidecar operations.
pub type SidecarResult<T> = Result<T, SidecarError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upstream_status() {
        let err = SidecarError::upstream("connection refused");
        assert_eq!(err.status_code(), StatusCode::BAD_GATEWAY);
        assert_eq!(err.error_code(), "UPSTREAM_UNAVAILABLE");

        let err = SidecarError::Upstream {
            message: "deadline elapsed".into(),
            timed_out: true,
        };
        assert_eq!(err.status_code(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(err.error_code(), "UPSTREAM_TIMEOUT");
    }

    #[test]
    fn test_error_display() {
        let err = SidecarError::invalid_setting("server.listen_addr", "invalid socket address");
        assert_eq!(
            err.to_string(),
            "Invalid setting 'server.listen_addr': invalid socket address"
        );
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);

        let err: SidecarError = StoreError::unavailable("redis", "connection refused").into();
        assert!(err.to_string().starts_with("Store error"));
        assert_eq!(err.error_code(), "STORE_UNAVAILABLE");
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::AddrInUse, "address in use");
        let err: SidecarError = io.into();
        assert!(matches!(err, SidecarError::Io(_)));
        assert_eq!(err.error_code(), "INTERNAL_ERROR");
    }
}
