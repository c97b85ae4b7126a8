//! Configuration schema types.
//!
//! This module defines the structure of all configuration sections.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Server configuration section.
///
/// # Example
///
/// ```
/// use mnemosyne_config::ServerConfig;
/// use std::time::Duration;
///
/// let config = ServerConfig {
///     listen_addr: "127.0.0.1:8080".to_string(),
///     shutdown_timeout: Duration::from_secs(10),
/// };
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// Bind address of the proxy listener.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// How long in-flight connections may drain after shutdown is requested.
    #[serde(default = "default_shutdown_timeout", with = "crate::duration")]
    pub shutdown_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            shutdown_timeout: default_shutdown_timeout(),
        }
    }
}

fn default_listen_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_shutdown_timeout() -> Duration {
    Duration::from_secs(30)
}

/// Upstream service the sidecar forwards to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct UpstreamConfig {
    /// Base URL of the upstream service.
    #[serde(default = "default_upstream_url")]
    pub url: String,

    /// Per-request timeout for upstream calls.
    #[serde(default = "default_upstream_timeout", with = "crate::duration")]
    pub timeout: Duration,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            url: default_upstream_url(),
            timeout: default_upstream_timeout(),
        }
    }
}

fn default_upstream_url() -> String {
    "http://127.0.0.1:3000".to_string()
}

fn default_upstream_timeout() -> Duration {
    Duration::from_secs(30)
}

/// Record store backend.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    /// In-process map; records do not survive restarts or span replicas.
    #[default]
    Memory,
    /// Redis, shared by every replica pointing at the same deployment.
    Redis,
}

/// What the gate does when the store cannot be read.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum OnReadError {
    /// Treat the key as unseen and run the handler.
    #[default]
    FailOpen,
    /// Answer `503 Service Unavailable`.
    FailClosed,
}

/// Idempotency gate configuration section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct IdempotencyConfig {
    /// Request header carrying the idempotency key.
    #[serde(default = "default_header_name")]
    pub header_name: String,

    /// How long a record is retained after its last write.
    #[serde(default = "default_ttl", with = "crate::duration")]
    pub ttl: Duration,

    /// Store backend.
    #[serde(default)]
    pub backend: StoreBackend,

    /// Redis connection URL (required when `backend = "redis"`).
    #[serde(default)]
    pub redis_url: Option<String>,

    /// Prefix prepended to every key in the Redis backend.
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Longest accepted idempotency key, in bytes.
    #[serde(default = "default_max_key_len")]
    pub max_key_len: usize,

    /// Largest request body the gate buffers, in bytes.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,

    /// Behavior when the store cannot be read.
    #[serde(default)]
    pub on_read_error: OnReadError,
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        Self {
            header_name: default_header_name(),
            ttl: default_ttl(),
            backend: StoreBackend::default(),
            redis_url: None,
            key_prefix: default_key_prefix(),
            max_key_len: default_max_key_len(),
            max_body_bytes: default_max_body_bytes(),
            on_read_error: OnReadError::default(),
        }
    }
}

fn default_header_name() -> String {
    "Idempotency-Key".to_string()
}

fn default_ttl() -> Duration {
    Duration::from_secs(24 * 60 * 60)
}

fn default_key_prefix() -> String {
    "idempotency:".to_string()
}

fn default_max_key_len() -> usize {
    255
}

fn default_max_body_bytes() -> usize {
    10 * 1024 * 1024 // 10MB
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct MetricsConfig {
    /// Enable the Prometheus exporter.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Prometheus scrape endpoint address.
    #[serde(default = "default_metrics_addr")]
    pub addr: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            addr: default_metrics_addr(),
        }
    }
}

fn default_metrics_addr() -> String {
    "0.0.0.0:9090".to_string()
}

/// Log format.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// JSON formatted logs (production).
    #[default]
    Json,
    /// Human-readable pretty format (development).
    Pretty,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Enable logging.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Log level or filter directive (e.g. `info`, `mnemosyne_middleware=debug`).
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log output format.
    #[serde(default)]
    pub format: LogFormat,

    /// Include ANSI color codes in output.
    #[serde(default)]
    pub ansi_enabled: bool,

    /// Include source file and line in logs.
    #[serde(default)]
    pub include_location: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            level: default_log_level(),
            format: LogFormat::default(),
            ansi_enabled: false,
            include_location: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Telemetry configuration section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct TelemetryConfigSection {
    /// Service name attached to logs.
    #[serde(default = "default_service_name")]
    pub service_name: String,

    /// Deployment environment (e.g., "development", "production").
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for TelemetryConfigSection {
    fn default() -> Self {
        Self {
            service_name: default_service_name(),
            environment: default_environment(),
            metrics: MetricsConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

fn default_service_name() -> String {
    "mnemosyne".to_string()
}

fn default_environment() -> String {
    "development".to_string()
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.listen_addr, "0.0.0.0:8080");
        assert_eq!(config.shutdown_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_idempotency_config_default() {
        let config = IdempotencyConfig::default();
        assert_eq!(config.header_name, "Idempotency-Key");
        assert_eq!(config.ttl, Duration::from_secs(86_400));
        assert_eq!(config.backend, StoreBackend::Memory);
        assert_eq!(config.max_key_len, 255);
        assert_eq!(config.on_read_error, OnReadError::FailOpen);
        assert!(config.redis_url.is_none());
    }

    #[test]
    fn test_idempotency_config_deserialize() {
        let toml = r#"
            ttl = "2h"
            backend = "redis"
            redis_url = "redis://cache:6379"
            on_read_error = "fail_closed"
        "#;
        let config: IdempotencyConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.ttl, Duration::from_secs(7_200));
        assert_eq!(config.backend, StoreBackend::Redis);
        assert_eq!(config.redis_url.as_deref(), Some("redis://cache:6379"));
        assert_eq!(config.on_read_error, OnReadError::FailClosed);
        // Defaults applied
        assert_eq!(config.key_prefix, "idempotency:");
    }

    #[test]
    fn test_unknown_field_rejected() {
        let toml = r#"
            header_name = "X-Request-Key"
            retention = "1h"
        "#;
        let result: Result<IdempotencyConfig, _> = toml::from_str(toml);
        assert!(result.is_err());
    }

    #[test]
    fn test_bad_duration_rejected() {
        let result: Result<UpstreamConfig, _> = toml::from_str(r#"timeout = "soon""#);
        assert!(result.is_err());
    }

    #[test]
    fn test_log_format_deserialize() {
        let format: LogFormat = serde_json::from_str(r#""pretty""#).unwrap();
        assert_eq!(format, LogFormat::Pretty);
    }

    #[test]
    fn test_duration_serializes_human_readable() {
        let json = serde_json::to_string(&UpstreamConfig::default()).unwrap();
        assert!(json.contains("\"timeout\":\"30s\""));
    }
}
