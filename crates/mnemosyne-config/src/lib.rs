//! Typed configuration for Mnemosyne.
//!
//! - TOML and JSON configuration files
//! - Environment variable overrides
//! - Strict validation (fails on unknown fields)
//! - Layered configuration (defaults → file → env)
//!
//! # Overview
//!
//! [`MnemosyneConfig`] holds four sections:
//!
//! - [`ServerConfig`] - Listener address and shutdown drain time
//! - [`UpstreamConfig`] - The service the sidecar forwards to
//! - [`IdempotencyConfig`] - Key header, retention, store backend, limits
//! - [`TelemetryConfigSection`] - Logging and metrics
//!
//! # Configuration File Format
//!
//! ```toml
//! [server]
//! listen_addr = "0.0.0.0:8080"
//! shutdown_timeout = "30s"
//!
//! [upstream]
//! url = "http://127.0.0.1:3000"
//! timeout = "30s"
//!
//! [idempotency]
//! header_name = "Idempotency-Key"
//! ttl = "24h"
//! backend = "redis"
//! redis_url = "redis://127.0.0.1:6379"
//! key_prefix = "idempotency:"
//! max_key_len = 255
//! max_body_bytes = 10485760
//! on_read_error = "fail_open"
//!
//! [telemetry]
//! service_name = "orders"
//!
//! [telemetry.logging]
//! level = "info"
//! format = "json"
//! ```
//!
//! # Environment Variable Overrides
//!
//! Every value can be overridden with `PREFIX__SECTION__KEY`:
//!
//! - `MNEMOSYNE__IDEMPOTENCY__TTL=1h`
//! - `MNEMOSYNE__IDEMPOTENCY__BACKEND=redis`
//! - `MNEMOSYNE__TELEMETRY__LOGGING__LEVEL=debug`

#![warn(missing_docs)]

mod config;
pub mod duration;
mod error;
mod loader;
mod schema;

pub use config::{MnemosyneConfig, MnemosyneConfigBuilder};
pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use schema::*;
