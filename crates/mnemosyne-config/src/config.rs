//! Main configuration types.
//!
//! This module provides the top-level [`MnemosyneConfig`] struct and its builder.

use serde::{Deserialize, Serialize};

use crate::{
    ConfigError, IdempotencyConfig, LogFormat, ServerConfig, StoreBackend,
    TelemetryConfigSection, UpstreamConfig,
};

/// Complete Mnemosyne configuration.
///
/// Use [`ConfigLoader`](crate::ConfigLoader) to load configuration from files
/// and environment variables.
///
/// # Example
///
/// ```
/// use mnemosyne_config::MnemosyneConfig;
///
/// let config = MnemosyneConfig::default();
/// assert_eq!(config.idempotency.header_name, "Idempotency-Key");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(deny_unknown_fields)]
pub struct MnemosyneConfig {
    /// Listener configuration.
    #[serde(default)]
    pub server: ServerConfig,

    /// Upstream service configuration.
    #[serde(default)]
    pub upstream: UpstreamConfig,

    /// Idempotency gate and store configuration.
    #[serde(default)]
    pub idempotency: IdempotencyConfig,

    /// Telemetry configuration (metrics, logging).
    #[serde(default)]
    pub telemetry: TelemetryConfigSection,
}

impl MnemosyneConfig {
    /// Create a new configuration builder.
    #[must_use]
    pub fn builder() -> MnemosyneConfigBuilder {
        MnemosyneConfigBuilder::new()
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - The listen or metrics address is not a socket address
    /// - The upstream URL is not http(s)
    /// - The TTL, key length or body limit is zero
    /// - The header name is not a valid HTTP header name
    /// - The Redis backend is selected without a `redis_url`
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self
            .server
            .listen_addr
            .parse::<std::net::SocketAddr>()
            .is_err()
        {
            return Err(ConfigError::invalid_value(
                "server.listen_addr",
                format!("invalid socket address: {}", self.server.listen_addr),
            ));
        }

        if self.telemetry.metrics.enabled
            && self
                .telemetry
                .metrics
                .addr
                .parse::<std::net::SocketAddr>()
                .is_err()
        {
            return Err(ConfigError::invalid_value(
                "telemetry.metrics.addr",
                format!("invalid socket address: {}", self.telemetry.metrics.addr),
            ));
        }

        if !(self.upstream.url.starts_with("http://") || self.upstream.url.starts_with("https://"))
        {
            return Err(ConfigError::invalid_value(
                "upstream.url",
                "must start with http:// or https://",
            ));
        }

        let idem = &self.idempotency;
        if idem.header_name.is_empty()
            || !idem
                .header_name
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b))
        {
            return Err(ConfigError::invalid_value(
                "idempotency.header_name",
                format!("not a valid header name: {:?}", idem.header_name),
            ));
        }
        if idem.ttl.is_zero() {
            return Err(ConfigError::invalid_value(
                "idempotency.ttl",
                "must be greater than zero",
            ));
        }
        if idem.max_key_len == 0 {
            return Err(ConfigError::invalid_value(
                "idempotency.max_key_len",
                "must be greater than zero",
            ));
        }
        if idem.max_body_bytes == 0 {
            return Err(ConfigError::invalid_value(
                "idempotency.max_body_bytes",
                "must be greater than zero",
            ));
        }
        if idem.backend == StoreBackend::Redis && idem.redis_url.is_none() {
            return Err(ConfigError::missing_field("idempotency.redis_url"));
        }

        Ok(())
    }

    /// Create a development configuration preset.
    ///
    /// Pretty, colored debug logs and no metrics exporter.
    ///
    /// # Example
    ///
    /// ```
    /// use mnemosyne_config::MnemosyneConfig;
    ///
    /// let config = MnemosyneConfig::development();
    /// assert_eq!(config.telemetry.logging.level, "debug");
    /// ```
    #[must_use]
    pub fn development() -> Self {
        let mut config = Self::default();

        config.telemetry.logging.level = "debug".to_string();
        config.telemetry.logging.format = LogFormat::Pretty;
        config.telemetry.logging.ansi_enabled = true;
        config.telemetry.logging.include_location = true;
        config.telemetry.metrics.enabled = false;
        config.telemetry.environment = "development".to_string();

        config
    }

    /// Create a production configuration preset.
    ///
    /// JSON logs at info level with the metrics exporter enabled.
    ///
    /// # Example
    ///
    /// ```
    /// use mnemosyne_config::MnemosyneConfig;
    ///
    /// let config = MnemosyneConfig::production();
    /// assert_eq!(config.telemetry.logging.format, mnemosyne_config::LogFormat::Json);
    /// ```
    #[must_use]
    pub fn production() -> Self {
        let mut config = Self::default();

        config.telemetry.logging.level = "info".to_string();
        config.telemetry.logging.format = LogFormat::Json;
        config.telemetry.logging.ansi_enabled = false;
        config.telemetry.metrics.enabled = true;
        config.telemetry.environment = "production".to_string();

        config
    }
}

/// Builder for [`MnemosyneConfig`].
#[derive(Debug, Default)]
pub struct MnemosyneConfigBuilder {
    server: Option<ServerConfig>,
    upstream: Option<UpstreamConfig>,
    idempotency: Option<IdempotencyConfig>,
    telemetry: Option<TelemetryConfigSection>,
}

impl MnemosyneConfigBuilder {
    /// Create a new builder with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the server configuration.
    #[must_use]
    pub fn server(mut self, server: ServerConfig) -> Self {
        self.server = Some(server);
        self
    }

    /// Set the upstream configuration.
    #[must_use]
    pub fn upstream(mut self, upstream: UpstreamConfig) -> Self {
        self.upstream = Some(upstream);
        self
    }

    /// Set the idempotency configuration.
    #[must_use]
    pub fn idempotency(mut self, idempotency: IdempotencyConfig) -> Self {
        self.idempotency = Some(idempotency);
        self
    }

    /// Set the telemetry configuration.
    #[must_use]
    pub fn telemetry(mut self, telemetry: TelemetryConfigSection) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// Build the configuration. Unset sections use their defaults.
    #[must_use]
    pub fn build(self) -> MnemosyneConfig {
        MnemosyneConfig {
            server: self.server.unwrap_or_default(),
            upstream: self.upstream.unwrap_or_default(),
            idempotency: self.idempotency.unwrap_or_default(),
            telemetry: self.telemetry.unwrap_or_default(),
        }
    }

    /// Build and validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if validation fails.
    pub fn build_validated(self) -> Result<MnemosyneConfig, ConfigError> {
        let config = self.build();
        config.validate()?;
        Ok(config)
    }
}
