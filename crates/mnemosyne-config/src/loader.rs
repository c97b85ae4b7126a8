//! Configuration loader with layered approach.
//!
//! This module provides the [`ConfigLoader`] for loading configuration from
//! multiple sources: defaults, files, and environment variables.

use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::Path;

use crate::duration::parse_duration;
use crate::{ConfigError, LogFormat, MnemosyneConfig, OnReadError, StoreBackend};

/// Configuration loader with layered approach.
///
/// The loader applies configuration in layers, with later layers overriding
/// earlier ones:
/// 1. Default values (built into the code)
/// 2. Configuration file (TOML or JSON)
/// 3. Environment variables, optionally seeded from a `.env` file
///
/// # Example
///
/// ```no_run
/// use mnemosyne_config::ConfigLoader;
///
/// # fn main() -> Result<(), mnemosyne_config::ConfigError> {
/// let config = ConfigLoader::new()
///     .with_defaults()
///     .with_file("mnemosyne.toml")?
///     .with_env_prefix("MNEMOSYNE")
///     .load()?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct ConfigLoader {
    config: MnemosyneConfig,
    env_prefix: Option<String>,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    /// Create a new configuration loader starting from defaults.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: MnemosyneConfig::default(),
            env_prefix: None,
        }
    }

    /// Start with default configuration values.
    #[must_use]
    pub fn with_defaults(mut self) -> Self {
        self.config = MnemosyneConfig::default();
        self
    }

    /// Start with development preset configuration.
    ///
    /// # Example
    ///
    /// ```
    /// use mnemosyne_config::ConfigLoader;
    ///
    /// let config = ConfigLoader::new()
    ///     .with_development()
    ///     .load()
    ///     .unwrap();
    ///
    /// assert_eq!(config.telemetry.logging.level, "debug");
    /// ```
    #[must_use]
    pub fn with_development(mut self) -> Self {
        self.config = MnemosyneConfig::development();
        self
    }

    /// Start with production preset configuration.
    #[must_use]
    pub fn with_production(mut self) -> Self {
        self.config = MnemosyneConfig::production();
        self
    }

    /// Load configuration from a file.
    ///
    /// The format is picked by extension: `.toml` or `.json`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file is missing, unreadable, malformed,
    /// or contains unknown fields.
    pub fn with_file<P: AsRef<Path>>(mut self, path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigError::file_not_found(path));
        }

        let content = fs::read_to_string(path).map_err(|e| ConfigError::read_error(path, e))?;

        self.config = Self::parse_file(&content, path)?;
        Ok(self)
    }

    /// Load configuration from a file if it exists.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file exists but cannot be loaded.
    pub fn with_optional_file<P: AsRef<Path>>(self, path: P) -> Result<Self, ConfigError> {
        if path.as_ref().exists() {
            self.with_file(path)
        } else {
            Ok(self)
        }
    }

    /// Load configuration from a string in `toml` or `json` format.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if parsing fails.
    ///
    /// # Example
    ///
    /// ```
    /// use mnemosyne_config::ConfigLoader;
    ///
    /// let toml = r#"
    ///     [idempotency]
    ///     header_name = "X-Idempotency-Key"
    /// "#;
    ///
    /// let config = ConfigLoader::new()
    ///     .with_string(toml, "toml")
    ///     .unwrap()
    ///     .load()
    ///     .unwrap();
    ///
    /// assert_eq!(config.idempotency.header_name, "X-Idempotency-Key");
    /// ```
    pub fn with_string(mut self, content: &str, format: &str) -> Result<Self, ConfigError> {
        self.config = match format.to_lowercase().as_str() {
            "toml" => toml::from_str(content)?,
            "json" => serde_json::from_str(content)?,
            other => return Err(ConfigError::UnsupportedFormat(other.to_string())),
        };
        Ok(self)
    }

    /// Set environment variable prefix for overrides.
    ///
    /// Variables use the format `PREFIX__SECTION__KEY`, for example
    /// `MNEMOSYNE__IDEMPOTENCY__TTL=1h`.
    #[must_use]
    pub fn with_env_prefix(mut self, prefix: &str) -> Self {
        self.env_prefix = Some(prefix.to_uppercase());
        self
    }

    /// Load a `.env` file into the process environment, if one exists.
    #[must_use]
    pub fn with_dotenv(self) -> Self {
        // A missing .env file is not an error.
        let _ = dotenvy::dotenv();
        self
    }

    /// Apply environment overrides and validate.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if an override cannot be parsed or validation fails.
    pub fn load(mut self) -> Result<MnemosyneConfig, ConfigError> {
        if let Some(prefix) = self.env_prefix.take() {
            self.apply_env_overrides(&prefix)?;
        }

        self.config.validate()?;

        Ok(self.config)
    }

    /// Finalize without environment overrides or validation.
    #[must_use]
    pub fn load_unvalidated(self) -> MnemosyneConfig {
        self.config
    }

    fn parse_file(content: &str, path: &Path) -> Result<MnemosyneConfig, ConfigError> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase);

        match extension.as_deref() {
            Some("toml") => Ok(toml::from_str(content)?),
            Some("json") => Ok(serde_json::from_str(content)?),
            _ => Err(ConfigError::UnsupportedFormat(path.display().to_string())),
        }
    }

    fn apply_env_overrides(&mut self, prefix: &str) -> Result<(), ConfigError> {
        let env_vars: HashMap<String, String> = env::vars()
            .filter(|(k, _)| k.starts_with(prefix))
            .collect();

        for (key, value) in env_vars {
            self.apply_env_var(&key, &value, prefix)?;
        }

        Ok(())
    }

    fn apply_env_var(&mut self, key: &str, value: &str, prefix: &str) -> Result<(), ConfigError> {
        let Some(path) = key.strip_prefix(prefix).and_then(|k| k.strip_prefix("__")) else {
            // Shares the prefix but not the separator (e.g. MNEMOSYNE_HOME).
            return Ok(());
        };

        let parts: Vec<&str> = path.split("__").collect();
        let config = &mut self.config;

        match parts.as_slice() {
            // Server section
            ["SERVER", "LISTEN_ADDR"] => config.server.listen_addr = value.to_string(),
            ["SERVER", "SHUTDOWN_TIMEOUT"] => {
                config.server.shutdown_timeout = parse_env_duration(key, value)?;
            }

            // Upstream section
            ["UPSTREAM", "URL"] => config.upstream.url = value.to_string(),
            ["UPSTREAM", "TIMEOUT"] => config.upstream.timeout = parse_env_duration(key, value)?,

            // Idempotency section
            ["IDEMPOTENCY", "HEADER_NAME"] => config.idempotency.header_name = value.to_string(),
            ["IDEMPOTENCY", "TTL"] => config.idempotency.ttl = parse_env_duration(key, value)?,
            ["IDEMPOTENCY", "BACKEND"] => {
                config.idempotency.backend = match value.to_lowercase().as_str() {
                    "memory" => StoreBackend::Memory,
                    "redis" => StoreBackend::Redis,
                    _ => {
                        return Err(ConfigError::env_parse_error(
                            key,
                            "expected 'memory' or 'redis'",
                        ))
                    }
                };
            }
            ["IDEMPOTENCY", "REDIS_URL"] => {
                config.idempotency.redis_url = if value.is_empty() {
                    None
                } else {
                    Some(value.to_string())
                };
            }
            ["IDEMPOTENCY", "KEY_PREFIX"] => config.idempotency.key_prefix = value.to_string(),
            ["IDEMPOTENCY", "MAX_KEY_LEN"] => {
                config.idempotency.max_key_len = value
                    .parse()
                    .map_err(|_| ConfigError::env_parse_error(key, "expected integer"))?;
            }
            ["IDEMPOTENCY", "MAX_BODY_BYTES"] => {
                config.idempotency.max_body_bytes = value
                    .parse()
                    .map_err(|_| ConfigError::env_parse_error(key, "expected integer"))?;
            }
            ["IDEMPOTENCY", "ON_READ_ERROR"] => {
                config.idempotency.on_read_error = match value.to_lowercase().as_str() {
                    "fail_open" => OnReadError::FailOpen,
                    "fail_closed" => OnReadError::FailClosed,
                    _ => {
                        return Err(ConfigError::env_parse_error(
                            key,
                            "expected 'fail_open' or 'fail_closed'",
                        ))
                    }
                };
            }

            // Telemetry section
            ["TELEMETRY", "SERVICE_NAME"] => config.telemetry.service_name = value.to_string(),
            ["TELEMETRY", "ENVIRONMENT"] => config.telemetry.environment = value.to_string(),
            ["TELEMETRY", "METRICS", "ENABLED"] => {
                config.telemetry.metrics.enabled = parse_env_bool(key, value)?;
            }
            ["TELEMETRY", "METRICS", "ADDR"] => config.telemetry.metrics.addr = value.to_string(),
            ["TELEMETRY", "LOGGING", "ENABLED"] => {
                config.telemetry.logging.enabled = parse_env_bool(key, value)?;
            }
            ["TELEMETRY", "LOGGING", "LEVEL"] => config.telemetry.logging.level = value.to_string(),
            ["TELEMETRY", "LOGGING", "FORMAT"] => {
                config.telemetry.logging.format = match value.to_lowercase().as_str() {
                    "json" => LogFormat::Json,
                    "pretty" => LogFormat::Pretty,
                    _ => {
                        return Err(ConfigError::env_parse_error(
                            key,
                            "expected 'json' or 'pretty'",
                        ))
                    }
                };
            }
            ["TELEMETRY", "LOGGING", "ANSI_ENABLED"] => {
                config.telemetry.logging.ansi_enabled = parse_env_bool(key, value)?;
            }

            // Unknown key - ignore
            _ => {}
        }

        Ok(())
    }
}

/// Parse a boolean from a string.
fn parse_bool(s: &str) -> Option<bool> {
    match s.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn parse_env_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    parse_bool(value).ok_or_else(|| ConfigError::env_parse_error(key, "expected boolean"))
}

fn parse_env_duration(key: &str, value: &str) -> Result<std::time::Duration, ConfigError> {
    parse_duration(value).map_err(|reason| ConfigError::env_parse_error(key, reason))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::Duration;

    #[test]
    fn test_loader_new() {
        let config = ConfigLoader::new().load().unwrap();
        assert_eq!(config.server.listen_addr, "0.0.0.0:8080");
    }

    #[test]
    fn test_loader_with_production() {
        let config = ConfigLoader::new().with_production().load().unwrap();
        assert_eq!(config.telemetry.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_loader_with_string_toml() {
        let toml = r#"
            [idempotency]
            ttl = "30m"
            max_key_len = 64
        "#;

        let config = ConfigLoader::new()
            .with_string(toml, "toml")
            .unwrap()
            .load()
            .unwrap();

        assert_eq!(config.idempotency.ttl, Duration::from_secs(1_800));
        assert_eq!(config.idempotency.max_key_len, 64);
        // Untouched sections keep their defaults.
        assert_eq!(config.upstream.url, "http://127.0.0.1:3000");
    }

    #[test]
    fn test_loader_with_string_json() {
        let json = r#"{"upstream": {"url": "https://orders.internal", "timeout": "5s"}}"#;

        let config = ConfigLoader::new()
            .with_string(json, "json")
            .unwrap()
            .load()
            .unwrap();

        assert_eq!(config.upstream.url, "https://orders.internal");
        assert_eq!(config.upstream.timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_loader_rejects_unknown_format() {
        let result = ConfigLoader::new().with_string("a: b", "yaml");
        assert!(matches!(result, Err(ConfigError::UnsupportedFormat(_))));
    }

    #[test]
    fn test_loader_with_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
            [idempotency]
            backend = "redis"
            redis_url = "redis://cache:6379/0"
            key_prefix = "orders:"
            "#
        )
        .unwrap();

        let config = ConfigLoader::new()
            .with_file(file.path())
            .unwrap()
            .load()
            .unwrap();

        assert_eq!(config.idempotency.backend, StoreBackend::Redis);
        assert_eq!(config.idempotency.key_prefix, "orders:");
    }

    #[test]
    fn test_loader_file_with_unknown_field_fails() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[idempotency]\nretention = \"1h\"").unwrap();

        let result = ConfigLoader::new().with_file(file.path());
        assert!(matches!(result, Err(ConfigError::TomlError(_))));
    }

    #[test]
    fn test_loader_with_file_not_found() {
        let result = ConfigLoader::new().with_file("/nonexistent/mnemosyne.toml");
        assert!(matches!(result, Err(ConfigError::FileNotFound { .. })));
    }

    #[test]
    fn test_loader_with_optional_file_not_found() {
        let config = ConfigLoader::new()
            .with_optional_file("/nonexistent/mnemosyne.toml")
            .unwrap()
            .load()
            .unwrap();
        assert_eq!(config.server.listen_addr, "0.0.0.0:8080");
    }

    #[test]
    fn test_load_validates() {
        let toml = r#"
            [idempotency]
            backend = "redis"
        "#;
        let result = ConfigLoader::new().with_string(toml, "toml").unwrap().load();
        assert!(matches!(result, Err(ConfigError::MissingField { .. })));
    }

    #[test]
    fn test_parse_bool() {
        assert_eq!(parse_bool("true"), Some(true));
        assert_eq!(parse_bool("YES"), Some(true));
        assert_eq!(parse_bool("1"), Some(true));
        assert_eq!(parse_bool("off"), Some(false));
        assert_eq!(parse_bool("0"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
        assert_eq!(parse_bool(""), None);
    }

    // Overrides are exercised through apply_env_var directly; mutating the
    // process environment would race with other tests.

    #[test]
    fn test_apply_env_var_idempotency() {
        let mut loader = ConfigLoader::new();
        loader
            .apply_env_var("TEST__IDEMPOTENCY__TTL", "90s", "TEST")
            .unwrap();
        loader
            .apply_env_var("TEST__IDEMPOTENCY__BACKEND", "Redis", "TEST")
            .unwrap();
        loader
            .apply_env_var("TEST__IDEMPOTENCY__REDIS_URL", "redis://r:6379", "TEST")
            .unwrap();
        loader
            .apply_env_var("TEST__IDEMPOTENCY__ON_READ_ERROR", "fail_closed", "TEST")
            .unwrap();

        let idem = &loader.config.idempotency;
        assert_eq!(idem.ttl, Duration::from_secs(90));
        assert_eq!(idem.backend, StoreBackend::Redis);
        assert_eq!(idem.redis_url.as_deref(), Some("redis://r:6379"));
        assert_eq!(idem.on_read_error, OnReadError::FailClosed);
    }

    #[test]
    fn test_apply_env_var_server_and_upstream() {
        let mut loader = ConfigLoader::new();
        loader
            .apply_env_var("TEST__SERVER__LISTEN_ADDR", "127.0.0.1:9000", "TEST")
            .unwrap();
        loader
            .apply_env_var("TEST__UPSTREAM__TIMEOUT", "250ms", "TEST")
            .unwrap();
        assert_eq!(loader.config.server.listen_addr, "127.0.0.1:9000");
        assert_eq!(loader.config.upstream.timeout, Duration::from_millis(250));
    }

    #[test]
    fn test_apply_env_var_telemetry() {
        let mut loader = ConfigLoader::new();
        loader
            .apply_env_var("TEST__TELEMETRY__LOGGING__FORMAT", "pretty", "TEST")
            .unwrap();
        loader
            .apply_env_var("TEST__TELEMETRY__METRICS__ENABLED", "false", "TEST")
            .unwrap();
        assert_eq!(loader.config.telemetry.logging.format, LogFormat::Pretty);
        assert!(!loader.config.telemetry.metrics.enabled);
    }

    #[test]
    fn test_apply_env_var_invalid_values() {
        let mut loader = ConfigLoader::new();
        assert!(loader
            .apply_env_var("TEST__IDEMPOTENCY__MAX_KEY_LEN", "lots", "TEST")
            .is_err());
        assert!(loader
            .apply_env_var("TEST__IDEMPOTENCY__TTL", "forever", "TEST")
            .is_err());
        assert!(loader
            .apply_env_var("TEST__IDEMPOTENCY__BACKEND", "memcached", "TEST")
            .is_err());
    }

    #[test]
    fn test_apply_env_var_ignores_unrelated_keys() {
        let mut loader = ConfigLoader::new();
        loader.apply_env_var("TEST_HOME", "/srv", "TEST").unwrap();
        loader
            .apply_env_var("TEST__UNKNOWN__KEY", "x", "TEST")
            .unwrap();
        assert_eq!(loader.config, MnemosyneConfig::default());
    }
}
