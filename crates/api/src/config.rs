//! Service Configuration
//!
//! Layered with the `config` crate: struct defaults, then an optional file
//! (`WEATHER_CONFIG`, default `config/weather-station.{toml,yaml,json}`), then
//! `WEATHER_`-prefixed environment variables using `__` between nesting
//! levels, e.g. `WEATHER_MQTT__HOST=broker.lan`.

use config::{Config, ConfigError, Environment, File};
use data_validator::ValidationConfig;
use mqtt_ingest::MqttConfig;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use storage::StorageConfig;

use crate::rate_limit::RateLimitConfig;

/// Environment variable naming the config file
pub const CONFIG_PATH_ENV: &str = "WEATHER_CONFIG";
/// Config file used when `WEATHER_CONFIG` is unset
pub const DEFAULT_CONFIG_PATH: &str = "config/weather-station";

const ENV_PREFIX: &str = "WEATHER";

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: StorageConfig,
    pub mqtt: MqttConfig,
    pub api: ApiConfig,
    pub logging: LoggingConfig,
    pub validation: ValidationConfig,
}

/// HTTP listener settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:5000".to_string(),
        }
    }
}

/// HTTP API behaviour
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Records returned by `/data/history` without `?limit=`
    pub history_default_limit: u32,
    /// Upper bound for `?limit=`
    pub history_max_limit: u32,
    /// Expose Prometheus metrics on `/metrics`
    pub metrics_enabled: bool,
    pub rate_limit: RateLimitConfig,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            history_default_limit: 100,
            history_max_limit: 1000,
            metrics_enabled: true,
            rate_limit: RateLimitConfig::default(),
        }
    }
}

/// Logging output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// trace, debug, info, warn or error
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl AppConfig {
    /// Load configuration from file and process environment
    pub fn load() -> Result<Self, ConfigError> {
        let path =
            std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::from_sources(File::with_name(&path).required(false), env_source())
    }

    /// Build from an explicit file source and environment source
    pub fn from_sources(
        file: impl config::Source + Send + Sync + 'static,
        env: Environment,
    ) -> Result<Self, ConfigError> {
        let settings = Config::builder().add_source(file).add_source(env).build()?;
        let config: AppConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would only fail later at runtime
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.bind_addr()?;
        if self.api.history_max_limit == 0 {
            return Err(ConfigError::Message(
                "api.history_max_limit must be at least 1".to_string(),
            ));
        }
        if self.api.history_default_limit == 0
            || self.api.history_default_limit > self.api.history_max_limit
        {
            return Err(ConfigError::Message(format!(
                "api.history_default_limit must be within 1..={}",
                self.api.history_max_limit
            )));
        }
        if self.mqtt.qos > 2 {
            return Err(ConfigError::Message(format!(
                "mqtt.qos must be 0, 1 or 2 (got {})",
                self.mqtt.qos
            )));
        }
        Ok(())
    }

    /// Parsed HTTP bind address
    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.server.bind_addr.parse().map_err(|e| {
            ConfigError::Message(format!(
                "invalid server.bind_addr {:?}: {}",
                self.server.bind_addr, e
            ))
        })
    }
}

fn env_source() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
}
