//! Application configuration structures.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::scheduler::SensorFactory;
use crate::sensor::OutlierConfig;
use crate::storage::{DEFAULT_TIMEOUT, InfluxStore, Precision, StoreError, WriteOptions, WriteTarget};

use super::sensor::{SensorConfig, validate_sensors};
use super::validation::{ConfigError, expand_env_vars};

// =============================================================================
// Constants
// =============================================================================

/// Default polling interval (30 seconds).
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(30);

/// Default sensor group.
pub const DEFAULT_GROUP: &str = "kiln";

fn default_interval() -> Duration {
    DEFAULT_INTERVAL
}

fn default_group() -> String {
    DEFAULT_GROUP.to_string()
}

fn default_store_timeout() -> Duration {
    DEFAULT_TIMEOUT
}

// =============================================================================
// Store Configuration
// =============================================================================

/// InfluxDB v2 connection settings.
///
/// `url`, `org`, `bucket` and `token` support `${VAR}` and `${VAR:-default}`
/// expansion, so the token can stay out of the file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Server base URL, e.g. `http://localhost:8086`.
    pub url: String,

    pub org: String,

    pub bucket: String,

    /// API token (default: none).
    #[serde(default)]
    pub token: String,

    /// Timestamp precision (default: `s`).
    #[serde(default)]
    pub precision: Precision,

    /// Request timeout (default: 10s).
    #[serde(default = "default_store_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

impl StoreConfig {
    fn expand(&mut self) {
        self.url = expand_env_vars(&self.url);
        self.org = expand_env_vars(&self.org);
        self.bucket = expand_env_vars(&self.bucket);
        self.token = expand_env_vars(&self.token);
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let url = Url::parse(&self.url).map_err(|e| {
            ConfigError::invalid(format!("invalid store url '{}': {e}", self.url))
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::invalid(format!(
                "store url must be http or https, got '{}'",
                url.scheme()
            )));
        }
        if self.org.trim().is_empty() {
            return Err(ConfigError::invalid("store org cannot be empty"));
        }
        if self.bucket.trim().is_empty() {
            return Err(ConfigError::invalid("store bucket cannot be empty"));
        }
        if self.timeout.is_zero() {
            return Err(ConfigError::invalid("store timeout must be non-zero"));
        }
        Ok(())
    }

    pub fn target(&self) -> WriteTarget {
        WriteTarget::new(&self.org, &self.bucket)
    }

    /// Build the HTTP client.
    pub fn connect(&self) -> Result<InfluxStore, StoreError> {
        InfluxStore::new(&self.url, self.token.clone(), self.precision, self.timeout)
    }
}

// =============================================================================
// Application Configuration
// =============================================================================

/// Top-level application configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Polling interval (default: 30s).
    #[serde(default = "default_interval", with = "humantime_serde")]
    pub interval: Duration,

    /// Default group (record measurement) for sensors (default: "kiln").
    #[serde(default = "default_group")]
    pub group: String,

    pub store: StoreConfig,

    /// Delivery options.
    #[serde(default)]
    pub writer: WriteOptions,

    /// Outlier gate applied to gated fields.
    #[serde(default)]
    pub outlier: OutlierConfig,

    /// Sensors, polled in this order.
    #[serde(default)]
    pub sensors: Vec<SensorConfig>,
}

impl AppConfig {
    /// Load configuration from a YAML file.
    ///
    /// # Errors
    /// Returns `ConfigError` if the file cannot be read, parsed, or validated.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&content)
    }

    /// Parse, expand and validate a YAML document.
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let mut config: Self = serde_yaml::from_str(content)?;
        config.store.expand();
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values.
    ///
    /// # Errors
    /// Returns `ConfigError::ValidationError` if any field is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.interval.is_zero() {
            return Err(ConfigError::invalid("interval must be non-zero"));
        }
        if self.group.trim().is_empty() {
            return Err(ConfigError::invalid("group cannot be empty"));
        }

        self.store.validate()?;

        // Writer
        if self.writer.batch_size == Some(0) {
            return Err(ConfigError::invalid("writer batch_size must be positive"));
        }
        if !self.writer.exponential_base.is_finite() || self.writer.exponential_base < 1.0 {
            return Err(ConfigError::invalid(format!(
                "writer exponential_base must be >= 1, got {}",
                self.writer.exponential_base
            )));
        }

        self.outlier
            .validate()
            .map_err(|e| ConfigError::invalid(e.to_string()))?;

        validate_sensors(&self.sensors, &self.group)
    }

    /// Sensor factories in configuration order.
    pub fn sensor_factories(&self) -> Vec<SensorFactory> {
        self.sensors
            .iter()
            .map(|sensor| sensor.factory(&self.group, self.outlier))
            .collect()
    }
}
