//! Configuration module for kilnmon.
//!
//! Provides YAML-based configuration loading and validation for:
//! - Polling interval and default sensor group
//! - InfluxDB connection settings
//! - Delivery options and the outlier gate
//! - Sensor definitions, tagged by `type`

mod app;
mod sensor;
mod validation;

pub use app::{AppConfig, DEFAULT_GROUP, DEFAULT_INTERVAL, StoreConfig};
pub use sensor::{DeviceConfig, SensorConfig, validate_sensors};
pub use validation::{ConfigError, expand_env_vars, parse_duration};
