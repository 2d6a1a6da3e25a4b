//! Core sensor trait and types.

use chrono::{DateTime, Utc};
use strum_macros::{AsRefStr, Display, EnumString};
use thiserror::Error;

use crate::device::DeviceError;
use crate::storage::Record;

/// Errors that can occur while polling or managing a sensor.
#[derive(Debug, Error)]
pub enum SensorError {
    /// The underlying device failed this read.
    #[error("device error: {0}")]
    Device(#[from] DeviceError),

    /// The sensor has not produced a reading yet.
    #[error("no data yet from sensor '{0}'")]
    NoData(String),

    /// A required field has never been set.
    #[error("sensor '{sensor}' has no value for required field '{field}'")]
    MissingField { sensor: String, field: String },

    /// Invalid sensor configuration.
    #[error("config error: {0}")]
    Config(String),

    /// A background worker did not stop in time.
    #[error("sensor '{0}' did not shut down in time")]
    ShutdownTimeout(String),
}

/// Sensor variant, used for logging and config.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, AsRefStr)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum SensorKind {
    HostAddress,
    Climate,
    Current,
    Moisture,
    PushBridge,
}

/// Connection state of a push sensor's background session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    Polling,
}

/// A unit that reads one or more devices and produces one record per poll.
///
/// The collector calls [`update`](Sensor::update) then
/// [`get_point`](Sensor::get_point) once per cycle. Errors from either skip
/// this sensor for the cycle only. [`shutdown`](Sensor::shutdown) is called
/// once, when the process stops.
#[async_trait::async_trait]
pub trait Sensor: Send + 'static {
    /// Logical namespace; becomes the record's measurement.
    fn group(&self) -> &str;

    /// Unique name within the group; becomes the record's `name` tag.
    fn name(&self) -> &str;

    fn kind(&self) -> SensorKind;

    /// Refresh fields from the device.
    async fn update(&mut self) -> Result<(), SensorError>;

    /// Build a record from the current field values.
    fn get_point(&mut self, ts: DateTime<Utc>) -> Result<Record, SensorError>;

    /// Release device resources.
    async fn shutdown(&mut self) -> Result<(), SensorError> {
        Ok(())
    }
}
