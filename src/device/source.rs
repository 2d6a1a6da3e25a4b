//! Device capability traits.
//!
//! Sensors never talk to hardware directly; they are handed one of these
//! narrow capabilities at construction time.

use std::collections::BTreeMap;

use thiserror::Error;
use tokio::sync::mpsc;

use crate::storage::FieldValue;

/// Errors raised by device reads and sessions.
#[derive(Debug, Error)]
pub enum DeviceError {
    /// Underlying I/O failed (missing sysfs node, EIO from the driver, socket error).
    #[error("device I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The device did not answer in time.
    #[error("device timed out")]
    Timeout,

    /// The device answered with something that is not a reading.
    #[error("invalid reading: {0}")]
    InvalidReading(String),

    /// The device is absent or misconfigured.
    #[error("device unavailable: {0}")]
    Unavailable(String),

    /// The session is not connected.
    #[error("device disconnected")]
    Disconnected,
}

/// One temperature / relative humidity sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClimateReading {
    /// Degrees Celsius.
    pub temperature: f64,
    /// Percent, 0..=100.
    pub humidity: f64,
}

/// One analog-to-digital conversion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnalogSample {
    /// Raw converter counts.
    pub raw: i64,
    /// Converted voltage.
    pub volts: f64,
}

/// Returns a single scalar per read (e.g. the host's network address).
pub trait ScalarSource: Send + 'static {
    fn read(&mut self) -> Result<FieldValue, DeviceError>;
}

/// Returns a temperature / humidity pair per read.
pub trait ClimateSource: Send + 'static {
    fn read(&mut self) -> Result<ClimateReading, DeviceError>;
}

/// Multi-channel analog-to-digital converter.
pub trait AnalogSource: Send + 'static {
    fn sample(&mut self, channel: u8) -> Result<AnalogSample, DeviceError>;
}

/// Messages a push session sends to the worker that owns it.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// The session is connected and ready for data requests.
    Connected,
    /// The device pushed a set of named values.
    Data(BTreeMap<String, f64>),
    /// The link dropped, with an optional reason.
    Disconnected(Option<String>),
}

/// A device that delivers data on its own schedule.
///
/// `connect` hands the session the channel it reports on. The session sends
/// [`SessionEvent::Connected`] once the link is up, [`SessionEvent::Data`] for
/// every payload, and [`SessionEvent::Disconnected`] when the link drops.
#[async_trait::async_trait]
pub trait PushSession: Send + 'static {
    async fn connect(&mut self, events: mpsc::Sender<SessionEvent>) -> Result<(), DeviceError>;

    /// Ask the device for a fresh payload.
    async fn request_data(&mut self) -> Result<(), DeviceError>;

    async fn disconnect(&mut self) -> Result<(), DeviceError>;
}
