//! Device capabilities and the adapters that provide them.
//!
//! - `source`: capability traits and `DeviceError`
//! - [`iio`]: Linux IIO climate sensor and ADC
//! - [`host`]: outbound host address
//! - [`bridge`]: push session over a TCP bridge

pub mod bridge;
pub mod host;
pub mod iio;
mod source;

pub use bridge::TcpBridgeSession;
pub use host::HostAddress;
pub use iio::{IioAnalog, IioClimate};
pub use source::{
    AnalogSample, AnalogSource, ClimateReading, ClimateSource, DeviceError, PushSession,
    ScalarSource, SessionEvent,
};
