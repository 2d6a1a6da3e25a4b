//! Sensors and their fields.
//!
//! Each sensor owns an ordered [`FieldSet`] and a device capability from
//! [`crate::device`]. Variants:
//!
//! - [`HostAddressSensor`]: one scalar per poll
//! - [`ClimateSensor`]: gated temperature / humidity plus derived humidity fields
//! - [`CurrentSensor`]: differential reading against a reference channel
//! - [`MoistureSensor`]: averaged analog reading
//! - [`PushSensor`]: values pushed by a background device session

pub mod climate;
pub mod current;
pub mod field;
pub mod host;
pub mod moisture;
pub mod psychrometrics;
pub mod push;
mod traits;

pub use climate::ClimateSensor;
pub use current::CurrentSensor;
pub use field::{Acceptance, Field, FieldSet, OutlierConfig, OutlierField, SensorField};
pub use host::HostAddressSensor;
pub use moisture::MoistureSensor;
pub use push::{PushOptions, PushSample, PushSensor};
pub use traits::{Sensor, SensorError, SensorKind, SessionState};
