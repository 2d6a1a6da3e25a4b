//! Hall-effect current sensor on an ADC channel.
//!
//! The sensor outputs half its supply voltage at zero current and moves
//! 66 mV per ampere (ACS712-30A class). The supply is read from a reference
//! channel on the same converter.

use chrono::{DateTime, Utc};

use crate::device::AnalogSource;
use crate::sensor::{FieldSet, Sensor, SensorError, SensorKind};
use crate::storage::Record;

/// Volts per ampere.
pub const SENSITIVITY: f64 = 0.066;

/// Reference channel used when none is configured.
pub const DEFAULT_REFERENCE_CHANNEL: u8 = 4;

pub struct CurrentSensor<A> {
    group: String,
    name: String,
    adc: A,
    channel: u8,
    reference_channel: u8,
    fields: FieldSet,
}

impl<A: AnalogSource> CurrentSensor<A> {
    /// # Errors
    /// Returns `SensorError::Config` if `channel` is the reference channel.
    pub fn new(
        group: impl Into<String>,
        name: impl Into<String>,
        adc: A,
        channel: u8,
        reference_channel: u8,
    ) -> Result<Self, SensorError> {
        if channel == reference_channel {
            return Err(SensorError::Config(format!(
                "current channel {channel} is also the reference channel"
            )));
        }
        Ok(Self {
            group: group.into(),
            name: name.into(),
            adc,
            channel,
            reference_channel,
            fields: FieldSet::new().plain("v0").plain("v").plain("A"),
        })
    }
}

impl<A> std::fmt::Debug for CurrentSensor<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CurrentSensor")
            .field("group", &self.group)
            .field("name", &self.name)
            .field("channel", &self.channel)
            .field("reference_channel", &self.reference_channel)
            .finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl<A: AnalogSource> Sensor for CurrentSensor<A> {
    fn group(&self) -> &str {
        &self.group
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> SensorKind {
        SensorKind::Current
    }

    async fn update(&mut self) -> Result<(), SensorError> {
        let v_ref = self.adc.sample(self.reference_channel)?.volts;
        let v = self.adc.sample(self.channel)?.volts;
        let v0 = v_ref / 2.0;

        self.fields.set("v0", v0);
        self.fields.set("v", v);
        self.fields.set("A", (v0 - v) / SENSITIVITY);
        Ok(())
    }

    fn get_point(&mut self, ts: DateTime<Utc>) -> Result<Record, SensorError> {
        let values = self.fields.snapshot(&self.name)?;
        Ok(Record::new(&self.group, &self.name, ts, values))
    }
}
