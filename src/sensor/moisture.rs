//! Averaging resistive moisture probe.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::device::AnalogSource;
use crate::sensor::{FieldSet, Sensor, SensorError, SensorKind};
use crate::storage::Record;

/// Default number of conversions averaged per update.
pub const DEFAULT_SAMPLES: usize = 5;

/// Default pause between conversions (100 milliseconds).
pub const DEFAULT_SAMPLE_DELAY: Duration = Duration::from_millis(100);

/// Reads one channel several times and stores the mean counts (`raw`) and
/// volts (`v`).
pub struct MoistureSensor<A> {
    group: String,
    name: String,
    adc: A,
    channel: u8,
    samples: usize,
    sample_delay: Duration,
    fields: FieldSet,
}

impl<A: AnalogSource> MoistureSensor<A> {
    pub fn new(group: impl Into<String>, name: impl Into<String>, adc: A, channel: u8) -> Self {
        Self {
            group: group.into(),
            name: name.into(),
            adc,
            channel,
            samples: DEFAULT_SAMPLES,
            sample_delay: DEFAULT_SAMPLE_DELAY,
            fields: FieldSet::new().plain("raw").plain("v"),
        }
    }

    /// Set the number of conversions per update (at least one).
    pub fn with_samples(mut self, samples: usize) -> Self {
        self.samples = samples.max(1);
        self
    }

    pub fn with_sample_delay(mut self, delay: Duration) -> Self {
        self.sample_delay = delay;
        self
    }
}

impl<A> std::fmt::Debug for MoistureSensor<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MoistureSensor")
            .field("group", &self.group)
            .field("name", &self.name)
            .field("channel", &self.channel)
            .field("samples", &self.samples)
            .field("sample_delay", &self.sample_delay)
            .finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl<A: AnalogSource> Sensor for MoistureSensor<A> {
    fn group(&self) -> &str {
        &self.group
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> SensorKind {
        SensorKind::Moisture
    }

    async fn update(&mut self) -> Result<(), SensorError> {
        let mut raw_sum = 0.0;
        let mut volts_sum = 0.0;
        for i in 0..self.samples {
            if i > 0 && !self.sample_delay.is_zero() {
                tokio::time::sleep(self.sample_delay).await;
            }
            let sample = self.adc.sample(self.channel)?;
            raw_sum += sample.raw as f64;
            volts_sum += sample.volts;
        }

        let n = self.samples as f64;
        self.fields.set("raw", raw_sum / n);
        self.fields.set("v", volts_sum / n);
        Ok(())
    }

    fn get_point(&mut self, ts: DateTime<Utc>) -> Result<Record, SensorError> {
        let values = self.fields.snapshot(&self.name)?;
        Ok(Record::new(&self.group, &self.name, ts, values))
    }
}
