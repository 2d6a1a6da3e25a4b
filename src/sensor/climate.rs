//! Temperature / humidity sensor with derived psychrometric fields.

use chrono::{DateTime, Utc};

use crate::device::ClimateSource;
use crate::sensor::psychrometrics::Derived;
use crate::sensor::{Acceptance, FieldSet, OutlierConfig, Sensor, SensorError, SensorKind};
use crate::storage::Record;

pub const TEMPERATURE: &str = "T";
pub const HUMIDITY: &str = "RH";
pub const VAPOR_PRESSURE: &str = "VP";
pub const ABSOLUTE_HUMIDITY: &str = "AH";
pub const VAPOR_PRESSURE_DEFICIT: &str = "VPD";

/// Climate sensor.
///
/// `T` and `RH` pass through the outlier gate. `VP`, `AH` and `VPD` are
/// recomputed on every update from the gated values, so a rejected spike
/// never leaks into the derived fields.
pub struct ClimateSensor<C> {
    group: String,
    name: String,
    source: C,
    fields: FieldSet,
}

impl<C: ClimateSource> ClimateSensor<C> {
    pub fn new(
        group: impl Into<String>,
        name: impl Into<String>,
        source: C,
        outlier: OutlierConfig,
    ) -> Self {
        let fields = FieldSet::new()
            .outlier(TEMPERATURE, outlier)
            .outlier(HUMIDITY, outlier)
            .plain(VAPOR_PRESSURE)
            .plain(ABSOLUTE_HUMIDITY)
            .plain(VAPOR_PRESSURE_DEFICIT);
        Self {
            group: group.into(),
            name: name.into(),
            source,
            fields,
        }
    }

    pub fn fields(&self) -> &FieldSet {
        &self.fields
    }
}

impl<C> std::fmt::Debug for ClimateSensor<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClimateSensor")
            .field("group", &self.group)
            .field("name", &self.name)
            .field("fields", &self.fields)
            .finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl<C: ClimateSource> Sensor for ClimateSensor<C> {
    fn group(&self) -> &str {
        &self.group
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> SensorKind {
        SensorKind::Climate
    }

    async fn update(&mut self) -> Result<(), SensorError> {
        let reading = self.source.read()?;

        for (field, raw) in [(TEMPERATURE, reading.temperature), (HUMIDITY, reading.humidity)] {
            if self.fields.set(field, raw) == Some(Acceptance::Rejected) {
                tracing::debug!(sensor = %self.name, field, raw, "Reading rejected as outlier");
            }
        }

        if let (Some(t), Some(rh)) = (
            self.fields.number(TEMPERATURE),
            self.fields.number(HUMIDITY),
        ) {
            let derived = Derived::compute(t, rh);
            self.fields.set(VAPOR_PRESSURE, derived.vp);
            self.fields.set(ABSOLUTE_HUMIDITY, derived.ah);
            self.fields.set(VAPOR_PRESSURE_DEFICIT, derived.vpd);
        }
        Ok(())
    }

    fn get_point(&mut self, ts: DateTime<Utc>) -> Result<Record, SensorError> {
        let values = self.fields.snapshot(&self.name)?;
        Ok(Record::new(&self.group, &self.name, ts, values))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{ClimateReading, DeviceError};
    use crate::sensor::psychrometrics::vapor_pressure;
    use std::collections::VecDeque;

    struct Scripted(VecDeque<Result<ClimateReading, DeviceError>>);

    impl Scripted {
        fn readings(values: &[(f64, f64)]) -> Self {
            Self(
                values
                    .iter()
                    .map(|&(temperature, humidity)| {
                        Ok(ClimateReading {
                            temperature,
                            humidity,
                        })
                    })
                    .collect(),
            )
        }
    }

    impl ClimateSource for Scripted {
        fn read(&mut self) -> Result<ClimateReading, DeviceError> {
            self.0.pop_front().unwrap_or(Err(DeviceError::Timeout))
        }
    }

    #[tokio::test]
    async fn test_derived_fields() {
        let source = Scripted::readings(&[(20.0, 50.0)]);
        let mut sensor = ClimateSensor::new("kiln", "dht", source, OutlierConfig::default());
        sensor.update().await.unwrap();

        let record = sensor.get_point(Utc::now()).unwrap();
        let names: Vec<_> = record.fields().iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(names, vec!["T", "RH", "VP", "AH", "VPD"]);

        let vp = record.field(VAPOR_PRESSURE).and_then(|v| v.as_f64()).unwrap();
        assert_eq!(vp, vapor_pressure(20.0, 50.0));
    }

    #[tokio::test]
    async fn test_no_point_before_first_read() {
        let mut sensor = ClimateSensor::new(
            "kiln",
            "dht",
            Scripted(VecDeque::new()),
            OutlierConfig::default(),
        );
        assert!(sensor.update().await.is_err());
        assert!(matches!(
            sensor.get_point(Utc::now()),
            Err(SensorError::MissingField { .. })
        ));
    }

    #[tokio::test]
    async fn test_spike_does_not_reach_derived_fields() {
        let mut readings = vec![(20.0, 50.0); 10];
        readings.push((20.0, 150.0));
        let mut sensor = ClimateSensor::new(
            "kiln",
            "dht",
            Scripted::readings(&readings),
            OutlierConfig::default(),
        );
        for _ in 0..11 {
            sensor.update().await.unwrap();
        }

        let record = sensor.get_point(Utc::now()).unwrap();
        assert_eq!(record.field(HUMIDITY).and_then(|v| v.as_f64()), Some(50.0));
        let vp = record.field(VAPOR_PRESSURE).and_then(|v| v.as_f64()).unwrap();
        assert_eq!(vp, vapor_pressure(20.0, 50.0));
    }
}
