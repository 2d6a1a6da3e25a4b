//! Host network address sensor.

use chrono::{DateTime, Utc};

use crate::device::ScalarSource;
use crate::sensor::{FieldSet, Sensor, SensorError, SensorKind};
use crate::storage::Record;

/// Default sensor name.
pub const DEFAULT_NAME: &str = "ipaddr";

/// Field holding the address.
pub const IP_FIELD: &str = "ip";

/// Reports one scalar per poll, by default the host's outbound IP address.
pub struct HostAddressSensor<S> {
    group: String,
    name: String,
    source: S,
    fields: FieldSet,
}

impl<S: ScalarSource> HostAddressSensor<S> {
    pub fn new(group: impl Into<String>, name: impl Into<String>, source: S) -> Self {
        Self {
            group: group.into(),
            name: name.into(),
            source,
            fields: FieldSet::new().plain(IP_FIELD),
        }
    }
}

impl<S> std::fmt::Debug for HostAddressSensor<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostAddressSensor")
            .field("group", &self.group)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl<S: ScalarSource> Sensor for HostAddressSensor<S> {
    fn group(&self) -> &str {
        &self.group
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> SensorKind {
        SensorKind::HostAddress
    }

    async fn update(&mut self) -> Result<(), SensorError> {
        let value = self.source.read()?;
        self.fields.set(IP_FIELD, value);
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
    use crate::device::DeviceError;
    use crate::storage::FieldValue;

    struct Fixed(Option<&'static str>);

    impl ScalarSource for Fixed {
        fn read(&mut self) -> Result<FieldValue, DeviceError> {
            self.0
                .map(FieldValue::from)
                .ok_or_else(|| DeviceError::Unavailable("no route".into()))
        }
    }

    #[tokio::test]
    async fn test_reports_address() {
        let mut sensor = HostAddressSensor::new("kiln", DEFAULT_NAME, Fixed(Some("192.168.1.20")));
        sensor.update().await.unwrap();

        let record = sensor.get_point(Utc::now()).unwrap();
        assert_eq!(record.measurement(), "kiln");
        assert_eq!(record.name(), "ipaddr");
        assert_eq!(record.field(IP_FIELD), Some(&FieldValue::from("192.168.1.20")));
    }

    #[tokio::test]
    async fn test_failed_read_leaves_no_value() {
        let mut sensor = HostAddressSensor::new("kiln", DEFAULT_NAME, Fixed(None));
        assert!(matches!(
            sensor.update().await,
            Err(SensorError::Device(DeviceError::Unavailable(_)))
        ));
        assert!(matches!(
            sensor.get_point(Utc::now()),
            Err(SensorError::MissingField { .. })
        ));
    }
}
