//! Collector Layer
//!
//! One polling cycle across all registered sensors.
//!
//! Each sensor is updated and asked for a record in registration order. A
//! sensor that fails either step is logged and skipped for this cycle only;
//! the cycle itself never fails.
//!
//! # Example
//!
//! ```rust,no_run
//! use kilnmon::collector::Collector;
//! use kilnmon::device::HostAddress;
//! use kilnmon::sensor::HostAddressSensor;
//!
//! # async fn example() {
//! let mut collector = Collector::system();
//! collector.register(HostAddressSensor::new("kiln", "ipaddr", HostAddress::default()));
//! let (batch, report) = collector.poll().await;
//! assert_eq!(batch.len(), report.polled - report.skipped);
//! # }
//! ```

use std::sync::Arc;

use crate::clock::{Clock, SystemClock};
use crate::sensor::Sensor;
use crate::storage::Batch;

/// Outcome counts of one cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Sensors polled.
    pub polled: usize,
    /// Sensors that produced no record.
    pub skipped: usize,
}

/// Ordered set of sensors polled together.
pub struct Collector {
    sensors: Vec<Box<dyn Sensor>>,
    clock: Arc<dyn Clock>,
}

impl Collector {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            sensors: Vec::new(),
            clock,
        }
    }

    /// Collector stamped by the system clock.
    pub fn system() -> Self {
        Self::new(Arc::new(SystemClock))
    }

    /// Add a sensor after those already registered.
    pub fn register<S: Sensor>(&mut self, sensor: S) {
        self.register_boxed(Box::new(sensor));
    }

    pub fn register_boxed(&mut self, sensor: Box<dyn Sensor>) {
        tracing::debug!(
            group = %sensor.group(),
            sensor = %sensor.name(),
            kind = %sensor.kind(),
            "Sensor registered"
        );
        self.sensors.push(sensor);
    }

    pub fn len(&self) -> usize {
        self.sensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sensors.is_empty()
    }

    /// Sensor names in registration order.
    pub fn sensor_names(&self) -> impl Iterator<Item = &str> {
        self.sensors.iter().map(|s| s.name())
    }

    /// Run one cycle.
    pub async fn poll(&mut self) -> (Batch, CycleReport) {
        let mut batch = Batch::with_capacity(self.sensors.len());
        let mut report = CycleReport {
            polled: self.sensors.len(),
            skipped: 0,
        };

        for sensor in &mut self.sensors {
            if let Err(e) = sensor.update().await {
                tracing::warn!(sensor = %sensor.name(), error = %e, "Sensor update failed");
                report.skipped += 1;
                continue;
            }

            match sensor.get_point(self.clock.now()) {
                Ok(record) => batch.push(record),
                Err(e) => {
                    tracing::warn!(sensor = %sensor.name(), error = %e, "Sensor produced no record");
                    report.skipped += 1;
                }
            }
        }

        tracing::debug!(
            polled = report.polled,
            skipped = report.skipped,
            records = batch.len(),
            "Cycle complete"
        );
        (batch, report)
    }

    /// Shut down every sensor in registration order.
    ///
    /// Failures are logged and do not stop the remaining sensors. Returns the
    /// number of sensors that failed to shut down.
    pub async fn shutdown(&mut self) -> usize {
        let mut failures = 0;
        for sensor in &mut self.sensors {
            match sensor.shutdown().await {
                Ok(()) => tracing::debug!(sensor = %sensor.name(), "Sensor shut down"),
                Err(e) => {
                    failures += 1;
                    tracing::error!(sensor = %sensor.name(), error = %e, "Sensor shutdown failed");
                }
            }
        }
        failures
    }
}

impl std::fmt::Debug for Collector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collector")
            .field("sensors", &self.sensor_names().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::device::DeviceError;
    use crate::sensor::{SensorError, SensorKind};
    use crate::storage::Record;
    use chrono::{DateTime, TimeZone, Utc};
    use std::sync::Mutex;

    /// Sensor that always (or never) produces a record, and logs shutdown order.
    struct Stub {
        name: &'static str,
        fails: bool,
        shutdowns: Arc<Mutex<Vec<&'static str>>>,
    }

    #[async_trait::async_trait]
    impl Sensor for Stub {
        fn group(&self) -> &str {
            "kiln"
        }

        fn name(&self) -> &str {
            self.name
        }

        fn kind(&self) -> SensorKind {
            SensorKind::Current
        }

        async fn update(&mut self) -> Result<(), SensorError> {
            if self.fails {
                Err(DeviceError::Timeout.into())
            } else {
                Ok(())
            }
        }

        fn get_point(&mut self, ts: DateTime<Utc>) -> Result<Record, SensorError> {
            Ok(Record::new("kiln", self.name, ts, vec![("v".into(), 1.0.into())]))
        }

        async fn shutdown(&mut self) -> Result<(), SensorError> {
            self.shutdowns.lock().unwrap().push(self.name);
            if self.fails {
                Err(SensorError::Config("stuck".into()))
            } else {
                Ok(())
            }
        }
    }

    fn collector(specs: &[(&'static str, bool)]) -> (Collector, Arc<Mutex<Vec<&'static str>>>) {
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let shutdowns = Arc::new(Mutex::new(Vec::new()));
        let mut collector = Collector::new(Arc::new(FixedClock(ts)));
        for &(name, fails) in specs {
            collector.register(Stub {
                name,
                fails,
                shutdowns: shutdowns.clone(),
            });
        }
        (collector, shutdowns)
    }

    #[tokio::test]
    async fn test_failing_sensor_skipped_in_order() {
        let (mut collector, _) =
            collector(&[("a", false), ("b", true), ("c", false), ("d", false)]);
        let (batch, report) = collector.poll().await;

        let names: Vec<_> = batch.records().iter().map(|r| r.name()).collect();
        assert_eq!(names, vec!["a", "c", "d"]);
        assert_eq!(report, CycleReport { polled: 4, skipped: 1 });
    }

    #[tokio::test]
    async fn test_records_use_clock() {
        let (mut collector, _) = collector(&[("a", false)]);
        let (batch, _) = collector.poll().await;
        assert_eq!(
            batch.records()[0].ts(),
            Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
        );
    }

    #[tokio::test]
    async fn test_empty_cycle() {
        let (mut collector, _) = collector(&[]);
        let (batch, report) = collector.poll().await;
        assert!(batch.is_empty());
        assert_eq!(report, CycleReport::default());
    }

    #[tokio::test]
    async fn test_shutdown_continues_after_failure() {
        let (mut collector, shutdowns) = collector(&[("a", true), ("b", false), ("c", true)]);
        assert_eq!(collector.shutdown().await, 2);
        assert_eq!(*shutdowns.lock().unwrap(), vec!["a", "b", "c"]);
    }
}
