//! kilnmon - sensor sampling and delivery for small embedded hosts
//!
//! Periodically samples temperature/humidity, current, moisture and
//! battery/solar sensors, filters transient spikes, and ships timestamped
//! records in batches to InfluxDB, tolerating transient write failures.
//!
//! # Architecture
//!
//! - **Device**: narrow capability traits and the Linux IIO / TCP bridge adapters
//! - **Sensor**: fields, the outlier gate and the sensor variants
//! - **Collector**: one polling cycle across all sensors
//! - **Storage**: records, line protocol, the InfluxDB store and the batch writer
//! - **Scheduler**: the polling loop and orderly shutdown
//! - **Config**: YAML configuration and validation
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use kilnmon::clock::SystemClock;
//! use kilnmon::config::AppConfig;
//! use kilnmon::scheduler::Scheduler;
//! use kilnmon::storage::BatchWriter;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = AppConfig::load("configs/kilnmon.yaml")?;
//! let writer = BatchWriter::new(
//!     config.store.connect()?,
//!     config.store.target(),
//!     config.writer.clone(),
//!     1,
//! );
//! let mut scheduler = Scheduler::new(config.interval, Arc::new(SystemClock), writer);
//! scheduler.initialize(config.sensor_factories()).await?;
//!
//! let (_stop, stop_rx) = tokio::sync::watch::channel(false);
//! let summary = scheduler.run(stop_rx).await?;
//! println!("delivered {} records", summary.records_delivered);
//! # Ok(())
//! # }
//! ```

pub mod clock;
pub mod collector;
pub mod config;
pub mod device;
pub mod scheduler;
pub mod sensor;
pub mod storage;

pub use collector::{Collector, CycleReport};
pub use scheduler::{RunSummary, Scheduler, SchedulerError, SchedulerState, SensorFactory};
pub use sensor::{Sensor, SensorError};
pub use storage::{Batch, BatchWriter, Event, Record, RemoteStore, StoreError};
