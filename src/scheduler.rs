//! Polling loop.
//!
//! The [`Scheduler`] builds the sensors, then runs one collector cycle and one
//! delivery per tick until stopped, and finally shuts every sensor down.
//!
//! ```text
//! Initializing ──ok──▶ Running ──stop──▶ Stopping ──▶ Terminated
//!      │                                                  ▲
//!      └──────────── required sensor failed ──────────────┘
//! ```

use std::sync::Arc;
use std::time::Duration;

use strum_macros::{AsRefStr, Display};
use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use crate::clock::Clock;
use crate::collector::Collector;
use crate::sensor::{Sensor, SensorError};
use crate::storage::{BatchWriter, Event, EventKind, EventSeverity, RemoteStore};

/// Static event source tag for scheduler events.
const SCHEDULER_EVENT_SOURCE: &str = "scheduler";

/// Lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum SchedulerState {
    Initializing,
    Running,
    Stopping,
    Terminated,
}

#[derive(Debug, Error)]
pub enum SchedulerError {
    /// A required sensor could not be built.
    #[error("failed to start sensor '{sensor}': {source}")]
    Startup {
        sensor: String,
        #[source]
        source: SensorError,
    },

    /// The operation is not valid in the current state.
    #[error("scheduler is {0}")]
    InvalidState(SchedulerState),
}

/// Totals of one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub cycles: u64,
    pub records_delivered: u64,
    pub records_dropped: u64,
    pub failed_flushes: u64,
}

type BuildFn = Box<dyn FnOnce() -> Result<Box<dyn Sensor>, SensorError> + Send>;

/// Deferred construction of one sensor.
pub struct SensorFactory {
    name: String,
    required: bool,
    build: BuildFn,
}

impl SensorFactory {
    /// A required sensor: if it fails to build, startup fails.
    pub fn new<F, S>(name: impl Into<String>, build: F) -> Self
    where
        F: FnOnce() -> Result<S, SensorError> + Send + 'static,
        S: Sensor,
    {
        Self {
            name: name.into(),
            required: true,
            build: Box::new(move || build().map(|s| Box::new(s) as Box<dyn Sensor>)),
        }
    }

    /// Mark the sensor optional: a build failure is logged and the sensor is
    /// left out.
    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn with_required(mut self, required: bool) -> Self {
        self.required = required;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_required(&self) -> bool {
        self.required
    }

    /// Construct the sensor.
    pub fn build(self) -> Result<Box<dyn Sensor>, SensorError> {
        (self.build)()
    }
}

impl std::fmt::Debug for SensorFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SensorFactory")
            .field("name", &self.name)
            .field("required", &self.required)
            .finish_non_exhaustive()
    }
}

/// Resolves once stop is requested or the stop sender is gone.
async fn stopped(stop: &mut watch::Receiver<bool>) {
    let _ = stop.wait_for(|stop| *stop).await;
}

/// Drives collection and delivery on a fixed interval.
pub struct Scheduler<S> {
    interval: Duration,
    state: SchedulerState,
    collector: Collector,
    writer: BatchWriter<S>,
    events: Option<UnboundedSender<Event>>,
}

impl<S> std::fmt::Debug for Scheduler<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("interval", &self.interval)
            .field("state", &self.state)
            .field("collector", &self.collector)
            .finish_non_exhaustive()
    }
}

impl<S: RemoteStore> Scheduler<S> {
    pub fn new(interval: Duration, clock: Arc<dyn Clock>, writer: BatchWriter<S>) -> Self {
        Self {
            interval,
            state: SchedulerState::Initializing,
            collector: Collector::new(clock),
            writer,
            events: None,
        }
    }

    /// Publish lifecycle events to `tx`.
    pub fn with_events(mut self, tx: UnboundedSender<Event>) -> Self {
        self.events = Some(tx);
        self
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub fn collector(&self) -> &Collector {
        &self.collector
    }

    pub fn writer(&self) -> &BatchWriter<S> {
        &self.writer
    }

    /// Build every sensor in order.
    ///
    /// # Errors
    /// If a required sensor fails, the sensors built so far are shut down,
    /// the scheduler ends in `Terminated` and `SchedulerError::Startup` is
    /// returned.
    pub async fn initialize(
        &mut self,
        factories: Vec<SensorFactory>,
    ) -> Result<(), SchedulerError> {
        if self.state != SchedulerState::Initializing {
            return Err(SchedulerError::InvalidState(self.state));
        }

        for factory in factories {
            let name = factory.name.clone();
            let required = factory.required;
            match factory.build() {
                Ok(sensor) => self.collector.register_boxed(sensor),
                Err(e) if !required => {
                    tracing::warn!(sensor = %name, error = %e, "Optional sensor unavailable, skipping");
                }
                Err(e) => {
                    tracing::error!(sensor = %name, error = %e, "Required sensor failed to start");
                    self.emit(
                        EventKind::Error,
                        EventSeverity::Critical,
                        format!("Sensor '{name}' failed to start"),
                        serde_json::json!({ "sensor": name, "error": e.to_string() }),
                    );
                    self.collector.shutdown().await;
                    self.state = SchedulerState::Terminated;
                    return Err(SchedulerError::Startup {
                        sensor: name,
                        source: e,
                    });
                }
            }
        }

        if self.collector.is_empty() {
            tracing::warn!("No sensors registered");
        }
        self.writer.set_default_batch_size(self.collector.len());
        self.state = SchedulerState::Running;
        Ok(())
    }

    /// Run cycles until `stop` turns true (or its sender is dropped), then
    /// shut down every sensor.
    ///
    /// Stop is only observed between cycles; a cycle in progress, including
    /// its delivery retries, runs to completion.
    pub async fn run(
        &mut self,
        mut stop: watch::Receiver<bool>,
    ) -> Result<RunSummary, SchedulerError> {
        if self.state != SchedulerState::Running {
            return Err(SchedulerError::InvalidState(self.state));
        }

        let sensors: Vec<String> = self.collector.sensor_names().map(String::from).collect();
        tracing::info!(
            interval = ?self.interval,
            sensors = ?sensors,
            batch_size = self.writer.batch_size(),
            "Scheduler started"
        );
        self.emit(
            EventKind::System,
            EventSeverity::Info,
            "Scheduler started".to_string(),
            serde_json::json!({
                "sensors": sensors,
                "interval_ms": self.interval.as_millis() as u64,
            }),
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut cycles = 0u64;

        loop {
            tokio::select! {
                biased;
                _ = stopped(&mut stop) => break,
                _ = ticker.tick() => {}
            }

            let (batch, _) = self.collector.poll().await;
            let delivery = self.writer.deliver(batch).await;
            cycles += 1;
            tracing::trace!(
                cycle = cycles,
                delivered = delivery.delivered,
                dropped = delivery.dropped,
                "Delivery complete"
            );
        }

        self.state = SchedulerState::Stopping;
        tracing::info!(cycles, "Stopping, shutting down sensors");
        let failures = self.collector.shutdown().await;

        let stats = self.writer.stats();
        let summary = RunSummary {
            cycles,
            records_delivered: stats.delivered(),
            records_dropped: stats.dropped(),
            failed_flushes: stats.failed_flushes(),
        };
        self.state = SchedulerState::Terminated;

        tracing::info!(
            cycles = summary.cycles,
            delivered = summary.records_delivered,
            dropped = summary.records_dropped,
            sensor_shutdown_failures = failures,
            "Scheduler terminated"
        );
        self.emit(
            EventKind::System,
            EventSeverity::Info,
            "Scheduler terminated".to_string(),
            serde_json::json!({
                "cycles": summary.cycles,
                "records_delivered": summary.records_delivered,
                "records_dropped": summary.records_dropped,
                "failed_flushes": summary.failed_flushes,
            }),
        );
        Ok(summary)
    }

    fn emit(
        &self,
        kind: EventKind,
        severity: EventSeverity,
        message: String,
        payload: serde_json::Value,
    ) {
        let Some(tx) = &self.events else {
            return;
        };
        let mut event = Event::new(SCHEDULER_EVENT_SOURCE, kind, severity, message);
        if let serde_json::Value::Object(members) = payload {
            for (key, value) in members {
                event = event.with_payload(&key, value);
            }
        }
        let _ = tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::device::DeviceError;
    use crate::sensor::SensorKind;
    use crate::storage::{Record, StoreError, WriteOptions, WriteTarget};
    use chrono::{DateTime, Utc};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct MemoryStore {
        writes: Mutex<Vec<usize>>,
    }

    #[async_trait::async_trait]
    impl RemoteStore for MemoryStore {
        async fn write(&self, _target: &WriteTarget, records: &[Record]) -> Result<(), StoreError> {
            self.writes.lock().unwrap().push(records.len());
            Ok(())
        }
    }

    struct Counter {
        name: String,
        shutdowns: Arc<AtomicUsize>,
    }

    #[async_trait::async_trait]
    impl Sensor for Counter {
        fn group(&self) -> &str {
            "kiln"
        }

        fn name(&self) -> &str {
            &self.name
        }

        fn kind(&self) -> SensorKind {
            SensorKind::Current
        }

        async fn update(&mut self) -> Result<(), SensorError> {
            Ok(())
        }

        fn get_point(&mut self, ts: DateTime<Utc>) -> Result<Record, SensorError> {
            Ok(Record::new("kiln", &self.name, ts, vec![("A".into(), 0.5.into())]))
        }

        async fn shutdown(&mut self) -> Result<(), SensorError> {
            self.shutdowns.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn ok_factory(name: &str, shutdowns: &Arc<AtomicUsize>) -> SensorFactory {
        let sensor = Counter {
            name: name.to_string(),
            shutdowns: shutdowns.clone(),
        };
        SensorFactory::new(name, move || Ok(sensor))
    }

    fn failing_factory(name: &str) -> SensorFactory {
        SensorFactory::new(name, || {
            Err::<Counter, _>(SensorError::Device(DeviceError::Unavailable(
                "no device".into(),
            )))
        })
    }

    fn scheduler(store: Arc<MemoryStore>) -> Scheduler<Arc<MemoryStore>> {
        let writer = BatchWriter::new(
            store,
            WriteTarget::new("org", "kiln"),
            WriteOptions::default(),
            1,
        );
        Scheduler::new(Duration::from_secs(10), Arc::new(SystemClock), writer)
    }

    #[tokio::test]
    async fn test_required_failure_is_fatal() {
        let shutdowns = Arc::new(AtomicUsize::new(0));
        let mut scheduler = scheduler(Arc::default());
        let result = scheduler
            .initialize(vec![
                ok_factory("a", &shutdowns),
                failing_factory("b"),
                ok_factory("c", &shutdowns),
            ])
            .await;

        assert!(matches!(
            result,
            Err(SchedulerError::Startup { ref sensor, .. }) if sensor == "b"
        ));
        assert_eq!(scheduler.state(), SchedulerState::Terminated);
        // Only "a" was built; it was shut down again.
        assert_eq!(shutdowns.load(Ordering::SeqCst), 1);

        let (_tx, rx) = watch::channel(false);
        assert!(matches!(
            scheduler.run(rx).await,
            Err(SchedulerError::InvalidState(SchedulerState::Terminated))
        ));
    }

    #[tokio::test]
    async fn test_optional_failure_skipped() {
        let shutdowns = Arc::new(AtomicUsize::new(0));
        let mut scheduler = scheduler(Arc::default());
        scheduler
            .initialize(vec![
                ok_factory("a", &shutdowns),
                failing_factory("b").optional(),
                ok_factory("c", &shutdowns),
            ])
            .await
            .unwrap();

        assert_eq!(scheduler.state(), SchedulerState::Running);
        let names: Vec<_> = scheduler.collector().sensor_names().collect();
        assert_eq!(names, vec!["a", "c"]);
        // Batch size follows the sensor count.
        assert_eq!(scheduler.writer().batch_size(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_until_stopped() {
        let store = Arc::new(MemoryStore::default());
        let shutdowns = Arc::new(AtomicUsize::new(0));
        let mut scheduler = scheduler(store.clone());
        scheduler
            .initialize(vec![ok_factory("a", &shutdowns), ok_factory("b", &shutdowns)])
            .await
            .unwrap();

        let (tx, rx) = watch::channel(false);
        tokio::spawn(async move {
            // Ticks at 0s, 10s and 20s run before the stop at 25s.
            tokio::time::sleep(Duration::from_secs(25)).await;
            tx.send(true).unwrap();
        });

        let summary = scheduler.run(rx).await.unwrap();
        assert_eq!(summary.cycles, 3);
        assert_eq!(summary.records_delivered, 6);
        assert_eq!(summary.records_dropped, 0);
        assert_eq!(*store.writes.lock().unwrap(), vec![2, 2, 2]);
        assert_eq!(shutdowns.load(Ordering::SeqCst), 2);
        assert_eq!(scheduler.state(), SchedulerState::Terminated);
    }

    /// Fails the first write with a retryable error, then succeeds. Each
    /// attempt records how many sensors were already shut down.
    struct SlowStore {
        attempts: Mutex<Vec<usize>>,
        shutdowns: Arc<AtomicUsize>,
    }

    #[async_trait::async_trait]
    impl RemoteStore for SlowStore {
        async fn write(&self, _target: &WriteTarget, _records: &[Record]) -> Result<(), StoreError> {
            let mut attempts = self.attempts.lock().unwrap();
            attempts.push(self.shutdowns.load(Ordering::SeqCst));
            if attempts.len() == 1 {
                return Err(StoreError::Server {
                    status: 503,
                    message: "busy".into(),
                });
            }
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_during_retry_finishes_cycle() {
        let shutdowns = Arc::new(AtomicUsize::new(0));
        let store = Arc::new(SlowStore {
            attempts: Mutex::new(Vec::new()),
            shutdowns: shutdowns.clone(),
        });
        let writer = BatchWriter::new(
            store.clone(),
            WriteTarget::new("org", "kiln"),
            WriteOptions::default().with_retry_interval(Duration::from_secs(10)),
            1,
        );
        let mut scheduler =
            Scheduler::new(Duration::from_secs(60), Arc::new(SystemClock), writer);
        scheduler
            .initialize(vec![ok_factory("a", &shutdowns), ok_factory("b", &shutdowns)])
            .await
            .unwrap();

        let (tx, rx) = watch::channel(false);
        tokio::spawn(async move {
            // The first flush fails at 0s and backs off until 10s.
            tokio::time::sleep(Duration::from_secs(3)).await;
            tx.send(true).unwrap();
        });

        let summary = scheduler.run(rx).await.unwrap();
        assert_eq!(summary.cycles, 1);
        assert_eq!(summary.records_delivered, 2);
        assert_eq!(summary.records_dropped, 0);
        // Both attempts ran before any sensor was shut down.
        assert_eq!(*store.attempts.lock().unwrap(), vec![0, 0]);
        assert_eq!(shutdowns.load(Ordering::SeqCst), 2);
        assert_eq!(scheduler.state(), SchedulerState::Terminated);
    }

    #[tokio::test]
    async fn test_stop_before_first_cycle() {
        let shutdowns = Arc::new(AtomicUsize::new(0));
        let mut scheduler = scheduler(Arc::default());
        scheduler
            .initialize(vec![ok_factory("a", &shutdowns)])
            .await
            .unwrap();

        let (_tx, rx) = watch::channel(true);
        let summary = scheduler.run(rx).await.unwrap();
        assert_eq!(summary.cycles, 0);
        assert_eq!(shutdowns.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_lifecycle_events() {
        let (events_tx, mut events_rx) = tokio::sync::mpsc::unbounded_channel();
        let mut scheduler = scheduler(Arc::default()).with_events(events_tx);
        scheduler.initialize(vec![failing_factory("dht")]).await.unwrap_err();

        let event = events_rx.try_recv().unwrap();
        assert_eq!(event.kind, EventKind::Error);
        assert_eq!(event.severity, EventSeverity::Critical);
        assert_eq!(event.source, "scheduler");
    }
}
