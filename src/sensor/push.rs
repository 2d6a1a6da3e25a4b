//! Push sensor: a device that reports on its own schedule.
//!
//! A background worker owns the [`PushSession`] and drives it through
//! `Disconnected → Connecting → Connected → Polling`:
//!
//! 1. `connect()` hands the session an event channel.
//! 2. On [`SessionEvent::Connected`] the worker requests data and keeps
//!    re-requesting every `poll_interval`.
//! 3. Every [`SessionEvent::Data`] is published as the latest [`PushSample`].
//! 4. On [`SessionEvent::Disconnected`] (or a failed request) the worker waits
//!    `reconnect_delay` and starts over.
//!
//! The sensor side never blocks on the device: `update()` does nothing and
//! `get_point()` copies the latest sample into the sensor's fields.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, sleep, timeout};

use crate::device::{PushSession, SessionEvent};
use crate::sensor::{FieldSet, Sensor, SensorError, SensorKind, SessionState};
use crate::storage::Record;

/// Default interval between data requests (30 seconds).
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Default wait before reconnecting (10 seconds).
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(10);

/// Default timeout for joining the worker (5 seconds).
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Solar charge controller telemetry.
pub const DEFAULT_FIELDS: [&str; 9] = [
    "battery_percentage",
    "battery_voltage",
    "battery_amps",
    "load_voltage",
    "load_current",
    "load_power",
    "pv_voltage",
    "pv_current",
    "pv_power",
];

const EVENT_BUFFER: usize = 16;

/// Worker timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushOptions {
    #[serde(default = "default_poll_interval", with = "humantime_serde")]
    pub poll_interval: Duration,
    #[serde(default = "default_reconnect_delay", with = "humantime_serde")]
    pub reconnect_delay: Duration,
}

fn default_poll_interval() -> Duration {
    DEFAULT_POLL_INTERVAL
}

fn default_reconnect_delay() -> Duration {
    DEFAULT_RECONNECT_DELAY
}

impl Default for PushOptions {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
        }
    }
}

/// One payload received from the device.
#[derive(Debug, Clone, PartialEq)]
pub struct PushSample {
    pub received_at: DateTime<Utc>,
    pub values: BTreeMap<String, f64>,
}

// ============================================================================
// Worker
// ============================================================================

/// Resolves once stop is requested or the sensor is gone.
async fn stopped(stop: &mut watch::Receiver<bool>) {
    let _ = stop.wait_for(|stop| *stop).await;
}

struct Worker<P> {
    sensor: String,
    session: P,
    options: PushOptions,
    state: watch::Sender<SessionState>,
    samples: watch::Sender<Option<PushSample>>,
    stop: watch::Receiver<bool>,
}

impl<P: PushSession> Worker<P> {
    fn set_state(&self, state: SessionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            tracing::trace!(sensor = %self.sensor, from = %previous, to = %state, "Session state");
        }
    }

    async fn run(mut self) {
        loop {
            if *self.stop.borrow() {
                break;
            }

            self.set_state(SessionState::Connecting);
            let (tx, mut events) = mpsc::channel(EVENT_BUFFER);
            let stop_requested = match self.session.connect(tx).await {
                Ok(()) => self.serve(&mut events).await,
                Err(e) => {
                    tracing::warn!(sensor = %self.sensor, error = %e, "Push session connect failed");
                    false
                }
            };
            if stop_requested {
                break;
            }

            self.set_state(SessionState::Disconnected);
            tokio::select! {
                _ = sleep(self.options.reconnect_delay) => {}
                _ = stopped(&mut self.stop) => break,
            }
        }

        if let Err(e) = self.session.disconnect().await {
            tracing::warn!(sensor = %self.sensor, error = %e, "Push session disconnect failed");
        }
        self.set_state(SessionState::Disconnected);
        tracing::debug!(sensor = %self.sensor, "Push worker stopped");
    }

    /// Handle one connection. Returns `true` if stop was requested.
    async fn serve(&mut self, events: &mut mpsc::Receiver<SessionEvent>) -> bool {
        let mut ticker = tokio::time::interval(self.options.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut polling = false;

        loop {
            tokio::select! {
                _ = stopped(&mut self.stop) => return true,

                event = events.recv() => match event {
                    Some(SessionEvent::Connected) => {
                        self.set_state(SessionState::Connected);
                        if let Err(e) = self.session.request_data().await {
                            tracing::warn!(sensor = %self.sensor, error = %e, "Data request failed");
                            return false;
                        }
                        self.set_state(SessionState::Polling);
                        ticker.reset();
                        polling = true;
                    }
                    Some(SessionEvent::Data(values)) => {
                        tracing::trace!(sensor = %self.sensor, count = values.len(), "Push data");
                        self.samples.send_replace(Some(PushSample {
                            received_at: Utc::now(),
                            values,
                        }));
                    }
                    Some(SessionEvent::Disconnected(reason)) => {
                        tracing::warn!(
                            sensor = %self.sensor,
                            reason = reason.as_deref().unwrap_or("closed"),
                            "Push session disconnected"
                        );
                        return false;
                    }
                    None => return false,
                },

                _ = ticker.tick(), if polling => {
                    if let Err(e) = self.session.request_data().await {
                        tracing::warn!(sensor = %self.sensor, error = %e, "Data request failed");
                        return false;
                    }
                }
            }
        }
    }
}

// ============================================================================
// Sensor
// ============================================================================

/// Sensor fed by a background push session.
pub struct PushSensor {
    group: String,
    name: String,
    fields: FieldSet,
    samples: watch::Receiver<Option<PushSample>>,
    state: watch::Receiver<SessionState>,
    stop: watch::Sender<bool>,
    worker: Option<JoinHandle<()>>,
    shutdown_timeout: Duration,
}

impl PushSensor {
    /// Start the worker for `session`. Must be called within a tokio runtime.
    pub fn spawn<P: PushSession>(
        group: impl Into<String>,
        name: impl Into<String>,
        session: P,
        options: PushOptions,
    ) -> Self {
        let name = name.into();
        let (state_tx, state) = watch::channel(SessionState::Disconnected);
        let (samples_tx, samples) = watch::channel(None);
        let (stop, stop_rx) = watch::channel(false);

        let worker = Worker {
            sensor: name.clone(),
            session,
            options,
            state: state_tx,
            samples: samples_tx,
            stop: stop_rx,
        };
        let handle = tokio::spawn(worker.run());

        let fields = DEFAULT_FIELDS
            .iter()
            .fold(FieldSet::new(), |set, field| set.plain(*field));

        Self {
            group: group.into(),
            name,
            fields,
            samples,
            state,
            stop,
            worker: Some(handle),
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }

    /// Replace the default field list.
    pub fn with_fields<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields = names
            .into_iter()
            .fold(FieldSet::new(), |set, field| set.plain(field));
        self
    }

    pub fn with_shutdown_timeout(mut self, shutdown_timeout: Duration) -> Self {
        self.shutdown_timeout = shutdown_timeout;
        self
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Latest payload, if any has arrived.
    pub fn latest(&self) -> Option<PushSample> {
        self.samples.borrow().clone()
    }
}

impl std::fmt::Debug for PushSensor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PushSensor")
            .field("group", &self.group)
            .field("name", &self.name)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Drop for PushSensor {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.abort();
        }
    }
}

#[async_trait::async_trait]
impl Sensor for PushSensor {
    fn group(&self) -> &str {
        &self.group
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> SensorKind {
        SensorKind::PushBridge
    }

    async fn update(&mut self) -> Result<(), SensorError> {
        Ok(())
    }

    fn get_point(&mut self, ts: DateTime<Utc>) -> Result<Record, SensorError> {
        let latest = self.samples.borrow();
        let Some(sample) = latest.as_ref() else {
            return Err(SensorError::NoData(self.name.clone()));
        };
        for (field, value) in &sample.values {
            // Members the sensor does not declare are ignored.
            self.fields.set(field, *value);
        }
        drop(latest);

        let values = self.fields.snapshot(&self.name)?;
        Ok(Record::new(&self.group, &self.name, ts, values))
    }

    async fn shutdown(&mut self) -> Result<(), SensorError> {
        self.stop.send_replace(true);
        let Some(mut worker) = self.worker.take() else {
            return Ok(());
        };

        match timeout(self.shutdown_timeout, &mut worker).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                tracing::warn!(sensor = %self.name, error = %e, "Push worker ended abnormally");
                Ok(())
            }
            Err(_) => {
                worker.abort();
                Err(SensorError::ShutdownTimeout(self.name.clone()))
            }
        }
    }
}
