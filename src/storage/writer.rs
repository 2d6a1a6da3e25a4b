//! Buffered, retrying batch writer.
//!
//! A [`BatchWriter`] owns the store handle and delivery options. Each delivery
//! runs inside a scoped [`WriteSession`]: records are buffered and flushed when
//! the buffer reaches `batch_size` records or the oldest record has waited
//! `flush_interval`, and whatever remains is flushed on [`WriteSession::close`].
//!
//! A failed flush is retried with exponential backoff plus jitter. When the
//! retries run out the chunk is dropped and exactly one delivery-failure
//! [`Event`] is emitted.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedSender;

use crate::storage::StoreError;
use crate::storage::store::{RemoteStore, WriteTarget};
use crate::storage::types::{Batch, Event, EventKind, EventSeverity, Record};

/// Default flush interval (1 second).
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(1);

/// Default base retry interval (5 seconds).
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(5);

/// Default maximum number of retries after the first attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Default cap on a single backoff delay (125 seconds).
pub const DEFAULT_MAX_RETRY_DELAY: Duration = Duration::from_secs(125);

/// Default backoff multiplier.
pub const DEFAULT_EXPONENTIAL_BASE: f64 = 2.0;

/// Event source tag for writer events.
const WRITER_EVENT_SOURCE: &str = "writer";

fn default_flush_interval() -> Duration {
    DEFAULT_FLUSH_INTERVAL
}

fn default_retry_interval() -> Duration {
    DEFAULT_RETRY_INTERVAL
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

fn default_max_retry_delay() -> Duration {
    DEFAULT_MAX_RETRY_DELAY
}

fn default_exponential_base() -> f64 {
    DEFAULT_EXPONENTIAL_BASE
}

/// Delivery options, named after the InfluxDB client write options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WriteOptions {
    /// Records per flush. Defaults to the number of registered sensors.
    #[serde(default)]
    pub batch_size: Option<usize>,
    /// Maximum time a buffered record waits before a flush (default: 1s).
    ///
    /// The deadline is checked when the next record is written, not by a
    /// timer. [`BatchWriter::deliver`] writes a cycle's records back to back,
    /// so there only `batch_size` and the final `close()` decide the flushes.
    #[serde(default = "default_flush_interval", with = "humantime_serde")]
    pub flush_interval: Duration,
    /// Upper bound of the random delay added before each flush and retry (default: 0).
    #[serde(default, with = "humantime_serde")]
    pub jitter_interval: Duration,
    /// Delay before the first retry (default: 5s).
    #[serde(default = "default_retry_interval", with = "humantime_serde")]
    pub retry_interval: Duration,
    /// Retries after the first failed attempt (default: 5).
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Cap on a single backoff delay (default: 125s).
    #[serde(default = "default_max_retry_delay", with = "humantime_serde")]
    pub max_retry_delay: Duration,
    /// Backoff multiplier between consecutive retries (default: 2).
    #[serde(default = "default_exponential_base")]
    pub exponential_base: f64,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            batch_size: None,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            jitter_interval: Duration::ZERO,
            retry_interval: DEFAULT_RETRY_INTERVAL,
            max_retries: DEFAULT_MAX_RETRIES,
            max_retry_delay: DEFAULT_MAX_RETRY_DELAY,
            exponential_base: DEFAULT_EXPONENTIAL_BASE,
        }
    }
}

impl WriteOptions {
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = Some(size);
        self
    }

    pub fn with_flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }

    pub fn with_jitter_interval(mut self, interval: Duration) -> Self {
        self.jitter_interval = interval;
        self
    }

    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn with_max_retry_delay(mut self, delay: Duration) -> Self {
        self.max_retry_delay = delay;
        self
    }

    pub fn with_exponential_base(mut self, base: f64) -> Self {
        self.exponential_base = base;
        self
    }

    /// Backoff before retry number `retry` (1-based), without jitter.
    pub fn backoff(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(i32::MAX as u32) as i32;
        let factor = self.exponential_base.max(1.0).powi(exponent);
        let delay = self.retry_interval.as_secs_f64() * factor;
        if !delay.is_finite() || delay >= self.max_retry_delay.as_secs_f64() {
            self.max_retry_delay
        } else {
            Duration::from_secs_f64(delay)
        }
    }

    fn jitter(&self) -> Duration {
        if self.jitter_interval.is_zero() {
            return Duration::ZERO;
        }
        let max_ms = self.jitter_interval.as_millis().min(u64::MAX as u128) as u64;
        Duration::from_millis(rand::rng().random_range(0..=max_ms))
    }
}

/// Delivery counters shared by every clone of the writer's stats handle.
#[derive(Debug, Clone, Default)]
pub struct DeliveryStats {
    delivered: Arc<AtomicU64>,
    dropped: Arc<AtomicU64>,
    failed_flushes: Arc<AtomicU64>,
}

impl DeliveryStats {
    /// Records accepted by the store.
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    /// Records discarded after a failed flush.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Flushes that ended in a dropped chunk.
    pub fn failed_flushes(&self) -> u64 {
        self.failed_flushes.load(Ordering::Relaxed)
    }
}

/// Outcome of one flush.
#[derive(Debug)]
pub enum FlushOutcome {
    Delivered { records: usize, attempts: u32 },
    Dropped {
        records: usize,
        attempts: u32,
        error: StoreError,
    },
}

/// Summary of one session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub delivered: usize,
    pub dropped: usize,
    pub flushes: usize,
    pub failed_flushes: usize,
}

impl DeliveryReport {
    fn record(&mut self, outcome: &FlushOutcome) {
        self.flushes += 1;
        match outcome {
            FlushOutcome::Delivered { records, .. } => self.delivered += records,
            FlushOutcome::Dropped { records, .. } => {
                self.dropped += records;
                self.failed_flushes += 1;
            }
        }
    }
}

/// Buffer with time-based and size-based flushing.
struct BatchBuffer<T> {
    items: Vec<T>,
    capacity: usize,
    flush_interval: Duration,
    oldest: Instant,
}

impl<T> BatchBuffer<T> {
    fn new(capacity: usize, flush_interval: Duration) -> Self {
        Self {
            items: Vec::with_capacity(capacity),
            capacity,
            flush_interval,
            oldest: Instant::now(),
        }
    }

    fn push(&mut self, item: T) {
        // The deadline runs from the first buffered item, not from the last flush.
        if self.items.is_empty() {
            self.oldest = Instant::now();
        }
        self.items.push(item);
    }

    fn should_flush(&self) -> bool {
        self.items.len() >= self.capacity
            || (!self.items.is_empty() && self.oldest.elapsed() >= self.flush_interval)
    }

    fn take(&mut self) -> Vec<T> {
        std::mem::take(&mut self.items)
    }

    fn len(&self) -> usize {
        self.items.len()
    }

    fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Delivers batches to a [`RemoteStore`].
pub struct BatchWriter<S> {
    store: S,
    target: WriteTarget,
    options: WriteOptions,
    batch_size: usize,
    stats: DeliveryStats,
    events: Option<UnboundedSender<Event>>,
}

impl<S> std::fmt::Debug for BatchWriter<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchWriter")
            .field("target", &self.target)
            .field("options", &self.options)
            .field("batch_size", &self.batch_size)
            .finish_non_exhaustive()
    }
}

impl<S: RemoteStore> BatchWriter<S> {
    /// Create a writer. Without an explicit `batch_size` in `options`, a
    /// flush carries at most `default_batch_size` records.
    pub fn new(
        store: S,
        target: WriteTarget,
        options: WriteOptions,
        default_batch_size: usize,
    ) -> Self {
        let batch_size = options.batch_size.unwrap_or(default_batch_size).max(1);
        Self {
            store,
            target,
            options,
            batch_size,
            stats: DeliveryStats::default(),
            events: None,
        }
    }

    /// Send delivery-failure events to `tx`.
    pub fn with_events(mut self, tx: UnboundedSender<Event>) -> Self {
        self.events = Some(tx);
        self
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Change the fallback batch size used when `options` sets none.
    pub fn set_default_batch_size(&mut self, default_batch_size: usize) {
        self.batch_size = self
            .options
            .batch_size
            .unwrap_or(default_batch_size)
            .max(1);
    }

    pub fn options(&self) -> &WriteOptions {
        &self.options
    }

    pub fn stats(&self) -> DeliveryStats {
        self.stats.clone()
    }

    /// Open a scoped write session.
    pub fn open(&self) -> WriteSession<'_, S> {
        WriteSession {
            writer: self,
            buffer: BatchBuffer::new(self.batch_size, self.options.flush_interval),
            report: DeliveryReport::default(),
        }
    }

    /// Deliver one cycle's batch as a single logical write.
    pub async fn deliver(&self, batch: Batch) -> DeliveryReport {
        if batch.is_empty() {
            return DeliveryReport::default();
        }
        let mut session = self.open();
        for record in batch {
            session.write(record).await;
        }
        session.close().await
    }

    /// Write `records` with retry. Never fails; a dropped chunk is reported
    /// through the outcome, the counters and one event.
    pub async fn flush(&self, records: Vec<Record>) -> FlushOutcome {
        let count = records.len();
        let jitter = self.options.jitter();
        if !jitter.is_zero() {
            tokio::time::sleep(jitter).await;
        }

        let mut attempts = 0;
        let error = loop {
            attempts += 1;
            match self.store.write(&self.target, &records).await {
                Ok(()) => {
                    self.stats
                        .delivered
                        .fetch_add(count as u64, Ordering::Relaxed);
                    tracing::debug!(count, attempts, "Flush succeeded");
                    return FlushOutcome::Delivered {
                        records: count,
                        attempts,
                    };
                }
                Err(e) if e.is_retryable() && attempts <= self.options.max_retries => {
                    let delay = self.options.backoff(attempts) + self.options.jitter();
                    tracing::warn!(
                        error = %e,
                        attempt = attempts,
                        retry_in_ms = delay.as_millis() as u64,
                        "Flush failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => break e,
            }
        };

        self.stats
            .dropped
            .fetch_add(count as u64, Ordering::Relaxed);
        self.stats.failed_flushes.fetch_add(1, Ordering::Relaxed);
        tracing::error!(error = %error, count, attempts, "Batch dropped");
        self.emit_failure(count, attempts, &error);

        FlushOutcome::Dropped {
            records: count,
            attempts,
            error,
        }
    }

    fn emit_failure(&self, count: usize, attempts: u32, error: &StoreError) {
        let Some(tx) = &self.events else {
            return;
        };
        let event = Event::new(
            WRITER_EVENT_SOURCE,
            EventKind::Error,
            EventSeverity::Error,
            format!("Dropped {count} records after {attempts} attempts"),
        )
        .with_payload("records", count)
        .with_payload("attempts", attempts)
        .with_payload("bucket", self.target.bucket.as_str())
        .with_payload("error", error.to_string());
        if tx.send(event).is_err() {
            tracing::warn!("Event receiver closed, delivery failure not published");
        }
    }
}

/// A scoped write session.
///
/// Dropping a session without calling [`close`](Self::close) discards any
/// records still buffered.
pub struct WriteSession<'w, S: RemoteStore> {
    writer: &'w BatchWriter<S>,
    buffer: BatchBuffer<Record>,
    report: DeliveryReport,
}

impl<S: RemoteStore> WriteSession<'_, S> {
    /// Buffer a record, flushing if a threshold is reached.
    pub async fn write(&mut self, record: Record) {
        self.buffer.push(record);
        if self.buffer.should_flush() {
            self.flush_buffer().await;
        }
    }

    /// Number of records waiting for a flush.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Flush the remaining records and end the session.
    pub async fn close(mut self) -> DeliveryReport {
        if !self.buffer.is_empty() {
            self.flush_buffer().await;
        }
        self.report
    }

    async fn flush_buffer(&mut self) {
        let records = self.buffer.take();
        let outcome = self.writer.flush(records).await;
        self.report.record(&outcome);
    }
}

impl<S: RemoteStore> Drop for WriteSession<'_, S> {
    fn drop(&mut self) {
        if !self.buffer.is_empty() {
            tracing::warn!(
                count = self.buffer.len(),
                "Write session dropped with unflushed records"
            );
        }
    }
}
