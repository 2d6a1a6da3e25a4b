//! Storage Layer
//!
//! Delivery of measurement records to a remote time-series store:
//! - **Types**: [`Record`], [`Batch`], [`FieldValue`] and delivery [`Event`]s
//! - **Store**: the [`RemoteStore`] seam and its InfluxDB implementation
//! - **Writer**: [`BatchWriter`] with buffered, retrying, scoped write sessions
//!
//! # Example
//!
//! ```rust,no_run
//! use kilnmon::storage::{BatchWriter, InfluxStore, Precision, WriteOptions, WriteTarget};
//! use std::time::Duration;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let store = InfluxStore::new(
//!     "http://localhost:8086",
//!     "my-token",
//!     Precision::Seconds,
//!     Duration::from_secs(10),
//! )?;
//! let writer = BatchWriter::new(store, WriteTarget::new("home", "kiln"), WriteOptions::default(), 8);
//! # let _ = writer;
//! # Ok(())
//! # }
//! ```

mod error;
pub mod line_protocol;
mod store;
mod types;
mod writer;

pub use error::StoreError;
pub use store::{DEFAULT_TIMEOUT, InfluxStore, RemoteStore, WriteTarget};
pub use types::{Batch, Event, EventKind, EventSeverity, FieldValue, NAME_TAG, Precision, Record};
pub use writer::{
    BatchWriter, DeliveryReport, DeliveryStats, FlushOutcome, WriteOptions, WriteSession,
};
