//! Sensor fields.
//!
//! A [`SensorField`] holds the latest value of one measured quantity. An
//! [`OutlierField`] keeps a short history of accepted values and gates new
//! readings by z-score, so a single glitch does not reach the store while a
//! sustained step change still does.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::sensor::SensorError;
use crate::storage::FieldValue;

// ============================================================================
// Outlier gate configuration
// ============================================================================

/// Default number of accepted values kept for statistics.
pub const DEFAULT_HISTORY_LENGTH: usize = 10;

/// Default z-score above which a reading is an outlier.
pub const DEFAULT_THRESHOLD: f64 = 6.0;

/// Default number of consecutive rejections before a shift is accepted.
pub const DEFAULT_MAX_CONSECUTIVE_REJECTIONS: u32 = 3;

/// Outlier gate parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OutlierConfig {
    #[serde(default = "default_history_length")]
    pub history_length: usize,
    #[serde(default = "default_threshold")]
    pub threshold: f64,
    #[serde(default = "default_max_consecutive_rejections")]
    pub max_consecutive_rejections: u32,
}

fn default_history_length() -> usize {
    DEFAULT_HISTORY_LENGTH
}

fn default_threshold() -> f64 {
    DEFAULT_THRESHOLD
}

fn default_max_consecutive_rejections() -> u32 {
    DEFAULT_MAX_CONSECUTIVE_REJECTIONS
}

impl Default for OutlierConfig {
    fn default() -> Self {
        Self {
            history_length: DEFAULT_HISTORY_LENGTH,
            threshold: DEFAULT_THRESHOLD,
            max_consecutive_rejections: DEFAULT_MAX_CONSECUTIVE_REJECTIONS,
        }
    }
}

impl OutlierConfig {
    /// Check that the gate can actually reject.
    ///
    /// A history shorter than 2 has no standard deviation, and a zero streak
    /// limit accepts every outlier.
    pub fn validate(&self) -> Result<(), SensorError> {
        if !self.threshold.is_finite() || self.threshold <= 0.0 {
            return Err(SensorError::Config(format!(
                "outlier threshold must be positive, got {}",
                self.threshold
            )));
        }
        if self.history_length < 2 {
            return Err(SensorError::Config(format!(
                "outlier history_length must be at least 2, got {}",
                self.history_length
            )));
        }
        if self.max_consecutive_rejections == 0 {
            return Err(SensorError::Config(
                "outlier max_consecutive_rejections must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Result of offering a reading to an [`OutlierField`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acceptance {
    Accepted,
    Rejected,
}

impl Acceptance {
    pub fn is_accepted(self) -> bool {
        self == Self::Accepted
    }
}

// ============================================================================
// Fields
// ============================================================================

/// Latest value of one measured quantity.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorField {
    name: String,
    value: Option<FieldValue>,
}

impl SensorField {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> Option<&FieldValue> {
        self.value.as_ref()
    }

    pub fn set_value(&mut self, value: impl Into<FieldValue>) {
        self.value = Some(value.into());
    }
}

/// Numeric field behind a z-score gate.
#[derive(Debug, Clone)]
pub struct OutlierField {
    name: String,
    config: OutlierConfig,
    history: VecDeque<f64>,
    rejections: u32,
}

impl OutlierField {
    pub fn new(name: impl Into<String>, config: OutlierConfig) -> Self {
        Self {
            name: name.into(),
            history: VecDeque::with_capacity(config.history_length),
            config,
            rejections: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &OutlierConfig {
        &self.config
    }

    /// Most recently accepted value.
    pub fn value(&self) -> Option<f64> {
        self.history.back().copied()
    }

    /// Accepted values, oldest first.
    pub fn history(&self) -> impl Iterator<Item = f64> + '_ {
        self.history.iter().copied()
    }

    pub fn consecutive_rejections(&self) -> u32 {
        self.rejections
    }

    /// Offer a raw reading to the gate.
    ///
    /// Non-finite readings are always rejected and do not count toward the
    /// rejection streak.
    pub fn set_value(&mut self, raw: f64) -> Acceptance {
        if !raw.is_finite() {
            return Acceptance::Rejected;
        }

        if self.is_outlier(raw) && self.rejections < self.config.max_consecutive_rejections {
            self.rejections += 1;
            tracing::trace!(
                field = %self.name,
                raw,
                streak = self.rejections,
                "Outlier rejected"
            );
            return Acceptance::Rejected;
        }

        if self.history.len() >= self.config.history_length {
            self.history.pop_front();
        }
        self.history.push_back(raw);
        self.rejections = 0;
        Acceptance::Accepted
    }

    fn is_outlier(&self, raw: f64) -> bool {
        let n = self.history.len();
        // Seeding: no statistics until the history is full.
        if n < self.config.history_length || n < 2 {
            return false;
        }

        let mean = self.history.iter().sum::<f64>() / n as f64;
        let variance = self
            .history
            .iter()
            .map(|v| (v - mean).powi(2))
            .sum::<f64>()
            / (n - 1) as f64;
        let stdev = variance.sqrt();

        // A flat history makes any different value infinitely far away.
        let z = if stdev == 0.0 {
            if raw == mean { 0.0 } else { f64::INFINITY }
        } else {
            (raw - mean) / stdev
        };
        z.abs() > self.config.threshold
    }
}

/// A field of either kind.
#[derive(Debug, Clone)]
pub enum Field {
    Plain(SensorField),
    Outlier(OutlierField),
}

impl Field {
    pub fn name(&self) -> &str {
        match self {
            Self::Plain(f) => f.name(),
            Self::Outlier(f) => f.name(),
        }
    }

    /// Current value, if one has been set (or accepted).
    pub fn value(&self) -> Option<FieldValue> {
        match self {
            Self::Plain(f) => f.value().cloned(),
            Self::Outlier(f) => f.value().map(FieldValue::Float),
        }
    }
}

// ============================================================================
// FieldSet
// ============================================================================

#[derive(Debug, Clone)]
struct Entry {
    field: Field,
    required: bool,
}

/// Ordered, named fields of one sensor.
///
/// Every field is required unless added with [`FieldSet::optional`]. A
/// snapshot fails while any required field has no value.
#[derive(Debug, Clone, Default)]
pub struct FieldSet {
    entries: Vec<Entry>,
}

impl FieldSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a required plain field.
    #[must_use]
    pub fn plain(self, name: impl Into<String>) -> Self {
        self.with(Field::Plain(SensorField::new(name)), true)
    }

    /// Add a required gated field.
    #[must_use]
    pub fn outlier(self, name: impl Into<String>, config: OutlierConfig) -> Self {
        self.with(Field::Outlier(OutlierField::new(name, config)), true)
    }

    /// Add an optional plain field; it is left out of snapshots until set.
    #[must_use]
    pub fn optional(self, name: impl Into<String>) -> Self {
        self.with(Field::Plain(SensorField::new(name)), false)
    }

    #[must_use]
    pub fn with(mut self, field: Field, required: bool) -> Self {
        // Later declarations replace earlier ones with the same name.
        self.entries.retain(|e| e.field.name() != field.name());
        self.entries.push(Entry { field, required });
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.field.name())
    }

    pub fn get(&self, name: &str) -> Option<&Field> {
        self.entries
            .iter()
            .find(|e| e.field.name() == name)
            .map(|e| &e.field)
    }

    fn get_mut(&mut self, name: &str) -> Option<&mut Field> {
        self.entries
            .iter_mut()
            .find(|e| e.field.name() == name)
            .map(|e| &mut e.field)
    }

    pub fn value(&self, name: &str) -> Option<FieldValue> {
        self.get(name).and_then(Field::value)
    }

    /// Numeric value of a field, if set.
    pub fn number(&self, name: &str) -> Option<f64> {
        self.value(name).as_ref().and_then(FieldValue::as_f64)
    }

    /// Set a field. Gated fields only take finite numbers and report the
    /// gate's decision; unknown names return `None`.
    pub fn set(&mut self, name: &str, value: impl Into<FieldValue>) -> Option<Acceptance> {
        let value = value.into();
        match self.get_mut(name)? {
            Field::Plain(f) => {
                f.set_value(value);
                Some(Acceptance::Accepted)
            }
            Field::Outlier(f) => match value.as_f64() {
                Some(raw) => Some(f.set_value(raw)),
                None => Some(Acceptance::Rejected),
            },
        }
    }

    /// Current values in declaration order.
    ///
    /// # Errors
    /// Returns `SensorError::MissingField` naming the first required field
    /// that has no value.
    pub fn snapshot(&self, sensor: &str) -> Result<Vec<(String, FieldValue)>, SensorError> {
        let mut values = Vec::with_capacity(self.entries.len());
        for entry in &self.entries {
            match entry.field.value() {
                Some(value) => values.push((entry.field.name().to_owned(), value)),
                None if entry.required => {
                    return Err(SensorError::MissingField {
                        sensor: sensor.to_owned(),
                        field: entry.field.name().to_owned(),
                    });
                }
                None => {}
            }
        }
        Ok(values)
    }
}
