//! Core data types for the storage layer.
//!
//! - [`FieldValue`]: a single measured value (float, integer, text or boolean)
//! - [`Record`]: one timestamped, tagged set of field values produced by a sensor
//! - [`Batch`]: the records collected during one polling cycle
//! - [`Event`]: structured record of something noteworthy, such as a dropped batch
//! - [`Precision`]: timestamp resolution used when encoding records

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// Tag key carrying the sensor name on every record.
pub const NAME_TAG: &str = "name";

/// A single measured value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Integer(i64),
    Float(f64),
    Boolean(bool),
    Text(String),
}

impl FieldValue {
    /// Numeric view of the value, if it has one.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            Self::Integer(v) => Some(*v as f64),
            Self::Boolean(_) | Self::Text(_) => None,
        }
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        Self::Integer(v)
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        Self::Boolean(v)
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_owned())
    }
}

impl std::fmt::Display for FieldValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Float(v) => write!(f, "{v}"),
            Self::Integer(v) => write!(f, "{v}"),
            Self::Boolean(v) => write!(f, "{v}"),
            Self::Text(v) => f.write_str(v),
        }
    }
}

/// A measurement point.
///
/// Records are immutable once built. The measurement is the sensor group
/// (e.g. "kiln"); the sensor name is carried as the [`NAME_TAG`] tag. Field
/// order follows the order in which the sensor declares its fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    measurement: String,
    tags: BTreeMap<String, String>,
    fields: Vec<(String, FieldValue)>,
    ts: DateTime<Utc>,
}

impl Record {
    /// Create a record for `name` in `group`, captured at `ts`.
    pub fn new(
        group: impl Into<String>,
        name: impl Into<String>,
        ts: DateTime<Utc>,
        fields: Vec<(String, FieldValue)>,
    ) -> Self {
        let mut tags = BTreeMap::new();
        tags.insert(NAME_TAG.to_owned(), name.into());
        Self {
            measurement: group.into(),
            tags,
            fields,
            ts,
        }
    }

    pub fn measurement(&self) -> &str {
        &self.measurement
    }

    /// Sensor name carried in the `name` tag.
    pub fn name(&self) -> &str {
        self.tags.get(NAME_TAG).map(String::as_str).unwrap_or_default()
    }

    pub fn tags(&self) -> &BTreeMap<String, String> {
        &self.tags
    }

    pub fn fields(&self) -> &[(String, FieldValue)] {
        &self.fields
    }

    /// Look up a field value by name.
    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        self.fields
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value)
    }

    pub fn ts(&self) -> DateTime<Utc> {
        self.ts
    }
}

/// Records collected during one polling cycle, in sensor registration order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Batch {
    records: Vec<Record>,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            records: Vec::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, record: Record) {
        self.records.push(record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn into_records(self) -> Vec<Record> {
        self.records
    }
}

impl IntoIterator for Batch {
    type Item = Record;
    type IntoIter = std::vec::IntoIter<Record>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.into_iter()
    }
}

impl FromIterator<Record> for Batch {
    fn from_iter<I: IntoIterator<Item = Record>>(iter: I) -> Self {
        Self {
            records: iter.into_iter().collect(),
        }
    }
}

/// Timestamp resolution for encoded records.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    EnumString,
    Display,
    AsRefStr,
)]
#[strum(ascii_case_insensitive)]
pub enum Precision {
    #[default]
    #[serde(rename = "s")]
    #[strum(serialize = "s")]
    Seconds,
    #[serde(rename = "ms")]
    #[strum(serialize = "ms")]
    Millis,
    #[serde(rename = "us")]
    #[strum(serialize = "us")]
    Micros,
    #[serde(rename = "ns")]
    #[strum(serialize = "ns")]
    Nanos,
}

impl Precision {
    /// Timestamp of `ts` expressed in this precision.
    pub fn timestamp(&self, ts: &DateTime<Utc>) -> i64 {
        match self {
            Self::Seconds => ts.timestamp(),
            Self::Millis => ts.timestamp_millis(),
            Self::Micros => ts.timestamp_micros(),
            // Out of range only after year 2262.
            Self::Nanos => ts
                .timestamp_nanos_opt()
                .unwrap_or_else(|| ts.timestamp_micros().saturating_mul(1_000)),
        }
    }
}

/// An event record.
///
/// Events represent discrete occurrences in the pipeline that operators care
/// about, such as a batch dropped after exhausting its retries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Event timestamp (UTC).
    pub ts: DateTime<Utc>,
    /// Event origin (e.g. "writer", "scheduler").
    pub source: String,
    /// Event nature/handling class.
    pub kind: EventKind,
    /// Delivery priority/urgency.
    pub severity: EventSeverity,
    /// Short human-readable description.
    pub message: String,
    /// Context snapshot as JSON.
    pub payload: Option<serde_json::Value>,
}

impl Event {
    pub fn new(
        source: impl Into<String>,
        kind: EventKind,
        severity: EventSeverity,
        message: impl Into<String>,
    ) -> Self {
        Self {
            ts: Utc::now(),
            source: source.into(),
            kind,
            severity,
            message: message.into(),
            payload: None,
        }
    }

    /// Attach a key/value pair to the payload object.
    #[must_use]
    pub fn with_payload(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        let payload = self
            .payload
            .get_or_insert_with(|| serde_json::Value::Object(Default::default()));
        if let Some(map) = payload.as_object_mut() {
            map.insert(key.to_owned(), value.into());
        }
        self
    }
}

/// Event kind classification.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum EventKind {
    /// Delivery or startup failure (e.g. dropped batch).
    Error,
    /// Scheduler lifecycle (started, terminated).
    System,
}

/// Event severity classification.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum EventSeverity {
    Debug,
    Info,
    Warn,
    Error,
    Critical,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::str::FromStr;

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_record_carries_name_tag() {
        let record = Record::new(
            "kiln",
            "HT-1",
            ts(),
            vec![("T".to_string(), FieldValue::Float(21.5))],
        );
        assert_eq!(record.measurement(), "kiln");
        assert_eq!(record.name(), "HT-1");
        assert_eq!(record.tags().get(NAME_TAG), Some(&"HT-1".to_string()));
        assert_eq!(record.field("T"), Some(&FieldValue::Float(21.5)));
        assert_eq!(record.field("RH"), None);
    }

    #[test]
    fn test_record_preserves_field_order() {
        let record = Record::new(
            "kiln",
            "Fan-1",
            ts(),
            vec![
                ("v0".to_string(), 2.5.into()),
                ("v".to_string(), 2.4.into()),
                ("A".to_string(), 1.5.into()),
            ],
        );
        let keys: Vec<&str> = record.fields().iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["v0", "v", "A"]);
    }

    #[test]
    fn test_field_value_as_f64() {
        assert_eq!(FieldValue::Float(1.5).as_f64(), Some(1.5));
        assert_eq!(FieldValue::Integer(3).as_f64(), Some(3.0));
        assert_eq!(FieldValue::Text("x".into()).as_f64(), None);
        assert_eq!(FieldValue::Boolean(true).as_f64(), None);
    }

    #[test]
    fn test_precision_timestamps() {
        let t = ts();
        assert_eq!(Precision::Seconds.timestamp(&t), 1_709_294_400);
        assert_eq!(Precision::Millis.timestamp(&t), 1_709_294_400_000);
        assert_eq!(Precision::Micros.timestamp(&t), 1_709_294_400_000_000);
        assert_eq!(Precision::Nanos.timestamp(&t), 1_709_294_400_000_000_000);
    }

    #[test]
    fn test_precision_from_str() {
        assert_eq!(Precision::from_str("s").unwrap(), Precision::Seconds);
        assert_eq!(Precision::from_str("MS").unwrap(), Precision::Millis);
        assert_eq!(Precision::Micros.as_ref(), "us");
        assert!(Precision::from_str("minutes").is_err());
    }

    #[test]
    fn test_event_payload() {
        let event = Event::new(
            "writer",
            EventKind::Error,
            EventSeverity::Error,
            "Batch dropped",
        )
        .with_payload("records", 3)
        .with_payload("error", "timeout");
        let payload = event.payload.unwrap();
        assert_eq!(payload["records"], 3);
        assert_eq!(payload["error"], "timeout");
    }

    #[test]
    fn test_event_kind_from_str_case_insensitive() {
        assert_eq!(EventKind::from_str("ERROR").unwrap(), EventKind::Error);
        assert_eq!(EventKind::from_str("System").unwrap(), EventKind::System);
        assert!(EventKind::from_str("alert").is_err());
    }

    #[test]
    fn test_event_severity_as_str() {
        assert_eq!(EventSeverity::Debug.as_ref(), "debug");
        assert_eq!(EventSeverity::Warn.as_ref(), "warn");
        assert_eq!(EventSeverity::Critical.as_ref(), "critical");
    }
}
