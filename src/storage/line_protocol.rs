//! InfluxDB line protocol encoding.
//!
//! ```text
//! kiln,name=HT-1 T=21.5,RH=48.2,VP=1.23 1709294400
//! ```
//!
//! Non-finite floats are not representable and are left out. A record left
//! with no fields cannot be written and is skipped by [`encode_batch`].

use std::fmt::Write;

use crate::storage::types::{FieldValue, Precision, Record};

/// Encode a single record, or `None` if it has no encodable field.
pub fn encode_record(record: &Record, precision: Precision) -> Option<String> {
    let mut line = String::with_capacity(64);
    escape_into(&mut line, record.measurement(), &[',', ' ']);

    for (key, value) in record.tags() {
        if value.is_empty() {
            continue;
        }
        line.push(',');
        escape_into(&mut line, key, &[',', '=', ' ']);
        line.push('=');
        escape_into(&mut line, value, &[',', '=', ' ']);
    }

    let mut first = true;
    for (key, value) in record.fields() {
        let Some(encoded) = encode_value(value) else {
            continue;
        };
        line.push(if first { ' ' } else { ',' });
        first = false;
        escape_into(&mut line, key, &[',', '=', ' ']);
        line.push('=');
        line.push_str(&encoded);
    }
    if first {
        return None;
    }

    let _ = write!(line, " {}", precision.timestamp(&record.ts()));
    Some(line)
}

/// Encode records into a newline-separated body.
///
/// Returns the body and the number of records that were skipped.
pub fn encode_batch(records: &[Record], precision: Precision) -> (String, usize) {
    let mut body = String::new();
    let mut skipped = 0;
    for record in records {
        match encode_record(record, precision) {
            Some(line) => {
                if !body.is_empty() {
                    body.push('\n');
                }
                body.push_str(&line);
            }
            None => {
                tracing::warn!(
                    measurement = %record.measurement(),
                    sensor = %record.name(),
                    "Record has no encodable fields, skipping"
                );
                skipped += 1;
            }
        }
    }
    (body, skipped)
}

fn encode_value(value: &FieldValue) -> Option<String> {
    match value {
        FieldValue::Float(v) if v.is_finite() => Some(format!("{v:?}")),
        FieldValue::Float(_) => None,
        FieldValue::Integer(v) => Some(format!("{v}i")),
        FieldValue::Boolean(v) => Some(v.to_string()),
        FieldValue::Text(s) => {
            let mut out = String::with_capacity(s.len() + 2);
            out.push('"');
            for c in s.chars() {
                if c == '"' || c == '\\' {
                    out.push('\\');
                }
                out.push(c);
            }
            out.push('"');
            Some(out)
        }
    }
}

fn escape_into(out: &mut String, s: &str, special: &[char]) {
    for c in s.chars() {
        if special.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }
}
