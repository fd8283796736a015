//! # Payload and Row Encoding
//!
//! This module owns every textual format the ledger persists:
//!
//! - **Payloads** are stored as canonical JSON: object keys sorted by byte
//!   order, no whitespace, minimal string escaping. Two payloads are equal
//!   exactly when their canonical texts are equal, which is what idempotency
//!   comparisons rely on.
//! - **Dates** are stored as ISO `YYYY-MM-DD` text, which sorts
//!   lexicographically in date order, so SQLite range predicates work on the
//!   raw column.
//! - **Timeline digests** are XXH3-64 over the canonical encoding of a
//!   version timeline, stored as 16 hex digits.
//!
//! ## Canonical Form
//!
//! ```text
//! input:      { "b": [1, 2.5], "a": "x\ny" }
//! canonical:  {"a":"x\ny","b":[1,2.5]}
//! ```
//!
//! Integers are emitted in decimal. Non-integer numbers use serde_json's
//! shortest round-trip representation, which is stable for a given value.

use std::fmt::Write as _;

use chrono::{NaiveDate, Utc};
use serde_json::{Map, Number, Value};

use crate::error::{Error, Result};
use crate::types::Version;

/// Maximum nesting depth accepted in a payload.
pub const MAX_PAYLOAD_DEPTH: usize = 64;

/// Storage format for effective dates and validity bounds.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

// =============================================================================
// Canonical JSON
// =============================================================================

/// Encodes a JSON value in canonical form.
pub fn canonical_json(value: &Value) -> String {
    let mut output = String::new();
    emit_value(value, &mut output);
    output
}

/// Rejects values nested deeper than [`MAX_PAYLOAD_DEPTH`].
///
/// The top-level value counts as depth 1.
pub fn check_depth(value: &Value) -> Result<()> {
    fn depth_of(value: &Value, depth: usize) -> Result<()> {
        if depth > MAX_PAYLOAD_DEPTH {
            return Err(Error::InvalidArgument(format!(
                "payload nested deeper than {MAX_PAYLOAD_DEPTH} levels"
            )));
        }
        match value {
            Value::Array(items) => items.iter().try_for_each(|v| depth_of(v, depth + 1)),
            Value::Object(map) => map.values().try_for_each(|v| depth_of(v, depth + 1)),
            _ => Ok(()),
        }
    }
    depth_of(value, 1)
}

fn emit_value(value: &Value, output: &mut String) {
    match value {
        Value::Null => output.push_str("null"),
        Value::Bool(b) => output.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => emit_number(n, output),
        Value::String(s) => emit_string(s, output),
        Value::Array(items) => emit_array(items, output),
        Value::Object(map) => emit_object(map, output),
    }
}

fn emit_number(n: &Number, output: &mut String) {
    if let Some(i) = n.as_i64() {
        let _ = write!(output, "{i}");
    } else if let Some(u) = n.as_u64() {
        let _ = write!(output, "{u}");
    } else {
        output.push_str(&n.to_string());
    }
}

/// Only the quotation mark, the reverse solidus and U+0000..=U+001F are
/// escaped.
fn emit_string(s: &str, output: &mut String) {
    output.push('"');
    for c in s.chars() {
        match c {
            '"' => output.push_str("\\\""),
            '\\' => output.push_str("\\\\"),
            '\u{0008}' => output.push_str("\\b"),
            '\u{000C}' => output.push_str("\\f"),
            '\n' => output.push_str("\\n"),
            '\r' => output.push_str("\\r"),
            '\t' => output.push_str("\\t"),
            c if ('\u{0000}'..='\u{001F}').contains(&c) => {
                let _ = write!(output, "\\u{:04x}", c as u32);
            }
            c => output.push(c),
        }
    }
    output.push('"');
}

fn emit_array(items: &[Value], output: &mut String) {
    output.push('[');
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            output.push(',');
        }
        emit_value(item, output);
    }
    output.push(']');
}

fn emit_object(map: &Map<String, Value>, output: &mut String) {
    let mut keys: Vec<&String> = map.keys().collect();
    keys.sort();

    output.push('{');
    for (i, key) in keys.iter().enumerate() {
        if i > 0 {
            output.push(',');
        }
        emit_string(key, output);
        output.push(':');
        emit_value(&map[*key], output);
    }
    output.push('}');
}

// =============================================================================
// Dates
// =============================================================================

/// Formats a date for storage.
pub fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

/// Parses a stored date.
///
/// A malformed value means the row was written by something other than the
/// ledger, so it surfaces as [`Error::Schema`].
pub fn parse_date(text: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(text, DATE_FORMAT)
        .map_err(|e| Error::Schema(format!("invalid stored date '{text}': {e}")))
}

// =============================================================================
// Digests
// =============================================================================

/// Computes the digest of a version timeline.
///
/// Each version contributes one line:
///
/// ```text
/// <seq_no>|<valid_from>|<valid_to or empty>|<canonical attributes>\n
/// ```
///
/// Identical timelines therefore always produce identical digests, and the
/// digest changes whenever any bound or attribute changes.
pub fn timeline_digest(versions: &[Version]) -> String {
    let mut encoded = String::new();
    for version in versions {
        let _ = writeln!(
            encoded,
            "{}|{}|{}|{}",
            version.seq_no,
            format_date(version.valid_from),
            version.valid_to.map(format_date).unwrap_or_default(),
            version.attributes.canonical()
        );
    }
    format!("{:016x}", xxhash_rust::xxh3::xxh3_64(encoded.as_bytes()))
}

/// Returns the current time in milliseconds since Unix epoch.
pub fn current_time_ms() -> u64 {
    u64::try_from(Utc::now().timestamp_millis()).unwrap_or(0)
}

// =============================================================================
// Tests
// =============================================================================
