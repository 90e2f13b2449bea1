//! Normalization boundary for provider payloads.
//!
//! Feed fields arrive loosely typed (strings, numbers, booleans or null).
//! Everything is resolved to typed values here and nowhere else.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

use crate::models::{DataSource, NewReading};

// ---

/// Channel feed envelope as returned by the provider's read endpoint.
#[derive(Debug, Default, Deserialize)]
pub struct FeedResponse {
    #[serde(default)]
    pub feeds: Vec<Feed>,
}

/// One feed entry: field1 temperature, field2 level, field3 pump, field4 heater.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Feed {
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub entry_id: Option<i64>,
    #[serde(default)]
    pub field1: Value,
    #[serde(default)]
    pub field2: Value,
    #[serde(default)]
    pub field3: Value,
    #[serde(default)]
    pub field4: Value,
}

/// Parse a numeric field. Accepts numbers and numeric strings (comma as the
/// decimal separator allowed); anything unparsable becomes `0.0`.
pub fn parse_number(value: &Value) -> f64 {
    // ---
    match value {
        Value::Number(n) => n.as_f64().filter(|v| v.is_finite()).unwrap_or(0.0),
        Value::String(s) => parse_numeric_prefix(&s.trim().replacen(',', ".", 1)).unwrap_or(0.0),
        Value::Bool(b) => {
            if *b {
                1.0
            } else {
                0.0
            }
        }
        _ => 0.0,
    }
}

/// Longest leading decimal number in `s` ("24.5C" -> 24.5).
fn parse_numeric_prefix(s: &str) -> Option<f64> {
    // ---
    let bytes = s.as_bytes();
    let mut end = 0;
    let mut seen_digit = false;
    let mut seen_dot = false;

    if matches!(bytes.first(), Some(b'-') | Some(b'+')) {
        end = 1;
    }
    while end < bytes.len() {
        match bytes[end] {
            b'0'..=b'9' => seen_digit = true,
            b'.' if !seen_dot => seen_dot = true,
            _ => break,
        }
        end += 1;
    }
    if !seen_digit {
        return None;
    }
    s[..end].parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Parse a boolean-like field. Truthy: `1`, `"1"`, `"true"` (any case, trimmed),
/// any non-zero number and native `true`. Everything else, including absent or
/// empty values, is `false`.
pub fn parse_bool(value: &Value) -> bool {
    // ---
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|v| v != 0.0),
        Value::String(s) => {
            let normalized = s.trim().to_ascii_lowercase();
            normalized == "1" || normalized == "true"
        }
        _ => false,
    }
}

/// Pick the entry to report from a feed list ordered oldest to newest.
///
/// Takes the newest entry carrying a temperature; when none does, falls back
/// to the oldest entry.
pub fn select_feed(feeds: &[Feed]) -> Option<&Feed> {
    // ---
    feeds
        .iter()
        .rev()
        .find(|f| has_value(&f.field1))
        .or_else(|| feeds.first())
}

fn has_value(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::String(s) => !s.trim().is_empty(),
        _ => true,
    }
}

fn parse_created_at(raw: Option<&str>) -> Option<DateTime<Utc>> {
    raw.and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

impl Feed {
    /// Convert this entry into a typed sample.
    pub fn to_reading(&self, source: DataSource) -> NewReading {
        // ---
        NewReading {
            temperature: parse_number(&self.field1),
            level: parse_number(&self.field2),
            pump_status: parse_bool(&self.field3),
            heater_status: parse_bool(&self.field4),
            timestamp: parse_created_at(self.created_at.as_deref()),
            source,
        }
    }
}
