//! Row values, default-value producers and the run clock

use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Column name to value map for one row
pub type FieldMap = BTreeMap<String, Value>;

/// Storage format for full timestamps in the target store
pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";
/// Storage format for date-only values
pub const DATE_FORMAT: &str = "%Y-%m-%d";
/// Storage format for time-only values
pub const TIME_FORMAT: &str = "%H:%M:%S%.6f";

/// Source of "now" for a run
///
/// A fixed clock makes generated timestamps and placeholders reproducible.
#[derive(Debug, Clone, Copy, Default)]
pub enum Clock {
    #[default]
    System,
    Fixed(DateTime<Utc>),
}

impl Clock {
    pub fn now(&self) -> DateTime<Utc> {
        match self {
            Clock::System => Utc::now(),
            Clock::Fixed(at) => *at,
        }
    }

    /// Run date as used in synthesized identifiers (`YYYYMMDD`)
    pub fn date_stamp(&self) -> String {
        self.now().format("%Y%m%d").to_string()
    }
}

/// Zero-argument value producers available to default tables
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DefaultRule {
    Now,
    Today,
    CurrentTime,
    Uuid,
}

impl DefaultRule {
    pub fn produce(&self, clock: &Clock) -> Value {
        match self {
            DefaultRule::Now => Value::Text(clock.now().format(DATETIME_FORMAT).to_string()),
            DefaultRule::Today => Value::Text(clock.now().format(DATE_FORMAT).to_string()),
            DefaultRule::CurrentTime => Value::Text(clock.now().format(TIME_FORMAT).to_string()),
            DefaultRule::Uuid => Value::Text(uuid::Uuid::new_v4().simple().to_string()),
        }
    }
}

/// Either a literal value or a rule evaluated at resolution time
#[derive(Debug, Clone, PartialEq)]
pub enum DefaultSpec {
    Literal(Value),
    Rule(DefaultRule),
}

impl DefaultSpec {
    pub fn produce(&self, clock: &Clock) -> Value {
        match self {
            DefaultSpec::Literal(value) => value.clone(),
            DefaultSpec::Rule(rule) => rule.produce(clock),
        }
    }
}

/// Convert a JSON literal from configuration into a storable value
///
/// Booleans become 0/1 integers; arrays and objects are stored as JSON text.
pub fn json_to_value(json: &serde_json::Value) -> Value {
    match json {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Integer(i64::from(*b)),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(i) => Value::Integer(i),
            None => Value::Real(n.as_f64().unwrap_or_default()),
        },
        serde_json::Value::String(s) => Value::Text(s.clone()),
        other => Value::Text(other.to_string()),
    }
}

/// Convert a stored value into JSON for reports and samples
pub fn value_to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Integer(i) => serde_json::Value::from(*i),
        Value::Real(f) => serde_json::Number::from_f64(*f)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        Value::Text(s) => serde_json::Value::String(s.clone()),
        Value::Blob(b) => serde_json::Value::String(format!("<{} bytes>", b.len())),
    }
}

/// Human-readable rendering used in log lines and error messages
pub fn render_value(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Integer(i) => i.to_string(),
        Value::Real(f) => f.to_string(),
        Value::Text(s) => s.clone(),
        Value::Blob(b) => format!("<{} bytes>", b.len()),
    }
}

/// NULL or whitespace-only text
pub fn is_blank(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::Text(s)) => s.trim().is_empty(),
        Some(_) => false,
    }
}
