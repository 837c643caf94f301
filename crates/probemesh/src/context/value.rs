//! Typed values stored in a probe context.

use std::fmt;

use chrono::{DateTime, SecondsFormat, TimeDelta, Utc};

/// A single value recorded while a probe runs.
#[derive(Debug, Clone, PartialEq)]
pub enum ContextValue {
    String(String),
    Int(i64),
    Uint(u64),
    Float(f64),
    Bool(bool),
    Time(DateTime<Utc>),
    Duration(TimeDelta),
    StringArray(Vec<String>),
    IntArray(Vec<i64>),
    UintArray(Vec<u64>),
    FloatArray(Vec<f64>),
    BoolArray(Vec<bool>),
    TimeArray(Vec<DateTime<Utc>>),
    DurationArray(Vec<TimeDelta>),
    /// An error observed during the run, kept as its rendered message.
    Error(String),
}

impl ContextValue {
    /// Short name of the value's type, used in error messages.
    pub fn kind_name(&self) -> &'static str {
        match self {
            ContextValue::String(_) => "string",
            ContextValue::Int(_) => "int",
            ContextValue::Uint(_) => "uint",
            ContextValue::Float(_) => "float",
            ContextValue::Bool(_) => "bool",
            ContextValue::Time(_) => "time",
            ContextValue::Duration(_) => "duration",
            ContextValue::StringArray(_) => "string array",
            ContextValue::IntArray(_) => "int array",
            ContextValue::UintArray(_) => "uint array",
            ContextValue::FloatArray(_) => "float array",
            ContextValue::BoolArray(_) => "bool array",
            ContextValue::TimeArray(_) => "time array",
            ContextValue::DurationArray(_) => "duration array",
            ContextValue::Error(_) => "error",
        }
    }

    /// Length of an array value, `None` for scalars.
    pub fn array_len(&self) -> Option<usize> {
        match self {
            ContextValue::StringArray(values) => Some(values.len()),
            ContextValue::IntArray(values) => Some(values.len()),
            ContextValue::UintArray(values) => Some(values.len()),
            ContextValue::FloatArray(values) => Some(values.len()),
            ContextValue::BoolArray(values) => Some(values.len()),
            ContextValue::TimeArray(values) => Some(values.len()),
            ContextValue::DurationArray(values) => Some(values.len()),
            _ => None,
        }
    }

    /// Render the value for the context dump.
    pub fn to_print(&self) -> String {
        match self {
            ContextValue::String(value) => quote(value),
            ContextValue::Int(value) => value.to_string(),
            ContextValue::Uint(value) => value.to_string(),
            ContextValue::Float(value) => format!("{value:.6}"),
            ContextValue::Bool(value) => value.to_string(),
            ContextValue::Time(value) => quote(&format_time(value)),
            ContextValue::Duration(value) => quote(&format_duration(value)),
            ContextValue::StringArray(values) => list(values.iter().map(|v| quote(v))),
            ContextValue::IntArray(values) => list(values.iter().map(ToString::to_string)),
            ContextValue::UintArray(values) => list(values.iter().map(ToString::to_string)),
            ContextValue::FloatArray(values) => list(values.iter().map(|v| format!("{v:.6}"))),
            ContextValue::BoolArray(values) => list(values.iter().map(ToString::to_string)),
            ContextValue::TimeArray(values) => list(values.iter().map(|v| quote(&format_time(v)))),
            ContextValue::DurationArray(values) => {
                list(values.iter().map(|v| quote(&format_duration(v))))
            }
            ContextValue::Error(message) => message.clone(),
        }
    }

    /// JSON form of the value, used by context exports.
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value as Json;
        match self {
            ContextValue::String(value) | ContextValue::Error(value) => Json::from(value.clone()),
            ContextValue::Int(value) => Json::from(*value),
            ContextValue::Uint(value) => Json::from(*value),
            ContextValue::Float(value) => Json::from(*value),
            ContextValue::Bool(value) => Json::from(*value),
            ContextValue::Time(value) => Json::from(format_time(value)),
            ContextValue::Duration(value) => Json::from(format_duration(value)),
            ContextValue::StringArray(values) => Json::from(values.clone()),
            ContextValue::IntArray(values) => Json::from(values.clone()),
            ContextValue::UintArray(values) => Json::from(values.clone()),
            ContextValue::FloatArray(values) => Json::from(values.clone()),
            ContextValue::BoolArray(values) => Json::from(values.clone()),
            ContextValue::TimeArray(values) => {
                Json::from(values.iter().map(format_time).collect::<Vec<_>>())
            }
            ContextValue::DurationArray(values) => {
                Json::from(values.iter().map(format_duration).collect::<Vec<_>>())
            }
        }
    }
}

fn quote(value: &str) -> String {
    format!("\"{}\"", value.replace('"', "\\\""))
}

fn list(items: impl Iterator<Item = String>) -> String {
    format!("[{}]", items.collect::<Vec<_>>().join(","))
}

pub(crate) fn format_time(time: &DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Human readable duration such as `1s 500ms`, negative spans prefixed with `-`.
pub(crate) fn format_duration(duration: &TimeDelta) -> String {
    let magnitude = duration.abs().to_std().unwrap_or_default();
    let rendered = humantime::format_duration(magnitude).to_string();
    if *duration < TimeDelta::zero() {
        format!("-{rendered}")
    } else {
        rendered
    }
}

impl fmt::Display for ContextValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_print())
    }
}

impl From<String> for ContextValue {
    fn from(value: String) -> Self {
        ContextValue::String(value)
    }
}

impl From<&str> for ContextValue {
    fn from(value: &str) -> Self {
        ContextValue::String(value.to_string())
    }
}

impl From<i64> for ContextValue {
    fn from(value: i64) -> Self {
        ContextValue::Int(value)
    }
}

impl From<i32> for ContextValue {
    fn from(value: i32) -> Self {
        ContextValue::Int(i64::from(value))
    }
}

impl From<u16> for ContextValue {
    fn from(value: u16) -> Self {
        ContextValue::Int(i64::from(value))
    }
}

impl From<usize> for ContextValue {
    fn from(value: usize) -> Self {
        ContextValue::Int(i64::try_from(value).unwrap_or(i64::MAX))
    }
}

impl From<u64> for ContextValue {
    fn from(value: u64) -> Self {
        ContextValue::Uint(value)
    }
}

impl From<f64> for ContextValue {
    fn from(value: f64) -> Self {
        ContextValue::Float(value)
    }
}

impl From<bool> for ContextValue {
    fn from(value: bool) -> Self {
        ContextValue::Bool(value)
    }
}

impl From<DateTime<Utc>> for ContextValue {
    fn from(value: DateTime<Utc>) -> Self {
        ContextValue::Time(value)
    }
}

impl From<TimeDelta> for ContextValue {
    fn from(value: TimeDelta) -> Self {
        ContextValue::Duration(value)
    }
}

impl From<Vec<String>> for ContextValue {
    fn from(values: Vec<String>) -> Self {
        ContextValue::StringArray(values)
    }
}

impl From<Vec<&str>> for ContextValue {
    fn from(values: Vec<&str>) -> Self {
        ContextValue::StringArray(values.into_iter().map(str::to_string).collect())
    }
}

impl From<Vec<i64>> for ContextValue {
    fn from(values: Vec<i64>) -> Self {
        ContextValue::IntArray(values)
    }
}

impl From<Vec<u64>> for ContextValue {
    fn from(values: Vec<u64>) -> Self {
        ContextValue::UintArray(values)
    }
}

impl From<Vec<f64>> for ContextValue {
    fn from(values: Vec<f64>) -> Self {
        ContextValue::FloatArray(values)
    }
}

impl From<Vec<bool>> for ContextValue {
    fn from(values: Vec<bool>) -> Self {
        ContextValue::BoolArray(values)
    }
}

impl From<Vec<DateTime<Utc>>> for ContextValue {
    fn from(values: Vec<DateTime<Utc>>) -> Self {
        ContextValue::TimeArray(values)
    }
}

impl From<Vec<TimeDelta>> for ContextValue {
    fn from(values: Vec<TimeDelta>) -> Self {
        ContextValue::DurationArray(values)
    }
}
