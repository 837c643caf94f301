//! Execution context threaded through one probe run.
//!
//! Keys are dotted strings namespaced by probe and request:
//!
//! - `probe.<probe>.<field>` for probe level results
//! - `probe.<probe>.req.<request>.<field>` for request level results
//!
//! Later writes overwrite earlier ones. Keys are kept sorted so dumps and
//! declaration sets are stable between runs.

mod dump;
mod value;

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, TimeDelta, Utc};

use crate::error::ContextError;

pub use value::ContextValue;
pub(crate) use value::{format_duration, format_time};

/// Key holding the name of the most recent probe run in this context.
pub const PROBE_KEY: &str = "probe";

/// Build a probe scoped key: `probe.<probe>.<field>`.
pub fn probe_key(probe: &str, field: &str) -> String {
    format!("probe.{probe}.{field}")
}

/// Build a request scoped key: `probe.<probe>.req.<request>.<field>`.
pub fn request_key(probe: &str, request: &str, field: &str) -> String {
    format!("probe.{probe}.req.{request}.{field}")
}

/// Ordered key/value store accumulating everything a probe run observed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProbeContext {
    values: BTreeMap<String, ContextValue>,
}

impl ProbeContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a value, replacing any previous value under the same key.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<ContextValue>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&ContextValue> {
        self.values.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<ContextValue> {
        self.values.remove(key)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ContextValue)> {
        self.values.iter().map(|(key, value)| (key.as_str(), value))
    }

    fn lookup(&self, key: &str) -> Result<&ContextValue, ContextError> {
        self.values.get(key).ok_or_else(|| ContextError::KeyNotFound(key.to_string()))
    }

    fn mismatch(key: &str, expected: &'static str, found: &ContextValue) -> ContextError {
        ContextError::TypeMismatch {
            key: key.to_string(),
            expected,
            found: found.kind_name(),
        }
    }

    pub fn get_string(&self, key: &str) -> Result<&str, ContextError> {
        match self.lookup(key)? {
            ContextValue::String(value) => Ok(value),
            other => Err(Self::mismatch(key, "string", other)),
        }
    }

    pub fn get_int(&self, key: &str) -> Result<i64, ContextError> {
        match self.lookup(key)? {
            ContextValue::Int(value) => Ok(*value),
            other => Err(Self::mismatch(key, "int", other)),
        }
    }

    pub fn get_uint(&self, key: &str) -> Result<u64, ContextError> {
        match self.lookup(key)? {
            ContextValue::Uint(value) => Ok(*value),
            other => Err(Self::mismatch(key, "uint", other)),
        }
    }

    pub fn get_float(&self, key: &str) -> Result<f64, ContextError> {
        match self.lookup(key)? {
            ContextValue::Float(value) => Ok(*value),
            other => Err(Self::mismatch(key, "float", other)),
        }
    }

    pub fn get_bool(&self, key: &str) -> Result<bool, ContextError> {
        match self.lookup(key)? {
            ContextValue::Bool(value) => Ok(*value),
            other => Err(Self::mismatch(key, "bool", other)),
        }
    }

    pub fn get_time(&self, key: &str) -> Result<DateTime<Utc>, ContextError> {
        match self.lookup(key)? {
            ContextValue::Time(value) => Ok(*value),
            other => Err(Self::mismatch(key, "time", other)),
        }
    }

    pub fn get_duration(&self, key: &str) -> Result<TimeDelta, ContextError> {
        match self.lookup(key)? {
            ContextValue::Duration(value) => Ok(*value),
            other => Err(Self::mismatch(key, "duration", other)),
        }
    }

    pub fn get_string_array(&self, key: &str) -> Result<&[String], ContextError> {
        match self.lookup(key)? {
            ContextValue::StringArray(values) => Ok(values),
            other => Err(Self::mismatch(key, "string array", other)),
        }
    }

    /// Render the context as a `NO | KEY | VALUE` table.
    ///
    /// In short mode string values longer than 20 bytes are cut and
    /// suffixed with `...(N bytes more)`.
    pub fn to_table(&self, short: bool) -> String {
        let rows = self
            .values
            .iter()
            .enumerate()
            .map(|(index, (key, value))| {
                [(index + 1).to_string(), key.clone(), dump::cell(value, short)]
            })
            .collect::<Vec<_>>();
        dump::render(["NO", "KEY", "VALUE"], &rows)
    }

    /// Flat JSON object keyed by context key.
    pub fn to_json(&self) -> serde_json::Value {
        let map = self
            .values
            .iter()
            .map(|(key, value)| (key.clone(), value.to_json()))
            .collect::<serde_json::Map<_, _>>();
        serde_json::Value::Object(map)
    }
}

impl fmt::Display for ProbeContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_table(true))
    }
}

impl<K: Into<String>, V: Into<ContextValue>> FromIterator<(K, V)> for ProbeContext {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut context = ProbeContext::new();
        for (key, value) in iter {
            context.insert(key, value);
        }
        context
    }
}
