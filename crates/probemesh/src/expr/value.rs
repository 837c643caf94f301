//! Runtime values produced by expressions.

use std::cmp::Ordering;
use std::fmt;

use chrono::{DateTime, TimeDelta, Utc};

use crate::context::{format_duration, format_time, ContextValue};

/// Kind of an expression value, used for declarations and return checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ValueKind {
    Null,
    Bool,
    Int,
    Uint,
    Double,
    String,
    Timestamp,
    Duration,
    List,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueKind::Null => "null",
            ValueKind::Bool => "bool",
            ValueKind::Int => "int",
            ValueKind::Uint => "uint",
            ValueKind::Double => "double",
            ValueKind::String => "string",
            ValueKind::Timestamp => "timestamp",
            ValueKind::Duration => "duration",
            ValueKind::List => "list",
        };
        f.write_str(name)
    }
}

/// A value produced while evaluating an expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Uint(u64),
    Double(f64),
    String(String),
    Timestamp(DateTime<Utc>),
    Duration(TimeDelta),
    List(Vec<Value>),
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Null => ValueKind::Null,
            Value::Bool(_) => ValueKind::Bool,
            Value::Int(_) => ValueKind::Int,
            Value::Uint(_) => ValueKind::Uint,
            Value::Double(_) => ValueKind::Double,
            Value::String(_) => ValueKind::String,
            Value::Timestamp(_) => ValueKind::Timestamp,
            Value::Duration(_) => ValueKind::Duration,
            Value::List(_) => ValueKind::List,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(value) => Some(value),
            _ => None,
        }
    }

    /// Equality as seen by `==`: numbers compare by value across kinds.
    pub fn loose_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::List(left), Value::List(right)) => {
                left.len() == right.len() && left.iter().zip(right).all(|(l, r)| l.loose_eq(r))
            }
            _ if self.is_number() && other.is_number() => {
                compare_numbers(self, other) == Some(Ordering::Equal)
            }
            _ => self == other,
        }
    }

    pub(crate) fn is_number(&self) -> bool {
        matches!(self, Value::Int(_) | Value::Uint(_) | Value::Double(_))
    }
}

/// Order two numeric values of possibly different kinds.
pub(crate) fn compare_numbers(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Int(l), Value::Int(r)) => Some(l.cmp(r)),
        (Value::Uint(l), Value::Uint(r)) => Some(l.cmp(r)),
        (Value::Double(l), Value::Double(r)) => l.partial_cmp(r),
        (Value::Int(l), Value::Uint(r)) => Some(match u64::try_from(*l) {
            Ok(l) => l.cmp(r),
            Err(_) => Ordering::Less,
        }),
        (Value::Uint(_), Value::Int(_)) => compare_numbers(right, left).map(Ordering::reverse),
        (Value::Int(l), Value::Double(r)) => (*l as f64).partial_cmp(r),
        (Value::Uint(l), Value::Double(r)) => (*l as f64).partial_cmp(r),
        (Value::Double(_), Value::Int(_) | Value::Uint(_)) => {
            compare_numbers(right, left).map(Ordering::reverse)
        }
        _ => None,
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Bool(value) => write!(f, "{value}"),
            Value::Int(value) => write!(f, "{value}"),
            Value::Uint(value) => write!(f, "{value}u"),
            Value::Double(value) => write!(f, "{value}"),
            Value::String(value) => write!(f, "{value:?}"),
            Value::Timestamp(value) => write!(f, "timestamp({:?})", format_time(value)),
            Value::Duration(value) => write!(f, "duration({:?})", format_duration(value)),
            Value::List(values) => {
                let items: Vec<String> = values.iter().map(ToString::to_string).collect();
                write!(f, "[{}]", items.join(", "))
            }
        }
    }
}

/// Kind a context value is declared as, `None` for values expressions cannot see.
pub(crate) fn declared_kind(value: &ContextValue) -> Option<ValueKind> {
    match value {
        ContextValue::String(_) => Some(ValueKind::String),
        ContextValue::Int(_) => Some(ValueKind::Int),
        ContextValue::Uint(_) => Some(ValueKind::Uint),
        ContextValue::Float(_) => Some(ValueKind::Double),
        ContextValue::Bool(_) => Some(ValueKind::Bool),
        ContextValue::Time(_) => Some(ValueKind::Timestamp),
        ContextValue::Duration(_) => Some(ValueKind::Duration),
        ContextValue::StringArray(_)
        | ContextValue::IntArray(_)
        | ContextValue::UintArray(_)
        | ContextValue::FloatArray(_)
        | ContextValue::BoolArray(_)
        | ContextValue::TimeArray(_)
        | ContextValue::DurationArray(_) => Some(ValueKind::List),
        ContextValue::Error(_) => None,
    }
}

impl TryFrom<&ContextValue> for Value {
    type Error = ();

    fn try_from(value: &ContextValue) -> Result<Self, Self::Error> {
        Ok(match value {
            ContextValue::String(v) => Value::String(v.clone()),
            ContextValue::Int(v) => Value::Int(*v),
            ContextValue::Uint(v) => Value::Uint(*v),
            ContextValue::Float(v) => Value::Double(*v),
            ContextValue::Bool(v) => Value::Bool(*v),
            ContextValue::Time(v) => Value::Timestamp(*v),
            ContextValue::Duration(v) => Value::Duration(*v),
            ContextValue::StringArray(v) => Value::List(v.iter().cloned().map(Value::String).collect()),
            ContextValue::IntArray(v) => Value::List(v.iter().copied().map(Value::Int).collect()),
            ContextValue::UintArray(v) => Value::List(v.iter().copied().map(Value::Uint).collect()),
            ContextValue::FloatArray(v) => Value::List(v.iter().copied().map(Value::Double).collect()),
            ContextValue::BoolArray(v) => Value::List(v.iter().copied().map(Value::Bool).collect()),
            ContextValue::TimeArray(v) => Value::List(v.iter().copied().map(Value::Timestamp).collect()),
            ContextValue::DurationArray(v) => {
                Value::List(v.iter().copied().map(Value::Duration).collect())
            }
            ContextValue::Error(_) => return Err(()),
        })
    }
}
