//! Builtin functions: context accessors, conversions and string methods.

use chrono::{DateTime, TimeDelta, Utc};
use regex::Regex;

use super::eval::Fault;
use super::value::Value;
use crate::context::{ContextValue, ProbeContext};

/// Argument count of a global function, `None` when the name is unknown.
pub(crate) fn global_arity(name: &str) -> Option<usize> {
    match name {
        "IsDefined" | "GetString" | "GetInt" | "GetUint" | "GetFloat" | "GetBool" | "GetTime"
        | "GetDuration" | "GetLength" => Some(1),
        "GetStringElem" | "GetIntElem" | "GetUintElem" | "GetFloatElem" | "GetBoolElem"
        | "GetTimeElem" | "GetDurationElem" => Some(2),
        "int" | "uint" | "double" | "string" | "timestamp" | "duration" | "size" => Some(1),
        _ => None,
    }
}

/// Argument count of a member function, not counting the receiver.
pub(crate) fn method_arity(name: &str) -> Option<usize> {
    match name {
        "size" => Some(0),
        "contains" | "startsWith" | "endsWith" | "matches" => Some(1),
        _ => None,
    }
}

pub(crate) fn call_global(ctx: &ProbeContext, name: &str, args: &[Value]) -> Result<Value, Fault> {
    match (name, args) {
        ("IsDefined", [key]) => Ok(Value::Bool(ctx.contains_key(key_arg(name, key)?))),
        ("GetString", [key]) => scalar(ctx, name, key, Value::String(String::new()), |v| match v {
            ContextValue::String(s) => Some(Value::String(s.clone())),
            _ => None,
        }),
        ("GetInt", [key]) => scalar(ctx, name, key, Value::Int(0), |v| match v {
            ContextValue::Int(i) => Some(Value::Int(*i)),
            _ => None,
        }),
        ("GetUint", [key]) => scalar(ctx, name, key, Value::Uint(0), |v| match v {
            ContextValue::Uint(u) => Some(Value::Uint(*u)),
            _ => None,
        }),
        ("GetFloat", [key]) => scalar(ctx, name, key, Value::Double(0.0), |v| match v {
            ContextValue::Float(f) => Some(Value::Double(*f)),
            _ => None,
        }),
        ("GetBool", [key]) => scalar(ctx, name, key, Value::Bool(false), |v| match v {
            ContextValue::Bool(b) => Some(Value::Bool(*b)),
            _ => None,
        }),
        ("GetTime", [key]) => scalar(ctx, name, key, Value::Timestamp(DateTime::UNIX_EPOCH), |v| {
            match v {
                ContextValue::Time(t) => Some(Value::Timestamp(*t)),
                _ => None,
            }
        }),
        ("GetDuration", [key]) => scalar(ctx, name, key, Value::Duration(TimeDelta::zero()), |v| {
            match v {
                ContextValue::Duration(d) => Some(Value::Duration(*d)),
                _ => None,
            }
        }),
        ("GetLength", [key]) => {
            let key = key_arg(name, key)?;
            match ctx.get(key) {
                None => Ok(Value::Int(0)),
                Some(ContextValue::String(s)) => Ok(Value::Int(length(s.chars().count()))),
                Some(value) => match value.array_len() {
                    Some(len) => Ok(Value::Int(length(len))),
                    None => Err(wrong_kind(name, key, "an array", value)),
                },
            }
        }
        ("GetStringElem", [key, index]) => element(ctx, name, key, index, Value::String(String::new()), |v, i| match v {
            ContextValue::StringArray(a) => Some(a.get(i).cloned().map(Value::String)),
            _ => None,
        }),
        ("GetIntElem", [key, index]) => element(ctx, name, key, index, Value::Int(0), |v, i| match v {
            ContextValue::IntArray(a) => Some(a.get(i).copied().map(Value::Int)),
            _ => None,
        }),
        ("GetUintElem", [key, index]) => element(ctx, name, key, index, Value::Uint(0), |v, i| match v {
            ContextValue::UintArray(a) => Some(a.get(i).copied().map(Value::Uint)),
            _ => None,
        }),
        ("GetFloatElem", [key, index]) => element(ctx, name, key, index, Value::Double(0.0), |v, i| match v {
            ContextValue::FloatArray(a) => Some(a.get(i).copied().map(Value::Double)),
            _ => None,
        }),
        ("GetBoolElem", [key, index]) => element(ctx, name, key, index, Value::Bool(false), |v, i| match v {
            ContextValue::BoolArray(a) => Some(a.get(i).copied().map(Value::Bool)),
            _ => None,
        }),
        ("GetTimeElem", [key, index]) => {
            element(ctx, name, key, index, Value::Timestamp(DateTime::UNIX_EPOCH), |v, i| match v {
                ContextValue::TimeArray(a) => Some(a.get(i).copied().map(Value::Timestamp)),
                _ => None,
            })
        }
        ("GetDurationElem", [key, index]) => {
            element(ctx, name, key, index, Value::Duration(TimeDelta::zero()), |v, i| match v {
                ContextValue::DurationArray(a) => Some(a.get(i).copied().map(Value::Duration)),
                _ => None,
            })
        }
        ("int", [value]) => to_int(value),
        ("uint", [value]) => to_uint(value),
        ("double", [value]) => to_double(value),
        ("string", [value]) => to_string(value),
        ("timestamp", [value]) => to_timestamp(value),
        ("duration", [value]) => match value {
            Value::Duration(d) => Ok(Value::Duration(*d)),
            Value::String(s) => parse_duration(s).map(Value::Duration),
            other => Err(unsupported("duration", other)),
        },
        ("size", [value]) => size(value),
        _ => Err(Fault::UnknownFunction(name.to_string())),
    }
}

pub(crate) fn call_method(target: &Value, name: &str, args: &[Value]) -> Result<Value, Fault> {
    match (name, target, args) {
        ("size", value, []) => size(value),
        ("contains", Value::String(s), [Value::String(needle)]) => Ok(Value::Bool(s.contains(needle.as_str()))),
        ("contains", Value::List(items), [needle]) => {
            Ok(Value::Bool(items.iter().any(|item| item.loose_eq(needle))))
        }
        ("startsWith", Value::String(s), [Value::String(prefix)]) => {
            Ok(Value::Bool(s.starts_with(prefix.as_str())))
        }
        ("endsWith", Value::String(s), [Value::String(suffix)]) => {
            Ok(Value::Bool(s.ends_with(suffix.as_str())))
        }
        ("matches", Value::String(s), [Value::String(pattern)]) => {
            let re = Regex::new(pattern)
                .map_err(|err| Fault::Runtime(format!("invalid pattern {pattern:?}: {err}")))?;
            Ok(Value::Bool(re.is_match(s)))
        }
        _ if method_arity(name).is_none() => Err(Fault::UnknownFunction(name.to_string())),
        _ => {
            let kinds: Vec<String> = args.iter().map(|arg| arg.kind().to_string()).collect();
            Err(Fault::Type(format!(
                "no overload for {}.{name}({})",
                target.kind(),
                kinds.join(", ")
            )))
        }
    }
}

fn key_arg<'a>(function: &str, key: &'a Value) -> Result<&'a str, Fault> {
    key.as_str()
        .ok_or_else(|| Fault::Type(format!("{function} expects a string key, got {}", key.kind())))
}

fn length(len: usize) -> i64 {
    i64::try_from(len).unwrap_or(i64::MAX)
}

fn wrong_kind(function: &str, key: &str, expected: &str, found: &ContextValue) -> Fault {
    Fault::Type(format!("{function}: {key} is {}, not {expected}", found.kind_name()))
}

fn scalar(
    ctx: &ProbeContext,
    function: &str,
    key: &Value,
    zero: Value,
    read: impl Fn(&ContextValue) -> Option<Value>,
) -> Result<Value, Fault> {
    let key = key_arg(function, key)?;
    match ctx.get(key) {
        None => Ok(zero),
        Some(value) => read(value).ok_or_else(|| wrong_kind(function, key, &zero.kind().to_string(), value)),
    }
}

fn element(
    ctx: &ProbeContext,
    function: &str,
    key: &Value,
    index: &Value,
    zero: Value,
    read: impl Fn(&ContextValue, usize) -> Option<Option<Value>>,
) -> Result<Value, Fault> {
    let key = key_arg(function, key)?;
    let index = match index {
        Value::Int(i) => usize::try_from(*i).ok(),
        Value::Uint(u) => usize::try_from(*u).ok(),
        other => {
            return Err(Fault::Type(format!("{function} expects an int index, got {}", other.kind())))
        }
    };
    let Some(value) = ctx.get(key) else {
        return Ok(zero);
    };
    let expected = format!("{} array", zero.kind());
    match index {
        Some(index) => match read(value, index) {
            Some(found) => Ok(found.unwrap_or(zero)),
            None => Err(wrong_kind(function, key, &expected, value)),
        },
        // Negative indexes fall back like out-of-range ones, once the kind is confirmed.
        None => match read(value, 0) {
            Some(_) => Ok(zero),
            None => Err(wrong_kind(function, key, &expected, value)),
        },
    }
}

fn unsupported(function: &str, value: &Value) -> Fault {
    Fault::Type(format!("{function}() does not accept {}", value.kind()))
}

fn size(value: &Value) -> Result<Value, Fault> {
    match value {
        Value::String(s) => Ok(Value::Int(length(s.chars().count()))),
        Value::List(items) => Ok(Value::Int(length(items.len()))),
        other => Err(unsupported("size", other)),
    }
}

fn to_int(value: &Value) -> Result<Value, Fault> {
    let overflow = || Fault::Runtime(format!("{value} does not fit in int"));
    match value {
        Value::Int(i) => Ok(Value::Int(*i)),
        Value::Uint(u) => i64::try_from(*u).map(Value::Int).map_err(|_| overflow()),
        Value::Double(d) => {
            if d.is_finite() && *d >= i64::MIN as f64 && *d < i64::MAX as f64 {
                Ok(Value::Int(d.trunc() as i64))
            } else {
                Err(overflow())
            }
        }
        Value::String(s) => s
            .trim()
            .parse::<i64>()
            .map(Value::Int)
            .map_err(|_| Fault::Runtime(format!("cannot convert {s:?} to int"))),
        Value::Timestamp(t) => Ok(Value::Int(t.timestamp())),
        other => Err(unsupported("int", other)),
    }
}

fn to_uint(value: &Value) -> Result<Value, Fault> {
    let overflow = || Fault::Runtime(format!("{value} does not fit in uint"));
    match value {
        Value::Uint(u) => Ok(Value::Uint(*u)),
        Value::Int(i) => u64::try_from(*i).map(Value::Uint).map_err(|_| overflow()),
        Value::Double(d) => {
            if d.is_finite() && *d >= 0.0 && *d < u64::MAX as f64 {
                Ok(Value::Uint(d.trunc() as u64))
            } else {
                Err(overflow())
            }
        }
        Value::String(s) => s
            .trim()
            .parse::<u64>()
            .map(Value::Uint)
            .map_err(|_| Fault::Runtime(format!("cannot convert {s:?} to uint"))),
        other => Err(unsupported("uint", other)),
    }
}

fn to_double(value: &Value) -> Result<Value, Fault> {
    match value {
        Value::Double(d) => Ok(Value::Double(*d)),
        Value::Int(i) => Ok(Value::Double(*i as f64)),
        Value::Uint(u) => Ok(Value::Double(*u as f64)),
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map(Value::Double)
            .map_err(|_| Fault::Runtime(format!("cannot convert {s:?} to double"))),
        other => Err(unsupported("double", other)),
    }
}

fn to_string(value: &Value) -> Result<Value, Fault> {
    Ok(Value::String(match value {
        Value::String(s) => s.clone(),
        Value::Int(i) => i.to_string(),
        Value::Uint(u) => u.to_string(),
        Value::Double(d) => d.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Timestamp(t) => crate::context::format_time(t),
        Value::Duration(d) => format!("{}s", d.num_milliseconds() as f64 / 1000.0),
        other => return Err(unsupported("string", other)),
    }))
}

fn to_timestamp(value: &Value) -> Result<Value, Fault> {
    match value {
        Value::Timestamp(t) => Ok(Value::Timestamp(*t)),
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .map(|t| Value::Timestamp(t.with_timezone(&Utc)))
            .map_err(|err| Fault::Runtime(format!("invalid timestamp {s:?}: {err}"))),
        Value::Int(secs) => DateTime::from_timestamp(*secs, 0)
            .map(Value::Timestamp)
            .ok_or_else(|| Fault::Runtime(format!("timestamp {secs} out of range"))),
        other => Err(unsupported("timestamp", other)),
    }
}

/// Parse a duration such as `300ms`, `1.5h` or `-2h45m`.
///
/// Units: `ns`, `us` (or `µs`), `ms`, `s`, `m`, `h`.
pub(crate) fn parse_duration(text: &str) -> Result<TimeDelta, Fault> {
    let invalid = || Fault::Runtime(format!("invalid duration {text:?}"));
    let (negative, mut rest) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text.strip_prefix('+').unwrap_or(text)),
    };
    if rest == "0" {
        return Ok(TimeDelta::zero());
    }
    if rest.is_empty() {
        return Err(invalid());
    }

    let mut total_nanos: f64 = 0.0;
    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .ok_or_else(invalid)?;
        if number_len == 0 {
            return Err(invalid());
        }
        let number: f64 = rest[..number_len].parse().map_err(|_| invalid())?;
        rest = &rest[number_len..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let scale = match &rest[..unit_len] {
            "ns" => 1.0,
            "us" | "µs" => 1e3,
            "ms" => 1e6,
            "s" => 1e9,
            "m" => 60e9,
            "h" => 3600e9,
            _ => return Err(invalid()),
        };
        rest = &rest[unit_len..];
        total_nanos += number * scale;
    }

    if !total_nanos.is_finite() || total_nanos > i64::MAX as f64 {
        return Err(invalid());
    }
    let nanos = total_nanos.round() as i64;
    Ok(TimeDelta::nanoseconds(if negative { -nanos } else { nanos }))
}
