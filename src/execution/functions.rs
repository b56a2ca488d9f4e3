//! Scalar functions that do not need graph access.
//!
//! Entity functions (`id`, `labels`, `type`, `properties`) and aggregates
//! are handled by the interpreter because they look at bindings.

use crate::model::{Point, Temporal, Value};
use crate::{Error, Result};

/// Evaluate a temporal or spatial constructor.
///
/// Returns `Ok(None)` when `name` is not a constructor, so callers can fall
/// through to other function tables. A `Null` argument yields `Null`.
pub fn construct(name: &str, args: &[Value]) -> Result<Option<Value>> {
    let name = name.to_ascii_lowercase();
    let is_temporal = matches!(
        name.as_str(),
        "date" | "time" | "localtime" | "datetime" | "localdatetime" | "duration"
    );
    if !is_temporal && name != "point" {
        return Ok(None);
    }

    let [arg] = args else {
        return Err(Error::Query(format!("{name}() takes exactly one argument, got {}", args.len())));
    };

    let value = match arg {
        Value::Null => Value::Null,
        Value::String(text) if is_temporal => {
            Value::Temporal(Temporal::parse(&name, text).map_err(Error::Query)?)
        }
        Value::Map(map) if !is_temporal => Value::Point(Point::from_map(map).map_err(Error::Query)?),
        other => {
            return Err(Error::TypeError {
                expected: if is_temporal { "String".into() } else { "Map".into() },
                got: other.type_name().into(),
            })
        }
    };
    Ok(Some(value))
}

/// Evaluate a pure scalar function. Returns `Ok(None)` for unknown names.
pub fn call_scalar(name: &str, args: &[Value]) -> Result<Option<Value>> {
    if let Some(v) = construct(name, args)? {
        return Ok(Some(v));
    }
    let value = match (name.to_ascii_lowercase().as_str(), args) {
        ("size", [Value::List(items)]) => Value::Int(items.len() as i64),
        ("size", [Value::String(s)]) => Value::Int(s.chars().count() as i64),
        ("size", [Value::Null]) => Value::Null,
        ("keys", [Value::Map(map)]) => Value::List(map.keys().cloned().map(Value::String).collect()),
        ("tostring", [v]) => match v {
            Value::Null => Value::Null,
            Value::String(s) => Value::String(s.clone()),
            other => Value::String(other.to_string()),
        },
        ("coalesce", values) => values.iter().find(|v| !v.is_null()).cloned().unwrap_or(Value::Null),
        ("size" | "keys" | "tostring", _) => {
            return Err(Error::Query(format!("invalid arguments to {name}()")));
        }
        _ => return Ok(None),
    };
    Ok(Some(value))
}
