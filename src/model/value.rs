//! The property value type shared by executors, the codec and the pipelines.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use chrono::NaiveDate;

use super::{IsoDuration, Point, Temporal};

/// A value that can be stored as a property or flow through a query.
///
/// Stored properties never hold `Null` or `Map`; both still appear as
/// query values (parameters, `properties(n)`, missing keys).
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
    Temporal(Temporal),
    Point(Point),
}

impl Value {
    /// Upper-case type name as the database reports it (`LOCAL_TIME`, `POINT`).
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "NULL",
            Value::Bool(_) => "BOOLEAN",
            Value::Int(_) => "INTEGER",
            Value::Float(_) => "FLOAT",
            Value::String(_) => "STRING",
            Value::List(_) => "LIST",
            Value::Map(_) => "MAP",
            Value::Temporal(t) => t.type_name(),
            Value::Point(_) => "POINT",
        }
    }

    pub fn is_null(&self) -> bool {
        *self == Value::Null
    }

    /// Only `true` passes a WHERE filter; `null` and `false` do not.
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Value::Null | Value::Bool(false))
    }

    /// Integers, and floats without a fractional part.
    pub fn as_int(&self) -> Option<i64> {
        match *self {
            Value::Int(i) => Some(i),
            Value::Float(f) if f.fract() == 0.0 => Some(f as i64),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match *self {
            Value::Int(i) => Some(i as f64),
            Value::Float(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        let Value::String(s) = self else { return None };
        Some(s)
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        let Value::List(items) = self else { return None };
        Some(items)
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        let Value::Map(map) = self else { return None };
        Some(map)
    }

    /// Ordering between comparable values. Mixed or null operands are `None`.
    pub fn neo4j_cmp(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
            (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => {
                self.as_float()?.partial_cmp(&other.as_float()?)
            }
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            (Value::Temporal(Temporal::Date(a)), Value::Temporal(Temporal::Date(b))) => Some(a.cmp(b)),
            _ => None,
        }
    }

    /// Three-valued equality: `None` when either side is null.
    /// Integers and floats compare by numeric value.
    pub fn neo4j_eq(&self, other: &Value) -> Option<bool> {
        if self.is_null() || other.is_null() {
            return None;
        }
        let numeric = matches!(
            (self, other),
            (Value::Int(_), Value::Float(_)) | (Value::Float(_), Value::Int(_))
        );
        if numeric {
            return Some(self.as_float() == other.as_float());
        }
        Some(self == other)
    }
}

macro_rules! value_from {
    ($($ty:ty => |$v:ident| $body:expr;)*) => {
        $(impl From<$ty> for Value {
            fn from($v: $ty) -> Self {
                $body
            }
        })*
    };
}

value_from! {
    bool => |v| Value::Bool(v);
    i32 => |v| Value::Int(i64::from(v));
    i64 => |v| Value::Int(v);
    f64 => |v| Value::Float(v);
    String => |v| Value::String(v);
    &str => |v| Value::String(v.to_owned());
    Temporal => |v| Value::Temporal(v);
    NaiveDate => |v| Value::Temporal(Temporal::Date(v));
    IsoDuration => |v| Value::Temporal(Temporal::Duration(v));
    Point => |v| Value::Point(v);
    BTreeMap<String, Value> => |v| Value::Map(v);
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Value::List(items.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(opt: Option<T>) -> Self {
        opt.map_or(Value::Null, Into::into)
    }
}

/// Render a float so it reads back as a float (`1.0`, not `1`).
pub(crate) fn format_float(v: f64) -> String {
    format!("{v:?}")
}

fn write_joined<I, F>(f: &mut fmt::Formatter<'_>, open: &str, close: &str, items: I, mut each: F) -> fmt::Result
where
    I: IntoIterator,
    F: FnMut(&mut fmt::Formatter<'_>, I::Item) -> fmt::Result,
{
    f.write_str(open)?;
    for (i, item) in items.into_iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        each(f, item)?;
    }
    f.write_str(close)
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(v) => f.write_str(&format_float(*v)),
            Value::String(s) => write!(f, "\"{}\"", s.replace('"', "\\\"")),
            Value::List(items) => write_joined(f, "[", "]", items, |f, v| write!(f, "{v}")),
            Value::Map(map) => write_joined(f, "{", "}", map, |f, (k, v)| write!(f, "{k}: {v}")),
            Value::Temporal(t) => write!(f, "{t}"),
            Value::Point(p) => write!(f, "{p}"),
        }
    }
}
