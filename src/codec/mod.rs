//! # Property Codec
//!
//! Lossless mapping between `Value` property maps and their portable JSON
//! form.
//!
//! | Value | JSON |
//! |-------|------|
//! | Null, Bool, Int, Float, String | native JSON |
//! | Temporal | `"$date('2020-01-02')"`, `"$duration('P0M1DT0S')"`, ... |
//! | Point | `"$point({x: 1.0, y: 2.0, crs: 'cartesian'})"` |
//! | List | JSON array of one element kind |
//!
//! A plain string that happens to start with a reserved prefix is stored
//! as-is, and its SHA-256 goes into the record's `hash_props` table. On
//! decode, a prefixed string with a matching hash is a string; without a
//! hash entry it is a constructor expression; with a wrong hash the shard
//! is corrupt.
//!
//! Two different strings that both carry a reserved prefix and collide on
//! SHA-256 cannot be told apart. That risk is accepted, not handled.

pub mod hash;
pub mod literal;
pub mod record;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use crate::model::{PropertyMap, Value};

pub use literal::LiteralExpr;
pub use record::{DecodedNode, DecodedRelationship, EncodedNode, EncodedRelationship};

/// Marks an encoded temporal/spatial literal.
pub const SENTINEL: char = '$';

/// String prefixes that decode as constructor expressions.
pub const RESERVED_PREFIXES: [&str; 7] = [
    "$date(",
    "$time(",
    "$localtime(",
    "$datetime(",
    "$localdatetime(",
    "$duration(",
    "$point(",
];

pub fn has_reserved_prefix(text: &str) -> bool {
    RESERVED_PREFIXES.iter().any(|p| text.starts_with(p))
}

/// Encoded property maps, keyed by property name.
pub type JsonProperties = serde_json::Map<String, Json>;

/// Per-record side table of content hashes, keyed by property name.
pub type HashTable = BTreeMap<String, ContentHash>;

/// Hash entry for one property: the whole string, or selected elements
/// of a string list (keyed by decimal element index).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ContentHash {
    Whole(String),
    Elements(BTreeMap<String, String>),
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CodecError {
    #[error("property '{key}': list mixes {first} and {other} elements")]
    HeterogeneousList {
        key: String,
        first: &'static str,
        other: &'static str,
    },

    #[error("property '{key}': {type_name} values cannot be stored as properties")]
    Unsupported { key: String, type_name: &'static str },

    #[error("property '{key}': non-finite float cannot be exported")]
    NonFiniteFloat { key: String },

    #[error("property '{key}': content hash does not match its text")]
    HashMismatch { key: String },

    #[error("property '{key}': hash entry has no matching reserved-prefix string")]
    OrphanHash { key: String },

    #[error("property '{key}': malformed literal: {reason}")]
    MalformedLiteral { key: String, reason: String },

    #[error("property '{key}': unexpected JSON {found}")]
    UnexpectedShape { key: String, found: String },
}

// ============================================================================
// Encode
// ============================================================================

/// Encode one property value. Returns the JSON form and, for strings
/// that look like literals, the hash entry to record.
pub fn encode_value(key: &str, value: &Value) -> Result<(Json, Option<ContentHash>), CodecError> {
    match value {
        Value::List(items) => encode_list(key, items),
        scalar => encode_scalar(key, scalar).map(|(json, hash)| (json, hash.map(ContentHash::Whole))),
    }
}

fn encode_scalar(key: &str, value: &Value) -> Result<(Json, Option<String>), CodecError> {
    match value {
        Value::Null => Ok((Json::Null, None)),
        Value::Bool(b) => Ok((Json::Bool(*b), None)),
        Value::Int(i) => Ok((Json::from(*i), None)),
        Value::Float(f) => serde_json::Number::from_f64(*f)
            .map(|n| (Json::Number(n), None))
            .ok_or_else(|| CodecError::NonFiniteFloat { key: key.to_owned() }),
        Value::String(s) => {
            let hash = has_reserved_prefix(s).then(|| hash::content_hash(s));
            Ok((Json::String(s.clone()), hash))
        }
        Value::Temporal(t) => Ok((Json::String(format!("{SENTINEL}{t}")), None)),
        Value::Point(p) => Ok((Json::String(format!("{SENTINEL}{p}")), None)),
        Value::List(_) => Err(CodecError::Unsupported { key: key.to_owned(), type_name: "nested LIST" }),
        Value::Map(_) => Err(CodecError::Unsupported { key: key.to_owned(), type_name: "MAP" }),
    }
}

fn encode_list(key: &str, items: &[Value]) -> Result<(Json, Option<ContentHash>), CodecError> {
    let mut first: Option<&'static str> = None;
    let mut out = Vec::with_capacity(items.len());
    let mut hashes = BTreeMap::new();

    for (i, item) in items.iter().enumerate() {
        if item.is_null() {
            return Err(CodecError::Unsupported { key: key.to_owned(), type_name: "NULL list element" });
        }
        let tag = item.type_name();
        match first {
            None => first = Some(tag),
            Some(f) if f != tag => {
                return Err(CodecError::HeterogeneousList { key: key.to_owned(), first: f, other: tag });
            }
            Some(_) => {}
        }
        let (json, hash) = encode_scalar(key, item)?;
        if let Some(h) = hash {
            hashes.insert(i.to_string(), h);
        }
        out.push(json);
    }

    let hash = (!hashes.is_empty()).then_some(ContentHash::Elements(hashes));
    Ok((Json::Array(out), hash))
}

/// Encode a whole property map into its JSON form plus hash side table.
pub fn encode_properties(props: &PropertyMap) -> Result<(JsonProperties, HashTable), CodecError> {
    let mut json = JsonProperties::new();
    let mut hashes = HashTable::new();
    for (key, value) in props {
        let (encoded, hash) = encode_value(key, value)?;
        json.insert(key.clone(), encoded);
        if let Some(hash) = hash {
            hashes.insert(key.clone(), hash);
        }
    }
    Ok((json, hashes))
}

// ============================================================================
// Decode
// ============================================================================

/// A decoded property: a plain value bound as a parameter, or a
/// constructor expression spliced into the statement.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedValue {
    Value(Value),
    Literal(LiteralExpr),
}

impl DecodedValue {
    pub fn into_value(self) -> Value {
        match self {
            DecodedValue::Value(v) => v,
            DecodedValue::Literal(l) => l.into_value(),
        }
    }
}

/// Decoded property map, split by how each property reaches the database.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecodedProperties {
    /// Bound through statement parameters.
    pub values: PropertyMap,
    /// Spliced as constructor expressions.
    pub literals: BTreeMap<String, LiteralExpr>,
}

impl DecodedProperties {
    pub fn has_literals(&self) -> bool {
        !self.literals.is_empty()
    }

    pub fn len(&self) -> usize {
        self.values.len() + self.literals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every property as a plain `Value`.
    pub fn into_property_map(self) -> PropertyMap {
        let mut map = self.values;
        map.extend(self.literals.into_iter().map(|(k, l)| (k, l.into_value())));
        map
    }
}

/// Decode one property value against its (optional) hash entry.
pub fn decode_value(key: &str, json: &Json, hash: Option<&ContentHash>) -> Result<DecodedValue, CodecError> {
    match json {
        Json::Array(items) => decode_list(key, items, hash),
        scalar => {
            let whole = match hash {
                None => None,
                Some(ContentHash::Whole(h)) => Some(h.as_str()),
                Some(ContentHash::Elements(_)) => {
                    return Err(CodecError::UnexpectedShape {
                        key: key.to_owned(),
                        found: "element hashes on a non-list property".into(),
                    });
                }
            };
            decode_scalar(key, scalar, whole)
        }
    }
}

fn decode_scalar(key: &str, json: &Json, hash: Option<&str>) -> Result<DecodedValue, CodecError> {
    if hash.is_some() && !matches!(json, Json::String(s) if has_reserved_prefix(s)) {
        return Err(CodecError::OrphanHash { key: key.to_owned() });
    }
    let value = match json {
        Json::Null => Value::Null,
        Json::Bool(b) => Value::Bool(*b),
        Json::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Int(i)
            } else if n.is_f64() {
                Value::Float(n.as_f64().unwrap_or_default())
            } else {
                return Err(CodecError::UnexpectedShape {
                    key: key.to_owned(),
                    found: format!("integer {n} out of range"),
                });
            }
        }
        Json::String(s) if has_reserved_prefix(s) => match hash {
            Some(h) if hash::verify(s, h) => Value::String(s.clone()),
            Some(_) => return Err(CodecError::HashMismatch { key: key.to_owned() }),
            None => {
                let lit = LiteralExpr::parse(&s[SENTINEL.len_utf8()..]).map_err(|reason| {
                    CodecError::MalformedLiteral { key: key.to_owned(), reason }
                })?;
                return Ok(DecodedValue::Literal(lit));
            }
        },
        Json::String(s) => Value::String(s.clone()),
        Json::Array(_) => {
            return Err(CodecError::UnexpectedShape { key: key.to_owned(), found: "nested array".into() });
        }
        Json::Object(_) => {
            return Err(CodecError::UnexpectedShape { key: key.to_owned(), found: "object".into() });
        }
    };
    Ok(DecodedValue::Value(value))
}

fn decode_list(key: &str, items: &[Json], hash: Option<&ContentHash>) -> Result<DecodedValue, CodecError> {
    let element_hashes = match hash {
        None => None,
        Some(ContentHash::Elements(map)) => Some(map),
        Some(ContentHash::Whole(_)) => {
            return Err(CodecError::UnexpectedShape {
                key: key.to_owned(),
                found: "whole-value hash on a list property".into(),
            });
        }
    };
    if let Some(map) = element_hashes {
        let orphan = map.keys().any(|idx| idx.parse::<usize>().map_or(true, |i| i >= items.len()));
        if orphan {
            return Err(CodecError::OrphanHash { key: key.to_owned() });
        }
    }

    let mut values = Vec::with_capacity(items.len());
    let mut literal_count = 0;
    for (i, item) in items.iter().enumerate() {
        let h = element_hashes.and_then(|m| m.get(&i.to_string())).map(String::as_str);
        let decoded = decode_scalar(key, item, h)?;
        if matches!(decoded, DecodedValue::Literal(_)) {
            literal_count += 1;
        }
        values.push(decoded.into_value());
    }

    if let Some(first) = values.first() {
        let tag = first.type_name();
        if let Some(other) = values.iter().map(Value::type_name).find(|t| *t != tag) {
            return Err(CodecError::HeterogeneousList { key: key.to_owned(), first: tag, other });
        }
    }

    let list = Value::List(values);
    if literal_count > 0 {
        LiteralExpr::from_value(list).map(DecodedValue::Literal).ok_or_else(|| {
            CodecError::MalformedLiteral { key: key.to_owned(), reason: "list mixes literals and plain values".into() }
        })
    } else {
        Ok(DecodedValue::Value(list))
    }
}

/// Decode a whole property map. Hash entries for absent properties are
/// corruption.
pub fn decode_properties(json: &JsonProperties, hashes: &HashTable) -> Result<DecodedProperties, CodecError> {
    if let Some(key) = hashes.keys().find(|k| !json.contains_key(*k)) {
        return Err(CodecError::OrphanHash { key: key.clone() });
    }
    let mut out = DecodedProperties::default();
    for (key, value) in json {
        match decode_value(key, value, hashes.get(key))? {
            DecodedValue::Value(v) => {
                out.values.insert(key.clone(), v);
            }
            DecodedValue::Literal(l) => {
                out.literals.insert(key.clone(), l);
            }
        }
    }
    Ok(out)
}
