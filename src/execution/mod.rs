//! Query execution engine.
//!
//! Interprets parsed Cypher statements against a [`GraphState`] snapshot.
//! Used by `MemoryBackend`; a Bolt-backed executor never touches this module.

pub mod functions;
pub mod graph;
mod interpreter;

use std::collections::HashMap;
use std::sync::Arc;

use crate::cypher;
use crate::model::*;
use crate::{Error, Result};

pub use graph::{GraphState, UniqueConstraint};

/// Query execution result.
#[derive(Debug, Clone, Default)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<ResultRow>,
    pub stats: ExecutionStats,
}

impl QueryResult {
    /// The first row, or `NotFound` for an empty result.
    pub fn single(&self) -> Result<&ResultRow> {
        self.rows.first().ok_or_else(|| Error::NotFound("result row".into()))
    }
}

/// A single row in the result set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultRow {
    pub values: HashMap<String, Value>,
}

impl ResultRow {
    /// Column `key` converted to `T`; a missing column is `NotFound`.
    pub fn get<T: FromValue>(&self, key: &str) -> Result<T> {
        match self.values.get(key) {
            Some(val) => T::from_value(val),
            None => Err(Error::NotFound(format!("Column '{key}'"))),
        }
    }
}

/// Execution statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecutionStats {
    pub nodes_created: u64,
    pub relationships_created: u64,
    pub properties_set: u64,
    pub labels_added: u64,
    pub labels_removed: u64,
    pub constraints_added: u64,
    pub constraints_removed: u64,
}

impl ExecutionStats {
    pub fn contains_updates(&self) -> bool {
        *self != ExecutionStats::default()
    }
}

/// Identity reported by `db.info()` and `dbms.components()`.
#[derive(Debug, Clone)]
pub struct ServerInfo {
    pub db_id: String,
    pub db_name: String,
    pub version: String,
    pub edition: String,
}

/// Parse and run one statement against `graph`.
///
/// Writes go through `Arc::make_mut`, so the caller's snapshot is copied on
/// the first write and other holders of the `Arc` never observe them. When
/// `writable` is false any mutation fails.
pub fn execute(
    graph: &mut Arc<GraphState>,
    writable: bool,
    server: &ServerInfo,
    statement: &str,
    params: &PropertyMap,
) -> Result<QueryResult> {
    let parsed = cypher::parse(statement)?;
    interpreter::Interpreter::new(graph, writable, server, params).run(&parsed)
}

// ============================================================================
// Typed access
// ============================================================================

/// Typed extraction of a column value, see [`ResultRow::get`].
pub trait FromValue: Sized {
    fn from_value(val: &Value) -> Result<Self>;
}

/// `FromValue` for a type via a `&Value -> Option<T>` accessor.
macro_rules! from_value_via {
    ($($ty:ty: $expected:literal => $access:expr),* $(,)?) => {
        $(impl FromValue for $ty {
            fn from_value(val: &Value) -> Result<Self> {
                let access: fn(&Value) -> Option<$ty> = $access;
                access(val).ok_or_else(|| Error::TypeError {
                    expected: $expected.into(),
                    got: val.type_name().into(),
                })
            }
        })*
    };
}

from_value_via! {
    Value: "Any" => |v| Some(v.clone()),
    String: "String" => |v| v.as_str().map(str::to_owned),
    i64: "Integer" => Value::as_int,
    f64: "Float" => Value::as_float,
    bool: "Boolean" => |v| match v {
        Value::Bool(b) => Some(*b),
        _ => None,
    },
    PropertyMap: "Map" => |v| v.as_map().cloned(),
}

impl<T: FromValue> FromValue for Vec<T> {
    fn from_value(val: &Value) -> Result<Self> {
        let items = val.as_list().ok_or_else(|| Error::TypeError {
            expected: "List".into(),
            got: val.type_name().into(),
        })?;
        items.iter().map(T::from_value).collect()
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(val: &Value) -> Result<Self> {
        if val.is_null() { Ok(None) } else { T::from_value(val).map(Some) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server() -> ServerInfo {
        ServerInfo {
            db_id: "abc".into(),
            db_name: "neo4j".into(),
            version: "5.13.0".into(),
            edition: "community".into(),
        }
    }

    fn run(graph: &mut Arc<GraphState>, q: &str) -> QueryResult {
        execute(graph, true, &server(), q, &PropertyMap::new()).unwrap()
    }

    #[test]
    fn test_typed_get() {
        let mut g = Arc::new(GraphState::default());
        let r = run(&mut g, "RETURN 1 AS n, 'x' AS s, [1, 2] AS l, null AS z");
        let row = r.single().unwrap();
        assert_eq!(row.get::<i64>("n").unwrap(), 1);
        assert_eq!(row.get::<String>("s").unwrap(), "x");
        assert_eq!(row.get::<Vec<i64>>("l").unwrap(), vec![1, 2]);
        assert_eq!(row.get::<Option<String>>("z").unwrap(), None);
        assert!(matches!(row.get::<bool>("n"), Err(Error::TypeError { .. })));
        assert!(matches!(row.get::<i64>("missing"), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_read_only_rejects_writes() {
        let mut g = Arc::new(GraphState::default());
        let err = execute(&mut g, false, &server(), "CREATE (n:A)", &PropertyMap::new()).unwrap_err();
        assert!(matches!(err, Error::Query(_)));
        assert_eq!(g.node_count(), 0);
    }

    #[test]
    fn test_copy_on_write_snapshot() {
        let committed = Arc::new(GraphState::default());
        let mut working = Arc::clone(&committed);
        run(&mut working, "CREATE (:A {k: 1})");
        assert_eq!(working.node_count(), 1);
        assert_eq!(committed.node_count(), 0);
    }
}
