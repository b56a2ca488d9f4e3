//! Validated Cypher literal expressions for temporal and spatial values.
//!
//! A `LiteralExpr` is only ever built from a `Value` or from text that
//! parses as a single constructor call over constant arguments, so a
//! tampered shard cannot smuggle arbitrary Cypher into a statement.

use std::fmt;

use crate::cypher::ast::{Expr, Literal, UnaryOp};
use crate::cypher::parse_expression;
use crate::execution::functions;
use crate::model::Value;

/// Cypher functions whose calls may be spliced into import statements.
pub const CONSTRUCTORS: [&str; 7] = [
    "date",
    "time",
    "localtime",
    "datetime",
    "localdatetime",
    "duration",
    "point",
];

/// A temporal/spatial value (or homogeneous list of them) that is written
/// into a statement as a constructor expression instead of a parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct LiteralExpr {
    value: Value,
}

impl LiteralExpr {
    /// Wrap a value that can only be rebuilt through a constructor call.
    pub fn from_value(value: Value) -> Option<Self> {
        needs_constructor(&value).then_some(Self { value })
    }

    /// Validate a constructor-call fragment such as `date('2020-01-02')`.
    pub fn parse(fragment: &str) -> std::result::Result<Self, String> {
        let expr = parse_expression(fragment).map_err(|e| e.to_string())?;
        let Expr::FunctionCall { name, args, distinct: false } = &expr else {
            return Err(format!("'{fragment}' is not a constructor call"));
        };
        let ctor = name.to_ascii_lowercase();
        if !CONSTRUCTORS.contains(&ctor.as_str()) {
            return Err(format!("'{name}' is not a temporal or spatial constructor"));
        }
        if args.len() != 1 {
            return Err(format!("{name}() takes exactly one argument, got {}", args.len()));
        }
        if !args[0].is_constant() {
            return Err(format!("{name}() arguments must be literals"));
        }
        let arg = eval_constant(&args[0])?;
        let value = functions::construct(&ctor, &[arg])
            .map_err(|e| e.to_string())?
            .ok_or_else(|| format!("'{name}' is not a constructor"))?;
        Self::from_value(value).ok_or_else(|| format!("'{fragment}' does not build a value"))
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn into_value(self) -> Value {
        self.value
    }
}

impl fmt::Display for LiteralExpr {
    /// The canonical constructor expression, re-rendered from the value.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value)
    }
}

fn needs_constructor(value: &Value) -> bool {
    match value {
        Value::Temporal(_) | Value::Point(_) => true,
        Value::List(items) => !items.is_empty() && items.iter().all(needs_constructor),
        _ => false,
    }
}

/// Evaluate a constant argument expression.
fn eval_constant(expr: &Expr) -> std::result::Result<Value, String> {
    match expr {
        Expr::Literal(Literal::Null) => Ok(Value::Null),
        Expr::Literal(Literal::Bool(b)) => Ok(Value::Bool(*b)),
        Expr::Literal(Literal::Int(i)) => Ok(Value::Int(*i)),
        Expr::Literal(Literal::Float(f)) => Ok(Value::Float(*f)),
        Expr::Literal(Literal::String(s)) => Ok(Value::String(s.clone())),
        Expr::UnaryOp { op: UnaryOp::Negate, expr } => match eval_constant(expr)? {
            Value::Int(i) => Ok(Value::Int(-i)),
            Value::Float(f) => Ok(Value::Float(-f)),
            other => Err(format!("cannot negate {}", other.type_name())),
        },
        Expr::List(items) => items.iter().map(eval_constant).collect::<Result<Vec<_>, _>>().map(Value::List),
        Expr::MapLiteral(map) => map
            .iter()
            .map(|(k, v)| Ok((k.clone(), eval_constant(v)?)))
            .collect::<Result<_, String>>()
            .map(Value::Map),
        _ => Err("unsupported expression in literal argument".into()),
    }
}
