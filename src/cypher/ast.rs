//! Syntax tree for the accepted Cypher subset.
//!
//! A query is a flat list of clauses applied in order to a table of
//! variable bindings. Nothing here touches storage.

use std::collections::BTreeMap;

#[derive(Debug, Clone)]
pub enum Statement {
    Query(Query),
    Schema(SchemaCommand),
}

#[derive(Debug, Clone)]
pub struct Query {
    pub clauses: Vec<Clause>,
}

impl Query {
    /// Whether running the query can change the graph.
    pub fn is_write(&self) -> bool {
        self.clauses.iter().any(Clause::writes)
    }
}

#[derive(Debug, Clone)]
pub enum Clause {
    Match { patterns: Vec<Pattern>, where_clause: Option<Expr> },
    Unwind { expr: Expr, alias: String },
    Create { patterns: Vec<Pattern> },
    Set { items: Vec<SetItem> },
    Remove { items: Vec<RemoveItem> },
    Call(ProcedureCall),
    /// Always the final clause when present.
    Return(ReturnClause),
}

impl Clause {
    fn writes(&self) -> bool {
        matches!(self, Clause::Create { .. } | Clause::Set { .. } | Clause::Remove { .. })
    }
}

// ============================================================================
// Patterns
// ============================================================================

/// `(a)-[r]->(b)-[s]-(c)`: a start node and zero or more hops.
#[derive(Debug, Clone)]
pub struct Pattern {
    pub start: NodePattern,
    pub hops: Vec<Hop>,
}

/// One relationship and the node it leads to.
#[derive(Debug, Clone)]
pub struct Hop {
    pub rel: RelPattern,
    pub node: NodePattern,
}

/// `(alias:A:B {key: expr})`; every part optional.
#[derive(Debug, Clone, Default)]
pub struct NodePattern {
    pub alias: Option<String>,
    pub labels: Vec<String>,
    pub properties: BTreeMap<String, Expr>,
}

/// `-[alias:T1|T2 {key: expr}]->`
#[derive(Debug, Clone)]
pub struct RelPattern {
    pub alias: Option<String>,
    /// Any of these types matches; empty matches every type.
    pub rel_types: Vec<String>,
    pub direction: PatternDirection,
    pub properties: BTreeMap<String, Expr>,
}

/// Arrow direction, read left to right through the pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternDirection {
    Right,
    Left,
    Both,
}

// ============================================================================
// Projection and procedures
// ============================================================================

#[derive(Debug, Clone)]
pub struct ReturnClause {
    pub distinct: bool,
    pub items: Vec<ReturnItem>,
    pub order_by: Vec<OrderExpr>,
    pub skip: Option<Expr>,
    pub limit: Option<Expr>,
}

#[derive(Debug, Clone)]
pub struct ReturnItem {
    pub expr: Expr,
    pub alias: Option<String>,
}

#[derive(Debug, Clone)]
pub struct OrderExpr {
    pub expr: Expr,
    pub ascending: bool,
}

/// `CALL db.labels() YIELD label AS l`
#[derive(Debug, Clone)]
pub struct ProcedureCall {
    /// Dotted name, e.g. `db.propertyKeys`.
    pub name: String,
    pub args: Vec<Expr>,
    /// `None` binds every output column under its own name.
    pub yields: Option<Vec<YieldItem>>,
}

#[derive(Debug, Clone)]
pub struct YieldItem {
    pub column: String,
    pub alias: Option<String>,
}

// ============================================================================
// Expressions
// ============================================================================

#[derive(Debug, Clone)]
pub enum Expr {
    Literal(Literal),
    Variable(String),
    /// `expr.key`
    Property { expr: Box<Expr>, key: String },
    /// `$name`
    Parameter(String),
    FunctionCall { name: String, args: Vec<Expr>, distinct: bool },
    BinaryOp { left: Box<Expr>, op: BinaryOp, right: Box<Expr> },
    UnaryOp { op: UnaryOp, expr: Box<Expr> },
    List(Vec<Expr>),
    MapLiteral(BTreeMap<String, Expr>),
    /// `expr IN list`
    In { expr: Box<Expr>, list: Box<Expr> },
    /// `expr IS [NOT] NULL`
    IsNull { expr: Box<Expr>, negated: bool },
    /// The `*` in `count(*)`.
    Star,
}

impl Expr {
    /// `count(..)` or `collect(..)` as the outermost call.
    pub fn is_aggregate(&self) -> bool {
        let Expr::FunctionCall { name, .. } = self else { return false };
        ["count", "collect"].iter().any(|agg| name.eq_ignore_ascii_case(agg))
    }

    /// Built from literals and calls on literals only: no variables,
    /// parameters or property reads anywhere inside.
    pub fn is_constant(&self) -> bool {
        match self {
            Expr::Literal(_) => true,
            Expr::Variable(_) | Expr::Parameter(_) | Expr::Property { .. } | Expr::Star => false,
            Expr::UnaryOp { expr, .. } | Expr::IsNull { expr, .. } => expr.is_constant(),
            Expr::BinaryOp { left, right, .. } => left.is_constant() && right.is_constant(),
            Expr::In { expr, list } => expr.is_constant() && list.is_constant(),
            Expr::FunctionCall { args: items, .. } | Expr::List(items) => {
                items.iter().all(Expr::is_constant)
            }
            Expr::MapLiteral(map) => map.values().all(Expr::is_constant),
        }
    }
}

#[derive(Debug, Clone)]
pub enum Literal {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    Neq,
    Lt,
    Lte,
    Gt,
    Gte,
    And,
    Or,
    Xor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Negate,
}

// ============================================================================
// Updates
// ============================================================================

#[derive(Debug, Clone)]
pub enum SetItem {
    /// `n.key = expr`
    Property { variable: String, key: String, value: Expr },
    /// `n = map`, replacing every property
    AllProperties { variable: String, value: Expr },
    /// `n += map`
    MergeProperties { variable: String, value: Expr },
    /// `n:Label`
    Label { variable: String, label: String },
}

#[derive(Debug, Clone)]
pub enum RemoveItem {
    Property { variable: String, key: String },
    Label { variable: String, label: String },
}

/// Node uniqueness constraints are the only schema objects.
#[derive(Debug, Clone)]
pub enum SchemaCommand {
    ShowConstraints,
    /// Either `FOR (n:L) REQUIRE n.p IS UNIQUE` or `ON (n:L) ASSERT n.p IS UNIQUE`.
    CreateUniqueConstraint {
        name: Option<String>,
        if_not_exists: bool,
        label: String,
        property: String,
    },
    DropConstraint { name: String, if_exists: bool },
}
