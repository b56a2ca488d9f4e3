//! Clause-chain interpreter.
//!
//! A query is evaluated left to right over a list of binding rows. Each
//! clause maps the current rows to new rows; RETURN projects them.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use crate::cypher::ast::*;
use crate::model::*;
use crate::{Error, Result};

use super::graph::GraphState;
use super::{functions, ExecutionStats, QueryResult, ResultRow, ServerInfo};

/// What a variable is bound to.
#[derive(Debug, Clone, PartialEq)]
enum Binding {
    Value(Value),
    Node(NodeId),
    Rel(RelId),
}

type Row = BTreeMap<String, Binding>;

pub(crate) struct Interpreter<'a> {
    graph: &'a mut Arc<GraphState>,
    writable: bool,
    server: &'a ServerInfo,
    params: &'a PropertyMap,
    stats: ExecutionStats,
}

impl<'a> Interpreter<'a> {
    pub(crate) fn new(
        graph: &'a mut Arc<GraphState>,
        writable: bool,
        server: &'a ServerInfo,
        params: &'a PropertyMap,
    ) -> Self {
        Self { graph, writable, server, params, stats: ExecutionStats::default() }
    }

    pub(crate) fn run(mut self, statement: &Statement) -> Result<QueryResult> {
        let mut result = match statement {
            Statement::Query(query) => self.run_query(query)?,
            Statement::Schema(cmd) => self.run_schema(cmd)?,
        };
        result.stats = self.stats;
        Ok(result)
    }

    fn graph(&self) -> &GraphState {
        &**self.graph
    }

    fn graph_mut(&mut self) -> Result<&mut GraphState> {
        if !self.writable {
            return Err(Error::Query("Writing in read access mode not allowed".into()));
        }
        Ok(Arc::make_mut(self.graph))
    }
}

// ============================================================================
// Clause chain
// ============================================================================

impl Interpreter<'_> {
    fn run_query(&mut self, query: &Query) -> Result<QueryResult> {
        let mut rows = vec![Row::new()];
        let mut yielded: Vec<String> = Vec::new();

        for clause in &query.clauses {
            yielded.clear();
            match clause {
                Clause::Match { patterns, where_clause } => {
                    for pattern in patterns {
                        let mut next = Vec::new();
                        for row in &rows {
                            next.extend(self.match_pattern(row, pattern)?);
                        }
                        rows = next;
                    }
                    if let Some(predicate) = where_clause {
                        let mut kept = Vec::with_capacity(rows.len());
                        for row in rows {
                            if self.eval(&row, predicate)?.is_truthy() {
                                kept.push(row);
                            }
                        }
                        rows = kept;
                    }
                }
                Clause::Unwind { expr, alias } => {
                    let mut next = Vec::new();
                    for row in &rows {
                        let items = match self.eval(row, expr)? {
                            Value::List(items) => items,
                            Value::Null => Vec::new(),
                            other => vec![other],
                        };
                        for item in items {
                            let mut r = row.clone();
                            r.insert(alias.clone(), Binding::Value(item));
                            next.push(r);
                        }
                    }
                    rows = next;
                }
                Clause::Create { patterns } => {
                    for row in &mut rows {
                        for pattern in patterns {
                            self.create_pattern(row, pattern)?;
                        }
                    }
                }
                Clause::Set { items } => {
                    for row in &rows {
                        for item in items {
                            self.apply_set(row, item)?;
                        }
                    }
                }
                Clause::Remove { items } => {
                    for row in &rows {
                        for item in items {
                            self.apply_remove(row, item)?;
                        }
                    }
                }
                Clause::Call(call) => {
                    let (columns, next) = self.call_procedure(&rows, call)?;
                    rows = next;
                    yielded = columns;
                }
                Clause::Return(ret) => return self.project(rows, ret),
            }
        }

        // A trailing CALL streams its yielded columns; anything else returns nothing.
        let rows = if yielded.is_empty() {
            Vec::new()
        } else {
            rows.iter()
                .map(|row| ResultRow {
                    values: yielded
                        .iter()
                        .map(|c| (c.clone(), self.binding_value(row.get(c).cloned())))
                        .collect(),
                })
                .collect()
        };
        Ok(QueryResult { columns: yielded, rows, stats: ExecutionStats::default() })
    }
}

// ============================================================================
// MATCH
// ============================================================================

impl Interpreter<'_> {
    fn match_pattern(&self, row: &Row, pattern: &Pattern) -> Result<Vec<Row>> {
        match pattern.hops.as_slice() {
            [] => {
                let np = &pattern.start;
                let mut out = Vec::new();
                for id in self.node_candidates(row, np)? {
                    let mut r = row.clone();
                    if try_bind(&mut r, np.alias.as_deref(), Binding::Node(id)) {
                        out.push(r);
                    }
                }
                Ok(out)
            }
            [Hop { rel: rp, node: right }] => {
                let left = &pattern.start;
                let mut out = Vec::new();
                for rel in self.graph().relationships() {
                    if !rp.rel_types.is_empty() && !rp.rel_types.contains(&rel.rel_type) {
                        continue;
                    }
                    if !self.rel_matches(row, rp, rel)? {
                        continue;
                    }
                    let orientations = match rp.direction {
                        PatternDirection::Right => vec![(rel.src, rel.dst)],
                        PatternDirection::Left => vec![(rel.dst, rel.src)],
                        PatternDirection::Both if rel.src == rel.dst => vec![(rel.src, rel.dst)],
                        PatternDirection::Both => vec![(rel.src, rel.dst), (rel.dst, rel.src)],
                    };
                    for (a, b) in orientations {
                        if !self.node_matches(row, left, a)? || !self.node_matches(row, right, b)? {
                            continue;
                        }
                        let mut r = row.clone();
                        if try_bind(&mut r, left.alias.as_deref(), Binding::Node(a))
                            && try_bind(&mut r, rp.alias.as_deref(), Binding::Rel(rel.id))
                            && try_bind(&mut r, right.alias.as_deref(), Binding::Node(b))
                        {
                            out.push(r);
                        }
                    }
                }
                Ok(out)
            }
            _ => Err(Error::Query("Only node and single-hop relationship patterns can be matched".into())),
        }
    }

    fn node_candidates(&self, row: &Row, np: &NodePattern) -> Result<Vec<NodeId>> {
        if let Some(Binding::Node(id)) = np.alias.as_ref().and_then(|a| row.get(a)) {
            return Ok(if self.node_matches(row, np, *id)? { vec![*id] } else { Vec::new() });
        }
        let mut out = Vec::new();
        for node in self.graph().nodes() {
            if self.node_matches(row, np, node.id)? {
                out.push(node.id);
            }
        }
        Ok(out)
    }

    fn node_matches(&self, row: &Row, np: &NodePattern, id: NodeId) -> Result<bool> {
        let Some(node) = self.graph().node(id) else { return Ok(false) };
        if !np.labels.iter().all(|l| node.has_label(l)) {
            return Ok(false);
        }
        self.props_match(row, &np.properties, &node.properties)
    }

    fn rel_matches(&self, row: &Row, rp: &RelPattern, rel: &Relationship) -> Result<bool> {
        self.props_match(row, &rp.properties, &rel.properties)
    }

    fn props_match(&self, row: &Row, wanted: &BTreeMap<String, Expr>, actual: &PropertyMap) -> Result<bool> {
        for (key, expr) in wanted {
            let expected = self.eval(row, expr)?;
            let Some(have) = actual.get(key) else { return Ok(false) };
            if have.neo4j_eq(&expected) != Some(true) {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

/// Bind `alias` unless it is already bound to something else.
fn try_bind(row: &mut Row, alias: Option<&str>, binding: Binding) -> bool {
    let Some(alias) = alias else { return true };
    match row.get(alias) {
        Some(existing) => *existing == binding,
        None => {
            row.insert(alias.to_owned(), binding);
            true
        }
    }
}

// ============================================================================
// CREATE / SET / REMOVE
// ============================================================================

impl Interpreter<'_> {
    fn create_pattern(&mut self, row: &mut Row, pattern: &Pattern) -> Result<()> {
        let mut prev = self.create_or_reuse_node(row, &pattern.start)?;
        for hop in &pattern.hops {
            let next = self.create_or_reuse_node(row, &hop.node)?;
            self.create_relationship(row, &hop.rel, prev, next)?;
            prev = next;
        }
        Ok(())
    }

    fn create_or_reuse_node(&mut self, row: &mut Row, np: &NodePattern) -> Result<NodeId> {
        if let Some(alias) = &np.alias {
            if let Some(existing) = row.get(alias) {
                return match existing {
                    Binding::Node(id) if np.labels.is_empty() && np.properties.is_empty() => Ok(*id),
                    _ => Err(Error::Query(format!("Variable `{alias}` already declared"))),
                };
            }
        }
        let props = self.eval_props(row, &np.properties)?;
        let labels: BTreeSet<String> = np.labels.iter().cloned().collect();
        let (label_count, prop_count) = (labels.len() as u64, props.len() as u64);
        let id = self.graph_mut()?.create_node(labels, props)?;
        self.stats.nodes_created += 1;
        self.stats.labels_added += label_count;
        self.stats.properties_set += prop_count;
        if let Some(alias) = &np.alias {
            row.insert(alias.clone(), Binding::Node(id));
        }
        Ok(id)
    }

    fn create_relationship(&mut self, row: &mut Row, rp: &RelPattern, prev: NodeId, next: NodeId) -> Result<()> {
        let [rel_type] = rp.rel_types.as_slice() else {
            return Err(Error::Query("Exactly one relationship type must be specified for CREATE".into()));
        };
        let (src, dst) = match rp.direction {
            PatternDirection::Right => (prev, next),
            PatternDirection::Left => (next, prev),
            PatternDirection::Both => {
                return Err(Error::Query("Only directed relationships are supported in CREATE".into()))
            }
        };
        let props = self.eval_props(row, &rp.properties)?;
        let prop_count = props.len() as u64;
        let id = self.graph_mut()?.create_relationship(src, dst, rel_type, props)?;
        self.stats.relationships_created += 1;
        self.stats.properties_set += prop_count;
        if let Some(alias) = &rp.alias {
            if row.contains_key(alias) {
                return Err(Error::Query(format!("Variable `{alias}` already declared")));
            }
            row.insert(alias.clone(), Binding::Rel(id));
        }
        Ok(())
    }

    fn apply_set(&mut self, row: &Row, item: &SetItem) -> Result<()> {
        match item {
            SetItem::Property { variable, key, value } => {
                let value = self.eval(row, value)?;
                match lookup(row, variable)? {
                    Binding::Node(id) => self.graph_mut()?.set_node_property(id, key, value)?,
                    Binding::Rel(id) => self.graph_mut()?.set_relationship_property(id, key, value)?,
                    Binding::Value(Value::Null) => return Ok(()),
                    Binding::Value(other) => return Err(entity_error(variable, &other)),
                }
                self.stats.properties_set += 1;
            }
            SetItem::AllProperties { variable, value } | SetItem::MergeProperties { variable, value } => {
                let replace = matches!(item, SetItem::AllProperties { .. });
                let props = match self.eval(row, value)? {
                    Value::Map(map) => map,
                    Value::Null if replace => PropertyMap::new(),
                    other => {
                        return Err(Error::TypeError { expected: "Map".into(), got: other.type_name().into() })
                    }
                };
                let written = match lookup(row, variable)? {
                    Binding::Node(id) => self.graph_mut()?.set_node_properties(id, props, replace)?,
                    Binding::Rel(id) => self.graph_mut()?.set_relationship_properties(id, props, replace)?,
                    Binding::Value(Value::Null) => 0,
                    Binding::Value(other) => return Err(entity_error(variable, &other)),
                };
                self.stats.properties_set += written as u64;
            }
            SetItem::Label { variable, label } => match lookup(row, variable)? {
                Binding::Node(id) => {
                    if self.graph_mut()?.add_label(id, label)? {
                        self.stats.labels_added += 1;
                    }
                }
                Binding::Value(Value::Null) => {}
                Binding::Rel(_) => return Err(Error::Query(format!("`{variable}` is not a node"))),
                Binding::Value(other) => return Err(entity_error(variable, &other)),
            },
        }
        Ok(())
    }

    fn apply_remove(&mut self, row: &Row, item: &RemoveItem) -> Result<()> {
        match item {
            RemoveItem::Property { variable, key } => {
                let removed = match lookup(row, variable)? {
                    Binding::Node(id) => self.graph_mut()?.remove_node_property(id, key)?,
                    Binding::Rel(id) => self.graph_mut()?.remove_relationship_property(id, key)?,
                    Binding::Value(Value::Null) => false,
                    Binding::Value(other) => return Err(entity_error(variable, &other)),
                };
                if removed {
                    self.stats.properties_set += 1;
                }
            }
            RemoveItem::Label { variable, label } => match lookup(row, variable)? {
                Binding::Node(id) => {
                    if self.graph_mut()?.remove_label(id, label)? {
                        self.stats.labels_removed += 1;
                    }
                }
                Binding::Value(Value::Null) => {}
                Binding::Rel(_) => return Err(Error::Query(format!("`{variable}` is not a node"))),
                Binding::Value(other) => return Err(entity_error(variable, &other)),
            },
        }
        Ok(())
    }

    fn eval_props(&self, row: &Row, exprs: &BTreeMap<String, Expr>) -> Result<PropertyMap> {
        let mut props = PropertyMap::new();
        for (key, expr) in exprs {
            let value = self.eval(row, expr)?;
            if !value.is_null() {
                props.insert(key.clone(), value);
            }
        }
        Ok(props)
    }
}

fn lookup(row: &Row, variable: &str) -> Result<Binding> {
    row.get(variable)
        .cloned()
        .ok_or_else(|| Error::Query(format!("Variable `{variable}` not defined")))
}

fn entity_error(variable: &str, value: &Value) -> Error {
    Error::TypeError {
        expected: format!("Node or Relationship for `{variable}`"),
        got: value.type_name().into(),
    }
}

// ============================================================================
// CALL
// ============================================================================

impl Interpreter<'_> {
    fn call_procedure(&self, rows: &[Row], call: &ProcedureCall) -> Result<(Vec<String>, Vec<Row>)> {
        if !call.args.is_empty() {
            return Err(Error::Query(format!("Procedure {}() takes no arguments", call.name)));
        }
        let (columns, records) = self.procedure(&call.name)?;

        let bound: Vec<(usize, String)> = match &call.yields {
            None => columns.iter().enumerate().map(|(i, c)| (i, c.to_string())).collect(),
            Some(items) => items
                .iter()
                .map(|item| {
                    let idx = columns.iter().position(|c| *c == item.column).ok_or_else(|| {
                        Error::Query(format!("Unknown procedure output: `{}`", item.column))
                    })?;
                    Ok((idx, item.alias.clone().unwrap_or_else(|| item.column.clone())))
                })
                .collect::<Result<_>>()?,
        };

        let mut out = Vec::with_capacity(rows.len() * records.len());
        for row in rows {
            for record in &records {
                let mut r = row.clone();
                for (idx, name) in &bound {
                    r.insert(name.clone(), Binding::Value(record[*idx].clone()));
                }
                out.push(r);
            }
        }
        Ok((bound.into_iter().map(|(_, name)| name).collect(), out))
    }

    fn procedure(&self, name: &str) -> Result<(Vec<&'static str>, Vec<Vec<Value>>)> {
        let strings = |set: BTreeSet<String>| -> Vec<Vec<Value>> {
            set.into_iter().map(|s| vec![Value::String(s)]).collect()
        };
        let graph = self.graph();
        let out = match name.to_ascii_lowercase().as_str() {
            "db.labels" => (vec!["label"], strings(graph.labels_in_use())),
            "db.relationshiptypes" => (vec!["relationshipType"], strings(graph.types_in_use())),
            "db.propertykeys" => (vec!["propertyKey"], strings(graph.property_keys().clone())),
            "db.info" => (
                vec!["id", "name"],
                vec![vec![
                    Value::String(self.server.db_id.clone()),
                    Value::String(self.server.db_name.clone()),
                ]],
            ),
            "dbms.components" => (
                vec!["name", "versions", "edition"],
                vec![vec![
                    Value::String("Neo4j Kernel".into()),
                    Value::List(vec![Value::String(self.server.version.clone())]),
                    Value::String(self.server.edition.clone()),
                ]],
            ),
            _ => return Err(Error::Query(format!("There is no procedure with the name `{name}` registered"))),
        };
        Ok(out)
    }
}

// ============================================================================
// RETURN
// ============================================================================

impl Interpreter<'_> {
    fn project(&self, rows: Vec<Row>, ret: &ReturnClause) -> Result<QueryResult> {
        let columns: Vec<String> = ret
            .items
            .iter()
            .enumerate()
            .map(|(i, item)| item.alias.clone().unwrap_or_else(|| column_name(&item.expr, i)))
            .collect();

        // (scope for ORDER BY, projected values)
        let mut projected: Vec<(Row, Vec<Value>)> = Vec::new();

        if ret.items.iter().any(|item| item.expr.is_aggregate()) {
            let mut groups: Vec<(Vec<Value>, Vec<Row>)> = Vec::new();
            for row in rows {
                let mut key = Vec::new();
                for item in ret.items.iter().filter(|i| !i.expr.is_aggregate()) {
                    key.push(self.eval(&row, &item.expr)?);
                }
                match groups.iter_mut().find(|(k, _)| *k == key) {
                    Some((_, members)) => members.push(row),
                    None => groups.push((key, vec![row])),
                }
            }
            if groups.is_empty() && ret.items.iter().all(|i| i.expr.is_aggregate()) {
                groups.push((Vec::new(), Vec::new()));
            }
            for (key, members) in groups {
                let mut key = key.into_iter();
                let mut values = Vec::with_capacity(ret.items.len());
                for item in &ret.items {
                    if item.expr.is_aggregate() {
                        values.push(self.aggregate(&members, &item.expr)?);
                    } else {
                        values.push(key.next().unwrap_or(Value::Null));
                    }
                }
                let scope = columns
                    .iter()
                    .cloned()
                    .zip(values.iter().cloned().map(Binding::Value))
                    .collect();
                projected.push((scope, values));
            }
        } else {
            for row in rows {
                let mut values = Vec::with_capacity(ret.items.len());
                for item in &ret.items {
                    values.push(self.eval(&row, &item.expr)?);
                }
                let mut scope = row;
                for (name, value) in columns.iter().zip(&values) {
                    scope.insert(name.clone(), Binding::Value(value.clone()));
                }
                projected.push((scope, values));
            }
        }

        let mut ordered: Vec<Vec<Value>> = if ret.order_by.is_empty() {
            projected.into_iter().map(|(_, values)| values).collect()
        } else {
            let mut keyed = Vec::with_capacity(projected.len());
            for (scope, values) in projected {
                let mut keys = Vec::with_capacity(ret.order_by.len());
                for order in &ret.order_by {
                    keys.push(self.eval(&scope, &order.expr)?);
                }
                keyed.push((keys, values));
            }
            keyed.sort_by(|(a, _), (b, _)| {
                for ((x, y), order) in a.iter().zip(b).zip(&ret.order_by) {
                    let ord = order_cmp(x, y);
                    let ord = if order.ascending { ord } else { ord.reverse() };
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                Ordering::Equal
            });
            keyed.into_iter().map(|(_, values)| values).collect()
        };

        if ret.distinct {
            let mut seen: Vec<Vec<Value>> = Vec::new();
            ordered.retain(|values| {
                if seen.contains(values) {
                    false
                } else {
                    seen.push(values.clone());
                    true
                }
            });
        }

        let skip = self.eval_count(ret.skip.as_ref(), "SKIP")?.unwrap_or(0);
        let limit = self.eval_count(ret.limit.as_ref(), "LIMIT")?.unwrap_or(usize::MAX);

        let rows = ordered
            .into_iter()
            .skip(skip)
            .take(limit)
            .map(|values| ResultRow {
                values: columns.iter().cloned().zip(values).collect::<HashMap<_, _>>(),
            })
            .collect();

        Ok(QueryResult { columns, rows, stats: ExecutionStats::default() })
    }

    fn eval_count(&self, expr: Option<&Expr>, clause: &str) -> Result<Option<usize>> {
        let Some(expr) = expr else { return Ok(None) };
        match self.eval(&Row::new(), expr)? {
            Value::Int(n) if n >= 0 => Ok(Some(n as usize)),
            other => Err(Error::Query(format!(
                "{clause} expects a non-negative integer, got {other}"
            ))),
        }
    }

    fn aggregate(&self, members: &[Row], expr: &Expr) -> Result<Value> {
        let Expr::FunctionCall { name, args, distinct } = expr else {
            return Err(Error::Query("expected an aggregate function".into()));
        };
        let [arg] = args.as_slice() else {
            return Err(Error::Query(format!("{name}() takes exactly one argument")));
        };
        if matches!(arg, Expr::Star) {
            return Ok(Value::Int(members.len() as i64));
        }
        let mut values = Vec::with_capacity(members.len());
        for row in members {
            let v = self.eval(row, arg)?;
            if !v.is_null() && !(*distinct && values.contains(&v)) {
                values.push(v);
            }
        }
        if name.eq_ignore_ascii_case("count") {
            Ok(Value::Int(values.len() as i64))
        } else {
            Ok(Value::List(values))
        }
    }
}

/// Default column name for an unaliased projection item.
fn column_name(expr: &Expr, index: usize) -> String {
    render(expr).unwrap_or_else(|| format!("expr{index}"))
}

fn render(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Variable(v) => Some(v.clone()),
        Expr::Parameter(p) => Some(format!("${p}")),
        Expr::Star => Some("*".into()),
        Expr::Literal(Literal::Int(i)) => Some(i.to_string()),
        Expr::Literal(Literal::String(s)) => Some(format!("'{s}'")),
        Expr::Property { expr, key } => Some(format!("{}.{key}", render(expr)?)),
        Expr::FunctionCall { name, args, distinct } => {
            let args = args.iter().map(render).collect::<Option<Vec<_>>>()?.join(", ");
            let distinct = if *distinct { "DISTINCT " } else { "" };
            Some(format!("{name}({distinct}{args})"))
        }
        _ => None,
    }
}

/// ORDER BY comparison: nulls sort last, incomparable types by type name.
fn order_cmp(a: &Value, b: &Value) -> Ordering {
    match (a.is_null(), b.is_null()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => a
            .neo4j_cmp(b)
            .unwrap_or_else(|| a.type_name().cmp(b.type_name())),
    }
}

// ============================================================================
// Expressions
// ============================================================================

impl Interpreter<'_> {
    fn eval(&self, row: &Row, expr: &Expr) -> Result<Value> {
        let binding = self.eval_binding(row, expr)?;
        Ok(self.binding_value(Some(binding)))
    }

    /// Entities become their property map when used as plain values.
    fn binding_value(&self, binding: Option<Binding>) -> Value {
        match binding {
            None => Value::Null,
            Some(Binding::Value(v)) => v,
            Some(Binding::Node(id)) => self
                .graph()
                .node(id)
                .map(|n| Value::Map(n.properties.clone()))
                .unwrap_or(Value::Null),
            Some(Binding::Rel(id)) => self
                .graph()
                .relationship(id)
                .map(|r| Value::Map(r.properties.clone()))
                .unwrap_or(Value::Null),
        }
    }

    fn eval_binding(&self, row: &Row, expr: &Expr) -> Result<Binding> {
        let value = match expr {
            Expr::Literal(lit) => match lit {
                Literal::Null => Value::Null,
                Literal::Bool(b) => Value::Bool(*b),
                Literal::Int(i) => Value::Int(*i),
                Literal::Float(f) => Value::Float(*f),
                Literal::String(s) => Value::String(s.clone()),
            },
            Expr::Variable(name) => return lookup(row, name),
            Expr::Parameter(name) => self
                .params
                .get(name)
                .cloned()
                .ok_or_else(|| Error::Query(format!("Expected parameter(s): {name}")))?,
            Expr::Property { expr, key } => match self.eval_binding(row, expr)? {
                Binding::Node(id) => self.graph().node(id).and_then(|n| n.get(key)).cloned().unwrap_or(Value::Null),
                Binding::Rel(id) => self
                    .graph()
                    .relationship(id)
                    .and_then(|r| r.get(key))
                    .cloned()
                    .unwrap_or(Value::Null),
                Binding::Value(Value::Map(map)) => map.get(key).cloned().unwrap_or(Value::Null),
                Binding::Value(Value::Null) => Value::Null,
                Binding::Value(other) => {
                    return Err(Error::TypeError {
                        expected: format!("Map, Node or Relationship for .{key}"),
                        got: other.type_name().into(),
                    })
                }
            },
            Expr::FunctionCall { name, args, .. } => self.call_function(row, name, args)?,
            Expr::BinaryOp { left, op, right } => {
                let l = self.eval(row, left)?;
                let r = self.eval(row, right)?;
                binary(*op, l, r)?
            }
            Expr::UnaryOp { op, expr } => match (op, self.eval(row, expr)?) {
                (_, Value::Null) => Value::Null,
                (UnaryOp::Not, Value::Bool(b)) => Value::Bool(!b),
                (UnaryOp::Negate, Value::Int(i)) => Value::Int(-i),
                (UnaryOp::Negate, Value::Float(f)) => Value::Float(-f),
                (_, other) => {
                    return Err(Error::TypeError { expected: "Boolean or Number".into(), got: other.type_name().into() })
                }
            },
            Expr::List(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(self.eval(row, item)?);
                }
                Value::List(out)
            }
            Expr::MapLiteral(entries) => {
                let mut out = BTreeMap::new();
                for (k, v) in entries {
                    out.insert(k.clone(), self.eval(row, v)?);
                }
                Value::Map(out)
            }
            Expr::In { expr, list } => {
                let needle = self.eval(row, expr)?;
                match self.eval(row, list)? {
                    Value::Null => Value::Null,
                    Value::List(items) => {
                        let mut unknown = false;
                        let mut found = false;
                        for item in &items {
                            match needle.neo4j_eq(item) {
                                Some(true) => {
                                    found = true;
                                    break;
                                }
                                None => unknown = true,
                                Some(false) => {}
                            }
                        }
                        if found {
                            Value::Bool(true)
                        } else if unknown {
                            Value::Null
                        } else {
                            Value::Bool(false)
                        }
                    }
                    other => {
                        return Err(Error::TypeError { expected: "List".into(), got: other.type_name().into() })
                    }
                }
            }
            Expr::IsNull { expr, negated } => Value::Bool(self.eval(row, expr)?.is_null() != *negated),
            Expr::Star => return Err(Error::Query("`*` is only valid inside count(*)".into())),
        };
        Ok(Binding::Value(value))
    }

    fn call_function(&self, row: &Row, name: &str, args: &[Expr]) -> Result<Value> {
        let lower = name.to_ascii_lowercase();
        match lower.as_str() {
            "id" | "labels" | "type" | "properties" => {
                let [arg] = args else {
                    return Err(Error::Query(format!("{name}() takes exactly one argument")));
                };
                let graph = self.graph();
                let value = match (lower.as_str(), self.eval_binding(row, arg)?) {
                    (_, Binding::Value(Value::Null)) => Value::Null,
                    ("id", Binding::Node(id)) => Value::Int(id.0),
                    ("id", Binding::Rel(id)) => Value::Int(id.0),
                    ("labels", Binding::Node(id)) => Value::List(
                        graph
                            .node(id)
                            .map(|n| n.labels.iter().cloned().map(Value::String).collect())
                            .unwrap_or_default(),
                    ),
                    ("type", Binding::Rel(id)) => graph
                        .relationship(id)
                        .map(|r| Value::String(r.rel_type.clone()))
                        .unwrap_or(Value::Null),
                    ("properties", Binding::Value(Value::Map(m))) => Value::Map(m),
                    ("properties", b @ (Binding::Node(_) | Binding::Rel(_))) => self.binding_value(Some(b)),
                    (_, other) => {
                        return Err(Error::TypeError {
                            expected: format!("valid argument to {name}()"),
                            got: match other {
                                Binding::Node(_) => "Node".into(),
                                Binding::Rel(_) => "Relationship".into(),
                                Binding::Value(v) => v.type_name().into(),
                            },
                        })
                    }
                };
                Ok(value)
            }
            "count" | "collect" => Err(Error::Query(format!(
                "Aggregation function {name}() is only allowed at the top of a RETURN item"
            ))),
            _ => {
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push(self.eval(row, arg)?);
                }
                functions::call_scalar(name, &values)?
                    .ok_or_else(|| Error::Query(format!("Unknown function '{name}'")))
            }
        }
    }
}

fn binary(op: BinaryOp, l: Value, r: Value) -> Result<Value> {
    use BinaryOp::*;
    let logic = |v: &Value| -> Result<Option<bool>> {
        match v {
            Value::Null => Ok(None),
            Value::Bool(b) => Ok(Some(*b)),
            other => Err(Error::TypeError { expected: "Boolean".into(), got: other.type_name().into() }),
        }
    };
    let tri = |b: Option<bool>| b.map(Value::Bool).unwrap_or(Value::Null);

    let value = match op {
        And => match (logic(&l)?, logic(&r)?) {
            (Some(false), _) | (_, Some(false)) => Value::Bool(false),
            (Some(true), Some(true)) => Value::Bool(true),
            _ => Value::Null,
        },
        Or => match (logic(&l)?, logic(&r)?) {
            (Some(true), _) | (_, Some(true)) => Value::Bool(true),
            (Some(false), Some(false)) => Value::Bool(false),
            _ => Value::Null,
        },
        Xor => tri(logic(&l)?.zip(logic(&r)?).map(|(a, b)| a != b)),
        Eq => tri(l.neo4j_eq(&r)),
        Neq => tri(l.neo4j_eq(&r).map(|b| !b)),
        Lt => tri(l.neo4j_cmp(&r).map(Ordering::is_lt)),
        Lte => tri(l.neo4j_cmp(&r).map(Ordering::is_le)),
        Gt => tri(l.neo4j_cmp(&r).map(Ordering::is_gt)),
        Gte => tri(l.neo4j_cmp(&r).map(Ordering::is_ge)),
        Add | Sub | Mul | Div | Mod => arithmetic(op, l, r)?,
    };
    Ok(value)
}

fn arithmetic(op: BinaryOp, l: Value, r: Value) -> Result<Value> {
    use BinaryOp::*;
    let overflow = || Error::Query("integer overflow".into());
    Ok(match (op, l, r) {
        (_, Value::Null, _) | (_, _, Value::Null) => Value::Null,
        (Add, Value::String(a), Value::String(b)) => Value::String(a + &b),
        (Add, Value::List(mut a), Value::List(b)) => {
            a.extend(b);
            Value::List(a)
        }
        (Add, Value::Int(a), Value::Int(b)) => Value::Int(a.checked_add(b).ok_or_else(overflow)?),
        (Sub, Value::Int(a), Value::Int(b)) => Value::Int(a.checked_sub(b).ok_or_else(overflow)?),
        (Mul, Value::Int(a), Value::Int(b)) => Value::Int(a.checked_mul(b).ok_or_else(overflow)?),
        (Div | Mod, Value::Int(_), Value::Int(0)) => return Err(Error::Query("/ by zero".into())),
        (Div, Value::Int(a), Value::Int(b)) => Value::Int(a / b),
        (Mod, Value::Int(a), Value::Int(b)) => Value::Int(a % b),
        (op, a, b) => match (a.as_float(), b.as_float()) {
            (Some(x), Some(y)) => Value::Float(match op {
                Add => x + y,
                Sub => x - y,
                Mul => x * y,
                Div => x / y,
                _ => x % y,
            }),
            _ => {
                return Err(Error::TypeError {
                    expected: "numeric operands".into(),
                    got: format!("{} and {}", a.type_name(), b.type_name()),
                })
            }
        },
    })
}

// ============================================================================
// Schema commands
// ============================================================================

impl Interpreter<'_> {
    fn run_schema(&mut self, cmd: &SchemaCommand) -> Result<QueryResult> {
        match cmd {
            SchemaCommand::ShowConstraints => {
                let columns: Vec<String> =
                    ["id", "name", "type", "entityType", "labelsOrTypes", "properties", "ownedIndex"]
                        .into_iter()
                        .map(String::from)
                        .collect();
                let rows = self
                    .graph()
                    .constraints()
                    .enumerate()
                    .map(|(i, c)| {
                        let values = [
                            Value::Int(i as i64 + 1),
                            Value::String(c.name.clone()),
                            Value::String("UNIQUENESS".into()),
                            Value::String("NODE".into()),
                            Value::List(vec![Value::String(c.label.clone())]),
                            Value::List(vec![Value::String(c.property.clone())]),
                            Value::String(c.name.clone()),
                        ];
                        ResultRow { values: columns.iter().cloned().zip(values).collect() }
                    })
                    .collect();
                Ok(QueryResult { columns, rows, stats: ExecutionStats::default() })
            }
            SchemaCommand::CreateUniqueConstraint { name, if_not_exists, label, property } => {
                if self.graph_mut()?.create_unique_constraint(name.clone(), label, property, *if_not_exists)? {
                    self.stats.constraints_added += 1;
                }
                Ok(QueryResult::default())
            }
            SchemaCommand::DropConstraint { name, if_exists } => {
                if self.graph_mut()?.drop_constraint(name, *if_exists)? {
                    self.stats.constraints_removed += 1;
                }
                Ok(QueryResult::default())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::execute;

    fn server() -> ServerInfo {
        ServerInfo {
            db_id: "db-1".into(),
            db_name: "neo4j".into(),
            version: "4.4.0".into(),
            edition: "community".into(),
        }
    }

    fn run_with(g: &mut Arc<GraphState>, q: &str, params: PropertyMap) -> Result<QueryResult> {
        execute(g, true, &server(), q, &params)
    }

    fn run(g: &mut Arc<GraphState>, q: &str) -> QueryResult {
        run_with(g, q, PropertyMap::new()).unwrap()
    }

    fn seeded() -> Arc<GraphState> {
        let mut g = Arc::new(GraphState::default());
        run(&mut g, "CREATE (a:Person {name: 'Ada'})-[:KNOWS {since: 1843}]->(b:Person:Admin {name: 'Bob'})");
        run(&mut g, "CREATE (:City {name: 'London'})");
        g
    }

    #[test]
    fn test_match_where_order_limit() {
        let mut g = seeded();
        let mut params = PropertyMap::new();
        params.insert("after".into(), Value::Int(0));
        params.insert("limit".into(), Value::Int(1));
        let r = run_with(
            &mut g,
            "MATCH (n) WHERE id(n) > $after RETURN id(n) AS id ORDER BY id(n) LIMIT $limit",
            params,
        )
        .unwrap();
        assert_eq!(r.rows.len(), 1);
        assert_eq!(r.rows[0].get::<i64>("id").unwrap(), 1);
    }

    #[test]
    fn test_missing_parameter_is_error() {
        let mut g = seeded();
        assert!(run_with(&mut g, "MATCH (n) WHERE id(n) > $after RETURN n", PropertyMap::new()).is_err());
    }

    #[test]
    fn test_relationship_match() {
        let mut g = seeded();
        let r = run(&mut g, "MATCH (s)-[r]->(e) RETURN id(r) AS id, type(r) AS t, labels(e) AS el, \
                             properties(r) AS props");
        assert_eq!(r.rows.len(), 1);
        let row = &r.rows[0];
        assert_eq!(row.get::<String>("t").unwrap(), "KNOWS");
        assert_eq!(row.get::<Vec<String>>("el").unwrap(), vec!["Admin", "Person"]);
        assert_eq!(row.get::<PropertyMap>("props").unwrap()["since"], Value::Int(1843));

        let r = run(&mut g, "MATCH (a)<-[:KNOWS]-(b {name: 'Ada'}) RETURN a.name AS name");
        assert_eq!(r.rows[0].get::<String>("name").unwrap(), "Bob");
        let r = run(&mut g, "MATCH (a)-[:OTHER]-(b) RETURN a");
        assert!(r.rows.is_empty());
    }

    #[test]
    fn test_relationship_property_access() {
        let mut g = seeded();
        let r = run(&mut g, "MATCH ()-[r]->() WHERE r.since < 1900 RETURN r.since AS since, r.missing AS missing");
        assert_eq!(r.rows.len(), 1);
        assert_eq!(r.rows[0].get::<i64>("since").unwrap(), 1843);
        assert_eq!(r.rows[0].get::<Option<i64>>("missing").unwrap(), None);
    }

    #[test]
    fn test_unwind_create_set_count() {
        let mut g = Arc::new(GraphState::default());
        let rows = Value::List(vec![
            Value::Map([("props".to_string(), Value::Map([("k".to_string(), Value::Int(1))].into()))].into()),
            Value::Map([("props".to_string(), Value::Map([("k".to_string(), Value::Int(2))].into()))].into()),
        ]);
        let r = run_with(
            &mut g,
            "UNWIND $rows AS row CREATE (n:A:B) SET n = row.props RETURN count(n) AS created",
            [("rows".to_string(), rows)].into(),
        )
        .unwrap();
        assert_eq!(r.single().unwrap().get::<i64>("created").unwrap(), 2);
        assert_eq!(r.stats.nodes_created, 2);
        assert_eq!(g.node_count(), 2);

        let r = run(&mut g, "MATCH (n:A) REMOVE n.k RETURN count(*) AS c");
        assert_eq!(r.single().unwrap().get::<i64>("c").unwrap(), 2);
        assert!(g.nodes().all(|n| n.properties.is_empty()));
        assert!(g.property_keys().contains("k"));
    }

    #[test]
    fn test_count_on_empty_input_is_zero() {
        let mut g = Arc::new(GraphState::default());
        let r = run(&mut g, "MATCH (n) RETURN count(n) AS c");
        assert_eq!(r.single().unwrap().get::<i64>("c").unwrap(), 0);
    }

    #[test]
    fn test_create_relationship_between_matched() {
        let mut g = seeded();
        let r = run(
            &mut g,
            "MATCH (a:Person {name: 'Bob'}), (c:City {name: 'London'}) \
             CREATE (a)-[r:LIVES_IN {since: date('2020-01-02')}]->(c) RETURN count(r) AS created",
        );
        assert_eq!(r.single().unwrap().get::<i64>("created").unwrap(), 1);
        assert_eq!(g.relationship_count(), 2);
        let r = run(&mut g, "MATCH (:Person)-[r:LIVES_IN]->(:City) RETURN r.since AS since");
        assert_eq!(r.single().unwrap().values["since"].to_string(), "date('2020-01-02')");
    }

    #[test]
    fn test_procedures() {
        let mut g = seeded();
        let r = run(&mut g, "CALL db.labels() YIELD label RETURN collect(label) AS labels");
        assert_eq!(
            r.single().unwrap().get::<Vec<String>>("labels").unwrap(),
            vec!["Admin", "City", "Person"]
        );
        let r = run(&mut g, "CALL db.propertyKeys()");
        assert_eq!(r.columns, vec!["propertyKey"]);
        assert_eq!(r.rows.len(), 2);
        let r = run(&mut g, "CALL dbms.components() YIELD versions, edition RETURN versions, edition");
        assert_eq!(r.single().unwrap().get::<Vec<String>>("versions").unwrap(), vec!["4.4.0"]);
        let r = run(&mut g, "CALL db.info() YIELD id AS dbid RETURN dbid");
        assert_eq!(r.single().unwrap().get::<String>("dbid").unwrap(), "db-1");
        assert!(run_with(&mut g, "CALL db.nope()", PropertyMap::new()).is_err());
    }

    #[test]
    fn test_constraints_round_trip() {
        let mut g = seeded();
        run(&mut g, "CREATE CONSTRAINT person_name FOR (p:Person) REQUIRE p.name IS UNIQUE");
        run(&mut g, "CREATE CONSTRAINT ON (c:City) ASSERT c.name IS UNIQUE");
        let r = run(&mut g, "SHOW CONSTRAINTS");
        assert_eq!(r.rows.len(), 2);
        let err = run_with(&mut g, "CREATE (:Person {name: 'Ada'})", PropertyMap::new()).unwrap_err();
        assert!(matches!(err, Error::ConstraintViolation(_)));
        run(&mut g, "DROP CONSTRAINT person_name");
        run(&mut g, "DROP CONSTRAINT person_name IF EXISTS");
        assert_eq!(run(&mut g, "SHOW CONSTRAINTS").rows.len(), 1);
    }

    #[test]
    fn test_null_semantics() {
        let mut g = Arc::new(GraphState::default());
        let r = run(&mut g, "RETURN null = null AS a, 1 IN [null, 2] AS b, NOT null AS c, null IS NULL AS d");
        let row = r.single().unwrap();
        assert_eq!(row.values["a"], Value::Null);
        assert_eq!(row.values["b"], Value::Null);
        assert_eq!(row.values["c"], Value::Null);
        assert_eq!(row.values["d"], Value::Bool(true));
    }
}
