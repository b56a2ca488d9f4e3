//! Cypher statements emitted by the exporter and importer.
//!
//! Labels, types and keys are always backtick-quoted, so no name taken from
//! a shard can break out of its position. Values travel as parameters; the
//! only non-parameter values are validated [`LiteralExpr`]s.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write;

use crate::codec::literal::LiteralExpr;

// ============================================================================
// Fixed statements
// ============================================================================

/// Connectivity probe.
pub const PING: &str = "RETURN 1 AS ok";

pub const DB_INFO: &str = "CALL db.info() YIELD id, name RETURN id, name";

pub const COMPONENTS: &str =
    "CALL dbms.components() YIELD name, versions, edition RETURN name, versions, edition";

pub const LABELS: &str = "CALL db.labels() YIELD label RETURN label";

pub const RELATIONSHIP_TYPES: &str =
    "CALL db.relationshipTypes() YIELD relationshipType RETURN relationshipType";

pub const PROPERTY_KEYS: &str = "CALL db.propertyKeys() YIELD propertyKey RETURN propertyKey";

pub const SHOW_CONSTRAINTS: &str = "SHOW CONSTRAINTS";

pub const COUNT_NODES: &str = "MATCH (n) RETURN count(n) AS count";

/// Keyset page over nodes. Parameters: `after`, `limit`.
pub const NODE_PAGE: &str = "MATCH (n) WHERE id(n) > $after \
     RETURN id(n) AS id, labels(n) AS labels, properties(n) AS props \
     ORDER BY id(n) LIMIT $limit";

/// Keyset page over relationships. Parameters: `after`, `limit`.
pub const RELATIONSHIP_PAGE: &str = "MATCH (s)-[r]->(e) WHERE id(r) > $after \
     RETURN id(r) AS id, id(s) AS start_id, labels(s) AS start_labels, \
     id(e) AS end_id, labels(e) AS end_labels, type(r) AS type, properties(r) AS props \
     ORDER BY id(r) LIMIT $limit";

// ============================================================================
// Quoting
// ============================================================================

/// Backtick-quote a name.
pub fn quote(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

/// `:`A`:`B`` for a label set, empty for no labels.
pub fn label_expr<'a>(labels: impl IntoIterator<Item = &'a String>) -> String {
    let mut out = String::new();
    for label in labels {
        out.push(':');
        out.push_str(&quote(label));
    }
    out
}

fn append_literals(out: &mut String, variable: &str, literals: &BTreeMap<String, LiteralExpr>) {
    for (key, literal) in literals {
        // Writing to a String cannot fail.
        let _ = write!(out, ", {variable}.{} = {literal}", quote(key));
    }
}

// ============================================================================
// Import: nodes
// ============================================================================

/// Batch node creation. `$rows` is a list of `{props}` maps whose `props`
/// already carry the temp key.
pub fn create_nodes(labels: &BTreeSet<String>) -> String {
    format!(
        "UNWIND $rows AS row CREATE (n{}) SET n = row.props RETURN count(n) AS created",
        label_expr(labels)
    )
}

/// Single node with spliced literals. Parameter: `props`.
pub fn create_node_with_literals(labels: &BTreeSet<String>, literals: &BTreeMap<String, LiteralExpr>) -> String {
    let mut out = format!("CREATE (n{}) SET n = $props", label_expr(labels));
    append_literals(&mut out, "n", literals);
    out.push_str(" RETURN count(n) AS created");
    out
}

// ============================================================================
// Import: relationships
// ============================================================================

fn endpoint_match(start_labels: &BTreeSet<String>, end_labels: &BTreeSet<String>, temp_key: &str, start: &str, end: &str) -> String {
    let key = quote(temp_key);
    format!(
        "MATCH (s{} {{{key}: {start}}}), (e{} {{{key}: {end}}})",
        label_expr(start_labels),
        label_expr(end_labels),
    )
}

/// Batch relationship creation. `$rows` is a list of
/// `{start, end, props}` maps, endpoints given as temp-key values.
pub fn create_relationships(
    start_labels: &BTreeSet<String>,
    end_labels: &BTreeSet<String>,
    rel_type: &str,
    temp_key: &str,
) -> String {
    format!(
        "UNWIND $rows AS row {} CREATE (s)-[r:{}]->(e) SET r = row.props RETURN count(r) AS created",
        endpoint_match(start_labels, end_labels, temp_key, "row.start", "row.end"),
        quote(rel_type),
    )
}

/// Single relationship with spliced literals. Parameters: `start`, `end`, `props`.
pub fn create_relationship_with_literals(
    start_labels: &BTreeSet<String>,
    end_labels: &BTreeSet<String>,
    rel_type: &str,
    temp_key: &str,
    literals: &BTreeMap<String, LiteralExpr>,
) -> String {
    let mut out = format!(
        "{} CREATE (s)-[r:{}]->(e) SET r = $props",
        endpoint_match(start_labels, end_labels, temp_key, "$start", "$end"),
        quote(rel_type),
    );
    append_literals(&mut out, "r", literals);
    out.push_str(" RETURN count(r) AS created");
    out
}

/// Remove the temp key from every node that carries it.
pub fn strip_temp_key(temp_key: &str) -> String {
    let key = quote(temp_key);
    format!("MATCH (n) WHERE n.{key} IS NOT NULL REMOVE n.{key} RETURN count(n) AS stripped")
}

// ============================================================================
// Schema DDL
// ============================================================================

/// Constraint syntax understood by the target server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintDialect {
    /// `ON (n:L) ASSERT n.p IS UNIQUE` (4.x)
    Assert,
    /// `FOR (n:L) REQUIRE n.p IS UNIQUE` (5.x and later)
    Require,
}

impl ConstraintDialect {
    /// Pick the dialect from a `dbms.components()` version string.
    /// Unparseable versions get the current syntax.
    pub fn for_version(version: &str) -> Self {
        let major = version
            .split('.')
            .next()
            .and_then(|m| m.trim().parse::<u32>().ok());
        match major {
            Some(m) if m < 5 => ConstraintDialect::Assert,
            _ => ConstraintDialect::Require,
        }
    }
}

pub fn create_unique_constraint(
    dialect: ConstraintDialect,
    name: &str,
    label: &str,
    property: &str,
    if_not_exists: bool,
) -> String {
    let guard = if if_not_exists { " IF NOT EXISTS" } else { "" };
    let (label, property) = (quote(label), quote(property));
    match dialect {
        ConstraintDialect::Assert => format!(
            "CREATE CONSTRAINT {}{guard} ON (n:{label}) ASSERT n.{property} IS UNIQUE",
            quote(name)
        ),
        ConstraintDialect::Require => format!(
            "CREATE CONSTRAINT {}{guard} FOR (n:{label}) REQUIRE n.{property} IS UNIQUE",
            quote(name)
        ),
    }
}

pub fn drop_constraint(name: &str) -> String {
    format!("DROP CONSTRAINT {} IF EXISTS", quote(name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cypher::parse;

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_quote_escapes_backticks() {
        assert_eq!(quote("plain"), "`plain`");
        assert_eq!(quote("we`ird"), "`we``ird`");
        assert_eq!(label_expr(&set(&["A", "B C"])), ":`A`:`B C`");
    }

    #[test]
    fn test_generated_statements_parse() {
        let labels = set(&["Person", "Odd`Label"]);
        let mut literals = BTreeMap::new();
        literals.insert("born".to_string(), LiteralExpr::parse("date('1815-12-10')").unwrap());

        let statements = [
            create_nodes(&labels),
            create_nodes(&BTreeSet::new()),
            create_node_with_literals(&labels, &literals),
            create_relationships(&labels, &set(&["City"]), "LIVES IN", "tmpkey"),
            create_relationship_with_literals(&labels, &BTreeSet::new(), "R", "tmpkey", &literals),
            strip_temp_key("tmpkey"),
            create_unique_constraint(ConstraintDialect::Assert, "Person_tmpkey", "Person", "tmpkey", true),
            create_unique_constraint(ConstraintDialect::Require, "c", "Person", "name", false),
            drop_constraint("Person_tmpkey"),
            NODE_PAGE.to_string(),
            RELATIONSHIP_PAGE.to_string(),
            DB_INFO.to_string(),
            COMPONENTS.to_string(),
        ];
        for statement in &statements {
            assert!(parse(statement).is_ok(), "failed to parse: {statement}");
        }
    }

    #[test]
    fn test_literal_splice_shape() {
        let mut literals = BTreeMap::new();
        literals.insert("at".to_string(), LiteralExpr::parse("duration('P1D')").unwrap());
        assert_eq!(
            create_node_with_literals(&set(&["A"]), &literals),
            "CREATE (n:`A`) SET n = $props, n.`at` = duration('P0M1DT0S') RETURN count(n) AS created"
        );
    }

    #[test]
    fn test_dialect_for_version() {
        assert_eq!(ConstraintDialect::for_version("4.4.12"), ConstraintDialect::Assert);
        assert_eq!(ConstraintDialect::for_version("5.13.0"), ConstraintDialect::Require);
        assert_eq!(ConstraintDialect::for_version("2025.01.0"), ConstraintDialect::Require);
        assert_eq!(ConstraintDialect::for_version("dev"), ConstraintDialect::Require);
    }
}
