//! Graph state owned by one snapshot of the in-memory executor.
//!
//! All mutation goes through methods that keep the token registry and
//! uniqueness constraints consistent. Cloning a `GraphState` is how a write
//! transaction gets its private copy.

use std::collections::{BTreeMap, BTreeSet};

use crate::model::*;
use crate::{Error, Result};

/// A node uniqueness constraint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniqueConstraint {
    pub name: String,
    pub label: String,
    pub property: String,
}

/// Nodes, relationships, schema and tokens of one database.
#[derive(Debug, Clone, Default)]
pub struct GraphState {
    nodes: BTreeMap<NodeId, Node>,
    relationships: BTreeMap<RelId, Relationship>,
    constraints: BTreeMap<String, UniqueConstraint>,
    /// Tokens are never removed, like the server's token store.
    property_keys: BTreeSet<String>,
    label_tokens: BTreeSet<String>,
    type_tokens: BTreeSet<String>,
    next_node_id: i64,
    next_rel_id: i64,
}

// ============================================================================
// Reads
// ============================================================================

impl GraphState {
    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn relationship(&self, id: RelId) -> Option<&Relationship> {
        self.relationships.get(&id)
    }

    pub fn relationships(&self) -> impl Iterator<Item = &Relationship> {
        self.relationships.values()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn relationship_count(&self) -> usize {
        self.relationships.len()
    }

    /// Labels carried by at least one node.
    pub fn labels_in_use(&self) -> BTreeSet<String> {
        self.nodes.values().flat_map(|n| n.labels.iter().cloned()).collect()
    }

    /// Relationship types carried by at least one relationship.
    pub fn types_in_use(&self) -> BTreeSet<String> {
        self.relationships.values().map(|r| r.rel_type.clone()).collect()
    }

    /// Every property key ever written.
    pub fn property_keys(&self) -> &BTreeSet<String> {
        &self.property_keys
    }

    pub fn constraints(&self) -> impl Iterator<Item = &UniqueConstraint> {
        self.constraints.values()
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut Node> {
        self.nodes.get_mut(&id).ok_or_else(|| Error::NotFound(format!("Node {id}")))
    }

    fn relationship_mut(&mut self, id: RelId) -> Result<&mut Relationship> {
        self.relationships.get_mut(&id).ok_or_else(|| Error::NotFound(format!("Relationship {id}")))
    }
}

// ============================================================================
// Writes
// ============================================================================

impl GraphState {
    pub fn create_node(&mut self, labels: BTreeSet<String>, props: PropertyMap) -> Result<NodeId> {
        let props = storable(props)?;
        let id = NodeId(self.next_node_id);
        self.next_node_id += 1;
        self.label_tokens.extend(labels.iter().cloned());
        self.property_keys.extend(props.keys().cloned());
        self.nodes.insert(id, Node { id, labels, properties: props });
        self.check_unique(id)?;
        Ok(id)
    }

    pub fn create_relationship(
        &mut self,
        src: NodeId,
        dst: NodeId,
        rel_type: &str,
        props: PropertyMap,
    ) -> Result<RelId> {
        if !self.nodes.contains_key(&src) || !self.nodes.contains_key(&dst) {
            return Err(Error::NotFound(format!("endpoint of relationship {src}->{dst}")));
        }
        let props = storable(props)?;
        let id = RelId(self.next_rel_id);
        self.next_rel_id += 1;
        self.type_tokens.insert(rel_type.to_owned());
        self.property_keys.extend(props.keys().cloned());
        let rel = Relationship { id, src, dst, rel_type: rel_type.to_owned(), properties: props };
        self.relationships.insert(id, rel);
        Ok(id)
    }

    /// Replace (`replace = true`) or merge a node's property map. Returns
    /// the number of properties written.
    pub fn set_node_properties(&mut self, id: NodeId, props: PropertyMap, replace: bool) -> Result<usize> {
        let (set, removed) = split_nulls(props);
        let set = storable(set)?;
        let count = set.len();
        self.property_keys.extend(set.keys().cloned());
        let node = self.node_mut(id)?;
        if replace {
            node.properties.clear();
        }
        for key in removed {
            node.properties.remove(&key);
        }
        node.properties.extend(set);
        self.check_unique(id)?;
        Ok(count)
    }

    /// Set one node property; `Null` removes it.
    pub fn set_node_property(&mut self, id: NodeId, key: &str, value: Value) -> Result<()> {
        if value.is_null() {
            self.node_mut(id)?.properties.remove(key);
            return Ok(());
        }
        check_storable(key, &value)?;
        self.property_keys.insert(key.to_owned());
        self.node_mut(id)?.properties.insert(key.to_owned(), value);
        self.check_unique(id)
    }

    pub fn remove_node_property(&mut self, id: NodeId, key: &str) -> Result<bool> {
        Ok(self.node_mut(id)?.properties.remove(key).is_some())
    }

    pub fn add_label(&mut self, id: NodeId, label: &str) -> Result<bool> {
        self.label_tokens.insert(label.to_owned());
        let added = self.node_mut(id)?.labels.insert(label.to_owned());
        if added {
            self.check_unique(id)?;
        }
        Ok(added)
    }

    pub fn remove_label(&mut self, id: NodeId, label: &str) -> Result<bool> {
        Ok(self.node_mut(id)?.labels.remove(label))
    }

    pub fn set_relationship_properties(&mut self, id: RelId, props: PropertyMap, replace: bool) -> Result<usize> {
        let (set, removed) = split_nulls(props);
        let set = storable(set)?;
        let count = set.len();
        self.property_keys.extend(set.keys().cloned());
        let rel = self.relationship_mut(id)?;
        if replace {
            rel.properties.clear();
        }
        for key in removed {
            rel.properties.remove(&key);
        }
        rel.properties.extend(set);
        Ok(count)
    }

    pub fn set_relationship_property(&mut self, id: RelId, key: &str, value: Value) -> Result<()> {
        if value.is_null() {
            self.relationship_mut(id)?.properties.remove(key);
            return Ok(());
        }
        check_storable(key, &value)?;
        self.property_keys.insert(key.to_owned());
        self.relationship_mut(id)?.properties.insert(key.to_owned(), value);
        Ok(())
    }

    pub fn remove_relationship_property(&mut self, id: RelId, key: &str) -> Result<bool> {
        Ok(self.relationship_mut(id)?.properties.remove(key).is_some())
    }
}

// ============================================================================
// Constraints
// ============================================================================

impl GraphState {
    /// Create a uniqueness constraint. Returns `false` when an identical
    /// constraint already exists and `if_not_exists` is set.
    pub fn create_unique_constraint(
        &mut self,
        name: Option<String>,
        label: &str,
        property: &str,
        if_not_exists: bool,
    ) -> Result<bool> {
        let name = name.unwrap_or_else(|| format!("constraint_{label}_{property}"));
        let equivalent = self
            .constraints
            .values()
            .find(|c| c.label == label && c.property == property)
            .map(|c| c.name.clone());

        if self.constraints.contains_key(&name) || equivalent.is_some() {
            if if_not_exists {
                return Ok(false);
            }
            let existing = equivalent.unwrap_or_else(|| name.clone());
            return Err(Error::Query(format!(
                "An equivalent constraint already exists: '{existing}'"
            )));
        }

        let mut seen: Vec<&Value> = Vec::new();
        for node in self.nodes.values().filter(|n| n.has_label(label)) {
            if let Some(v) = node.get(property) {
                if seen.iter().any(|s| s.neo4j_eq(v) == Some(true)) {
                    return Err(Error::ConstraintViolation(format!(
                        "Unable to create constraint '{name}': duplicate :{label}({property}) value {v}"
                    )));
                }
                seen.push(v);
            }
        }

        self.label_tokens.insert(label.to_owned());
        self.property_keys.insert(property.to_owned());
        self.constraints.insert(
            name.clone(),
            UniqueConstraint { name, label: label.to_owned(), property: property.to_owned() },
        );
        Ok(true)
    }

    pub fn drop_constraint(&mut self, name: &str, if_exists: bool) -> Result<bool> {
        match self.constraints.remove(name) {
            Some(_) => Ok(true),
            None if if_exists => Ok(false),
            None => Err(Error::Query(format!("No such constraint: '{name}'"))),
        }
    }

    /// Check every constraint that applies to node `id`.
    fn check_unique(&self, id: NodeId) -> Result<()> {
        let Some(node) = self.nodes.get(&id) else { return Ok(()) };
        for c in self.constraints.values().filter(|c| node.has_label(&c.label)) {
            let Some(value) = node.get(&c.property) else { continue };
            let clash = self.nodes.values().any(|other| {
                other.id != id
                    && other.has_label(&c.label)
                    && other.get(&c.property).is_some_and(|v| v.neo4j_eq(value) == Some(true))
            });
            if clash {
                return Err(Error::ConstraintViolation(format!(
                    "Node({id}) already exists with label `{}` and property `{}` = {value}",
                    c.label, c.property
                )));
            }
        }
        Ok(())
    }
}

fn split_nulls(props: PropertyMap) -> (PropertyMap, Vec<String>) {
    let mut removed = Vec::new();
    let mut set = PropertyMap::new();
    for (k, v) in props {
        if v.is_null() {
            removed.push(k);
        } else {
            set.insert(k, v);
        }
    }
    (set, removed)
}

fn storable(props: PropertyMap) -> Result<PropertyMap> {
    for (k, v) in &props {
        check_storable(k, v)?;
    }
    Ok(props.into_iter().filter(|(_, v)| !v.is_null()).collect())
}

fn check_storable(key: &str, value: &Value) -> Result<()> {
    let ok = match value {
        Value::Map(_) => false,
        Value::List(items) => items.iter().all(|v| !matches!(v, Value::Map(_) | Value::List(_) | Value::Null)),
        _ => true,
    };
    if ok {
        Ok(())
    } else {
        Err(Error::TypeError {
            expected: format!("storable property value for '{key}'"),
            got: value.type_name().into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(ls: &[&str]) -> BTreeSet<String> {
        ls.iter().map(|s| s.to_string()).collect()
    }

    fn props(pairs: &[(&str, Value)]) -> PropertyMap {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn test_ids_start_at_zero_and_tokens_persist() {
        let mut g = GraphState::default();
        let a = g.create_node(labels(&["A"]), props(&[("tmp", Value::Int(1))])).unwrap();
        assert_eq!(a, NodeId(0));
        g.remove_node_property(a, "tmp").unwrap();
        assert!(g.property_keys().contains("tmp"));
        assert!(g.node(a).unwrap().properties.is_empty());
    }

    #[test]
    fn test_uniqueness_enforced_on_set() {
        let mut g = GraphState::default();
        g.create_unique_constraint(Some("u".into()), "A", "k", false).unwrap();
        let a = g.create_node(labels(&["A"]), props(&[("k", Value::Int(1))])).unwrap();
        let b = g.create_node(labels(&["A"]), PropertyMap::new()).unwrap();
        assert!(matches!(
            g.set_node_property(b, "k", Value::Int(1)),
            Err(Error::ConstraintViolation(_))
        ));
        // Int and Float compare equal
        assert!(g.set_node_property(b, "k", Value::Float(1.0)).is_err());
        g.set_node_property(b, "k", Value::Int(2)).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_constraint_creation_validates_data() {
        let mut g = GraphState::default();
        g.create_node(labels(&["A"]), props(&[("k", Value::Int(1))])).unwrap();
        g.create_node(labels(&["A"]), props(&[("k", Value::Int(1))])).unwrap();
        assert!(matches!(
            g.create_unique_constraint(None, "A", "k", false),
            Err(Error::ConstraintViolation(_))
        ));
    }

    #[test]
    fn test_if_not_exists_and_drop() {
        let mut g = GraphState::default();
        assert!(g.create_unique_constraint(Some("u".into()), "A", "k", true).unwrap());
        assert!(!g.create_unique_constraint(Some("other".into()), "A", "k", true).unwrap());
        assert!(g.create_unique_constraint(Some("u".into()), "B", "k", false).is_err());
        assert!(g.drop_constraint("u", false).unwrap());
        assert!(!g.drop_constraint("u", true).unwrap());
        assert!(g.drop_constraint("u", false).is_err());
    }

    #[test]
    fn test_maps_are_not_storable() {
        let mut g = GraphState::default();
        let bad = props(&[("m", Value::Map(BTreeMap::new()))]);
        assert!(matches!(g.create_node(BTreeSet::new(), bad), Err(Error::TypeError { .. })));
    }
}
