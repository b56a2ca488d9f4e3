//! Nodes: the stored form and the per-export scan record.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::{label_set, PropertyMap, Value};

/// Identifier assigned by the executor that stores the node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub i64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub id: NodeId,
    pub labels: BTreeSet<String>,
    pub properties: PropertyMap,
}

impl Node {
    pub fn has_label(&self, label: &str) -> bool {
        self.labels.contains(label)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.properties.get(key)
    }
}

/// A node as one export scan saw it.
///
/// `source_id` is the source database's id and means nothing outside the
/// export/import session that carries it.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeRecord {
    pub source_id: i64,
    pub labels: BTreeSet<String>,
    pub properties: PropertyMap,
}

impl NodeRecord {
    pub fn new(source_id: i64) -> Self {
        Self { source_id, labels: BTreeSet::new(), properties: PropertyMap::new() }
    }

    pub fn with_labels(self, labels: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self { labels: label_set(labels), ..self }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }
}

impl From<Node> for NodeRecord {
    fn from(Node { id, labels, properties }: Node) -> Self {
        Self { source_id: id.0, labels, properties }
    }
}
