//! Relationships: the stored edge and the per-export scan record.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::{label_set, NodeId, PropertyMap, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RelId(pub i64);

impl fmt::Display for RelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A directed, typed edge between two stored nodes.
#[derive(Debug, Clone, PartialEq)]
pub struct Relationship {
    pub id: RelId,
    pub src: NodeId,
    pub dst: NodeId,
    pub rel_type: String,
    pub properties: PropertyMap,
}

impl Relationship {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.properties.get(key)
    }
}

/// A relationship as one export scan saw it. Endpoint labels travel with
/// it so the importer can look endpoints up by label and temp key.
#[derive(Debug, Clone, PartialEq)]
pub struct RelationshipRecord {
    pub id: i64,
    pub start_id: i64,
    pub start_labels: BTreeSet<String>,
    pub end_id: i64,
    pub end_labels: BTreeSet<String>,
    pub rel_type: String,
    pub properties: PropertyMap,
}

impl RelationshipRecord {
    pub fn new(id: i64, start_id: i64, end_id: i64, rel_type: impl Into<String>) -> Self {
        Self {
            id,
            start_id,
            end_id,
            rel_type: rel_type.into(),
            start_labels: BTreeSet::new(),
            end_labels: BTreeSet::new(),
            properties: PropertyMap::new(),
        }
    }

    pub fn with_endpoint_labels(
        self,
        start: impl IntoIterator<Item = impl Into<String>>,
        end: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self { start_labels: label_set(start), end_labels: label_set(end), ..self }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }
}
