//! Shard record shapes for nodes and relationships.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::model::{NodeRecord, RelationshipRecord};
use super::{decode_properties, encode_properties, CodecError, DecodedProperties, HashTable, JsonProperties};

/// One node as stored in a `nodes_<idx>` shard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncodedNode {
    pub node_id: i64,
    pub node_labels: Vec<String>,
    pub node_props: JsonProperties,
    #[serde(default)]
    pub hash_props: HashTable,
}

/// One relationship as stored in a `relationships_<idx>` shard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncodedRelationship {
    pub rel_id: i64,
    pub start_node_id: i64,
    #[serde(default)]
    pub start_node_labels: Vec<String>,
    pub end_node_id: i64,
    #[serde(default)]
    pub end_node_labels: Vec<String>,
    pub rel_type: String,
    pub rel_props: JsonProperties,
    #[serde(default)]
    pub hash_props: HashTable,
}

/// A node ready to be created in the target.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedNode {
    pub source_id: i64,
    pub labels: BTreeSet<String>,
    pub properties: DecodedProperties,
}

/// A relationship ready to be created in the target.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedRelationship {
    pub source_id: i64,
    pub start_id: i64,
    pub start_labels: BTreeSet<String>,
    pub end_id: i64,
    pub end_labels: BTreeSet<String>,
    pub rel_type: String,
    pub properties: DecodedProperties,
}

impl EncodedNode {
    pub fn encode(record: &NodeRecord) -> Result<Self, CodecError> {
        let (node_props, hash_props) = encode_properties(&record.properties)?;
        Ok(Self {
            node_id: record.source_id,
            node_labels: record.labels.iter().cloned().collect(),
            node_props,
            hash_props,
        })
    }

    pub fn decode(&self) -> Result<DecodedNode, CodecError> {
        Ok(DecodedNode {
            source_id: self.node_id,
            labels: self.node_labels.iter().cloned().collect(),
            properties: decode_properties(&self.node_props, &self.hash_props)?,
        })
    }
}

impl EncodedRelationship {
    pub fn encode(record: &RelationshipRecord) -> Result<Self, CodecError> {
        let (rel_props, hash_props) = encode_properties(&record.properties)?;
        Ok(Self {
            rel_id: record.id,
            start_node_id: record.start_id,
            start_node_labels: record.start_labels.iter().cloned().collect(),
            end_node_id: record.end_id,
            end_node_labels: record.end_labels.iter().cloned().collect(),
            rel_type: record.rel_type.clone(),
            rel_props,
            hash_props,
        })
    }

    pub fn decode(&self) -> Result<DecodedRelationship, CodecError> {
        Ok(DecodedRelationship {
            source_id: self.rel_id,
            start_id: self.start_node_id,
            start_labels: self.start_node_labels.iter().cloned().collect(),
            end_id: self.end_node_id,
            end_labels: self.end_node_labels.iter().cloned().collect(),
            rel_type: self.rel_type.clone(),
            properties: decode_properties(&self.rel_props, &self.hash_props)?,
        })
    }
}

impl From<DecodedNode> for NodeRecord {
    fn from(node: DecodedNode) -> Self {
        NodeRecord {
            source_id: node.source_id,
            labels: node.labels,
            properties: node.properties.into_property_map(),
        }
    }
}

impl From<DecodedRelationship> for RelationshipRecord {
    fn from(rel: DecodedRelationship) -> Self {
        RelationshipRecord {
            id: rel.source_id,
            start_id: rel.start_id,
            start_labels: rel.start_labels,
            end_id: rel.end_id,
            end_labels: rel.end_labels,
            rel_type: rel.rel_type,
            properties: rel.properties.into_property_map(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Crs, Point, Value};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_node_json_shape() {
        let node = NodeRecord::new(7)
            .with_labels(["Person"])
            .with_property("name", "Ada")
            .with_property("home", Point::new(Crs::Cartesian2D, 1.0, 2.0, None).unwrap());
        let encoded = EncodedNode::encode(&node).unwrap();
        assert_eq!(
            serde_json::to_value(&encoded).unwrap(),
            serde_json::json!({
                "node_id": 7,
                "node_labels": ["Person"],
                "node_props": {
                    "home": "$point({x: 1.0, y: 2.0, crs: 'cartesian'})",
                    "name": "Ada"
                },
                "hash_props": {}
            })
        );
        let decoded: NodeRecord = encoded.decode().unwrap().into();
        assert_eq!(decoded, node);
    }

    #[test]
    fn test_relationship_round_trip() {
        let rel = RelationshipRecord::new(3, 1, 2, "KNOWS")
            .with_endpoint_labels(["Person"], ["Person", "Admin"])
            .with_property("since", 1999)
            .with_property("note", "$time(joke)");
        let encoded = EncodedRelationship::encode(&rel).unwrap();
        assert!(encoded.hash_props.contains_key("note"));

        let text = serde_json::to_string(&encoded).unwrap();
        let back: EncodedRelationship = serde_json::from_str(&text).unwrap();
        let decoded = back.decode().unwrap();
        assert!(!decoded.properties.has_literals());
        assert_eq!(RelationshipRecord::from(decoded), rel);
    }

    #[test]
    fn test_relationship_json_shape() {
        let rel = RelationshipRecord::new(3, 1, 2, "KNOWS").with_endpoint_labels(["Person"], ["City"]);
        let encoded = EncodedRelationship::encode(&rel).unwrap();
        assert_eq!(
            serde_json::to_value(&encoded).unwrap(),
            serde_json::json!({
                "rel_id": 3,
                "start_node_id": 1,
                "start_node_labels": ["Person"],
                "end_node_id": 2,
                "end_node_labels": ["City"],
                "rel_type": "KNOWS",
                "rel_props": {},
                "hash_props": {}
            })
        );
    }

    #[test]
    fn test_missing_optional_fields_default() {
        let rel: EncodedRelationship = serde_json::from_str(
            r#"{"rel_id": 1, "start_node_id": 2, "end_node_id": 3, "rel_type": "R", "rel_props": {}}"#,
        )
        .unwrap();
        assert!(rel.start_node_labels.is_empty());
        assert!(rel.hash_props.is_empty());
        assert_eq!(rel.decode().unwrap().properties.values.get("x"), None::<&Value>);
    }
}
