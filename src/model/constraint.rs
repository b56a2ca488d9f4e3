//! Uniqueness constraint description carried in the export manifest.

use serde::{Deserialize, Serialize};

/// One node uniqueness constraint: at most one `label` node per `property` value.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ConstraintRecord {
    #[serde(rename = "node_label")]
    pub label: String,
    #[serde(rename = "node_prop")]
    pub property: String,
    pub constraint_name: String,
}

impl ConstraintRecord {
    pub fn new(
        label: impl Into<String>,
        property: impl Into<String>,
        constraint_name: impl Into<String>,
    ) -> Self {
        Self {
            label: label.into(),
            property: property.into(),
            constraint_name: constraint_name.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manifest_field_names() {
        let c = ConstraintRecord::new("Person", "email", "person_email");
        let json = serde_json::to_value(&c).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "node_label": "Person",
                "node_prop": "email",
                "constraint_name": "person_email"
            })
        );
        let back: ConstraintRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back, c);
    }
}
