//! # Property Graph Model
//!
//! Plain DTOs shared by the executor, the codec and the export/import
//! pipelines. This module is pure data: no I/O, no state, no async.

pub mod node;
pub mod relationship;
pub mod value;
pub mod property_map;
pub mod temporal;
pub mod point;
pub mod constraint;

pub use node::{Node, NodeId, NodeRecord};
pub use relationship::{Relationship, RelId, RelationshipRecord};
pub use value::Value;
pub use property_map::PropertyMap;
pub use temporal::{IsoDuration, Temporal, TemporalKind};
pub use point::{Crs, Point};
pub use constraint::ConstraintRecord;

fn label_set(labels: impl IntoIterator<Item = impl Into<String>>) -> std::collections::BTreeSet<String> {
    labels.into_iter().map(Into::into).collect()
}
