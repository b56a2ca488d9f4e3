//! The key-value store on nodes and relationships.

use std::collections::BTreeMap;

/// A map of property names to values.
///
/// Ordered so that exports, statements and hashes are deterministic.
pub type PropertyMap = BTreeMap<String, super::Value>;
