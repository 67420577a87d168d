use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use canopy_types::ContentId;

use crate::error::{StoreError, StoreResult};

/// Hash domain for node objects.
const NODE_DOMAIN: &str = "canopy/node/v1";

/// An immutable, already-stored node: named properties and named children
/// referenced by content id.
///
/// A `PersistedNode` is never mutated in place. Editing goes through a
/// staged working copy; persisting the copy produces a new object under a
/// new id.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedNode {
    /// Property values, keyed by name.
    pub properties: BTreeMap<String, Value>,
    /// Child node ids, keyed by name.
    pub children: BTreeMap<String, ContentId>,
}

impl PersistedNode {
    /// A node with no properties and no children.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Look up a child id by name.
    pub fn child(&self, name: &str) -> Option<&ContentId> {
        self.children.get(name)
    }

    /// Returns `true` if a child with this name exists.
    pub fn has_child(&self, name: &str) -> bool {
        self.children.contains_key(name)
    }

    /// The comparable snapshot of this node.
    pub fn to_state(&self) -> NodeState {
        NodeState {
            properties: self.properties.clone(),
            children: self
                .children
                .iter()
                .map(|(name, id)| (name.clone(), Some(*id)))
                .collect(),
        }
    }

    /// Canonical byte form hashed for content addressing.
    ///
    /// JSON over `BTreeMap`s: key order is fixed, so identical content
    /// always encodes to identical bytes.
    pub fn canonical_bytes(&self) -> StoreResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    /// The content-addressed id this node persists under.
    pub fn content_id(&self) -> StoreResult<ContentId> {
        Ok(ContentId::derive(NODE_DOMAIN, &self.canonical_bytes()?))
    }
}

/// Comparable snapshot of a node, persisted or staged.
///
/// Child entries carry `Option<ContentId>`: `None` marks a child created in
/// the current batch and not yet persisted. A pending id is only ever
/// compared for equality, never dereferenced.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NodeState {
    pub properties: BTreeMap<String, Value>,
    pub children: BTreeMap<String, Option<ContentId>>,
}
