//! Set-difference of two node states against a shared base.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::Value;

use canopy_store::NodeState;
use canopy_types::ContentId;

use crate::conflict::Conflict;

/// The difference between a base node state and a derived one.
///
/// Computed on demand, never stored. Names absent from every bucket are
/// unchanged. For children the compared value is the child's content id; a
/// pending id (`None`) is never equal to anything — including another
/// pending id — since two unpersisted subtrees cannot be proven identical.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct NodeDelta {
    pub added_properties: BTreeMap<String, Value>,
    pub changed_properties: BTreeMap<String, Value>,
    pub removed_properties: BTreeSet<String>,
    pub added_children: BTreeMap<String, Option<ContentId>>,
    pub changed_children: BTreeMap<String, Option<ContentId>>,
    pub removed_children: BTreeSet<String>,
}

/// Child-id equality: pending ids never compare equal.
fn same_child(a: &Option<ContentId>, b: &Option<ContentId>) -> bool {
    matches!((a, b), (Some(x), Some(y)) if x == y)
}

impl NodeDelta {
    /// Compute the delta that turns `base` into `other`.
    pub fn between(base: &NodeState, other: &NodeState) -> Self {
        let mut delta = Self::default();

        for (name, value) in &other.properties {
            match base.properties.get(name) {
                None => {
                    delta.added_properties.insert(name.clone(), value.clone());
                }
                Some(base_value) if base_value != value => {
                    delta.changed_properties.insert(name.clone(), value.clone());
                }
                Some(_) => {}
            }
        }
        for name in base.properties.keys() {
            if !other.properties.contains_key(name) {
                delta.removed_properties.insert(name.clone());
            }
        }

        for (name, id) in &other.children {
            match base.children.get(name) {
                None => {
                    delta.added_children.insert(name.clone(), *id);
                }
                Some(base_id) if !same_child(base_id, id) => {
                    delta.changed_children.insert(name.clone(), *id);
                }
                Some(_) => {}
            }
        }
        for name in base.children.keys() {
            if !other.children.contains_key(name) {
                delta.removed_children.insert(name.clone());
            }
        }

        delta
    }

    /// Returns `true` if the two states were identical.
    pub fn is_empty(&self) -> bool {
        self.added_properties.is_empty()
            && self.changed_properties.is_empty()
            && self.removed_properties.is_empty()
            && self.added_children.is_empty()
            && self.changed_children.is_empty()
            && self.removed_children.is_empty()
    }

    /// All property names this delta touches.
    fn touched_properties(&self) -> impl Iterator<Item = (&String, Option<&Value>)> {
        self.added_properties
            .iter()
            .chain(&self.changed_properties)
            .map(|(name, value)| (name, Some(value)))
            .chain(self.removed_properties.iter().map(|name| (name, None)))
    }

    /// All child names this delta touches.
    fn touched_children(&self) -> impl Iterator<Item = (&String, Option<&Option<ContentId>>)> {
        self.added_children
            .iter()
            .chain(&self.changed_children)
            .map(|(name, id)| (name, Some(id)))
            .chain(self.removed_children.iter().map(|name| (name, None)))
    }

    /// Classify the conflicts between this delta ("theirs") and `ours`,
    /// both computed against the same base.
    ///
    /// A name both sides set to the same value is merged silently and not
    /// reported; a name only one side touches never conflicts. The result
    /// is deterministic for identical inputs.
    pub fn conflicts_with(&self, ours: &NodeDelta) -> Vec<Conflict> {
        let mut conflicts = Vec::new();

        for (name, their_value) in self.touched_properties() {
            let our_set = ours
                .added_properties
                .get(name)
                .or_else(|| ours.changed_properties.get(name));
            let our_removed = ours.removed_properties.contains(name);

            match (their_value, our_set, our_removed) {
                (Some(theirs), Some(ours_value), _) if ours_value != theirs => {
                    conflicts.push(Conflict::PropertyValue {
                        name: name.clone(),
                        ours: ours_value.clone(),
                        theirs: theirs.clone(),
                    });
                }
                (Some(_), None, true) | (None, Some(_), _) => {
                    conflicts.push(Conflict::RemovedProperty { name: name.clone() });
                }
                _ => {}
            }
        }

        for (name, their_id) in self.touched_children() {
            let our_set = ours
                .added_children
                .get(name)
                .or_else(|| ours.changed_children.get(name));
            let our_removed = ours.removed_children.contains(name);

            match (their_id, our_set, our_removed) {
                (Some(theirs), Some(ours_id), _) if !same_child(ours_id, theirs) => {
                    conflicts.push(Conflict::ChildContent {
                        name: name.clone(),
                        ours: *ours_id,
                        theirs: *theirs,
                    });
                }
                (Some(_), None, true) | (None, Some(_), _) => {
                    conflicts.push(Conflict::RemovedChild { name: name.clone() });
                }
                _ => {}
            }
        }

        conflicts
    }
}
