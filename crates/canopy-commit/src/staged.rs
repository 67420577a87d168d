//! Staged nodes and the builder-private staging area.
//!
//! The staging area maps absolute paths to mutable working copies of nodes.
//! It is path-closed upward: once any edit touches a path, every ancestor
//! up to `/` is staged too, lazily materialized from its persisted form.
//! Subtree operations (purge, rekey, copy) are prefix filters over this
//! flat map, never recursion over an object graph.

use std::collections::BTreeMap;

use serde_json::Value;

use canopy_store::{NodeState, PersistedNode, RevisionStore};
use canopy_types::{path, ContentId};

use crate::error::{CommitError, CommitResult};

/// A mutable, in-memory node under construction.
///
/// Either freshly created in this batch or a working copy deep-copied from
/// a persisted node (the persisted node is never mutated). Child entries
/// carry `None` while the child is created in this batch and not yet
/// persisted.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StagedNode {
    /// Property values; freely mutable, last write wins.
    pub properties: BTreeMap<String, Value>,
    /// Child ids; `None` marks a child pending persistence.
    pub children: BTreeMap<String, Option<ContentId>>,
}

impl StagedNode {
    /// A fresh node with no backing persisted form.
    pub fn new() -> Self {
        Self::default()
    }

    /// A working copy seeded from a persisted node.
    pub fn from_persisted(node: &PersistedNode) -> Self {
        Self {
            properties: node.properties.clone(),
            children: node
                .children
                .iter()
                .map(|(name, id)| (name.clone(), Some(*id)))
                .collect(),
        }
    }

    /// Add a child entry. Fails if a child with that name already exists.
    pub fn add_child(&mut self, name: &str, id: Option<ContentId>) -> CommitResult<()> {
        if self.children.contains_key(name) {
            return Err(CommitError::AlreadyExists(name.to_string()));
        }
        self.children.insert(name.to_string(), id);
        Ok(())
    }

    /// Remove a child entry, returning its id. Fails if absent.
    pub fn remove_child(&mut self, name: &str) -> CommitResult<Option<ContentId>> {
        self.children
            .remove(name)
            .ok_or_else(|| CommitError::NotFound(name.to_string()))
    }

    /// Rename a child entry atomically. Validates both names before
    /// mutating, so a failure leaves the node untouched.
    pub fn rename_child(&mut self, old_name: &str, new_name: &str) -> CommitResult<()> {
        if !self.children.contains_key(old_name) {
            return Err(CommitError::NotFound(old_name.to_string()));
        }
        if self.children.contains_key(new_name) {
            return Err(CommitError::AlreadyExists(new_name.to_string()));
        }
        if let Some(id) = self.children.remove(old_name) {
            self.children.insert(new_name.to_string(), id);
        }
        Ok(())
    }

    /// The comparable snapshot of this node.
    pub fn to_state(&self) -> NodeState {
        NodeState {
            properties: self.properties.clone(),
            children: self.children.clone(),
        }
    }

    /// Convert into a persistable node. Every child id must have been
    /// resolved by bottom-up persistence first.
    pub fn freeze(&self, node_path: &str) -> CommitResult<PersistedNode> {
        let mut children = BTreeMap::new();
        for (name, id) in &self.children {
            match id {
                Some(id) => {
                    children.insert(name.clone(), *id);
                }
                None => {
                    return Err(CommitError::internal(format!(
                        "child {name:?} of {node_path} was never persisted"
                    )));
                }
            }
        }
        Ok(PersistedNode {
            properties: self.properties.clone(),
            children,
        })
    }
}

/// The builder-private staging map, keyed by absolute path.
#[derive(Debug, Default)]
pub(crate) struct StagingArea {
    nodes: BTreeMap<String, StagedNode>,
}

impl StagingArea {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn clear(&mut self) {
        self.nodes.clear();
    }

    pub(crate) fn get(&self, node_path: &str) -> Option<&StagedNode> {
        self.nodes.get(node_path)
    }

    pub(crate) fn get_mut(&mut self, node_path: &str) -> Option<&mut StagedNode> {
        self.nodes.get_mut(node_path)
    }

    pub(crate) fn insert(&mut self, node_path: String, node: StagedNode) {
        self.nodes.insert(node_path, node);
    }

    /// Resolve the staged node at `node_path`, materializing it and any
    /// missing ancestors from their persisted form. Each missing ancestor
    /// is located via the nearest already-staged ancestor's child entry.
    pub(crate) fn stage(
        &mut self,
        store: &dyn RevisionStore,
        root_id: &ContentId,
        node_path: &str,
    ) -> CommitResult<&mut StagedNode> {
        path::validate(node_path)?;

        if !self.nodes.contains_key(path::ROOT) {
            let root = store.node(root_id)?;
            self.nodes
                .insert(path::ROOT.to_string(), StagedNode::from_persisted(&root));
        }

        for prefix in path::prefixes(node_path) {
            if self.nodes.contains_key(prefix) {
                continue;
            }
            let parent_path = path::parent(prefix)
                .ok_or_else(|| CommitError::internal(format!("no parent for {prefix}")))?;
            let name = path::name(prefix);
            let child_id = {
                let parent = self
                    .nodes
                    .get(parent_path)
                    .ok_or_else(|| CommitError::NotFound(prefix.to_string()))?;
                match parent.children.get(name) {
                    Some(Some(id)) => *id,
                    Some(None) => {
                        return Err(CommitError::internal(format!(
                            "pending child {prefix} has no staged node"
                        )));
                    }
                    None => return Err(CommitError::NotFound(prefix.to_string())),
                }
            };
            let node = store.node(&child_id)?;
            self.nodes
                .insert(prefix.to_string(), StagedNode::from_persisted(&node));
        }

        self.nodes
            .get_mut(node_path)
            .ok_or_else(|| CommitError::NotFound(node_path.to_string()))
    }

    /// Drop the staged node at `node_path` and every staged descendant;
    /// a removed subtree no longer needs saving.
    pub(crate) fn remove_subtree(&mut self, node_path: &str) {
        let doomed: Vec<String> = self
            .nodes
            .keys()
            .filter(|p| p.as_str() == node_path || path::is_ancestor(node_path, p))
            .cloned()
            .collect();
        for p in doomed {
            self.nodes.remove(&p);
        }
    }

    /// Rekey staged nodes under `src` to live under `dest`.
    pub(crate) fn rekey_subtree(&mut self, src: &str, dest: &str) {
        let moved: Vec<String> = self
            .nodes
            .keys()
            .filter(|p| p.as_str() == src || path::is_ancestor(src, p))
            .cloned()
            .collect();
        for p in moved {
            if let Some(node) = self.nodes.remove(&p) {
                self.nodes.insert(path::rebase(&p, src, dest), node);
            }
        }
    }

    /// Clone staged nodes under `src` to `dest`; both sets stay staged and
    /// can diverge independently.
    pub(crate) fn copy_subtree(&mut self, src: &str, dest: &str) {
        let copies: Vec<(String, StagedNode)> = self
            .nodes
            .iter()
            .filter(|(p, _)| p.as_str() == src || path::is_ancestor(src, p))
            .map(|(p, node)| (path::rebase(p, src, dest), node.clone()))
            .collect();
        for (p, node) in copies {
            self.nodes.insert(p, node);
        }
    }

    /// All staged paths, deepest first; ties broken lexicographically so
    /// persistence order is reproducible.
    pub(crate) fn paths_by_depth(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.nodes.keys().cloned().collect();
        paths.sort_by(|a, b| path::depth(b).cmp(&path::depth(a)).then_with(|| a.cmp(b)));
        paths
    }
}
