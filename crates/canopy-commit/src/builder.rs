//! The commit builder: one logical transaction against a base revision.
//!
//! Mutation methods each apply a [`Change`] to the private staging area and
//! append it to the change log. `commit` persists the staged nodes
//! bottom-up and installs a new head, rebasing or three-way merging when
//! other writers advanced the head concurrently. Everything up to the head
//! lock runs lock-free: persisted objects are immutable and
//! content-addressed, so concurrent writers cannot race on them — only the
//! head pointer itself serializes committers.

use std::collections::BTreeSet;
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::Value;
use tracing::debug;

use canopy_delta::{Conflict, NodeDelta};
use canopy_store::{CommitRecord, PersistedNode, RevisionStore};
use canopy_types::{path, ContentId};

use crate::change::{Change, NodeTemplate};
use crate::error::{CommitError, CommitResult};
use crate::staged::{StagedNode, StagingArea};

/// Builds one commit against a base revision.
///
/// A builder is a single logical transaction: stage edits through the
/// mutation methods, then call [`commit`](CommitBuilder::commit), which
/// consumes the builder. After a failed mutation the staging area is
/// unchanged and the builder remains usable; after a failed `commit` the
/// builder is gone by construction — create a fresh one against a fresh
/// base revision.
pub struct CommitBuilder<'a> {
    store: &'a dyn RevisionStore,
    /// The commit the staged edits are expressed against.
    base: ContentId,
    /// Root node id of `base`.
    base_root: ContentId,
    message: String,
    changes: Vec<Change>,
    staging: StagingArea,
}

impl std::fmt::Debug for CommitBuilder<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommitBuilder")
            .field("base", &self.base)
            .field("base_root", &self.base_root)
            .field("message", &self.message)
            .field("changes", &self.changes)
            .field("staging", &self.staging)
            .finish_non_exhaustive()
    }
}

impl<'a> CommitBuilder<'a> {
    /// Create a builder bound to a base revision and a commit message.
    pub fn new(
        store: &'a dyn RevisionStore,
        base: ContentId,
        message: impl Into<String>,
    ) -> CommitResult<Self> {
        let base_root = store.commit(&base)?.root;
        Ok(Self {
            store,
            base,
            base_root,
            message: message.into(),
            changes: Vec::new(),
            staging: StagingArea::new(),
        })
    }

    /// The revision this builder's edits are expressed against.
    pub fn base(&self) -> &ContentId {
        &self.base
    }

    /// Returns `true` if no edits have been staged.
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Stage a new subtree under `parent_path`.
    pub fn add_node(
        &mut self,
        parent_path: &str,
        name: &str,
        subtree: NodeTemplate,
    ) -> CommitResult<()> {
        self.record(Change::AddNode {
            parent_path: parent_path.to_string(),
            name: name.to_string(),
            subtree,
        })
    }

    /// Remove the node at `path` and everything beneath it.
    pub fn remove_node(&mut self, node_path: &str) -> CommitResult<()> {
        self.record(Change::RemoveNode {
            path: node_path.to_string(),
        })
    }

    /// Move the node at `src_path` to `dest_path`.
    pub fn move_node(&mut self, src_path: &str, dest_path: &str) -> CommitResult<()> {
        self.record(Change::MoveNode {
            src_path: src_path.to_string(),
            dest_path: dest_path.to_string(),
        })
    }

    /// Copy the node at `src_path` to `dest_path`.
    pub fn copy_node(&mut self, src_path: &str, dest_path: &str) -> CommitResult<()> {
        self.record(Change::CopyNode {
            src_path: src_path.to_string(),
            dest_path: dest_path.to_string(),
        })
    }

    /// Set a property, or delete it by passing `None`.
    pub fn set_property(
        &mut self,
        node_path: &str,
        name: &str,
        value: Option<Value>,
    ) -> CommitResult<()> {
        self.record(Change::SetProperty {
            path: node_path.to_string(),
            name: name.to_string(),
            value,
        })
    }

    /// Apply a change to the staging area; append it to the log only on
    /// success, so a failed edit is not replayed later.
    fn record(&mut self, change: Change) -> CommitResult<()> {
        change.apply(self.store, &self.base_root, &mut self.staging)?;
        self.changes.push(change);
        Ok(())
    }

    /// Commit the staged edits, returning the id of the resulting revision.
    ///
    /// With no staged edits this returns the base revision untouched, with
    /// zero store writes. Otherwise: rebase onto the current head if it
    /// moved, persist staged nodes bottom-up, then — under the head lock —
    /// re-check the head, merge against any second concurrent advance, and
    /// install the new commit. If the final root equals the head's root the
    /// existing head id is returned and no commit is created.
    pub fn commit(mut self) -> CommitResult<ContentId> {
        if self.changes.is_empty() {
            return Ok(self.base);
        }

        // Lock-free optimistic rebase.
        let head = self.store.head_id()?;
        if head != self.base {
            self.rebase(head)?;
        }

        let mut root_id = self.persist_staged()?;

        let _lock = HeadLock::acquire(self.store);
        let head = self.store.head_id()?;
        let mut parent = self.base;
        if head != self.base {
            // A second writer advanced the head while we were persisting.
            let base_node = self.store.node(&self.base_root)?;
            let our_node = self.store.node(&root_id)?;
            let their_node = self.store.root_node(&head)?;
            root_id = self.merge_node(&base_node, &our_node, &their_node, path::ROOT)?;
            parent = head;
        }

        if self.store.commit(&head)?.root == root_id {
            // Nothing effectively changed relative to the head.
            return Ok(head);
        }

        let record = CommitRecord {
            parent: Some(parent),
            root: root_id,
            message: self.message.clone(),
            changes: self.render_changes(),
            timestamp_ms: now_ms(),
        };
        let commit_id = self.store.put_head_commit(&record)?;
        debug!(
            commit = %commit_id.short_hex(),
            changes = self.changes.len(),
            "committed"
        );
        Ok(commit_id)
    }

    /// Adopt `head` as the new base and replay the change log against it.
    fn rebase(&mut self, head: ContentId) -> CommitResult<()> {
        debug!(
            from = %self.base.short_hex(),
            to = %head.short_hex(),
            "head advanced; replaying change log"
        );
        self.base_root = self.store.commit(&head)?.root;
        self.base = head;
        self.staging.clear();
        for change in &self.changes {
            change.apply(self.store, &self.base_root, &mut self.staging)?;
        }
        Ok(())
    }

    /// Persist every staged node, deepest paths first, patching each newly
    /// minted id into the staged parent so a node is persisted only after
    /// all its children carry real ids. Returns the new root id.
    fn persist_staged(&mut self) -> CommitResult<ContentId> {
        let mut root_id = None;
        for node_path in self.staging.paths_by_depth() {
            let frozen = self
                .staging
                .get(&node_path)
                .ok_or_else(|| CommitError::internal(format!("{node_path} vanished")))?
                .freeze(&node_path)?;
            let id = self.store.put_node(&frozen)?;
            match path::parent(&node_path) {
                Some(parent_path) => {
                    let parent = self.staging.get_mut(parent_path).ok_or_else(|| {
                        CommitError::internal(format!(
                            "staged node {node_path} has no staged parent"
                        ))
                    })?;
                    parent
                        .children
                        .insert(path::name(&node_path).to_string(), Some(id));
                }
                None => root_id = Some(id),
            }
        }
        root_id.ok_or_else(|| CommitError::internal("persistence produced no root node"))
    }

    fn render_changes(&self) -> String {
        self.changes
            .iter()
            .map(Change::as_diff)
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Three-way merge of one node. `ours` carries this builder's edits,
    /// `theirs` the concurrently committed state, `base` their common
    /// ancestor. Returns the id of the persisted merged node.
    fn merge_node(
        &self,
        base: &PersistedNode,
        ours: &PersistedNode,
        theirs: &PersistedNode,
        node_path: &str,
    ) -> CommitResult<ContentId> {
        let base_state = base.to_state();
        let their_delta = NodeDelta::between(&base_state, &theirs.to_state());
        let our_delta = NodeDelta::between(&base_state, &ours.to_state());
        let conflicts = their_delta.conflicts_with(&our_delta);
        debug!(
            path = node_path,
            conflicts = conflicts.len(),
            "merging concurrent changes"
        );

        // Partition the conflicts; a value conflict aborts the whole commit.
        let mut dropped_properties = Vec::new();
        let mut dropped_children = Vec::new();
        let mut recursive = Vec::new();
        for conflict in conflicts {
            match conflict {
                Conflict::PropertyValue { name, ours, theirs } => {
                    return Err(CommitError::MergeConflict {
                        path: node_path.to_string(),
                        detail: format!("property {name:?} set to {ours} and {theirs}"),
                    });
                }
                Conflict::RemovedProperty { name } => dropped_properties.push(name),
                Conflict::RemovedChild { name } => dropped_children.push(name),
                Conflict::ChildContent { name, ours, theirs } => {
                    match (base.child(&name).copied(), ours, theirs) {
                        // Both sides changed an existing child: merge it
                        // one level deeper.
                        (Some(base_id), Some(our_id), Some(their_id)) => {
                            recursive.push((name, base_id, our_id, their_id));
                        }
                        // Two independently created subtrees under the same
                        // name cannot be reconciled.
                        _ => {
                            return Err(CommitError::MergeConflict {
                                path: node_path.to_string(),
                                detail: format!("node {name:?} created on both sides"),
                            });
                        }
                    }
                }
            }
        }

        let skip_properties: BTreeSet<&String> = dropped_properties.iter().collect();
        let skip_children: BTreeSet<&String> = dropped_children
            .iter()
            .chain(recursive.iter().map(|(name, ..)| name))
            .collect();

        // Their snapshot is the starting point, so their untouched parts
        // survive; our one-sided edits are overlaid on top.
        let mut merged = StagedNode::from_persisted(theirs);
        for (name, value) in our_delta
            .added_properties
            .iter()
            .chain(&our_delta.changed_properties)
        {
            if !skip_properties.contains(name) {
                merged.properties.insert(name.clone(), value.clone());
            }
        }
        for name in &our_delta.removed_properties {
            if !skip_properties.contains(name) {
                merged.properties.remove(name);
            }
        }
        for (name, id) in our_delta
            .added_children
            .iter()
            .chain(&our_delta.changed_children)
        {
            if !skip_children.contains(name) {
                merged.children.insert(name.clone(), *id);
            }
        }
        for name in &our_delta.removed_children {
            if !skip_children.contains(name) {
                merged.children.remove(name);
            }
        }

        // Deletion wins over concurrent modification.
        for name in &dropped_properties {
            merged.properties.remove(name);
        }
        for name in &dropped_children {
            merged.children.remove(name);
        }

        for (name, base_id, our_id, their_id) in recursive {
            let child_path = path::join(node_path, &name);
            let child_base = self.store.node(&base_id)?;
            let child_ours = self.store.node(&our_id)?;
            let child_theirs = self.store.node(&their_id)?;
            let merged_id =
                self.merge_node(&child_base, &child_ours, &child_theirs, &child_path)?;
            merged.children.insert(name, Some(merged_id));
        }

        let id = self.store.put_node(&merged.freeze(node_path)?)?;
        Ok(id)
    }
}

/// Scoped head lock: released on drop, so every exit path — including a
/// merge conflict raised mid-commit — unlocks.
struct HeadLock<'a> {
    store: &'a dyn RevisionStore,
}

impl<'a> HeadLock<'a> {
    fn acquire(store: &'a dyn RevisionStore) -> Self {
        store.lock_head();
        Self { store }
    }
}

impl Drop for HeadLock<'_> {
    fn drop(&mut self) {
        self.store.unlock_head();
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
