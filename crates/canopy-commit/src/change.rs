//! The change log: tagged edit variants.
//!
//! Each [`Change`] carries enough data to be replayed against a possibly
//! different base revision, applies itself to the staging area (validating
//! before mutating, so a failed apply leaves staging untouched), and
//! renders itself as one deterministic diff line for the commit's change
//! summary.

use std::collections::BTreeMap;

use serde_json::Value;

use canopy_store::RevisionStore;
use canopy_types::{path, ContentId};

use crate::error::{CommitError, CommitResult};
use crate::staged::{StagedNode, StagingArea};

/// A node-tree literal: the subtree an add-node edit stages.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct NodeTemplate {
    pub properties: BTreeMap<String, Value>,
    pub children: BTreeMap<String, NodeTemplate>,
}

impl NodeTemplate {
    /// An empty node.
    pub fn new() -> Self {
        Self::default()
    }

    /// Chainable property setter.
    pub fn with_property(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.properties.insert(name.to_string(), value.into());
        self
    }

    /// Chainable child setter.
    pub fn with_child(mut self, name: &str, child: NodeTemplate) -> Self {
        self.children.insert(name.to_string(), child);
        self
    }

    /// JSON rendering: properties and children merged into one object.
    /// Key order is fixed by the underlying maps, so output is stable.
    pub fn to_json(&self) -> Value {
        let mut map = serde_json::Map::new();
        for (name, value) in &self.properties {
            map.insert(name.clone(), value.clone());
        }
        for (name, child) in &self.children {
            map.insert(name.clone(), child.to_json());
        }
        Value::Object(map)
    }
}

/// One edit in the change log.
#[derive(Clone, Debug, PartialEq)]
pub enum Change {
    /// Stage a new subtree under `parent_path`.
    AddNode {
        parent_path: String,
        name: String,
        subtree: NodeTemplate,
    },
    /// Remove the node at `path` and everything beneath it.
    RemoveNode { path: String },
    /// Move the node at `src_path` to `dest_path`.
    MoveNode { src_path: String, dest_path: String },
    /// Copy the node at `src_path` to `dest_path`.
    CopyNode { src_path: String, dest_path: String },
    /// Set (`Some`) or delete (`None`) a property.
    SetProperty {
        path: String,
        name: String,
        value: Option<Value>,
    },
}

impl Change {
    /// Apply this edit to the staging area.
    ///
    /// Ancestors are staged lazily from the revision rooted at `root_id`.
    /// All validation happens before the first content mutation.
    pub(crate) fn apply(
        &self,
        store: &dyn RevisionStore,
        root_id: &ContentId,
        staging: &mut StagingArea,
    ) -> CommitResult<()> {
        match self {
            Change::AddNode {
                parent_path,
                name,
                subtree,
            } => apply_add(store, root_id, staging, parent_path, name, subtree),
            Change::RemoveNode { path } => apply_remove(store, root_id, staging, path),
            Change::MoveNode {
                src_path,
                dest_path,
            } => apply_move(store, root_id, staging, src_path, dest_path),
            Change::CopyNode {
                src_path,
                dest_path,
            } => apply_copy(store, root_id, staging, src_path, dest_path),
            Change::SetProperty { path, name, value } => {
                apply_set_property(store, root_id, staging, path, name, value.as_ref())
            }
        }
    }

    /// Render this edit as one diff line.
    ///
    /// `+"/path":{...}` add, `-"/path"` remove, `>"/src":"/dest"` move,
    /// `*"/src":"/dest"` copy, `^"/path/prop":value` set (value `null`
    /// deletes). Never fails; stable for identical inputs.
    pub fn as_diff(&self) -> String {
        match self {
            Change::AddNode {
                parent_path,
                name,
                subtree,
            } => format!(
                "+{}:{}",
                quote(&path::join(parent_path, name)),
                subtree.to_json()
            ),
            Change::RemoveNode { path } => format!("-{}", quote(path)),
            Change::MoveNode {
                src_path,
                dest_path,
            } => format!(">{}:{}", quote(src_path), quote(dest_path)),
            Change::CopyNode {
                src_path,
                dest_path,
            } => format!("*{}:{}", quote(src_path), quote(dest_path)),
            Change::SetProperty { path, name, value } => {
                let rendered = match value {
                    Some(v) => v.to_string(),
                    None => Value::Null.to_string(),
                };
                format!("^{}:{}", quote(&path::join(path, name)), rendered)
            }
        }
    }
}

/// JSON string quoting for paths in diff lines.
fn quote(s: &str) -> String {
    Value::String(s.to_string()).to_string()
}

fn apply_add(
    store: &dyn RevisionStore,
    root_id: &ContentId,
    staging: &mut StagingArea,
    parent_path: &str,
    name: &str,
    subtree: &NodeTemplate,
) -> CommitResult<()> {
    path::validate(parent_path)?;
    path::validate_name(name)?;
    validate_template(subtree)?;

    let node_path = path::join(parent_path, name);
    let parent = staging.stage(store, root_id, parent_path)?;
    if parent.children.contains_key(name) {
        return Err(CommitError::AlreadyExists(node_path));
    }
    parent.add_child(name, None)?;
    stage_template(staging, &node_path, subtree);
    Ok(())
}

fn validate_template(template: &NodeTemplate) -> CommitResult<()> {
    let mut pending = vec![template];
    while let Some(tpl) = pending.pop() {
        for (name, child) in &tpl.children {
            path::validate_name(name)?;
            pending.push(child);
        }
    }
    Ok(())
}

/// Stage the template's root and all descendants, child ids left pending.
fn stage_template(staging: &mut StagingArea, root_path: &str, template: &NodeTemplate) {
    let mut pending = vec![(root_path.to_string(), template)];
    while let Some((node_path, tpl)) = pending.pop() {
        let mut node = StagedNode::new();
        node.properties = tpl.properties.clone();
        for (name, child) in &tpl.children {
            node.children.insert(name.clone(), None);
            pending.push((path::join(&node_path, name), child));
        }
        staging.insert(node_path, node);
    }
}

fn apply_remove(
    store: &dyn RevisionStore,
    root_id: &ContentId,
    staging: &mut StagingArea,
    node_path: &str,
) -> CommitResult<()> {
    path::validate(node_path)?;
    let parent_path = path::parent(node_path)
        .ok_or_else(|| CommitError::InvalidArgument("cannot remove the root node".into()))?;
    let name = path::name(node_path);

    let parent = staging.stage(store, root_id, parent_path)?;
    if !parent.children.contains_key(name) {
        return Err(CommitError::NotFound(node_path.to_string()));
    }
    parent.remove_child(name)?;
    staging.remove_subtree(node_path);
    Ok(())
}

fn apply_move(
    store: &dyn RevisionStore,
    root_id: &ContentId,
    staging: &mut StagingArea,
    src_path: &str,
    dest_path: &str,
) -> CommitResult<()> {
    path::validate(src_path)?;
    path::validate(dest_path)?;
    if src_path == dest_path || path::is_ancestor(src_path, dest_path) {
        return Err(CommitError::InvalidArgument(format!(
            "cannot move {src_path} into {dest_path}"
        )));
    }
    let src_parent_path = path::parent(src_path)
        .ok_or_else(|| CommitError::InvalidArgument("cannot move the root node".into()))?;
    let dest_parent_path = path::parent(dest_path)
        .ok_or_else(|| CommitError::InvalidArgument("cannot move onto the root".into()))?;
    let src_name = path::name(src_path);
    let dest_name = path::name(dest_path);

    // Materialize and validate both parents before mutating either.
    staging.stage(store, root_id, src_parent_path)?;
    staging.stage(store, root_id, dest_parent_path)?;
    let src_present = staging
        .get(src_parent_path)
        .is_some_and(|p| p.children.contains_key(src_name));
    if !src_present {
        return Err(CommitError::NotFound(src_path.to_string()));
    }
    let dest_taken = staging
        .get(dest_parent_path)
        .is_some_and(|p| p.children.contains_key(dest_name));
    if dest_taken {
        return Err(CommitError::AlreadyExists(dest_path.to_string()));
    }

    if src_parent_path == dest_parent_path {
        let parent = staging
            .get_mut(src_parent_path)
            .ok_or_else(|| CommitError::internal(format!("{src_parent_path} not staged")))?;
        parent.rename_child(src_name, dest_name)?;
    } else {
        let id = {
            let src_parent = staging
                .get_mut(src_parent_path)
                .ok_or_else(|| CommitError::internal(format!("{src_parent_path} not staged")))?;
            src_parent.remove_child(src_name)?
        };
        let dest_parent = staging
            .get_mut(dest_parent_path)
            .ok_or_else(|| CommitError::internal(format!("{dest_parent_path} not staged")))?;
        dest_parent.add_child(dest_name, id)?;
    }
    staging.rekey_subtree(src_path, dest_path);
    Ok(())
}

fn apply_copy(
    store: &dyn RevisionStore,
    root_id: &ContentId,
    staging: &mut StagingArea,
    src_path: &str,
    dest_path: &str,
) -> CommitResult<()> {
    path::validate(src_path)?;
    path::validate(dest_path)?;
    let src_parent_path = path::parent(src_path)
        .ok_or_else(|| CommitError::InvalidArgument("cannot copy the root node".into()))?;
    let dest_parent_path = path::parent(dest_path)
        .ok_or_else(|| CommitError::InvalidArgument("cannot copy onto the root".into()))?;
    let src_name = path::name(src_path);
    let dest_name = path::name(dest_path);

    staging.stage(store, root_id, src_parent_path)?;
    staging.stage(store, root_id, dest_parent_path)?;
    let id = match staging
        .get(src_parent_path)
        .and_then(|p| p.children.get(src_name))
    {
        Some(id) => *id,
        None => return Err(CommitError::NotFound(src_path.to_string())),
    };
    let dest_taken = staging
        .get(dest_parent_path)
        .is_some_and(|p| p.children.contains_key(dest_name));
    if dest_taken {
        return Err(CommitError::AlreadyExists(dest_path.to_string()));
    }

    // An unpersisted source has no shareable id: clone its staged subtree
    // so the two copies can diverge.
    if id.is_none() {
        staging.copy_subtree(src_path, dest_path);
    }
    let dest_parent = staging
        .get_mut(dest_parent_path)
        .ok_or_else(|| CommitError::internal(format!("{dest_parent_path} not staged")))?;
    dest_parent.add_child(dest_name, id)?;
    Ok(())
}

fn apply_set_property(
    store: &dyn RevisionStore,
    root_id: &ContentId,
    staging: &mut StagingArea,
    node_path: &str,
    name: &str,
    value: Option<&Value>,
) -> CommitResult<()> {
    path::validate(node_path)?;
    path::validate_name(name)?;

    let node = staging.stage(store, root_id, node_path)?;
    match value {
        Some(v) => {
            node.properties.insert(name.to_string(), v.clone());
        }
        // Deleting an absent property is a no-op, not an error.
        None => {
            node.properties.remove(name);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use canopy_store::{InMemoryRevisionStore, PersistedNode};
    use serde_json::json;

    /// Store with /a and /a/b persisted; returns the root node id.
    fn seeded_store() -> (InMemoryRevisionStore, ContentId) {
        let store = InMemoryRevisionStore::new();

        let mut b = PersistedNode::empty();
        b.properties.insert("leaf".into(), json!(true));
        let b_id = store.put_node(&b).unwrap();

        let mut a = PersistedNode::empty();
        a.children.insert("b".into(), b_id);
        a.properties.insert("pa".into(), json!(1));
        let a_id = store.put_node(&a).unwrap();

        let mut root = PersistedNode::empty();
        root.children.insert("a".into(), a_id);
        let root_id = store.put_node(&root).unwrap();

        (store, root_id)
    }

    fn apply(
        store: &InMemoryRevisionStore,
        root_id: &ContentId,
        staging: &mut StagingArea,
        change: Change,
    ) -> CommitResult<()> {
        change.apply(store, root_id, staging)
    }

    // -----------------------------------------------------------------------
    // AddNode
    // -----------------------------------------------------------------------

    #[test]
    fn add_node_stages_the_whole_subtree() {
        let (store, root_id) = seeded_store();
        let mut staging = StagingArea::new();

        let subtree = NodeTemplate::new()
            .with_property("p", 1)
            .with_child("inner", NodeTemplate::new().with_property("q", 2));
        apply(
            &store,
            &root_id,
            &mut staging,
            Change::AddNode {
                parent_path: "/".into(),
                name: "x".into(),
                subtree,
            },
        )
        .unwrap();

        assert_eq!(staging.get("/").unwrap().children.get("x"), Some(&None));
        assert_eq!(staging.get("/x").unwrap().properties.get("p"), Some(&json!(1)));
        assert_eq!(staging.get("/x").unwrap().children.get("inner"), Some(&None));
        assert_eq!(
            staging.get("/x/inner").unwrap().properties.get("q"),
            Some(&json!(2))
        );
    }

    #[test]
    fn add_node_rejects_existing_names() {
        let (store, root_id) = seeded_store();
        let mut staging = StagingArea::new();

        let err = apply(
            &store,
            &root_id,
            &mut staging,
            Change::AddNode {
                parent_path: "/".into(),
                name: "a".into(),
                subtree: NodeTemplate::new(),
            },
        )
        .unwrap_err();
        assert!(matches!(err, CommitError::AlreadyExists(p) if p == "/a"));
        // Failed apply left the parent untouched.
        assert_eq!(staging.get("/").unwrap().children.len(), 1);
    }

    #[test]
    fn add_node_under_missing_parent_is_not_found() {
        let (store, root_id) = seeded_store();
        let mut staging = StagingArea::new();

        let err = apply(
            &store,
            &root_id,
            &mut staging,
            Change::AddNode {
                parent_path: "/zz".into(),
                name: "x".into(),
                subtree: NodeTemplate::new(),
            },
        )
        .unwrap_err();
        assert!(matches!(err, CommitError::NotFound(_)));
    }

    // -----------------------------------------------------------------------
    // RemoveNode
    // -----------------------------------------------------------------------

    #[test]
    fn remove_node_purges_staged_descendants() {
        let (store, root_id) = seeded_store();
        let mut staging = StagingArea::new();

        // Stage a descendant first so the purge has something to drop.
        apply(
            &store,
            &root_id,
            &mut staging,
            Change::SetProperty {
                path: "/a/b".into(),
                name: "dirty".into(),
                value: Some(json!(1)),
            },
        )
        .unwrap();

        apply(
            &store,
            &root_id,
            &mut staging,
            Change::RemoveNode { path: "/a".into() },
        )
        .unwrap();

        assert!(staging.get("/").unwrap().children.get("a").is_none());
        assert!(staging.get("/a").is_none());
        assert!(staging.get("/a/b").is_none());
    }

    #[test]
    fn remove_missing_node_is_not_found() {
        let (store, root_id) = seeded_store();
        let mut staging = StagingArea::new();
        let err = apply(
            &store,
            &root_id,
            &mut staging,
            Change::RemoveNode { path: "/zz".into() },
        )
        .unwrap_err();
        assert!(matches!(err, CommitError::NotFound(p) if p == "/zz"));
    }

    #[test]
    fn remove_root_is_invalid() {
        let (store, root_id) = seeded_store();
        let mut staging = StagingArea::new();
        let err = apply(
            &store,
            &root_id,
            &mut staging,
            Change::RemoveNode { path: "/".into() },
        )
        .unwrap_err();
        assert!(matches!(err, CommitError::InvalidArgument(_)));
    }

    // -----------------------------------------------------------------------
    // MoveNode
    // -----------------------------------------------------------------------

    #[test]
    fn move_into_own_descendant_is_invalid() {
        let (store, root_id) = seeded_store();
        let mut staging = StagingArea::new();
        let err = apply(
            &store,
            &root_id,
            &mut staging,
            Change::MoveNode {
                src_path: "/a".into(),
                dest_path: "/a/b/c".into(),
            },
        )
        .unwrap_err();
        assert!(matches!(err, CommitError::InvalidArgument(_)));
        assert!(staging.get("/").map_or(true, |r| r.children.contains_key("a")));
    }

    #[test]
    fn same_parent_move_is_a_rename() {
        let (store, root_id) = seeded_store();
        let mut staging = StagingArea::new();
        apply(
            &store,
            &root_id,
            &mut staging,
            Change::MoveNode {
                src_path: "/a".into(),
                dest_path: "/renamed".into(),
            },
        )
        .unwrap();

        let root = staging.get("/").unwrap();
        assert!(!root.children.contains_key("a"));
        assert!(root.children.get("renamed").unwrap().is_some());
    }

    #[test]
    fn cross_parent_move_reuses_the_id_and_rekeys() {
        let (store, root_id) = seeded_store();
        let mut staging = StagingArea::new();

        // Dirty the source subtree so there are staged paths to rekey.
        apply(
            &store,
            &root_id,
            &mut staging,
            Change::SetProperty {
                path: "/a/b".into(),
                name: "dirty".into(),
                value: Some(json!(1)),
            },
        )
        .unwrap();
        apply(
            &store,
            &root_id,
            &mut staging,
            Change::AddNode {
                parent_path: "/".into(),
                name: "target".into(),
                subtree: NodeTemplate::new(),
            },
        )
        .unwrap();

        apply(
            &store,
            &root_id,
            &mut staging,
            Change::MoveNode {
                src_path: "/a/b".into(),
                dest_path: "/target/b".into(),
            },
        )
        .unwrap();

        assert!(!staging.get("/a").unwrap().children.contains_key("b"));
        assert!(staging.get("/target").unwrap().children.contains_key("b"));
        assert!(staging.get("/a/b").is_none());
        assert_eq!(
            staging.get("/target/b").unwrap().properties.get("dirty"),
            Some(&json!(1))
        );
    }

    #[test]
    fn move_onto_taken_name_already_exists() {
        let (store, root_id) = seeded_store();
        let mut staging = StagingArea::new();
        apply(
            &store,
            &root_id,
            &mut staging,
            Change::AddNode {
                parent_path: "/".into(),
                name: "other".into(),
                subtree: NodeTemplate::new(),
            },
        )
        .unwrap();

        let err = apply(
            &store,
            &root_id,
            &mut staging,
            Change::MoveNode {
                src_path: "/a".into(),
                dest_path: "/other".into(),
            },
        )
        .unwrap_err();
        assert!(matches!(err, CommitError::AlreadyExists(_)));
        // Source untouched by the failed move.
        assert!(staging.get("/").unwrap().children.contains_key("a"));
    }

    // -----------------------------------------------------------------------
    // CopyNode
    // -----------------------------------------------------------------------

    #[test]
    fn copy_persisted_node_shares_the_id() {
        let (store, root_id) = seeded_store();
        let mut staging = StagingArea::new();
        apply(
            &store,
            &root_id,
            &mut staging,
            Change::CopyNode {
                src_path: "/a".into(),
                dest_path: "/a2".into(),
            },
        )
        .unwrap();

        let root = staging.get("/").unwrap();
        assert_eq!(root.children.get("a"), root.children.get("a2"));
        assert!(root.children.get("a2").unwrap().is_some());
        // Nothing staged under the copy: the shared subtree is immutable.
        assert!(staging.get("/a2").is_none());
    }

    #[test]
    fn copy_pending_node_deep_copies_the_staged_subtree() {
        let (store, root_id) = seeded_store();
        let mut staging = StagingArea::new();
        apply(
            &store,
            &root_id,
            &mut staging,
            Change::AddNode {
                parent_path: "/".into(),
                name: "fresh".into(),
                subtree: NodeTemplate::new()
                    .with_property("p", 1)
                    .with_child("inner", NodeTemplate::new()),
            },
        )
        .unwrap();

        apply(
            &store,
            &root_id,
            &mut staging,
            Change::CopyNode {
                src_path: "/fresh".into(),
                dest_path: "/twin".into(),
            },
        )
        .unwrap();

        assert_eq!(staging.get("/").unwrap().children.get("twin"), Some(&None));
        assert_eq!(
            staging.get("/twin").unwrap().properties.get("p"),
            Some(&json!(1))
        );
        assert!(staging.get("/twin/inner").is_some());

        // The copies diverge independently.
        staging
            .get_mut("/twin")
            .unwrap()
            .properties
            .insert("p".into(), json!(2));
        assert_eq!(
            staging.get("/fresh").unwrap().properties.get("p"),
            Some(&json!(1))
        );
    }

    // -----------------------------------------------------------------------
    // SetProperty
    // -----------------------------------------------------------------------

    #[test]
    fn set_property_upserts() {
        let (store, root_id) = seeded_store();
        let mut staging = StagingArea::new();
        apply(
            &store,
            &root_id,
            &mut staging,
            Change::SetProperty {
                path: "/a".into(),
                name: "pa".into(),
                value: Some(json!(99)),
            },
        )
        .unwrap();
        assert_eq!(staging.get("/a").unwrap().properties.get("pa"), Some(&json!(99)));
    }

    #[test]
    fn set_property_none_deletes_without_error() {
        let (store, root_id) = seeded_store();
        let mut staging = StagingArea::new();
        apply(
            &store,
            &root_id,
            &mut staging,
            Change::SetProperty {
                path: "/a".into(),
                name: "pa".into(),
                value: None,
            },
        )
        .unwrap();
        assert!(staging.get("/a").unwrap().properties.get("pa").is_none());

        // Deleting an already-absent property is still fine.
        apply(
            &store,
            &root_id,
            &mut staging,
            Change::SetProperty {
                path: "/a".into(),
                name: "absent".into(),
                value: None,
            },
        )
        .unwrap();
    }

    #[test]
    fn set_property_on_missing_path_is_not_found() {
        let (store, root_id) = seeded_store();
        let mut staging = StagingArea::new();
        let err = apply(
            &store,
            &root_id,
            &mut staging,
            Change::SetProperty {
                path: "/zz".into(),
                name: "p".into(),
                value: Some(json!(1)),
            },
        )
        .unwrap_err();
        assert!(matches!(err, CommitError::NotFound(_)));
    }

    // -----------------------------------------------------------------------
    // Diff rendering
    // -----------------------------------------------------------------------

    #[test]
    fn add_node_diff_line() {
        let change = Change::AddNode {
            parent_path: "/".into(),
            name: "x".into(),
            subtree: NodeTemplate::new().with_property("p", 1),
        };
        assert_eq!(change.as_diff(), r#"+"/x":{"p":1}"#);
    }

    #[test]
    fn add_node_diff_nests_children() {
        let change = Change::AddNode {
            parent_path: "/a".into(),
            name: "x".into(),
            subtree: NodeTemplate::new()
                .with_property("p", 1)
                .with_child("c", NodeTemplate::new()),
        };
        assert_eq!(change.as_diff(), r#"+"/a/x":{"c":{},"p":1}"#);
    }

    #[test]
    fn remove_move_copy_diff_lines() {
        assert_eq!(
            Change::RemoveNode { path: "/a".into() }.as_diff(),
            r#"-"/a""#
        );
        assert_eq!(
            Change::MoveNode {
                src_path: "/a".into(),
                dest_path: "/b".into()
            }
            .as_diff(),
            r#">"/a":"/b""#
        );
        assert_eq!(
            Change::CopyNode {
                src_path: "/a".into(),
                dest_path: "/b".into()
            }
            .as_diff(),
            r#"*"/a":"/b""#
        );
    }

    #[test]
    fn set_property_diff_lines() {
        assert_eq!(
            Change::SetProperty {
                path: "/a".into(),
                name: "p".into(),
                value: Some(json!("x")),
            }
            .as_diff(),
            r#"^"/a/p":"x""#
        );
        assert_eq!(
            Change::SetProperty {
                path: "/a".into(),
                name: "p".into(),
                value: None,
            }
            .as_diff(),
            r#"^"/a/p":null"#
        );
    }

    #[test]
    fn rendering_is_stable() {
        let change = Change::AddNode {
            parent_path: "/".into(),
            name: "x".into(),
            subtree: NodeTemplate::new().with_property("b", 2).with_property("a", 1),
        };
        assert_eq!(change.as_diff(), change.as_diff());
        assert_eq!(change.as_diff(), r#"+"/x":{"a":1,"b":2}"#);
    }
}
