use canopy_types::ContentId;

use crate::commit::CommitRecord;
use crate::error::StoreResult;
use crate::node::PersistedNode;

/// Content-addressed revision store with a single mutable head pointer.
///
/// All implementations must satisfy these invariants:
/// - Nodes and commits are immutable once written; identical content maps
///   to the same id. Writers may therefore persist objects concurrently
///   without coordination.
/// - The head pointer is the only mutable cell. It moves exclusively via
///   [`put_head_commit`], and only while the caller holds the head lock.
/// - [`lock_head`] / [`unlock_head`] form a blocking mutual-exclusion pair;
///   at most one caller holds the lock at a time.
/// - All I/O errors are propagated, never silently ignored.
///
/// [`put_head_commit`]: RevisionStore::put_head_commit
/// [`lock_head`]: RevisionStore::lock_head
/// [`unlock_head`]: RevisionStore::unlock_head
pub trait RevisionStore: Send + Sync {
    /// The id of the latest installed commit.
    fn head_id(&self) -> StoreResult<ContentId>;

    /// Read a commit record by id. Fails with `NotFound` if unknown.
    fn commit(&self, id: &ContentId) -> StoreResult<CommitRecord>;

    /// Read a node by id. Fails with `NotFound` if unknown.
    fn node(&self, id: &ContentId) -> StoreResult<PersistedNode>;

    /// The root node of a revision.
    ///
    /// Default implementation resolves the commit, then its root node.
    fn root_node(&self, revision: &ContentId) -> StoreResult<PersistedNode> {
        let record = self.commit(revision)?;
        self.node(&record.root)
    }

    /// Walk the parent chain starting at `from`, newest first, up to
    /// `max` records.
    ///
    /// Default implementation follows `parent` links; genesis ends the
    /// walk.
    fn history(&self, from: &ContentId, max: usize) -> StoreResult<Vec<CommitRecord>> {
        let mut out = Vec::new();
        let mut cursor = Some(*from);
        while let Some(id) = cursor {
            if out.len() == max {
                break;
            }
            let record = self.commit(&id)?;
            cursor = record.parent;
            out.push(record);
        }
        Ok(out)
    }

    /// Persist a node and return its content-addressed id.
    ///
    /// Idempotent: writing identical content again returns the same id.
    fn put_node(&self, node: &PersistedNode) -> StoreResult<ContentId>;

    /// Install a commit record as the new head and return its id.
    ///
    /// Only valid while the caller holds the head lock; fails with
    /// `LockNotHeld` otherwise.
    fn put_head_commit(&self, record: &CommitRecord) -> StoreResult<ContentId>;

    /// Acquire exclusive ownership of the head pointer, blocking until it
    /// is free.
    fn lock_head(&self);

    /// Release the head lock.
    fn unlock_head(&self);
}
