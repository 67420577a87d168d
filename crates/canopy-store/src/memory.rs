use std::collections::HashMap;
use std::sync::{Condvar, Mutex, RwLock};

use tracing::debug;

use canopy_types::ContentId;

use crate::commit::CommitRecord;
use crate::error::{StoreError, StoreResult};
use crate::node::PersistedNode;
use crate::traits::RevisionStore;

/// In-memory, HashMap-based revision store.
///
/// Intended for tests and embedding. Objects live behind `RwLock`s; the
/// head lock is a `Mutex<bool>` paired with a `Condvar` so [`lock_head`]
/// blocks until the lock is free. A new store bootstraps itself with an
/// empty root node and a genesis commit, so a base revision always exists.
///
/// [`lock_head`]: RevisionStore::lock_head
pub struct InMemoryRevisionStore {
    nodes: RwLock<HashMap<ContentId, PersistedNode>>,
    commits: RwLock<HashMap<ContentId, CommitRecord>>,
    head: RwLock<ContentId>,
    head_held: Mutex<bool>,
    head_free: Condvar,
}

impl InMemoryRevisionStore {
    /// Create a store holding a single empty revision (the genesis commit).
    pub fn new() -> Self {
        let root = PersistedNode::empty();
        let root_id = root.content_id().expect("genesis node serializes");
        let genesis = CommitRecord {
            parent: None,
            root: root_id,
            message: "genesis".to_string(),
            changes: String::new(),
            timestamp_ms: 0,
        };
        let genesis_id = genesis.content_id().expect("genesis commit serializes");

        let store = Self {
            nodes: RwLock::new(HashMap::new()),
            commits: RwLock::new(HashMap::new()),
            head: RwLock::new(genesis_id),
            head_held: Mutex::new(false),
            head_free: Condvar::new(),
        };
        store
            .nodes
            .write()
            .expect("lock poisoned")
            .insert(root_id, root);
        store
            .commits
            .write()
            .expect("lock poisoned")
            .insert(genesis_id, genesis);
        store
    }

    /// Number of nodes currently stored.
    pub fn node_count(&self) -> usize {
        self.nodes.read().expect("lock poisoned").len()
    }

    /// Number of commits currently stored.
    pub fn commit_count(&self) -> usize {
        self.commits.read().expect("lock poisoned").len()
    }
}

impl Default for InMemoryRevisionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RevisionStore for InMemoryRevisionStore {
    fn head_id(&self) -> StoreResult<ContentId> {
        Ok(*self.head.read().expect("lock poisoned"))
    }

    fn commit(&self, id: &ContentId) -> StoreResult<CommitRecord> {
        self.commits
            .read()
            .expect("lock poisoned")
            .get(id)
            .cloned()
            .ok_or(StoreError::NotFound(*id))
    }

    fn node(&self, id: &ContentId) -> StoreResult<PersistedNode> {
        self.nodes
            .read()
            .expect("lock poisoned")
            .get(id)
            .cloned()
            .ok_or(StoreError::NotFound(*id))
    }

    fn put_node(&self, node: &PersistedNode) -> StoreResult<ContentId> {
        let id = node.content_id()?;
        // Idempotent: content-addressing guarantees the same id always maps
        // to the same content.
        self.nodes
            .write()
            .expect("lock poisoned")
            .entry(id)
            .or_insert_with(|| node.clone());
        Ok(id)
    }

    fn put_head_commit(&self, record: &CommitRecord) -> StoreResult<ContentId> {
        if !*self.head_held.lock().expect("lock poisoned") {
            return Err(StoreError::LockNotHeld);
        }
        let id = record.content_id()?;
        self.commits
            .write()
            .expect("lock poisoned")
            .insert(id, record.clone());
        *self.head.write().expect("lock poisoned") = id;
        debug!(head = %id.short_hex(), "installed new head commit");
        Ok(id)
    }

    fn lock_head(&self) {
        let mut held = self.head_held.lock().expect("lock poisoned");
        while *held {
            held = self.head_free.wait(held).expect("lock poisoned");
        }
        *held = true;
    }

    fn unlock_head(&self) {
        let mut held = self.head_held.lock().expect("lock poisoned");
        *held = false;
        self.head_free.notify_one();
    }
}

impl std::fmt::Debug for InMemoryRevisionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryRevisionStore")
            .field("node_count", &self.node_count())
            .field("commit_count", &self.commit_count())
            .finish()
    }
}
