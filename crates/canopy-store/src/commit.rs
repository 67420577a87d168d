use serde::{Deserialize, Serialize};

use canopy_types::ContentId;

use crate::error::{StoreError, StoreResult};

/// Hash domain for commit objects.
const COMMIT_DOMAIN: &str = "canopy/commit/v1";

/// An immutable commit record: one installed revision of the tree.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitRecord {
    /// The commit this one was built against. `None` only for genesis.
    pub parent: Option<ContentId>,
    /// The root node of the tree at this revision.
    pub root: ContentId,
    /// Commit message supplied by the committer.
    pub message: String,
    /// Rendered change summary, one diff line per change, in application
    /// order, joined by `\n`.
    pub changes: String,
    /// Wall-clock milliseconds since the UNIX epoch.
    pub timestamp_ms: u64,
}

impl CommitRecord {
    /// Canonical byte form hashed for content addressing.
    pub fn canonical_bytes(&self) -> StoreResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    /// The content-addressed id this commit persists under.
    pub fn content_id(&self) -> StoreResult<ContentId> {
        Ok(ContentId::derive(COMMIT_DOMAIN, &self.canonical_bytes()?))
    }
}
