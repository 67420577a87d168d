//! Commit construction for the Canopy tree store.
//!
//! A [`CommitBuilder`] accumulates a batch of edits against a base revision
//! and commits them atomically. Edits are recorded twice: applied to a
//! private, path-keyed staging area, and appended to an ordered change log
//! that can be replayed against a different base. On commit the builder
//! persists the staged nodes bottom-up, and — if the head advanced
//! concurrently — rebases its change log or performs a structural
//! three-way merge before installing the new head.
//!
//! # Key Types
//!
//! - [`CommitBuilder`] — one logical transaction: stage edits, then commit
//! - [`Change`] — a single edit, replayable and renderable as a diff line
//! - [`NodeTemplate`] — the subtree literal an add-node edit stages
//! - [`StagedNode`] — mutable working copy of a node under edit
//! - [`CommitError`] — the error taxonomy for edits and commits

pub mod builder;
pub mod change;
pub mod error;
pub mod staged;

pub use builder::CommitBuilder;
pub use change::{Change, NodeTemplate};
pub use error::{CommitError, CommitResult};
pub use staged::StagedNode;
