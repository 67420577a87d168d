//! Node delta engine for the Canopy tree store.
//!
//! A [`NodeDelta`] is the set-difference between two node states sharing a
//! common base: which properties and children were added, changed, or
//! removed. Two deltas against the same base can be compared with
//! [`NodeDelta::conflicts_with`] to classify the places where concurrent
//! edits collide — the primitive the three-way merge is built on.

pub mod conflict;
pub mod delta;

pub use conflict::Conflict;
pub use delta::NodeDelta;
