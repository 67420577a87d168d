use std::fmt;

use serde_json::Value;

use canopy_types::ContentId;

/// A place where two deltas over the same base touch the same name in
/// incompatible ways.
///
/// "Ours" and "theirs" follow the merge convention: theirs is the delta the
/// comparison is called on, ours the argument.
#[derive(Clone, Debug, PartialEq)]
pub enum Conflict {
    /// Both sides set the same property to different values.
    PropertyValue {
        name: String,
        ours: Value,
        theirs: Value,
    },
    /// Both sides changed or created the same child with differing content.
    ChildContent {
        name: String,
        ours: Option<ContentId>,
        theirs: Option<ContentId>,
    },
    /// One side removed a property the other side modified.
    RemovedProperty { name: String },
    /// One side removed a child the other side modified.
    RemovedChild { name: String },
}

impl Conflict {
    /// The property or child name under conflict.
    pub fn name(&self) -> &str {
        match self {
            Self::PropertyValue { name, .. }
            | Self::ChildContent { name, .. }
            | Self::RemovedProperty { name }
            | Self::RemovedChild { name } => name,
        }
    }
}

impl fmt::Display for Conflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PropertyValue { name, ours, theirs } => {
                write!(f, "property {name:?} set to {ours} and {theirs}")
            }
            Self::ChildContent { name, .. } => {
                write!(f, "node {name:?} changed on both sides")
            }
            Self::RemovedProperty { name } => {
                write!(f, "property {name:?} removed and modified concurrently")
            }
            Self::RemovedChild { name } => {
                write!(f, "node {name:?} removed and modified concurrently")
            }
        }
    }
}
