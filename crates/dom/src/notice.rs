//! Raw change notices delivered to document observers.
//!
//! Notices are the low-level input of the capture pipeline. They name live
//! node handles, never mirror ids, and are delivered in the order the tree
//! operations happened.
//!
//! Invariants:
//! - Re-parenting an attached node produces a `ChildList` removal on the old
//!   parent before the `ChildList` insertion on the new parent.
//! - Sibling hints describe the tree at the moment of the operation, not at
//!   delivery time.
//! - `Attribute` names are canonical ASCII-lowercase.

use crate::node::NodeRef;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MutationNotice {
    /// Children were inserted into or removed from `target`.
    ChildList {
        target: NodeRef,
        added: Vec<NodeRef>,
        removed: Vec<NodeRef>,
        previous_sibling: Option<NodeRef>,
        next_sibling: Option<NodeRef>,
    },
    /// Text, comment or cdata content of `target` changed.
    CharacterData { target: NodeRef },
    /// Attribute `name` of `target` was set or removed.
    Attribute { target: NodeRef, name: String },
}

impl MutationNotice {
    pub fn target(&self) -> NodeRef {
        match self {
            MutationNotice::ChildList { target, .. }
            | MutationNotice::CharacterData { target }
            | MutationNotice::Attribute { target, .. } => *target,
        }
    }
}
