use core_types::NodeId;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReplayError {
    #[error("no full snapshot applied yet")]
    MissingRoot,
    #[error("unknown node id {0:?}")]
    MissingNode(NodeId),
    #[error("node {child:?} is not a child of {parent:?}")]
    NotAChild { parent: NodeId, child: NodeId },
    #[error("{next:?} is not a child of {parent:?}")]
    InvalidSibling { parent: NodeId, next: NodeId },
    #[error("node {0:?} cannot hold children")]
    InvalidParent(NodeId),
    #[error("inserting {child:?} under {parent:?} would create a cycle")]
    CycleDetected { parent: NodeId, child: NodeId },
    #[error("node {0:?} has the wrong kind for this change")]
    WrongNodeKind(NodeId),
}
