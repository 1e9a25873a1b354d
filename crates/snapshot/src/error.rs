use core_types::NodeId;
use thiserror::Error;

/// Failures of the id table. All but `Exhausted` are programming errors,
/// never a reaction to unusual documents.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum MirrorError {
    #[error("id {0:?} is already bound to another node")]
    DuplicateId(NodeId),
    #[error("id {id:?} does not resolve back to the node that holds it")]
    Inconsistent { id: NodeId },
    #[error("mirror ran out of ids")]
    Exhausted,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SnapshotError {
    #[error(transparent)]
    Mirror(#[from] MirrorError),
    #[error("node {0:?} is not live in its document")]
    StaleNode(dom::NodeRef),
}
