use core_types::{DocId, SessionId, WindowId};
use thiserror::Error;

use crate::node::NodeRef;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomError {
    #[error("stale or unknown node handle {0:?}")]
    StaleNode(NodeRef),
    #[error("node {child:?} is not a child of {parent:?}")]
    NotAChild { parent: NodeRef, child: NodeRef },
    #[error("hierarchy request rejected: {0}")]
    Hierarchy(&'static str),
    #[error("operation not valid for node kind of {0:?}")]
    WrongKind(NodeRef),
}

#[derive(Debug, Error)]
pub enum HostError {
    #[error("unknown document {0:?}")]
    UnknownDocument(DocId),
    #[error("unknown window {0:?}")]
    UnknownWindow(WindowId),
    #[error("invalid url {url:?}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("node {0:?} is not a frame element")]
    NotAFrameElement(NodeRef),
    #[error("document {doc:?} is already captured by session {owner:?}")]
    AlreadyCaptured { doc: DocId, owner: SessionId },
    #[error(transparent)]
    Dom(#[from] DomError),
}
