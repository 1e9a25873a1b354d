use serde::{Deserialize, Serialize};

/// Mirror id carried on the wire. Strictly non-negative and unique within a
/// capture session; never reassigned to a different node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub u32);

impl NodeId {
    pub const FIRST: NodeId = NodeId(1);

    /// Following id, or `None` once the id space is used up.
    pub fn checked_next(self) -> Option<NodeId> {
        self.0.checked_add(1).map(NodeId)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocId(pub u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WindowId(pub u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ObserverId(pub u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerId(pub u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SessionId(pub u64);

/// Identifies one nested cross-origin context on the frame channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContextToken(pub u64);

impl ContextToken {
    /// Reserved sentinel; never valid on the wire.
    pub const INVALID: ContextToken = ContextToken(0);
}
