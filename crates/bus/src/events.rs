use core_types::NodeId;
use serde::{Deserialize, Serialize};
use snapshot::SerializedNodeWithId;
use std::collections::BTreeMap;

/// One record of the capture stream.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum CaptureEvent {
    Meta { href: String },
    FullSnapshot { node: SerializedNodeWithId },
    IncrementalSnapshot { data: IncrementalData },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "camelCase")]
pub enum IncrementalData {
    Mutation(MutationData),
}

impl CaptureEvent {
    pub fn mutation(data: MutationData) -> Self {
        CaptureEvent::IncrementalSnapshot {
            data: IncrementalData::Mutation(data),
        }
    }

    pub fn as_mutation(&self) -> Option<&MutationData> {
        match self {
            CaptureEvent::IncrementalSnapshot {
                data: IncrementalData::Mutation(data),
            } => Some(data),
            _ => None,
        }
    }
}

/// Structural, text and attribute changes of one batch.
///
/// Invariants:
/// - Every id was introduced by the initial snapshot, by an earlier batch or
///   by an `adds` entry of this batch.
/// - A moved node appears once, as an `adds` entry reusing its id; it never
///   appears in `removes` of the same batch.
/// - `removes` never lists a node whose former parent is removed in the
///   same batch.
/// - Consumers apply `removes`, then `adds` in order, then `texts`, then
///   `attributes`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MutationData {
    pub removes: Vec<RemovedNode>,
    pub adds: Vec<AddedNode>,
    pub texts: Vec<TextMutation>,
    pub attributes: Vec<AttributeMutation>,
    /// The adds splice a nested document under its iframe element.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_attach_iframe: bool,
}

impl MutationData {
    pub fn is_empty(&self) -> bool {
        self.removes.is_empty()
            && self.adds.is_empty()
            && self.texts.is_empty()
            && self.attributes.is_empty()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemovedNode {
    pub parent_id: NodeId,
    pub id: NodeId,
}

/// Insert `node` under `parent_id` before `next_id` (append when `None`).
/// When `node.id` is already known the existing node is relocated and its
/// subtree replaced by the description.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddedNode {
    pub parent_id: NodeId,
    pub next_id: Option<NodeId>,
    pub node: SerializedNodeWithId,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextMutation {
    pub id: NodeId,
    pub value: String,
}

/// Final attribute values; `None` means the attribute was removed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeMutation {
    pub id: NodeId,
    pub attributes: BTreeMap<String, Option<String>>,
}
