use core_types::NodeId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Self-contained description of one node kind, as carried on the wire.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum SerializedNode {
    Document {
        child_nodes: Vec<SerializedNodeWithId>,
    },
    DocumentType {
        name: String,
        public_id: String,
        system_id: String,
    },
    Element {
        tag_name: String,
        attributes: BTreeMap<String, String>,
        child_nodes: Vec<SerializedNodeWithId>,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        need_block: bool,
    },
    Text {
        text_content: String,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        is_style: bool,
    },
    Comment {
        text_content: String,
    },
    #[serde(rename = "cdata")]
    CData {
        text_content: String,
    },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SerializedNodeWithId {
    pub id: NodeId,
    #[serde(flatten)]
    pub node: SerializedNode,
    /// Id of the nested document this node belongs to, when not top-level.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_id: Option<NodeId>,
}

impl SerializedNodeWithId {
    pub fn children(&self) -> &[SerializedNodeWithId] {
        match &self.node {
            SerializedNode::Document { child_nodes } | SerializedNode::Element { child_nodes, .. } => {
                child_nodes
            }
            _ => &[],
        }
    }

    pub fn children_mut(&mut self) -> Option<&mut Vec<SerializedNodeWithId>> {
        match &mut self.node {
            SerializedNode::Document { child_nodes } | SerializedNode::Element { child_nodes, .. } => {
                Some(child_nodes)
            }
            _ => None,
        }
    }

    /// Pre-order visit of this node and every described descendant.
    pub fn visit(&self, f: &mut impl FnMut(&SerializedNodeWithId)) {
        f(self);
        for child in self.children() {
            child.visit(f);
        }
    }

    /// Pre-order mutable visit, used to rewrite ids.
    pub fn visit_mut(&mut self, f: &mut impl FnMut(&mut SerializedNodeWithId)) {
        f(self);
        if let Some(children) = self.children_mut() {
            for child in children {
                child.visit_mut(f);
            }
        }
    }

    pub fn tag_name(&self) -> Option<&str> {
        match &self.node {
            SerializedNode::Element { tag_name, .. } => Some(tag_name),
            _ => None,
        }
    }
}
