use core_types::NodeId;
use dom::{Document, NodeData, NodeHandle, NodeRef};
use std::collections::BTreeMap;

use crate::css::absolutize_urls;
use crate::error::SnapshotError;
use crate::mirror::Mirror;
use crate::policy::{NodePolicy, SCRIPT_PLACEHOLDER, Verdict, mask_text};
use crate::types::{SerializedNode, SerializedNodeWithId};
use crate::url::transform_attribute;

/// Callbacks fired while a subtree is being serialized.
pub trait SerializeHooks {
    /// An iframe-like element was serialized with `id`.
    fn on_iframe(&mut self, iframe: NodeHandle, id: NodeId);
}

/// Hooks that ignore everything.
pub struct NoHooks;

impl SerializeHooks for NoHooks {
    fn on_iframe(&mut self, _iframe: NodeHandle, _id: NodeId) {}
}

/// Collects discovered iframes in serialization order.
impl SerializeHooks for Vec<(NodeHandle, NodeId)> {
    fn on_iframe(&mut self, iframe: NodeHandle, id: NodeId) {
        self.push((iframe, id));
    }
}

#[derive(Clone, Copy, Debug)]
pub struct SerializeOptions<'a> {
    pub policy: &'a NodePolicy,
    /// Id of the nested document node, for nodes inside a nested context.
    pub root_id: Option<NodeId>,
}

/// Serialize `node` and its subtree, allocating mirror ids on the way.
///
/// Returns `Ok(None)` when the policy ignores `node`; it is then marked
/// ignored in the mirror. Nodes that already hold an id keep it.
pub fn serialize_node_with_id<H: SerializeHooks + ?Sized>(
    doc: &Document,
    node: NodeRef,
    mirror: &mut Mirror<NodeHandle>,
    options: &SerializeOptions<'_>,
    hooks: &mut H,
) -> Result<Option<SerializedNodeWithId>, SnapshotError> {
    let masked = options.policy.needs_masking(doc, node);
    let mut walker = Walker {
        doc,
        mirror,
        options,
        hooks,
    };
    walker.walk(node, masked)
}

struct Walker<'a, 'o, H: ?Sized> {
    doc: &'a Document,
    mirror: &'a mut Mirror<NodeHandle>,
    options: &'a SerializeOptions<'o>,
    hooks: &'a mut H,
}

impl<H: SerializeHooks + ?Sized> Walker<'_, '_, H> {
    fn walk(
        &mut self,
        node: NodeRef,
        masked: bool,
    ) -> Result<Option<SerializedNodeWithId>, SnapshotError> {
        let doc = self.doc;
        let data = doc.data(node).ok_or(SnapshotError::StaleNode(node))?;
        let handle = NodeHandle::new(doc.id(), node);
        let policy = self.options.policy;

        let verdict = policy.verdict(data);
        if verdict == Verdict::Ignore {
            self.mirror.mark_ignored(handle);
            return Ok(None);
        }
        let id = self.mirror.allocate(handle)?;

        let serialized = match data {
            NodeData::Document => SerializedNode::Document {
                child_nodes: self.children(node, masked)?,
            },
            NodeData::DocumentType {
                name,
                public_id,
                system_id,
            } => SerializedNode::DocumentType {
                name: name.clone(),
                public_id: public_id.clone(),
                system_id: system_id.clone(),
            },
            NodeData::Element { tag, attributes } => {
                let need_block = verdict == Verdict::Block;
                let attributes: BTreeMap<String, String> = if need_block {
                    attributes
                        .iter()
                        .filter(|(name, _)| name == "class")
                        .map(|(name, value)| (name.clone(), value.clone()))
                        .collect()
                } else {
                    attributes
                        .iter()
                        .map(|(name, value)| {
                            (name.clone(), transform_attribute(doc.url(), tag, name, value))
                        })
                        .collect()
                };
                let child_nodes = if need_block {
                    Vec::new()
                } else {
                    let masked = masked || data.has_class(&policy.mask_text_class);
                    self.children(node, masked)?
                };
                if data.is_frame_element() {
                    self.hooks.on_iframe(handle, id);
                }
                SerializedNode::Element {
                    tag_name: tag.clone(),
                    attributes,
                    child_nodes,
                    need_block,
                }
            }
            NodeData::Text(text) => {
                let parent_tag = doc.parent(node).and_then(|p| doc.tag_name(p));
                match parent_tag {
                    Some("style") => SerializedNode::Text {
                        text_content: absolutize_urls(text, doc.url()),
                        is_style: true,
                    },
                    Some("script") => SerializedNode::Text {
                        text_content: SCRIPT_PLACEHOLDER.to_string(),
                        is_style: false,
                    },
                    _ => SerializedNode::Text {
                        text_content: if masked { mask_text(text) } else { text.clone() },
                        is_style: false,
                    },
                }
            }
            NodeData::Comment(text) => SerializedNode::Comment {
                text_content: text.clone(),
            },
            NodeData::CData(text) => SerializedNode::CData {
                text_content: text.clone(),
            },
        };

        Ok(Some(SerializedNodeWithId {
            id,
            node: serialized,
            root_id: self.options.root_id.filter(|root| *root != id),
        }))
    }

    fn children(
        &mut self,
        node: NodeRef,
        masked: bool,
    ) -> Result<Vec<SerializedNodeWithId>, SnapshotError> {
        let doc = self.doc;
        let mut out = Vec::with_capacity(doc.children(node).len());
        for &child in doc.children(node) {
            if let Some(serialized) = self.walk(child, masked)? {
                out.push(serialized);
            }
        }
        Ok(out)
    }
}

/// Text as it is recorded for a character-data change on `node`.
pub fn serialize_text_value(doc: &Document, node: NodeRef, policy: &NodePolicy) -> Option<String> {
    let text = doc.data(node)?.character_data()?;
    let parent_tag = doc.parent(node).and_then(|p| doc.tag_name(p));
    Some(match parent_tag {
        Some("style") => absolutize_urls(text, doc.url()),
        Some("script") => SCRIPT_PLACEHOLDER.to_string(),
        _ if policy.needs_masking(doc, node) => mask_text(text),
        _ => text.to_string(),
    })
}
