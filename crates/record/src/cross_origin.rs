//! Id translation for one cross-origin nested context.
//!
//! The nested session numbers its nodes in its own id space. Every remote id
//! that reaches this side gets a reserved id in the local mirror, so the
//! merged stream never reuses an id. The map also keeps the remote tree shape
//! so that a removal releases the whole subtree it takes down.

use bus::{AddedNode, AttributeMutation, MutationData, RemovedNode, TextMutation};
use core_types::NodeId;
use dom::NodeHandle;
use snapshot::{Mirror, SerializedNode, SerializedNodeWithId};
use std::collections::{HashMap, HashSet};

use crate::error::CaptureError;

#[derive(Debug, Default)]
pub(crate) struct CrossOriginIdMap {
    to_local: HashMap<NodeId, NodeId>,
    to_remote: HashMap<NodeId, NodeId>,
    parent: HashMap<NodeId, NodeId>,
    children: HashMap<NodeId, Vec<NodeId>>,
    /// Local id of the nested document node.
    context_root: Option<NodeId>,
}

impl CrossOriginIdMap {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn len(&self) -> usize {
        self.to_local.len()
    }

    pub(crate) fn context_root(&self) -> Option<NodeId> {
        self.context_root
    }

    pub(crate) fn local(&self, remote: NodeId) -> Option<NodeId> {
        self.to_local.get(&remote).copied()
    }

    pub(crate) fn remote(&self, local: NodeId) -> Option<NodeId> {
        self.to_remote.get(&local).copied()
    }

    /// Translate the full snapshot of the nested document.
    ///
    /// Anything imported before is released first.
    pub(crate) fn import_snapshot(
        &mut self,
        node: &SerializedNodeWithId,
        mirror: &mut Mirror<NodeHandle>,
    ) -> Result<SerializedNodeWithId, CaptureError> {
        self.release_all(mirror);
        let root = self.local_or_reserve(node.id, mirror)?;
        self.context_root = Some(root);
        self.import_tree(node, None, mirror)
    }

    /// Translate one mutation batch. Records that name unknown ids are
    /// dropped.
    pub(crate) fn import_batch(
        &mut self,
        data: &MutationData,
        mirror: &mut Mirror<NodeHandle>,
    ) -> Result<MutationData, CaptureError> {
        let mut out = MutationData {
            is_attach_iframe: data.is_attach_iframe,
            ..MutationData::default()
        };
        let mut limbo: Vec<NodeId> = Vec::new();

        for remove in &data.removes {
            let (Some(parent_id), Some(id)) = (self.local(remove.parent_id), self.local(remove.id))
            else {
                log::debug!(
                    target: "record.frames",
                    "dropping remove of unknown remote id {:?}",
                    remove.id
                );
                continue;
            };
            out.removes.push(RemovedNode { parent_id, id });
            self.unlink(remove.id);
            limbo.push(remove.id);
        }

        for add in &data.adds {
            let Some(parent_id) = self.local(add.parent_id) else {
                log::debug!(
                    target: "record.frames",
                    "dropping add under unknown remote id {:?}",
                    add.parent_id
                );
                continue;
            };
            let next_id = add.next_id.and_then(|next| self.local(next));
            let node = self.import_tree(&add.node, Some(add.parent_id), mirror)?;
            out.adds.push(AddedNode {
                parent_id,
                next_id,
                node,
            });
        }

        for text in &data.texts {
            if let Some(id) = self.local(text.id) {
                out.texts.push(TextMutation {
                    id,
                    value: text.value.clone(),
                });
            }
        }
        for attribute in &data.attributes {
            if let Some(id) = self.local(attribute.id) {
                out.attributes.push(AttributeMutation {
                    id,
                    attributes: attribute.attributes.clone(),
                });
            }
        }

        // removed subtrees that no add picked up again
        for remote in limbo {
            if !self.parent.contains_key(&remote) && self.to_local.contains_key(&remote) {
                self.release_subtree(remote, mirror);
            }
        }
        Ok(out)
    }

    /// Release `remote` and every remote id still attached below it.
    pub(crate) fn release_subtree(&mut self, remote: NodeId, mirror: &mut Mirror<NodeHandle>) {
        self.unlink(remote);
        let mut stack = vec![remote];
        while let Some(current) = stack.pop() {
            if let Some(children) = self.children.remove(&current) {
                for child in children {
                    self.parent.remove(&child);
                    stack.push(child);
                }
            }
            if let Some(local) = self.to_local.remove(&current) {
                self.to_remote.remove(&local);
                mirror.release(local);
            }
        }
    }

    pub(crate) fn release_all(&mut self, mirror: &mut Mirror<NodeHandle>) {
        for local in self.to_remote.keys() {
            mirror.release(*local);
        }
        self.to_local.clear();
        self.to_remote.clear();
        self.parent.clear();
        self.children.clear();
        self.context_root = None;
    }

    fn local_or_reserve(
        &mut self,
        remote: NodeId,
        mirror: &mut Mirror<NodeHandle>,
    ) -> Result<NodeId, CaptureError> {
        if let Some(local) = self.local(remote) {
            return Ok(local);
        }
        let local = mirror.reserve()?;
        self.to_local.insert(remote, local);
        self.to_remote.insert(local, remote);
        Ok(local)
    }

    fn unlink(&mut self, remote: NodeId) {
        if let Some(parent) = self.parent.remove(&remote)
            && let Some(siblings) = self.children.get_mut(&parent)
        {
            siblings.retain(|child| *child != remote);
        }
    }

    /// Map a described subtree into the local id space and record its shape.
    ///
    /// A described node replaces whatever children it had before; children
    /// it no longer lists are released unless they show up elsewhere.
    fn import_tree(
        &mut self,
        node: &SerializedNodeWithId,
        parent: Option<NodeId>,
        mirror: &mut Mirror<NodeHandle>,
    ) -> Result<SerializedNodeWithId, CaptureError> {
        let mut orphans: Vec<NodeId> = Vec::new();
        let imported = self.import_node(node, parent, mirror, &mut orphans)?;
        let adopted: HashSet<NodeId> = {
            let mut seen = HashSet::new();
            node.visit(&mut |n| {
                seen.insert(n.id);
            });
            seen
        };
        for orphan in orphans {
            if !adopted.contains(&orphan) && !self.parent.contains_key(&orphan) {
                self.release_subtree(orphan, mirror);
            }
        }
        Ok(imported)
    }

    fn import_node(
        &mut self,
        node: &SerializedNodeWithId,
        parent: Option<NodeId>,
        mirror: &mut Mirror<NodeHandle>,
        orphans: &mut Vec<NodeId>,
    ) -> Result<SerializedNodeWithId, CaptureError> {
        let local = self.local_or_reserve(node.id, mirror)?;
        self.unlink(node.id);
        if let Some(parent) = parent {
            self.parent.insert(node.id, parent);
            self.children.entry(parent).or_default().push(node.id);
        }
        if let Some(previous) = self.children.remove(&node.id) {
            for child in previous {
                self.parent.remove(&child);
                orphans.push(child);
            }
        }

        let root_id = match node.root_id {
            Some(remote_root) => Some(self.local(remote_root).or(self.context_root).ok_or(
                CaptureError::Remote("nested node refers to an unknown document"),
            )?),
            None => self.context_root.filter(|root| *root != local),
        };

        let mut child_nodes = Vec::with_capacity(node.children().len());
        for child in node.children() {
            child_nodes.push(self.import_node(child, Some(node.id), mirror, orphans)?);
        }
        let imported = match &node.node {
            SerializedNode::Document { .. } => SerializedNode::Document { child_nodes },
            SerializedNode::Element {
                tag_name,
                attributes,
                need_block,
                ..
            } => SerializedNode::Element {
                tag_name: tag_name.clone(),
                attributes: attributes.clone(),
                child_nodes,
                need_block: *need_block,
            },
            leaf => leaf.clone(),
        };
        Ok(SerializedNodeWithId {
            id: local,
            node: imported,
            root_id,
        })
    }
}
