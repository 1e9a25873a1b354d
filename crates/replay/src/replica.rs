use bus::{AddedNode, CaptureEvent, IncrementalData, MutationData};
use core_types::NodeId;
use snapshot::css::{BuildCache, adapt_css_for_replay};
use snapshot::{SerializedNode, SerializedNodeWithId};
use std::collections::{BTreeMap, HashMap, HashSet};

/// Id-keyed document tree rebuilt from a capture stream.
///
/// A nested document is not a child of its iframe element: it hangs in the
/// element's content slot, so describing the element again keeps it.
#[derive(Default)]
pub struct Replica {
    nodes: HashMap<NodeId, ReplicaNode>,
    root: Option<NodeId>,
    href: Option<String>,
    cache: BuildCache,
}

struct ReplicaNode {
    kind: ReplicaKind,
    root_id: Option<NodeId>,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    content: Option<NodeId>,
}

impl ReplicaNode {
    fn allows_children(&self) -> bool {
        matches!(self.kind, ReplicaKind::Document | ReplicaKind::Element { .. })
    }
}

enum ReplicaKind {
    Document,
    DocumentType {
        name: String,
        public_id: String,
        system_id: String,
    },
    Element {
        tag: String,
        attributes: BTreeMap<String, String>,
        need_block: bool,
    },
    Text {
        text: String,
        is_style: bool,
    },
    Comment(String),
    CData(String),
}

impl ReplicaKind {
    fn from_serialized(node: &SerializedNode) -> Self {
        match node {
            SerializedNode::Document { .. } => ReplicaKind::Document,
            SerializedNode::DocumentType {
                name,
                public_id,
                system_id,
            } => ReplicaKind::DocumentType {
                name: name.clone(),
                public_id: public_id.clone(),
                system_id: system_id.clone(),
            },
            SerializedNode::Element {
                tag_name,
                attributes,
                need_block,
                ..
            } => ReplicaKind::Element {
                tag: tag_name.clone(),
                attributes: attributes.clone(),
                need_block: *need_block,
            },
            SerializedNode::Text {
                text_content,
                is_style,
            } => ReplicaKind::Text {
                text: text_content.clone(),
                is_style: *is_style,
            },
            SerializedNode::Comment { text_content } => ReplicaKind::Comment(text_content.clone()),
            SerializedNode::CData { text_content } => ReplicaKind::CData(text_content.clone()),
        }
    }
}

impl Replica {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
        self.root = None;
        self.href = None;
        self.cache.clear();
    }

    pub fn root(&self) -> Option<NodeId> {
        self.root
    }

    pub fn href(&self) -> Option<&str> {
        self.href.as_deref()
    }

    /// Live nodes, nested documents included.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn parent_of(&self, id: NodeId) -> Option<NodeId> {
        self.nodes.get(&id)?.parent
    }

    pub fn children_of(&self, id: NodeId) -> &[NodeId] {
        self.nodes.get(&id).map_or(&[], |n| n.children.as_slice())
    }

    /// Root of the nested document attached to an iframe-like element.
    pub fn content_of(&self, id: NodeId) -> Option<NodeId> {
        self.nodes.get(&id)?.content
    }

    pub fn apply(&mut self, event: &CaptureEvent) -> Result<(), crate::ReplayError> {
        match event {
            CaptureEvent::Meta { href } => {
                self.href = Some(href.clone());
                Ok(())
            }
            CaptureEvent::FullSnapshot { node } => {
                self.nodes.clear();
                self.root = None;
                let mut limbo = Vec::new();
                let root = self.place(node, &mut limbo)?;
                self.root = Some(root);
                log::debug!(target: "replay", "full snapshot with {} nodes", self.nodes.len());
                Ok(())
            }
            CaptureEvent::IncrementalSnapshot {
                data: IncrementalData::Mutation(data),
            } => self.apply_mutation(data),
        }
    }

    /// Apply one batch: removals, then additions in order, then texts, then
    /// attributes.
    pub fn apply_mutation(&mut self, data: &MutationData) -> Result<(), crate::ReplayError> {
        use crate::ReplayError;

        if self.root.is_none() {
            return Err(ReplayError::MissingRoot);
        }
        let mut dropped = HashSet::new();
        for remove in &data.removes {
            let Some(node) = self.nodes.get(&remove.id) else {
                if dropped.contains(&remove.id) {
                    log::debug!(
                        target: "replay",
                        "node {:?} already removed with an ancestor",
                        remove.id
                    );
                    continue;
                }
                return Err(ReplayError::MissingNode(remove.id));
            };
            if node.parent != Some(remove.parent_id) {
                return Err(ReplayError::NotAChild {
                    parent: remove.parent_id,
                    child: remove.id,
                });
            }
            dropped.extend(self.remove_subtree(remove.id));
        }

        let mut limbo = Vec::new();
        for add in &data.adds {
            self.add(add, data.is_attach_iframe, &mut limbo)?;
        }
        for id in limbo {
            if self.nodes.get(&id).is_some_and(|n| n.parent.is_none()) && self.root != Some(id) {
                self.remove_subtree(id);
            }
        }

        for text in &data.texts {
            let node = self
                .nodes
                .get_mut(&text.id)
                .ok_or(ReplayError::MissingNode(text.id))?;
            match &mut node.kind {
                ReplicaKind::Text { text: existing, .. }
                | ReplicaKind::Comment(existing)
                | ReplicaKind::CData(existing) => {
                    existing.clear();
                    existing.push_str(&text.value);
                }
                _ => return Err(ReplayError::WrongNodeKind(text.id)),
            }
        }

        for change in &data.attributes {
            let node = self
                .nodes
                .get_mut(&change.id)
                .ok_or(ReplayError::MissingNode(change.id))?;
            let ReplicaKind::Element { attributes, .. } = &mut node.kind else {
                return Err(ReplayError::WrongNodeKind(change.id));
            };
            for (name, value) in &change.attributes {
                match value {
                    Some(value) => {
                        attributes.insert(name.clone(), value.clone());
                    }
                    None => {
                        attributes.remove(name);
                    }
                }
            }
        }
        Ok(())
    }

    fn add(
        &mut self,
        add: &AddedNode,
        attach: bool,
        limbo: &mut Vec<NodeId>,
    ) -> Result<(), crate::ReplayError> {
        use crate::ReplayError;

        let parent = add.parent_id;
        let parent_node = self
            .nodes
            .get(&parent)
            .ok_or(ReplayError::MissingNode(parent))?;
        if !parent_node.allows_children() {
            return Err(ReplayError::InvalidParent(parent));
        }
        let is_document = matches!(add.node.node, SerializedNode::Document { .. });
        if attach && !is_document {
            return Err(ReplayError::WrongNodeKind(add.node.id));
        }
        if self.nodes.contains_key(&add.node.id) && self.is_inclusive_ancestor(add.node.id, parent)
        {
            debug_assert!(false, "add would move a node below itself");
            return Err(ReplayError::CycleDetected {
                parent,
                child: add.node.id,
            });
        }
        if let Some(next) = add.next_id
            && self.nodes.get(&next).and_then(|n| n.parent) != Some(parent)
        {
            return Err(ReplayError::InvalidSibling { parent, next });
        }

        let id = self.place(&add.node, limbo)?;
        if is_document {
            let previous = self.nodes.get_mut(&parent).and_then(|p| p.content.replace(id));
            if let Some(previous) = previous.filter(|p| *p != id) {
                self.remove_subtree(previous);
            }
        } else {
            let siblings = &mut self
                .nodes
                .get_mut(&parent)
                .ok_or(ReplayError::MissingNode(parent))?
                .children;
            let position = add
                .next_id
                .and_then(|next| siblings.iter().position(|s| *s == next))
                .unwrap_or(siblings.len());
            siblings.insert(position, id);
        }
        if let Some(node) = self.nodes.get_mut(&id) {
            node.parent = Some(parent);
        }
        Ok(())
    }

    /// Create or relocate the described subtree, leaving its top detached.
    ///
    /// A known id keeps its content slot; its children become exactly the
    /// described ones and former children are queued in `limbo`.
    fn place(
        &mut self,
        desc: &SerializedNodeWithId,
        limbo: &mut Vec<NodeId>,
    ) -> Result<NodeId, crate::ReplayError> {
        let id = desc.id;
        let kind = ReplicaKind::from_serialized(&desc.node);
        if self.nodes.contains_key(&id) {
            self.unlink(id);
            let keep: HashSet<NodeId> = desc.children().iter().map(|c| c.id).collect();
            let previous = match self.nodes.get_mut(&id) {
                Some(node) => {
                    node.kind = kind;
                    node.root_id = desc.root_id;
                    std::mem::take(&mut node.children)
                }
                None => Vec::new(),
            };
            for child in previous {
                if let Some(node) = self.nodes.get_mut(&child) {
                    node.parent = None;
                }
                if !keep.contains(&child) {
                    limbo.push(child);
                }
            }
        } else {
            self.nodes.insert(
                id,
                ReplicaNode {
                    kind,
                    root_id: desc.root_id,
                    parent: None,
                    children: Vec::new(),
                    content: None,
                },
            );
        }

        let children = desc.children();
        if !children.is_empty() && !self.nodes.get(&id).is_some_and(|n| n.allows_children()) {
            return Err(crate::ReplayError::InvalidParent(id));
        }
        let mut placed = Vec::with_capacity(children.len());
        for child in children {
            let child_id = self.place(child, limbo)?;
            if let Some(node) = self.nodes.get_mut(&child_id) {
                node.parent = Some(id);
            }
            placed.push(child_id);
        }
        if let Some(node) = self.nodes.get_mut(&id) {
            node.children = placed;
        }
        Ok(id)
    }

    fn unlink(&mut self, id: NodeId) {
        let Some(parent) = self.nodes.get_mut(&id).and_then(|n| n.parent.take()) else {
            return;
        };
        if let Some(parent) = self.nodes.get_mut(&parent) {
            if parent.content == Some(id) {
                parent.content = None;
            } else {
                parent.children.retain(|c| *c != id);
            }
        }
    }

    /// Drop `id` and everything below it, returning the dropped ids.
    fn remove_subtree(&mut self, id: NodeId) -> Vec<NodeId> {
        self.unlink(id);
        let mut dropped = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            if let Some(node) = self.nodes.remove(&current) {
                dropped.push(current);
                stack.extend(node.children);
                stack.extend(node.content);
            }
        }
        if self.root == Some(id) {
            self.root = None;
        }
        dropped
    }

    fn is_inclusive_ancestor(&self, ancestor: NodeId, mut node: NodeId) -> bool {
        loop {
            if node == ancestor {
                return true;
            }
            match self.nodes.get(&node).and_then(|n| n.parent) {
                Some(parent) => node = parent,
                None => return false,
            }
        }
    }

    /// The top document as recorded.
    pub fn materialize(&self) -> Result<SerializedNodeWithId, crate::ReplayError> {
        let root = self.root.ok_or(crate::ReplayError::MissingRoot)?;
        self.materialize_from(root)
    }

    /// The subtree at `id` as recorded; nested documents are not inlined.
    pub fn materialize_from(&self, id: NodeId) -> Result<SerializedNodeWithId, crate::ReplayError> {
        let node = self
            .nodes
            .get(&id)
            .ok_or(crate::ReplayError::MissingNode(id))?;
        let child_nodes = node
            .children
            .iter()
            .map(|child| self.materialize_from(*child))
            .collect::<Result<Vec<_>, _>>()?;
        let serialized = match &node.kind {
            ReplicaKind::Document => SerializedNode::Document { child_nodes },
            ReplicaKind::DocumentType {
                name,
                public_id,
                system_id,
            } => SerializedNode::DocumentType {
                name: name.clone(),
                public_id: public_id.clone(),
                system_id: system_id.clone(),
            },
            ReplicaKind::Element {
                tag,
                attributes,
                need_block,
            } => SerializedNode::Element {
                tag_name: tag.clone(),
                attributes: attributes.clone(),
                child_nodes,
                need_block: *need_block,
            },
            ReplicaKind::Text { text, is_style } => SerializedNode::Text {
                text_content: text.clone(),
                is_style: *is_style,
            },
            ReplicaKind::Comment(text) => SerializedNode::Comment {
                text_content: text.clone(),
            },
            ReplicaKind::CData(text) => SerializedNode::CData {
                text_content: text.clone(),
            },
        };
        Ok(SerializedNodeWithId {
            id,
            node: serialized,
            root_id: node.root_id,
        })
    }

    /// Like [`Replica::materialize_from`], with style text adapted for a
    /// replay surface (`:hover` rules and device media features).
    pub fn render(&mut self, id: NodeId) -> Result<SerializedNodeWithId, crate::ReplayError> {
        let mut tree = self.materialize_from(id)?;
        let cache = &mut self.cache;
        tree.visit_mut(&mut |node| {
            if let SerializedNode::Text {
                text_content,
                is_style: true,
            } = &mut node.node
            {
                *text_content = adapt_css_for_replay(text_content, cache);
            }
        });
        Ok(tree)
    }

    /// Number of style texts memoized by [`Replica::render`].
    pub fn cached_styles(&self) -> usize {
        self.cache.len()
    }
}
