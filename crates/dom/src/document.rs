use core_types::{DocId, ObserverId};
use std::sync::mpsc::{self, Receiver, Sender};

use crate::error::DomError;
use crate::node::{NodeData, NodeKind, NodeRef};
use crate::notice::MutationNotice;

/// An observable document tree backed by a generational arena.
///
/// Tree operations mirror DOM semantics closely enough for capture: every
/// structural, attribute or character-data change is reported to all
/// connected observers as a [`MutationNotice`].
pub struct Document {
    id: DocId,
    url: String,
    slots: Vec<Slot>,
    free: Vec<u32>,
    root: NodeRef,
    ready: bool,
    observers: Vec<(ObserverId, Sender<MutationNotice>)>,
    next_observer: u32,
}

struct Slot {
    generation: u32,
    entry: Option<NodeEntry>,
}

struct NodeEntry {
    data: NodeData,
    parent: Option<NodeRef>,
    children: Vec<NodeRef>,
}

impl Document {
    pub fn new(id: DocId, url: impl Into<String>) -> Self {
        let mut doc = Self {
            id,
            url: url.into(),
            slots: Vec::new(),
            free: Vec::new(),
            root: NodeRef {
                index: 0,
                generation: 0,
            },
            ready: false,
            observers: Vec::new(),
            next_observer: 1,
        };
        doc.root = doc.alloc(NodeData::Document);
        doc
    }

    pub fn id(&self) -> DocId {
        self.id
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn root(&self) -> NodeRef {
        self.root
    }

    /// Load state: a nested document becomes serializable once ready.
    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub(crate) fn set_ready(&mut self, ready: bool) {
        self.ready = ready;
    }

    // ---- creation -------------------------------------------------------

    pub fn create_element(&mut self, tag: &str) -> NodeRef {
        self.alloc(NodeData::Element {
            tag: tag.to_ascii_lowercase(),
            attributes: Vec::new(),
        })
    }

    pub fn create_element_with(&mut self, tag: &str, attributes: &[(&str, &str)]) -> NodeRef {
        self.alloc(NodeData::Element {
            tag: tag.to_ascii_lowercase(),
            attributes: attributes
                .iter()
                .map(|(k, v)| (k.to_ascii_lowercase(), (*v).to_string()))
                .collect(),
        })
    }

    pub fn create_text(&mut self, text: &str) -> NodeRef {
        self.alloc(NodeData::Text(text.to_string()))
    }

    pub fn create_comment(&mut self, text: &str) -> NodeRef {
        self.alloc(NodeData::Comment(text.to_string()))
    }

    pub fn create_cdata(&mut self, text: &str) -> NodeRef {
        self.alloc(NodeData::CData(text.to_string()))
    }

    pub fn create_doctype(&mut self, name: &str, public_id: &str, system_id: &str) -> NodeRef {
        self.alloc(NodeData::DocumentType {
            name: name.to_string(),
            public_id: public_id.to_string(),
            system_id: system_id.to_string(),
        })
    }

    fn alloc(&mut self, data: NodeData) -> NodeRef {
        let entry = NodeEntry {
            data,
            parent: None,
            children: Vec::new(),
        };
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.entry = Some(entry);
            return NodeRef {
                index,
                generation: slot.generation,
            };
        }
        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            entry: Some(entry),
        });
        NodeRef {
            index,
            generation: 0,
        }
    }

    // ---- structure ------------------------------------------------------

    pub fn append_child(&mut self, parent: NodeRef, child: NodeRef) -> Result<(), DomError> {
        self.insert_before(parent, child, None)
    }

    /// Insert `child` under `parent` before `before` (append when `None`).
    ///
    /// An attached `child` is first detached from its current parent, which
    /// is reported as a separate removal notice.
    pub fn insert_before(
        &mut self,
        parent: NodeRef,
        child: NodeRef,
        before: Option<NodeRef>,
    ) -> Result<(), DomError> {
        if !self.entry(parent)?.data.allows_children() {
            return Err(DomError::Hierarchy("parent cannot have children"));
        }
        let child_kind = self.entry(child)?.data.kind();
        if child_kind == NodeKind::Document {
            return Err(DomError::Hierarchy("document cannot be inserted"));
        }
        if self.is_inclusive_ancestor(child, parent) {
            return Err(DomError::Hierarchy("insertion would create a cycle"));
        }
        let mut before = before;
        if before == Some(child) {
            before = self.next_sibling(child);
        }
        if let Some(reference) = before {
            if self.entry(reference)?.parent != Some(parent) {
                return Err(DomError::NotAChild {
                    parent,
                    child: reference,
                });
            }
        }

        if let Some(old_parent) = self.entry(child)?.parent {
            self.detach(old_parent, child)?;
        }

        let siblings = &mut self.entry_mut(parent)?.children;
        let pos = match before {
            Some(reference) => siblings
                .iter()
                .position(|k| *k == reference)
                .unwrap_or(siblings.len()),
            None => siblings.len(),
        };
        siblings.insert(pos, child);
        let previous_sibling = pos.checked_sub(1).map(|i| siblings[i]);
        let next_sibling = siblings.get(pos + 1).copied();
        self.entry_mut(child)?.parent = Some(parent);

        self.notify(MutationNotice::ChildList {
            target: parent,
            added: vec![child],
            removed: Vec::new(),
            previous_sibling,
            next_sibling,
        });
        Ok(())
    }

    pub fn remove_child(&mut self, parent: NodeRef, child: NodeRef) -> Result<(), DomError> {
        if self.entry(child)?.parent != Some(parent) {
            return Err(DomError::NotAChild { parent, child });
        }
        self.detach(parent, child)
    }

    /// Detach `node` from its parent; no-op for detached nodes.
    pub fn remove(&mut self, node: NodeRef) -> Result<(), DomError> {
        match self.entry(node)?.parent {
            Some(parent) => self.detach(parent, node),
            None => Ok(()),
        }
    }

    fn detach(&mut self, parent: NodeRef, child: NodeRef) -> Result<(), DomError> {
        let siblings = &mut self.entry_mut(parent)?.children;
        let pos = siblings
            .iter()
            .position(|k| *k == child)
            .ok_or(DomError::NotAChild { parent, child })?;
        siblings.remove(pos);
        let previous_sibling = pos.checked_sub(1).map(|i| siblings[i]);
        let next_sibling = siblings.get(pos).copied();
        self.entry_mut(child)?.parent = None;

        self.notify(MutationNotice::ChildList {
            target: parent,
            added: Vec::new(),
            removed: vec![child],
            previous_sibling,
            next_sibling,
        });
        Ok(())
    }

    /// Free a detached subtree. Handles into it become stale.
    pub fn destroy(&mut self, node: NodeRef) -> Result<Vec<NodeRef>, DomError> {
        if node == self.root {
            return Err(DomError::Hierarchy("document root cannot be destroyed"));
        }
        if self.entry(node)?.parent.is_some() {
            return Err(DomError::Hierarchy("only detached nodes can be destroyed"));
        }
        let freed = self.subtree(node);
        for key in &freed {
            let slot = &mut self.slots[key.index as usize];
            slot.entry = None;
            slot.generation = slot.generation.wrapping_add(1);
            self.free.push(key.index);
        }
        Ok(freed)
    }

    // ---- content --------------------------------------------------------

    pub fn set_attribute(&mut self, node: NodeRef, name: &str, value: &str) -> Result<(), DomError> {
        let name = name.to_ascii_lowercase();
        match &mut self.entry_mut(node)?.data {
            NodeData::Element { attributes, .. } => {
                match attributes.iter_mut().find(|(k, _)| *k == name) {
                    Some((_, existing)) => *existing = value.to_string(),
                    None => attributes.push((name.clone(), value.to_string())),
                }
            }
            _ => return Err(DomError::WrongKind(node)),
        }
        self.notify(MutationNotice::Attribute { target: node, name });
        Ok(())
    }

    pub fn remove_attribute(&mut self, node: NodeRef, name: &str) -> Result<(), DomError> {
        let name = name.to_ascii_lowercase();
        let removed = match &mut self.entry_mut(node)?.data {
            NodeData::Element { attributes, .. } => {
                let before = attributes.len();
                attributes.retain(|(k, _)| *k != name);
                attributes.len() != before
            }
            _ => return Err(DomError::WrongKind(node)),
        };
        if removed {
            self.notify(MutationNotice::Attribute { target: node, name });
        }
        Ok(())
    }

    pub fn set_text(&mut self, node: NodeRef, text: &str) -> Result<(), DomError> {
        match &mut self.entry_mut(node)?.data {
            NodeData::Text(existing) | NodeData::Comment(existing) | NodeData::CData(existing) => {
                existing.clear();
                existing.push_str(text);
            }
            _ => return Err(DomError::WrongKind(node)),
        }
        self.notify(MutationNotice::CharacterData { target: node });
        Ok(())
    }

    // ---- queries --------------------------------------------------------

    pub fn is_live(&self, node: NodeRef) -> bool {
        self.entry(node).is_ok()
    }

    pub fn data(&self, node: NodeRef) -> Option<&NodeData> {
        self.entry(node).ok().map(|e| &e.data)
    }

    pub fn kind(&self, node: NodeRef) -> Option<NodeKind> {
        self.data(node).map(NodeData::kind)
    }

    pub fn tag_name(&self, node: NodeRef) -> Option<&str> {
        self.data(node).and_then(NodeData::tag_name)
    }

    pub fn attribute(&self, node: NodeRef, name: &str) -> Option<&str> {
        self.data(node).and_then(|d| d.attribute(name))
    }

    pub fn parent(&self, node: NodeRef) -> Option<NodeRef> {
        self.entry(node).ok().and_then(|e| e.parent)
    }

    pub fn children(&self, node: NodeRef) -> &[NodeRef] {
        match self.entry(node) {
            Ok(entry) => &entry.children,
            Err(_) => &[],
        }
    }

    pub fn first_child(&self, node: NodeRef) -> Option<NodeRef> {
        self.children(node).first().copied()
    }

    pub fn next_sibling(&self, node: NodeRef) -> Option<NodeRef> {
        let parent = self.parent(node)?;
        let siblings = self.children(parent);
        let pos = siblings.iter().position(|k| *k == node)?;
        siblings.get(pos + 1).copied()
    }

    pub fn previous_sibling(&self, node: NodeRef) -> Option<NodeRef> {
        let parent = self.parent(node)?;
        let siblings = self.children(parent);
        let pos = siblings.iter().position(|k| *k == node)?;
        pos.checked_sub(1).map(|i| siblings[i])
    }

    /// True when `ancestor` is `node` or one of its ancestors.
    pub fn is_inclusive_ancestor(&self, ancestor: NodeRef, node: NodeRef) -> bool {
        let mut current = Some(node);
        while let Some(key) = current {
            if key == ancestor {
                return true;
            }
            current = self.parent(key);
        }
        false
    }

    /// True when the node is reachable from the document root.
    pub fn is_connected(&self, node: NodeRef) -> bool {
        self.is_live(node) && self.is_inclusive_ancestor(self.root, node)
    }

    /// Number of live nodes, attached or not.
    pub fn node_count(&self) -> usize {
        self.slots.iter().filter(|s| s.entry.is_some()).count()
    }

    /// Pre-order list of `node` and its descendants.
    pub fn subtree(&self, node: NodeRef) -> Vec<NodeRef> {
        crate::traverse::descendants(self, node).collect()
    }

    // ---- observation ----------------------------------------------------

    pub fn observe(&mut self) -> (ObserverId, Receiver<MutationNotice>) {
        let id = ObserverId(self.next_observer);
        self.next_observer += 1;
        let (tx, rx) = mpsc::channel();
        self.observers.push((id, tx));
        (id, rx)
    }

    pub fn disconnect(&mut self, observer: ObserverId) -> bool {
        let before = self.observers.len();
        self.observers.retain(|(id, _)| *id != observer);
        self.observers.len() != before
    }

    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }

    fn notify(&mut self, notice: MutationNotice) {
        if self.observers.is_empty() {
            return;
        }
        self.observers.retain(|(id, tx)| {
            let delivered = tx.send(notice.clone()).is_ok();
            if !delivered {
                log::trace!(target: "dom.observe", "pruning dropped observer {id:?}");
            }
            delivered
        });
    }

    // ---- arena access ---------------------------------------------------

    fn entry(&self, node: NodeRef) -> Result<&NodeEntry, DomError> {
        self.slots
            .get(node.index as usize)
            .filter(|slot| slot.generation == node.generation)
            .and_then(|slot| slot.entry.as_ref())
            .ok_or(DomError::StaleNode(node))
    }

    fn entry_mut(&mut self, node: NodeRef) -> Result<&mut NodeEntry, DomError> {
        self.slots
            .get_mut(node.index as usize)
            .filter(|slot| slot.generation == node.generation)
            .and_then(|slot| slot.entry.as_mut())
            .ok_or(DomError::StaleNode(node))
    }
}

impl std::fmt::Debug for Document {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Document")
            .field("id", &self.id)
            .field("url", &self.url)
            .field("nodes", &self.node_count())
            .field("ready", &self.ready)
            .field("observers", &self.observers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc() -> Document {
        Document::new(DocId(1), "https://example.com/")
    }

    #[test]
    fn reparenting_reports_removal_before_insertion() {
        let mut d = doc();
        let a = d.create_element("div");
        let b = d.create_element("div");
        let child = d.create_element("span");
        d.append_child(d.root(), a).unwrap();
        d.append_child(d.root(), b).unwrap();
        d.append_child(a, child).unwrap();

        let (_, rx) = d.observe();
        d.append_child(b, child).unwrap();

        let notices: Vec<_> = rx.try_iter().collect();
        assert_eq!(notices.len(), 2);
        assert!(matches!(
            &notices[0],
            MutationNotice::ChildList { target, removed, .. } if *target == a && removed == &vec![child]
        ));
        assert!(matches!(
            &notices[1],
            MutationNotice::ChildList { target, added, .. } if *target == b && added == &vec![child]
        ));
    }

    #[test]
    fn insert_before_keeps_order_and_sibling_hints() {
        let mut d = doc();
        let body = d.create_element("body");
        let first = d.create_text("1");
        let last = d.create_text("3");
        let middle = d.create_text("2");
        d.append_child(d.root(), body).unwrap();
        d.append_child(body, first).unwrap();
        d.append_child(body, last).unwrap();

        let (_, rx) = d.observe();
        d.insert_before(body, middle, Some(last)).unwrap();
        assert_eq!(d.children(body), &[first, middle, last]);
        match rx.try_recv().unwrap() {
            MutationNotice::ChildList {
                previous_sibling,
                next_sibling,
                ..
            } => {
                assert_eq!(previous_sibling, Some(first));
                assert_eq!(next_sibling, Some(last));
            }
            other => panic!("unexpected notice {other:?}"),
        }
    }

    #[test]
    fn cycles_are_rejected() {
        let mut d = doc();
        let outer = d.create_element("div");
        let inner = d.create_element("div");
        d.append_child(d.root(), outer).unwrap();
        d.append_child(outer, inner).unwrap();
        assert_eq!(
            d.append_child(inner, outer),
            Err(DomError::Hierarchy("insertion would create a cycle"))
        );
    }

    #[test]
    fn destroyed_handles_go_stale_and_slots_are_reused() {
        let mut d = doc();
        let div = d.create_element("div");
        let text = d.create_text("x");
        d.append_child(div, text).unwrap();
        let freed = d.destroy(div).unwrap();
        assert_eq!(freed, vec![div, text]);
        assert!(!d.is_live(div));
        assert!(!d.is_live(text));

        let reused = d.create_element("p");
        assert_ne!(reused, div);
        assert_eq!(d.set_attribute(div, "id", "x"), Err(DomError::StaleNode(div)));
    }

    #[test]
    fn remove_child_checks_the_parent() {
        let mut d = doc();
        let a = d.create_element("div");
        let b = d.create_element("div");
        d.append_child(d.root(), a).unwrap();
        d.append_child(d.root(), b).unwrap();
        assert_eq!(
            d.remove_child(a, b),
            Err(DomError::NotAChild { parent: a, child: b })
        );
        d.remove_child(d.root(), b).unwrap();
        assert_eq!(d.parent(b), None);
        assert_eq!(d.children(d.root()), &[a]);
    }

    #[test]
    fn attached_nodes_cannot_be_destroyed() {
        let mut d = doc();
        let div = d.create_element("div");
        d.append_child(d.root(), div).unwrap();
        assert!(d.destroy(div).is_err());
    }

    #[test]
    fn dropped_observers_are_pruned() {
        let mut d = doc();
        let (_, rx) = d.observe();
        let (_, _kept) = d.observe();
        drop(rx);
        let div = d.create_element("div");
        d.append_child(d.root(), div).unwrap();
        assert_eq!(d.observer_count(), 1);
    }

    #[test]
    fn removing_a_missing_attribute_is_silent() {
        let mut d = doc();
        let div = d.create_element("div");
        let (_, rx) = d.observe();
        d.remove_attribute(div, "class").unwrap();
        assert!(rx.try_recv().is_err());
    }
}
