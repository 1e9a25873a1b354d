//! Per-document mutation pipeline.
//!
//! Raw notices are queued per kind in arrival order and resolved only at
//! flush time against the final live tree:
//! - a pending removal whose node is connected again is a move; it becomes
//!   an add that reuses the id, never a remove, unless the node itself
//!   became ignored on the way, which makes it a plain removal;
//! - a removal whose former parent is removed in the same batch is dropped;
//! - only the topmost new or moved nodes become add records, their new
//!   descendants are described inline;
//! - texts and attributes keep the final value only, and are skipped for
//!   nodes described by an add of the same batch.

use bus::{AddedNode, AttributeMutation, MutationData, RemovedNode, TextMutation};
use core_types::{DocId, NodeId, ObserverId};
use dom::{Document, Host, MutationNotice, NodeHandle, NodeRef, traverse};
use snapshot::{
    Mirror, NodePolicy, SerializeOptions, Slot, Verdict, serialize_node_with_id,
    serialize_text_value, url::transform_attribute,
};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::mpsc::Receiver;

use crate::error::CaptureError;

#[derive(Clone, Copy, Debug)]
struct PendingRemove {
    node: NodeRef,
    /// `None` for nodes that were marked ignored.
    id: Option<NodeId>,
    parent_id: Option<NodeId>,
}

/// Result of one flush.
#[derive(Debug, Default)]
pub(crate) struct Flushed {
    pub data: MutationData,
    /// Tracked nodes that left the tree for good, with their former ids.
    pub retired: Vec<(NodeHandle, NodeId)>,
    /// Iframe-like elements described by this batch's adds.
    pub iframes: Vec<(NodeHandle, NodeId)>,
    /// Invariant violations skipped in lenient mode.
    pub errors: Vec<CaptureError>,
}

enum Anchor {
    Id(NodeId),
    Pending(NodeRef),
    End,
}

pub(crate) struct MutationBuffer {
    doc: DocId,
    observer: ObserverId,
    notices: Receiver<MutationNotice>,
    root_id: Option<NodeId>,

    texts: Vec<NodeRef>,
    text_seen: HashSet<NodeRef>,
    attributes: Vec<(NodeRef, Vec<String>)>,
    attribute_index: HashMap<NodeRef, usize>,
    removes: Vec<PendingRemove>,
    removed: HashSet<NodeRef>,
    adds: Vec<NodeRef>,
    added: HashSet<NodeRef>,
}

impl MutationBuffer {
    /// Subscribe to `doc`. `root_id` tags nodes of a nested document.
    pub(crate) fn observe(
        host: &mut Host,
        doc: DocId,
        root_id: Option<NodeId>,
    ) -> Result<Self, CaptureError> {
        let (observer, notices) = host.try_document_mut(doc)?.observe();
        Ok(Self {
            doc,
            observer,
            notices,
            root_id,
            texts: Vec::new(),
            text_seen: HashSet::new(),
            attributes: Vec::new(),
            attribute_index: HashMap::new(),
            removes: Vec::new(),
            removed: HashSet::new(),
            adds: Vec::new(),
            added: HashSet::new(),
        })
    }

    pub(crate) fn doc(&self) -> DocId {
        self.doc
    }

    /// Unsubscribe; a document that is already gone needs nothing.
    pub(crate) fn disconnect(&self, host: &mut Host) {
        if let Some(document) = host.document_mut(self.doc) {
            document.disconnect(self.observer);
        }
    }

    /// Queued notices plus pending entries; zero once flushed.
    pub(crate) fn pending_len(&self) -> usize {
        self.texts.len() + self.attributes.len() + self.removes.len() + self.adds.len()
    }

    fn handle(&self, node: NodeRef) -> NodeHandle {
        NodeHandle::new(self.doc, node)
    }

    /// Move every delivered notice into the pending lists.
    pub(crate) fn drain(&mut self, mirror: &Mirror<NodeHandle>) {
        while let Ok(notice) = self.notices.try_recv() {
            self.classify(notice, mirror);
        }
    }

    fn classify(&mut self, notice: MutationNotice, mirror: &Mirror<NodeHandle>) {
        match notice {
            MutationNotice::ChildList {
                target,
                added,
                removed,
                ..
            } => {
                for node in removed {
                    if self.removed.contains(&node) {
                        continue;
                    }
                    let id = match mirror.slot(&self.handle(node)) {
                        Some(Slot::Tracked(id)) => Some(id),
                        Some(Slot::Ignored) => None,
                        // never described; nothing to undo
                        None => continue,
                    };
                    self.removed.insert(node);
                    self.removes.push(PendingRemove {
                        node,
                        id,
                        parent_id: mirror.id_of(&self.handle(target)),
                    });
                }
                for node in added {
                    if self.added.insert(node) {
                        self.adds.push(node);
                    }
                }
            }
            MutationNotice::CharacterData { target } => {
                if self.text_seen.insert(target) {
                    self.texts.push(target);
                }
            }
            MutationNotice::Attribute { target, name } => {
                let index = *self.attribute_index.entry(target).or_insert_with(|| {
                    self.attributes.push((target, Vec::new()));
                    self.attributes.len() - 1
                });
                let names = &mut self.attributes[index].1;
                if !names.contains(&name) {
                    names.push(name);
                }
            }
        }
    }

    /// True when `node` sits in the tracked part of the live tree.
    fn is_visible(doc: &Document, policy: &NodePolicy, node: NodeRef) -> bool {
        doc.is_connected(node) && !policy.is_hidden_by_ancestor(doc, node)
    }

    /// Resolve the pending lists into one record set.
    pub(crate) fn flush(
        &mut self,
        doc: &Document,
        mirror: &mut Mirror<NodeHandle>,
        policy: &NodePolicy,
        strict: bool,
    ) -> Result<Flushed, CaptureError> {
        let mut flushed = Flushed::default();
        let removes = std::mem::take(&mut self.removes);
        let adds = std::mem::take(&mut self.adds);
        let texts = std::mem::take(&mut self.texts);
        let attributes = std::mem::take(&mut self.attributes);
        self.removed.clear();
        self.added.clear();
        self.text_seen.clear();
        self.attribute_index.clear();

        // moves: removed earlier in the batch, connected again now and
        // still tracked under the policy
        let (moved, gone): (Vec<PendingRemove>, Vec<PendingRemove>) =
            removes.into_iter().partition(|r| {
                r.id.is_some()
                    && Self::is_visible(doc, policy, r.node)
                    && doc
                        .data(r.node)
                        .is_some_and(|d| policy.verdict(d) != Verdict::Ignore)
            });
        let gone_ids: HashSet<NodeId> = gone.iter().filter_map(|r| r.id).collect();
        let gone_nodes: HashSet<NodeRef> = gone
            .iter()
            .filter(|r| r.id.is_some())
            .map(|r| r.node)
            .collect();
        for remove in &gone {
            let (Some(id), Some(parent_id)) = (remove.id, remove.parent_id) else {
                continue;
            };
            if gone_ids.contains(&parent_id) {
                continue;
            }
            // former parent still sits below another removed node
            if let Some(parent) = mirror.node_of(parent_id).map(|h| h.node)
                && !doc.is_connected(parent)
                && traverse::ancestors(doc, parent).any(|a| gone_nodes.contains(&a))
            {
                continue;
            }
            flushed.data.removes.push(RemovedNode { parent_id, id });
        }
        self.retire(doc, mirror, &gone, &mut flushed.retired);

        self.emit_adds(doc, mirror, policy, strict, &adds, &mut flushed)?;
        let fresh: HashSet<NodeId> = flushed
            .data
            .adds
            .iter()
            .flat_map(|add| {
                let mut ids = Vec::new();
                add.node.visit(&mut |n| ids.push(n.id));
                ids
            })
            .collect();

        // a moved node whose add was dropped would keep a stale id
        let stranded: Vec<PendingRemove> = moved
            .into_iter()
            .filter(|r| r.id.is_some_and(|id| !fresh.contains(&id)))
            .collect();
        for remove in &stranded {
            let (Some(id), Some(parent_id)) = (remove.id, remove.parent_id) else {
                continue;
            };
            if !gone_ids.contains(&parent_id) {
                log::debug!(target: "record.mutation", "moved {id:?} was not re-added; removing");
                flushed.data.removes.push(RemovedNode { parent_id, id });
            }
        }
        self.retire(doc, mirror, &stranded, &mut flushed.retired);

        for node in texts {
            let Some(id) = mirror.id_of(&self.handle(node)) else {
                continue;
            };
            if fresh.contains(&id) || !Self::is_visible(doc, policy, node) {
                continue;
            }
            if let Some(value) = serialize_text_value(doc, node, policy) {
                flushed.data.texts.push(TextMutation { id, value });
            }
        }

        for (node, names) in attributes {
            let Some(id) = mirror.id_of(&self.handle(node)) else {
                continue;
            };
            if fresh.contains(&id) || !Self::is_visible(doc, policy, node) {
                continue;
            }
            let Some(data) = doc.data(node) else {
                continue;
            };
            let Some(tag) = data.tag_name() else {
                continue;
            };
            if policy.verdict(data) == Verdict::Block {
                continue;
            }
            let changed: BTreeMap<String, Option<String>> = names
                .into_iter()
                .map(|name| {
                    let value = data
                        .attribute(&name)
                        .map(|v| transform_attribute(doc.url(), tag, &name, v));
                    (name, value)
                })
                .collect();
            flushed.data.attributes.push(AttributeMutation {
                id,
                attributes: changed,
            });
        }

        log::trace!(
            target: "record.mutation",
            "doc {:?}: {} removes, {} adds, {} texts, {} attributes",
            self.doc,
            flushed.data.removes.len(),
            flushed.data.adds.len(),
            flushed.data.texts.len(),
            flushed.data.attributes.len()
        );
        Ok(flushed)
    }

    /// Drop mirror entries for nodes that left the tree for good.
    fn retire(
        &self,
        doc: &Document,
        mirror: &mut Mirror<NodeHandle>,
        gone: &[PendingRemove],
        retired: &mut Vec<(NodeHandle, NodeId)>,
    ) {
        let mut sweep = false;
        for remove in gone {
            if !doc.is_live(remove.node) {
                sweep = true;
                continue;
            }
            for node in traverse::descendants(doc, remove.node) {
                let handle = self.handle(node);
                if let Some(id) = mirror.remove(&handle) {
                    retired.push((handle, id));
                }
            }
        }
        if sweep {
            // destroyed subtrees cannot be walked; drop every stale handle
            let doc_id = self.doc;
            retired.extend(mirror.retire_where(|h| h.doc == doc_id && !doc.is_live(h.node)));
        }
    }

    fn emit_adds(
        &self,
        doc: &Document,
        mirror: &mut Mirror<NodeHandle>,
        policy: &NodePolicy,
        strict: bool,
        adds: &[NodeRef],
        flushed: &mut Flushed,
    ) -> Result<(), CaptureError> {
        let candidates: HashSet<NodeRef> = adds
            .iter()
            .copied()
            .filter(|n| Self::is_visible(doc, policy, *n))
            .collect();
        let roots: Vec<NodeRef> = adds
            .iter()
            .copied()
            .filter(|n| candidates.contains(n))
            .filter(|n| !traverse::ancestors(doc, *n).any(|a| candidates.contains(&a)))
            .collect();
        let pending: HashSet<NodeRef> = roots.iter().copied().collect();
        let mut emitted: HashSet<NodeRef> = HashSet::new();

        for &root in &roots {
            if emitted.contains(&root) {
                continue;
            }
            // a root must follow its next sibling when that sibling is
            // itself waiting to be added
            let mut chain = vec![root];
            while let Some(&last) = chain.last() {
                match self.next_anchor(doc, mirror, last, &pending, &emitted) {
                    Anchor::Pending(next) if !chain.contains(&next) => chain.push(next),
                    _ => break,
                }
            }
            while let Some(node) = chain.pop() {
                emitted.insert(node);
                let next_id = match self.next_anchor(doc, mirror, node, &pending, &emitted) {
                    Anchor::Id(id) => Some(id),
                    Anchor::End => None,
                    Anchor::Pending(_) => {
                        log::warn!(
                            target: "record.mutation",
                            "unresolved next sibling for {node:?}; appending"
                        );
                        None
                    }
                };
                if let Err(err) = self.emit_add(doc, mirror, policy, node, next_id, flushed) {
                    if strict || !err.is_invariant_violation() {
                        return Err(err);
                    }
                    log::error!(target: "record.mutation", "skipping add of {node:?}: {err}");
                    flushed.errors.push(err);
                }
            }
        }
        Ok(())
    }

    fn emit_add(
        &self,
        doc: &Document,
        mirror: &mut Mirror<NodeHandle>,
        policy: &NodePolicy,
        node: NodeRef,
        next_id: Option<NodeId>,
        flushed: &mut Flushed,
    ) -> Result<(), CaptureError> {
        let Some(parent_id) = doc.parent(node).and_then(|p| mirror.id_of(&self.handle(p))) else {
            log::debug!(target: "record.mutation", "parent of {node:?} is untracked; add dropped");
            return Ok(());
        };
        let options = SerializeOptions {
            policy,
            root_id: self.root_id,
        };
        let serialized =
            serialize_node_with_id(doc, node, mirror, &options, &mut flushed.iframes)?;
        if let Some(serialized) = serialized {
            flushed.data.adds.push(AddedNode {
                parent_id,
                next_id,
                node: serialized,
            });
        }
        Ok(())
    }

    fn next_anchor(
        &self,
        doc: &Document,
        mirror: &Mirror<NodeHandle>,
        node: NodeRef,
        pending: &HashSet<NodeRef>,
        emitted: &HashSet<NodeRef>,
    ) -> Anchor {
        let mut sibling = doc.next_sibling(node);
        while let Some(s) = sibling {
            if pending.contains(&s) && !emitted.contains(&s) {
                return Anchor::Pending(s);
            }
            if let Some(id) = mirror.id_of(&self.handle(s)) {
                return Anchor::Id(id);
            }
            sibling = doc.next_sibling(s);
        }
        Anchor::End
    }
}
