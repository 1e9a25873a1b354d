//! Nested browsing contexts of one capture session.
//!
//! Every iframe-like element the session describes gets a context. A
//! same-origin context is captured directly: its document is observed by a
//! buffer of the session and serialized into the shared id space. A
//! cross-origin context is reached only through window messages; its
//! snapshot and batches are translated by a [`CrossOriginIdMap`].
//!
//! Contexts are keyed by the element handle, never by the element id, so a
//! moved iframe keeps its context.

use bus::{AddedNode, FrameMessage, MutationData, RemovedNode};
use core_types::{ContextToken, DocId, NodeId, SessionId, WindowId};
use dom::{Host, NodeHandle, WindowMessage};
use snapshot::{Mirror, NodePolicy, SerializeOptions, serialize_node_with_id};
use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

use crate::cross_origin::CrossOriginIdMap;
use crate::error::CaptureError;
use crate::mutation_buffer::MutationBuffer;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContextState {
    /// Known element without a bound window yet.
    Discovered,
    /// Window bound; waiting for a loaded document or a snapshot.
    PendingContent,
    /// Nested root described in the stream.
    Attached,
}

/// Read-only view of one nested context.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ContextInfo {
    pub element: NodeHandle,
    pub element_id: NodeId,
    pub window: Option<WindowId>,
    pub state: ContextState,
    pub cross_origin: bool,
    pub token: Option<ContextToken>,
    /// Id of the nested document node once attached.
    pub root_id: Option<NodeId>,
}

/// Session state the coordinator works against.
pub(crate) struct Shared<'a> {
    pub host: &'a mut Host,
    pub mirror: &'a mut Mirror<NodeHandle>,
    pub buffers: &'a mut BTreeMap<DocId, MutationBuffer>,
    pub policy: &'a NodePolicy,
    pub own_window: WindowId,
    pub session: SessionId,
    pub record_cross_origin: bool,
    pub handshake_timeout: Duration,
}

enum Content {
    Unbound,
    SameOrigin {
        doc: DocId,
        root_id: Option<NodeId>,
    },
    CrossOrigin {
        doc: DocId,
        token: ContextToken,
        ids: CrossOriginIdMap,
        pending: Vec<MutationData>,
        since: Instant,
        delivered: bool,
    },
}

struct Context {
    element_id: NodeId,
    window: Option<WindowId>,
    state: ContextState,
    content: Content,
}

/// Why a context goes away.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Detach {
    /// The element itself left; its removal already covers the content.
    Silent,
    /// The content changed under a live element; emit a removal.
    Announce,
}

#[derive(Default)]
pub struct FrameCoordinator {
    contexts: BTreeMap<NodeHandle, Context>,
    by_element_id: HashMap<NodeId, NodeHandle>,
    by_window: HashMap<WindowId, NodeHandle>,
    by_token: HashMap<ContextToken, NodeHandle>,
    next_token: u32,
}

impl FrameCoordinator {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }

    pub fn context(&self, element: NodeHandle) -> Option<ContextInfo> {
        let ctx = self.contexts.get(&element)?;
        let (cross_origin, token, root_id) = match &ctx.content {
            Content::Unbound => (false, None, None),
            Content::SameOrigin { root_id, .. } => (false, None, *root_id),
            Content::CrossOrigin { token, ids, .. } => (true, Some(*token), ids.context_root()),
        };
        Some(ContextInfo {
            element,
            element_id: ctx.element_id,
            window: ctx.window,
            state: ctx.state,
            cross_origin,
            token,
            root_id,
        })
    }

    pub fn by_element_id(&self, id: NodeId) -> Option<ContextInfo> {
        self.context(*self.by_element_id.get(&id)?)
    }

    pub fn by_window(&self, window: WindowId) -> Option<ContextInfo> {
        self.context(*self.by_window.get(&window)?)
    }

    pub fn by_token(&self, token: ContextToken) -> Option<ContextInfo> {
        self.context(*self.by_token.get(&token)?)
    }

    /// Translated ids held for cross-origin contexts.
    pub fn cross_origin_entries(&self) -> usize {
        self.contexts
            .values()
            .map(|ctx| match &ctx.content {
                Content::CrossOrigin { ids, .. } => ids.len(),
                _ => 0,
            })
            .sum()
    }

    /// Register an iframe-like element described with `element_id` and try
    /// to make progress on it right away. Known elements are only advanced.
    pub(crate) fn discover(
        &mut self,
        shared: &mut Shared<'_>,
        element: NodeHandle,
        element_id: NodeId,
        out: &mut Vec<MutationData>,
    ) -> Result<(), CaptureError> {
        match self.contexts.get_mut(&element) {
            Some(ctx) => {
                if ctx.element_id != element_id {
                    self.by_element_id.remove(&ctx.element_id);
                    ctx.element_id = element_id;
                    self.by_element_id.insert(element_id, element);
                }
            }
            None => {
                log::trace!(target: "record.frames", "discovered frame {element:?} as {element_id:?}");
                self.contexts.insert(
                    element,
                    Context {
                        element_id,
                        window: None,
                        state: ContextState::Discovered,
                        content: Content::Unbound,
                    },
                );
                self.by_element_id.insert(element_id, element);
            }
        }
        self.advance(shared, element, out)
    }

    /// Advance every context once.
    pub(crate) fn poll(
        &mut self,
        shared: &mut Shared<'_>,
        out: &mut Vec<MutationData>,
    ) -> Result<(), CaptureError> {
        let elements: Vec<NodeHandle> = self.contexts.keys().copied().collect();
        for element in elements {
            if self.contexts.contains_key(&element) {
                self.advance(shared, element, out)?;
            }
        }
        Ok(())
    }

    fn advance(
        &mut self,
        shared: &mut Shared<'_>,
        element: NodeHandle,
        out: &mut Vec<MutationData>,
    ) -> Result<(), CaptureError> {
        let Some(ctx) = self.contexts.get(&element) else {
            return Ok(());
        };
        let current = shared.host.content_window(element.doc, element.node);
        let current_doc = current.and_then(|w| shared.host.window_document(w).ok());

        let bound_doc = match &ctx.content {
            Content::Unbound => None,
            Content::SameOrigin { doc, .. } | Content::CrossOrigin { doc, .. } => Some(*doc),
        };
        if let Some(doc) = bound_doc
            && (current != ctx.window || current_doc != Some(doc))
        {
            log::debug!(target: "record.frames", "content of {element:?} changed; detaching");
            let element_id = ctx.element_id;
            self.detach(shared, element, Detach::Announce, out);
            if current.is_some() {
                return self.discover(shared, element, element_id, out);
            }
            return Ok(());
        }

        match &ctx.content {
            Content::Unbound => self.bind(shared, element, current, out),
            Content::SameOrigin { doc, root_id: None } => {
                let doc = *doc;
                if shared.host.document(doc).is_some_and(|d| d.is_ready()) {
                    if let Err(err) = self.attach_same_origin(shared, element, doc, out) {
                        self.detach(shared, element, Detach::Silent, out);
                        return Err(err);
                    }
                }
                Ok(())
            }
            Content::SameOrigin { .. } => Ok(()),
            Content::CrossOrigin {
                since, delivered, ..
            } => {
                if ctx.state == ContextState::Attached {
                    return Ok(());
                }
                if since.elapsed() >= shared.handshake_timeout {
                    log::warn!(target: "record.frames", "no snapshot from {element:?} in time; detaching");
                    self.detach(shared, element, Detach::Silent, out);
                    return Ok(());
                }
                if !*delivered {
                    self.send_handshake(shared, element);
                }
                Ok(())
            }
        }
    }

    fn bind(
        &mut self,
        shared: &mut Shared<'_>,
        element: NodeHandle,
        window: Option<WindowId>,
        out: &mut Vec<MutationData>,
    ) -> Result<(), CaptureError> {
        let Some(window) = window else {
            return Ok(());
        };
        let doc = shared.host.window_document(window)?;
        let content = if shared
            .host
            .content_document(element.doc, element.node)
            .is_some()
        {
            Content::SameOrigin { doc, root_id: None }
        } else if shared.record_cross_origin {
            self.next_token += 1;
            let token = ContextToken((shared.session.0 << 32) | u64::from(self.next_token));
            self.by_token.insert(token, element);
            Content::CrossOrigin {
                doc,
                token,
                ids: CrossOriginIdMap::new(),
                pending: Vec::new(),
                since: Instant::now(),
                delivered: false,
            }
        } else {
            log::debug!(target: "record.frames", "cross-origin frame {element:?} not recorded");
            self.forget(element);
            return Ok(());
        };

        let cross_origin = matches!(content, Content::CrossOrigin { .. });
        if let Some(ctx) = self.contexts.get_mut(&element) {
            ctx.window = Some(window);
            ctx.state = ContextState::PendingContent;
            ctx.content = content;
        }
        self.by_window.insert(window, element);
        if cross_origin {
            self.send_handshake(shared, element);
            Ok(())
        } else {
            self.advance(shared, element, out)
        }
    }

    fn send_handshake(&mut self, shared: &mut Shared<'_>, element: NodeHandle) {
        let Some(ctx) = self.contexts.get_mut(&element) else {
            return;
        };
        let (Some(window), Content::CrossOrigin {
            token, delivered, ..
        }) = (ctx.window, &mut ctx.content)
        else {
            return;
        };
        let text = match (FrameMessage::Handshake { token: *token }).encode() {
            Ok(text) => text,
            Err(err) => {
                log::error!(target: "record.frames", "cannot encode handshake: {err}");
                return;
            }
        };
        match shared.host.post_message(window, shared.own_window, &text) {
            Ok(reached) => *delivered = reached > 0,
            Err(err) => log::debug!(target: "record.frames", "handshake to {window:?} failed: {err}"),
        }
    }

    fn attach_same_origin(
        &mut self,
        shared: &mut Shared<'_>,
        element: NodeHandle,
        doc: DocId,
        out: &mut Vec<MutationData>,
    ) -> Result<(), CaptureError> {
        let Some(element_id) = self.contexts.get(&element).map(|ctx| ctx.element_id) else {
            return Ok(());
        };
        shared.host.claim_capture(doc, shared.session)?;
        let root = shared
            .host
            .document(doc)
            .ok_or(dom::HostError::UnknownDocument(doc))?
            .root();
        let root_id = shared.mirror.allocate(NodeHandle::new(doc, root))?;
        if let Some(ctx) = self.contexts.get_mut(&element) {
            ctx.content = Content::SameOrigin {
                doc,
                root_id: Some(root_id),
            };
        }
        let buffer = MutationBuffer::observe(shared.host, doc, Some(root_id))?;
        shared.buffers.insert(doc, buffer);

        let document = shared
            .host
            .document(doc)
            .ok_or(dom::HostError::UnknownDocument(doc))?;
        let options = SerializeOptions {
            policy: shared.policy,
            root_id: Some(root_id),
        };
        let mut iframes = Vec::new();
        let node = serialize_node_with_id(document, root, shared.mirror, &options, &mut iframes)?
            .ok_or(CaptureError::EmptySnapshot(doc))?;
        out.push(MutationData {
            adds: vec![AddedNode {
                parent_id: element_id,
                next_id: None,
                node,
            }],
            is_attach_iframe: true,
            ..MutationData::default()
        });
        if let Some(ctx) = self.contexts.get_mut(&element) {
            ctx.state = ContextState::Attached;
        }
        log::debug!(target: "record.frames", "attached same-origin {doc:?} under {element_id:?}");

        for (iframe, id) in iframes {
            self.discover(shared, iframe, id, out)?;
        }
        Ok(())
    }

    /// Route one window message to its context.
    pub(crate) fn on_message(
        &mut self,
        shared: &mut Shared<'_>,
        message: &WindowMessage,
        out: &mut Vec<MutationData>,
    ) -> Result<(), CaptureError> {
        let decoded = match FrameMessage::decode(&message.data) {
            Ok(decoded) => decoded,
            Err(err) => {
                log::debug!(target: "record.frames", "ignoring window message: {err}");
                return Ok(());
            }
        };
        let Some(element) = self.by_token.get(&decoded.token()).copied() else {
            log::debug!(target: "record.frames", "message for unknown token {:?}", decoded.token());
            return Ok(());
        };
        let Some(ctx) = self.contexts.get_mut(&element) else {
            return Ok(());
        };
        if ctx.window != Some(message.source) {
            log::warn!(
                target: "record.frames",
                "token {:?} used by {:?}, expected {:?}",
                decoded.token(),
                message.source,
                ctx.window
            );
            return Ok(());
        }
        let element_id = ctx.element_id;
        let attached = ctx.state == ContextState::Attached;
        let Content::CrossOrigin {
            ids,
            pending,
            delivered,
            ..
        } = &mut ctx.content
        else {
            return Ok(());
        };

        let result = match decoded {
            FrameMessage::Handshake { .. } => {
                log::debug!(target: "record.frames", "handshake echoed by {:?}", message.source);
                Ok(())
            }
            FrameMessage::Snapshot { node, .. } if !attached => {
                *delivered = true;
                merge_snapshot(ids, pending, &node, element_id, shared.mirror, out)
                    .map(|()| ctx.state = ContextState::Attached)
            }
            FrameMessage::Snapshot { .. } => {
                log::debug!(target: "record.frames", "duplicate snapshot for {element:?}");
                Ok(())
            }
            FrameMessage::MutationBatch { data, .. } if !attached => {
                pending.push(data);
                Ok(())
            }
            FrameMessage::MutationBatch { data, .. } => {
                ids.import_batch(&data, shared.mirror).map(|data| {
                    if !data.is_empty() {
                        out.push(data);
                    }
                })
            }
        };
        if let Err(err) = result {
            log::warn!(target: "record.frames", "dropping context {element:?}: {err}");
            self.detach(shared, element, Detach::Announce, out);
            if err.is_invariant_violation() {
                return Err(err);
            }
        }
        Ok(())
    }

    /// Drop contexts whose element left the tracked tree.
    pub(crate) fn on_retired(
        &mut self,
        shared: &mut Shared<'_>,
        retired: &[(NodeHandle, NodeId)],
        out: &mut Vec<MutationData>,
    ) {
        for (handle, _) in retired {
            if self.contexts.contains_key(handle) {
                self.detach(shared, *handle, Detach::Silent, out);
            }
        }
    }

    /// Detach everything without emitting.
    pub(crate) fn clear(&mut self, shared: &mut Shared<'_>) {
        let mut sink = Vec::new();
        let elements: Vec<NodeHandle> = self.contexts.keys().copied().collect();
        for element in elements {
            self.detach(shared, element, Detach::Silent, &mut sink);
        }
        self.next_token = 0;
    }

    fn forget(&mut self, element: NodeHandle) -> Option<Context> {
        let ctx = self.contexts.remove(&element)?;
        self.by_element_id.remove(&ctx.element_id);
        if let Some(window) = ctx.window {
            self.by_window.remove(&window);
        }
        if let Content::CrossOrigin { token, .. } = &ctx.content {
            self.by_token.remove(token);
        }
        Some(ctx)
    }

    fn detach(
        &mut self,
        shared: &mut Shared<'_>,
        element: NodeHandle,
        how: Detach,
        out: &mut Vec<MutationData>,
    ) {
        let Some(ctx) = self.forget(element) else {
            return;
        };
        let root_id = match ctx.content {
            Content::Unbound => None,
            Content::SameOrigin { doc, root_id } => {
                if let Some(buffer) = shared.buffers.remove(&doc) {
                    buffer.disconnect(shared.host);
                }
                shared.host.release_capture(doc, shared.session);
                let retired = shared.mirror.retire_where(|h| h.doc == doc);
                let nested: Vec<NodeHandle> = self
                    .contexts
                    .keys()
                    .copied()
                    .filter(|e| e.doc == doc)
                    .collect();
                for nested in nested {
                    self.detach(shared, nested, Detach::Silent, out);
                }
                log::debug!(
                    target: "record.frames",
                    "detached same-origin {doc:?}; {} handles retired",
                    retired.len()
                );
                root_id
            }
            Content::CrossOrigin { mut ids, .. } => {
                let root_id = ids.context_root();
                ids.release_all(shared.mirror);
                root_id
            }
        };
        if how == Detach::Announce
            && ctx.state == ContextState::Attached
            && let Some(id) = root_id
        {
            out.push(MutationData {
                removes: vec![RemovedNode {
                    parent_id: ctx.element_id,
                    id,
                }],
                ..MutationData::default()
            });
        }
    }
}

/// Emit the attach record for a cross-origin snapshot, then every batch that
/// arrived ahead of it.
fn merge_snapshot(
    ids: &mut CrossOriginIdMap,
    pending: &mut Vec<MutationData>,
    node: &snapshot::SerializedNodeWithId,
    element_id: NodeId,
    mirror: &mut Mirror<NodeHandle>,
    out: &mut Vec<MutationData>,
) -> Result<(), CaptureError> {
    let node = ids.import_snapshot(node, mirror)?;
    out.push(MutationData {
        adds: vec![AddedNode {
            parent_id: element_id,
            next_id: None,
            node,
        }],
        is_attach_iframe: true,
        ..MutationData::default()
    });
    for data in std::mem::take(pending) {
        let data = ids.import_batch(&data, mirror)?;
        if !data.is_empty() {
            out.push(data);
        }
    }
    Ok(())
}
