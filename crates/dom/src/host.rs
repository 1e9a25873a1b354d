use core_types::{DocId, ListenerId, SessionId, WindowId};
use std::collections::{BTreeMap, HashMap};
use std::sync::mpsc::{self, Receiver, Sender};

use crate::Document;
use crate::error::HostError;
use crate::node::{NodeHandle, NodeRef};

/// A message delivered to a window's listeners by [`Host::post_message`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WindowMessage {
    pub source: WindowId,
    pub origin: String,
    pub data: String,
}

/// One browsing context: an origin, a current document and its listeners.
#[derive(Debug)]
pub struct Window {
    id: WindowId,
    url: String,
    origin: String,
    document: DocId,
    parent: Option<WindowId>,
    frame_element: Option<NodeHandle>,
    listeners: Vec<(ListenerId, Sender<WindowMessage>)>,
}

impl Window {
    pub fn id(&self) -> WindowId {
        self.id
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn document(&self) -> DocId {
        self.document
    }

    pub fn parent(&self) -> Option<WindowId> {
        self.parent
    }

    /// The iframe element hosting this window, if it is nested.
    pub fn frame_element(&self) -> Option<NodeHandle> {
        self.frame_element
    }
}

/// Owns every window and document of a simulated page.
///
/// All capture work runs against a `&mut Host` on one thread; the host never
/// calls back into a recorder, it only sends on channels the recorder owns.
#[derive(Debug, Default)]
pub struct Host {
    windows: BTreeMap<WindowId, Window>,
    documents: BTreeMap<DocId, Document>,
    frames: HashMap<NodeHandle, WindowId>,
    claims: HashMap<DocId, SessionId>,
    next_window: u32,
    next_doc: u32,
    next_listener: u32,
    next_session: u64,
}

impl Host {
    pub fn new() -> Self {
        Self::default()
    }

    // ---- windows --------------------------------------------------------

    /// Open a top-level window whose document is already loaded.
    pub fn open_window(&mut self, url: &str) -> Result<WindowId, HostError> {
        let origin = self.origin_for(url, None)?;
        let window = self.insert_window(url, origin, None, None);
        let doc = self.window_document(window)?;
        if let Some(document) = self.documents.get_mut(&doc) {
            document.set_ready(true);
        }
        Ok(window)
    }

    /// Bind a new child window to the iframe element `iframe` of `doc`.
    ///
    /// The child document starts out not ready; see [`Host::finish_load`].
    pub fn create_frame(
        &mut self,
        doc: DocId,
        iframe: NodeRef,
        url: &str,
    ) -> Result<WindowId, HostError> {
        let parent = self
            .window_of(doc)
            .ok_or(HostError::UnknownDocument(doc))?;
        let document = self.document(doc).ok_or(HostError::UnknownDocument(doc))?;
        if !document.data(iframe).is_some_and(|d| d.is_frame_element()) {
            return Err(HostError::NotAFrameElement(iframe));
        }
        let handle = NodeHandle::new(doc, iframe);
        if let Some(previous) = self.frames.get(&handle).copied() {
            self.close_window(previous)?;
        }
        let origin = self.origin_for(url, Some(parent))?;
        let window = self.insert_window(url, origin, Some(parent), Some(handle));
        self.frames.insert(handle, window);
        Ok(window)
    }

    pub fn finish_load(&mut self, window: WindowId) -> Result<(), HostError> {
        let doc = self.window_document(window)?;
        let document = self
            .documents
            .get_mut(&doc)
            .ok_or(HostError::UnknownDocument(doc))?;
        document.set_ready(true);
        Ok(())
    }

    /// Replace the window's document with a fresh, not-yet-loaded one.
    ///
    /// The old document is dropped together with its observers, its nested
    /// frames and the window's message listeners.
    pub fn navigate(&mut self, window: WindowId, url: &str) -> Result<DocId, HostError> {
        let parent = self
            .windows
            .get(&window)
            .ok_or(HostError::UnknownWindow(window))?
            .parent;
        let origin = self.origin_for(url, parent)?;
        let old_doc = self.window_document(window)?;
        self.drop_document(old_doc)?;

        let doc = self.alloc_document(url);
        let w = self
            .windows
            .get_mut(&window)
            .ok_or(HostError::UnknownWindow(window))?;
        w.url = url.to_string();
        w.origin = origin;
        w.document = doc;
        w.listeners.clear();
        log::trace!(target: "dom.host", "window {window:?} navigated to {url}");
        Ok(doc)
    }

    /// Close a window and every window nested below it.
    pub fn close_window(&mut self, window: WindowId) -> Result<(), HostError> {
        let w = self
            .windows
            .remove(&window)
            .ok_or(HostError::UnknownWindow(window))?;
        if let Some(frame) = w.frame_element {
            self.frames.remove(&frame);
        }
        self.drop_document(w.document)?;
        log::trace!(target: "dom.host", "window {window:?} closed");
        Ok(())
    }

    pub fn has_window(&self, window: WindowId) -> bool {
        self.windows.contains_key(&window)
    }

    pub fn window(&self, window: WindowId) -> Option<&Window> {
        self.windows.get(&window)
    }

    pub fn window_of(&self, doc: DocId) -> Option<WindowId> {
        self.windows
            .values()
            .find(|w| w.document == doc)
            .map(|w| w.id)
    }

    pub fn window_document(&self, window: WindowId) -> Result<DocId, HostError> {
        self.windows
            .get(&window)
            .map(|w| w.document)
            .ok_or(HostError::UnknownWindow(window))
    }

    /// The window bound to an iframe element, regardless of origin.
    pub fn content_window(&self, doc: DocId, iframe: NodeRef) -> Option<WindowId> {
        self.frames.get(&NodeHandle::new(doc, iframe)).copied()
    }

    /// The nested document behind an iframe, only when it shares an origin
    /// with the embedding document.
    pub fn content_document(&self, doc: DocId, iframe: NodeRef) -> Option<DocId> {
        let child = self.windows.get(&self.content_window(doc, iframe)?)?;
        let parent = self.windows.get(&self.window_of(doc)?)?;
        (child.origin == parent.origin).then_some(child.document)
    }

    // ---- documents ------------------------------------------------------

    pub fn document(&self, doc: DocId) -> Option<&Document> {
        self.documents.get(&doc)
    }

    pub fn document_mut(&mut self, doc: DocId) -> Option<&mut Document> {
        self.documents.get_mut(&doc)
    }

    pub fn try_document_mut(&mut self, doc: DocId) -> Result<&mut Document, HostError> {
        self.documents
            .get_mut(&doc)
            .ok_or(HostError::UnknownDocument(doc))
    }

    /// Free a detached subtree of `doc`, closing windows hosted by frames in it.
    pub fn destroy(&mut self, doc: DocId, node: NodeRef) -> Result<(), HostError> {
        let freed = self.try_document_mut(doc)?.destroy(node)?;
        for key in freed {
            if let Some(window) = self.frames.get(&NodeHandle::new(doc, key)).copied() {
                self.close_window(window)?;
            }
        }
        Ok(())
    }

    // ---- messaging ------------------------------------------------------

    pub fn add_message_listener(
        &mut self,
        window: WindowId,
    ) -> Result<(ListenerId, Receiver<WindowMessage>), HostError> {
        let id = ListenerId(self.next_listener);
        let w = self
            .windows
            .get_mut(&window)
            .ok_or(HostError::UnknownWindow(window))?;
        self.next_listener += 1;
        let (tx, rx) = mpsc::channel();
        w.listeners.push((id, tx));
        Ok((id, rx))
    }

    pub fn remove_message_listener(&mut self, window: WindowId, listener: ListenerId) -> bool {
        let Some(w) = self.windows.get_mut(&window) else {
            return false;
        };
        let before = w.listeners.len();
        w.listeners.retain(|(id, _)| *id != listener);
        w.listeners.len() != before
    }

    pub fn message_listener_count(&self, window: WindowId) -> usize {
        self.windows.get(&window).map_or(0, |w| w.listeners.len())
    }

    /// Deliver `data` to every listener of `target`. Returns the number of
    /// listeners reached.
    pub fn post_message(
        &mut self,
        target: WindowId,
        source: WindowId,
        data: &str,
    ) -> Result<usize, HostError> {
        let origin = self
            .windows
            .get(&source)
            .map(|w| w.origin.clone())
            .ok_or(HostError::UnknownWindow(source))?;
        let w = self
            .windows
            .get_mut(&target)
            .ok_or(HostError::UnknownWindow(target))?;
        let message = WindowMessage {
            source,
            origin,
            data: data.to_string(),
        };
        w.listeners.retain(|(_, tx)| tx.send(message.clone()).is_ok());
        Ok(w.listeners.len())
    }

    // ---- capture claims -------------------------------------------------

    pub fn next_session_id(&mut self) -> SessionId {
        self.next_session += 1;
        SessionId(self.next_session)
    }

    /// Mark `doc` as captured by `session`. A second session is refused.
    pub fn claim_capture(&mut self, doc: DocId, session: SessionId) -> Result<(), HostError> {
        if !self.documents.contains_key(&doc) {
            return Err(HostError::UnknownDocument(doc));
        }
        match self.claims.get(&doc) {
            Some(owner) if *owner != session => {
                Err(HostError::AlreadyCaptured { doc, owner: *owner })
            }
            _ => {
                self.claims.insert(doc, session);
                Ok(())
            }
        }
    }

    pub fn release_capture(&mut self, doc: DocId, session: SessionId) {
        if self.claims.get(&doc) == Some(&session) {
            self.claims.remove(&doc);
        }
    }

    pub fn capture_owner(&self, doc: DocId) -> Option<SessionId> {
        self.claims.get(&doc).copied()
    }

    // ---- internals ------------------------------------------------------

    fn insert_window(
        &mut self,
        url: &str,
        origin: String,
        parent: Option<WindowId>,
        frame_element: Option<NodeHandle>,
    ) -> WindowId {
        self.next_window += 1;
        let id = WindowId(self.next_window);
        let document = self.alloc_document(url);
        self.windows.insert(
            id,
            Window {
                id,
                url: url.to_string(),
                origin,
                document,
                parent,
                frame_element,
                listeners: Vec::new(),
            },
        );
        id
    }

    fn alloc_document(&mut self, url: &str) -> DocId {
        self.next_doc += 1;
        let id = DocId(self.next_doc);
        self.documents.insert(id, Document::new(id, url));
        id
    }

    /// Remove a document, its capture claim and the windows its frames host.
    fn drop_document(&mut self, doc: DocId) -> Result<(), HostError> {
        self.documents.remove(&doc);
        self.claims.remove(&doc);
        let nested: Vec<WindowId> = self
            .frames
            .iter()
            .filter(|(handle, _)| handle.doc == doc)
            .map(|(_, window)| *window)
            .collect();
        for window in nested {
            if self.windows.contains_key(&window) {
                self.close_window(window)?;
            }
        }
        Ok(())
    }

    fn origin_for(&self, url: &str, parent: Option<WindowId>) -> Result<String, HostError> {
        if url == "about:blank" || url == "about:srcdoc" {
            if let Some(parent) = parent.and_then(|p| self.windows.get(&p)) {
                return Ok(parent.origin.clone());
            }
        }
        let parsed = url::Url::parse(url).map_err(|source| HostError::InvalidUrl {
            url: url.to_string(),
            source,
        })?;
        let origin = parsed.origin();
        if origin.is_tuple() {
            Ok(origin.ascii_serialization())
        } else {
            // opaque origins never compare equal to anything else
            Ok(format!("opaque:{}", self.next_window + 1))
        }
    }
}
