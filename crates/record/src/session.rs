use bus::{CaptureEvent, EventSink, FrameMessage, MutationData};
use core_types::{ContextToken, DocId, ListenerId, SessionId, WindowId};
use dom::{Host, HostError, NodeHandle, WindowMessage};
use snapshot::{Mirror, SerializeOptions, serialize_node_with_id};
use std::collections::BTreeMap;
use std::sync::mpsc::Receiver;

use crate::error::CaptureError;
use crate::frames::{FrameCoordinator, Shared};
use crate::mutation_buffer::MutationBuffer;
use crate::options::{CaptureConfig, CaptureOptions};

/// Retained-state counters of a session. All zero once stopped.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CaptureStats {
    pub mirror_entries: usize,
    pub buffers: usize,
    pub nested_contexts: usize,
    pub cross_origin_entries: usize,
    pub message_listeners: usize,
}

/// Link of a session that runs inside a cross-origin nested document.
#[derive(Clone, Copy, Debug)]
struct ChildLink {
    parent: WindowId,
    /// Set by the first handshake; nothing is forwarded before that.
    token: Option<ContextToken>,
}

/// A running capture of one document and the contexts nested in it.
///
/// The session never runs on its own; the embedder calls [`tick`] after
/// changing the host, the way an event loop would deliver observer
/// callbacks. A session must be ended with [`stop`], which releases every
/// host resource it holds.
///
/// [`tick`]: CaptureSession::tick
/// [`stop`]: CaptureSession::stop
pub struct CaptureSession {
    id: SessionId,
    doc: DocId,
    window: WindowId,
    config: CaptureConfig,
    sink: Box<dyn EventSink>,
    mirror: Mirror<NodeHandle>,
    buffers: BTreeMap<DocId, MutationBuffer>,
    frames: FrameCoordinator,
    listener: Option<(ListenerId, Receiver<WindowMessage>)>,
    child: Option<ChildLink>,
    stopped: bool,
}

/// Start capturing `doc`.
///
/// Emits `Meta` and `FullSnapshot` to the sink before returning. On failure
/// everything acquired so far is released again.
pub fn start_capture(
    host: &mut Host,
    doc: DocId,
    options: CaptureOptions,
) -> Result<CaptureSession, CaptureError> {
    let window = host.window_of(doc).ok_or(HostError::UnknownDocument(doc))?;
    let id = host.next_session_id();
    host.claim_capture(doc, id)?;

    let CaptureOptions {
        config,
        sink,
        parent_window,
    } = options;
    let mut session = CaptureSession {
        id,
        doc,
        window,
        config,
        sink,
        mirror: Mirror::new(),
        buffers: BTreeMap::new(),
        frames: FrameCoordinator::new(),
        listener: None,
        child: parent_window.map(|parent| ChildLink {
            parent,
            token: None,
        }),
        stopped: false,
    };
    if let Err(err) = session.begin(host) {
        log::error!(target: "record.session", "capture of {doc:?} failed to start: {err}");
        session.stop(host);
        return Err(err);
    }
    log::info!(target: "record.session", "session {id:?} capturing {doc:?}");
    Ok(session)
}

impl CaptureSession {
    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn doc(&self) -> DocId {
        self.doc
    }

    pub fn mirror(&self) -> &Mirror<NodeHandle> {
        &self.mirror
    }

    pub fn frames(&self) -> &FrameCoordinator {
        &self.frames
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    pub fn stats(&self) -> CaptureStats {
        CaptureStats {
            mirror_entries: self.mirror.entry_count(),
            buffers: self.buffers.len(),
            nested_contexts: self.frames.len(),
            cross_origin_entries: self.frames.cross_origin_entries(),
            message_listeners: usize::from(self.listener.is_some()),
        }
    }

    fn begin(&mut self, host: &mut Host) -> Result<(), CaptureError> {
        let buffer = MutationBuffer::observe(host, self.doc, None)?;
        self.buffers.insert(self.doc, buffer);
        if self.config.record_cross_origin_iframes || self.child.is_some() {
            self.listener = Some(host.add_message_listener(self.window)?);
        }

        let document = host
            .document(self.doc)
            .ok_or(HostError::UnknownDocument(self.doc))?;
        let href = document.url().to_string();
        let options = SerializeOptions {
            policy: &self.config.policy,
            root_id: None,
        };
        let mut iframes = Vec::new();
        let node = serialize_node_with_id(
            document,
            document.root(),
            &mut self.mirror,
            &options,
            &mut iframes,
        )?
        .ok_or(CaptureError::EmptySnapshot(self.doc))?;
        self.dispatch(host, CaptureEvent::Meta { href });
        self.dispatch(host, CaptureEvent::FullSnapshot { node });

        let mut out = Vec::new();
        let result = self.with_frames(host, |frames, shared| {
            for (iframe, id) in iframes {
                frames.discover(shared, iframe, id, &mut out)?;
            }
            Ok(())
        });
        self.flush_out(host, &mut out);
        result
    }

    /// Process everything that happened since the previous tick.
    ///
    /// Buffers are flushed in document order, then nested contexts advance,
    /// then window messages are handled. In lenient mode a failing step is
    /// logged and skipped and the first error is returned after the whole
    /// tick ran.
    pub fn tick(&mut self, host: &mut Host) -> Result<(), CaptureError> {
        if self.stopped {
            return Ok(());
        }
        if host.document(self.doc).is_none() {
            log::info!(target: "record.session", "captured {:?} is gone; stopping", self.doc);
            self.stop(host);
            return Ok(());
        }
        let strict = self.config.strict;
        let mut errors: Vec<CaptureError> = Vec::new();
        let mut out = Vec::new();

        let docs: Vec<DocId> = self.buffers.keys().copied().collect();
        for doc in docs {
            let result = self.flush_buffer(host, doc, &mut out, &mut errors);
            self.flush_out(host, &mut out);
            absorb(strict, &mut errors, result)?;
        }

        let result = self.with_frames(host, |frames, shared| frames.poll(shared, &mut out));
        self.flush_out(host, &mut out);
        absorb(strict, &mut errors, result)?;

        let messages: Vec<WindowMessage> = match &self.listener {
            Some((_, rx)) => rx.try_iter().collect(),
            None => Vec::new(),
        };
        for message in messages {
            let result = match FrameMessage::decode(&message.data) {
                Ok(FrameMessage::Handshake { token }) if self.child.is_some() => {
                    self.on_handshake(host, message.source, token)
                }
                _ => self.with_frames(host, |frames, shared| {
                    frames.on_message(shared, &message, &mut out)
                }),
            };
            self.flush_out(host, &mut out);
            absorb(strict, &mut errors, result)?;
        }

        match errors.into_iter().next() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn flush_buffer(
        &mut self,
        host: &mut Host,
        doc: DocId,
        out: &mut Vec<MutationData>,
        errors: &mut Vec<CaptureError>,
    ) -> Result<(), CaptureError> {
        let (Some(buffer), Some(document)) = (self.buffers.get_mut(&doc), host.document(doc)) else {
            // nested document went away; the coordinator detaches it
            return Ok(());
        };
        buffer.drain(&self.mirror);
        let flushed = buffer.flush(document, &mut self.mirror, &self.config.policy, self.config.strict)?;
        errors.extend(flushed.errors);
        if !flushed.data.is_empty() {
            out.push(flushed.data);
        }
        let retired = flushed.retired;
        let iframes = flushed.iframes;
        self.with_frames(host, |frames, shared| {
            frames.on_retired(shared, &retired, out);
            for (iframe, id) in iframes {
                frames.discover(shared, iframe, id, out)?;
            }
            Ok(())
        })
    }

    /// Answer a handshake from the embedding window.
    fn on_handshake(
        &mut self,
        host: &mut Host,
        source: WindowId,
        token: ContextToken,
    ) -> Result<(), CaptureError> {
        let Some(link) = self.child.as_mut() else {
            return Ok(());
        };
        if source != link.parent {
            log::warn!(target: "record.session", "handshake from foreign window {source:?}");
            return Ok(());
        }
        if link.token == Some(token) {
            log::debug!(target: "record.session", "duplicate handshake {token:?}");
            return Ok(());
        }
        link.token = Some(token);
        let parent = link.parent;

        // nested contexts are described again, after the snapshot
        self.with_frames(host, |frames, shared| frames.clear(shared));
        let document = host
            .document(self.doc)
            .ok_or(HostError::UnknownDocument(self.doc))?;
        let options = SerializeOptions {
            policy: &self.config.policy,
            root_id: None,
        };
        let mut iframes = Vec::new();
        let node = serialize_node_with_id(
            document,
            document.root(),
            &mut self.mirror,
            &options,
            &mut iframes,
        )?
        .ok_or(CaptureError::EmptySnapshot(self.doc))?;
        self.post(host, parent, &FrameMessage::Snapshot { token, node });
        log::debug!(target: "record.session", "snapshot sent to {parent:?} for {token:?}");

        let mut out = Vec::new();
        let result = self.with_frames(host, |frames, shared| {
            for (iframe, id) in iframes {
                frames.discover(shared, iframe, id, &mut out)?;
            }
            Ok(())
        });
        self.flush_out(host, &mut out);
        result
    }

    /// End the capture and release everything the session holds. Safe to
    /// call more than once.
    pub fn stop(&mut self, host: &mut Host) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        self.with_frames(host, |frames, shared| frames.clear(shared));
        for buffer in self.buffers.values() {
            buffer.disconnect(host);
        }
        self.buffers.clear();
        if let Some((listener, _)) = self.listener.take() {
            host.remove_message_listener(self.window, listener);
        }
        self.mirror.reset();
        host.release_capture(self.doc, self.id);
        log::info!(target: "record.session", "session {:?} stopped", self.id);
    }

    fn with_frames<R>(
        &mut self,
        host: &mut Host,
        f: impl FnOnce(&mut FrameCoordinator, &mut Shared<'_>) -> R,
    ) -> R {
        let mut shared = Shared {
            host,
            mirror: &mut self.mirror,
            buffers: &mut self.buffers,
            policy: &self.config.policy,
            own_window: self.window,
            session: self.id,
            record_cross_origin: self.config.record_cross_origin_iframes,
            handshake_timeout: self.config.handshake_timeout(),
        };
        f(&mut self.frames, &mut shared)
    }

    fn flush_out(&mut self, host: &mut Host, out: &mut Vec<MutationData>) {
        for data in out.drain(..) {
            self.dispatch(host, CaptureEvent::mutation(data));
        }
    }

    /// Hand one record to the sink, or to the embedding window for a
    /// session inside a cross-origin context.
    fn dispatch(&mut self, host: &mut Host, event: CaptureEvent) {
        let Some(link) = self.child else {
            self.sink.emit(event);
            return;
        };
        match (link.token, event) {
            (
                Some(token),
                CaptureEvent::IncrementalSnapshot {
                    data: bus::IncrementalData::Mutation(data),
                },
            ) => self.post(host, link.parent, &FrameMessage::MutationBatch { token, data }),
            _ => log::trace!(target: "record.session", "not linked yet; record dropped"),
        }
    }

    fn post(&self, host: &mut Host, target: WindowId, message: &FrameMessage) {
        let text = match message.encode() {
            Ok(text) => text,
            Err(err) => {
                log::error!(target: "record.session", "cannot encode frame message: {err}");
                return;
            }
        };
        if let Err(err) = host.post_message(target, self.window, &text) {
            log::debug!(target: "record.session", "post to {target:?} failed: {err}");
        }
    }
}

fn absorb(
    strict: bool,
    errors: &mut Vec<CaptureError>,
    result: Result<(), CaptureError>,
) -> Result<(), CaptureError> {
    match result {
        Ok(()) => Ok(()),
        Err(err) if strict => Err(err),
        Err(err) => {
            log::error!(target: "record.session", "tick step failed: {err}");
            errors.push(err);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    fn page(host: &mut Host) -> DocId {
        let window = host.open_window("https://a.test/index.html").unwrap();
        let doc = host.window_document(window).unwrap();
        let d = host.document_mut(doc).unwrap();
        let html = d.create_element("html");
        let body = d.create_element("body");
        d.append_child(d.root(), html).unwrap();
        d.append_child(html, body).unwrap();
        doc
    }

    #[test]
    fn start_emits_meta_then_full_snapshot() {
        let mut host = Host::new();
        let doc = page(&mut host);
        let (tx, rx) = mpsc::channel();
        let mut session = start_capture(&mut host, doc, CaptureOptions::new(tx)).unwrap();

        let events: Vec<CaptureEvent> = rx.try_iter().collect();
        assert_eq!(events.len(), 2);
        assert!(matches!(&events[0], CaptureEvent::Meta { href } if href == "https://a.test/index.html"));
        assert!(matches!(&events[1], CaptureEvent::FullSnapshot { .. }));
        assert_eq!(session.mirror().len(), 3);
        session.stop(&mut host);
    }

    #[test]
    fn second_session_on_the_same_document_is_refused() {
        let mut host = Host::new();
        let doc = page(&mut host);
        let mut first = start_capture(&mut host, doc, CaptureOptions::new(bus::NullSink)).unwrap();
        let second = start_capture(&mut host, doc, CaptureOptions::new(bus::NullSink));
        assert!(matches!(
            second,
            Err(CaptureError::Host(HostError::AlreadyCaptured { .. }))
        ));
        first.stop(&mut host);
        let mut third = start_capture(&mut host, doc, CaptureOptions::new(bus::NullSink)).unwrap();
        third.stop(&mut host);
    }

    #[test]
    fn stop_is_idempotent_and_empties_the_session() {
        let mut host = Host::new();
        let doc = page(&mut host);
        let mut session = start_capture(
            &mut host,
            doc,
            CaptureOptions::new(bus::NullSink).record_cross_origin_iframes(true),
        )
        .unwrap();
        assert_eq!(session.stats().message_listeners, 1);
        session.stop(&mut host);
        session.stop(&mut host);
        assert!(session.is_stopped());
        assert_eq!(session.stats(), CaptureStats::default());
        assert_eq!(host.document(doc).unwrap().observer_count(), 0);
        assert_eq!(host.capture_owner(doc), None);
        assert!(session.tick(&mut host).is_ok());
    }

    #[test]
    fn tick_without_changes_emits_nothing() {
        let mut host = Host::new();
        let doc = page(&mut host);
        let (tx, rx) = mpsc::channel();
        let mut session = start_capture(&mut host, doc, CaptureOptions::new(tx)).unwrap();
        rx.try_iter().count();
        session.tick(&mut host).unwrap();
        assert_eq!(rx.try_iter().count(), 0);
        session.stop(&mut host);
    }

    #[test]
    fn closing_the_captured_window_stops_the_session() {
        let mut host = Host::new();
        let doc = page(&mut host);
        let window = host.window_of(doc).unwrap();
        let mut session = start_capture(&mut host, doc, CaptureOptions::new(bus::NullSink)).unwrap();
        host.close_window(window).unwrap();
        session.tick(&mut host).unwrap();
        assert!(session.is_stopped());
        assert_eq!(session.stats(), CaptureStats::default());
    }
}
