use std::sync::mpsc::Sender;

use crate::events::CaptureEvent;

/// Receiver of finalized capture records.
pub trait EventSink {
    fn emit(&mut self, event: CaptureEvent);
}

impl EventSink for Sender<CaptureEvent> {
    fn emit(&mut self, event: CaptureEvent) {
        if self.send(event).is_err() {
            log::debug!(target: "bus", "event receiver dropped; record discarded");
        }
    }
}

/// Adapts a closure into an [`EventSink`].
pub struct FnSink<F>(pub F);

impl<F: FnMut(CaptureEvent)> EventSink for FnSink<F> {
    fn emit(&mut self, event: CaptureEvent) {
        (self.0)(event)
    }
}

/// Sink that drops everything, used by sessions that forward elsewhere.
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&mut self, _event: CaptureEvent) {}
}
