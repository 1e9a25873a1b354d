//! Capture a live document tree as a stream of serializable records and
//! rebuild it elsewhere.
//!
//! The host model lives in [`dom`]; [`record`] turns it into
//! [`bus::CaptureEvent`]s and [`replay`] rebuilds a replica from them.

pub use bus;
pub use core_types;
pub use dom;
pub use record;
pub use replay;
pub use snapshot;

pub use bus::{CaptureEvent, EventSink, MutationData};
pub use record::{CaptureConfig, CaptureError, CaptureOptions, CaptureSession, start_capture};
pub use replay::Replica;
