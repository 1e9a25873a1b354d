//! Capture pipeline: turns a live host document, and the documents nested in
//! it, into a stream of [`bus::CaptureEvent`] records.

mod cross_origin;
mod error;
mod frames;
mod mutation_buffer;
mod options;
mod session;

pub use error::{CaptureError, ConfigError};
pub use frames::{ContextInfo, ContextState, FrameCoordinator};
pub use options::{CaptureConfig, CaptureOptions};
pub use session::{CaptureSession, CaptureStats, start_capture};
