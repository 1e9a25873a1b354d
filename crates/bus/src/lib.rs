mod events;
mod frame;
mod sink;

pub use events::{
    AddedNode, AttributeMutation, CaptureEvent, IncrementalData, MutationData, RemovedNode,
    TextMutation,
};
pub use frame::{FRAME_CHANNEL, FrameError, FrameMessage};
pub use sink::{EventSink, FnSink, NullSink};
