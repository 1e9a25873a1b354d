//! Node identity and serialization shared by the recorder and the replica.

pub mod css;
mod error;
mod mirror;
mod policy;
mod serialize;
mod types;
pub mod url;

pub use error::{MirrorError, SnapshotError};
pub use mirror::{Mirror, Slot};
pub use policy::{NodePolicy, SCRIPT_PLACEHOLDER, Verdict, mask_text};
pub use serialize::{
    NoHooks, SerializeHooks, SerializeOptions, serialize_node_with_id, serialize_text_value,
};
pub use types::{SerializedNode, SerializedNodeWithId};
