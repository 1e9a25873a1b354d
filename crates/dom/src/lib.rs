//! Observable document model used as the capture host.
//!
//! Documents are generational arenas; [`Host`] ties them to windows with
//! origins, nested frames and message ports.

mod document;
mod error;
mod host;
mod node;
mod notice;
pub mod traverse;

pub use document::Document;
pub use error::{DomError, HostError};
pub use host::{Host, Window, WindowMessage};
pub use node::{NodeData, NodeHandle, NodeKind, NodeRef};
pub use notice::MutationNotice;
