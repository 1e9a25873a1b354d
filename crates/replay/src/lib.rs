//! Rebuilds a document from capture records, to check that a stream
//! reproduces its source.

mod error;
mod replica;

pub use error::ReplayError;
pub use replica::Replica;
