use core_types::DocId;
use dom::HostError;
use snapshot::{MirrorError, SnapshotError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error(transparent)]
    Host(#[from] HostError),
    #[error("mirror invariant violated: {0}")]
    Mirror(#[from] MirrorError),
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
    #[error("document {0:?} produced no snapshot")]
    EmptySnapshot(DocId),
    #[error("cross-origin context sent inconsistent data: {0}")]
    Remote(&'static str),
}

impl CaptureError {
    /// True for broken internal invariants, as opposed to host failures.
    pub fn is_invariant_violation(&self) -> bool {
        match self {
            CaptureError::Mirror(err) | CaptureError::Snapshot(SnapshotError::Mirror(err)) => {
                *err != MirrorError::Exhausted
            }
            _ => false,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid capture config: {0}")]
    Toml(#[from] toml::de::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_types::NodeId;

    #[test]
    fn exhausted_ids_are_not_skippable() {
        assert!(CaptureError::from(MirrorError::DuplicateId(NodeId(3))).is_invariant_violation());
        assert!(!CaptureError::from(MirrorError::Exhausted).is_invariant_violation());
        assert!(
            !CaptureError::from(SnapshotError::Mirror(MirrorError::Exhausted))
                .is_invariant_violation()
        );
    }
}
