//! Messages exchanged with a cross-origin nested context.
//!
//! The parent sends `Handshake` to the nested window. The nested session
//! answers with one `Snapshot` followed by any number of `MutationBatch`
//! messages, all tagged with the handshake token. Ids inside snapshots and
//! batches belong to the nested session's own id space.

use core_types::ContextToken;
use serde::{Deserialize, Serialize};
use snapshot::SerializedNodeWithId;
use thiserror::Error;

use crate::events::MutationData;

/// Tag that marks an envelope as ours among unrelated window messages.
pub const FRAME_CHANNEL: &str = "domtape/frames";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum FrameMessage {
    Handshake {
        token: ContextToken,
    },
    Snapshot {
        token: ContextToken,
        node: SerializedNodeWithId,
    },
    MutationBatch {
        token: ContextToken,
        data: MutationData,
    },
}

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("malformed frame message: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("message belongs to channel {0:?}")]
    ForeignChannel(String),
    #[error("message carries the reserved token")]
    InvalidToken,
}

#[derive(Serialize)]
struct EnvelopeOut<'a> {
    channel: &'static str,
    message: &'a FrameMessage,
}

#[derive(Deserialize)]
struct EnvelopeIn {
    channel: String,
    message: FrameMessage,
}

impl FrameMessage {
    pub fn token(&self) -> ContextToken {
        match self {
            FrameMessage::Handshake { token }
            | FrameMessage::Snapshot { token, .. }
            | FrameMessage::MutationBatch { token, .. } => *token,
        }
    }

    pub fn encode(&self) -> Result<String, FrameError> {
        Ok(serde_json::to_string(&EnvelopeOut {
            channel: FRAME_CHANNEL,
            message: self,
        })?)
    }

    pub fn decode(text: &str) -> Result<FrameMessage, FrameError> {
        let envelope: EnvelopeIn = serde_json::from_str(text)?;
        if envelope.channel != FRAME_CHANNEL {
            return Err(FrameError::ForeignChannel(envelope.channel));
        }
        if envelope.message.token() == ContextToken::INVALID {
            return Err(FrameError::InvalidToken);
        }
        Ok(envelope.message)
    }
}
