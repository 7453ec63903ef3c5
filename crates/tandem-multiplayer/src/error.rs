//! Error type for session operations.

use tandem_net::{EntityId, ParticipantId, TransportError};

/// Errors returned by session operations.
///
/// Ownership conflicts are not errors; they come back as outcome enums.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The operation needs the host's authority.
    #[error("{0} is only available on the host")]
    NotAuthoritative(&'static str),

    /// No such entity in this session.
    #[error("unknown entity {0}")]
    UnknownEntity(EntityId),

    /// No such participant in this session.
    #[error("unknown participant {0}")]
    UnknownParticipant(ParticipantId),

    /// Sending or receiving failed.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}
