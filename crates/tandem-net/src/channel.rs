//! Delivery channels and addressing for outgoing messages.

use crate::messages::{Message, ParticipantId};

/// Delivery guarantee requested for a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// Every frame arrives, in send order.
    ReliableOrdered,
    /// Frames may be lost or arrive out of order.
    UnreliableUnordered,
}

/// Who should receive an outgoing message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recipient {
    /// Every connected participant.
    All,
    /// Everyone but one participant (usually the originator).
    AllExcept(ParticipantId),
    /// A single participant.
    Only(ParticipantId),
}

impl Recipient {
    /// Whether `participant` is addressed.
    pub fn includes(self, participant: ParticipantId) -> bool {
        match self {
            Self::All => true,
            Self::AllExcept(excluded) => excluded != participant,
            Self::Only(target) => target == participant,
        }
    }
}

/// A message queued by a session, waiting to be put on the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    /// Addressees.
    pub recipient: Recipient,
    /// Delivery guarantee.
    pub channel: Channel,
    /// Payload.
    pub message: Message,
}

impl Envelope {
    /// A reliable message to everyone.
    pub fn broadcast(message: Message) -> Self {
        Self {
            recipient: Recipient::All,
            channel: Channel::ReliableOrdered,
            message,
        }
    }

    /// A reliable message to one participant.
    pub fn to(participant: ParticipantId, message: Message) -> Self {
        Self {
            recipient: Recipient::Only(participant),
            channel: Channel::ReliableOrdered,
            message,
        }
    }
}
