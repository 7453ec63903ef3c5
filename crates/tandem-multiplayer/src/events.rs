//! Observer registration for session state changes.
//!
//! Sessions call [`Listeners::emit`] synchronously whenever replicated state
//! changes, independently of how (or whether) the change travels over the
//! network.

use serde::{Deserialize, Serialize};
use tandem_math::Pose;
use tandem_net::{EntityId, ParticipantId};

/// Something observable happened in a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SessionEvent {
    /// A participant joined.
    ParticipantJoined {
        /// New participant.
        participant: ParticipantId,
        /// Display name.
        name: String,
    },
    /// A participant left. Anything it held was released first.
    ParticipantLeft {
        /// Departed participant.
        participant: ParticipantId,
    },
    /// An entity appeared.
    Spawned {
        /// New entity.
        entity: EntityId,
    },
    /// An entity was removed.
    Destroyed {
        /// Removed entity.
        entity: EntityId,
    },
    /// An entity is now held.
    Grabbed {
        /// Held entity.
        entity: EntityId,
        /// New holder.
        holder: ParticipantId,
    },
    /// A held entity was let go.
    Released {
        /// Released entity.
        entity: EntityId,
        /// Final canonical pose.
        pose: Pose,
    },
    /// An entity started moving or came to rest.
    RestChanged {
        /// Affected entity.
        entity: EntityId,
        /// New classification.
        resting: bool,
    },
    /// An entity's scale changed.
    ScaleChanged {
        /// Affected entity.
        entity: EntityId,
        /// New (clamped) scale.
        scale: f32,
    },
}

/// Handle returned by [`Listeners::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// A set of callbacks invoked in subscription order.
pub struct Listeners<E> {
    callbacks: Vec<(ListenerId, Box<dyn FnMut(&E)>)>,
    next_id: u64,
}

impl<E> Listeners<E> {
    /// Creates an empty listener set.
    pub fn new() -> Self {
        Self {
            callbacks: Vec::new(),
            next_id: 0,
        }
    }

    /// Register `callback`; it runs for every subsequent event.
    pub fn subscribe(&mut self, callback: impl FnMut(&E) + 'static) -> ListenerId {
        let id = ListenerId(self.next_id);
        self.next_id += 1;
        self.callbacks.push((id, Box::new(callback)));
        id
    }

    /// Remove a callback. Returns `false` if it was not registered.
    pub fn unsubscribe(&mut self, id: ListenerId) -> bool {
        let before = self.callbacks.len();
        self.callbacks.retain(|(cid, _)| *cid != id);
        self.callbacks.len() != before
    }

    /// Invoke every callback with `event`.
    pub fn emit(&mut self, event: &E) {
        for (_, callback) in &mut self.callbacks {
            callback(event);
        }
    }

    /// Number of registered callbacks.
    pub fn len(&self) -> usize {
        self.callbacks.len()
    }

    /// Whether nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }
}

impl<E> Default for Listeners<E> {
    fn default() -> Self {
        Self::new()
    }
}
