//! Wire protocol and transports for Tandem sessions: message types, versioned
//! postcard framing, channel selection, an in-memory loopback link with a
//! lossy unreliable lane, and bandwidth counters.

pub mod bandwidth;
pub mod channel;
pub mod messages;
pub mod transport;

pub use bandwidth::{NetworkCounters, StatsSnapshot};
pub use channel::{Channel, Envelope, Recipient};
pub use messages::{
    EntityDestroyed, EntityId, EntityPose, EntityScale, EntitySpawned, GrabRequest, Grabbed,
    HandleUpdate, HandlingRotationRequest, Message, MessageError, Motion, MotionRequest,
    PROTOCOL_VERSION, ParticipantId, ParticipantJoined, ParticipantLeft, ParticipantPose,
    PoseRequest, ReleaseRequest, Released, ScaleRequest, Tick, deserialize_message,
    serialize_message,
};
pub use transport::{Hub, HubPoll, LinkConfig, LoopbackEndpoint, Transport, TransportError, loopback_pair};
