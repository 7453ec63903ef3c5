//! Network message types and serialization.
//!
//! All messages are serialized with [`postcard`] and prefixed with a protocol
//! version byte. Use [`serialize_message`] and [`deserialize_message`] for
//! encoding/decoding.
//!
//! Replicas only ever send requests and their own participant pose; the
//! host answers with authoritative notifications. Every per-entity
//! notification carries that entity's [`Tick`] so receivers can drop stale
//! or reordered copies.

use std::fmt;

use serde::{Deserialize, Serialize};
use tandem_config::EntityConfig;
use tandem_math::{Pose, Quat, Vec3};

/// Current wire-protocol version. Prepended to every serialized message.
pub const PROTOCOL_VERSION: u8 = 1;

/// Per-sender ordering token. Receivers apply an update only if its tick is
/// greater than the last one applied.
pub type Tick = u64;

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Identifier of a shared entity, assigned by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityId(pub u64);

/// Identifier of a session participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ParticipantId(pub u64);

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "entity#{}", self.0)
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "participant#{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Top-level enum
// ---------------------------------------------------------------------------

/// Top-level network message. The enum discriminant is the type tag.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Message {
    // --- Requests (replica -> host) ---
    /// Ask to take hold of an entity.
    GrabRequest(GrabRequest),
    /// Ask to let go of a held entity.
    ReleaseRequest(ReleaseRequest),
    /// Let go and fling the entity along the view direction.
    ThrowRequest(ReleaseRequest),
    /// Ask the host to place an entity.
    SetPoseRequest(PoseRequest),
    /// Ask the host to set an entity's velocities.
    SetMotionRequest(MotionRequest),
    /// Ask the host to set an entity's scale.
    SetScaleRequest(ScaleRequest),
    /// Ask the host to grow or shrink an entity.
    AddScaleRequest(ScaleRequest),
    /// Ask the host to turn a held entity relative to its current handle.
    AddHandlingRotation(HandlingRotationRequest),
    /// Ask the host to replace the handle rotation of a held entity.
    SetHandlingRotation(HandlingRotationRequest),

    // --- Both directions ---
    /// A participant's viewpoint in the session frame. Replicas send their
    /// own; the host relays them to everyone else.
    ParticipantPose(ParticipantPose),

    // --- Notifications (host -> replicas) ---
    /// A participant joined the session.
    ParticipantJoined(ParticipantJoined),
    /// A participant left the session.
    ParticipantLeft(ParticipantLeft),
    /// Full state of an entity, on spawn or for a late joiner.
    EntitySpawned(EntitySpawned),
    /// An entity was removed.
    EntityDestroyed(EntityDestroyed),
    /// An entity is now held.
    Grabbed(Grabbed),
    /// Authoritative handle offset of a held entity.
    HandleUpdate(HandleUpdate),
    /// An entity was let go at its final canonical pose.
    Released(Released),
    /// Canonical pose of a free entity.
    EntityPose(EntityPose),
    /// Canonical scale of an entity.
    EntityScale(EntityScale),
}

impl Message {
    /// The entity this message concerns, if any.
    pub fn entity(&self) -> Option<EntityId> {
        match self {
            Self::GrabRequest(m) => Some(m.entity),
            Self::ReleaseRequest(m) | Self::ThrowRequest(m) => Some(m.entity),
            Self::SetPoseRequest(m) => Some(m.entity),
            Self::SetMotionRequest(m) => Some(m.entity),
            Self::SetScaleRequest(m) | Self::AddScaleRequest(m) => Some(m.entity),
            Self::AddHandlingRotation(m) | Self::SetHandlingRotation(m) => Some(m.entity),
            Self::EntitySpawned(m) => Some(m.entity),
            Self::EntityDestroyed(m) => Some(m.entity),
            Self::Grabbed(m) => Some(m.entity),
            Self::HandleUpdate(m) => Some(m.entity),
            Self::Released(m) => Some(m.entity),
            Self::EntityPose(m) => Some(m.entity),
            Self::EntityScale(m) => Some(m.entity),
            Self::ParticipantPose(_) | Self::ParticipantJoined(_) | Self::ParticipantLeft(_) => {
                None
            }
        }
    }

    /// Whether only the host may originate this message.
    pub fn is_authoritative(&self) -> bool {
        matches!(
            self,
            Self::ParticipantJoined(_)
                | Self::ParticipantLeft(_)
                | Self::EntitySpawned(_)
                | Self::EntityDestroyed(_)
                | Self::Grabbed(_)
                | Self::HandleUpdate(_)
                | Self::Released(_)
                | Self::EntityPose(_)
                | Self::EntityScale(_)
        )
    }
}

// ---------------------------------------------------------------------------
// Payload structs
// ---------------------------------------------------------------------------

/// Linear and angular velocity of a physics body.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct Motion {
    /// Linear velocity in m/s.
    pub linear: Vec3,
    /// Angular velocity in rad/s.
    pub angular: Vec3,
}

/// Grab request carrying the requester's current viewpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GrabRequest {
    /// Entity to grab.
    pub entity: EntityId,
    /// Requester's viewpoint in the session frame.
    pub pose: Pose,
}

/// Release (or throw) request carrying the holder's current viewpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReleaseRequest {
    /// Entity to release.
    pub entity: EntityId,
    /// Holder's viewpoint in the session frame.
    pub pose: Pose,
}

/// Placement request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PoseRequest {
    /// Target entity.
    pub entity: EntityId,
    /// New pose in the session frame.
    pub pose: Pose,
}

/// Velocity request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MotionRequest {
    /// Target entity.
    pub entity: EntityId,
    /// New velocities.
    pub motion: Motion,
}

/// Scale request; absolute or relative depending on the message variant.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScaleRequest {
    /// Target entity.
    pub entity: EntityId,
    /// Scale value or delta.
    pub scale: f32,
}

/// Rotation applied to the handle of a held entity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HandlingRotationRequest {
    /// Held entity.
    pub entity: EntityId,
    /// Rotation to apply.
    pub rotation: Quat,
    /// Interpret `rotation` in the entity's own frame rather than the
    /// session frame.
    pub local: bool,
}

/// Participant viewpoint update.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ParticipantPose {
    /// Whose viewpoint.
    pub participant: ParticipantId,
    /// Sender's tick for this participant.
    pub tick: Tick,
    /// Viewpoint in the session frame.
    pub pose: Pose,
}

/// Join notification.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ParticipantJoined {
    /// New participant.
    pub participant: ParticipantId,
    /// Display name.
    pub name: String,
    /// Last known viewpoint.
    pub pose: Pose,
}

/// Leave notification.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ParticipantLeft {
    /// Departed participant.
    pub participant: ParticipantId,
}

/// Complete entity state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EntitySpawned {
    /// Entity identifier.
    pub entity: EntityId,
    /// Entity tick at the time of the snapshot.
    pub tick: Tick,
    /// Canonical pose in the session frame.
    pub pose: Pose,
    /// Canonical uniform scale.
    pub scale: f32,
    /// Whether the entity is driven by a physics body.
    pub has_body: bool,
    /// Whether the host currently considers it at rest.
    pub resting: bool,
    /// Current holder, if any.
    pub holder: Option<ParticipantId>,
    /// Current handle offset, if held.
    pub handle: Option<Pose>,
    /// Entity settings.
    pub config: EntityConfig,
}

/// Removal notification.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EntityDestroyed {
    /// Removed entity.
    pub entity: EntityId,
}

/// Ownership notification.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Grabbed {
    /// Held entity.
    pub entity: EntityId,
    /// Entity tick.
    pub tick: Tick,
    /// New holder.
    pub holder: ParticipantId,
    /// Canonical pose at the moment of the grab.
    pub pose: Pose,
}

/// Handle offset notification.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HandleUpdate {
    /// Held entity.
    pub entity: EntityId,
    /// Entity tick.
    pub tick: Tick,
    /// Holder the handle is relative to.
    pub holder: ParticipantId,
    /// Pose of the entity in the holder's viewpoint frame.
    pub handle: Pose,
}

/// Release notification.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Released {
    /// Released entity.
    pub entity: EntityId,
    /// Entity tick.
    pub tick: Tick,
    /// Final canonical pose.
    pub pose: Pose,
    /// Velocities imparted on release (throw).
    pub motion: Option<Motion>,
}

/// Canonical pose of a free entity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EntityPose {
    /// Entity identifier.
    pub entity: EntityId,
    /// Entity tick.
    pub tick: Tick,
    /// Canonical pose in the session frame.
    pub pose: Pose,
    /// Velocities, present for physics-driven entities.
    pub motion: Option<Motion>,
    /// Whether the host has classified the entity as resting.
    pub resting: bool,
}

/// Canonical scale.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EntityScale {
    /// Entity identifier.
    pub entity: EntityId,
    /// Entity tick.
    pub tick: Tick,
    /// New scale, already clamped.
    pub scale: f32,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors that can occur during message deserialization.
#[derive(Debug, thiserror::Error)]
pub enum MessageError {
    /// The payload was empty (no version byte).
    #[error("empty payload, missing version byte")]
    EmptyPayload,

    /// The version byte does not match [`PROTOCOL_VERSION`].
    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(u8),

    /// Postcard encoding or decoding failed.
    #[error("postcard error: {0}")]
    Postcard(#[from] postcard::Error),
}

// ---------------------------------------------------------------------------
// Serialization helpers
// ---------------------------------------------------------------------------

/// Serialize a [`Message`] into a versioned binary payload.
///
/// Wire format: `[version: u8] [postcard-encoded Message]`
pub fn serialize_message(msg: &Message) -> Result<Vec<u8>, MessageError> {
    let body = postcard::to_allocvec(msg)?;
    let mut out = Vec::with_capacity(1 + body.len());
    out.push(PROTOCOL_VERSION);
    out.extend_from_slice(&body);
    Ok(out)
}

/// Deserialize a versioned binary payload into a [`Message`].
pub fn deserialize_message(data: &[u8]) -> Result<Message, MessageError> {
    let (&version, body) = data.split_first().ok_or(MessageError::EmptyPayload)?;
    if version != PROTOCOL_VERSION {
        return Err(MessageError::UnsupportedVersion(version));
    }
    Ok(postcard::from_bytes(body)?)
}
