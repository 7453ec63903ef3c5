//! Narrow interfaces to the scene graph and the physics engine.
//!
//! Sessions never touch a transform hierarchy or a rigid-body world
//! directly; they go through these traits. [`crate::headless`] provides
//! in-memory implementations.

use serde::{Deserialize, Serialize};
use tandem_math::Pose;
use tandem_net::{EntityId, Motion, ParticipantId};

/// Frame an entity's local pose is expressed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ParentFrame {
    /// The shared session frame (free entities).
    Session,
    /// A remote participant's viewpoint (entities it holds).
    Participant(ParticipantId),
    /// This device's own viewpoint (entities the local participant holds).
    LocalView,
}

/// Transform hierarchy of one device.
pub trait SceneGraph {
    /// Attach `entity` to `frame`. The local pose is set separately.
    fn reparent(&mut self, entity: EntityId, frame: ParentFrame);

    /// Place `entity` within its current parent frame.
    fn set_local_pose(&mut self, entity: EntityId, pose: Pose, scale: f32);

    /// Current pose of `entity` within its parent frame.
    fn local_pose(&self, entity: EntityId) -> Option<Pose>;

    /// Forget `entity`.
    fn remove(&mut self, entity: EntityId);

    /// Move a participant's viewpoint, in the session frame.
    fn set_participant_pose(&mut self, participant: ParticipantId, pose: Pose);

    /// Forget a participant's viewpoint.
    fn remove_participant(&mut self, participant: ParticipantId);

    /// Move the session frame relative to the device origin.
    fn set_session_frame(&mut self, frame: Pose);
}

/// Rigid-body simulation of one device.
pub trait PhysicsEngine {
    /// Give `entity` a dynamic body.
    fn insert_body(&mut self, entity: EntityId);

    /// Whether `entity` has a body.
    fn has_body(&self, entity: EntityId) -> bool;

    /// Switch simulation off (`true`) or on (`false`) for `entity`.
    fn set_kinematic(&mut self, entity: EntityId, kinematic: bool);

    /// Current velocities of `entity`.
    fn velocity(&self, entity: EntityId) -> Option<Motion>;

    /// Overwrite the velocities of `entity`.
    fn set_velocity(&mut self, entity: EntityId, motion: Motion);

    /// Forget `entity`'s body.
    fn remove(&mut self, entity: EntityId);
}
