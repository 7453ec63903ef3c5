//! Operations a participant can perform, shared by host and replica.

use tandem_math::{Pose, Quat};
use tandem_net::{EntityId, Motion};

use crate::error::SessionError;

/// What the local participant can do in a session.
///
/// On the host every call is applied immediately. On a replica each call
/// becomes a request to the host and local state changes only when the
/// host's notification arrives. Ownership conflicts are silent no-ops.
pub trait SessionControl {
    /// Update the local viewpoint (session frame).
    fn set_local_viewpoint(&mut self, pose: Pose);

    /// Try to take hold of `entity` from the current viewpoint.
    fn grab(&mut self, entity: EntityId) -> Result<(), SessionError>;

    /// Let go of `entity` if held by the local participant.
    fn release(&mut self, entity: EntityId) -> Result<(), SessionError>;

    /// Let go and fling `entity` along the view direction.
    fn throw(&mut self, entity: EntityId) -> Result<(), SessionError>;

    /// Place `entity` exactly at `pose`.
    fn set_pose(&mut self, entity: EntityId, pose: Pose) -> Result<(), SessionError>;

    /// Set the velocities of `entity`.
    fn set_motion(&mut self, entity: EntityId, motion: Motion) -> Result<(), SessionError>;

    /// Set the scale of `entity` (clamped by the host).
    fn set_scale(&mut self, entity: EntityId, scale: f32) -> Result<(), SessionError>;

    /// Grow or shrink `entity` by `delta`.
    fn add_scale(&mut self, entity: EntityId, delta: f32) -> Result<(), SessionError>;

    /// Replace the handle rotation of a held entity.
    fn set_handling_rotation(
        &mut self,
        entity: EntityId,
        rotation: Quat,
        local: bool,
    ) -> Result<(), SessionError>;

    /// Turn a held entity by `rotation`.
    fn add_handling_rotation(
        &mut self,
        entity: EntityId,
        rotation: Quat,
        local: bool,
    ) -> Result<(), SessionError>;

    /// Create an entity with the session's default settings. Host only.
    fn spawn(&mut self, pose: Pose, scale: f32, has_body: bool) -> Result<EntityId, SessionError>;

    /// Remove an entity. Host only.
    fn destroy(&mut self, entity: EntityId) -> Result<(), SessionError>;

    /// Advance the session clock by `dt` seconds: run due tasks and update
    /// the displayed state.
    fn advance(&mut self, dt: f32);
}
