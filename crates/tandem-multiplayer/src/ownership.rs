//! Ownership arbitration: who may hold an entity, and where it ends up.
//!
//! [`OwnershipArbiter`] is pure: it decides and computes, the host session
//! applies the side effects (physics, scene graph, broadcasts).

use serde::{Deserialize, Serialize};
use tandem_config::{EntityConfig, PositionMode, RotationMode};
use tandem_math::{Pose, Quat, Vec3, horizontal_forward, look_rotation, quantize_to_grid};
use tandem_net::ParticipantId;

// ---------------------------------------------------------------------------
// Ownership
// ---------------------------------------------------------------------------

/// Ownership state of one entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Ownership {
    /// Nobody holds it; physics drives it.
    #[default]
    Free,
    /// `holder` controls it; physics is off.
    Held {
        /// Current holder.
        holder: ParticipantId,
    },
    /// A steal is in progress: the previous holder has been released and
    /// `to` gets the entity once the hand-off delay elapses.
    Releasing {
        /// Pending new holder.
        to: ParticipantId,
    },
}

impl Ownership {
    /// The current holder, if held.
    pub fn holder(&self) -> Option<ParticipantId> {
        match self {
            Self::Held { holder } => Some(*holder),
            Self::Free | Self::Releasing { .. } => None,
        }
    }

    /// Whether a holder currently controls the entity.
    pub fn is_held(&self) -> bool {
        matches!(self, Self::Held { .. })
    }
}

// ---------------------------------------------------------------------------
// Decisions
// ---------------------------------------------------------------------------

/// Why a grab was turned down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrabRejection {
    /// The entity is not interactable.
    NotInteractable,
    /// The requester is not a session participant.
    UnknownParticipant,
    /// Someone else holds it and the entity is exclusive.
    ExclusivelyHeld {
        /// The holder that keeps it.
        holder: ParticipantId,
    },
    /// A steal hand-off is already in progress.
    HandOffPending,
}

/// Result of [`OwnershipArbiter::decide_grab`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrabDecision {
    /// Take it now.
    Grant,
    /// The requester already holds it.
    AlreadyHolding,
    /// Release `from` now, hand over after the delay.
    Steal {
        /// Current holder being displaced.
        from: ParticipantId,
    },
    /// No-op.
    Reject(GrabRejection),
}

/// Result of [`OwnershipArbiter::decide_release`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseDecision {
    /// The caller holds it; release.
    Release,
    /// Nobody holds it.
    NotHeld,
    /// Someone else holds it.
    NotHolder {
        /// Actual holder.
        holder: ParticipantId,
    },
}

/// Stateless ownership rules.
pub struct OwnershipArbiter;

impl OwnershipArbiter {
    /// Decide what a grab by `requester` does to an entity in `ownership`.
    pub fn decide_grab(
        ownership: Ownership,
        config: &EntityConfig,
        requester: ParticipantId,
        requester_known: bool,
    ) -> GrabDecision {
        if !config.interactable {
            return GrabDecision::Reject(GrabRejection::NotInteractable);
        }
        if !requester_known {
            return GrabDecision::Reject(GrabRejection::UnknownParticipant);
        }
        match ownership {
            Ownership::Free => GrabDecision::Grant,
            Ownership::Held { holder } if holder == requester => GrabDecision::AlreadyHolding,
            Ownership::Held { holder } if config.exclusive_mode => {
                GrabDecision::Reject(GrabRejection::ExclusivelyHeld { holder })
            }
            Ownership::Held { holder } => GrabDecision::Steal { from: holder },
            Ownership::Releasing { .. } => GrabDecision::Reject(GrabRejection::HandOffPending),
        }
    }

    /// Only the holder may release.
    pub fn decide_release(ownership: Ownership, caller: ParticipantId) -> ReleaseDecision {
        match ownership.holder() {
            Some(holder) if holder == caller => ReleaseDecision::Release,
            Some(holder) => ReleaseDecision::NotHolder { holder },
            None => ReleaseDecision::NotHeld,
        }
    }

    /// Handle offset (entity pose in the grabber's viewpoint frame) for a
    /// grab from `grab_pose` of an entity at `entity_pose`.
    pub fn grab_handle(config: &EntityConfig, entity_pose: Pose, grab_pose: Pose) -> Pose {
        let inverse_view = grab_pose.rotation.inverse();
        let position = match config.position_mode {
            PositionMode::CenterToView => config.position_offset,
            PositionMode::KeepInitialOffset => {
                inverse_view * (entity_pose.position - grab_pose.position)
            }
        };
        let rotation = match config.rotation_mode {
            RotationMode::UseViewRotation if !config.look_forward => {
                (inverse_view * entity_pose.rotation).normalize()
            }
            _ => Quat::IDENTITY,
        };
        Pose::new(position, rotation)
    }

    /// Orientation the handle rotation is applied on top of, in the session
    /// frame. A held entity's session-frame rotation is
    /// `rotation_basis(..) * handle.rotation`.
    pub fn rotation_basis(config: &EntityConfig, canonical: Quat, holder: Quat) -> Quat {
        match config.rotation_mode {
            RotationMode::KeepInitialRotation => canonical,
            RotationMode::UseViewRotation => holder,
            RotationMode::ForkliftMode => horizontal_forward(holder)
                .and_then(|forward| look_rotation(forward, Vec3::Y))
                .unwrap_or(canonical),
        }
    }

    /// Final canonical pose when `holder_pose` lets go of an entity held
    /// with `handle`. Applies grid snapping.
    pub fn release_pose(
        config: &EntityConfig,
        canonical: Pose,
        handle: Pose,
        holder_pose: Pose,
    ) -> Pose {
        let mut position = holder_pose.transform_point(handle.position);
        if config.snap_to_grid {
            position = quantize_to_grid(position, config.grid_size);
        }
        let basis = Self::rotation_basis(config, canonical.rotation, holder_pose.rotation);
        Pose::new(position, (basis * handle.rotation).normalize())
    }

    /// New handle rotation after turning a held entity by `rotation`.
    ///
    /// `local` turns it about its own axes; otherwise `rotation` is
    /// applied in the session frame.
    pub fn turned_handle(
        config: &EntityConfig,
        handle: Quat,
        rotation: Quat,
        local: bool,
        canonical: Quat,
        holder: Quat,
    ) -> Quat {
        if local {
            return (handle * rotation).normalize();
        }
        let basis = Self::rotation_basis(config, canonical, holder);
        (basis.inverse() * rotation * basis * handle).normalize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::FRAC_PI_2;
    use tandem_math::FORWARD;

    const A: ParticipantId = ParticipantId(1);
    const B: ParticipantId = ParticipantId(2);

    fn exclusive() -> EntityConfig {
        EntityConfig::default()
    }

    fn shared() -> EntityConfig {
        EntityConfig {
            exclusive_mode: false,
            ..Default::default()
        }
    }

    #[test]
    fn test_grab_free_granted() {
        let d = OwnershipArbiter::decide_grab(Ownership::Free, &exclusive(), A, true);
        assert_eq!(d, GrabDecision::Grant);
    }

    #[test]
    fn test_grab_rejections() {
        let mut cfg = exclusive();
        let held_by_a = Ownership::Held { holder: A };
        assert_eq!(
            OwnershipArbiter::decide_grab(held_by_a, &cfg, B, true),
            GrabDecision::Reject(GrabRejection::ExclusivelyHeld { holder: A })
        );
        assert_eq!(
            OwnershipArbiter::decide_grab(Ownership::Free, &cfg, B, false),
            GrabDecision::Reject(GrabRejection::UnknownParticipant)
        );
        cfg.interactable = false;
        assert_eq!(
            OwnershipArbiter::decide_grab(Ownership::Free, &cfg, A, true),
            GrabDecision::Reject(GrabRejection::NotInteractable)
        );
    }

    #[test]
    fn test_grab_same_holder_idempotent() {
        let d = OwnershipArbiter::decide_grab(Ownership::Held { holder: A }, &shared(), A, true);
        assert_eq!(d, GrabDecision::AlreadyHolding);
    }

    #[test]
    fn test_grab_non_exclusive_steals() {
        let d = OwnershipArbiter::decide_grab(Ownership::Held { holder: A }, &shared(), B, true);
        assert_eq!(d, GrabDecision::Steal { from: A });

        let pending = Ownership::Releasing { to: B };
        let d = OwnershipArbiter::decide_grab(pending, &shared(), A, true);
        assert_eq!(d, GrabDecision::Reject(GrabRejection::HandOffPending));
    }

    #[test]
    fn test_release_only_by_holder() {
        let held = Ownership::Held { holder: A };
        assert_eq!(OwnershipArbiter::decide_release(held, A), ReleaseDecision::Release);
        assert_eq!(
            OwnershipArbiter::decide_release(held, B),
            ReleaseDecision::NotHolder { holder: A }
        );
        assert_eq!(
            OwnershipArbiter::decide_release(Ownership::Free, A),
            ReleaseDecision::NotHeld
        );
    }

    #[test]
    fn test_center_to_view_handle() {
        let cfg = exclusive();
        let entity = Pose::from_position(Vec3::new(3.0, 0.0, 3.0));
        let view = Pose::from_position(Vec3::new(0.0, 1.6, 0.0));
        let handle = OwnershipArbiter::grab_handle(&cfg, entity, view);
        assert_eq!(handle, Pose::from_position(FORWARD));
    }

    #[test]
    fn test_keep_offset_release_at_same_view_is_identity() {
        let cfg = EntityConfig {
            position_mode: PositionMode::KeepInitialOffset,
            rotation_mode: RotationMode::UseViewRotation,
            ..Default::default()
        };
        let entity = Pose::new(Vec3::new(1.0, 0.5, -2.0), Quat::from_rotation_x(0.3));
        let view = Pose::new(Vec3::new(0.0, 1.6, 0.0), Quat::from_rotation_y(0.8));

        let handle = OwnershipArbiter::grab_handle(&cfg, entity, view);
        let released = OwnershipArbiter::release_pose(&cfg, entity, handle, view);
        assert!(released.abs_diff_eq(entity, 1e-5), "{released:?}");
    }

    #[test]
    fn test_keep_rotation_ignores_view_turn() {
        let cfg = exclusive();
        let canonical = Pose::new(Vec3::ZERO, Quat::from_rotation_z(0.4));
        let handle = OwnershipArbiter::grab_handle(&cfg, canonical, Pose::IDENTITY);
        let turned_view = Pose::new(Vec3::ZERO, Quat::from_rotation_y(FRAC_PI_2));

        let released = OwnershipArbiter::release_pose(&cfg, canonical, handle, turned_view);
        assert!(released.rotation.abs_diff_eq(canonical.rotation, 1e-5));
        // CenterToView: one meter ahead of the turned view.
        assert!(released.position.abs_diff_eq(Vec3::NEG_X, 1e-5));
    }

    #[test]
    fn test_forklift_release_is_yaw_only() {
        let cfg = EntityConfig {
            rotation_mode: RotationMode::ForkliftMode,
            ..Default::default()
        };
        let pitched_view = Pose::new(
            Vec3::ZERO,
            Quat::from_rotation_y(FRAC_PI_2) * Quat::from_rotation_x(-0.5),
        );
        let released =
            OwnershipArbiter::release_pose(&cfg, Pose::IDENTITY, Pose::IDENTITY, pitched_view);
        let forward = released.rotation * FORWARD;
        assert!(forward.abs_diff_eq(Vec3::NEG_X, 1e-5), "{forward:?}");
    }

    #[test]
    fn test_grid_snap_on_release() {
        let cfg = EntityConfig {
            position_mode: PositionMode::KeepInitialOffset,
            snap_to_grid: true,
            grid_size: 0.5,
            ..Default::default()
        };
        let handle = Pose::from_position(Vec3::new(1.23, 0.0, 0.81));
        let released = OwnershipArbiter::release_pose(&cfg, Pose::IDENTITY, handle, Pose::IDENTITY);
        assert!(released.position.abs_diff_eq(Vec3::new(1.0, 0.0, 1.0), 1e-6));
    }

    #[test]
    fn test_turned_handle_world_rotation() {
        let cfg = EntityConfig {
            rotation_mode: RotationMode::UseViewRotation,
            ..Default::default()
        };
        let holder = Quat::from_rotation_y(0.7);
        let handle = Quat::from_rotation_x(0.2);
        let q = Quat::from_rotation_z(0.5);

        let new_handle = OwnershipArbiter::turned_handle(&cfg, handle, q, false, Quat::IDENTITY, holder);
        // World orientation is pre-multiplied by q.
        assert!((holder * new_handle).abs_diff_eq(q * holder * handle, 1e-5));

        let local = OwnershipArbiter::turned_handle(&cfg, handle, q, true, Quat::IDENTITY, holder);
        assert!(local.abs_diff_eq(handle * q, 1e-5));
    }
}
