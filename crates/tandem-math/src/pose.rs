//! Rigid poses and frame-relative conversions.

use glam::{Mat3, Quat, Vec3};
use serde::{Deserialize, Serialize};

/// Forward direction of a viewpoint or entity in its own frame.
pub const FORWARD: Vec3 = Vec3::NEG_Z;

/// Position plus orientation, always interpreted relative to some frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    /// Translation in meters.
    pub position: Vec3,
    /// Orientation (unit quaternion).
    pub rotation: Quat,
}

impl Pose {
    /// The identity pose: origin, no rotation.
    pub const IDENTITY: Self = Self {
        position: Vec3::ZERO,
        rotation: Quat::IDENTITY,
    };

    /// Creates a pose from its parts.
    pub fn new(position: Vec3, rotation: Quat) -> Self {
        Self { position, rotation }
    }

    /// A pose at `position` with identity rotation.
    pub fn from_position(position: Vec3) -> Self {
        Self::new(position, Quat::IDENTITY)
    }

    /// Inverse transform, so that `p.compose(p.inverse())` is the identity.
    pub fn inverse(self) -> Self {
        let inv = self.rotation.inverse();
        Self::new(inv * -self.position, inv)
    }

    /// Applies `child` (expressed in this pose's frame) on top of this pose.
    pub fn compose(self, child: Pose) -> Self {
        Self::new(
            self.rotation * child.position + self.position,
            (self.rotation * child.rotation).normalize(),
        )
    }

    /// Transforms a point from this pose's local space to its parent space.
    pub fn transform_point(self, point: Vec3) -> Vec3 {
        self.rotation * point + self.position
    }

    /// Euclidean distance between the two positions.
    pub fn distance(self, other: Pose) -> f32 {
        self.position.distance(other.position)
    }

    /// Angle between the two orientations in degrees.
    pub fn angle_deg(self, other: Pose) -> f32 {
        angle_deg(self.rotation, other.rotation)
    }

    /// First-order blend toward `target` with separate position and rotation
    /// factors in `[0, 1]`.
    pub fn blend(self, target: Pose, position_factor: f32, rotation_factor: f32) -> Self {
        Self::new(
            self.position.lerp(target.position, position_factor.clamp(0.0, 1.0)),
            self.rotation
                .lerp(target.rotation, rotation_factor.clamp(0.0, 1.0))
                .normalize(),
        )
    }

    /// Returns `true` if both parts are within the given tolerances.
    pub fn abs_diff_eq(self, other: Pose, max_abs_diff: f32) -> bool {
        self.position.abs_diff_eq(other.position, max_abs_diff)
            && (self.rotation.abs_diff_eq(other.rotation, max_abs_diff)
                || self.rotation.abs_diff_eq(-other.rotation, max_abs_diff))
    }
}

impl Default for Pose {
    fn default() -> Self {
        Self::IDENTITY
    }
}

// ---------------------------------------------------------------------------
// Frame conversions
// ---------------------------------------------------------------------------

/// Expresses a pose given relative to `frame` in the frame's parent space.
pub fn compose_into(pose: Pose, frame: Pose) -> Pose {
    frame.compose(pose)
}

/// Expresses a parent-space pose relative to `frame`. Inverse of
/// [`compose_into`].
pub fn project(pose: Pose, frame: Pose) -> Pose {
    frame.inverse().compose(pose)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Angle between two orientations in degrees, in `[0, 180]`.
pub fn angle_deg(a: Quat, b: Quat) -> f32 {
    a.angle_between(b).to_degrees()
}

/// Rotation whose [`FORWARD`] axis points along `forward`, keeping `up` as
/// close to vertical as possible. Returns `None` for a degenerate direction.
pub fn look_rotation(forward: Vec3, up: Vec3) -> Option<Quat> {
    let f = forward.try_normalize()?;
    let right = f.cross(up).try_normalize()?;
    let up = right.cross(f);
    Some(Quat::from_mat3(&Mat3::from_cols(right, up, -f)).normalize())
}

/// The forward direction of `rotation` projected onto the horizontal plane.
/// `None` when looking straight up or down.
pub fn horizontal_forward(rotation: Quat) -> Option<Vec3> {
    let f = rotation * FORWARD;
    Vec3::new(f.x, 0.0, f.z).try_normalize()
}

/// Rounds each component to the nearest multiple of `grid_size`.
pub fn quantize_to_grid(position: Vec3, grid_size: f32) -> Vec3 {
    if grid_size <= 0.0 {
        return position;
    }
    (position / grid_size).round() * grid_size
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::FRAC_PI_2;

    const EPS: f32 = 1e-5;

    #[test]
    fn test_compose_then_project_is_identity() {
        let frame = Pose::new(Vec3::new(1.0, 2.0, 3.0), Quat::from_rotation_y(0.7));
        let local = Pose::new(Vec3::new(-0.5, 0.25, 4.0), Quat::from_rotation_x(0.3));

        let world = compose_into(local, frame);
        let back = project(world, frame);
        assert!(back.abs_diff_eq(local, EPS), "{back:?} != {local:?}");
    }

    #[test]
    fn test_compose_into_rotates_offset() {
        let frame = Pose::new(Vec3::new(10.0, 0.0, 0.0), Quat::from_rotation_y(FRAC_PI_2));
        let local = Pose::from_position(FORWARD);

        // Quarter turn left about Y maps -Z to -X.
        let world = compose_into(local, frame);
        assert!(world.position.abs_diff_eq(Vec3::new(9.0, 0.0, 0.0), EPS));
    }

    #[test]
    fn test_inverse_cancels() {
        let p = Pose::new(Vec3::new(3.0, -1.0, 2.0), Quat::from_rotation_z(1.1));
        assert!(p.compose(p.inverse()).abs_diff_eq(Pose::IDENTITY, EPS));
    }

    #[test]
    fn test_angle_deg() {
        let a = Quat::IDENTITY;
        let b = Quat::from_rotation_y(FRAC_PI_2);
        assert!((angle_deg(a, b) - 90.0).abs() < 1e-3);
        assert!(angle_deg(a, a) < 1e-3);
    }

    #[test]
    fn test_look_rotation_forward_maps_to_direction() {
        let dir = Vec3::new(1.0, 0.0, 1.0).normalize();
        let rot = look_rotation(dir, Vec3::Y).unwrap();
        assert!((rot * FORWARD).abs_diff_eq(dir, EPS));
        assert!((rot * Vec3::Y).abs_diff_eq(Vec3::Y, EPS));
    }

    #[test]
    fn test_look_rotation_degenerate() {
        assert!(look_rotation(Vec3::ZERO, Vec3::Y).is_none());
        assert!(look_rotation(Vec3::Y, Vec3::Y).is_none());
    }

    #[test]
    fn test_horizontal_forward_drops_pitch() {
        let rot = Quat::from_rotation_x(-0.6);
        let f = horizontal_forward(rot).unwrap();
        assert!(f.abs_diff_eq(FORWARD, EPS));

        let straight_down = Quat::from_rotation_x(-FRAC_PI_2);
        assert!(horizontal_forward(straight_down).is_none());
    }

    #[test]
    fn test_quantize_to_grid() {
        let snapped = quantize_to_grid(Vec3::new(1.23, 0.0, 0.81), 0.5);
        assert!(snapped.abs_diff_eq(Vec3::new(1.0, 0.0, 1.0), EPS));

        let unchanged = quantize_to_grid(Vec3::new(1.23, 0.0, 0.81), 0.0);
        assert_eq!(unchanged, Vec3::new(1.23, 0.0, 0.81));
    }

    #[test]
    fn test_blend_factors() {
        let from = Pose::IDENTITY;
        let to = Pose::from_position(Vec3::new(2.0, 0.0, 0.0));
        assert!(from.blend(to, 0.5, 0.5).position.abs_diff_eq(Vec3::X, EPS));
        assert!(from.blend(to, 1.0, 1.0).abs_diff_eq(to, EPS));
        assert!(from.blend(to, 0.0, 0.0).abs_diff_eq(from, EPS));
    }

    #[test]
    fn test_pose_serde() {
        let p = Pose::new(Vec3::new(1.0, 2.0, 3.0), Quat::from_rotation_y(0.5));
        let json = serde_json::to_string(&p).unwrap();
        let back: Pose = serde_json::from_str(&json).unwrap();
        assert_eq!(p, back);
    }
}
