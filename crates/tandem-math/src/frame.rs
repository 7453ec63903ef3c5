//! The shared session frame.

use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};

use crate::pose::{Pose, look_rotation};

/// Origin of the shared space on this device.
///
/// Tracking supplies a displacement and a yaw. When an image anchor is
/// detected the orientation is recomputed from the anchor's horizontal
/// forward instead of the raw yaw.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SessionFrame {
    /// Offset of the shared origin from the device origin.
    pub displacement: Vec3,
    /// Extra yaw applied around the vertical axis, in degrees.
    pub yaw_deg: f32,
    orientation: Quat,
}

impl SessionFrame {
    /// A frame at `displacement`, turned by `yaw_deg` around +Y.
    pub fn new(displacement: Vec3, yaw_deg: f32) -> Self {
        Self {
            displacement,
            yaw_deg,
            orientation: Quat::from_rotation_y(yaw_deg.to_radians()),
        }
    }

    /// The frame as a pose in device space.
    pub fn pose(&self) -> Pose {
        Pose::new(self.displacement, self.orientation)
    }

    /// Re-aims the frame at a tracked anchor. Only the horizontal part of
    /// `anchor_forward` is used; a vertical anchor leaves the frame as is.
    pub fn reorient_to_anchor(&mut self, anchor_position: Vec3, anchor_forward: Vec3) -> bool {
        let yaw = Quat::from_rotation_y(self.yaw_deg.to_radians());
        let flat = Vec3::new(anchor_forward.x, 0.0, anchor_forward.z);
        match look_rotation(yaw * flat, Vec3::Y) {
            Some(rotation) => {
                self.orientation = rotation;
                self.displacement = anchor_position;
                true
            }
            None => false,
        }
    }
}

impl Default for SessionFrame {
    fn default() -> Self {
        Self::new(Vec3::ZERO, 0.0)
    }
}
