//! Pose math for shared-space manipulation.
//!
//! All replicated state is expressed as explicit [`Pose`] values relative to
//! a named frame. Converting between frames goes through the pure functions
//! [`compose_into`] and [`project`] instead of an ambient transform hierarchy.

mod frame;
mod pose;

pub use frame::SessionFrame;
pub use pose::{
    FORWARD, Pose, angle_deg, compose_into, horizontal_forward, look_rotation, project,
    quantize_to_grid,
};

pub use glam::{Quat, Vec3};
