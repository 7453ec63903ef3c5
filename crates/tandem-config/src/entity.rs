//! Per-entity replication, smoothing and interaction settings.

use glam::Vec3;
use serde::{Deserialize, Serialize};

/// Where a grabbed entity sits relative to the holder's viewpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionMode {
    /// Centered at [`EntityConfig::position_offset`] in front of the viewpoint.
    #[default]
    CenterToView,
    /// Keeps the offset it had from the viewpoint at grab time.
    KeepInitialOffset,
}

/// How a grabbed entity is oriented while held.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RotationMode {
    /// Keeps its session-frame orientation.
    #[default]
    KeepInitialRotation,
    /// Turns with the holder's view.
    UseViewRotation,
    /// Follows only the holder's horizontal heading, blended in over time.
    ForkliftMode,
}

/// Settings of one shared entity.
///
/// Ranges are enforced by [`EntityConfig::validated`]; values read from disk
/// or received over the wire should go through it before use.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EntityConfig {
    /// Authoritative sampling rate in Hz (1–20).
    pub update_rate: u32,
    /// Minimum displacement in meters that counts as motion.
    pub position_threshold: f32,
    /// Receiver-side distance in meters above which a new pose is applied
    /// immediately instead of blended.
    pub position_snap: f32,
    /// Per-frame position blend factor (0–1).
    pub position_factor: f32,
    /// Minimum rotation in degrees that counts as motion.
    pub rotation_threshold: f32,
    /// Receiver-side angle in degrees above which a new pose is applied
    /// immediately.
    pub rotation_snap: f32,
    /// Per-frame rotation blend factor (0–1).
    pub rotation_factor: f32,
    /// Seconds without motion before the entity is considered at rest.
    pub sleep_threshold: f32,
    /// Smallest allowed uniform scale.
    pub min_scale: f32,
    /// Largest allowed uniform scale.
    pub max_scale: f32,
    /// Per-frame scale blend factor (0–1).
    pub scale_factor: f32,
    /// Whether participants may grab the entity at all.
    pub interactable: bool,
    /// At most one holder, no stealing.
    pub exclusive_mode: bool,
    /// Grab placement policy.
    pub position_mode: PositionMode,
    /// Holder-relative offset used by [`PositionMode::CenterToView`].
    pub position_offset: Vec3,
    /// Grab orientation policy.
    pub rotation_mode: RotationMode,
    /// With [`RotationMode::UseViewRotation`], face straight ahead instead
    /// of keeping the grab-time relative orientation.
    pub look_forward: bool,
    /// Heading blend rate in 1/s for [`RotationMode::ForkliftMode`].
    pub forklift_factor: f32,
    /// Quantize the release position to a grid.
    pub snap_to_grid: bool,
    /// Grid cell size in meters.
    pub grid_size: f32,
    /// Free entities below this height are destroyed.
    pub destroy_below: Option<f32>,
    /// Lifetime in seconds after spawn; `None` lives until destroyed.
    pub lifetime_secs: Option<f64>,
}

impl Default for EntityConfig {
    fn default() -> Self {
        Self {
            update_rate: 5,
            position_threshold: 0.1,
            position_snap: 2.0,
            position_factor: 0.1,
            rotation_threshold: 1.0,
            rotation_snap: 20.0,
            rotation_factor: 0.1,
            sleep_threshold: 2.0,
            min_scale: 0.1,
            max_scale: 2.0,
            scale_factor: 0.1,
            interactable: true,
            exclusive_mode: true,
            position_mode: PositionMode::CenterToView,
            position_offset: Vec3::NEG_Z,
            rotation_mode: RotationMode::KeepInitialRotation,
            look_forward: false,
            forklift_factor: 1.0,
            snap_to_grid: false,
            grid_size: 1.0,
            destroy_below: None,
            lifetime_secs: None,
        }
    }
}

impl EntityConfig {
    /// Clamps every field into its legal range.
    ///
    /// Snaps come first so thresholds can be bounded by them; `max_scale`
    /// is raised to `min_scale` rather than the other way round.
    pub fn validated(mut self) -> Self {
        self.update_rate = self.update_rate.clamp(1, 20);

        self.position_snap = non_negative(self.position_snap);
        self.position_threshold = non_negative(self.position_threshold).min(self.position_snap);
        self.rotation_snap = non_negative(self.rotation_snap);
        self.rotation_threshold = non_negative(self.rotation_threshold).min(self.rotation_snap);

        self.position_factor = unit(self.position_factor);
        self.rotation_factor = unit(self.rotation_factor);
        self.scale_factor = unit(self.scale_factor);

        self.sleep_threshold = non_negative(self.sleep_threshold);
        self.min_scale = non_negative(self.min_scale);
        self.max_scale = non_negative(self.max_scale).max(self.min_scale);
        self.forklift_factor = non_negative(self.forklift_factor);

        if self.grid_size.is_nan() || self.grid_size <= 0.0 {
            self.grid_size = 1.0;
        }
        if let Some(lifetime) = self.lifetime_secs
            && (lifetime.is_nan() || lifetime < 0.0)
        {
            self.lifetime_secs = None;
        }
        self
    }

    /// Seconds between two authoritative samples.
    pub fn sample_period(&self) -> f64 {
        1.0 / f64::from(self.update_rate.clamp(1, 20))
    }

    /// Clamps a scale into `[min_scale, max_scale]`.
    pub fn clamp_scale(&self, scale: f32) -> f32 {
        if scale.is_nan() {
            return self.min_scale;
        }
        scale.clamp(self.min_scale, self.max_scale.max(self.min_scale))
    }
}

fn non_negative(v: f32) -> f32 {
    if v.is_nan() { 0.0 } else { v.max(0.0) }
}

fn unit(v: f32) -> f32 {
    if v.is_nan() { 0.0 } else { v.clamp(0.0, 1.0) }
}
