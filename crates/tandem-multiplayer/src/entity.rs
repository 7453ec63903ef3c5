//! Canonical host-side state of shared entities and participants.
//!
//! Both types are `bevy_ecs` components stored in the
//! [`AuthoritativeWorld`](crate::world::AuthoritativeWorld).

use bevy_ecs::prelude::*;
use tandem_config::EntityConfig;
use tandem_math::Pose;
use tandem_net::{EntityId, EntitySpawned, Motion, ParticipantId, Tick};

use crate::ownership::Ownership;
use crate::replication::{PoseReplicator, TickCounter, TickGate};
use crate::rest::RestState;

// ---------------------------------------------------------------------------
// SharedEntity
// ---------------------------------------------------------------------------

/// Canonical state of one shared entity. Only the host mutates it.
#[derive(Debug, Clone, Component)]
pub struct SharedEntity {
    /// Identifier, assigned by the host.
    pub id: EntityId,
    /// Canonical pose in the session frame. Stale while held; the holder
    /// pose and handle describe the entity then.
    pub pose: Pose,
    scale: f32,
    /// Last known velocities.
    pub motion: Motion,
    /// Whether a physics body drives the entity while free.
    pub has_body: bool,
    /// Who holds it.
    pub ownership: Ownership,
    /// Pose in the holder's viewpoint frame; `Some` only while held.
    pub handle: Option<Pose>,
    /// Validated settings.
    pub config: EntityConfig,
    /// Broadcast and rest bookkeeping.
    pub replicator: PoseReplicator,
    /// Source of this entity's message ticks.
    pub ticks: TickCounter,
}

impl SharedEntity {
    /// A free entity at `pose`. The config is validated and the scale
    /// clamped. Entities without a body start resting.
    pub fn new(
        id: EntityId,
        pose: Pose,
        scale: f32,
        has_body: bool,
        config: EntityConfig,
        now: f64,
    ) -> Self {
        let config = config.validated();
        let state = if has_body {
            RestState::Moving
        } else {
            RestState::Resting
        };
        Self {
            id,
            pose,
            scale: config.clamp_scale(scale),
            motion: Motion::default(),
            has_body,
            ownership: Ownership::Free,
            handle: None,
            replicator: PoseReplicator::new(pose, now, &config, state),
            config,
            ticks: TickCounter::new(),
        }
    }

    /// Uniform scale, always within `[min_scale, max_scale]`.
    pub fn scale(&self) -> f32 {
        self.scale
    }

    /// Set the scale, clamped to the configured bounds. Returns the value
    /// actually applied.
    pub fn set_scale(&mut self, scale: f32) -> f32 {
        self.scale = self.config.clamp_scale(scale);
        self.scale
    }

    /// Grow or shrink by `delta`, clamped.
    pub fn add_scale(&mut self, delta: f32) -> f32 {
        self.set_scale(self.scale + delta)
    }

    /// Current holder, if held.
    pub fn holder(&self) -> Option<ParticipantId> {
        self.ownership.holder()
    }

    /// Whether the rest detector classifies the entity as resting.
    pub fn is_resting(&self) -> bool {
        self.replicator.rest_state() == RestState::Resting
    }

    /// Issue the next message tick.
    pub fn next_tick(&mut self) -> Tick {
        self.ticks.advance()
    }

    /// Full-state notification for spawn and late joiners.
    pub fn snapshot(&self) -> EntitySpawned {
        EntitySpawned {
            entity: self.id,
            tick: self.ticks.current(),
            pose: self.pose,
            scale: self.scale,
            has_body: self.has_body,
            resting: self.is_resting(),
            holder: self.holder(),
            handle: self.handle,
            config: self.config.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Participant
// ---------------------------------------------------------------------------

/// A session participant as the host sees it.
#[derive(Debug, Clone, Component)]
pub struct Participant {
    /// Identifier.
    pub id: ParticipantId,
    /// Display name.
    pub name: String,
    /// Whether this is the host device's own viewpoint.
    pub is_local: bool,
    /// Last known viewpoint in the session frame.
    pub pose: Pose,
    /// Entity currently held (at most one).
    pub held: Option<EntityId>,
    /// Filters reordered viewpoint updates.
    pub pose_gate: TickGate,
}

impl Participant {
    /// A participant holding nothing.
    pub fn new(id: ParticipantId, name: impl Into<String>, is_local: bool, pose: Pose) -> Self {
        Self {
            id,
            name: name.into(),
            is_local,
            pose,
            held: None,
            pose_gate: TickGate::new(),
        }
    }
}
