//! In-memory scene graph and physics used by tests and the headless demo.

use rustc_hash::FxHashMap;
use tandem_math::{Pose, Quat, Vec3, compose_into};
use tandem_net::{EntityId, Motion, ParticipantId};

use crate::collaborators::{ParentFrame, PhysicsEngine, SceneGraph};

/// Standard gravity in m/s².
pub const GRAVITY: Vec3 = Vec3::new(0.0, -9.81, 0.0);

// ---------------------------------------------------------------------------
// HeadlessScene
// ---------------------------------------------------------------------------

/// Scene node for one entity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SceneNode {
    /// Parent frame.
    pub frame: ParentFrame,
    /// Pose within `frame`.
    pub pose: Pose,
    /// Uniform scale.
    pub scale: f32,
}

/// Flat scene graph: entities hang off the session frame or a viewpoint.
#[derive(Debug, Clone)]
pub struct HeadlessScene {
    local: ParticipantId,
    nodes: FxHashMap<EntityId, SceneNode>,
    viewpoints: FxHashMap<ParticipantId, Pose>,
    session_frame: Pose,
}

impl HeadlessScene {
    /// A scene whose [`ParentFrame::LocalView`] is `local`'s viewpoint.
    pub fn new(local: ParticipantId) -> Self {
        Self {
            local,
            nodes: FxHashMap::default(),
            viewpoints: FxHashMap::default(),
            session_frame: Pose::IDENTITY,
        }
    }

    /// The node of `entity`, if present.
    pub fn node(&self, entity: EntityId) -> Option<&SceneNode> {
        self.nodes.get(&entity)
    }

    /// Number of entity nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the scene has no entity nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// A participant's viewpoint in the session frame.
    pub fn viewpoint(&self, participant: ParticipantId) -> Option<Pose> {
        self.viewpoints.get(&participant).copied()
    }

    /// Current session frame relative to the device origin.
    pub fn session_frame(&self) -> Pose {
        self.session_frame
    }

    /// Pose of `entity` in the session frame, resolving viewpoint parents.
    pub fn session_pose(&self, entity: EntityId) -> Option<Pose> {
        let node = self.nodes.get(&entity)?;
        let parent = match node.frame {
            ParentFrame::Session => return Some(node.pose),
            ParentFrame::Participant(p) => self.viewpoints.get(&p)?,
            ParentFrame::LocalView => self.viewpoints.get(&self.local)?,
        };
        Some(compose_into(node.pose, *parent))
    }

    fn node_mut(&mut self, entity: EntityId) -> &mut SceneNode {
        self.nodes.entry(entity).or_insert(SceneNode {
            frame: ParentFrame::Session,
            pose: Pose::IDENTITY,
            scale: 1.0,
        })
    }
}

impl SceneGraph for HeadlessScene {
    fn reparent(&mut self, entity: EntityId, frame: ParentFrame) {
        self.node_mut(entity).frame = frame;
    }

    fn set_local_pose(&mut self, entity: EntityId, pose: Pose, scale: f32) {
        let node = self.node_mut(entity);
        node.pose = pose;
        node.scale = scale;
    }

    fn local_pose(&self, entity: EntityId) -> Option<Pose> {
        self.nodes.get(&entity).map(|n| n.pose)
    }

    fn remove(&mut self, entity: EntityId) {
        self.nodes.remove(&entity);
    }

    fn set_participant_pose(&mut self, participant: ParticipantId, pose: Pose) {
        self.viewpoints.insert(participant, pose);
    }

    fn remove_participant(&mut self, participant: ParticipantId) {
        self.viewpoints.remove(&participant);
    }

    fn set_session_frame(&mut self, frame: Pose) {
        self.session_frame = frame;
    }
}

// ---------------------------------------------------------------------------
// HeadlessPhysics
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default)]
struct Body {
    kinematic: bool,
    motion: Motion,
}

/// Point-mass integrator with gravity and an optional flat floor.
#[derive(Debug, Clone)]
pub struct HeadlessPhysics {
    bodies: FxHashMap<EntityId, Body>,
    /// Acceleration applied to dynamic bodies.
    pub gravity: Vec3,
    /// Height of a frictionless-but-inelastic floor; `None` lets bodies fall
    /// forever.
    pub floor: Option<f32>,
}

impl HeadlessPhysics {
    /// Gravity on, floor at `y = 0`.
    pub fn new() -> Self {
        Self {
            bodies: FxHashMap::default(),
            gravity: GRAVITY,
            floor: Some(0.0),
        }
    }

    /// No gravity, no floor: bodies keep whatever velocity they are given.
    pub fn weightless() -> Self {
        Self {
            gravity: Vec3::ZERO,
            floor: None,
            ..Self::new()
        }
    }

    /// Whether `entity` is currently excluded from simulation.
    pub fn is_kinematic(&self, entity: EntityId) -> Option<bool> {
        self.bodies.get(&entity).map(|b| b.kinematic)
    }

    /// Advance every dynamic body parented to the session frame by `dt`.
    pub fn integrate(&mut self, scene: &mut HeadlessScene, dt: f32) {
        for (entity, body) in self.bodies.iter_mut() {
            if body.kinematic {
                continue;
            }
            let Some(node) = scene.nodes.get_mut(entity) else {
                continue;
            };
            if node.frame != ParentFrame::Session {
                continue;
            }

            body.motion.linear += self.gravity * dt;
            node.pose.position += body.motion.linear * dt;
            let spin = Quat::from_scaled_axis(body.motion.angular * dt);
            node.pose.rotation = (spin * node.pose.rotation).normalize();

            if let Some(floor) = self.floor
                && node.pose.position.y <= floor
            {
                node.pose.position.y = floor;
                body.motion = Motion::default();
            }
        }
    }
}

impl Default for HeadlessPhysics {
    fn default() -> Self {
        Self::new()
    }
}

impl PhysicsEngine for HeadlessPhysics {
    fn insert_body(&mut self, entity: EntityId) {
        self.bodies.entry(entity).or_default();
    }

    fn has_body(&self, entity: EntityId) -> bool {
        self.bodies.contains_key(&entity)
    }

    fn set_kinematic(&mut self, entity: EntityId, kinematic: bool) {
        if let Some(body) = self.bodies.get_mut(&entity) {
            body.kinematic = kinematic;
            if kinematic {
                body.motion = Motion::default();
            }
        }
    }

    fn velocity(&self, entity: EntityId) -> Option<Motion> {
        self.bodies.get(&entity).map(|b| b.motion)
    }

    fn set_velocity(&mut self, entity: EntityId, motion: Motion) {
        if let Some(body) = self.bodies.get_mut(&entity) {
            body.motion = motion;
        }
    }

    fn remove(&mut self, entity: EntityId) {
        self.bodies.remove(&entity);
    }
}
