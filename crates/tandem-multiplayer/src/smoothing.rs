//! Receiver-side display of replicated entity and participant poses.
//!
//! A [`PoseSmoother`] turns the stream of authoritative notifications for one
//! entity into a displayed transform: hard cuts for large corrections, a
//! first-order blend otherwise, handle tracking while a remote participant
//! holds the entity, and direct placement for the locally held entity. The
//! filter runs once per rendered frame and is frame-rate dependent.
//!
//! The host runs the same type in authoritative mode, where every update is
//! applied directly and physics is the source of truth for free bodies.

use tandem_config::{EntityConfig, PositionMode, RotationMode};
use tandem_math::{Pose, Quat, compose_into, project};
use tandem_net::{EntityId, Motion, ParticipantId, Tick};

use crate::collaborators::{ParentFrame, PhysicsEngine, SceneGraph};
use crate::ownership::OwnershipArbiter;
use crate::replication::TickGate;

/// Scale differences below this are snapped.
const SCALE_EPSILON: f32 = 1e-4;

/// Adaptive avatar blend factors below this are treated as zero.
const MIN_AVATAR_FACTOR: f32 = 0.001;

// ---------------------------------------------------------------------------
// PoseSmoother
// ---------------------------------------------------------------------------

/// Where the handle offset of a held entity came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleSource {
    /// Derived locally from the position/rotation modes until the host's
    /// handle arrives.
    Placeholder,
    /// Sent by the host.
    Authoritative,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Hold {
    holder: ParticipantId,
    local: bool,
    handle: Pose,
    source: HandleSource,
}

/// Displayed state of one shared entity on one device.
#[derive(Debug, Clone)]
pub struct PoseSmoother {
    id: EntityId,
    config: EntityConfig,
    has_body: bool,
    direct: bool,
    target: Pose,
    target_scale: f32,
    resting: bool,
    hold: Option<Hold>,
    /// Local pose within `parent_frame()`.
    displayed: Pose,
    displayed_scale: f32,
    forklift_blend: f32,
    pending_motion: Option<Motion>,
    hard_set: bool,
    applied_frame: Option<ParentFrame>,
    applied_kinematic: Option<bool>,
    gate: TickGate,
}

impl PoseSmoother {
    /// A smoother for a free entity displayed at `pose`.
    ///
    /// `authoritative` smoothers (the host's own) apply every update
    /// directly and let physics drive free bodies.
    pub fn new(
        id: EntityId,
        config: EntityConfig,
        has_body: bool,
        pose: Pose,
        scale: f32,
        resting: bool,
        authoritative: bool,
    ) -> Self {
        let scale = config.clamp_scale(scale);
        Self {
            id,
            config,
            has_body,
            direct: authoritative,
            target: pose,
            target_scale: scale,
            resting,
            hold: None,
            displayed: pose,
            displayed_scale: scale,
            forklift_blend: 0.0,
            pending_motion: None,
            hard_set: true,
            applied_frame: None,
            applied_kinematic: None,
            gate: TickGate::new(),
        }
    }

    /// Entity this smoother displays.
    pub fn id(&self) -> EntityId {
        self.id
    }

    /// Tick filter: `true` if an update stamped `tick` should be applied.
    pub fn accept(&mut self, tick: Tick) -> bool {
        self.gate.accept(tick)
    }

    /// Last replicated canonical pose.
    pub fn target(&self) -> Pose {
        self.target
    }

    /// Displayed pose, relative to [`PoseSmoother::parent_frame`].
    pub fn displayed(&self) -> Pose {
        self.displayed
    }

    /// Displayed uniform scale.
    pub fn displayed_scale(&self) -> f32 {
        self.displayed_scale
    }

    /// Last replicated scale.
    pub fn target_scale(&self) -> f32 {
        self.target_scale
    }

    /// Current holder, as last reported.
    pub fn holder(&self) -> Option<ParticipantId> {
        self.hold.map(|h| h.holder)
    }

    /// Current handle offset, if held.
    pub fn handle(&self) -> Option<Pose> {
        self.hold.map(|h| h.handle)
    }

    /// Origin of the current handle offset, if held.
    pub fn handle_source(&self) -> Option<HandleSource> {
        self.hold.map(|h| h.source)
    }

    /// Whether the host last reported the entity as resting.
    pub fn is_resting(&self) -> bool {
        self.resting
    }

    /// Frame the displayed pose is expressed in.
    pub fn parent_frame(&self) -> ParentFrame {
        match self.hold {
            None => ParentFrame::Session,
            Some(Hold { local: true, .. }) => ParentFrame::LocalView,
            Some(Hold { holder, .. }) => ParentFrame::Participant(holder),
        }
    }

    /// Whether local physics drives this entity: it has a body, nobody
    /// holds it, and either this is the host or the host reports it moving.
    pub fn is_simulated(&self) -> bool {
        self.has_body && self.hold.is_none() && (self.direct || !self.resting)
    }

    /// Displayed pose in the session frame, given the holder's viewpoint.
    pub fn session_pose(&self, holder_view: Option<Pose>) -> Pose {
        match (self.hold, holder_view) {
            (Some(_), Some(view)) => compose_into(self.displayed, view),
            (Some(_), None) => self.target,
            (None, _) => self.displayed,
        }
    }

    // --- Notifications ---

    /// The entity was grabbed. `canonical` is its pose at grab time and
    /// `holder_view` the holder's viewpoint, if known. A placeholder handle
    /// is used until [`PoseSmoother::receive_handle`].
    pub fn receive_grab(
        &mut self,
        holder: ParticipantId,
        holder_is_local: bool,
        canonical: Pose,
        holder_view: Option<Pose>,
    ) {
        let from = if self.hold.is_some() {
            canonical
        } else {
            self.displayed
        };
        let relative = project(from, holder_view.unwrap_or(Pose::IDENTITY));
        self.target = canonical;
        self.displayed = relative;
        self.pending_motion = None;
        self.forklift_blend = 0.0;
        self.hold = Some(Hold {
            holder,
            local: holder_is_local,
            handle: placeholder_handle(&self.config, relative),
            source: HandleSource::Placeholder,
        });
        tracing::debug!("{} displayed as held by {holder}", self.id);
    }

    /// Authoritative handle offset for the current hold. Ignored when not
    /// held.
    pub fn receive_handle(&mut self, handle: Pose) -> bool {
        let Some(hold) = self.hold.as_mut() else {
            return false;
        };
        hold.handle = handle;
        hold.source = HandleSource::Authoritative;
        true
    }

    /// The entity was let go at `pose`.
    pub fn receive_release(&mut self, pose: Pose, motion: Option<Motion>, holder_view: Option<Pose>) {
        self.detach(holder_view);
        self.target = pose;
        self.resting = false;
        self.pending_motion = motion;
        self.snap_if_far();
    }

    /// Canonical pose of a free entity. Implies a release if the entity was
    /// displayed as held.
    pub fn receive_pose(
        &mut self,
        pose: Pose,
        motion: Option<Motion>,
        resting: bool,
        holder_view: Option<Pose>,
    ) {
        self.detach(holder_view);
        self.target = pose;
        self.resting = resting;
        self.pending_motion = motion;
        self.snap_if_far();
    }

    /// Canonical scale.
    pub fn receive_scale(&mut self, scale: f32) {
        self.target_scale = self.config.clamp_scale(scale);
    }

    fn detach(&mut self, holder_view: Option<Pose>) {
        if self.hold.is_some() {
            self.displayed = self.session_pose(holder_view);
            self.hold = None;
        }
    }

    fn snap_if_far(&mut self) {
        let far = self.displayed.distance(self.target) > self.config.position_snap
            || self.displayed.angle_deg(self.target) > self.config.rotation_snap;
        if self.direct || far {
            self.displayed = self.target;
            self.hard_set = true;
        }
    }

    // --- Per frame ---

    /// One rendered frame: pull the physics-driven pose, advance the filter,
    /// and write the result to the collaborators.
    pub fn update<S: SceneGraph, P: PhysicsEngine>(
        &mut self,
        dt: f32,
        holder_view: Option<Pose>,
        scene: &mut S,
        physics: &mut P,
    ) {
        self.pull(scene);
        self.step(dt, holder_view);
        self.present(scene, physics);
    }

    fn pull<S: SceneGraph>(&mut self, scene: &S) {
        if self.is_simulated()
            && !self.hard_set
            && self.applied_frame == Some(ParentFrame::Session)
            && let Some(pose) = scene.local_pose(self.id)
        {
            self.displayed = pose;
        }
    }

    /// Advance the filter by one frame without touching collaborators.
    pub fn step(&mut self, dt: f32, holder_view: Option<Pose>) {
        self.step_scale();

        let Some(hold) = self.hold else {
            self.forklift_blend = 0.0;
            if !self.direct {
                self.displayed = self.displayed.blend(
                    self.target,
                    self.config.position_factor,
                    self.config.rotation_factor,
                );
            } else if !self.is_simulated() {
                self.displayed = self.target;
            }
            return;
        };

        self.forklift_blend =
            (self.forklift_blend + dt * self.config.forklift_factor).clamp(0.0, 1.0);
        let Some(view) = holder_view else {
            return;
        };
        let goal = self.held_local_pose(hold.handle, view);
        self.displayed = if self.direct || hold.local {
            goal
        } else {
            self.displayed
                .blend(goal, self.config.position_factor, self.config.rotation_factor)
        };
    }

    fn step_scale(&mut self) {
        if self.direct || (self.displayed_scale - self.target_scale).abs() < SCALE_EPSILON {
            self.displayed_scale = self.target_scale;
        } else {
            self.displayed_scale +=
                (self.target_scale - self.displayed_scale) * self.config.scale_factor;
        }
    }

    /// Entity pose relative to the holder's viewpoint `view`.
    fn held_local_pose(&self, handle: Pose, view: Pose) -> Pose {
        let canonical = self.target.rotation;
        let basis = OwnershipArbiter::rotation_basis(&self.config, canonical, view.rotation);
        let basis = match self.config.rotation_mode {
            RotationMode::ForkliftMode => canonical.slerp(basis, self.forklift_blend),
            _ => basis,
        };
        Pose::new(
            handle.position,
            (view.rotation.inverse() * basis * handle.rotation).normalize(),
        )
    }

    /// Push the displayed state to the scene graph and physics engine.
    pub fn present<S: SceneGraph, P: PhysicsEngine>(&mut self, scene: &mut S, physics: &mut P) {
        let frame = self.parent_frame();
        if self.applied_frame != Some(frame) {
            scene.reparent(self.id, frame);
            self.applied_frame = Some(frame);
        }

        if self.has_body && physics.has_body(self.id) {
            let kinematic = !self.is_simulated();
            if self.applied_kinematic != Some(kinematic) {
                physics.set_kinematic(self.id, kinematic);
                self.applied_kinematic = Some(kinematic);
            }
            if let Some(motion) = self.pending_motion.take()
                && !kinematic
            {
                physics.set_velocity(self.id, motion);
            }
        }

        scene.set_local_pose(self.id, self.displayed, self.displayed_scale);
        self.hard_set = false;
    }

    /// Drop the entity from the collaborators.
    pub fn remove<S: SceneGraph, P: PhysicsEngine>(&self, scene: &mut S, physics: &mut P) {
        scene.remove(self.id);
        physics.remove(self.id);
    }
}

/// Handle offset assumed between a grab notification and the host's handle.
fn placeholder_handle(config: &EntityConfig, relative: Pose) -> Pose {
    let position = match config.position_mode {
        PositionMode::CenterToView => config.position_offset,
        PositionMode::KeepInitialOffset => relative.position,
    };
    let rotation = match config.rotation_mode {
        RotationMode::UseViewRotation if !config.look_forward => relative.rotation,
        _ => Quat::IDENTITY,
    };
    Pose::new(position, rotation)
}

// ---------------------------------------------------------------------------
// ParticipantSmoother
// ---------------------------------------------------------------------------

/// Displayed viewpoint of a remote participant.
///
/// Blend factors adapt to the size of the error: `distance / session_scale`
/// for position and `angle / 180°` for rotation, each clamped to `[0, 1]`.
#[derive(Debug, Clone)]
pub struct ParticipantSmoother {
    gate: TickGate,
    target: Pose,
    displayed: Pose,
    session_scale: f32,
}

impl ParticipantSmoother {
    /// A smoother displaying `pose` immediately.
    pub fn new(pose: Pose, session_scale: f32) -> Self {
        Self {
            gate: TickGate::new(),
            target: pose,
            displayed: pose,
            session_scale: session_scale.max(f32::EPSILON),
        }
    }

    /// Apply a viewpoint update unless its tick is stale.
    pub fn receive(&mut self, tick: Tick, pose: Pose) -> bool {
        if !self.gate.accept(tick) {
            return false;
        }
        self.target = pose;
        true
    }

    /// One rendered frame.
    pub fn step(&mut self) {
        let position_factor = adaptive(self.displayed.distance(self.target) / self.session_scale);
        let rotation_factor = adaptive(self.displayed.angle_deg(self.target) / 180.0);
        self.displayed = self.displayed.blend(self.target, position_factor, rotation_factor);
    }

    /// Last received viewpoint.
    pub fn target(&self) -> Pose {
        self.target
    }

    /// Displayed viewpoint.
    pub fn displayed(&self) -> Pose {
        self.displayed
    }
}

fn adaptive(factor: f32) -> f32 {
    let factor = factor.clamp(0.0, 1.0);
    if factor < MIN_AVATAR_FACTOR { 0.0 } else { factor }
}
