//! Host-side session: canonical state, ownership arbitration, and sampling.
//!
//! The host is the single writer of every [`SharedEntity`]. Replicas send
//! requests; [`HostSession::handle_message`] validates them through the
//! [`OwnershipArbiter`], mutates canonical state, toggles physics, and queues
//! authoritative notifications. Periodic sampling and steal hand-offs are
//! [`Scheduler`] tasks scoped to the entities and participants they touch.

use std::collections::BTreeMap;

use rustc_hash::FxHashMap;
use tandem_config::EntityConfig;
use tandem_math::{FORWARD, Pose, Quat, SessionFrame, Vec3};
use tandem_net::{
    Channel, EntityDestroyed, EntityId, EntityPose, EntityScale, Envelope, Grabbed, HandleUpdate,
    Hub, Message, Motion, ParticipantId, ParticipantJoined, ParticipantLeft, ParticipantPose,
    Recipient, Released, Transport,
};

use crate::collaborators::{PhysicsEngine, SceneGraph};
use crate::context::SessionContext;
use crate::control::SessionControl;
use crate::entity::{Participant, SharedEntity};
use crate::error::SessionError;
use crate::events::{ListenerId, Listeners, SessionEvent};
use crate::ownership::{
    GrabDecision, GrabRejection, Ownership, OwnershipArbiter, ReleaseDecision,
};
use crate::replication::ParticipantPoseSampler;
use crate::rest::RestTransition;
use crate::scheduler::{Scheduler, TaskId, TaskScope};
use crate::smoothing::PoseSmoother;
use crate::world::AuthoritativeWorld;

/// Speed imparted by a throw, in m/s.
pub const THROW_SPEED: f32 = 5.0;

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// Result of a grab attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrabOutcome {
    /// The requester now holds the entity.
    Granted,
    /// The requester already held it.
    AlreadyHolding,
    /// The holder was released; the requester gets the entity after the
    /// hand-off delay.
    StealScheduled {
        /// Displaced holder.
        from: ParticipantId,
    },
    /// Nothing changed.
    Rejected(GrabRejection),
}

/// Result of a release attempt.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ReleaseOutcome {
    /// Released at this canonical pose.
    Released(Pose),
    /// Nobody held the entity.
    NotHeld,
    /// Someone else holds it.
    NotHolder {
        /// Actual holder.
        holder: ParticipantId,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HostTask {
    SampleEntity(EntityId),
    SampleViewpoint,
    HandOff { entity: EntityId, to: ParticipantId },
    Expire(EntityId),
}

#[derive(Debug, Clone, Copy)]
struct PendingHandOff {
    task: TaskId,
    from: ParticipantId,
    to: ParticipantId,
}

// ---------------------------------------------------------------------------
// HostSession
// ---------------------------------------------------------------------------

/// The authoritative side of a session.
pub struct HostSession<S, P> {
    ctx: SessionContext,
    world: AuthoritativeWorld,
    scheduler: Scheduler<HostTask>,
    handoffs: FxHashMap<EntityId, PendingHandOff>,
    scene: S,
    physics: P,
    frame: SessionFrame,
    views: BTreeMap<EntityId, PoseSmoother>,
    listeners: Listeners<SessionEvent>,
    outbox: Vec<Envelope>,
    viewpoint: ParticipantPoseSampler,
    now: f64,
}

impl<S: SceneGraph, P: PhysicsEngine> HostSession<S, P> {
    /// Starts a session with the context's local participant as its only
    /// member.
    pub fn new(ctx: SessionContext, mut scene: S, physics: P) -> Self {
        let mut world = AuthoritativeWorld::new();
        world.insert_participant(Participant::new(
            ctx.local,
            ctx.name.clone(),
            true,
            Pose::IDENTITY,
        ));
        scene.set_participant_pose(ctx.local, Pose::IDENTITY);

        let mut scheduler = Scheduler::new();
        if let Some(period) = ctx.participant().sample_period() {
            scheduler.schedule_periodic(
                period,
                period,
                &[TaskScope::Participant(ctx.local)],
                HostTask::SampleViewpoint,
            );
        }
        tracing::info!("Hosting session as {} ({})", ctx.name, ctx.local);

        Self {
            ctx,
            world,
            scheduler,
            handoffs: FxHashMap::default(),
            scene,
            physics,
            frame: SessionFrame::default(),
            views: BTreeMap::new(),
            listeners: Listeners::new(),
            outbox: Vec::new(),
            viewpoint: ParticipantPoseSampler::new(),
            now: 0.0,
        }
    }

    // --- Accessors ---

    /// Session context.
    pub fn context(&self) -> &SessionContext {
        &self.ctx
    }

    /// Session clock in seconds.
    pub fn now(&self) -> f64 {
        self.now
    }

    /// Canonical state.
    pub fn world(&self) -> &AuthoritativeWorld {
        &self.world
    }

    /// Canonical state of one entity.
    pub fn entity(&self, id: EntityId) -> Option<&SharedEntity> {
        self.world.entity(id)
    }

    /// Canonical state of one participant.
    pub fn participant(&self, id: ParticipantId) -> Option<&Participant> {
        self.world.participant(id)
    }

    /// Displayed state of one entity on the host device.
    pub fn view(&self, id: EntityId) -> Option<&PoseSmoother> {
        self.views.get(&id)
    }

    /// Scene graph collaborator.
    pub fn scene(&self) -> &S {
        &self.scene
    }

    /// Physics collaborator.
    pub fn physics(&self) -> &P {
        &self.physics
    }

    /// Both collaborators, for stepping an external simulation.
    pub fn collaborators_mut(&mut self) -> (&mut S, &mut P) {
        (&mut self.scene, &mut self.physics)
    }

    /// Current session frame.
    pub fn session_frame(&self) -> SessionFrame {
        self.frame
    }

    /// Number of pending scheduler tasks.
    pub fn pending_tasks(&self) -> usize {
        self.scheduler.len()
    }

    /// Whether a steal hand-off is waiting for `entity`.
    pub fn has_pending_handoff(&self, entity: EntityId) -> bool {
        self.handoffs.contains_key(&entity)
    }

    /// Register a synchronous observer.
    pub fn subscribe(&mut self, callback: impl FnMut(&SessionEvent) + 'static) -> ListenerId {
        self.listeners.subscribe(callback)
    }

    /// Remove an observer.
    pub fn unsubscribe(&mut self, id: ListenerId) -> bool {
        self.listeners.unsubscribe(id)
    }

    /// Take every queued outgoing envelope.
    pub fn drain_outbox(&mut self) -> Vec<Envelope> {
        std::mem::take(&mut self.outbox)
    }

    fn viewpoint_of(&self, participant: ParticipantId) -> Option<Pose> {
        self.world.participant(participant).map(|p| p.pose)
    }

    fn local_viewpoint(&self) -> Pose {
        self.viewpoint_of(self.ctx.local).unwrap_or(Pose::IDENTITY)
    }

    fn emit(&mut self, event: SessionEvent) {
        self.listeners.emit(&event);
    }

    fn broadcast(&mut self, message: Message) {
        self.outbox.push(Envelope::broadcast(message));
    }

    // --- Session frame ---

    /// Replace the session frame (tracking update). Entity-local data is
    /// untouched; only the frame moves.
    pub fn set_session_frame(&mut self, frame: SessionFrame) {
        self.frame = frame;
        self.scene.set_session_frame(frame.pose());
        tracing::debug!("Session frame moved to {:?}", frame.pose());
    }

    /// Re-aim the session frame at a detected anchor.
    pub fn update_anchor(&mut self, position: Vec3, forward: Vec3) -> bool {
        if !self.frame.reorient_to_anchor(position, forward) {
            tracing::warn!("Ignoring vertical anchor forward {forward:?}");
            return false;
        }
        self.scene.set_session_frame(self.frame.pose());
        true
    }

    // --- Participants ---

    /// Admit a remote participant and queue the current state for it.
    pub fn join(&mut self, participant: ParticipantId, name: impl Into<String>) -> bool {
        if self.world.has_participant(participant) {
            tracing::warn!("{participant} already joined");
            return false;
        }
        let name = name.into();

        for id in self.world.participant_ids() {
            if let Some(existing) = self.world.participant(id) {
                let message = Message::ParticipantJoined(ParticipantJoined {
                    participant: existing.id,
                    name: existing.name.clone(),
                    pose: existing.pose,
                });
                self.outbox.push(Envelope::to(participant, message));
            }
        }
        for id in self.world.entity_ids() {
            if let Some(entity) = self.world.entity(id) {
                let message = Message::EntitySpawned(entity.snapshot());
                self.outbox.push(Envelope::to(participant, message));
            }
        }

        self.world.insert_participant(Participant::new(
            participant,
            name.clone(),
            false,
            Pose::IDENTITY,
        ));
        self.scene.set_participant_pose(participant, Pose::IDENTITY);
        self.outbox.push(Envelope {
            recipient: Recipient::AllExcept(participant),
            channel: Channel::ReliableOrdered,
            message: Message::ParticipantJoined(ParticipantJoined {
                participant,
                name: name.clone(),
                pose: Pose::IDENTITY,
            }),
        });

        tracing::info!("{participant} ({name}) joined");
        self.emit(SessionEvent::ParticipantJoined { participant, name });
        true
    }

    /// Remove a participant. Pending hand-offs involving it are cancelled
    /// and anything it holds is released at its last known viewpoint.
    pub fn disconnect(&mut self, participant: ParticipantId) -> bool {
        let Some(state) = self.world.participant(participant).cloned() else {
            return false;
        };
        if state.is_local {
            tracing::warn!("The host's own participant cannot disconnect");
            return false;
        }

        let involved: Vec<EntityId> = self
            .handoffs
            .iter()
            .filter(|(_, h)| h.from == participant || h.to == participant)
            .map(|(entity, _)| *entity)
            .collect();
        for entity in involved {
            self.cancel_handoff(entity);
        }
        let cancelled = self.scheduler.cancel_scope(TaskScope::Participant(participant));
        if cancelled > 0 {
            tracing::debug!("Cancelled {cancelled} task(s) of {participant}");
        }

        if let Some(entity) = state.held {
            tracing::info!("{participant} left while holding {entity}; forcing release");
            self.release_internal(entity, state.pose, None);
        }

        self.world.remove_participant(participant);
        self.scene.remove_participant(participant);
        self.broadcast(Message::ParticipantLeft(ParticipantLeft { participant }));
        tracing::info!("{participant} ({}) left", state.name);
        self.emit(SessionEvent::ParticipantLeft { participant });
        true
    }

    /// Apply a participant viewpoint update and relay it. Stale ticks are
    /// dropped.
    pub fn apply_participant_pose(
        &mut self,
        participant: ParticipantId,
        tick: u64,
        pose: Pose,
    ) -> bool {
        let Some(mut state) = self.world.participant_mut(participant) else {
            return false;
        };
        if !state.pose_gate.accept(tick) {
            tracing::debug!("Dropping stale pose tick {tick} of {participant}");
            return false;
        }
        state.pose = pose;
        self.scene.set_participant_pose(participant, pose);

        let channel = if self.ctx.participant().uses_reliable_channel() {
            Channel::ReliableOrdered
        } else {
            Channel::UnreliableUnordered
        };
        self.outbox.push(Envelope {
            recipient: Recipient::AllExcept(participant),
            channel,
            message: Message::ParticipantPose(ParticipantPose {
                participant,
                tick,
                pose,
            }),
        });
        true
    }

    // --- Entity lifecycle ---

    /// Create an entity with explicit settings.
    pub fn spawn_with(
        &mut self,
        pose: Pose,
        scale: f32,
        has_body: bool,
        config: EntityConfig,
    ) -> EntityId {
        let id = self.world.allocate_entity_id();
        let entity = SharedEntity::new(id, pose, scale, has_body, config, self.now);

        if has_body {
            self.physics.insert_body(id);
        }
        let mut view = PoseSmoother::new(
            id,
            entity.config.clone(),
            has_body,
            pose,
            entity.scale(),
            entity.is_resting(),
            true,
        );
        view.present(&mut self.scene, &mut self.physics);
        self.views.insert(id, view);

        let period = entity.config.sample_period();
        self.scheduler.schedule_periodic(
            self.now + period,
            period,
            &[TaskScope::Entity(id)],
            HostTask::SampleEntity(id),
        );
        if let Some(lifetime) = entity.config.lifetime_secs {
            self.scheduler.schedule_once(
                self.now + lifetime,
                &[TaskScope::Entity(id)],
                HostTask::Expire(id),
            );
        }

        self.broadcast(Message::EntitySpawned(entity.snapshot()));
        self.world.insert_entity(entity);
        tracing::info!("Spawned {id} at {:?}", pose.position);
        self.emit(SessionEvent::Spawned { entity: id });
        id
    }

    /// Remove an entity, releasing it first if held. Returns `false` if it
    /// did not exist.
    pub fn destroy_entity(&mut self, id: EntityId) -> bool {
        let Some(holder) = self.world.entity(id).map(|e| e.holder()) else {
            return false;
        };
        if let Some(holder) = holder {
            let view = self.viewpoint_of(holder).unwrap_or(Pose::IDENTITY);
            self.release_internal(id, view, None);
        }
        self.cancel_handoff(id);
        self.scheduler.cancel_scope(TaskScope::Entity(id));

        self.world.remove_entity(id);
        if let Some(view) = self.views.remove(&id) {
            view.remove(&mut self.scene, &mut self.physics);
        }
        self.broadcast(Message::EntityDestroyed(EntityDestroyed { entity: id }));
        tracing::info!("Destroyed {id}");
        self.emit(SessionEvent::Destroyed { entity: id });
        true
    }

    // --- Ownership ---

    /// `participant` tries to grab `entity` from viewpoint `pose`.
    pub fn grab_as(
        &mut self,
        entity: EntityId,
        participant: ParticipantId,
        pose: Pose,
    ) -> Result<GrabOutcome, SessionError> {
        let (ownership, config) = self
            .world
            .entity(entity)
            .map(|e| (e.ownership, e.config.clone()))
            .ok_or(SessionError::UnknownEntity(entity))?;
        let known = self.world.has_participant(participant);
        if let Some(mut state) = self.world.participant_mut(participant) {
            state.pose = pose;
            self.scene.set_participant_pose(participant, pose);
        }

        match OwnershipArbiter::decide_grab(ownership, &config, participant, known) {
            GrabDecision::Grant => {
                self.drop_other_hold(participant, entity);
                self.apply_grab(entity, participant, pose);
                Ok(GrabOutcome::Granted)
            }
            GrabDecision::AlreadyHolding => Ok(GrabOutcome::AlreadyHolding),
            GrabDecision::Steal { from } => {
                // The current hold ends at the requester's viewpoint.
                self.release_internal(entity, pose, None);
                if let Some(mut e) = self.world.entity_mut(entity) {
                    e.ownership = Ownership::Releasing { to: participant };
                }
                let task = self.scheduler.schedule_once(
                    self.now + self.ctx.handoff_delay(),
                    &[
                        TaskScope::Entity(entity),
                        TaskScope::Participant(from),
                        TaskScope::Participant(participant),
                    ],
                    HostTask::HandOff {
                        entity,
                        to: participant,
                    },
                );
                self.handoffs.insert(
                    entity,
                    PendingHandOff {
                        task,
                        from,
                        to: participant,
                    },
                );
                tracing::info!("{participant} steals {entity} from {from}");
                Ok(GrabOutcome::StealScheduled { from })
            }
            GrabDecision::Reject(reason) => {
                tracing::debug!("Grab of {entity} by {participant} rejected: {reason:?}");
                Ok(GrabOutcome::Rejected(reason))
            }
        }
    }

    /// `participant` lets go of `entity` from viewpoint `pose`, optionally
    /// imparting `motion`.
    pub fn release_as(
        &mut self,
        entity: EntityId,
        participant: ParticipantId,
        pose: Pose,
        motion: Option<Motion>,
    ) -> Result<ReleaseOutcome, SessionError> {
        let ownership = self
            .world
            .entity(entity)
            .map(|e| e.ownership)
            .ok_or(SessionError::UnknownEntity(entity))?;

        match OwnershipArbiter::decide_release(ownership, participant) {
            ReleaseDecision::Release => {
                if let Some(mut state) = self.world.participant_mut(participant) {
                    state.pose = pose;
                    self.scene.set_participant_pose(participant, pose);
                }
                let pose = self
                    .release_internal(entity, pose, motion)
                    .ok_or(SessionError::UnknownEntity(entity))?;
                Ok(ReleaseOutcome::Released(pose))
            }
            ReleaseDecision::NotHeld => Ok(ReleaseOutcome::NotHeld),
            ReleaseDecision::NotHolder { holder } => {
                tracing::debug!("{participant} cannot release {entity} held by {holder}");
                Ok(ReleaseOutcome::NotHolder { holder })
            }
        }
    }

    /// Release and fling along the view direction. Entities without a body
    /// are simply released.
    pub fn throw_as(
        &mut self,
        entity: EntityId,
        participant: ParticipantId,
        pose: Pose,
    ) -> Result<ReleaseOutcome, SessionError> {
        let has_body = self
            .world
            .entity(entity)
            .map(|e| e.has_body)
            .ok_or(SessionError::UnknownEntity(entity))?;
        let motion = has_body.then(|| Motion {
            linear: (pose.rotation * (FORWARD + Vec3::Y * 0.5)).normalize() * THROW_SPEED,
            angular: Vec3::ZERO,
        });
        self.release_as(entity, participant, pose, motion)
    }

    fn drop_other_hold(&mut self, participant: ParticipantId, keep: EntityId) {
        let Some(state) = self.world.participant(participant) else {
            return;
        };
        if let Some(other) = state.held
            && other != keep
        {
            let view = state.pose;
            tracing::debug!("{participant} drops {other} to grab {keep}");
            self.release_internal(other, view, None);
        }
    }

    fn apply_grab(&mut self, entity: EntityId, participant: ParticipantId, pose: Pose) {
        let live = self.scene.local_pose(entity);
        let Some(mut e) = self.world.entity_mut(entity) else {
            return;
        };
        let canonical = live.unwrap_or(e.pose);
        let handle = OwnershipArbiter::grab_handle(&e.config, canonical, pose);
        e.pose = canonical;
        e.motion = Motion::default();
        e.ownership = Ownership::Held {
            holder: participant,
        };
        e.handle = Some(handle);
        let grab_tick = e.next_tick();
        let handle_tick = e.next_tick();
        drop(e);

        let mut is_local = false;
        if let Some(mut state) = self.world.participant_mut(participant) {
            state.held = Some(entity);
            is_local = state.is_local;
        }
        if let Some(view) = self.views.get_mut(&entity) {
            view.receive_grab(participant, is_local, canonical, Some(pose));
            view.receive_handle(handle);
            view.step(0.0, Some(pose));
            view.present(&mut self.scene, &mut self.physics);
        }

        self.broadcast(Message::Grabbed(Grabbed {
            entity,
            tick: grab_tick,
            holder: participant,
            pose: canonical,
        }));
        self.broadcast(Message::HandleUpdate(HandleUpdate {
            entity,
            tick: handle_tick,
            holder: participant,
            handle,
        }));
        tracing::info!("{participant} grabbed {entity}");
        self.emit(SessionEvent::Grabbed {
            entity,
            holder: participant,
        });
    }

    /// Let go of a held entity at `holder_view`. Returns the final pose, or
    /// `None` if the entity was not held.
    fn release_internal(
        &mut self,
        entity: EntityId,
        holder_view: Pose,
        motion: Option<Motion>,
    ) -> Option<Pose> {
        let now = self.now;
        let mut e = self.world.entity_mut(entity)?;
        let holder = e.holder()?;
        let handle = e.handle.unwrap_or(Pose::IDENTITY);
        let final_pose = OwnershipArbiter::release_pose(&e.config, e.pose, handle, holder_view);
        let motion = motion.filter(|_| e.has_body);

        e.pose = final_pose;
        e.ownership = Ownership::Free;
        e.handle = None;
        e.motion = motion.unwrap_or_default();
        let transition = e.replicator.record_broadcast(final_pose, now);
        let tick = e.next_tick();
        drop(e);

        if let Some(mut state) = self.world.participant_mut(holder)
            && state.held == Some(entity)
        {
            state.held = None;
        }
        if let Some(view) = self.views.get_mut(&entity) {
            view.receive_release(final_pose, motion, Some(holder_view));
            view.present(&mut self.scene, &mut self.physics);
        }

        self.broadcast(Message::Released(Released {
            entity,
            tick,
            pose: final_pose,
            motion,
        }));
        tracing::info!("{holder} released {entity} at {:?}", final_pose.position);
        self.emit(SessionEvent::Released {
            entity,
            pose: final_pose,
        });
        self.emit_wake(entity, transition);
        Some(final_pose)
    }

    fn emit_wake(&mut self, entity: EntityId, transition: RestTransition) {
        if transition == RestTransition::StartedMoving {
            self.emit(SessionEvent::RestChanged {
                entity,
                resting: false,
            });
        }
    }

    fn cancel_handoff(&mut self, entity: EntityId) {
        let Some(pending) = self.handoffs.remove(&entity) else {
            return;
        };
        self.scheduler.cancel(pending.task);
        if let Some(mut e) = self.world.entity_mut(entity)
            && e.ownership == (Ownership::Releasing { to: pending.to })
        {
            e.ownership = Ownership::Free;
        }
        tracing::debug!("Cancelled hand-off of {entity} to {}", pending.to);
    }

    fn complete_handoff(&mut self, entity: EntityId, to: ParticipantId) {
        self.handoffs.remove(&entity);
        let pending = self
            .world
            .entity(entity)
            .is_some_and(|e| e.ownership == Ownership::Releasing { to });
        if !pending {
            return;
        }
        if let Some(mut e) = self.world.entity_mut(entity) {
            e.ownership = Ownership::Free;
        }
        let Some(view) = self.viewpoint_of(to) else {
            return;
        };
        self.drop_other_hold(to, entity);
        self.apply_grab(entity, to, view);
    }

    // --- Canonical mutation ---

    /// Place `entity` exactly at `pose`. A held entity is released first.
    pub fn set_pose_internal(&mut self, entity: EntityId, pose: Pose) -> Result<(), SessionError> {
        let holder = self
            .world
            .entity(entity)
            .map(|e| e.holder())
            .ok_or(SessionError::UnknownEntity(entity))?;
        if let Some(holder) = holder {
            let view = self.viewpoint_of(holder).unwrap_or(Pose::IDENTITY);
            self.release_internal(entity, view, None);
        }
        self.cancel_handoff(entity);

        let now = self.now;
        let Some(mut e) = self.world.entity_mut(entity) else {
            return Err(SessionError::UnknownEntity(entity));
        };
        e.pose = pose;
        e.motion = Motion::default();
        let transition = e.replicator.record_broadcast(pose, now);
        let tick = e.next_tick();
        let motion = e.has_body.then_some(Motion::default());
        let resting = e.is_resting();
        drop(e);

        if let Some(view) = self.views.get_mut(&entity) {
            view.receive_pose(pose, motion, resting, None);
            view.present(&mut self.scene, &mut self.physics);
        }
        self.broadcast(Message::EntityPose(EntityPose {
            entity,
            tick,
            pose,
            motion,
            resting,
        }));
        self.emit_wake(entity, transition);
        Ok(())
    }

    /// Set the velocities of a free physics entity. Ignored otherwise.
    pub fn set_motion_internal(
        &mut self,
        entity: EntityId,
        motion: Motion,
    ) -> Result<(), SessionError> {
        let live = self.scene.local_pose(entity);
        let now = self.now;
        let mut e = self
            .world
            .entity_mut(entity)
            .ok_or(SessionError::UnknownEntity(entity))?;
        if !e.has_body || e.ownership != Ownership::Free {
            tracing::debug!("Ignoring motion for {entity}: no body or not free");
            return Ok(());
        }
        let pose = live.unwrap_or(e.pose);
        e.pose = pose;
        e.motion = motion;
        let transition = e.replicator.record_broadcast(pose, now);
        let tick = e.next_tick();
        drop(e);

        self.physics.set_velocity(entity, motion);
        self.broadcast(Message::EntityPose(EntityPose {
            entity,
            tick,
            pose,
            motion: Some(motion),
            resting: false,
        }));
        self.emit_wake(entity, transition);
        Ok(())
    }

    /// Set or grow the scale; the result is clamped to the entity's bounds.
    pub fn scale_internal(
        &mut self,
        entity: EntityId,
        value: f32,
        additive: bool,
    ) -> Result<f32, SessionError> {
        let mut e = self
            .world
            .entity_mut(entity)
            .ok_or(SessionError::UnknownEntity(entity))?;
        let scale = if additive {
            e.add_scale(value)
        } else {
            e.set_scale(value)
        };
        let tick = e.next_tick();
        drop(e);

        if let Some(view) = self.views.get_mut(&entity) {
            view.receive_scale(scale);
        }
        self.broadcast(Message::EntityScale(EntityScale {
            entity,
            tick,
            scale,
        }));
        self.emit(SessionEvent::ScaleChanged { entity, scale });
        Ok(scale)
    }

    /// Turn (`additive`) or replace the handle rotation of an entity held by
    /// `participant`. Returns `false` if `participant` is not the holder.
    pub fn handling_rotation_internal(
        &mut self,
        entity: EntityId,
        participant: ParticipantId,
        rotation: Quat,
        local: bool,
        additive: bool,
    ) -> Result<bool, SessionError> {
        let holder_rotation = self
            .viewpoint_of(participant)
            .ok_or(SessionError::UnknownParticipant(participant))?
            .rotation;
        let mut e = self
            .world
            .entity_mut(entity)
            .ok_or(SessionError::UnknownEntity(entity))?;
        let Some(mut handle) = e.handle.filter(|_| e.holder() == Some(participant)) else {
            return Ok(false);
        };

        let canonical = e.pose.rotation;
        handle.rotation = if additive {
            OwnershipArbiter::turned_handle(
                &e.config,
                handle.rotation,
                rotation,
                local,
                canonical,
                holder_rotation,
            )
        } else if local {
            rotation.normalize()
        } else {
            let basis = OwnershipArbiter::rotation_basis(&e.config, canonical, holder_rotation);
            (basis.inverse() * rotation).normalize()
        };
        e.handle = Some(handle);
        let tick = e.next_tick();
        drop(e);

        if let Some(view) = self.views.get_mut(&entity) {
            view.receive_handle(handle);
        }
        self.broadcast(Message::HandleUpdate(HandleUpdate {
            entity,
            tick,
            holder: participant,
            handle,
        }));
        Ok(true)
    }

    // --- Messages ---

    /// Apply one message from a connected replica.
    pub fn handle_message(&mut self, from: ParticipantId, message: Message) {
        if !self.world.has_participant(from) {
            tracing::warn!("Ignoring message from unknown {from}");
            return;
        }
        let result = match message {
            Message::GrabRequest(r) => self.grab_as(r.entity, from, r.pose).map(drop),
            Message::ReleaseRequest(r) => self.release_as(r.entity, from, r.pose, None).map(drop),
            Message::ThrowRequest(r) => self.throw_as(r.entity, from, r.pose).map(drop),
            Message::SetPoseRequest(r) => self.set_pose_internal(r.entity, r.pose),
            Message::SetMotionRequest(r) => self.set_motion_internal(r.entity, r.motion),
            Message::SetScaleRequest(r) => self.scale_internal(r.entity, r.scale, false).map(drop),
            Message::AddScaleRequest(r) => self.scale_internal(r.entity, r.scale, true).map(drop),
            Message::AddHandlingRotation(r) => self
                .handling_rotation_internal(r.entity, from, r.rotation, r.local, true)
                .map(drop),
            Message::SetHandlingRotation(r) => self
                .handling_rotation_internal(r.entity, from, r.rotation, r.local, false)
                .map(drop),
            Message::ParticipantPose(p) => {
                if p.participant == from {
                    self.apply_participant_pose(from, p.tick, p.pose);
                } else {
                    tracing::warn!("{from} sent a pose for {}", p.participant);
                }
                Ok(())
            }
            other => {
                tracing::warn!("Ignoring authoritative message from replica {from}: {other:?}");
                Ok(())
            }
        };
        if let Err(err) = result {
            tracing::debug!("Request from {from} failed: {err}");
        }
    }

    /// Exchange messages with every connected replica: apply incoming
    /// requests, drop lost participants, then flush the outbox.
    pub fn sync<T: Transport>(&mut self, hub: &mut Hub<T>) {
        let poll = hub.poll();
        for (from, message) in poll.messages {
            self.handle_message(from, message);
        }
        for participant in poll.lost {
            self.disconnect(participant);
        }
        hub.dispatch_all(self.outbox.drain(..));
    }

    // --- Ticking ---

    fn run_task(&mut self, task: HostTask) {
        match task {
            HostTask::SampleEntity(entity) => self.sample_entity(entity),
            HostTask::SampleViewpoint => self.sample_viewpoint(),
            HostTask::HandOff { entity, to } => self.complete_handoff(entity, to),
            HostTask::Expire(entity) => {
                tracing::info!("{entity} reached the end of its lifetime");
                self.destroy_entity(entity);
            }
        }
    }

    fn sample_entity(&mut self, id: EntityId) {
        let live = self.scene.local_pose(id);
        let velocity = self.physics.velocity(id);
        let now = self.now;
        let Some(mut e) = self.world.entity_mut(id) else {
            return;
        };
        let Some(live) = live.filter(|_| e.ownership == Ownership::Free) else {
            return;
        };

        let e = &mut *e;
        let decision = e.replicator.sample(live, now, &e.config, false);
        e.pose = live;
        if e.has_body {
            e.motion = velocity.unwrap_or_default();
        }
        let message = if decision.send {
            Some(EntityPose {
                entity: id,
                tick: e.next_tick(),
                pose: live,
                motion: e.has_body.then_some(e.motion),
                resting: e.is_resting(),
            })
        } else {
            None
        };

        if let Some(message) = message {
            let channel = if decision.transition == RestTransition::CameToRest {
                Channel::ReliableOrdered
            } else {
                Channel::UnreliableUnordered
            };
            self.outbox.push(Envelope {
                recipient: Recipient::All,
                channel,
                message: Message::EntityPose(message),
            });
        }
        match decision.transition {
            RestTransition::None => {}
            RestTransition::StartedMoving => {
                tracing::debug!("{id} started moving");
                self.emit(SessionEvent::RestChanged {
                    entity: id,
                    resting: false,
                });
            }
            RestTransition::CameToRest => {
                tracing::debug!("{id} came to rest");
                self.emit(SessionEvent::RestChanged {
                    entity: id,
                    resting: true,
                });
            }
        }
    }

    fn sample_viewpoint(&mut self) {
        let pose = self.local_viewpoint();
        let Some(send) = self.viewpoint.sample(pose, self.ctx.participant()) else {
            return;
        };
        self.outbox.push(Envelope {
            recipient: Recipient::All,
            channel: send.channel,
            message: Message::ParticipantPose(ParticipantPose {
                participant: self.ctx.local,
                tick: send.tick,
                pose,
            }),
        });
    }

    fn destroy_fallen(&mut self) {
        let fallen: Vec<EntityId> = self
            .world
            .entity_ids()
            .into_iter()
            .filter(|&id| {
                let Some(e) = self.world.entity(id) else {
                    return false;
                };
                let Some(floor) = e.config.destroy_below else {
                    return false;
                };
                let y = match e.ownership {
                    Ownership::Held { .. } => return false,
                    _ => self.scene.local_pose(id).unwrap_or(e.pose).position.y,
                };
                y < floor
            })
            .collect();
        for id in fallen {
            tracing::info!("{id} fell below its destroy bound");
            self.destroy_entity(id);
        }
    }

    fn update_views(&mut self, dt: f32) {
        for view in self.views.values_mut() {
            let holder_view = view
                .holder()
                .and_then(|h| self.world.participant(h))
                .map(|p| p.pose);
            view.update(dt, holder_view, &mut self.scene, &mut self.physics);
        }
    }
}

impl<S: SceneGraph, P: PhysicsEngine> SessionControl for HostSession<S, P> {
    fn set_local_viewpoint(&mut self, pose: Pose) {
        let local = self.ctx.local;
        if let Some(mut state) = self.world.participant_mut(local) {
            state.pose = pose;
        }
        self.scene.set_participant_pose(local, pose);
    }

    fn grab(&mut self, entity: EntityId) -> Result<(), SessionError> {
        let pose = self.local_viewpoint();
        self.grab_as(entity, self.ctx.local, pose).map(drop)
    }

    fn release(&mut self, entity: EntityId) -> Result<(), SessionError> {
        let pose = self.local_viewpoint();
        self.release_as(entity, self.ctx.local, pose, None).map(drop)
    }

    fn throw(&mut self, entity: EntityId) -> Result<(), SessionError> {
        let pose = self.local_viewpoint();
        self.throw_as(entity, self.ctx.local, pose).map(drop)
    }

    fn set_pose(&mut self, entity: EntityId, pose: Pose) -> Result<(), SessionError> {
        self.set_pose_internal(entity, pose)
    }

    fn set_motion(&mut self, entity: EntityId, motion: Motion) -> Result<(), SessionError> {
        self.set_motion_internal(entity, motion)
    }

    fn set_scale(&mut self, entity: EntityId, scale: f32) -> Result<(), SessionError> {
        self.scale_internal(entity, scale, false).map(drop)
    }

    fn add_scale(&mut self, entity: EntityId, delta: f32) -> Result<(), SessionError> {
        self.scale_internal(entity, delta, true).map(drop)
    }

    fn set_handling_rotation(
        &mut self,
        entity: EntityId,
        rotation: Quat,
        local: bool,
    ) -> Result<(), SessionError> {
        self.handling_rotation_internal(entity, self.ctx.local, rotation, local, false)
            .map(drop)
    }

    fn add_handling_rotation(
        &mut self,
        entity: EntityId,
        rotation: Quat,
        local: bool,
    ) -> Result<(), SessionError> {
        self.handling_rotation_internal(entity, self.ctx.local, rotation, local, true)
            .map(drop)
    }

    fn spawn(&mut self, pose: Pose, scale: f32, has_body: bool) -> Result<EntityId, SessionError> {
        let config = self.ctx.entity_defaults().clone();
        Ok(self.spawn_with(pose, scale, has_body, config))
    }

    fn destroy(&mut self, entity: EntityId) -> Result<(), SessionError> {
        if self.destroy_entity(entity) {
            Ok(())
        } else {
            Err(SessionError::UnknownEntity(entity))
        }
    }

    fn advance(&mut self, dt: f32) {
        if !dt.is_finite() {
            tracing::warn!("Ignoring non-finite time step {dt}");
            return;
        }
        self.now += f64::from(dt.max(0.0));
        while let Some((_, task)) = self.scheduler.pop_due(self.now) {
            self.run_task(task);
        }
        self.destroy_fallen();
        self.update_views(dt);
    }
}

#[cfg(test)]
#[path = "authority_tests.rs"]
mod tests;
