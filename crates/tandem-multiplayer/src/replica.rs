//! Replica-side session: displays host state and forwards requests.
//!
//! A replica never decides anything. Every [`SessionControl`] call becomes a
//! request to the host; authoritative notifications coming back are filtered
//! by tick and fed into one [`PoseSmoother`] per entity and one
//! [`ParticipantSmoother`] per remote viewpoint.

use std::collections::BTreeMap;

use tandem_math::{Pose, Quat, SessionFrame, Vec3};
use tandem_net::{
    Channel, EntityId, EntitySpawned, GrabRequest, HandlingRotationRequest, Message, Motion,
    MotionRequest, ParticipantId, ParticipantPose, PoseRequest, ReleaseRequest, ScaleRequest,
    Transport,
};

use crate::collaborators::{PhysicsEngine, SceneGraph};
use crate::context::SessionContext;
use crate::control::SessionControl;
use crate::error::SessionError;
use crate::events::{ListenerId, Listeners, SessionEvent};
use crate::replication::ParticipantPoseSampler;
use crate::scheduler::{Scheduler, TaskScope};
use crate::smoothing::{ParticipantSmoother, PoseSmoother};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReplicaTask {
    SampleViewpoint,
}

/// A remote participant as a replica sees it.
#[derive(Debug, Clone)]
pub struct RemoteParticipant {
    /// Display name.
    pub name: String,
    /// Smoothed viewpoint.
    pub viewpoint: ParticipantSmoother,
}

/// The non-authoritative side of a session.
pub struct ReplicaSession<S, P> {
    ctx: SessionContext,
    scene: S,
    physics: P,
    frame: SessionFrame,
    views: BTreeMap<EntityId, PoseSmoother>,
    participants: BTreeMap<ParticipantId, RemoteParticipant>,
    local_pose: Pose,
    sampler: ParticipantPoseSampler,
    scheduler: Scheduler<ReplicaTask>,
    listeners: Listeners<SessionEvent>,
    outbox: Vec<(Channel, Message)>,
    now: f64,
}

impl<S: SceneGraph, P: PhysicsEngine> ReplicaSession<S, P> {
    /// A replica with no known entities, waiting for the host's snapshot.
    pub fn new(ctx: SessionContext, mut scene: S, physics: P) -> Self {
        scene.set_participant_pose(ctx.local, Pose::IDENTITY);
        let mut scheduler = Scheduler::new();
        if let Some(period) = ctx.participant().sample_period() {
            scheduler.schedule_periodic(
                period,
                period,
                &[TaskScope::Participant(ctx.local)],
                ReplicaTask::SampleViewpoint,
            );
        }
        tracing::info!("Joining session as {} ({})", ctx.name, ctx.local);

        Self {
            ctx,
            scene,
            physics,
            frame: SessionFrame::default(),
            views: BTreeMap::new(),
            participants: BTreeMap::new(),
            local_pose: Pose::IDENTITY,
            sampler: ParticipantPoseSampler::new(),
            scheduler,
            listeners: Listeners::new(),
            outbox: Vec::new(),
            now: 0.0,
        }
    }

    /// Session context.
    pub fn context(&self) -> &SessionContext {
        &self.ctx
    }

    /// Local session clock in seconds.
    pub fn now(&self) -> f64 {
        self.now
    }

    /// Displayed state of one entity.
    pub fn view(&self, id: EntityId) -> Option<&PoseSmoother> {
        self.views.get(&id)
    }

    /// Known entities in id order.
    pub fn entity_ids(&self) -> Vec<EntityId> {
        self.views.keys().copied().collect()
    }

    /// A remote participant, if known.
    pub fn participant(&self, id: ParticipantId) -> Option<&RemoteParticipant> {
        self.participants.get(&id)
    }

    /// Known remote participants in id order.
    pub fn participant_ids(&self) -> Vec<ParticipantId> {
        self.participants.keys().copied().collect()
    }

    /// This device's viewpoint.
    pub fn local_viewpoint(&self) -> Pose {
        self.local_pose
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

    /// Register a synchronous observer.
    pub fn subscribe(&mut self, callback: impl FnMut(&SessionEvent) + 'static) -> ListenerId {
        self.listeners.subscribe(callback)
    }

    /// Remove an observer.
    pub fn unsubscribe(&mut self, id: ListenerId) -> bool {
        self.listeners.unsubscribe(id)
    }

    /// Take every queued outgoing message.
    pub fn drain_outbox(&mut self) -> Vec<(Channel, Message)> {
        std::mem::take(&mut self.outbox)
    }

    /// Replace the session frame.
    pub fn set_session_frame(&mut self, frame: SessionFrame) {
        self.frame = frame;
        self.scene.set_session_frame(frame.pose());
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

    fn holder_view(&self, holder: Option<ParticipantId>) -> Option<Pose> {
        let holder = holder?;
        if holder == self.ctx.local {
            return Some(self.local_pose);
        }
        self.participants
            .get(&holder)
            .map(|p| p.viewpoint.displayed())
    }

    fn request(&mut self, entity: EntityId, message: Message) -> Result<(), SessionError> {
        if !self.views.contains_key(&entity) {
            return Err(SessionError::UnknownEntity(entity));
        }
        self.outbox.push((Channel::ReliableOrdered, message));
        Ok(())
    }

    fn emit(&mut self, event: SessionEvent) {
        self.listeners.emit(&event);
    }

    // --- Messages ---

    /// Apply one authoritative notification from the host.
    pub fn handle_message(&mut self, message: Message) {
        match message {
            Message::ParticipantJoined(j) => {
                if j.participant == self.ctx.local {
                    return;
                }
                let viewpoint = ParticipantSmoother::new(j.pose, self.ctx.participant().session_scale);
                self.scene.set_participant_pose(j.participant, j.pose);
                self.participants.insert(
                    j.participant,
                    RemoteParticipant {
                        name: j.name.clone(),
                        viewpoint,
                    },
                );
                tracing::info!("{} ({}) is in the session", j.participant, j.name);
                self.emit(SessionEvent::ParticipantJoined {
                    participant: j.participant,
                    name: j.name,
                });
            }
            Message::ParticipantLeft(l) => {
                if self.participants.remove(&l.participant).is_some() {
                    self.scene.remove_participant(l.participant);
                    tracing::info!("{} left", l.participant);
                    self.emit(SessionEvent::ParticipantLeft {
                        participant: l.participant,
                    });
                }
            }
            Message::ParticipantPose(p) => {
                if let Some(remote) = self.participants.get_mut(&p.participant)
                    && !remote.viewpoint.receive(p.tick, p.pose)
                {
                    tracing::trace!("Dropping stale pose tick {} of {}", p.tick, p.participant);
                }
            }
            Message::EntitySpawned(s) => self.apply_spawn(s),
            Message::EntityDestroyed(d) => {
                if let Some(view) = self.views.remove(&d.entity) {
                    view.remove(&mut self.scene, &mut self.physics);
                    self.emit(SessionEvent::Destroyed { entity: d.entity });
                }
            }
            Message::Grabbed(g) => {
                let holder_view = self.holder_view(Some(g.holder));
                let is_local = g.holder == self.ctx.local;
                let Some(view) = self.views.get_mut(&g.entity) else {
                    return;
                };
                if !view.accept(g.tick) {
                    return;
                }
                view.receive_grab(g.holder, is_local, g.pose, holder_view);
                self.emit(SessionEvent::Grabbed {
                    entity: g.entity,
                    holder: g.holder,
                });
            }
            Message::HandleUpdate(h) => {
                if let Some(view) = self.views.get_mut(&h.entity)
                    && view.accept(h.tick)
                    && view.holder() == Some(h.holder)
                {
                    view.receive_handle(h.handle);
                }
            }
            Message::Released(r) => {
                let holder = self.views.get(&r.entity).and_then(|v| v.holder());
                let holder_view = self.holder_view(holder);
                let Some(view) = self.views.get_mut(&r.entity) else {
                    return;
                };
                if !view.accept(r.tick) {
                    return;
                }
                view.receive_release(r.pose, r.motion, holder_view);
                self.emit(SessionEvent::Released {
                    entity: r.entity,
                    pose: r.pose,
                });
            }
            Message::EntityPose(p) => {
                let holder = self.views.get(&p.entity).and_then(|v| v.holder());
                let holder_view = self.holder_view(holder);
                let Some(view) = self.views.get_mut(&p.entity) else {
                    return;
                };
                if !view.accept(p.tick) {
                    return;
                }
                let was_resting = view.is_resting();
                view.receive_pose(p.pose, p.motion, p.resting, holder_view);
                if was_resting != p.resting {
                    self.emit(SessionEvent::RestChanged {
                        entity: p.entity,
                        resting: p.resting,
                    });
                }
            }
            Message::EntityScale(s) => {
                let Some(view) = self.views.get_mut(&s.entity) else {
                    return;
                };
                if !view.accept(s.tick) {
                    return;
                }
                view.receive_scale(s.scale);
                let scale = view.target_scale();
                self.emit(SessionEvent::ScaleChanged {
                    entity: s.entity,
                    scale,
                });
            }
            other => tracing::warn!("Replica ignoring request {other:?}"),
        }
    }

    fn apply_spawn(&mut self, s: EntitySpawned) {
        if let Some(view) = self.views.get_mut(&s.entity) {
            // Re-sent snapshot of a known entity.
            if view.accept(s.tick) {
                view.receive_pose(s.pose, None, s.resting, None);
                view.receive_scale(s.scale);
            }
            return;
        }

        let mut view = PoseSmoother::new(
            s.entity,
            s.config.validated(),
            s.has_body,
            s.pose,
            s.scale,
            s.resting,
            false,
        );
        view.accept(s.tick);
        if s.has_body {
            self.physics.insert_body(s.entity);
        }
        if let Some(holder) = s.holder {
            let holder_view = self.holder_view(Some(holder));
            view.receive_grab(holder, holder == self.ctx.local, s.pose, holder_view);
            if let Some(handle) = s.handle {
                view.receive_handle(handle);
            }
            view.step(0.0, holder_view);
        }
        view.present(&mut self.scene, &mut self.physics);
        self.views.insert(s.entity, view);
        tracing::debug!("{} appeared at {:?}", s.entity, s.pose.position);
        self.emit(SessionEvent::Spawned { entity: s.entity });
    }

    /// Exchange messages with the host: apply every notification received,
    /// then flush the outbox.
    pub fn sync<T: Transport>(&mut self, link: &mut T) -> Result<(), SessionError> {
        for message in link.receive()? {
            self.handle_message(message);
        }
        for (channel, message) in self.outbox.drain(..) {
            link.send(channel, &message)?;
        }
        Ok(())
    }

    fn sample_viewpoint(&mut self) {
        let Some(send) = self.sampler.sample(self.local_pose, self.ctx.participant()) else {
            return;
        };
        self.outbox.push((
            send.channel,
            Message::ParticipantPose(ParticipantPose {
                participant: self.ctx.local,
                tick: send.tick,
                pose: self.local_pose,
            }),
        ));
    }
}

impl<S: SceneGraph, P: PhysicsEngine> SessionControl for ReplicaSession<S, P> {
    fn set_local_viewpoint(&mut self, pose: Pose) {
        self.local_pose = pose;
        self.scene.set_participant_pose(self.ctx.local, pose);
    }

    fn grab(&mut self, entity: EntityId) -> Result<(), SessionError> {
        let pose = self.local_pose;
        self.request(entity, Message::GrabRequest(GrabRequest { entity, pose }))
    }

    fn release(&mut self, entity: EntityId) -> Result<(), SessionError> {
        let pose = self.local_pose;
        self.request(entity, Message::ReleaseRequest(ReleaseRequest { entity, pose }))
    }

    fn throw(&mut self, entity: EntityId) -> Result<(), SessionError> {
        let pose = self.local_pose;
        self.request(entity, Message::ThrowRequest(ReleaseRequest { entity, pose }))
    }

    fn set_pose(&mut self, entity: EntityId, pose: Pose) -> Result<(), SessionError> {
        self.request(entity, Message::SetPoseRequest(PoseRequest { entity, pose }))
    }

    fn set_motion(&mut self, entity: EntityId, motion: Motion) -> Result<(), SessionError> {
        self.request(
            entity,
            Message::SetMotionRequest(MotionRequest { entity, motion }),
        )
    }

    fn set_scale(&mut self, entity: EntityId, scale: f32) -> Result<(), SessionError> {
        self.request(entity, Message::SetScaleRequest(ScaleRequest { entity, scale }))
    }

    fn add_scale(&mut self, entity: EntityId, delta: f32) -> Result<(), SessionError> {
        self.request(
            entity,
            Message::AddScaleRequest(ScaleRequest {
                entity,
                scale: delta,
            }),
        )
    }

    fn set_handling_rotation(
        &mut self,
        entity: EntityId,
        rotation: Quat,
        local: bool,
    ) -> Result<(), SessionError> {
        self.request(
            entity,
            Message::SetHandlingRotation(HandlingRotationRequest {
                entity,
                rotation,
                local,
            }),
        )
    }

    fn add_handling_rotation(
        &mut self,
        entity: EntityId,
        rotation: Quat,
        local: bool,
    ) -> Result<(), SessionError> {
        self.request(
            entity,
            Message::AddHandlingRotation(HandlingRotationRequest {
                entity,
                rotation,
                local,
            }),
        )
    }

    fn spawn(&mut self, _pose: Pose, _scale: f32, _has_body: bool) -> Result<EntityId, SessionError> {
        Err(SessionError::NotAuthoritative("spawn"))
    }

    fn destroy(&mut self, _entity: EntityId) -> Result<(), SessionError> {
        Err(SessionError::NotAuthoritative("destroy"))
    }

    fn advance(&mut self, dt: f32) {
        if !dt.is_finite() {
            tracing::warn!("Ignoring non-finite time step {dt}");
            return;
        }
        self.now += f64::from(dt.max(0.0));
        while let Some((_, task)) = self.scheduler.pop_due(self.now) {
            match task {
                ReplicaTask::SampleViewpoint => self.sample_viewpoint(),
            }
        }

        for (&id, remote) in self.participants.iter_mut() {
            remote.viewpoint.step();
            self.scene.set_participant_pose(id, remote.viewpoint.displayed());
        }
        let ids: Vec<EntityId> = self.views.keys().copied().collect();
        for id in ids {
            let holder = self.views.get(&id).and_then(|v| v.holder());
            let holder_view = self.holder_view(holder);
            if let Some(view) = self.views.get_mut(&id) {
                view.update(dt, holder_view, &mut self.scene, &mut self.physics);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::ParentFrame;
    use crate::headless::{HeadlessPhysics, HeadlessScene};
    use crate::smoothing::HandleSource;
    use tandem_config::{Config, EntityConfig};
    use tandem_net::{
        EntityPose, EntityScale, Grabbed, HandleUpdate, ParticipantJoined, Released,
    };

    const ME: ParticipantId = ParticipantId(2);
    const OTHER: ParticipantId = ParticipantId(3);
    const E: EntityId = EntityId(1);

    fn replica() -> ReplicaSession<HeadlessScene, HeadlessPhysics> {
        let ctx = SessionContext::new(ME, "me", Config::default());
        ReplicaSession::new(ctx, HeadlessScene::new(ME), HeadlessPhysics::weightless())
    }

    fn spawned(tick: u64, pose: Pose) -> Message {
        Message::EntitySpawned(EntitySpawned {
            entity: E,
            tick,
            pose,
            scale: 1.0,
            has_body: true,
            resting: true,
            holder: None,
            handle: None,
            config: EntityConfig::default(),
        })
    }

    fn entity_pose(tick: u64, x: f32) -> Message {
        Message::EntityPose(EntityPose {
            entity: E,
            tick,
            pose: Pose::from_position(Vec3::new(x, 0.0, 0.0)),
            motion: None,
            resting: false,
        })
    }

    #[test]
    fn test_spawn_creates_view() {
        let mut replica = replica();
        replica.handle_message(spawned(0, Pose::from_position(Vec3::Y)));
        let view = replica.view(E).unwrap();
        assert_eq!(view.displayed().position, Vec3::Y);
        assert_eq!(replica.scene().node(E).unwrap().frame, ParentFrame::Session);
        // Resting replicas do not simulate.
        assert_eq!(replica.physics().is_kinematic(E), Some(true));
    }

    #[test]
    fn test_stale_entity_pose_dropped() {
        let mut replica = replica();
        replica.handle_message(spawned(0, Pose::IDENTITY));
        replica.handle_message(entity_pose(4, 1.0));
        replica.handle_message(entity_pose(3, 9.0));
        replica.handle_message(entity_pose(4, 9.0));
        assert_eq!(replica.view(E).unwrap().target().position.x, 1.0);
    }

    #[test]
    fn test_remote_grab_then_handle() {
        let mut replica = replica();
        replica.handle_message(Message::ParticipantJoined(ParticipantJoined {
            participant: OTHER,
            name: "other".into(),
            pose: Pose::from_position(Vec3::new(0.0, 1.5, 0.0)),
        }));
        replica.handle_message(spawned(0, Pose::IDENTITY));
        replica.handle_message(Message::Grabbed(Grabbed {
            entity: E,
            tick: 1,
            holder: OTHER,
            pose: Pose::IDENTITY,
        }));

        let view = replica.view(E).unwrap();
        assert_eq!(view.holder(), Some(OTHER));
        assert_eq!(view.handle_source(), Some(HandleSource::Placeholder));

        replica.handle_message(Message::HandleUpdate(HandleUpdate {
            entity: E,
            tick: 2,
            holder: OTHER,
            handle: Pose::from_position(Vec3::new(0.0, 0.0, -0.5)),
        }));
        replica.advance(0.016);
        let view = replica.view(E).unwrap();
        assert_eq!(view.handle_source(), Some(HandleSource::Authoritative));
        assert_eq!(
            replica.scene().node(E).unwrap().frame,
            ParentFrame::Participant(OTHER)
        );
        assert_eq!(replica.physics().is_kinematic(E), Some(true));

        replica.handle_message(Message::Released(Released {
            entity: E,
            tick: 3,
            pose: Pose::from_position(Vec3::new(0.0, 1.5, -0.5)),
            motion: None,
        }));
        replica.advance(0.016);
        assert_eq!(replica.view(E).unwrap().holder(), None);
        assert_eq!(replica.scene().node(E).unwrap().frame, ParentFrame::Session);
        assert_eq!(replica.physics().is_kinematic(E), Some(false));
    }

    #[test]
    fn test_local_grab_displays_in_local_view() {
        let mut replica = replica();
        replica.handle_message(spawned(0, Pose::IDENTITY));
        replica.handle_message(Message::Grabbed(Grabbed {
            entity: E,
            tick: 1,
            holder: ME,
            pose: Pose::IDENTITY,
        }));
        replica.advance(0.016);
        assert_eq!(replica.scene().node(E).unwrap().frame, ParentFrame::LocalView);
    }

    #[test]
    fn test_requests_queue_reliably() {
        let mut replica = replica();
        assert!(matches!(
            replica.grab(E),
            Err(SessionError::UnknownEntity(E))
        ));
        replica.handle_message(spawned(0, Pose::IDENTITY));
        replica.set_local_viewpoint(Pose::from_position(Vec3::Z));
        replica.grab(E).unwrap();
        replica.add_scale(E, 0.5).unwrap();

        let sent = replica.drain_outbox();
        assert_eq!(sent.len(), 2);
        assert!(sent.iter().all(|(c, _)| *c == Channel::ReliableOrdered));
        assert!(matches!(&sent[0].1, Message::GrabRequest(r) if r.pose.position == Vec3::Z));
        assert!(matches!(&sent[1].1, Message::AddScaleRequest(r) if r.scale == 0.5));
    }

    #[test]
    fn test_spawn_and_destroy_refused() {
        let mut replica = replica();
        assert!(matches!(
            replica.spawn(Pose::IDENTITY, 1.0, false),
            Err(SessionError::NotAuthoritative(_))
        ));
        assert!(matches!(
            replica.destroy(E),
            Err(SessionError::NotAuthoritative(_))
        ));
    }

    #[test]
    fn test_scale_clamped_on_receive() {
        let mut replica = replica();
        replica.handle_message(spawned(0, Pose::IDENTITY));
        replica.handle_message(Message::EntityScale(EntityScale {
            entity: E,
            tick: 1,
            scale: 50.0,
        }));
        assert_eq!(replica.view(E).unwrap().target_scale(), 2.0);
    }

    #[test]
    fn test_viewpoint_sampled_on_schedule() {
        let mut replica = replica();
        replica.advance(0.01);
        assert!(replica.drain_outbox().is_empty());
        replica.advance(0.05);
        let sent = replica.drain_outbox();
        assert!(matches!(
            &sent[..],
            [(Channel::UnreliableUnordered, Message::ParticipantPose(p))] if p.participant == ME
        ));
    }
}
