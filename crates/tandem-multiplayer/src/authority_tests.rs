use std::cell::RefCell;
use std::f32::consts::FRAC_PI_2;
use std::rc::Rc;

use super::*;
use crate::collaborators::ParentFrame;
use crate::headless::{HeadlessPhysics, HeadlessScene};
use tandem_config::{Config, PositionMode};
use tandem_net::{GrabRequest, HandlingRotationRequest};

const HOST: ParticipantId = ParticipantId(1);
const A: ParticipantId = ParticipantId(2);
const B: ParticipantId = ParticipantId(3);

type Host = HostSession<HeadlessScene, HeadlessPhysics>;

fn host_with(physics: HeadlessPhysics) -> Host {
    let ctx = SessionContext::new(HOST, "host", Config::default());
    HostSession::new(ctx, HeadlessScene::new(HOST), physics)
}

fn host() -> Host {
    host_with(HeadlessPhysics::weightless())
}

fn with_guests() -> Host {
    let mut host = host();
    host.join(A, "alice");
    host.join(B, "bob");
    host.drain_outbox();
    host
}

fn shared() -> EntityConfig {
    EntityConfig {
        exclusive_mode: false,
        ..Default::default()
    }
}

fn eye(x: f32) -> Pose {
    Pose::from_position(Vec3::new(x, 1.5, 0.0))
}

fn record(host: &mut Host) -> Rc<RefCell<Vec<SessionEvent>>> {
    let log = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&log);
    host.subscribe(move |event| sink.borrow_mut().push(event.clone()));
    log
}

fn messages(host: &mut Host) -> Vec<Message> {
    host.drain_outbox().into_iter().map(|e| e.message).collect()
}

/// Integrate physics, then advance the session clock.
fn step(host: &mut Host, dt: f32) {
    let (scene, physics) = host.collaborators_mut();
    physics.integrate(scene, dt);
    host.advance(dt);
}

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

#[test]
fn test_spawn_broadcasts_and_schedules_sampling() {
    let mut host = host();
    let events = record(&mut host);
    let before = host.pending_tasks();

    let e = host.spawn(Pose::from_position(Vec3::Y), 1.0, true).unwrap();

    assert_eq!(host.pending_tasks(), before + 1);
    assert!(host.entity(e).is_some());
    assert_eq!(host.scene().node(e).unwrap().frame, ParentFrame::Session);
    assert_eq!(host.physics().is_kinematic(e), Some(false));
    let sent = messages(&mut host);
    assert!(matches!(&sent[..], [Message::EntitySpawned(s)] if s.entity == e));
    assert_eq!(*events.borrow(), vec![SessionEvent::Spawned { entity: e }]);
}

#[test]
fn test_scale_stays_clamped() {
    let mut host = host();
    let e = host.spawn(Pose::IDENTITY, 1.0, false).unwrap();

    host.set_scale(e, 10.0).unwrap();
    assert_eq!(host.entity(e).unwrap().scale(), 2.0);
    host.add_scale(e, -5.0).unwrap();
    assert_eq!(host.entity(e).unwrap().scale(), 0.1);
    host.advance(0.016);
    assert_eq!(host.view(e).unwrap().displayed_scale(), 0.1);
}

#[test]
fn test_huge_or_non_finite_step_returns() {
    let mut host = host();
    let e = host.spawn(Pose::IDENTITY, 1.0, true).unwrap();

    host.advance(f32::INFINITY);
    host.advance(f32::NAN);
    assert_eq!(host.now(), 0.0);

    host.advance(1.0e9);
    assert!(host.now() >= 1.0e9);
    assert!(host.entity(e).is_some());
}

#[test]
fn test_destroy_unknown_entity_errors() {
    let mut host = host();
    assert!(matches!(
        host.destroy(EntityId(42)),
        Err(SessionError::UnknownEntity(EntityId(42)))
    ));
}

#[test]
fn test_lifetime_expires() {
    let mut host = host();
    let config = EntityConfig {
        lifetime_secs: Some(1.0),
        ..Default::default()
    };
    let e = host.spawn_with(Pose::IDENTITY, 1.0, false, config);

    host.advance(0.5);
    assert!(host.entity(e).is_some());
    host.advance(0.6);
    assert!(host.entity(e).is_none());
    assert!(host.scene().node(e).is_none());
}

#[test]
fn test_destroy_on_fall() {
    let mut physics = HeadlessPhysics::new();
    physics.floor = None;
    let mut host = host_with(physics);
    let events = record(&mut host);
    let config = EntityConfig {
        destroy_below: Some(-1.0),
        ..Default::default()
    };
    let e = host.spawn_with(Pose::IDENTITY, 1.0, true, config);

    for _ in 0..20 {
        step(&mut host, 0.05);
    }
    assert!(host.entity(e).is_none());
    assert!(host.physics().velocity(e).is_none());
    assert!(events.borrow().contains(&SessionEvent::Destroyed { entity: e }));
}

// ---------------------------------------------------------------------------
// Ownership
// ---------------------------------------------------------------------------

#[test]
fn test_grab_and_release_reparent() {
    let mut host = with_guests();
    let e = host.spawn(Pose::IDENTITY, 1.0, true).unwrap();

    assert_eq!(host.grab_as(e, A, eye(0.0)).unwrap(), GrabOutcome::Granted);
    assert_eq!(host.entity(e).unwrap().holder(), Some(A));
    assert_eq!(host.participant(A).unwrap().held, Some(e));
    assert_eq!(host.scene().node(e).unwrap().frame, ParentFrame::Participant(A));
    assert_eq!(host.physics().is_kinematic(e), Some(true));

    let outcome = host.release_as(e, A, eye(1.0), None).unwrap();
    let ReleaseOutcome::Released(pose) = outcome else {
        panic!("expected a release, got {outcome:?}");
    };
    assert!(pose.position.abs_diff_eq(Vec3::new(1.0, 1.5, -1.0), 1e-5));
    assert_eq!(host.entity(e).unwrap().ownership, Ownership::Free);
    assert_eq!(host.participant(A).unwrap().held, None);
    assert_eq!(host.scene().node(e).unwrap().frame, ParentFrame::Session);
    assert_eq!(host.physics().is_kinematic(e), Some(false));
}

#[test]
fn test_local_grab_uses_local_view() {
    let mut host = host();
    let e = host.spawn(Pose::IDENTITY, 1.0, false).unwrap();
    host.set_local_viewpoint(eye(0.0));
    host.grab(e).unwrap();
    assert_eq!(host.scene().node(e).unwrap().frame, ParentFrame::LocalView);
    let session = host.scene().session_pose(e).unwrap();
    assert!(session.position.abs_diff_eq(Vec3::new(0.0, 1.5, -1.0), 1e-5));
}

#[test]
fn test_exclusive_grab_has_one_winner() {
    let mut host = with_guests();
    let e = host.spawn(Pose::IDENTITY, 1.0, true).unwrap();

    assert_eq!(host.grab_as(e, A, eye(0.0)).unwrap(), GrabOutcome::Granted);
    assert_eq!(
        host.grab_as(e, B, eye(1.0)).unwrap(),
        GrabOutcome::Rejected(GrabRejection::ExclusivelyHeld { holder: A })
    );
    assert_eq!(host.entity(e).unwrap().holder(), Some(A));
    assert_eq!(host.participant(B).unwrap().held, None);
}

#[test]
fn test_release_by_non_holder_refused() {
    let mut host = with_guests();
    let e = host.spawn(Pose::IDENTITY, 1.0, true).unwrap();
    host.grab_as(e, A, eye(0.0)).unwrap();

    assert_eq!(
        host.release_as(e, B, eye(0.0), None).unwrap(),
        ReleaseOutcome::NotHolder { holder: A }
    );
    assert_eq!(host.entity(e).unwrap().holder(), Some(A));
}

#[test]
fn test_steal_hands_off_after_delay() {
    let mut host = with_guests();
    let e = host.spawn_with(Pose::IDENTITY, 1.0, true, shared());
    host.grab_as(e, A, eye(0.0)).unwrap();

    assert_eq!(
        host.grab_as(e, B, eye(2.0)).unwrap(),
        GrabOutcome::StealScheduled { from: A }
    );
    assert_eq!(
        host.entity(e).unwrap().ownership,
        Ownership::Releasing { to: B }
    );
    assert_eq!(host.participant(A).unwrap().held, None);
    assert!(host.has_pending_handoff(e));
    assert_eq!(
        host.grab_as(e, A, eye(0.0)).unwrap(),
        GrabOutcome::Rejected(GrabRejection::HandOffPending)
    );

    host.advance(0.05);
    assert!(!host.entity(e).unwrap().ownership.is_held());

    host.advance(0.06);
    assert_eq!(host.entity(e).unwrap().holder(), Some(B));
    assert_eq!(host.participant(B).unwrap().held, Some(e));
    assert_eq!(host.participant(A).unwrap().held, None);
    assert!(!host.has_pending_handoff(e));
    assert_eq!(host.scene().node(e).unwrap().frame, ParentFrame::Participant(B));
}

#[test]
fn test_steal_releases_at_requester_viewpoint() {
    let mut host = with_guests();
    let config = EntityConfig {
        position_mode: PositionMode::KeepInitialOffset,
        ..shared()
    };
    let e = host.spawn_with(Pose::from_position(Vec3::new(0.0, 0.5, -1.0)), 1.0, false, config);
    host.grab_as(e, A, eye(0.0)).unwrap();
    let handle = host.entity(e).unwrap().handle.unwrap();
    host.drain_outbox();

    host.grab_as(e, B, eye(5.0)).unwrap();
    let released = messages(&mut host)
        .into_iter()
        .find_map(|m| match m {
            Message::Released(r) => Some(r.pose),
            _ => None,
        })
        .unwrap();
    let expected = eye(5.0).transform_point(handle.position);
    assert!(released.position.abs_diff_eq(expected, 1e-5));
    assert!(released.position.abs_diff_eq(Vec3::new(5.0, 0.5, -1.0), 1e-5));

    host.advance(0.11);
    let entity = host.entity(e).unwrap();
    assert_eq!(entity.holder(), Some(B));
    assert!(entity.handle.unwrap().position.abs_diff_eq(handle.position, 1e-5));
}

#[test]
fn test_handoff_cancelled_when_thief_leaves() {
    let mut host = with_guests();
    let e = host.spawn_with(Pose::IDENTITY, 1.0, true, shared());
    host.grab_as(e, A, eye(0.0)).unwrap();
    host.grab_as(e, B, eye(2.0)).unwrap();

    assert!(host.disconnect(B));
    assert!(!host.has_pending_handoff(e));
    assert_eq!(host.entity(e).unwrap().ownership, Ownership::Free);

    host.advance(0.2);
    assert_eq!(host.entity(e).unwrap().ownership, Ownership::Free);
}

#[test]
fn test_handoff_cancelled_on_destroy() {
    let mut host = with_guests();
    let e = host.spawn_with(Pose::IDENTITY, 1.0, true, shared());
    host.grab_as(e, A, eye(0.0)).unwrap();
    host.grab_as(e, B, eye(2.0)).unwrap();

    host.destroy(e).unwrap();
    assert!(!host.has_pending_handoff(e));
    host.advance(0.2);
    assert!(host.entity(e).is_none());
    assert_eq!(host.participant(B).unwrap().held, None);
}

#[test]
fn test_disconnect_forces_release() {
    let mut host = with_guests();
    let events = record(&mut host);
    let e = host.spawn(Pose::IDENTITY, 1.0, true).unwrap();
    host.grab_as(e, A, eye(0.0)).unwrap();
    host.drain_outbox();

    assert!(host.disconnect(A));
    let entity = host.entity(e).unwrap();
    assert_eq!(entity.ownership, Ownership::Free);
    assert!(entity.pose.position.abs_diff_eq(Vec3::new(0.0, 1.5, -1.0), 1e-5));
    assert!(!host.world().has_participant(A));

    let sent = messages(&mut host);
    assert!(matches!(sent[0], Message::Released(_)));
    assert!(matches!(sent[1], Message::ParticipantLeft(ParticipantLeft { participant: A })));
    assert!(events.borrow().contains(&SessionEvent::ParticipantLeft { participant: A }));
    assert!(!host.disconnect(HOST));
}

#[test]
fn test_grabbing_second_entity_drops_first() {
    let mut host = with_guests();
    let first = host.spawn(Pose::IDENTITY, 1.0, false).unwrap();
    let second = host.spawn(Pose::from_position(Vec3::X), 1.0, false).unwrap();

    host.grab_as(first, A, eye(0.0)).unwrap();
    host.grab_as(second, A, eye(0.0)).unwrap();
    assert_eq!(host.entity(first).unwrap().ownership, Ownership::Free);
    assert_eq!(host.entity(second).unwrap().holder(), Some(A));
    assert_eq!(host.participant(A).unwrap().held, Some(second));
}

#[test]
fn test_release_snaps_to_grid() {
    let mut host = with_guests();
    let config = EntityConfig {
        snap_to_grid: true,
        grid_size: 0.5,
        ..Default::default()
    };
    let e = host.spawn_with(Pose::IDENTITY, 1.0, false, config);
    host.grab_as(e, A, eye(0.0)).unwrap();

    let holder = Pose::from_position(Vec3::new(1.23, 0.3, 1.81));
    let ReleaseOutcome::Released(pose) = host.release_as(e, A, holder, None).unwrap() else {
        panic!("expected a release");
    };
    assert!(pose.position.abs_diff_eq(Vec3::new(1.0, 0.5, 1.0), 1e-5));
}

#[test]
fn test_set_pose_is_exact_and_releases() {
    let mut host = with_guests();
    let e = host.spawn(Pose::IDENTITY, 1.0, true).unwrap();
    host.grab_as(e, A, eye(0.0)).unwrap();

    let target = Pose::new(Vec3::new(3.0, 0.5, -2.0), Quat::from_rotation_y(0.7));
    host.set_pose(e, target).unwrap();

    let entity = host.entity(e).unwrap();
    assert_eq!(entity.ownership, Ownership::Free);
    assert_eq!(entity.pose, target);
    let node = host.scene().node(e).unwrap();
    assert_eq!(node.frame, ParentFrame::Session);
    assert_eq!(node.pose, target);
}

#[test]
fn test_throw_imparts_velocity() {
    let mut host = host();
    let e = host.spawn(Pose::IDENTITY, 1.0, true).unwrap();
    host.grab(e).unwrap();
    host.throw(e).unwrap();

    let motion = host.physics().velocity(e).unwrap();
    assert!((motion.linear.length() - THROW_SPEED).abs() < 1e-4);
    assert!(motion.linear.y > 0.0);
    assert!(motion.linear.z < 0.0);
}

#[test]
fn test_handling_rotation_only_for_holder() {
    let mut host = with_guests();
    let e = host.spawn(Pose::IDENTITY, 1.0, false).unwrap();
    host.grab_as(e, A, eye(0.0)).unwrap();
    let quarter = Quat::from_rotation_y(FRAC_PI_2);

    assert!(!host.handling_rotation_internal(e, B, quarter, true, true).unwrap());
    assert!(host.handling_rotation_internal(e, A, quarter, true, true).unwrap());
    let handle = host.entity(e).unwrap().handle.unwrap();
    assert!(handle.rotation.abs_diff_eq(quarter, 1e-5));

    let ReleaseOutcome::Released(pose) = host.release_as(e, A, eye(0.0), None).unwrap() else {
        panic!("expected a release");
    };
    assert!(pose.rotation.abs_diff_eq(quarter, 1e-5));
}

// ---------------------------------------------------------------------------
// Replication
// ---------------------------------------------------------------------------

#[test]
fn test_resting_entity_settles_then_goes_quiet() {
    let mut host = host();
    let events = record(&mut host);
    let e = host.spawn(Pose::IDENTITY, 1.0, true).unwrap();
    host.drain_outbox();

    let mut poses = Vec::new();
    for _ in 0..80 {
        step(&mut host, 0.05);
        poses.extend(host.drain_outbox().into_iter().filter_map(|env| match env.message {
            Message::EntityPose(p) => Some((env.channel, p)),
            _ => None,
        }));
    }

    let settles: Vec<_> = poses.iter().filter(|(_, p)| p.resting).collect();
    assert_eq!(settles.len(), 1);
    let (channel, last) = poses.last().unwrap();
    assert!(last.resting);
    assert_eq!(*channel, Channel::ReliableOrdered);
    assert!(poses.len() > 5);
    assert!(host.entity(e).unwrap().is_resting());
    assert_eq!(
        events
            .borrow()
            .iter()
            .filter(|ev| matches!(ev, SessionEvent::RestChanged { resting: true, .. }))
            .count(),
        1
    );

    host.set_motion(
        e,
        Motion {
            linear: Vec3::X,
            angular: Vec3::ZERO,
        },
    )
    .unwrap();
    assert!(!host.entity(e).unwrap().is_resting());
    for _ in 0..10 {
        step(&mut host, 0.05);
    }
    let moving = messages(&mut host)
        .into_iter()
        .filter(|m| matches!(m, Message::EntityPose(p) if !p.resting))
        .count();
    assert!(moving >= 2);
    assert!(host.entity(e).unwrap().pose.position.x > 0.2);
}

#[test]
fn test_held_entity_is_not_sampled() {
    let mut host = with_guests();
    let e = host.spawn(Pose::IDENTITY, 1.0, true).unwrap();
    host.grab_as(e, A, eye(0.0)).unwrap();
    host.drain_outbox();

    for _ in 0..20 {
        host.advance(0.05);
    }
    let sent = messages(&mut host);
    assert!(!sent.iter().any(|m| matches!(m, Message::EntityPose(_))));
}

#[test]
fn test_join_sends_snapshot() {
    let mut host = host();
    let e = host.spawn(Pose::IDENTITY, 1.0, true).unwrap();
    host.drain_outbox();

    assert!(host.join(A, "alice"));
    assert!(!host.join(A, "alice"));
    let sent = host.drain_outbox();
    assert!(sent.iter().any(|env| env.recipient == Recipient::Only(A)
        && matches!(&env.message, Message::ParticipantJoined(j) if j.participant == HOST)));
    assert!(sent.iter().any(|env| env.recipient == Recipient::Only(A)
        && matches!(&env.message, Message::EntitySpawned(s) if s.entity == e)));
    assert!(sent.iter().any(|env| env.recipient == Recipient::AllExcept(A)
        && matches!(&env.message, Message::ParticipantJoined(j) if j.participant == A)));
}

#[test]
fn test_requests_from_unknown_senders_ignored() {
    let mut host = with_guests();
    let e = host.spawn(Pose::IDENTITY, 1.0, false).unwrap();
    let request = Message::GrabRequest(GrabRequest {
        entity: e,
        pose: eye(0.0),
    });

    host.handle_message(ParticipantId(99), request.clone());
    assert_eq!(host.entity(e).unwrap().ownership, Ownership::Free);

    host.handle_message(A, request);
    assert_eq!(host.entity(e).unwrap().holder(), Some(A));

    host.handle_message(
        A,
        Message::AddHandlingRotation(HandlingRotationRequest {
            entity: e,
            rotation: Quat::from_rotation_x(0.3),
            local: true,
        }),
    );
    let handle = host.entity(e).unwrap().handle.unwrap();
    assert!(handle.rotation.abs_diff_eq(Quat::from_rotation_x(0.3), 1e-5));
}

#[test]
fn test_participant_pose_relayed_and_gated() {
    let mut host = with_guests();
    let first = eye(1.0);
    let pose = |tick, pose| {
        Message::ParticipantPose(ParticipantPose {
            participant: A,
            tick,
            pose,
        })
    };

    host.handle_message(A, pose(5, first));
    host.handle_message(A, pose(3, eye(9.0)));
    host.handle_message(B, pose(6, eye(9.0)));

    assert_eq!(host.participant(A).unwrap().pose, first);
    assert_eq!(host.scene().viewpoint(A), Some(first));
    let sent = host.drain_outbox();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].recipient, Recipient::AllExcept(A));
    assert_eq!(sent[0].channel, Channel::UnreliableUnordered);
}

#[test]
fn test_session_frame_only_moves_the_frame() {
    let mut host = host();
    let e = host.spawn(Pose::from_position(Vec3::X), 1.0, false).unwrap();
    host.set_session_frame(SessionFrame::new(Vec3::new(0.0, 0.0, 2.0), 90.0));
    assert_eq!(host.scene().session_frame().position, Vec3::new(0.0, 0.0, 2.0));
    assert_eq!(host.entity(e).unwrap().pose.position, Vec3::X);

    assert!(!host.update_anchor(Vec3::ZERO, Vec3::Y));
    assert!(host.update_anchor(Vec3::ONE, Vec3::X));
    assert_eq!(host.scene().session_frame().position, Vec3::ONE);
}
