//! Headless Tandem session: a host and two replicas on loopback links play a
//! scripted grab, turn, steal and throw sequence and log what every side sees.
//!
//! Configuration is loaded from `config.ron` and can be overridden via CLI flags.
//! Run with `cargo run -p tandem-demo -- --seconds 8 --drop-rate 0.2`.

use std::f32::consts::FRAC_PI_4;
use std::path::PathBuf;

use clap::Parser;
use tandem_config::{CliArgs, Config, EntityConfig, default_config_dir};
use tandem_math::{Pose, Quat, Vec3, look_rotation};
use tandem_multiplayer::{
    HeadlessPhysics, HeadlessScene, HostSession, ReplicaSession, SessionContext, SessionControl,
    SessionEvent,
};
use tandem_net::{
    EntityId, Hub, LinkConfig, LoopbackEndpoint, ParticipantId, StatsSnapshot, loopback_pair,
};
use tracing::{info, warn};

const HOST: ParticipantId = ParticipantId(1);
const ALICE: ParticipantId = ParticipantId(2);
const BOB: ParticipantId = ParticipantId(3);

type Host = HostSession<HeadlessScene, HeadlessPhysics>;
type Replica = ReplicaSession<HeadlessScene, HeadlessPhysics>;

#[derive(Debug, Clone, Copy)]
enum Cue {
    AliceGrabs,
    AliceTurns,
    BobGrabs,
    HolderThrows,
    SinkMarker,
}

const SCRIPT: &[(f64, Cue)] = &[
    (0.5, Cue::AliceGrabs),
    (1.0, Cue::AliceTurns),
    (1.5, Cue::BobGrabs),
    (2.5, Cue::HolderThrows),
    (3.0, Cue::SinkMarker),
];

struct Demo {
    host: Host,
    hub: Hub<LoopbackEndpoint>,
    replicas: Vec<(ParticipantId, Replica, LoopbackEndpoint)>,
    crate_id: EntityId,
    marker: EntityId,
    next_cue: usize,
}

impl Demo {
    fn new(config: &Config) -> Self {
        let ctx = SessionContext::new(HOST, "host", config.clone());
        let mut host = HostSession::new(ctx, HeadlessScene::new(HOST), HeadlessPhysics::new());
        host.subscribe(|event| info!("[host] {event:?}"));

        let mut hub = Hub::new();
        let mut replicas = Vec::new();
        for (id, name) in [(ALICE, "alice"), (BOB, "bob")] {
            let (host_end, replica_end) = loopback_pair(LinkConfig::from_network(&config.network, id.0));
            hub.connect(id, host_end);
            host.join(id, name);

            let ctx = SessionContext::new(id, name, config.clone());
            let mut replica =
                ReplicaSession::new(ctx, HeadlessScene::new(id), HeadlessPhysics::new());
            replica.subscribe(move |event| {
                if !matches!(event, SessionEvent::RestChanged { .. }) {
                    info!("[{name}] {event:?}");
                }
            });
            replicas.push((id, replica, replica_end));
        }

        let crate_id = host.spawn_with(
            Pose::from_position(Vec3::new(0.0, 0.5, -1.0)),
            1.0,
            true,
            config.entity.clone(),
        );
        let marker = host.spawn_with(
            Pose::from_position(Vec3::new(0.5, 1.2, -1.5)),
            0.5,
            false,
            EntityConfig {
                destroy_below: Some(-5.0),
                ..config.entity.clone()
            },
        );
        host.spawn_with(
            Pose::from_position(Vec3::new(-0.5, 1.2, -1.5)),
            0.3,
            false,
            EntityConfig {
                lifetime_secs: Some(2.0),
                ..config.entity.clone()
            },
        );

        Self {
            host,
            hub,
            replicas,
            crate_id,
            marker,
            next_cue: 0,
        }
    }

    fn replica(&mut self, id: ParticipantId) -> Option<&mut Replica> {
        self.replicas
            .iter_mut()
            .find(|(rid, _, _)| *rid == id)
            .map(|(_, replica, _)| replica)
    }

    fn play(&mut self, cue: Cue) {
        info!("Cue {cue:?} at {:.2}s", self.host.now());
        let crate_id = self.crate_id;
        let result = match cue {
            Cue::AliceGrabs => self.replica(ALICE).map(|r| r.grab(crate_id)),
            Cue::AliceTurns => self
                .replica(ALICE)
                .map(|r| r.add_handling_rotation(crate_id, Quat::from_rotation_y(FRAC_PI_4), true)),
            Cue::BobGrabs => self.replica(BOB).map(|r| r.grab(crate_id)),
            Cue::HolderThrows => {
                let holder = self.host.entity(crate_id).and_then(|e| e.holder());
                holder.and_then(|h| self.replica(h)).map(|r| r.throw(crate_id))
            }
            Cue::SinkMarker => Some(
                self.host
                    .set_pose(self.marker, Pose::from_position(Vec3::new(0.0, -10.0, 0.0))),
            ),
        };
        match result {
            Some(Err(err)) => warn!("Cue {cue:?} failed: {err}"),
            None => warn!("Cue {cue:?} had nobody to act"),
            Some(Ok(())) => {}
        }
    }

    fn frame(&mut self, dt: f32) {
        while let Some(&(at, cue)) = SCRIPT.get(self.next_cue)
            && self.host.now() >= at
        {
            self.next_cue += 1;
            self.play(cue);
        }

        let t = self.host.now() as f32;
        let (scene, physics) = self.host.collaborators_mut();
        physics.integrate(scene, dt);
        self.host.advance(dt);
        self.host.sync(&mut self.hub);

        for (index, (id, replica, link)) in self.replicas.iter_mut().enumerate() {
            let side = if index == 0 { -1.0 } else { 1.0 };
            replica.set_local_viewpoint(viewpoint(side, t));
            if let Err(err) = replica.sync(link) {
                warn!("{id} lost its link: {err}");
            }
            let (scene, physics) = replica.collaborators_mut();
            physics.integrate(scene, dt);
            replica.advance(dt);
        }
    }

    fn report(&self, print_bandwidth: bool) {
        for id in self.host.world().entity_ids() {
            let Some(entity) = self.host.entity(id) else {
                continue;
            };
            info!(
                "{id}: {:?} resting={} ownership={:?} scale={}",
                entity.pose.position,
                entity.is_resting(),
                entity.ownership,
                entity.scale()
            );
            for (rid, replica, _) in &self.replicas {
                if let Some(view) = replica.view(id) {
                    let error = view.target().distance(entity.pose);
                    info!("  {rid} sees it {error:.4} m from the host");
                }
            }
        }

        if print_bandwidth {
            let mut host_total = StatsSnapshot::default();
            for (id, _, endpoint) in &self.replicas {
                if let Some(link) = self.hub.link(*id) {
                    host_total = host_total.merged(link.counters().snapshot());
                }
                let stats = endpoint.counters().snapshot();
                info!(
                    "{id} sent {} frames ({} B), received {}",
                    stats.messages_sent(),
                    stats.bytes_sent,
                    stats.messages_received
                );
            }
            info!(
                "Host sent {} frames ({} reliable, {} B), dropped {}, reordered {}",
                host_total.messages_sent(),
                host_total.reliable_sent,
                host_total.bytes_sent,
                host_total.frames_dropped,
                host_total.frames_reordered
            );
        }
    }
}

/// A participant standing at `side` metres from the origin, swaying and
/// looking at the crate.
fn viewpoint(side: f32, t: f32) -> Pose {
    let eye = Vec3::new(side + 0.2 * t.sin(), 1.6, 1.0);
    let target = Vec3::new(0.0, 0.8, -1.0);
    let rotation = look_rotation(target - eye, Vec3::Y).unwrap_or(Quat::IDENTITY);
    Pose::new(eye, rotation)
}

fn main() {
    let args = CliArgs::parse();

    let config_dir = args.config.clone().unwrap_or_else(|| {
        default_config_dir().unwrap_or_else(|e| {
            eprintln!("{e}, using ./tandem");
            PathBuf::from("tandem")
        })
    });

    let mut config = Config::load_or_create(&config_dir).unwrap_or_else(|e| {
        eprintln!("Failed to load config: {e}, using defaults");
        Config::default()
    });
    config.apply_cli_overrides(&args);

    let log_dir = config_dir.join("logs");
    tandem_log::init_logging(Some(&log_dir), cfg!(debug_assertions), Some(&config));

    let frame_rate = config.session.frame_rate;
    let dt = 1.0 / frame_rate as f32;
    let frames = (args.seconds.max(0.0) * f64::from(frame_rate)).ceil() as usize;
    info!("Running {frames} frames at {frame_rate} Hz");

    let mut demo = Demo::new(&config);
    for _ in 0..frames {
        demo.frame(dt);
    }
    demo.report(config.debug.print_bandwidth);
}
