//! Shared-object sessions: host-authoritative ownership arbitration, pose
//! replication with rest detection, and receiver-side smoothing.

pub mod authority;
pub mod collaborators;
pub mod context;
pub mod control;
pub mod entity;
pub mod error;
pub mod events;
pub mod headless;
pub mod ownership;
pub mod replica;
pub mod replication;
pub mod rest;
pub mod scheduler;
pub mod smoothing;
pub mod world;

pub use authority::{GrabOutcome, HostSession, ReleaseOutcome, THROW_SPEED};
pub use collaborators::{ParentFrame, PhysicsEngine, SceneGraph};
pub use context::SessionContext;
pub use control::SessionControl;
pub use entity::{Participant, SharedEntity};
pub use error::SessionError;
pub use events::{ListenerId, Listeners, SessionEvent};
pub use headless::{HeadlessPhysics, HeadlessScene};
pub use ownership::{
    GrabDecision, GrabRejection, Ownership, OwnershipArbiter, ReleaseDecision,
};
pub use replica::{RemoteParticipant, ReplicaSession};
pub use replication::{ParticipantPoseSampler, PoseReplicator, TickCounter, TickGate};
pub use rest::{RestDetector, RestState, RestTransition};
pub use scheduler::{Scheduler, TaskId, TaskScope};
pub use smoothing::{HandleSource, ParticipantSmoother, PoseSmoother};
pub use world::AuthoritativeWorld;
