//! Authoritative pose sampling and tick ordering.
//!
//! The host samples every free entity at its configured rate through a
//! [`PoseReplicator`], which decides whether the sample is worth sending.
//! Each participant samples its own viewpoint through a
//! [`ParticipantPoseSampler`]. Receivers guard every stream with a
//! [`TickGate`].

use tandem_config::{EntityConfig, ParticipantConfig};
use tandem_math::Pose;
use tandem_net::{Channel, Tick};

use crate::rest::{RestDetector, RestState, RestTransition};

// ---------------------------------------------------------------------------
// Ticks
// ---------------------------------------------------------------------------

/// Per-sender tick source.
#[derive(Debug, Clone, Default)]
pub struct TickCounter {
    tick: Tick,
}

impl TickCounter {
    /// A counter whose first [`TickCounter::advance`] yields 1.
    pub fn new() -> Self {
        Self::default()
    }

    /// Most recently issued tick (0 before the first).
    pub fn current(&self) -> Tick {
        self.tick
    }

    /// Issue the next tick (monotonically increasing).
    pub fn advance(&mut self) -> Tick {
        self.tick = self.tick.saturating_add(1);
        self.tick
    }
}

/// Receiver-side last-writer-wins filter.
#[derive(Debug, Clone, Default)]
pub struct TickGate {
    last: Option<Tick>,
}

impl TickGate {
    /// A gate that accepts any first tick.
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept `tick` only if it is greater than the last accepted one.
    pub fn accept(&mut self, tick: Tick) -> bool {
        if self.last.is_some_and(|last| tick <= last) {
            return false;
        }
        self.last = Some(tick);
        true
    }

    /// Last accepted tick.
    pub fn last(&self) -> Option<Tick> {
        self.last
    }
}

// ---------------------------------------------------------------------------
// Entity sampling
// ---------------------------------------------------------------------------

/// Outcome of one authoritative entity sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleDecision {
    /// Broadcast the sampled pose.
    pub send: bool,
    /// Rest edge crossed by this sample.
    pub transition: RestTransition,
}

impl SampleDecision {
    const SUPPRESSED: Self = Self {
        send: false,
        transition: RestTransition::None,
    };
}

/// Per-entity sampler: threshold test against the last broadcast pose plus
/// rest detection.
///
/// While [`RestState::Moving`], every sample is broadcast so receivers keep
/// fresh velocities. The sample that crosses into [`RestState::Resting`] is
/// broadcast once more with the final pose; after that nothing is sent until
/// the entity moves past a threshold again.
#[derive(Debug, Clone)]
pub struct PoseReplicator {
    last_broadcast: Pose,
    rest: RestDetector,
}

impl PoseReplicator {
    /// A sampler that considers `initial` already broadcast.
    pub fn new(initial: Pose, now: f64, config: &EntityConfig, state: RestState) -> Self {
        Self {
            last_broadcast: initial,
            rest: RestDetector::new(now, config.sleep_threshold, state),
        }
    }

    /// Pose most recently broadcast.
    pub fn last_broadcast(&self) -> Pose {
        self.last_broadcast
    }

    /// Current rest classification.
    pub fn rest_state(&self) -> RestState {
        self.rest.state()
    }

    /// Underlying detector.
    pub fn rest(&self) -> &RestDetector {
        &self.rest
    }

    /// Whether `live` differs from the last broadcast by more than the
    /// configured thresholds. Both comparisons are strict.
    pub fn exceeds_thresholds(&self, live: Pose, config: &EntityConfig) -> bool {
        let moved_sq = (live.position - self.last_broadcast.position).length_squared();
        moved_sq > config.position_threshold * config.position_threshold
            || live.angle_deg(self.last_broadcast) > config.rotation_threshold
    }

    /// Sample a free entity. Held entities must not be sampled; pass
    /// `held = true` and the sample is suppressed without touching rest
    /// state.
    pub fn sample(
        &mut self,
        live: Pose,
        now: f64,
        config: &EntityConfig,
        held: bool,
    ) -> SampleDecision {
        if held {
            return SampleDecision::SUPPRESSED;
        }

        let moved = self.exceeds_thresholds(live, config);
        let transition = self.rest.observe(moved, now);
        let send = moved || !self.rest.is_resting() || transition == RestTransition::CameToRest;
        if send {
            self.last_broadcast = live;
        }
        SampleDecision { send, transition }
    }

    /// Record a pose that was broadcast outside of sampling (placement,
    /// release) and restart the rest timer.
    pub fn record_broadcast(&mut self, pose: Pose, now: f64) -> RestTransition {
        self.last_broadcast = pose;
        self.rest.wake(now)
    }
}

// ---------------------------------------------------------------------------
// Participant sampling
// ---------------------------------------------------------------------------

/// A participant pose the sampler decided to send.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewpointSend {
    /// Tick to stamp on the message.
    pub tick: Tick,
    /// Channel to use.
    pub channel: Channel,
}

/// Samples the local participant's viewpoint.
#[derive(Debug, Clone, Default)]
pub struct ParticipantPoseSampler {
    last_sent: Option<Pose>,
    ticks: TickCounter,
}

impl ParticipantPoseSampler {
    /// A sampler that sends its first sample unconditionally.
    pub fn new() -> Self {
        Self::default()
    }

    /// Decide whether `pose` is worth sending. Low rates use the reliable
    /// channel, high rates the unreliable one.
    pub fn sample(&mut self, pose: Pose, config: &ParticipantConfig) -> Option<ViewpointSend> {
        if config.update_rate == 0 {
            return None;
        }
        let moved = match self.last_sent {
            None => true,
            Some(last) => {
                let threshold = config.position_threshold;
                (pose.position - last.position).length_squared() > threshold * threshold
                    || pose.angle_deg(last) > config.rotation_threshold
            }
        };
        if !moved {
            return None;
        }

        self.last_sent = Some(pose);
        let channel = if config.uses_reliable_channel() {
            Channel::ReliableOrdered
        } else {
            Channel::UnreliableUnordered
        };
        Some(ViewpointSend {
            tick: self.ticks.advance(),
            channel,
        })
    }
}
