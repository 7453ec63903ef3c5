//! Moving/resting classification of free entities.

use serde::{Deserialize, Serialize};

/// Motion classification of a free entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RestState {
    /// Recently displaced; pose updates flow every sample.
    Moving,
    /// Still for longer than the sleep threshold; nothing is sent.
    Resting,
}

/// Edge reported by [`RestDetector::observe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestTransition {
    /// No change.
    None,
    /// Resting -> Moving.
    StartedMoving,
    /// Moving -> Resting.
    CameToRest,
}

/// Tracks when an entity last moved and flips to [`RestState::Resting`]
/// once it has been still for longer than `sleep_threshold` seconds.
#[derive(Debug, Clone)]
pub struct RestDetector {
    last_motion_time: f64,
    sleep_threshold: f64,
    state: RestState,
}

impl RestDetector {
    /// A detector that last saw motion at `now`.
    pub fn new(now: f64, sleep_threshold: f32, state: RestState) -> Self {
        Self {
            last_motion_time: now,
            sleep_threshold: f64::from(sleep_threshold.max(0.0)),
            state,
        }
    }

    /// Current classification.
    pub fn state(&self) -> RestState {
        self.state
    }

    /// Shorthand for `state() == Resting`.
    pub fn is_resting(&self) -> bool {
        self.state == RestState::Resting
    }

    /// Time of the last observed motion.
    pub fn last_motion_time(&self) -> f64 {
        self.last_motion_time
    }

    /// Feed one sample. `moved` is whether the sample crossed a motion
    /// threshold.
    pub fn observe(&mut self, moved: bool, now: f64) -> RestTransition {
        if moved {
            self.last_motion_time = now;
            if self.state == RestState::Resting {
                self.state = RestState::Moving;
                return RestTransition::StartedMoving;
            }
        } else if self.state == RestState::Moving
            && now - self.last_motion_time > self.sleep_threshold
        {
            self.state = RestState::Resting;
            return RestTransition::CameToRest;
        }
        RestTransition::None
    }

    /// Force [`RestState::Moving`] and restart the timer (release, explicit
    /// placement or velocity change).
    pub fn wake(&mut self, now: f64) -> RestTransition {
        self.last_motion_time = now;
        if self.state == RestState::Resting {
            self.state = RestState::Moving;
            RestTransition::StartedMoving
        } else {
            RestTransition::None
        }
    }
}
