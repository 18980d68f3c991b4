//! Bite debouncing
//!
//! Turns the per-frame proximity signal into episode transitions. A run of
//! hand-near-mouth frames becomes a sustained bite only after it has held
//! continuously for the configured threshold; any clear frame ends the run.

use crate::types::{BiteTransition, DebouncePhase};
use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Clear,
    Pending { started_at: DateTime<Utc> },
    Sustained { started_at: DateTime<Utc> },
}

/// Debouncer for the hand-near-mouth signal
#[derive(Debug, Clone)]
pub struct BiteDebouncer {
    threshold: Duration,
    state: State,
}

impl BiteDebouncer {
    pub fn new(threshold: Duration) -> Self {
        Self {
            threshold,
            state: State::Clear,
        }
    }

    /// Feed one proximity sample taken at `now`.
    ///
    /// `Sustained` is reported once per unbroken run; `EpisodeEnded` only
    /// when a sustained run clears.
    pub fn observe(&mut self, hand_near_mouth: bool, now: DateTime<Utc>) -> Option<BiteTransition> {
        match (self.state, hand_near_mouth) {
            (State::Clear, true) => {
                debug!(at = %now, "hand near mouth, bite pending");
                self.state = State::Pending { started_at: now };
                Some(BiteTransition::Started { at: now })
            }
            (State::Pending { started_at }, true) => {
                if now - started_at >= self.threshold {
                    info!(started_at = %started_at, at = %now, "bite sustained");
                    self.state = State::Sustained { started_at };
                    Some(BiteTransition::Sustained { at: now, started_at })
                } else {
                    None
                }
            }
            (State::Sustained { .. }, true) => None,
            (State::Clear, false) => None,
            (State::Pending { .. }, false) => {
                debug!(at = %now, "hand left mouth before threshold");
                self.state = State::Clear;
                None
            }
            (State::Sustained { started_at }, false) => {
                let duration_ms = (now - started_at).num_milliseconds();
                info!(duration_ms, "bite episode ended");
                self.state = State::Clear;
                Some(BiteTransition::EpisodeEnded {
                    at: now,
                    duration_ms,
                })
            }
        }
    }

    pub fn phase(&self) -> DebouncePhase {
        match self.state {
            State::Clear => DebouncePhase::Clear,
            State::Pending { .. } => DebouncePhase::Pending,
            State::Sustained { .. } => DebouncePhase::Sustained,
        }
    }

    /// Start of the current run, if proximity currently holds
    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        match self.state {
            State::Clear => None,
            State::Pending { started_at } | State::Sustained { started_at } => Some(started_at),
        }
    }

    pub fn is_sustained(&self) -> bool {
        matches!(self.state, State::Sustained { .. })
    }

    pub fn reset(&mut self) {
        self.state = State::Clear;
    }
}
