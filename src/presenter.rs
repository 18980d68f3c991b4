//! Avatar and status presentation
//!
//! Maps session state onto a small set of presentation states and applies a
//! state only when it differs from the one last applied, so the avatar asset
//! is not reloaded on every frame or tick.

use crate::types::{AlertVariant, DebouncePhase, PresentationState, StatusLine, StatusTone};
use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};

/// Pure mapping from session state to presentation, ignoring the alert variant
///
/// `episode_active` wins over everything; the goal wins over focus.
pub fn present(
    episode_active: bool,
    elapsed_secs: u64,
    goal_secs: u64,
    focused_after_secs: u64,
) -> PresentationState {
    if episode_active {
        PresentationState::Alert(AlertVariant::Scolding)
    } else if elapsed_secs >= goal_secs {
        PresentationState::GoalReached
    } else if elapsed_secs > focused_after_secs {
        PresentationState::Focused
    } else {
        PresentationState::Idle
    }
}

/// Deduplicating avatar presenter with an injectable random source
pub struct AvatarPresenter {
    focused_after_secs: u64,
    applied: Option<PresentationState>,
    rng: Box<dyn RngCore + Send>,
}

impl std::fmt::Debug for AvatarPresenter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AvatarPresenter")
            .field("focused_after_secs", &self.focused_after_secs)
            .field("applied", &self.applied)
            .finish_non_exhaustive()
    }
}

impl AvatarPresenter {
    /// Presenter drawing alert variants from OS entropy
    pub fn new(focused_after_secs: u64) -> Self {
        Self::with_rng(focused_after_secs, Box::new(StdRng::from_entropy()))
    }

    /// Presenter with a deterministic variant sequence
    pub fn seeded(focused_after_secs: u64, seed: u64) -> Self {
        Self::with_rng(focused_after_secs, Box::new(StdRng::seed_from_u64(seed)))
    }

    pub fn with_rng(focused_after_secs: u64, rng: Box<dyn RngCore + Send>) -> Self {
        Self {
            focused_after_secs,
            applied: None,
            rng,
        }
    }

    /// Evaluate and apply. Returns the new state only when it changed.
    ///
    /// Staying in alert keeps the variant already shown.
    pub fn update(
        &mut self,
        episode_active: bool,
        elapsed_secs: u64,
        goal_secs: u64,
    ) -> Option<PresentationState> {
        let computed = present(episode_active, elapsed_secs, goal_secs, self.focused_after_secs);
        if self.applied.is_some_and(|applied| applied.same_kind(&computed)) {
            return None;
        }

        let state = match computed {
            PresentationState::Alert(_) => PresentationState::Alert(self.pick_variant()),
            other => other,
        };
        self.applied = Some(state);
        Some(state)
    }

    pub fn current(&self) -> PresentationState {
        self.applied.unwrap_or_default()
    }

    /// Forget the applied state so the next update always applies
    pub fn reset(&mut self) {
        self.applied = None;
    }

    fn pick_variant(&mut self) -> AlertVariant {
        if self.rng.gen_bool(0.5) {
            AlertVariant::Scolding
        } else {
            AlertVariant::Startled
        }
    }
}

/// Status line for a debouncer phase
pub fn status_for(phase: DebouncePhase) -> StatusLine {
    match phase {
        DebouncePhase::Clear => StatusLine::new("Monitoring", StatusTone::Normal),
        DebouncePhase::Pending => StatusLine::new("Monitoring", StatusTone::Focus),
        DebouncePhase::Sustained => StatusLine::new("Stop biting!", StatusTone::Alert),
    }
}

/// Deduplicating status line presenter
#[derive(Debug, Clone, Default)]
pub struct StatusPresenter {
    applied: Option<StatusLine>,
}

impl StatusPresenter {
    /// Apply `status`, returning it only when it differs from the last one
    pub fn apply(&mut self, status: StatusLine) -> Option<StatusLine> {
        if self.applied.as_ref() == Some(&status) {
            return None;
        }
        self.applied = Some(status.clone());
        Some(status)
    }

    pub fn current(&self) -> Option<&StatusLine> {
        self.applied.as_ref()
    }

    pub fn reset(&mut self) {
        self.applied = None;
    }
}
