//! Reward timer
//!
//! Counts clean seconds toward the session goal. Paused while a bite is
//! sustained; every resolved bite episode forfeits all accumulated progress
//! and restarts the count from zero, even after the goal was reached.

use tracing::info;

/// What a single reward tick produced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RewardTick {
    /// Timer is stopped; nothing counted
    Idle,
    Counted { elapsed_secs: u64 },
    /// This tick crossed the goal
    GoalReached { elapsed_secs: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewardTimer {
    elapsed_secs: u64,
    goal_secs: u64,
    running: bool,
}

impl RewardTimer {
    /// Stopped timer with a goal fixed for the session. A zero goal is raised to one second.
    pub fn new(goal_secs: u64) -> Self {
        Self {
            elapsed_secs: 0,
            goal_secs: goal_secs.max(1),
            running: false,
        }
    }

    pub fn start(&mut self) {
        self.running = true;
    }

    pub fn stop(&mut self) {
        self.running = false;
    }

    pub fn reset(&mut self) {
        self.elapsed_secs = 0;
    }

    /// One second of clean time, if running. Keeps counting past the goal.
    pub fn tick(&mut self) -> RewardTick {
        if !self.running {
            return RewardTick::Idle;
        }
        self.elapsed_secs += 1;
        if self.elapsed_secs == self.goal_secs {
            info!(elapsed_secs = self.elapsed_secs, "reward goal reached");
            RewardTick::GoalReached {
                elapsed_secs: self.elapsed_secs,
            }
        } else {
            RewardTick::Counted {
                elapsed_secs: self.elapsed_secs,
            }
        }
    }

    /// Resolve a bite episode: stop, reset, start. Returns the forfeited seconds.
    pub fn restart_after_episode(&mut self) -> u64 {
        let forfeited = self.elapsed_secs;
        self.stop();
        self.reset();
        self.start();
        info!(forfeited_secs = forfeited, "reward timer restarted after bite");
        forfeited
    }

    pub fn elapsed_secs(&self) -> u64 {
        self.elapsed_secs
    }

    pub fn goal_secs(&self) -> u64 {
        self.goal_secs
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn goal_reached(&self) -> bool {
        self.elapsed_secs >= self.goal_secs
    }
}
