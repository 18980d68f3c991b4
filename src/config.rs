//! Monitor configuration
//!
//! All tunables for one monitoring session. Every field has a default so a
//! partial JSON document (or none at all) yields a usable configuration.

use crate::error::MonitorError;
use crate::types::NotificationRequest;
use chrono::Duration;
use serde::{Deserialize, Serialize};

/// Default sustain window before a hand-near-mouth run counts as a bite
pub const DEFAULT_BITE_THRESHOLD_MS: u64 = 2500;

/// Default fingertip-to-mouth distance, in normalized coordinates
pub const DEFAULT_DISTANCE_THRESHOLD: f64 = 0.08;

/// Default minimum spacing between alert dispatches
pub const DEFAULT_NOTIFICATION_COOLDOWN_MS: u64 = 8000;

/// Default period of the alert re-check tick
pub const DEFAULT_ALERT_INTERVAL_MS: u64 = 2000;

/// Reward timer tick period
pub const DEFAULT_REWARD_TICK_MS: u64 = 1000;

/// Reward goal used when the user enters nothing usable
pub const DEFAULT_GOAL_MINUTES: u64 = 10;

/// Clean seconds after which the avatar looks focused
pub const DEFAULT_FOCUSED_AFTER_SECS: u64 = 30;

/// Largest distance threshold that still makes sense on a unit square
const MAX_DISTANCE_THRESHOLD: f64 = 1.5;

/// Upper bound for every timing field (one day)
pub const MAX_PERIOD_MS: u64 = 86_400_000;

/// Upper bound for the alert tone length
pub const MAX_TONE_DURATION_MS: u64 = 10_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Continuous proximity required before a bite is sustained (ms)
    pub bite_threshold_ms: u64,
    /// Fingertip distance below which a hand counts as near the mouth
    pub distance_threshold: f64,
    /// Minimum spacing between dispatches (ms)
    pub notification_cooldown_ms: u64,
    /// Period of the alert re-check while a bite is sustained (ms)
    pub alert_interval_ms: u64,
    /// Period of the reward timer tick (ms)
    pub reward_tick_ms: u64,
    /// Reward goal in minutes
    pub goal_minutes: u64,
    /// Clean seconds after which presentation switches to focused
    pub focused_after_secs: u64,
    pub notification_title: String,
    pub notification_body: String,
    pub notification_tag: String,
    pub notification_icon: Option<String>,
    /// Alert tone pitch (Hz)
    pub tone_frequency_hz: f64,
    /// Alert tone length (ms)
    pub tone_duration_ms: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            bite_threshold_ms: DEFAULT_BITE_THRESHOLD_MS,
            distance_threshold: DEFAULT_DISTANCE_THRESHOLD,
            notification_cooldown_ms: DEFAULT_NOTIFICATION_COOLDOWN_MS,
            alert_interval_ms: DEFAULT_ALERT_INTERVAL_MS,
            reward_tick_ms: DEFAULT_REWARD_TICK_MS,
            goal_minutes: DEFAULT_GOAL_MINUTES,
            focused_after_secs: DEFAULT_FOCUSED_AFTER_SECS,
            notification_title: "Niblet Monitor".to_string(),
            notification_body: "Stop biting your nails!".to_string(),
            notification_tag: "niblet-alert".to_string(),
            notification_icon: None,
            tone_frequency_hz: 880.0,
            tone_duration_ms: 180,
        }
    }
}

impl MonitorConfig {
    /// Parse a (possibly partial) JSON configuration and validate it
    pub fn from_json(json: &str) -> Result<Self, MonitorError> {
        let config: MonitorConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String, MonitorError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), MonitorError> {
        if !self.distance_threshold.is_finite()
            || self.distance_threshold <= 0.0
            || self.distance_threshold > MAX_DISTANCE_THRESHOLD
        {
            return Err(MonitorError::InvalidConfig(format!(
                "distance_threshold must be in (0, {MAX_DISTANCE_THRESHOLD}], got {}",
                self.distance_threshold
            )));
        }

        for (name, value) in [
            ("bite_threshold_ms", self.bite_threshold_ms),
            ("alert_interval_ms", self.alert_interval_ms),
            ("reward_tick_ms", self.reward_tick_ms),
            ("goal_minutes", self.goal_minutes),
            ("tone_duration_ms", self.tone_duration_ms),
        ] {
            if value == 0 {
                return Err(MonitorError::InvalidConfig(format!(
                    "{name} must be greater than zero"
                )));
            }
        }

        for (name, value) in [
            ("bite_threshold_ms", self.bite_threshold_ms),
            ("notification_cooldown_ms", self.notification_cooldown_ms),
            ("alert_interval_ms", self.alert_interval_ms),
            ("reward_tick_ms", self.reward_tick_ms),
        ] {
            if value > MAX_PERIOD_MS {
                return Err(MonitorError::InvalidConfig(format!(
                    "{name} must be at most {MAX_PERIOD_MS}, got {value}"
                )));
            }
        }

        if self.tone_duration_ms > MAX_TONE_DURATION_MS {
            return Err(MonitorError::InvalidConfig(format!(
                "tone_duration_ms must be at most {MAX_TONE_DURATION_MS}, got {}",
                self.tone_duration_ms
            )));
        }

        if !self.tone_frequency_hz.is_finite() || self.tone_frequency_hz <= 0.0 {
            return Err(MonitorError::InvalidConfig(format!(
                "tone_frequency_hz must be positive, got {}",
                self.tone_frequency_hz
            )));
        }

        Ok(())
    }

    /// Replace the goal with user-entered minutes, falling back to the default
    pub fn with_goal_input(mut self, raw: Option<&str>) -> Self {
        self.goal_minutes = goal_minutes_from_input(raw);
        self
    }

    pub fn goal_seconds(&self) -> u64 {
        self.goal_minutes.saturating_mul(60)
    }

    pub fn bite_threshold(&self) -> Duration {
        millis(self.bite_threshold_ms)
    }

    pub fn cooldown(&self) -> Duration {
        millis(self.notification_cooldown_ms)
    }

    pub fn alert_interval(&self) -> Duration {
        millis(self.alert_interval_ms)
    }

    pub fn reward_tick(&self) -> Duration {
        millis(self.reward_tick_ms)
    }

    /// Notification shape issued by both the local and background channels
    pub fn notification_request(&self) -> NotificationRequest {
        NotificationRequest {
            title: self.notification_title.clone(),
            body: self.notification_body.clone(),
            tag: self.notification_tag.clone(),
            renotify: true,
            require_interaction: true,
            icon: self.notification_icon.clone(),
        }
    }
}

/// Interpret user-entered goal minutes.
///
/// Absent, non-numeric, zero, negative or non-finite input yields
/// [`DEFAULT_GOAL_MINUTES`]. Fractional minutes round down, with a floor of one.
pub fn goal_minutes_from_input(raw: Option<&str>) -> u64 {
    let Some(parsed) = raw.and_then(|s| s.trim().parse::<f64>().ok()) else {
        return DEFAULT_GOAL_MINUTES;
    };
    if !parsed.is_finite() || parsed <= 0.0 {
        return DEFAULT_GOAL_MINUTES;
    }
    (parsed.floor() as u64).max(1)
}

/// Goal length in seconds for user-entered minutes, see [`goal_minutes_from_input`]
pub fn goal_seconds_from_input(raw: Option<&str>) -> u64 {
    goal_minutes_from_input(raw).saturating_mul(60)
}

fn millis(ms: u64) -> Duration {
    Duration::milliseconds(i64::try_from(ms).unwrap_or(i64::MAX))
}
