//! Core data types for the Niblet monitor
//!
//! This module defines the types that flow through the monitoring pipeline:
//! landmark observations from the perception component, debouncer transitions,
//! alert dispatch reports, and presentation states.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Hand landmark indices of the five fingertips (thumb, index, middle, ring, pinky)
pub const FINGERTIP_INDICES: [usize; 5] = [4, 8, 12, 16, 20];

/// Number of landmarks in a complete hand set
pub const HAND_LANDMARK_COUNT: usize = 21;

// ============================================================================
// Perception input
// ============================================================================

/// Normalized 2D landmark coordinate, both axes in [0, 1]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LandmarkPoint {
    pub x: f64,
    pub y: f64,
}

impl LandmarkPoint {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Euclidean distance to another point
    pub fn distance_to(&self, other: &LandmarkPoint) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

/// Indexed landmark set for one hand.
///
/// A complete set has [`HAND_LANDMARK_COUNT`] points; shorter sets are
/// tolerated and missing fingertips are simply not consulted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HandLandmarks(pub Vec<LandmarkPoint>);

impl HandLandmarks {
    pub fn new(points: Vec<LandmarkPoint>) -> Self {
        Self(points)
    }

    /// Fingertip points present in this set
    pub fn fingertips(&self) -> impl Iterator<Item = &LandmarkPoint> + '_ {
        FINGERTIP_INDICES.iter().filter_map(|&i| self.0.get(i))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Landmarks observed in a single frame. Any field may be absent (detector dropout).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FrameObservation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mouth: Option<LandmarkPoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub left_hand: Option<HandLandmarks>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub right_hand: Option<HandLandmarks>,
}

impl FrameObservation {
    /// Hand sets present in this frame
    pub fn hands(&self) -> impl Iterator<Item = &HandLandmarks> + '_ {
        self.left_hand.iter().chain(self.right_hand.iter())
    }
}

/// Per-frame classification result
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ProximityResult {
    /// Whether any fingertip is strictly closer than the distance threshold
    pub hand_near_mouth: bool,
    /// Smallest fingertip-to-mouth distance seen, when one could be measured
    #[serde(skip_serializing_if = "Option::is_none")]
    pub closest_distance: Option<f64>,
}

// ============================================================================
// Debouncer
// ============================================================================

/// Debouncer phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DebouncePhase {
    /// No hand-near-mouth in progress
    #[default]
    Clear,
    /// Proximity holds but the sustain threshold has not been reached
    Pending,
    /// Proximity has held for at least the sustain threshold
    Sustained,
}

/// Transition reported by the debouncer for one proximity sample
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BiteTransition {
    /// Proximity became true after being false or unset
    Started { at: DateTime<Utc> },
    /// Proximity has held continuously for the sustain threshold
    Sustained {
        at: DateTime<Utc>,
        started_at: DateTime<Utc>,
    },
    /// Proximity cleared after a sustained episode
    EpisodeEnded {
        at: DateTime<Utc>,
        duration_ms: i64,
    },
}

// ============================================================================
// Scheduling
// ============================================================================

/// Foreground state of the monitoring surface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    #[default]
    Visible,
    Hidden,
}

/// Unified event stream consumed by the session
#[derive(Debug, Clone, PartialEq)]
pub enum MonitorEvent {
    FrameArrived(FrameObservation),
    RewardTick,
    AlertTick,
    VisibilityChanged(Visibility),
}

// ============================================================================
// Alerting
// ============================================================================

/// Local notification request handed to the platform
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationRequest {
    pub title: String,
    pub body: String,
    pub tag: String,
    pub renotify: bool,
    pub require_interaction: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
}

/// Message posted to the background-delivery worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum BackgroundMessage {
    #[serde(rename = "BITE_ALERT")]
    BiteAlert,
}

/// Alert channel identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    Tone,
    LocalNotification,
    BackgroundNotification,
}

/// What caused a dispatch attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchTrigger {
    BiteSustained,
    PeriodicTick,
    VisibilityHidden,
}

/// Gate decision for a dispatch attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum DispatchDecision {
    /// Cooldown elapsed; channels were invoked
    Fired,
    /// Alerting is not armed
    Disarmed,
    /// Still within the cooldown window
    CoolingDown { remaining_ms: i64 },
}

/// Result of invoking one channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ChannelOutcome {
    Delivered,
    Skipped { reason: String },
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelResult {
    pub channel: ChannelKind,
    #[serde(flatten)]
    pub outcome: ChannelOutcome,
}

/// Record of one dispatch attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchReport {
    pub at: DateTime<Utc>,
    pub trigger: DispatchTrigger,
    #[serde(flatten)]
    pub decision: DispatchDecision,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub channels: Vec<ChannelResult>,
}

impl DispatchReport {
    pub fn fired(&self) -> bool {
        self.decision == DispatchDecision::Fired
    }

    /// Channels that actually delivered something
    pub fn delivered(&self) -> impl Iterator<Item = ChannelKind> + '_ {
        self.channels
            .iter()
            .filter(|c| c.outcome == ChannelOutcome::Delivered)
            .map(|c| c.channel)
    }
}

// ============================================================================
// Presentation
// ============================================================================

/// Visual variant shown while alerting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertVariant {
    Scolding,
    Startled,
}

/// Avatar/status presentation state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "state", content = "variant", rename_all = "snake_case")]
pub enum PresentationState {
    #[default]
    Idle,
    Focused,
    Alert(AlertVariant),
    GoalReached,
}

impl PresentationState {
    /// Same state ignoring the alert variant
    pub fn same_kind(&self, other: &PresentationState) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }

    /// Avatar asset name for this state
    pub fn asset(&self) -> &'static str {
        match self {
            Self::Idle => "avatar-idle",
            Self::Focused => "avatar-focused",
            Self::Alert(AlertVariant::Scolding) => "avatar-alert-scolding",
            Self::Alert(AlertVariant::Startled) => "avatar-alert-startled",
            Self::GoalReached => "avatar-goal",
        }
    }
}

/// Tone of the status line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusTone {
    #[default]
    Normal,
    Focus,
    Alert,
}

/// User-visible status message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusLine {
    pub message: String,
    pub tone: StatusTone,
}

impl StatusLine {
    pub fn new(message: impl Into<String>, tone: StatusTone) -> Self {
        Self {
            message: message.into(),
            tone,
        }
    }
}

// ============================================================================
// Session output
// ============================================================================

/// Observable effect of handling one event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionOutput {
    BiteStarted {
        at: DateTime<Utc>,
    },
    BiteSustained {
        at: DateTime<Utc>,
        started_at: DateTime<Utc>,
    },
    BiteEpisodeEnded {
        at: DateTime<Utc>,
        duration_ms: i64,
    },
    AlertDispatched(DispatchReport),
    RewardReset {
        at: DateTime<Utc>,
        forfeited_secs: u64,
    },
    GoalReached {
        at: DateTime<Utc>,
        elapsed_secs: u64,
    },
    PresentationChanged {
        at: DateTime<Utc>,
        state: PresentationState,
        asset: String,
    },
    StatusChanged {
        at: DateTime<Utc>,
        status: StatusLine,
    },
}

/// Point-in-time view of a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub session_id: Option<String>,
    pub monitoring: bool,
    pub phase: DebouncePhase,
    pub alert_active: bool,
    pub last_alert_at: Option<DateTime<Utc>>,
    pub elapsed_secs: u64,
    pub goal_secs: u64,
    pub reward_running: bool,
    pub presentation: PresentationState,
    pub status: Option<StatusLine>,
    pub visibility: Visibility,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_background_message_wire_shape() {
        let json = serde_json::to_string(&BackgroundMessage::BiteAlert).unwrap();
        assert_eq!(json, r#"{"type":"BITE_ALERT"}"#);

        let parsed: BackgroundMessage = serde_json::from_str(r#"{"type":"BITE_ALERT"}"#).unwrap();
        assert_eq!(parsed, BackgroundMessage::BiteAlert);
    }

    #[test]
    fn test_notification_request_uses_camel_case() {
        let request = NotificationRequest {
            title: "Niblet Monitor".to_string(),
            body: "Stop biting your nails!".to_string(),
            tag: "niblet-alert".to_string(),
            renotify: true,
            require_interaction: true,
            icon: None,
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["requireInteraction"], true);
        assert!(value.get("icon").is_none());
    }

    #[test]
    fn test_frame_observation_tolerates_missing_fields() {
        let frame: FrameObservation = serde_json::from_str("{}").unwrap();
        assert!(frame.mouth.is_none());
        assert_eq!(frame.hands().count(), 0);

        let frame: FrameObservation =
            serde_json::from_str(r#"{"mouth": {"x": 0.5, "y": 0.6}, "right_hand": []}"#).unwrap();
        assert_eq!(frame.mouth, Some(LandmarkPoint::new(0.5, 0.6)));
        assert_eq!(frame.hands().count(), 1);
    }

    #[test]
    fn test_short_hand_set_yields_only_present_fingertips() {
        let hand = HandLandmarks::new(vec![LandmarkPoint::new(0.1, 0.1); 10]);
        // Only indices 4 and 8 exist
        assert_eq!(hand.fingertips().count(), 2);
    }

    #[test]
    fn test_presentation_same_kind_ignores_variant() {
        let a = PresentationState::Alert(AlertVariant::Scolding);
        let b = PresentationState::Alert(AlertVariant::Startled);
        assert!(a.same_kind(&b));
        assert!(!a.same_kind(&PresentationState::Idle));
    }

    #[test]
    fn test_session_output_tagging() {
        let output = SessionOutput::GoalReached {
            at: chrono::TimeZone::with_ymd_and_hms(&Utc, 2024, 1, 15, 14, 0, 0).unwrap(),
            elapsed_secs: 600,
        };
        let value = serde_json::to_value(&output).unwrap();
        assert_eq!(value["type"], "goal_reached");
        assert_eq!(value["elapsed_secs"], 600);
    }
}
