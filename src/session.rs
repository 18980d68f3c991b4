//! Monitoring session
//!
//! A single owner for all per-session state: debouncer, alert dispatcher,
//! reward timer and presenters. Every input (frames, the two periodic ticks,
//! visibility changes) goes through [`MonitorSession::handle`], which applies
//! classification, debouncing, then dispatch/timer/presenter updates in that
//! order before returning.

use crate::alert::{AlertChannels, AlertDispatcher, AlertToggles, ToggleOutcome};
use crate::classifier::ProximityClassifier;
use crate::config::{goal_minutes_from_input, MonitorConfig};
use crate::debouncer::BiteDebouncer;
use crate::error::MonitorError;
use crate::presenter::{status_for, AvatarPresenter, StatusPresenter};
use crate::reward::{RewardTick, RewardTimer};
use crate::types::{
    BiteTransition, DispatchDecision, DispatchTrigger, FrameObservation, MonitorEvent,
    ProximityResult, SessionOutput, SessionSnapshot, StatusLine, Visibility,
};
use chrono::{DateTime, Utc};
use tracing::{debug, info};
use uuid::Uuid;

pub struct MonitorSession {
    config: MonitorConfig,
    classifier: ProximityClassifier,
    debouncer: BiteDebouncer,
    dispatcher: AlertDispatcher,
    reward: RewardTimer,
    avatar: AvatarPresenter,
    status: StatusPresenter,
    visibility: Visibility,
    session_id: Option<Uuid>,
    last_proximity: ProximityResult,
}

impl std::fmt::Debug for MonitorSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MonitorSession")
            .field("session_id", &self.session_id)
            .field("phase", &self.debouncer.phase())
            .field("reward", &self.reward)
            .field("visibility", &self.visibility)
            .finish_non_exhaustive()
    }
}

impl MonitorSession {
    /// Create an idle session. Monitoring begins with [`start`](Self::start).
    pub fn new(config: MonitorConfig, channels: AlertChannels) -> Result<Self, MonitorError> {
        config.validate()?;
        Ok(Self {
            classifier: ProximityClassifier::new(config.distance_threshold),
            debouncer: BiteDebouncer::new(config.bite_threshold()),
            dispatcher: AlertDispatcher::new(&config, channels),
            reward: RewardTimer::new(config.goal_seconds()),
            avatar: AvatarPresenter::new(config.focused_after_secs),
            status: StatusPresenter::default(),
            visibility: Visibility::Visible,
            session_id: None,
            last_proximity: ProximityResult::default(),
            config,
        })
    }

    /// Replace the avatar presenter (e.g. with a seeded one)
    pub fn with_presenter(mut self, avatar: AvatarPresenter) -> Self {
        self.avatar = avatar;
        self
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn is_monitoring(&self) -> bool {
        self.session_id.is_some()
    }

    /// Set the reward goal from user-entered minutes. Only between sessions.
    pub fn set_goal_input(&mut self, raw: Option<&str>) -> Result<u64, MonitorError> {
        if self.is_monitoring() {
            return Err(MonitorError::AlreadyMonitoring);
        }
        self.config.goal_minutes = goal_minutes_from_input(raw);
        self.reward = RewardTimer::new(self.config.goal_seconds());
        Ok(self.config.goal_minutes)
    }

    pub fn start(&mut self, at: DateTime<Utc>) -> Result<Vec<SessionOutput>, MonitorError> {
        if self.is_monitoring() {
            return Err(MonitorError::AlreadyMonitoring);
        }
        self.reset_state();
        let session_id = Uuid::new_v4();
        self.session_id = Some(session_id);
        self.reward.start();
        info!(%session_id, goal_secs = self.reward.goal_secs(), "monitoring started");

        let mut outputs = Vec::new();
        self.refresh_presentation(at, &mut outputs);
        Ok(outputs)
    }

    /// End the session and return every piece of state to its initial value
    pub fn stop(&mut self) -> Result<(), MonitorError> {
        let Some(session_id) = self.session_id else {
            return Err(MonitorError::NotMonitoring);
        };
        info!(%session_id, elapsed_secs = self.reward.elapsed_secs(), "monitoring stopped");
        self.reset_state();
        Ok(())
    }

    fn reset_state(&mut self) {
        self.debouncer.reset();
        self.dispatcher.reset();
        self.reward = RewardTimer::new(self.config.goal_seconds());
        self.avatar.reset();
        self.status.reset();
        self.visibility = Visibility::Visible;
        self.session_id = None;
        self.last_proximity = ProximityResult::default();
    }

    /// Apply one event. Events arriving while not monitoring are dropped.
    pub fn handle(&mut self, at: DateTime<Utc>, event: MonitorEvent) -> Vec<SessionOutput> {
        if !self.is_monitoring() {
            debug!(?event, "event ignored, not monitoring");
            return Vec::new();
        }

        let mut outputs = Vec::new();
        match event {
            MonitorEvent::FrameArrived(observation) => self.on_frame(at, &observation, &mut outputs),
            MonitorEvent::RewardTick => self.on_reward_tick(at, &mut outputs),
            MonitorEvent::AlertTick => {
                if self.debouncer.is_sustained() && self.dispatcher.will_alert() {
                    self.dispatch(at, DispatchTrigger::PeriodicTick, &mut outputs);
                }
            }
            MonitorEvent::VisibilityChanged(visibility) => {
                self.visibility = visibility;
                debug!(?visibility, "visibility changed");
                if visibility == Visibility::Hidden
                    && self.debouncer.is_sustained()
                    && self.dispatcher.will_alert()
                {
                    self.dispatch(at, DispatchTrigger::VisibilityHidden, &mut outputs);
                }
            }
        }
        outputs
    }

    fn on_frame(
        &mut self,
        at: DateTime<Utc>,
        observation: &FrameObservation,
        outputs: &mut Vec<SessionOutput>,
    ) {
        self.last_proximity = self.classifier.classify(observation);

        match self.debouncer.observe(self.last_proximity.hand_near_mouth, at) {
            Some(BiteTransition::Started { at }) => {
                outputs.push(SessionOutput::BiteStarted { at });
            }
            Some(BiteTransition::Sustained { at, started_at }) => {
                outputs.push(SessionOutput::BiteSustained { at, started_at });
                self.reward.stop();
                self.dispatch(at, DispatchTrigger::BiteSustained, outputs);
            }
            Some(BiteTransition::EpisodeEnded { at, duration_ms }) => {
                outputs.push(SessionOutput::BiteEpisodeEnded { at, duration_ms });
                let forfeited_secs = self.reward.restart_after_episode();
                outputs.push(SessionOutput::RewardReset { at, forfeited_secs });
            }
            None => {}
        }

        self.refresh_presentation(at, outputs);
    }

    fn on_reward_tick(&mut self, at: DateTime<Utc>, outputs: &mut Vec<SessionOutput>) {
        if let RewardTick::GoalReached { elapsed_secs } = self.reward.tick() {
            outputs.push(SessionOutput::GoalReached { at, elapsed_secs });
        }
        self.refresh_presentation(at, outputs);
    }

    fn dispatch(&mut self, at: DateTime<Utc>, trigger: DispatchTrigger, outputs: &mut Vec<SessionOutput>) {
        let report = self.dispatcher.dispatch(at, trigger, self.visibility);
        if report.decision != DispatchDecision::Disarmed {
            outputs.push(SessionOutput::AlertDispatched(report));
        }
    }

    fn refresh_presentation(&mut self, at: DateTime<Utc>, outputs: &mut Vec<SessionOutput>) {
        if let Some(status) = self.status.apply(status_for(self.debouncer.phase())) {
            outputs.push(SessionOutput::StatusChanged { at, status });
        }
        if let Some(state) = self.avatar.update(
            self.debouncer.is_sustained(),
            self.reward.elapsed_secs(),
            self.reward.goal_secs(),
        ) {
            outputs.push(SessionOutput::PresentationChanged {
                at,
                state,
                asset: state.asset().to_string(),
            });
        }
    }

    /// Press the notification toggle. Platform problems also land on the status line.
    pub fn toggle_notifications(&mut self) -> ToggleOutcome {
        let outcome = self.dispatcher.toggle_notifications();
        if let Some(status) = &outcome.status {
            self.status.apply(status.clone());
        }
        outcome
    }

    pub fn toggle_sound(&mut self) -> bool {
        self.dispatcher.toggle_sound()
    }

    /// Replace the alert channels, e.g. once a background worker registers.
    /// Toggles and the cooldown are kept.
    pub fn replace_channels(&mut self, channels: AlertChannels) {
        self.dispatcher.replace_channels(channels);
    }

    pub fn toggles(&self) -> AlertToggles {
        self.dispatcher.toggles()
    }

    /// Surface a message on the status line, e.g. a camera failure
    pub fn set_status(&mut self, status: StatusLine) -> Option<StatusLine> {
        self.status.apply(status)
    }

    pub fn last_proximity(&self) -> ProximityResult {
        self.last_proximity
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.session_id.map(|id| id.to_string()),
            monitoring: self.is_monitoring(),
            phase: self.debouncer.phase(),
            alert_active: self.debouncer.is_sustained(),
            last_alert_at: self.dispatcher.last_fired_at(),
            elapsed_secs: self.reward.elapsed_secs(),
            goal_secs: self.reward.goal_secs(),
            reward_running: self.reward.is_running(),
            presentation: self.avatar.current(),
            status: self.status.current().cloned(),
            visibility: self.visibility,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::{NotificationPermission, Outbox};
    use crate::types::{ChannelKind, DebouncePhase, HandLandmarks, LandmarkPoint, PresentationState, HAND_LANDMARK_COUNT};
    use chrono::{Duration, TimeZone};

    fn t(ms: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 14, 0, 0).unwrap() + Duration::milliseconds(ms)
    }

    fn biting() -> MonitorEvent {
        let mouth = LandmarkPoint::new(0.5, 0.6);
        let mut hand = vec![LandmarkPoint::new(0.1, 0.9); HAND_LANDMARK_COUNT];
        hand[8] = LandmarkPoint::new(0.51, 0.61);
        MonitorEvent::FrameArrived(FrameObservation {
            mouth: Some(mouth),
            left_hand: None,
            right_hand: Some(HandLandmarks::new(hand)),
        })
    }

    fn clear() -> MonitorEvent {
        MonitorEvent::FrameArrived(FrameObservation {
            mouth: Some(LandmarkPoint::new(0.5, 0.6)),
            ..Default::default()
        })
    }

    fn session(outbox: &Outbox) -> MonitorSession {
        let config = MonitorConfig {
            bite_threshold_ms: 700,
            ..Default::default()
        };
        MonitorSession::new(config, outbox.channels(true))
            .unwrap()
            .with_presenter(AvatarPresenter::seeded(30, 3))
    }

    fn armed_session(outbox: &Outbox) -> MonitorSession {
        outbox.set_permission(NotificationPermission::Granted);
        let mut session = session(outbox);
        session.toggle_notifications();
        session
    }

    #[test]
    fn test_events_ignored_before_start() {
        let outbox = Outbox::new();
        let mut session = session(&outbox);
        assert!(session.handle(t(0), biting()).is_empty());
        assert!(session.handle(t(0), MonitorEvent::RewardTick).is_empty());
        assert_eq!(session.snapshot().elapsed_secs, 0);
    }

    #[test]
    fn test_start_applies_initial_presentation() {
        let outbox = Outbox::new();
        let mut session = session(&outbox);
        let outputs = session.start(t(0)).unwrap();

        assert!(outputs.iter().any(|o| matches!(
            o,
            SessionOutput::PresentationChanged { state: PresentationState::Idle, .. }
        )));
        assert!(outputs.iter().any(|o| matches!(o, SessionOutput::StatusChanged { .. })));
        assert!(session.snapshot().reward_running);
        assert!(matches!(session.start(t(1)), Err(MonitorError::AlreadyMonitoring)));
    }

    #[test]
    fn test_sustained_bite_pauses_reward_and_alerts() {
        let outbox = Outbox::new();
        let mut session = armed_session(&outbox);
        session.start(t(0)).unwrap();
        session.handle(t(0), MonitorEvent::RewardTick);
        session.handle(t(0), biting());
        let outputs = session.handle(t(700), biting());

        assert!(outputs.iter().any(|o| matches!(o, SessionOutput::BiteSustained { .. })));
        assert!(outputs.iter().any(|o| matches!(o, SessionOutput::AlertDispatched(r) if r.fired())));
        let snapshot = session.snapshot();
        assert!(snapshot.alert_active);
        assert!(!snapshot.reward_running);
        assert!(matches!(snapshot.presentation, PresentationState::Alert(_)));

        // Paused: ticks do not count
        session.handle(t(1000), MonitorEvent::RewardTick);
        assert_eq!(session.snapshot().elapsed_secs, 1);
    }

    #[test]
    fn test_episode_end_resets_reward() {
        let outbox = Outbox::new();
        let mut session = session(&outbox);
        session.start(t(0)).unwrap();
        for _ in 0..40 {
            session.handle(t(0), MonitorEvent::RewardTick);
        }
        session.handle(t(0), biting());
        session.handle(t(800), biting());
        let outputs = session.handle(t(1000), clear());

        assert!(outputs.contains(&SessionOutput::RewardReset {
            at: t(1000),
            forfeited_secs: 40
        }));
        let snapshot = session.snapshot();
        assert_eq!(snapshot.elapsed_secs, 0);
        assert!(snapshot.reward_running);
        assert_eq!(snapshot.phase, DebouncePhase::Clear);
        assert_eq!(snapshot.presentation, PresentationState::Idle);
    }

    #[test]
    fn test_alert_tick_respects_cooldown() {
        let outbox = Outbox::new();
        let mut session = armed_session(&outbox);
        session.start(t(0)).unwrap();
        session.handle(t(0), biting());
        session.handle(t(700), biting());

        for ms in (2700..=8000).step_by(2000) {
            session.handle(t(ms), MonitorEvent::AlertTick);
        }
        assert_eq!(outbox.count(ChannelKind::LocalNotification), 1);

        session.handle(t(8700), MonitorEvent::AlertTick);
        assert_eq!(outbox.count(ChannelKind::LocalNotification), 2);
    }

    #[test]
    fn test_alert_tick_without_episode_does_nothing() {
        let outbox = Outbox::new();
        let mut session = armed_session(&outbox);
        session.start(t(0)).unwrap();
        assert!(session.handle(t(2000), MonitorEvent::AlertTick).is_empty());
    }

    #[test]
    fn test_hidden_while_sustained_dispatches_through_worker() {
        let outbox = Outbox::new();
        let mut session = armed_session(&outbox);
        session.start(t(0)).unwrap();
        session.handle(t(0), biting());
        session.handle(t(700), biting());
        outbox.drain();

        // Still cooling down from the sustained alert
        let outputs = session.handle(t(1000), MonitorEvent::VisibilityChanged(Visibility::Hidden));
        assert!(matches!(&outputs[..], [SessionOutput::AlertDispatched(r)] if !r.fired()));

        session.handle(t(8700), MonitorEvent::VisibilityChanged(Visibility::Visible));
        session.handle(t(8800), MonitorEvent::VisibilityChanged(Visibility::Hidden));
        assert_eq!(outbox.count(ChannelKind::BackgroundNotification), 1);
        assert_eq!(outbox.count(ChannelKind::LocalNotification), 0);
    }

    #[test]
    fn test_stop_resets_everything() {
        let outbox = Outbox::new();
        let mut session = armed_session(&outbox);
        session.start(t(0)).unwrap();
        session.handle(t(0), MonitorEvent::RewardTick);
        session.handle(t(0), biting());
        session.handle(t(700), biting());
        session.stop().unwrap();

        let snapshot = session.snapshot();
        assert!(!snapshot.monitoring);
        assert_eq!(snapshot.phase, DebouncePhase::Clear);
        assert_eq!(snapshot.elapsed_secs, 0);
        assert!(!snapshot.reward_running);
        assert!(snapshot.last_alert_at.is_none());
        assert!(snapshot.status.is_none());

        // A tick arriving after stop is inert
        assert!(session.handle(t(2000), MonitorEvent::AlertTick).is_empty());
        assert!(matches!(session.stop(), Err(MonitorError::NotMonitoring)));
        // Toggles are preferences and survive
        assert!(session.toggles().alerts_armed);
    }

    #[test]
    fn test_sound_alone_alerts_when_notifications_denied() {
        let outbox = Outbox::new();
        outbox.set_prompt_answer(NotificationPermission::Denied);
        let mut session = session(&outbox);
        session.toggle_notifications();
        session.toggle_sound();
        assert!(!session.toggles().alerts_armed);
        session.start(t(0)).unwrap();

        session.handle(t(0), biting());
        let outputs = session.handle(t(700), biting());
        assert!(outputs.iter().any(|o| matches!(o, SessionOutput::AlertDispatched(r) if r.fired())));
        assert_eq!(outbox.count(ChannelKind::Tone), 1);
        assert_eq!(outbox.count(ChannelKind::LocalNotification), 0);

        // Periodic re-alerts also run on sound alone
        session.handle(t(8700), MonitorEvent::AlertTick);
        assert_eq!(outbox.count(ChannelKind::Tone), 2);
    }

    #[test]
    fn test_goal_input_only_between_sessions() {
        let outbox = Outbox::new();
        let mut session = session(&outbox);
        assert_eq!(session.set_goal_input(Some("1")).unwrap(), 1);
        assert_eq!(session.snapshot().goal_secs, 60);

        session.start(t(0)).unwrap();
        assert!(matches!(
            session.set_goal_input(Some("5")),
            Err(MonitorError::AlreadyMonitoring)
        ));
    }

    #[test]
    fn test_missing_landmarks_never_trigger() {
        let outbox = Outbox::new();
        let mut session = session(&outbox);
        session.start(t(0)).unwrap();
        for ms in (0..5000).step_by(100) {
            session.handle(t(ms), MonitorEvent::FrameArrived(FrameObservation::default()));
        }
        assert_eq!(session.snapshot().phase, DebouncePhase::Clear);
    }
}
