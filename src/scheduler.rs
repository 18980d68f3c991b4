//! Event scheduling
//!
//! Owns a [`MonitorSession`] on one thread and feeds it a single ordered
//! stream of events: frames and visibility changes arriving over a channel
//! from any thread, plus the reward and alert ticks generated here from an
//! injected [`Clock`]. Stopping cancels both tick sources and detaches the
//! frame source before the session is reset, so nothing fires after stop.

use crate::error::MonitorError;
use crate::session::MonitorSession;
use crate::types::{
    FrameObservation, MonitorEvent, SessionOutput, SessionSnapshot, StatusLine, StatusTone,
    Visibility,
};
use chrono::{DateTime, Duration, Utc};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// Status shown when the frame source cannot be opened
pub const DEVICE_ACCESS_STATUS: &str = "Could not access webcam. Please allow camera permission.";

/// Source of the current time
pub trait Clock: Send {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually advanced clock. Clones share the same time.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|p| p.into_inner());
        *now += by;
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|p| p.into_inner()) = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|p| p.into_inner())
    }
}

/// Producer of frames (camera plus perception component)
pub trait FrameSource: Send {
    /// Acquire the device. Failure keeps monitoring from starting.
    fn open(&mut self) -> Result<(), MonitorError>;
    /// Release the device; no frames may be delivered afterwards
    fn close(&mut self);
}

/// Frame source for hosts that push frames through a [`SchedulerHandle`]
#[derive(Debug, Clone, Copy, Default)]
pub struct PushedFrames;

impl FrameSource for PushedFrames {
    fn open(&mut self) -> Result<(), MonitorError> {
        Ok(())
    }

    fn close(&mut self) {}
}

/// Inputs accepted from other threads
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Frame(FrameObservation),
    Visibility(Visibility),
    ToggleNotifications,
    ToggleSound,
    Stop,
}

/// Cloneable, thread-safe sender into a running scheduler
#[derive(Debug, Clone)]
pub struct SchedulerHandle {
    tx: Sender<Command>,
}

impl SchedulerHandle {
    fn send(&self, command: Command) -> Result<(), MonitorError> {
        self.tx.send(command).map_err(|_| MonitorError::SchedulerClosed)
    }

    pub fn frame(&self, observation: FrameObservation) -> Result<(), MonitorError> {
        self.send(Command::Frame(observation))
    }

    pub fn visibility(&self, visibility: Visibility) -> Result<(), MonitorError> {
        self.send(Command::Visibility(visibility))
    }

    pub fn toggle_notifications(&self) -> Result<(), MonitorError> {
        self.send(Command::ToggleNotifications)
    }

    pub fn toggle_sound(&self) -> Result<(), MonitorError> {
        self.send(Command::ToggleSound)
    }

    pub fn stop(&self) -> Result<(), MonitorError> {
        self.send(Command::Stop)
    }
}

/// Fixed-rate tick generator. Due times advance by whole periods from the
/// start, so late processing never accumulates drift.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickSchedule {
    reward_period: Duration,
    alert_period: Duration,
    next_reward: Option<DateTime<Utc>>,
    next_alert: Option<DateTime<Utc>>,
}

/// `None` when the period is not positive or the sum leaves chrono's range
fn advance(from: DateTime<Utc>, period: Duration) -> Option<DateTime<Utc>> {
    if period <= Duration::zero() {
        return None;
    }
    from.checked_add_signed(period)
}

impl TickSchedule {
    pub fn new(start: DateTime<Utc>, reward_period: Duration, alert_period: Duration) -> Self {
        Self {
            reward_period,
            alert_period,
            next_reward: advance(start, reward_period),
            next_alert: advance(start, alert_period),
        }
    }

    /// Earliest tick due at or before `now`, advancing its schedule
    pub fn next_due(&mut self, now: DateTime<Utc>) -> Option<(DateTime<Utc>, MonitorEvent)> {
        let reward = self.next_reward.filter(|due| *due <= now);
        let alert = self.next_alert.filter(|due| *due <= now);
        match (reward, alert) {
            (Some(r), Some(a)) if a < r => {
                self.next_alert = advance(a, self.alert_period);
                Some((a, MonitorEvent::AlertTick))
            }
            (Some(r), _) => {
                self.next_reward = advance(r, self.reward_period);
                Some((r, MonitorEvent::RewardTick))
            }
            (None, Some(a)) => {
                self.next_alert = advance(a, self.alert_period);
                Some((a, MonitorEvent::AlertTick))
            }
            (None, None) => None,
        }
    }

    /// Next instant a tick falls due, if any tick is still schedulable
    pub fn next_deadline(&self) -> Option<DateTime<Utc>> {
        match (self.next_reward, self.next_alert) {
            (Some(r), Some(a)) => Some(r.min(a)),
            (r, a) => r.or(a),
        }
    }
}

pub struct Scheduler<C: Clock> {
    session: MonitorSession,
    clock: C,
    rx: Receiver<Command>,
    source: Box<dyn FrameSource>,
    ticks: Option<TickSchedule>,
}

impl<C: Clock> Scheduler<C> {
    pub fn new(session: MonitorSession, clock: C, source: Box<dyn FrameSource>) -> (Self, SchedulerHandle) {
        let (tx, rx) = mpsc::channel();
        let scheduler = Self {
            session,
            clock,
            rx,
            source,
            ticks: None,
        };
        (scheduler, SchedulerHandle { tx })
    }

    pub fn session(&self) -> &MonitorSession {
        &self.session
    }

    pub fn is_running(&self) -> bool {
        self.ticks.is_some()
    }

    /// Open the frame source, start the session and arm both tick sources
    pub fn start(&mut self) -> Result<Vec<SessionOutput>, MonitorError> {
        if self.is_running() {
            return Err(MonitorError::AlreadyMonitoring);
        }
        if let Err(e) = self.source.open() {
            warn!(error = %e, "frame source unavailable, monitoring not started");
            self.session
                .set_status(StatusLine::new(DEVICE_ACCESS_STATUS, StatusTone::Alert));
            return Err(e);
        }

        let now = self.clock.now();
        let outputs = match self.session.start(now) {
            Ok(outputs) => outputs,
            Err(e) => {
                self.source.close();
                return Err(e);
            }
        };
        let config = self.session.config();
        self.ticks = Some(TickSchedule::new(now, config.reward_tick(), config.alert_interval()));
        info!("scheduler started");
        Ok(outputs)
    }

    /// Cancel ticks, detach the frame source, drop queued frames and reset
    /// the session. Returns the state as it was just before the reset.
    pub fn stop(&mut self) -> Result<SessionSnapshot, MonitorError> {
        if self.ticks.take().is_none() {
            return Err(MonitorError::NotMonitoring);
        }
        self.source.close();
        let dropped = std::iter::from_fn(|| self.rx.try_recv().ok()).count();
        if dropped > 0 {
            debug!(dropped, "discarded queued commands on stop");
        }
        let snapshot = self.session.snapshot();
        self.session.stop()?;
        info!("scheduler stopped");
        Ok(snapshot)
    }

    /// Fire every tick due by now, in time order
    pub fn fire_due_ticks(&mut self) -> Vec<SessionOutput> {
        let now = self.clock.now();
        let mut outputs = Vec::new();
        while let Some((due, event)) = self.ticks.as_mut().and_then(|t| t.next_due(now)) {
            outputs.extend(self.session.handle(due, event));
        }
        outputs
    }

    /// Apply one command at the current time
    pub fn apply(&mut self, command: Command) -> Result<Vec<SessionOutput>, MonitorError> {
        let now = self.clock.now();
        let outputs = match command {
            Command::Frame(observation) => {
                self.session.handle(now, MonitorEvent::FrameArrived(observation))
            }
            Command::Visibility(visibility) => {
                self.session.handle(now, MonitorEvent::VisibilityChanged(visibility))
            }
            Command::ToggleNotifications => self
                .session
                .toggle_notifications()
                .status
                .map(|status| SessionOutput::StatusChanged { at: now, status })
                .into_iter()
                .collect(),
            Command::ToggleSound => {
                self.session.toggle_sound();
                Vec::new()
            }
            Command::Stop => {
                self.stop()?;
                Vec::new()
            }
        };
        Ok(outputs)
    }

    /// Process due ticks, then every queued command, without blocking
    pub fn poll(&mut self) -> Result<Vec<SessionOutput>, MonitorError> {
        let mut outputs = self.fire_due_ticks();
        while self.is_running() {
            match self.rx.try_recv() {
                Ok(command) => outputs.extend(self.apply(command)?),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.stop()?;
                }
            }
        }
        Ok(outputs)
    }

    /// Run until stopped or every handle is dropped, passing outputs to `sink`
    pub fn run<F>(mut self, mut sink: F) -> Result<SessionSnapshot, MonitorError>
    where
        F: FnMut(&SessionOutput),
    {
        match self.start() {
            Ok(outputs) => outputs.iter().for_each(&mut sink),
            Err(e) => {
                if let Some(status) = self.session.snapshot().status {
                    sink(&SessionOutput::StatusChanged {
                        at: self.clock.now(),
                        status,
                    });
                }
                return Err(e);
            }
        }

        loop {
            let Some(ticks) = self.ticks.as_ref() else {
                break;
            };
            let received = match ticks.next_deadline() {
                Some(deadline) => {
                    let wait = (deadline - self.clock.now())
                        .to_std()
                        .unwrap_or(std::time::Duration::ZERO);
                    self.rx.recv_timeout(wait)
                }
                None => self.rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
            };

            // Ticks due by now run before the command that woke the loop.
            self.fire_due_ticks().iter().for_each(&mut sink);
            match received {
                Ok(Command::Stop) => return self.stop(),
                Ok(command) => self.apply(command)?.iter().for_each(&mut sink),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => return self.stop(),
            }
        }

        Err(MonitorError::NotMonitoring)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::{NotificationPermission, Outbox};
    use crate::config::MonitorConfig;
    use crate::types::{ChannelKind, DebouncePhase, HandLandmarks, LandmarkPoint, HAND_LANDMARK_COUNT};
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 14, 0, 0).unwrap()
    }

    fn biting() -> FrameObservation {
        let mut hand = vec![LandmarkPoint::new(0.0, 0.0); HAND_LANDMARK_COUNT];
        hand[4] = LandmarkPoint::new(0.5, 0.62);
        FrameObservation {
            mouth: Some(LandmarkPoint::new(0.5, 0.6)),
            left_hand: Some(HandLandmarks::new(hand)),
            right_hand: None,
        }
    }

    struct BrokenCamera;

    impl FrameSource for BrokenCamera {
        fn open(&mut self) -> Result<(), MonitorError> {
            Err(MonitorError::DeviceAccess("permission denied".to_string()))
        }

        fn close(&mut self) {}
    }

    fn scheduler(outbox: &Outbox, clock: &ManualClock) -> (Scheduler<ManualClock>, SchedulerHandle) {
        let config = MonitorConfig {
            bite_threshold_ms: 700,
            ..Default::default()
        };
        let session = MonitorSession::new(config, outbox.channels(false)).unwrap();
        Scheduler::new(session, clock.clone(), Box::new(PushedFrames))
    }

    #[test]
    fn test_tick_schedule_orders_and_does_not_drift() {
        let mut ticks = TickSchedule::new(t0(), Duration::seconds(1), Duration::seconds(2));
        let now = t0() + Duration::milliseconds(4500);
        let fired: Vec<_> = std::iter::from_fn(|| ticks.next_due(now)).collect();

        assert_eq!(
            fired,
            vec![
                (t0() + Duration::seconds(1), MonitorEvent::RewardTick),
                (t0() + Duration::seconds(2), MonitorEvent::RewardTick),
                (t0() + Duration::seconds(2), MonitorEvent::AlertTick),
                (t0() + Duration::seconds(3), MonitorEvent::RewardTick),
                (t0() + Duration::seconds(4), MonitorEvent::RewardTick),
                (t0() + Duration::seconds(4), MonitorEvent::AlertTick),
            ]
        );
        assert_eq!(ticks.next_deadline(), Some(t0() + Duration::seconds(5)));
    }

    #[test]
    fn test_tick_schedule_survives_unrepresentable_periods() {
        let mut ticks =
            TickSchedule::new(t0(), Duration::milliseconds(i64::MAX), Duration::seconds(2));
        let far = t0() + Duration::days(365);
        let fired: Vec<_> = std::iter::from_fn(|| ticks.next_due(far)).take(3).collect();
        assert!(fired.iter().all(|(_, event)| *event == MonitorEvent::AlertTick));
        assert_eq!(fired.len(), 3);

        let mut idle = TickSchedule::new(t0(), Duration::zero(), Duration::milliseconds(i64::MAX));
        assert_eq!(idle.next_deadline(), None);
        assert_eq!(idle.next_due(far), None);
    }

    /// Reports the start instant once, then a time well past several ticks
    struct LateClock {
        calls: std::sync::atomic::AtomicUsize,
    }

    impl Clock for LateClock {
        fn now(&self) -> DateTime<Utc> {
            let call = self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            if call == 0 {
                t0()
            } else {
                t0() + Duration::milliseconds(3500)
            }
        }
    }

    #[test]
    fn test_run_fires_due_ticks_before_command() {
        let outbox = Outbox::new();
        let session = MonitorSession::new(MonitorConfig::default(), outbox.channels(false)).unwrap();
        let clock = LateClock {
            calls: std::sync::atomic::AtomicUsize::new(0),
        };
        let (scheduler, handle) = Scheduler::new(session, clock, Box::new(PushedFrames));
        handle.stop().unwrap();

        let snapshot = scheduler.run(|_| {}).unwrap();
        assert_eq!(snapshot.elapsed_secs, 3);
    }

    #[test]
    fn test_device_failure_keeps_monitoring_off() {
        let outbox = Outbox::new();
        let session = MonitorSession::new(MonitorConfig::default(), outbox.channels(false)).unwrap();
        let (mut scheduler, _handle) =
            Scheduler::new(session, ManualClock::new(t0()), Box::new(BrokenCamera));

        assert!(matches!(scheduler.start(), Err(MonitorError::DeviceAccess(_))));
        assert!(!scheduler.is_running());
        let snapshot = scheduler.session().snapshot();
        assert!(!snapshot.monitoring);
        assert_eq!(snapshot.status.map(|s| s.message), Some(DEVICE_ACCESS_STATUS.to_string()));
    }

    #[test]
    fn test_reward_ticks_follow_clock() {
        let outbox = Outbox::new();
        let clock = ManualClock::new(t0());
        let (mut scheduler, _handle) = scheduler(&outbox, &clock);
        scheduler.start().unwrap();

        clock.advance(Duration::milliseconds(3500));
        scheduler.poll().unwrap();
        assert_eq!(scheduler.session().snapshot().elapsed_secs, 3);
    }

    #[test]
    fn test_frames_from_handle_are_processed_in_order() {
        let outbox = Outbox::new();
        outbox.set_permission(NotificationPermission::Granted);
        let clock = ManualClock::new(t0());
        let (mut scheduler, handle) = scheduler(&outbox, &clock);
        scheduler.start().unwrap();
        handle.toggle_notifications().unwrap();

        handle.frame(biting()).unwrap();
        scheduler.poll().unwrap();
        clock.advance(Duration::milliseconds(700));
        handle.frame(biting()).unwrap();
        let outputs = scheduler.poll().unwrap();

        assert!(outputs.iter().any(|o| matches!(o, SessionOutput::BiteSustained { .. })));
        assert_eq!(scheduler.session().snapshot().phase, DebouncePhase::Sustained);
        assert_eq!(outbox.count(ChannelKind::LocalNotification), 1);
    }

    #[test]
    fn test_stop_cancels_ticks_and_drops_queued_frames() {
        let outbox = Outbox::new();
        let clock = ManualClock::new(t0());
        let (mut scheduler, handle) = scheduler(&outbox, &clock);
        scheduler.start().unwrap();

        clock.advance(Duration::seconds(2));
        handle.stop().unwrap();
        handle.frame(biting()).unwrap();
        scheduler.poll().unwrap();
        assert!(!scheduler.is_running());

        clock.advance(Duration::seconds(10));
        assert!(scheduler.poll().unwrap().is_empty());
        let snapshot = scheduler.session().snapshot();
        assert_eq!(snapshot.elapsed_secs, 0);
        assert_eq!(snapshot.phase, DebouncePhase::Clear);
    }

    #[test]
    fn test_run_returns_when_handles_dropped() {
        let outbox = Outbox::new();
        let session = MonitorSession::new(MonitorConfig::default(), outbox.channels(false)).unwrap();
        let (scheduler, handle) = Scheduler::new(session, SystemClock, Box::new(PushedFrames));

        handle.frame(FrameObservation::default()).unwrap();
        drop(handle);

        let mut seen = Vec::new();
        let snapshot = scheduler.run(|o| seen.push(o.clone())).unwrap();
        assert!(snapshot.monitoring);
        assert!(!seen.is_empty());
    }
}
