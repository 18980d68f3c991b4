//! Alert channel ports and their in-process implementations

use crate::error::ChannelError;
use crate::types::{BackgroundMessage, ChannelKind, NotificationRequest};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::f32::consts::TAU;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

/// Peak amplitude of the synthesized tone
const TONE_AMPLITUDE: f32 = 0.2;

/// Fade in/out length, keeps the tone from clicking
const TONE_FADE_MS: u64 = 10;

/// Whether the platform can show notifications at all
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationSupport {
    #[default]
    Supported,
    Unsupported,
    /// Supported, but only from HTTPS or localhost
    InsecureContext,
}

/// Platform notification permission state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationPermission {
    /// Not yet asked
    #[default]
    Default,
    Granted,
    Denied,
}

/// Short fixed-frequency alert tone
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ToneSpec {
    pub frequency_hz: f64,
    pub duration_ms: u64,
}

impl ToneSpec {
    pub fn new(frequency_hz: f64, duration_ms: u64) -> Self {
        Self {
            frequency_hz,
            duration_ms,
        }
    }

    /// Mono PCM samples in [-1, 1] with a linear fade at both ends
    pub fn samples(&self, sample_rate: u32) -> Vec<f32> {
        let total = (sample_rate as u64 * self.duration_ms / 1000) as usize;
        let fade = ((sample_rate as u64 * TONE_FADE_MS / 1000) as usize)
            .min(total / 2)
            .max(1);
        let step = TAU * self.frequency_hz as f32 / sample_rate as f32;

        (0..total)
            .map(|i| {
                let envelope = (i.min(total - 1 - i) as f32 / fade as f32).min(1.0);
                (step * i as f32).sin() * TONE_AMPLITUDE * envelope
            })
            .collect()
    }
}

/// Audible tone output
pub trait TonePort: Send {
    fn play(&mut self, tone: &ToneSpec) -> Result<(), ChannelError>;
}

/// Platform notification API
pub trait NotificationPort: Send {
    fn support(&self) -> NotificationSupport;
    fn permission(&self) -> NotificationPermission;
    /// Ask the user; returns the resulting permission
    fn request_permission(&mut self) -> NotificationPermission;
    fn show(&mut self, request: &NotificationRequest) -> Result<(), ChannelError>;
}

/// Persistent worker able to notify while the monitoring surface is hidden
pub trait BackgroundWorker: Send {
    fn post(&mut self, message: BackgroundMessage) -> Result<(), ChannelError>;
}

/// The channel set a dispatcher fans out to
pub struct AlertChannels {
    pub tone: Box<dyn TonePort>,
    pub notifier: Box<dyn NotificationPort>,
    /// Registered background worker, if any
    pub background: Option<Box<dyn BackgroundWorker>>,
}

impl AlertChannels {
    pub fn new(tone: Box<dyn TonePort>, notifier: Box<dyn NotificationPort>) -> Self {
        Self {
            tone,
            notifier,
            background: None,
        }
    }

    pub fn with_background(mut self, worker: Box<dyn BackgroundWorker>) -> Self {
        self.background = Some(worker);
        self
    }
}

impl std::fmt::Debug for AlertChannels {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlertChannels")
            .field("background", &self.background.is_some())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Background worker
// ============================================================================

/// Worker that turns `BITE_ALERT` messages into notifications
pub struct NotificationWorker<P: NotificationPort> {
    port: P,
    request: NotificationRequest,
}

impl<P: NotificationPort> NotificationWorker<P> {
    pub fn new(port: P, request: NotificationRequest) -> Self {
        Self { port, request }
    }

    /// Handle a raw message as received over the wire.
    ///
    /// Returns `Ok(false)` for messages this worker does not understand.
    pub fn handle_raw(&mut self, json: &str) -> Result<bool, ChannelError> {
        match serde_json::from_str::<BackgroundMessage>(json) {
            Ok(message) => self.post(message).map(|()| true),
            Err(_) => {
                debug!(message = json, "ignoring unknown worker message");
                Ok(false)
            }
        }
    }

    pub fn port(&self) -> &P {
        &self.port
    }
}

impl<P: NotificationPort> BackgroundWorker for NotificationWorker<P> {
    fn post(&mut self, message: BackgroundMessage) -> Result<(), ChannelError> {
        match message {
            BackgroundMessage::BiteAlert => {
                if self.port.permission() != NotificationPermission::Granted {
                    return Err(ChannelError::PermissionDenied);
                }
                self.port.show(&self.request)
            }
        }
    }
}

// ============================================================================
// Outbox
// ============================================================================

/// An alert captured by the outbox
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OutboxItem {
    Tone { tone: ToneSpec },
    Notification { request: NotificationRequest },
    Background { message: BackgroundMessage },
}

impl OutboxItem {
    pub fn channel(&self) -> ChannelKind {
        match self {
            Self::Tone { .. } => ChannelKind::Tone,
            Self::Notification { .. } => ChannelKind::LocalNotification,
            Self::Background { .. } => ChannelKind::BackgroundNotification,
        }
    }
}

#[derive(Debug)]
struct OutboxState {
    items: Vec<OutboxItem>,
    support: NotificationSupport,
    permission: NotificationPermission,
    prompt_answer: NotificationPermission,
    failing: HashSet<ChannelKind>,
}

/// In-memory channel set.
///
/// Captures every alert instead of touching a platform, for hosts that perform
/// the platform calls themselves (the C ABI) and for tests. Clones share state.
#[derive(Debug, Clone)]
pub struct Outbox {
    state: Arc<Mutex<OutboxState>>,
}

impl Default for Outbox {
    fn default() -> Self {
        Self::new()
    }
}

impl Outbox {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(OutboxState {
                items: Vec::new(),
                support: NotificationSupport::Supported,
                permission: NotificationPermission::Default,
                prompt_answer: NotificationPermission::Granted,
                failing: HashSet::new(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, OutboxState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Channel set backed by this outbox, optionally with a background worker
    pub fn channels(&self, with_background: bool) -> AlertChannels {
        let channels = AlertChannels::new(
            Box::new(OutboxTone(self.clone())),
            Box::new(OutboxNotifier(self.clone())),
        );
        if with_background {
            channels.with_background(Box::new(OutboxWorker(self.clone())))
        } else {
            channels
        }
    }

    pub fn set_support(&self, support: NotificationSupport) {
        self.lock().support = support;
    }

    pub fn set_permission(&self, permission: NotificationPermission) {
        self.lock().permission = permission;
    }

    /// What the simulated user answers when asked for permission
    pub fn set_prompt_answer(&self, answer: NotificationPermission) {
        self.lock().prompt_answer = answer;
    }

    /// Make every call on `channel` fail until cleared
    pub fn set_failing(&self, channel: ChannelKind, failing: bool) {
        let mut state = self.lock();
        if failing {
            state.failing.insert(channel);
        } else {
            state.failing.remove(&channel);
        }
    }

    pub fn items(&self) -> Vec<OutboxItem> {
        self.lock().items.clone()
    }

    /// Take all captured items
    pub fn drain(&self) -> Vec<OutboxItem> {
        std::mem::take(&mut self.lock().items)
    }

    pub fn count(&self, channel: ChannelKind) -> usize {
        self.lock()
            .items
            .iter()
            .filter(|item| item.channel() == channel)
            .count()
    }

    fn push(&self, channel: ChannelKind, item: OutboxItem) -> Result<(), ChannelError> {
        let mut state = self.lock();
        if state.failing.contains(&channel) {
            return Err(ChannelError::Dispatch(format!("{channel:?} unavailable")));
        }
        state.items.push(item);
        Ok(())
    }
}

struct OutboxTone(Outbox);

impl TonePort for OutboxTone {
    fn play(&mut self, tone: &ToneSpec) -> Result<(), ChannelError> {
        self.0.push(ChannelKind::Tone, OutboxItem::Tone { tone: *tone })
    }
}

struct OutboxNotifier(Outbox);

impl NotificationPort for OutboxNotifier {
    fn support(&self) -> NotificationSupport {
        self.0.lock().support
    }

    fn permission(&self) -> NotificationPermission {
        self.0.lock().permission
    }

    fn request_permission(&mut self) -> NotificationPermission {
        let mut state = self.0.lock();
        if state.permission == NotificationPermission::Default {
            state.permission = state.prompt_answer;
        }
        state.permission
    }

    fn show(&mut self, request: &NotificationRequest) -> Result<(), ChannelError> {
        self.0.push(
            ChannelKind::LocalNotification,
            OutboxItem::Notification {
                request: request.clone(),
            },
        )
    }
}

struct OutboxWorker(Outbox);

impl BackgroundWorker for OutboxWorker {
    fn post(&mut self, message: BackgroundMessage) -> Result<(), ChannelError> {
        self.0.push(
            ChannelKind::BackgroundNotification,
            OutboxItem::Background { message },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MonitorConfig;

    #[test]
    fn test_tone_samples_length_and_envelope() {
        let tone = ToneSpec::new(880.0, 180);
        let samples = tone.samples(48_000);
        assert_eq!(samples.len(), 8640);
        assert_eq!(samples[0], 0.0);
        assert!(samples.iter().all(|s| s.abs() <= TONE_AMPLITUDE + f32::EPSILON));
        assert!(samples.iter().any(|s| s.abs() > TONE_AMPLITUDE * 0.9));
    }

    #[test]
    fn test_zero_length_tone_is_empty() {
        assert!(ToneSpec::new(880.0, 0).samples(48_000).is_empty());
    }

    #[test]
    fn test_worker_shows_notification_on_bite_alert() {
        let outbox = Outbox::new();
        outbox.set_permission(NotificationPermission::Granted);
        let request = MonitorConfig::default().notification_request();
        let mut worker = NotificationWorker::new(OutboxNotifier(outbox.clone()), request.clone());

        assert_eq!(worker.handle_raw(r#"{"type":"BITE_ALERT"}"#), Ok(true));
        assert_eq!(outbox.items(), vec![OutboxItem::Notification { request }]);
    }

    #[test]
    fn test_worker_ignores_unknown_messages() {
        let outbox = Outbox::new();
        outbox.set_permission(NotificationPermission::Granted);
        let mut worker = NotificationWorker::new(
            OutboxNotifier(outbox.clone()),
            MonitorConfig::default().notification_request(),
        );

        assert_eq!(worker.handle_raw(r#"{"type":"PING"}"#), Ok(false));
        assert!(outbox.items().is_empty());
    }

    #[test]
    fn test_worker_requires_permission() {
        let outbox = Outbox::new();
        let mut worker = NotificationWorker::new(
            OutboxNotifier(outbox.clone()),
            MonitorConfig::default().notification_request(),
        );
        assert_eq!(
            worker.post(BackgroundMessage::BiteAlert),
            Err(ChannelError::PermissionDenied)
        );
    }

    #[test]
    fn test_outbox_failure_injection() {
        let outbox = Outbox::new();
        let mut channels = outbox.channels(false);
        outbox.set_failing(ChannelKind::Tone, true);
        assert!(channels.tone.play(&ToneSpec::new(440.0, 100)).is_err());

        outbox.set_failing(ChannelKind::Tone, false);
        assert!(channels.tone.play(&ToneSpec::new(440.0, 100)).is_ok());
        assert_eq!(outbox.count(ChannelKind::Tone), 1);
        assert_eq!(outbox.drain().len(), 1);
        assert!(outbox.items().is_empty());
    }

    #[test]
    fn test_prompt_only_changes_default_permission() {
        let outbox = Outbox::new();
        let mut channels = outbox.channels(false);
        outbox.set_prompt_answer(NotificationPermission::Denied);
        assert_eq!(channels.notifier.request_permission(), NotificationPermission::Denied);

        outbox.set_prompt_answer(NotificationPermission::Granted);
        // Already answered; asking again does not flip it
        assert_eq!(channels.notifier.request_permission(), NotificationPermission::Denied);
    }
}
