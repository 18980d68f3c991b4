//! Cooldown-gated alert dispatch

use crate::alert::channels::{AlertChannels, NotificationPermission, NotificationSupport, ToneSpec};
use crate::alert::permission::{AlertToggles, ToggleOutcome};
use crate::config::MonitorConfig;
use crate::error::ChannelError;
use crate::types::{
    BackgroundMessage, ChannelKind, ChannelOutcome, ChannelResult, DispatchDecision,
    DispatchReport, DispatchTrigger, NotificationRequest, Visibility,
};
use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

/// Fans one alert out to every opted-in channel, at most once per cooldown
#[derive(Debug)]
pub struct AlertDispatcher {
    cooldown: Duration,
    last_fired_at: Option<DateTime<Utc>>,
    toggles: AlertToggles,
    channels: AlertChannels,
    notification: NotificationRequest,
    tone: ToneSpec,
}

impl AlertDispatcher {
    pub fn new(config: &MonitorConfig, channels: AlertChannels) -> Self {
        Self {
            cooldown: config.cooldown(),
            last_fired_at: None,
            toggles: AlertToggles::default(),
            channels,
            notification: config.notification_request(),
            tone: ToneSpec::new(config.tone_frequency_hz, config.tone_duration_ms),
        }
    }

    pub fn toggles(&self) -> AlertToggles {
        self.toggles
    }

    pub fn last_fired_at(&self) -> Option<DateTime<Utc>> {
        self.last_fired_at
    }

    /// Notification channels opted in
    pub fn is_armed(&self) -> bool {
        self.toggles.alerts_armed
    }

    /// Whether a dispatch would reach at least one channel: notifications
    /// armed, or the tone on regardless of notification permission
    pub fn will_alert(&self) -> bool {
        self.toggles.alerts_armed || self.toggles.sound_enabled
    }

    /// Swap the channel set, e.g. when a background worker registers
    pub fn replace_channels(&mut self, channels: AlertChannels) {
        self.channels = channels;
    }

    pub fn toggle_notifications(&mut self) -> ToggleOutcome {
        self.toggles
            .toggle_notifications(self.channels.notifier.as_mut())
    }

    pub fn toggle_sound(&mut self) -> bool {
        self.toggles.toggle_sound()
    }

    /// Forget the cooldown; toggles are user preferences and survive
    pub fn reset(&mut self) {
        self.last_fired_at = None;
    }

    /// Attempt one dispatch at `now`.
    ///
    /// The tone needs only the sound toggle; notification channels need
    /// alerting armed. The cooldown clock is stamped before any channel runs, so a failing
    /// channel cannot cause a burst of retries.
    pub fn dispatch(
        &mut self,
        now: DateTime<Utc>,
        trigger: DispatchTrigger,
        visibility: Visibility,
    ) -> DispatchReport {
        if !self.will_alert() {
            return DispatchReport {
                at: now,
                trigger,
                decision: DispatchDecision::Disarmed,
                channels: Vec::new(),
            };
        }

        if let Some(last) = self.last_fired_at {
            let since = now - last;
            if since < self.cooldown {
                let remaining_ms = (self.cooldown - since).num_milliseconds();
                debug!(?trigger, remaining_ms, "alert suppressed by cooldown");
                return DispatchReport {
                    at: now,
                    trigger,
                    decision: DispatchDecision::CoolingDown { remaining_ms },
                    channels: Vec::new(),
                };
            }
        }

        self.last_fired_at = Some(now);
        info!(?trigger, ?visibility, "dispatching bite alert");

        let mut channels = vec![self.play_tone()];
        if !self.toggles.alerts_armed {
            channels.push(skipped(ChannelKind::LocalNotification, "notifications not armed"));
        } else if visibility == Visibility::Hidden && self.channels.background.is_some() {
            let background = self.post_background();
            let failed = matches!(background.outcome, ChannelOutcome::Failed { .. });
            channels.push(background);
            if failed {
                channels.push(self.show_local());
            }
        } else {
            channels.push(self.show_local());
        }

        DispatchReport {
            at: now,
            trigger,
            decision: DispatchDecision::Fired,
            channels,
        }
    }

    fn play_tone(&mut self) -> ChannelResult {
        if !self.toggles.sound_enabled {
            return skipped(ChannelKind::Tone, "sound disabled");
        }
        settle(ChannelKind::Tone, self.channels.tone.play(&self.tone))
    }

    fn show_local(&mut self) -> ChannelResult {
        let notifier = self.channels.notifier.as_mut();
        match notifier.support() {
            NotificationSupport::Supported => {}
            NotificationSupport::Unsupported => {
                return skipped(ChannelKind::LocalNotification, "notifications unsupported");
            }
            NotificationSupport::InsecureContext => {
                return skipped(ChannelKind::LocalNotification, "insecure context");
            }
        }
        if notifier.permission() != NotificationPermission::Granted {
            return skipped(ChannelKind::LocalNotification, "permission not granted");
        }
        settle(ChannelKind::LocalNotification, notifier.show(&self.notification))
    }

    fn post_background(&mut self) -> ChannelResult {
        match self.channels.background.as_mut() {
            Some(worker) => settle(
                ChannelKind::BackgroundNotification,
                worker.post(BackgroundMessage::BiteAlert),
            ),
            None => skipped(ChannelKind::BackgroundNotification, "no background worker"),
        }
    }
}

fn skipped(channel: ChannelKind, reason: &str) -> ChannelResult {
    debug!(?channel, reason, "alert channel skipped");
    ChannelResult {
        channel,
        outcome: ChannelOutcome::Skipped {
            reason: reason.to_string(),
        },
    }
}

fn settle(channel: ChannelKind, result: Result<(), ChannelError>) -> ChannelResult {
    let outcome = match result {
        Ok(()) => ChannelOutcome::Delivered,
        Err(e) => {
            warn!(?channel, error = %e, "alert channel failed");
            ChannelOutcome::Failed {
                error: e.to_string(),
            }
        }
    };
    ChannelResult { channel, outcome }
}
