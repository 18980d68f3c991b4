//! User alert toggles and the notification permission flow

use crate::alert::channels::{NotificationPermission, NotificationPort, NotificationSupport};
use crate::types::{StatusLine, StatusTone};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// User opt-ins. Both start off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AlertToggles {
    /// Alerting armed (notifications opted in)
    pub alerts_armed: bool,
    /// Audible tone on
    pub sound_enabled: bool,
}

/// How the notification toggle control should render
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToggleAffordance {
    pub label: String,
    /// False when the control can never work on this platform
    pub enabled: bool,
    pub pressed: bool,
}

/// Result of pressing the notification toggle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToggleOutcome {
    pub affordance: ToggleAffordance,
    /// Status message to surface, if the toggle ran into a platform problem
    pub status: Option<StatusLine>,
}

impl AlertToggles {
    /// Flip notification alerting, asking for permission when needed.
    ///
    /// Unsupported platforms and insecure contexts disable the control for
    /// good; a refused permission leaves alerting disarmed. Never retries.
    pub fn toggle_notifications(&mut self, port: &mut dyn NotificationPort) -> ToggleOutcome {
        match port.support() {
            NotificationSupport::Unsupported => {
                warn!("notifications unsupported on this platform");
                self.alerts_armed = false;
                return ToggleOutcome {
                    affordance: ToggleAffordance {
                        label: "Notifications Unsupported".to_string(),
                        enabled: false,
                        pressed: false,
                    },
                    status: None,
                };
            }
            NotificationSupport::InsecureContext => {
                warn!("notifications need a secure context");
                self.alerts_armed = false;
                return ToggleOutcome {
                    affordance: ToggleAffordance {
                        label: "Needs HTTPS/localhost".to_string(),
                        enabled: false,
                        pressed: false,
                    },
                    status: Some(StatusLine::new(
                        "Notifications require HTTPS or localhost.",
                        StatusTone::Alert,
                    )),
                };
            }
            NotificationSupport::Supported => {}
        }

        let mut status = None;
        if port.permission() == NotificationPermission::Granted {
            self.alerts_armed = !self.alerts_armed;
        } else {
            let permission = port.request_permission();
            self.alerts_armed = permission == NotificationPermission::Granted;
            if !self.alerts_armed {
                warn!(?permission, "notification permission not granted");
                status = Some(StatusLine::new(
                    "Notifications blocked in this browser context.",
                    StatusTone::Alert,
                ));
            }
        }
        info!(armed = self.alerts_armed, "notification alerting toggled");

        ToggleOutcome {
            affordance: ToggleAffordance {
                label: if self.alerts_armed {
                    "Notifications Enabled".to_string()
                } else {
                    "Enable Notifications".to_string()
                },
                enabled: true,
                pressed: self.alerts_armed,
            },
            status,
        }
    }

    /// Flip the audible tone. Independent of notification permission.
    pub fn toggle_sound(&mut self) -> bool {
        self.sound_enabled = !self.sound_enabled;
        info!(sound = self.sound_enabled, "alert tone toggled");
        self.sound_enabled
    }
}
