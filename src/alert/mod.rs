//! Alerting
//!
//! Cooldown-gated fan-out of bite alerts to independent, best-effort channels:
//! an audible tone, a local notification, and a notification delivered through
//! a background worker when the monitoring surface is hidden.
//!
//! Platform calls sit behind the ports in [`channels`]; the dispatcher only
//! sees their `Result`s, so channel selection and cooldown logic run the same
//! against real platforms and in-memory outboxes.

pub mod channels;
pub mod dispatcher;
pub mod permission;

pub use channels::{
    AlertChannels, BackgroundWorker, NotificationPermission, NotificationPort,
    NotificationSupport, NotificationWorker, Outbox, OutboxItem, TonePort, ToneSpec,
};
pub use dispatcher::AlertDispatcher;
pub use permission::{AlertToggles, ToggleAffordance, ToggleOutcome};
