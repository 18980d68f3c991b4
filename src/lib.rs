//! Niblet Monitor - On-device nail-biting habit monitor
//!
//! Niblet turns per-frame hand and face landmarks into debounced bite
//! episodes, cooldown-gated alerts and a reward timer for clean time:
//! landmark adaptation → proximity classification → debouncing → alert
//! dispatch / reward timing → avatar and status presentation.
//!
//! ## Modules
//!
//! - **Session**: single owner of all per-session state, driven by events
//! - **Scheduler**: wall-clock (or manual-clock) event loop around a session
//! - **Replay**: virtual-time playback of recorded frames

pub mod adapter;
pub mod alert;
pub mod classifier;
pub mod config;
pub mod debouncer;
pub mod error;
pub mod presenter;
pub mod replay;
pub mod reward;
pub mod scheduler;
pub mod session;
pub mod types;

// FFI bindings for C interop (always available for cdylib/staticlib builds)
pub mod ffi;

pub use adapter::{FrameAdapter, FrameRecord, HolisticFrame};
pub use alert::{AlertChannels, AlertDispatcher, AlertToggles, Outbox};
pub use classifier::{classify, ProximityClassifier};
pub use config::MonitorConfig;
pub use debouncer::BiteDebouncer;
pub use error::{ChannelError, MonitorError};
pub use replay::{replay, replay_session, ReplayReport};
pub use reward::RewardTimer;
pub use scheduler::{Clock, FrameSource, ManualClock, Scheduler, SchedulerHandle, SystemClock};
pub use session::MonitorSession;

/// Library version reported by the CLI and the C ABI
pub const MONITOR_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name used in logs and diagnostics
pub const APP_NAME: &str = "niblet-monitor";
