//! Error types for the Niblet monitor

use thiserror::Error;

/// Errors surfaced by the monitor's public API
#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    #[error("Could not access camera: {0}")]
    DeviceAccess(String),

    #[error("Monitoring is not active")]
    NotMonitoring,

    #[error("Monitoring is already active")]
    AlreadyMonitoring,

    #[error("Scheduler is no longer running")]
    SchedulerClosed,
}

/// Failure of a single alert channel.
///
/// These never escape the dispatcher; they are recorded per channel and logged.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChannelError {
    #[error("permission denied")]
    PermissionDenied,

    #[error("not supported on this platform")]
    Unsupported,

    #[error("requires a secure context (HTTPS or localhost)")]
    InsecureContext,

    #[error("dispatch failed: {0}")]
    Dispatch(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_error_conversion() {
        let err: MonitorError = serde_json::from_str::<serde_json::Value>("{")
            .unwrap_err()
            .into();
        assert!(err.to_string().starts_with("Invalid JSON"));
    }

    #[test]
    fn test_channel_error_messages() {
        assert_eq!(ChannelError::PermissionDenied.to_string(), "permission denied");
        assert_eq!(
            ChannelError::Dispatch("boom".to_string()).to_string(),
            "dispatch failed: boom"
        );
    }
}
