//! Virtual-time replay
//!
//! Drives a session from recorded, timestamped frames. Reward and alert
//! ticks are synthesized between frames at their configured periods, so a
//! recording reproduces exactly what live monitoring would have done.

use crate::adapter::{FrameAdapter, FrameRecord};
use crate::alert::Outbox;
use crate::config::MonitorConfig;
use crate::error::MonitorError;
use crate::scheduler::TickSchedule;
use crate::session::MonitorSession;
use crate::types::{MonitorEvent, SessionOutput, SessionSnapshot, Visibility};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Everything a replay produced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayReport {
    pub frames: usize,
    pub outputs: Vec<SessionOutput>,
    /// Session state after the last frame, before the session was stopped
    pub snapshot: SessionSnapshot,
}

/// Replay `records` through an already configured session.
///
/// The session starts at the first record's timestamp and is stopped after
/// the last one. Records must be in timestamp order.
pub fn replay_session(
    session: &mut MonitorSession,
    records: &[FrameRecord],
) -> Result<ReplayReport, MonitorError> {
    let Some(first) = records.first() else {
        return Ok(ReplayReport {
            frames: 0,
            outputs: Vec::new(),
            snapshot: session.snapshot(),
        });
    };

    let mut outputs = session.start(first.timestamp)?;
    let mut ticks = TickSchedule::new(
        first.timestamp,
        session.config().reward_tick(),
        session.config().alert_interval(),
    );
    let mut visibility = Visibility::Visible;

    for (idx, record) in records.iter().enumerate() {
        if idx > 0 && record.timestamp < records[idx - 1].timestamp {
            session.stop()?;
            return Err(MonitorError::InvalidFrame(format!(
                "record {idx} is earlier than the record before it"
            )));
        }
        while let Some((due, event)) = ticks.next_due(record.timestamp) {
            outputs.extend(session.handle(due, event));
        }
        if let Some(next) = record.visibility.filter(|v| *v != visibility) {
            visibility = next;
            outputs.extend(session.handle(record.timestamp, MonitorEvent::VisibilityChanged(next)));
        }
        outputs.extend(session.handle(
            record.timestamp,
            MonitorEvent::FrameArrived(record.observation()),
        ));
    }

    let snapshot = session.snapshot();
    session.stop()?;
    info!(frames = records.len(), outputs = outputs.len(), "replay finished");

    Ok(ReplayReport {
        frames: records.len(),
        outputs,
        snapshot,
    })
}

/// Replay with a fresh session and no live alert channels
pub fn replay(records: &[FrameRecord], config: MonitorConfig) -> Result<ReplayReport, MonitorError> {
    let mut session = MonitorSession::new(config, Outbox::new().channels(false))?;
    replay_session(&mut session, records)
}

/// Parse NDJSON frame records and replay them
pub fn replay_ndjson(ndjson: &str, config: MonitorConfig) -> Result<ReplayReport, MonitorError> {
    let records = FrameAdapter::parse_ndjson(ndjson)?;
    replay(&records, config)
}
