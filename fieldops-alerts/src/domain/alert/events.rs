//! Domain events raised by the alert aggregate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Something noteworthy that happened to an alert.
///
/// Events are recorded on the entity and drained with
/// [`Alert::take_events`](super::Alert::take_events) once the change is persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AlertEvent {
    /// First successful delivery.
    Sent {
        alert_id: String,
        channel: String,
        at: DateTime<Utc>,
    },
    /// A whole delivery cycle failed, retry budget remains.
    Failed {
        alert_id: String,
        attempts: u32,
        at: DateTime<Utc>,
    },
    /// A whole delivery cycle failed and no retries remain.
    Exhausted {
        alert_id: String,
        attempts: u32,
        at: DateTime<Utc>,
    },
    /// The recipient acknowledged the alert.
    Read {
        alert_id: String,
        user_id: String,
        at: DateTime<Utc>,
    },
}

impl AlertEvent {
    pub fn alert_id(&self) -> &str {
        match self {
            Self::Sent { alert_id, .. }
            | Self::Failed { alert_id, .. }
            | Self::Exhausted { alert_id, .. }
            | Self::Read { alert_id, .. } => alert_id,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Sent { .. } => "alert.sent",
            Self::Failed { .. } => "alert.failed",
            Self::Exhausted { .. } => "alert.exhausted",
            Self::Read { .. } => "alert.read",
        }
    }
}
