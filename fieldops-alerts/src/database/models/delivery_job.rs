//! Delivery job database model.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::database::time::now_ms;

/// Row of the broker's `delivery_job` table.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct DeliveryJobDbModel {
    pub id: String,
    pub alert_id: String,
    /// JSON array of channel identifiers
    pub channels: String,
    pub is_retry: bool,
    /// Status: PENDING, PROCESSING, COMPLETED, FAILED
    pub status: String,
    pub attempts_made: i64,
    pub max_attempts: i64,
    /// Earliest claim time (epoch ms)
    pub available_at: i64,
    pub last_error: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
    pub finished_at: Option<i64>,
}

impl DeliveryJobDbModel {
    pub fn new(
        alert_id: impl Into<String>,
        channels: impl Into<String>,
        is_retry: bool,
        max_attempts: u32,
    ) -> Self {
        let now = now_ms();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            alert_id: alert_id.into(),
            channels: channels.into(),
            is_retry,
            status: DeliveryJobStatus::Pending.as_str().to_string(),
            attempts_made: 0,
            max_attempts: i64::from(max_attempts),
            available_at: now,
            last_error: None,
            created_at: now,
            updated_at: now,
            finished_at: None,
        }
    }
}

/// Broker job status values.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeliveryJobStatus {
    /// Waiting to be claimed (possibly not before `available_at`).
    Pending,
    /// Claimed by a worker.
    Processing,
    /// Processed; business outcome is recorded on the alert.
    Completed,
    /// Processing errored more often than the job allows.
    Failed,
}

impl DeliveryJobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Processing => "PROCESSING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        s.parse().ok()
    }
}

/// Job counts per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryJobCounts {
    pub pending: u64,
    pub processing: u64,
    pub completed: u64,
    pub failed: u64,
}
