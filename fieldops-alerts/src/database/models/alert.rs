//! Alert database model.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::database::time::{datetime_to_ms, ms_to_datetime, opt_datetime_to_ms, opt_ms_to_datetime};
use crate::domain::{
    Alert, AlertKind, AlertPayload, AlertPriority, AlertSnapshot, ChannelOutcome, DeliveryState,
};
use crate::{Error, Result};

/// Row of the `alert` table.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct AlertDbModel {
    pub id: String,
    pub recipient_id: String,
    /// JSON array of channel identifiers
    pub channels: String,
    pub kind: String,
    pub priority: String,
    pub title: String,
    pub message: String,
    /// JSON object, if any
    pub metadata: Option<String>,
    /// PENDING, SENT, FAILED, EXHAUSTED
    pub state: String,
    pub attempts: i64,
    /// JSON object: channel -> outcome
    pub outcomes: String,
    pub sent_at: Option<i64>,
    pub read_at: Option<i64>,
    pub read_by: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
    pub version: i64,
}

impl AlertDbModel {
    pub fn from_alert(alert: &Alert) -> Result<Self> {
        let payload = alert.payload();
        Ok(Self {
            id: alert.id().to_string(),
            recipient_id: alert.recipient_id().to_string(),
            channels: serde_json::to_string(alert.channels())?,
            kind: payload.kind.as_str().to_string(),
            priority: payload.priority.as_str().to_string(),
            title: payload.title.clone(),
            message: payload.message.clone(),
            metadata: payload
                .metadata
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?,
            state: alert.state().as_str().to_string(),
            attempts: i64::from(alert.attempts()),
            outcomes: serde_json::to_string(alert.outcomes())?,
            sent_at: opt_datetime_to_ms(alert.sent_at()),
            read_at: opt_datetime_to_ms(alert.read_at()),
            read_by: alert.read_by().map(str::to_string),
            created_at: datetime_to_ms(alert.created_at()),
            updated_at: datetime_to_ms(alert.updated_at()),
            version: alert.version(),
        })
    }

    pub fn into_alert(self) -> Result<Alert> {
        let kind = AlertKind::parse(&self.kind)
            .ok_or_else(|| Error::validation(format!("unknown alert kind: {}", self.kind)))?;
        let priority = AlertPriority::parse(&self.priority).ok_or_else(|| {
            Error::validation(format!("unknown alert priority: {}", self.priority))
        })?;
        let state = DeliveryState::parse(&self.state)
            .ok_or_else(|| Error::validation(format!("unknown delivery state: {}", self.state)))?;
        let attempts = u32::try_from(self.attempts)
            .map_err(|_| Error::validation(format!("invalid attempts: {}", self.attempts)))?;
        let channels: Vec<String> = serde_json::from_str(&self.channels)?;
        let outcomes: BTreeMap<String, ChannelOutcome> = serde_json::from_str(&self.outcomes)?;
        let metadata = self
            .metadata
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?;

        // Stored payloads were validated on creation; rebuild without re-checking lengths.
        let payload = AlertPayload {
            kind,
            priority,
            title: self.title,
            message: self.message,
            metadata,
        };

        Alert::from_persistence(AlertSnapshot {
            id: self.id,
            recipient_id: self.recipient_id,
            channels,
            payload,
            state,
            attempts,
            outcomes,
            sent_at: opt_ms_to_datetime(self.sent_at),
            read_at: opt_ms_to_datetime(self.read_at),
            read_by: self.read_by,
            created_at: ms_to_datetime(self.created_at),
            updated_at: ms_to_datetime(self.updated_at),
            version: self.version,
        })
    }
}
