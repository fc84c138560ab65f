//! Application-wide error types.

use std::time::Duration;

use thiserror::Error;

/// Application-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Application-wide error type.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Database error: {0}")]
    DatabaseSqlx(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Entity not found: {entity_type} with id {id}")]
    NotFound { entity_type: String, id: String },

    #[error("User {user_id} is not allowed to act on {entity_type} {id}")]
    Forbidden {
        entity_type: String,
        id: String,
        user_id: String,
    },

    #[error("Retry budget exhausted for alert {alert_id} ({attempts}/{max} attempts)")]
    RetryBudgetExhausted {
        alert_id: String,
        attempts: u32,
        max: u32,
    },

    #[error("Unknown notification channel: {0}")]
    UnknownChannel(String),

    #[error("Delivery error: {0}")]
    Delivery(#[from] DeliveryError),

    #[error("Stale write: {entity_type} {id} was modified concurrently")]
    Conflict { entity_type: String, id: String },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Delivery queue unavailable: {0}")]
    QueueUnavailable(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn not_found(entity_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type: entity_type.into(),
            id: id.into(),
        }
    }

    pub fn forbidden(
        entity_type: impl Into<String>,
        id: impl Into<String>,
        user_id: impl Into<String>,
    ) -> Self {
        Self::Forbidden {
            entity_type: entity_type.into(),
            id: id.into(),
            user_id: user_id.into(),
        }
    }

    pub fn conflict(entity_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self::Conflict {
            entity_type: entity_type.into(),
            id: id.into(),
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }
}

/// Failure of a single delivery attempt over one channel.
///
/// These never cross the queue boundary as errors: the processor records them
/// on the alert's per-channel outcome instead.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("recipient has no {field} for channel {channel}")]
    MissingAddress {
        channel: &'static str,
        field: &'static str,
    },

    #[error("{channel} delivery timed out after {after:?}")]
    Timeout {
        channel: &'static str,
        after: Duration,
    },

    #[error("{channel} transport rejected the message: {reason}")]
    Rejected {
        channel: &'static str,
        reason: String,
    },

    #[error("{channel} transport error: {message}")]
    Transport {
        channel: &'static str,
        message: String,
    },
}

impl DeliveryError {
    pub fn transport(channel: &'static str, message: impl Into<String>) -> Self {
        Self::Transport {
            channel,
            message: message.into(),
        }
    }

    pub fn rejected(channel: &'static str, reason: impl Into<String>) -> Self {
        Self::Rejected {
            channel,
            reason: reason.into(),
        }
    }
}
