//! Delivery job and queue value types.

use serde::{Deserialize, Serialize};

use crate::domain::normalize_channel_id;

/// One delivery cycle to run: which alert, over which channels.
///
/// Carries no business data, only a pointer to the alert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryJob {
    pub alert_id: String,
    pub channels: Vec<String>,
    /// Set by the retry sweep; grants the job more broker attempts.
    #[serde(default)]
    pub is_retry: bool,
}

impl DeliveryJob {
    pub fn new<I, S>(alert_id: impl Into<String>, channels: I, is_retry: bool) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            alert_id: alert_id.into(),
            channels: channels
                .into_iter()
                .map(|c| normalize_channel_id(c.as_ref()))
                .collect(),
            is_retry,
        }
    }

    /// First delivery of a freshly created alert.
    pub fn first_attempt<I, S>(alert_id: impl Into<String>, channels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self::new(alert_id, channels, false)
    }
}

/// Which backend the queue runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueMode {
    /// Durable broker plus worker pool.
    #[default]
    Distributed,
    /// Synchronous delivery in the caller's task.
    InProcess,
}

impl QueueMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Distributed => "distributed",
            Self::InProcess => "inprocess",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "distributed" => Some(Self::Distributed),
            "inprocess" | "in_process" | "in-process" => Some(Self::InProcess),
            _ => None,
        }
    }
}

impl std::fmt::Display for QueueMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Job counts for operational visibility.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub pending: u64,
    pub processing: u64,
    pub completed: u64,
    pub failed: u64,
}
