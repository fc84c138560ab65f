//! Alert delivery state machine.

use serde::{Deserialize, Serialize};

/// Delivery state of an alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeliveryState {
    /// Waiting for a delivery cycle (first one or a retry).
    #[default]
    Pending,
    /// At least one channel delivered the alert.
    Sent,
    /// Every channel of the last cycle failed; eligible for retry.
    Failed,
    /// Every channel failed and the retry budget is spent.
    Exhausted,
}

impl DeliveryState {
    /// Convert to database string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Sent => "SENT",
            Self::Failed => "FAILED",
            Self::Exhausted => "EXHAUSTED",
        }
    }

    /// Parse from database string representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(Self::Pending),
            "SENT" => Some(Self::Sent),
            "FAILED" => Some(Self::Failed),
            "EXHAUSTED" => Some(Self::Exhausted),
            _ => None,
        }
    }

    /// Terminal states are never picked up by the retry sweep again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Sent | Self::Exhausted)
    }

    /// Validate a state transition.
    pub fn can_transition_to(&self, target: DeliveryState) -> bool {
        use DeliveryState::*;

        match (self, target) {
            (from, to) if *from == to => true,

            // A late success (e.g. a redelivered job) still counts.
            (Pending | Failed | Exhausted, Sent) => true,

            (Pending, Failed | Exhausted) => true,

            // Retry cycle
            (Failed, Pending | Exhausted) => true,

            _ => false,
        }
    }
}

impl std::fmt::Display for DeliveryState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
