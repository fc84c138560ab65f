//! Notification channel value object.

use serde::{Deserialize, Serialize};

/// A delivery transport an alert can be sent over.
///
/// Alerts and jobs carry channel identifiers as plain strings; whether an
/// identifier is usable is decided by the sender factory, not by this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Email,
    Sms,
    Push,
    InApp,
}

impl Channel {
    pub const ALL: [Channel; 4] = [Self::Email, Self::Sms, Self::Push, Self::InApp];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::Sms => "sms",
            Self::Push => "push",
            Self::InApp => "in_app",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "email" => Some(Self::Email),
            "sms" => Some(Self::Sms),
            "push" => Some(Self::Push),
            "in_app" => Some(Self::InApp),
            _ => None,
        }
    }

    /// Whether delivering over this channel leaves the process (SMTP, gateways).
    pub fn requires_external_service(&self) -> bool {
        !matches!(self, Self::InApp)
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalize a channel identifier the way it is stored on alerts and jobs.
pub fn normalize_channel_id(raw: &str) -> String {
    raw.trim().to_lowercase()
}
