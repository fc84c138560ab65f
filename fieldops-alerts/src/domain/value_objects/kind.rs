//! Alert kind value object.

use serde::{Deserialize, Serialize};

/// The business condition an alert reports.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::IntoStaticStr,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertKind {
    /// A work acceptance record is still waiting for the client's signature.
    UnsignedAcceptanceRecord,
    /// A service entry sheet has not been approved yet.
    PendingServiceEntry,
    /// An invoice is past its due date.
    OverdueInvoice,
    /// A work order is missing equipment or material.
    MissingResource,
    /// A technician certification has expired or is about to.
    ExpiredCertification,
    /// A work order is behind its planned schedule.
    ScheduleDelay,
    /// A commercial proposal got no answer from the client.
    UnansweredProposal,
}

impl AlertKind {
    pub fn as_str(&self) -> &'static str {
        (*self).into()
    }

    pub fn parse(s: &str) -> Option<Self> {
        s.parse().ok()
    }
}
