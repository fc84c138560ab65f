//! Alert entity.

use std::collections::{BTreeMap, HashSet};
use std::ops::RangeInclusive;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{AlertEvent, DeliveryState};
use crate::domain::value_objects::{AlertKind, AlertPriority, Channel, normalize_channel_id};
use crate::{Error, Result};

/// Ceiling on sweep-driven retry cycles per alert.
pub const MAX_ATTEMPTS: u32 = 3;

const TITLE_LEN: RangeInclusive<usize> = 3..=100;
const MESSAGE_LEN: RangeInclusive<usize> = 10..=500;

/// Message content of an alert. Immutable once the alert exists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertPayload {
    pub kind: AlertKind,
    pub priority: AlertPriority,
    pub title: String,
    pub message: String,
    /// Structured context (work order id, invoice number, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl AlertPayload {
    /// Build a validated payload. Title and message are trimmed.
    pub fn new(
        kind: AlertKind,
        priority: AlertPriority,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> Result<Self> {
        let title = title.into().trim().to_string();
        let message = message.into().trim().to_string();

        if !TITLE_LEN.contains(&title.chars().count()) {
            return Err(Error::validation(format!(
                "alert title must be between {} and {} characters",
                TITLE_LEN.start(),
                TITLE_LEN.end()
            )));
        }
        if !MESSAGE_LEN.contains(&message.chars().count()) {
            return Err(Error::validation(format!(
                "alert message must be between {} and {} characters",
                MESSAGE_LEN.start(),
                MESSAGE_LEN.end()
            )));
        }

        Ok(Self {
            kind,
            priority,
            title,
            message,
            metadata: None,
        })
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Delivery result of one channel.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChannelOutcome {
    pub delivered: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivered_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempted_at: Option<DateTime<Utc>>,
}

impl ChannelOutcome {
    /// A channel that was attempted and did not deliver.
    pub fn is_failed(&self) -> bool {
        !self.delivered && self.last_error.is_some()
    }
}

/// Stored state of an alert, used to rebuild the entity.
#[derive(Debug, Clone)]
pub struct AlertSnapshot {
    pub id: String,
    pub recipient_id: String,
    pub channels: Vec<String>,
    pub payload: AlertPayload,
    pub state: DeliveryState,
    pub attempts: u32,
    pub outcomes: BTreeMap<String, ChannelOutcome>,
    pub sent_at: Option<DateTime<Utc>>,
    pub read_at: Option<DateTime<Utc>>,
    pub read_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: i64,
}

/// One notification owed to one recipient over one or more channels.
#[derive(Debug, Clone)]
pub struct Alert {
    id: String,
    recipient_id: String,
    channels: Vec<String>,
    payload: AlertPayload,
    state: DeliveryState,
    attempts: u32,
    outcomes: BTreeMap<String, ChannelOutcome>,
    sent_at: Option<DateTime<Utc>>,
    read_at: Option<DateTime<Utc>>,
    read_by: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    version: i64,
    /// Channels attempted by the delivery cycle in progress. Not persisted.
    cycle: Vec<String>,
    events: Vec<AlertEvent>,
}

impl Alert {
    /// Create a new pending alert.
    pub fn new<I, S>(recipient_id: impl Into<String>, channels: I, payload: AlertPayload) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let recipient_id = recipient_id.into();
        if recipient_id.trim().is_empty() {
            return Err(Error::validation("alert recipient must not be blank"));
        }

        let channels = normalize_channels(channels)?;
        let now = Utc::now();

        Ok(Self {
            id: uuid::Uuid::new_v4().to_string(),
            recipient_id,
            channels,
            payload,
            state: DeliveryState::Pending,
            attempts: 0,
            outcomes: BTreeMap::new(),
            sent_at: None,
            read_at: None,
            read_by: None,
            created_at: now,
            updated_at: now,
            version: 0,
            cycle: Vec::new(),
            events: Vec::new(),
        })
    }

    /// Rebuild an alert from stored state, re-checking its invariants.
    pub fn from_persistence(snapshot: AlertSnapshot) -> Result<Self> {
        if snapshot.channels.is_empty() {
            return Err(Error::validation(format!(
                "stored alert {} has no channels",
                snapshot.id
            )));
        }
        if snapshot.attempts > MAX_ATTEMPTS {
            return Err(Error::validation(format!(
                "stored alert {} has {} attempts (max {})",
                snapshot.id, snapshot.attempts, MAX_ATTEMPTS
            )));
        }
        match (&snapshot.read_at, &snapshot.read_by) {
            (None, None) => {}
            (Some(_), Some(reader)) if *reader == snapshot.recipient_id => {}
            _ => {
                return Err(Error::validation(format!(
                    "stored alert {} has inconsistent read state",
                    snapshot.id
                )));
            }
        }

        Ok(Self {
            id: snapshot.id,
            recipient_id: snapshot.recipient_id,
            channels: snapshot.channels,
            payload: snapshot.payload,
            state: snapshot.state,
            attempts: snapshot.attempts,
            outcomes: snapshot.outcomes,
            sent_at: snapshot.sent_at,
            read_at: snapshot.read_at,
            read_by: snapshot.read_by,
            created_at: snapshot.created_at,
            updated_at: snapshot.updated_at,
            version: snapshot.version,
            cycle: Vec::new(),
            events: Vec::new(),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn recipient_id(&self) -> &str {
        &self.recipient_id
    }

    pub fn channels(&self) -> &[String] {
        &self.channels
    }

    pub fn payload(&self) -> &AlertPayload {
        &self.payload
    }

    pub fn state(&self) -> DeliveryState {
        self.state
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn outcomes(&self) -> &BTreeMap<String, ChannelOutcome> {
        &self.outcomes
    }

    pub fn outcome(&self, channel: &str) -> Option<&ChannelOutcome> {
        self.outcomes.get(channel)
    }

    pub fn sent_at(&self) -> Option<DateTime<Utc>> {
        self.sent_at
    }

    pub fn read_at(&self) -> Option<DateTime<Utc>> {
        self.read_at
    }

    pub fn read_by(&self) -> Option<&str> {
        self.read_by.as_deref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Optimistic concurrency version of the stored row.
    pub fn version(&self) -> i64 {
        self.version
    }

    pub(crate) fn set_version(&mut self, version: i64) {
        self.version = version;
    }

    pub fn is_read(&self) -> bool {
        self.read_at.is_some()
    }

    /// Whether `channel` is one of the channels this alert was created for.
    pub fn declares_channel(&self, channel: &str) -> bool {
        let channel = normalize_channel_id(channel);
        self.channels.iter().any(|c| *c == channel)
    }

    pub fn is_delivered_on(&self, channel: &str) -> bool {
        self.outcomes.get(channel).is_some_and(|o| o.delivered)
    }

    /// Whether the retry sweep may pick this alert up.
    pub fn can_retry(&self) -> bool {
        self.state == DeliveryState::Failed && self.attempts < MAX_ATTEMPTS
    }

    /// Channels without a successful delivery, in declaration order.
    pub fn undelivered_channels(&self) -> Vec<String> {
        self.channels
            .iter()
            .filter(|c| !self.is_delivered_on(c))
            .cloned()
            .collect()
    }

    /// Channels that leave the process (everything but in-app).
    pub fn external_channels(&self) -> Vec<&str> {
        self.channels
            .iter()
            .filter(|c| Channel::parse(c).is_none_or(|ch| ch.requires_external_service()))
            .map(String::as_str)
            .collect()
    }

    /// Declare the channels the current delivery cycle is going to attempt.
    pub fn begin_cycle<S: AsRef<str>>(&mut self, channels: &[S]) {
        self.cycle = channels
            .iter()
            .map(|c| normalize_channel_id(c.as_ref()))
            .collect();
    }

    /// Record a successful delivery. The first success moves the alert to `SENT`.
    ///
    /// Returns `false` when the channel was already delivered.
    pub fn mark_channel_delivered(&mut self, channel: &str) -> bool {
        let channel = normalize_channel_id(channel);
        if self.is_delivered_on(&channel) {
            return false;
        }

        let now = Utc::now();
        self.outcomes.insert(
            channel.clone(),
            ChannelOutcome {
                delivered: true,
                last_error: None,
                delivered_at: Some(now),
                attempted_at: Some(now),
            },
        );
        self.updated_at = now;

        if self.state != DeliveryState::Sent && self.state.can_transition_to(DeliveryState::Sent)
        {
            self.state = DeliveryState::Sent;
            self.sent_at = Some(now);
            self.events.push(AlertEvent::Sent {
                alert_id: self.id.clone(),
                channel,
                at: now,
            });
        }
        true
    }

    /// Record a failed delivery attempt.
    ///
    /// Once every channel of the current cycle has failed the alert becomes
    /// `FAILED`, or `EXHAUSTED` if the retry budget is already spent. A channel
    /// that already delivered is left untouched.
    pub fn mark_channel_failed(&mut self, channel: &str, error: impl std::fmt::Display) {
        let channel = normalize_channel_id(channel);
        if self.is_delivered_on(&channel) {
            return;
        }

        let now = Utc::now();
        self.outcomes.insert(
            channel,
            ChannelOutcome {
                delivered: false,
                last_error: Some(error.to_string()),
                delivered_at: None,
                attempted_at: Some(now),
            },
        );
        self.updated_at = now;

        if self.state == DeliveryState::Sent || !self.cycle_failed() {
            return;
        }

        let target = if self.attempts >= MAX_ATTEMPTS {
            DeliveryState::Exhausted
        } else {
            DeliveryState::Failed
        };
        if self.state == target || !self.state.can_transition_to(target) {
            return;
        }

        self.state = target;
        let event = match target {
            DeliveryState::Exhausted => AlertEvent::Exhausted {
                alert_id: self.id.clone(),
                attempts: self.attempts,
                at: now,
            },
            _ => AlertEvent::Failed {
                alert_id: self.id.clone(),
                attempts: self.attempts,
                at: now,
            },
        };
        self.events.push(event);
    }

    fn cycle_failed(&self) -> bool {
        let failed = |c: &String| self.outcomes.get(c).is_some_and(ChannelOutcome::is_failed);

        if self.cycle.is_empty() {
            let pending: Vec<&String> = self
                .channels
                .iter()
                .filter(|c| !self.is_delivered_on(c))
                .collect();
            !pending.is_empty() && pending.into_iter().all(failed)
        } else {
            self.cycle.iter().all(failed)
        }
    }

    /// Acknowledge the alert on behalf of `user_id`.
    ///
    /// Only the recipient may do this. Returns `false` if the alert was
    /// already read, in which case nothing changes.
    pub fn mark_as_read(&mut self, user_id: &str) -> Result<bool> {
        if user_id != self.recipient_id {
            return Err(Error::forbidden("Alert", &self.id, user_id));
        }
        if self.read_at.is_some() {
            return Ok(false);
        }

        let now = Utc::now();
        self.read_at = Some(now);
        self.read_by = Some(user_id.to_string());
        self.updated_at = now;
        self.events.push(AlertEvent::Read {
            alert_id: self.id.clone(),
            user_id: user_id.to_string(),
            at: now,
        });
        Ok(true)
    }

    /// Consume one unit of retry budget and return to `PENDING`.
    ///
    /// Failed outcomes are cleared so the next cycle starts clean; delivered
    /// channels are kept. Fails without touching anything once the budget
    /// is spent.
    pub fn increment_attempt(&mut self) -> Result<()> {
        if self.attempts >= MAX_ATTEMPTS {
            return Err(Error::RetryBudgetExhausted {
                alert_id: self.id.clone(),
                attempts: self.attempts,
                max: MAX_ATTEMPTS,
            });
        }

        self.attempts += 1;
        self.state = DeliveryState::Pending;
        self.outcomes.retain(|_, outcome| outcome.delivered);
        self.cycle.clear();
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Drain the domain events recorded since the last call.
    pub fn take_events(&mut self) -> Vec<AlertEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn pending_events(&self) -> &[AlertEvent] {
        &self.events
    }
}

fn normalize_channels<I, S>(channels: I) -> Result<Vec<String>>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = HashSet::new();
    let mut normalized = Vec::new();

    for raw in channels {
        let channel = normalize_channel_id(raw.as_ref());
        if channel.is_empty() {
            return Err(Error::validation("channel identifier must not be blank"));
        }
        if !seen.insert(channel.clone()) {
            return Err(Error::validation(format!("duplicate channel: {}", channel)));
        }
        normalized.push(channel);
    }

    if normalized.is_empty() {
        return Err(Error::validation("alert needs at least one channel"));
    }
    Ok(normalized)
}
