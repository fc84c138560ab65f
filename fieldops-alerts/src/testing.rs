//! In-memory fakes shared by unit tests.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::database::repositories::{AlertRepository, RecipientDirectory};
use crate::domain::{
    Alert, AlertKind, AlertPayload, AlertPriority, ContactInfo, DeliveryState, MAX_ATTEMPTS,
};
use crate::error::DeliveryError;
use crate::notification::{ChannelSender, SenderFactory};
use crate::{Error, Result};

pub fn alert(recipient: &str, channels: &[&str]) -> Alert {
    let payload = AlertPayload::new(
        AlertKind::PendingServiceEntry,
        AlertPriority::Warning,
        "Service entry pending",
        "Service entry HES-42 is waiting for approval",
    )
    .unwrap();
    Alert::new(recipient, channels.iter().copied(), payload).unwrap()
}

/// Alert store keeping rows in a map, with the same version check as SQLite.
#[derive(Default)]
pub struct MemoryAlertRepository {
    alerts: Mutex<HashMap<String, Alert>>,
    pub fail_saves: std::sync::atomic::AtomicBool,
    written_after_listing: Mutex<Vec<String>>,
}

impl MemoryAlertRepository {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn get(&self, id: &str) -> Option<Alert> {
        self.alerts.lock().get(id).cloned()
    }

    /// Bump the stored version of `id` right after the next listing, as if
    /// another writer touched the alert in between.
    pub fn write_after_listing(&self, id: &str) {
        self.written_after_listing.lock().push(id.to_string());
    }

    fn apply_concurrent_writes(&self) {
        let ids = std::mem::take(&mut *self.written_after_listing.lock());
        let mut alerts = self.alerts.lock();
        for id in ids {
            if let Some(stored) = alerts.get_mut(&id) {
                stored.set_version(stored.version() + 1);
            }
        }
    }

    pub async fn insert(&self, mut alert: Alert) -> Alert {
        self.save(&mut alert).await.unwrap();
        alert
    }
}

#[async_trait]
impl AlertRepository for MemoryAlertRepository {
    async fn find_by_id(&self, id: &str) -> Result<Option<Alert>> {
        Ok(self.get(id))
    }

    async fn save(&self, alert: &mut Alert) -> Result<()> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(Error::Other("alert store offline".into()));
        }
        let mut alerts = self.alerts.lock();
        let stored_version = alerts.get(alert.id()).map(Alert::version).unwrap_or(0);
        if stored_version != alert.version() {
            return Err(Error::conflict("Alert", alert.id()));
        }
        alert.set_version(stored_version + 1);
        let mut stored = alert.clone();
        stored.take_events();
        alerts.insert(alert.id().to_string(), stored);
        Ok(())
    }

    async fn find_failed_retryable(&self) -> Result<Vec<Alert>> {
        let mut found: Vec<Alert> = self
            .alerts
            .lock()
            .values()
            .filter(|a| a.state() == DeliveryState::Failed && a.attempts() < MAX_ATTEMPTS)
            .cloned()
            .collect();
        found.sort_by_key(|a| a.updated_at());
        self.apply_concurrent_writes();
        Ok(found)
    }

    async fn find_stale_pending(&self, updated_before: DateTime<Utc>) -> Result<Vec<Alert>> {
        let mut found: Vec<Alert> = self
            .alerts
            .lock()
            .values()
            .filter(|a| a.state() == DeliveryState::Pending && a.updated_at() < updated_before)
            .cloned()
            .collect();
        found.sort_by_key(|a| a.updated_at());
        Ok(found)
    }
}

/// Recipient directory backed by a map; unknown users are `None`.
#[derive(Default)]
pub struct StaticRecipients {
    contacts: HashMap<String, ContactInfo>,
    pub fail: bool,
}

impl StaticRecipients {
    pub fn with(contacts: impl IntoIterator<Item = ContactInfo>) -> Arc<Self> {
        Arc::new(Self {
            contacts: contacts
                .into_iter()
                .map(|c| (c.user_id.clone(), c))
                .collect(),
            fail: false,
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            fail: true,
            ..Default::default()
        })
    }
}

#[async_trait]
impl RecipientDirectory for StaticRecipients {
    async fn get_contact_info(&self, user_id: &str) -> Result<Option<ContactInfo>> {
        if self.fail {
            return Err(Error::Other("directory unavailable".into()));
        }
        Ok(self.contacts.get(user_id).cloned())
    }
}

/// Sender that succeeds or fails on demand and counts its calls.
pub struct ScriptedSender {
    channel: &'static str,
    succeed: std::sync::atomic::AtomicBool,
    calls: AtomicUsize,
}

impl ScriptedSender {
    pub fn ok(channel: &'static str) -> Arc<Self> {
        Arc::new(Self {
            channel,
            succeed: true.into(),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn failing(channel: &'static str) -> Arc<Self> {
        let sender = Self::ok(channel);
        sender.set_succeed(false);
        sender
    }

    pub fn set_succeed(&self, succeed: bool) {
        self.succeed.store(succeed, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChannelSender for ScriptedSender {
    fn channel(&self) -> &str {
        self.channel
    }

    async fn send(
        &self,
        _alert: &Alert,
        _recipient: &ContactInfo,
    ) -> std::result::Result<(), DeliveryError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.succeed.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(DeliveryError::transport(self.channel, "gateway unavailable"))
        }
    }
}

pub fn factory(senders: &[Arc<ScriptedSender>]) -> Arc<SenderFactory> {
    let factory = senders.iter().fold(SenderFactory::new(), |f, s| {
        f.with_sender(s.clone() as Arc<dyn ChannelSender>)
    });
    Arc::new(factory)
}

pub fn contact(user_id: &str) -> ContactInfo {
    ContactInfo::new(user_id)
        .with_email(format!("{user_id}@example.com"))
        .with_phone("+56900000000")
        .with_push_token(format!("token-{user_id}"))
}
