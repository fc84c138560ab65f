//! Sender factory: channel identifier to sender.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::info;

use super::channels::{
    ChannelSender, EmailConfig, EmailSender, InAppSender, PushConfig, PushSender, SmsConfig,
    SmsSender,
};
use crate::database::DbPool;
use crate::domain::normalize_channel_id;
use crate::{Error, Result};

/// Transport settings used to build the default set of senders.
#[derive(Debug, Clone, Default)]
pub struct ChannelsConfig {
    pub email: EmailConfig,
    pub sms: SmsConfig,
    pub push: PushConfig,
    pub in_app_enabled: bool,
}

/// Registry of channel senders, fixed at construction.
///
/// The set of valid channel identifiers is exactly the set of registered senders.
#[derive(Default, Clone)]
pub struct SenderFactory {
    senders: BTreeMap<String, Arc<dyn ChannelSender>>,
}

impl SenderFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a sender under its channel identifier, replacing any previous one.
    pub fn with_sender(mut self, sender: Arc<dyn ChannelSender>) -> Self {
        self.senders
            .insert(normalize_channel_id(sender.channel()), sender);
        self
    }

    /// Build the factory from configuration. Disabled transports are not registered.
    pub fn from_config(config: &ChannelsConfig, pool: DbPool) -> Result<Self> {
        let mut factory = Self::new();

        if config.email.enabled {
            factory = factory.with_sender(Arc::new(EmailSender::new(config.email.clone())?));
        }
        if config.sms.enabled {
            if config.sms.gateway_url.is_empty() {
                return Err(Error::config("SMS is enabled but SMS_GATEWAY_URL is empty"));
            }
            factory = factory.with_sender(Arc::new(SmsSender::new(config.sms.clone())));
        }
        if config.push.enabled {
            if config.push.gateway_url.is_empty() {
                return Err(Error::config("Push is enabled but PUSH_GATEWAY_URL is empty"));
            }
            factory = factory.with_sender(Arc::new(PushSender::new(config.push.clone())));
        }
        if config.in_app_enabled {
            factory = factory.with_sender(Arc::new(InAppSender::new(pool)));
        }

        info!(channels = ?factory.channels(), "Channel senders registered");
        Ok(factory)
    }

    /// Resolve the sender for a channel identifier.
    pub fn get_sender(&self, channel: &str) -> Result<Arc<dyn ChannelSender>> {
        self.senders
            .get(&normalize_channel_id(channel))
            .cloned()
            .ok_or_else(|| Error::UnknownChannel(channel.to_string()))
    }

    pub fn supports(&self, channel: &str) -> bool {
        self.senders.contains_key(&normalize_channel_id(channel))
    }

    /// Registered channel identifiers, sorted.
    pub fn channels(&self) -> Vec<&str> {
        self.senders.keys().map(String::as_str).collect()
    }
}

impl std::fmt::Debug for SenderFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SenderFactory")
            .field("channels", &self.channels())
            .finish()
    }
}
