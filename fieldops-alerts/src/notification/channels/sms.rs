//! SMS sender posting to an HTTP gateway.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use super::{ChannelSender, deliver_within, request_error, status_error, truncate};
use crate::domain::{Alert, ContactInfo};
use crate::error::DeliveryError;
use crate::utils::http_client::build_gateway_client;

const CHANNEL: &str = "sms";

/// Two concatenated SMS segments.
const MAX_TEXT_CHARS: usize = 306;

/// SMS gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmsConfig {
    /// Whether the sender is registered at all.
    pub enabled: bool,
    /// Gateway endpoint receiving `POST` requests.
    pub gateway_url: String,
    /// Bearer token for the gateway.
    pub api_token: Option<String>,
    /// Sender id shown on the handset.
    pub sender_id: String,
    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_timeout() -> u64 {
    10
}

impl Default for SmsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            gateway_url: String::new(),
            api_token: None,
            sender_id: "FieldOps".to_string(),
            timeout_secs: default_timeout(),
        }
    }
}

/// SMS sender.
pub struct SmsSender {
    config: SmsConfig,
    client: Client,
}

impl SmsSender {
    /// Create a new SMS sender.
    pub fn new(config: SmsConfig) -> Self {
        let client = build_gateway_client(Duration::from_secs(config.timeout_secs));
        Self { config, client }
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(self.config.timeout_secs)
    }

    /// Build the message text, cut to the gateway's segment budget.
    fn build_text(&self, alert: &Alert) -> String {
        let payload = alert.payload();
        let text = format!("[{}] {}: {}", payload.priority, payload.title, payload.message);
        truncate(&text, MAX_TEXT_CHARS).to_string()
    }

    /// Build the JSON payload.
    fn build_payload(&self, alert: &Alert, phone: &str) -> serde_json::Value {
        json!({
            "to": phone,
            "from": self.config.sender_id,
            "text": self.build_text(alert),
            "reference": alert.id(),
        })
    }
}

#[async_trait]
impl ChannelSender for SmsSender {
    fn channel(&self) -> &str {
        CHANNEL
    }

    async fn send(&self, alert: &Alert, recipient: &ContactInfo) -> Result<(), DeliveryError> {
        let phone = recipient.phone.as_deref().ok_or(DeliveryError::MissingAddress {
            channel: CHANNEL,
            field: "phone number",
        })?;

        let mut request = self
            .client
            .post(&self.config.gateway_url)
            // Gateways deduplicate on this key when a job is redelivered.
            .header("Idempotency-Key", format!("{}:{}", alert.id(), CHANNEL))
            .json(&self.build_payload(alert, phone));
        if let Some(token) = &self.config.api_token {
            request = request.bearer_auth(token);
        }

        let after = self.timeout();
        deliver_within(CHANNEL, after, async {
            let response = request
                .send()
                .await
                .map_err(|e| request_error(CHANNEL, after, e))?;

            if !response.status().is_success() {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                return Err(status_error(CHANNEL, status, &body));
            }
            Ok(())
        })
        .await?;

        debug!(alert_id = %alert.id(), "Alert SMS accepted by gateway");
        Ok(())
    }
}
