//! Push notification sender posting to a push gateway.

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

const CHANNEL: &str = "push";

const MAX_BODY_CHARS: usize = 240;

/// Push gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushConfig {
    /// Whether the sender is registered at all.
    pub enabled: bool,
    /// Gateway endpoint receiving `POST` requests.
    pub gateway_url: String,
    /// Server key sent as a bearer token.
    pub api_key: Option<String>,
    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_timeout() -> u64 {
    10
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            gateway_url: String::new(),
            api_key: None,
            timeout_secs: default_timeout(),
        }
    }
}

/// Push notification sender.
pub struct PushSender {
    config: PushConfig,
    client: Client,
}

impl PushSender {
    pub fn new(config: PushConfig) -> Self {
        let client = build_gateway_client(Duration::from_secs(config.timeout_secs));
        Self { config, client }
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(self.config.timeout_secs)
    }

    /// Build the JSON payload.
    fn build_payload(&self, alert: &Alert, device_token: &str) -> serde_json::Value {
        let payload = alert.payload();
        let delivery_priority = if payload.priority.is_critical() {
            "high"
        } else {
            "normal"
        };
        json!({
            "token": device_token,
            "notification": {
                "title": payload.title,
                "body": truncate(&payload.message, MAX_BODY_CHARS),
            },
            "priority": delivery_priority,
            "data": {
                "alert_id": alert.id(),
                "kind": payload.kind.as_str(),
                "priority": payload.priority.as_str(),
                "metadata": payload.metadata,
            },
        })
    }
}

#[async_trait]
impl ChannelSender for PushSender {
    fn channel(&self) -> &str {
        CHANNEL
    }

    async fn send(&self, alert: &Alert, recipient: &ContactInfo) -> Result<(), DeliveryError> {
        let token = recipient
            .push_token
            .as_deref()
            .ok_or(DeliveryError::MissingAddress {
                channel: CHANNEL,
                field: "push token",
            })?;

        let mut request = self
            .client
            .post(&self.config.gateway_url)
            .header("Idempotency-Key", format!("{}:{}", alert.id(), CHANNEL))
            .json(&self.build_payload(alert, token));
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
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

        debug!(alert_id = %alert.id(), "Alert push notification sent");
        Ok(())
    }
}
