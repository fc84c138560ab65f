//! In-app inbox sender.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::SqlitePool;
use tracing::debug;

use super::{ChannelSender, deliver_within};
use crate::database::time::now_ms;
use crate::domain::{Alert, ContactInfo};
use crate::error::DeliveryError;

const CHANNEL: &str = "in_app";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Writes alerts into the user's in-app inbox.
///
/// The inbox is keyed by alert id, so delivering the same alert twice
/// leaves a single row.
pub struct InAppSender {
    pool: SqlitePool,
    timeout: Duration,
}

impl InAppSender {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl ChannelSender for InAppSender {
    fn channel(&self) -> &str {
        CHANNEL
    }

    async fn send(&self, alert: &Alert, _recipient: &ContactInfo) -> Result<(), DeliveryError> {
        let payload = alert.payload();
        let metadata = payload.metadata.as_ref().map(|m| m.to_string());

        deliver_within(CHANNEL, self.timeout, async {
            let result = sqlx::query(
                r#"
                INSERT OR IGNORE INTO in_app_notification
                    (alert_id, user_id, kind, priority, title, message, metadata, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(alert.id())
            .bind(alert.recipient_id())
            .bind(payload.kind.as_str())
            .bind(payload.priority.as_str())
            .bind(&payload.title)
            .bind(&payload.message)
            .bind(&metadata)
            .bind(now_ms())
            .execute(&self.pool)
            .await
            .map_err(|e| DeliveryError::transport(CHANNEL, e.to_string()))?;

            if result.rows_affected() == 0 {
                debug!(alert_id = %alert.id(), "In-app notification already present");
            }
            Ok(())
        })
        .await
    }
}
