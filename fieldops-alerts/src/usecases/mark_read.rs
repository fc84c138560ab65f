//! Read/acknowledge an alert.

use std::sync::Arc;

use tracing::debug;

use crate::database::repositories::AlertRepository;
use crate::{Error, Result};

pub struct MarkAlertRead {
    alerts: Arc<dyn AlertRepository>,
}

impl MarkAlertRead {
    pub fn new(alerts: Arc<dyn AlertRepository>) -> Self {
        Self { alerts }
    }

    /// Mark `alert_id` read by `user_id`, who must be its recipient.
    pub async fn execute(&self, alert_id: &str, user_id: &str) -> Result<()> {
        let mut alert = self
            .alerts
            .find_by_id(alert_id)
            .await?
            .ok_or_else(|| Error::not_found("Alert", alert_id))?;

        if alert.mark_as_read(user_id)? {
            self.alerts.save(&mut alert).await?;
            debug!(alert_id, user_id, "Alert marked as read");
        }
        Ok(())
    }
}
