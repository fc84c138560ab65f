//! Retry sweep: re-queue failed alerts that still have retry budget.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::database::repositories::AlertRepository;
use crate::domain::Alert;
use crate::queue::{DeliveryEnqueuer, DeliveryJob};
use crate::{Error, Result};

/// Sweep summary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Alerts successfully re-enqueued.
    pub retried: usize,
    /// Alerts that could not be re-enqueued this time.
    pub failed: usize,
}

/// How long an alert may sit in `PENDING` before the sweep assumes its
/// delivery job was lost.
pub const DEFAULT_STALE_PENDING: Duration = Duration::from_secs(15 * 60);

pub struct RetrySweep {
    alerts: Arc<dyn AlertRepository>,
    enqueuer: Arc<dyn DeliveryEnqueuer>,
    stale_after: Duration,
}

impl RetrySweep {
    pub fn new(alerts: Arc<dyn AlertRepository>, enqueuer: Arc<dyn DeliveryEnqueuer>) -> Self {
        Self {
            alerts,
            enqueuer,
            stale_after: DEFAULT_STALE_PENDING,
        }
    }

    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    /// Run one sweep. Only a failure to list candidates is an error; each
    /// alert is handled in isolation.
    pub async fn execute(&self) -> Result<SweepReport> {
        let mut report = SweepReport::default();
        self.reclaim_stale(&mut report).await?;

        let candidates = self.alerts.find_failed_retryable().await?;
        if candidates.is_empty() && report == SweepReport::default() {
            debug!("Retry sweep found nothing to retry");
            return Ok(report);
        }

        for mut alert in candidates {
            match self.retry_one(&mut alert).await {
                Ok(true) => report.retried += 1,
                Ok(false) => {}
                Err(e) => {
                    error!(alert_id = %alert.id(), error = %e, "Failed to re-queue alert");
                    report.failed += 1;
                }
            }
        }

        info!(retried = report.retried, failed = report.failed, "Retry sweep finished");
        Ok(report)
    }

    /// Fail alerts stuck in `PENDING` so the regular pass below can retry them.
    ///
    /// A first-time job whose final write errored gets no broker retry, which
    /// leaves its alert `PENDING` with nothing queued.
    async fn reclaim_stale(&self, report: &mut SweepReport) -> Result<()> {
        let stale_after = chrono::Duration::from_std(self.stale_after)
            .map_err(|e| Error::config(format!("stale pending window out of range: {e}")))?;
        let stale = self.alerts.find_stale_pending(Utc::now() - stale_after).await?;

        for mut alert in stale {
            let channels = alert.undelivered_channels();
            if channels.is_empty() {
                continue;
            }
            warn!(alert_id = %alert.id(), channels = ?channels, "Alert stuck in PENDING, marking failed");
            alert.begin_cycle(&channels);
            for channel in &channels {
                alert.mark_channel_failed(channel, "delivery stalled");
            }
            if let Err(e) = self.alerts.save(&mut alert).await {
                error!(alert_id = %alert.id(), error = %e, "Failed to reclaim stalled alert");
                report.failed += 1;
            }
        }
        Ok(())
    }

    async fn retry_one(&self, alert: &mut Alert) -> Result<bool> {
        let channels = alert.undelivered_channels();
        if channels.is_empty() {
            debug!(alert_id = %alert.id(), "Nothing left to deliver, skipping");
            return Ok(false);
        }

        match alert.increment_attempt() {
            Ok(()) => {}
            Err(e @ Error::RetryBudgetExhausted { .. }) => {
                warn!(alert_id = %alert.id(), error = %e, "Skipping alert");
                return Ok(false);
            }
            Err(e) => return Err(e),
        }
        self.alerts.save(alert).await?;

        let job = DeliveryJob::new(alert.id(), &channels, true);
        if let Err(e) = self.enqueuer.enqueue(job).await {
            // Put the alert back so the next sweep sees it again.
            for channel in &channels {
                alert.mark_channel_failed(channel, format!("re-enqueue failed: {e}"));
            }
            if let Err(save_err) = self.alerts.save(alert).await {
                error!(alert_id = %alert.id(), error = %save_err, "Failed to restore alert after enqueue failure");
            }
            return Err(e);
        }

        debug!(alert_id = %alert.id(), attempts = alert.attempts(), channels = ?channels, "Alert re-queued");
        Ok(true)
    }
}
