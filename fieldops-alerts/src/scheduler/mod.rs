//! Cron-driven trigger for the retry sweep.
//!
//! Runs independently of the delivery worker pool and stops on its
//! cancellation token.

use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::usecases::RetrySweep;
use crate::{Error, Result};

/// Default sweep schedule: every five minutes (seconds field first).
pub const DEFAULT_SWEEP_CRON: &str = "0 */5 * * * *";

pub struct SweepScheduler {
    sweep: Arc<RetrySweep>,
    schedule: cron::Schedule,
    expression: String,
    cancel: CancellationToken,
}

impl SweepScheduler {
    pub fn new(sweep: Arc<RetrySweep>, expression: &str, cancel: CancellationToken) -> Result<Self> {
        let schedule = cron::Schedule::from_str(expression)
            .map_err(|e| Error::config(format!("Invalid retry sweep cron '{expression}': {e}")))?;
        Ok(Self {
            sweep,
            schedule,
            expression: expression.to_string(),
            cancel,
        })
    }

    /// Next sweep time strictly after `after`.
    pub fn next_tick(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&after).next()
    }

    /// Spawn the scheduling loop.
    pub fn start(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(schedule = %self.expression, "Retry sweep scheduler started");
            loop {
                let now = Utc::now();
                let Some(next) = self.next_tick(now) else {
                    info!("Retry sweep schedule has no upcoming run, stopping");
                    break;
                };
                let wait = (next - now).to_std().unwrap_or_default();
                debug!(next = %next, "Next retry sweep scheduled");

                tokio::select! {
                    _ = self.cancel.cancelled() => break,
                    _ = tokio::time::sleep(wait) => {}
                }

                if let Err(e) = self.sweep.execute().await {
                    error!(error = %e, "Retry sweep failed");
                }
            }
            info!("Retry sweep scheduler stopped");
        })
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }
}
