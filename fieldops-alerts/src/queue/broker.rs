//! Durable job broker on top of the `delivery_job` table.
//!
//! Jobs move `PENDING -> PROCESSING -> COMPLETED | PENDING (backoff) | FAILED`.
//! Attempts and backoff here are infrastructure-level and independent of the
//! alert's own attempt counter.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use crate::database::models::DeliveryJobDbModel;
use crate::database::repositories::DeliveryJobRepository;
use crate::database::retry::retry_on_sqlite_busy;
use crate::database::time::now_ms;
use crate::domain::JobRetryPolicy;
use crate::queue::job::{DeliveryJob, QueueStats};
use crate::{Error, Result};

/// How long finished jobs are kept for observability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetentionPolicy {
    #[serde(default = "default_completed_max_age_secs")]
    pub completed_max_age_secs: u64,
    #[serde(default = "default_completed_max_count")]
    pub completed_max_count: u64,
    #[serde(default = "default_failed_max_age_secs")]
    pub failed_max_age_secs: u64,
    /// How often the distributed backend prunes.
    #[serde(default = "default_prune_interval_secs")]
    pub prune_interval_secs: u64,
}

fn default_completed_max_age_secs() -> u64 {
    3600
}

fn default_completed_max_count() -> u64 {
    1000
}

fn default_failed_max_age_secs() -> u64 {
    86_400
}

fn default_prune_interval_secs() -> u64 {
    60
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            completed_max_age_secs: default_completed_max_age_secs(),
            completed_max_count: default_completed_max_count(),
            failed_max_age_secs: default_failed_max_age_secs(),
            prune_interval_secs: default_prune_interval_secs(),
        }
    }
}

/// A job claimed by a worker.
#[derive(Debug, Clone)]
pub struct ClaimedJob {
    pub id: String,
    pub job: DeliveryJob,
    /// Attempts including the current one.
    pub attempts_made: u32,
    pub max_attempts: u32,
}

/// Durable delivery job broker.
pub struct JobBroker {
    repo: Arc<dyn DeliveryJobRepository>,
    policy: JobRetryPolicy,
    retention: RetentionPolicy,
    notify: Arc<Notify>,
}

impl JobBroker {
    pub fn new(
        repo: Arc<dyn DeliveryJobRepository>,
        policy: JobRetryPolicy,
        retention: RetentionPolicy,
    ) -> Self {
        Self {
            repo,
            policy,
            retention,
            notify: Arc::new(Notify::new()),
        }
    }

    /// Notifier woken on every enqueue.
    pub fn notifier(&self) -> Arc<Notify> {
        self.notify.clone()
    }

    pub fn retention(&self) -> &RetentionPolicy {
        &self.retention
    }

    /// Durably store a job and wake a worker.
    pub async fn enqueue(&self, job: &DeliveryJob) -> Result<String> {
        let channels = serde_json::to_string(&job.channels)?;
        let row = DeliveryJobDbModel::new(
            &job.alert_id,
            channels,
            job.is_retry,
            self.policy.max_attempts(job.is_retry),
        );

        self.repo
            .insert(&row)
            .await
            .map_err(|e| Error::QueueUnavailable(format!("failed to store delivery job: {e}")))?;

        debug!(job_id = %row.id, alert_id = %job.alert_id, is_retry = job.is_retry, "Delivery job enqueued");
        self.notify.notify_one();
        Ok(row.id)
    }

    /// Claim the next due job. Rows that cannot be decoded are failed and skipped.
    pub async fn claim(&self) -> Result<Option<ClaimedJob>> {
        loop {
            let Some(row) =
                retry_on_sqlite_busy("claim_delivery_job", || self.repo.claim_next()).await?
            else {
                return Ok(None);
            };

            match serde_json::from_str::<Vec<String>>(&row.channels) {
                Ok(channels) => {
                    return Ok(Some(ClaimedJob {
                        job: DeliveryJob::new(row.alert_id, channels, row.is_retry),
                        id: row.id,
                        attempts_made: u32::try_from(row.attempts_made).unwrap_or(u32::MAX),
                        max_attempts: u32::try_from(row.max_attempts).unwrap_or(1),
                    }));
                }
                Err(e) => {
                    error!(job_id = %row.id, error = %e, "Undecodable delivery job, failing it");
                    self.repo
                        .mark_failed(&row.id, &format!("invalid channels payload: {e}"))
                        .await?;
                }
            }
        }
    }

    /// Record the result of processing a claimed job.
    pub async fn settle(&self, claimed: &ClaimedJob, result: std::result::Result<(), String>) -> Result<()> {
        match result {
            Ok(()) => self.repo.mark_completed(&claimed.id).await,
            Err(message) if self.policy.should_retry(claimed.attempts_made, claimed.max_attempts) => {
                let delay = self.policy.delay_for_attempt(claimed.attempts_made);
                let available_at = now_ms() + i64::try_from(delay.as_millis()).unwrap_or(i64::MAX / 2);
                warn!(
                    job_id = %claimed.id,
                    alert_id = %claimed.job.alert_id,
                    attempt = claimed.attempts_made,
                    max_attempts = claimed.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %message,
                    "Delivery job failed, scheduling retry"
                );
                self.repo.schedule_retry(&claimed.id, available_at, &message).await
            }
            Err(message) => {
                error!(
                    job_id = %claimed.id,
                    alert_id = %claimed.job.alert_id,
                    attempts = claimed.attempts_made,
                    error = %message,
                    "Delivery job failed permanently"
                );
                self.repo.mark_failed(&claimed.id, &message).await
            }
        }
    }

    /// Return jobs stranded in `PROCESSING` to `PENDING`.
    ///
    /// Only claims older than `lease` are touched. Workers bound every job
    /// by a timeout shorter than the lease, so a claim that old belongs to a
    /// process that died. Other instances sharing the broker keep their
    /// in-flight jobs.
    pub async fn recover(&self, lease: Duration) -> Result<u64> {
        let lease_ms = i64::try_from(lease.as_millis()).unwrap_or(i64::MAX);
        let reset = self
            .repo
            .reset_processing(now_ms().saturating_sub(lease_ms))
            .await?;
        if reset > 0 {
            info!(count = reset, "Recovered delivery jobs left in processing");
        }
        Ok(reset)
    }

    pub async fn stats(&self) -> Result<QueueStats> {
        let counts = self.repo.counts().await?;
        Ok(QueueStats {
            pending: counts.pending,
            processing: counts.processing,
            completed: counts.completed,
            failed: counts.failed,
        })
    }

    /// Apply the retention policy once.
    pub async fn prune(&self) -> Result<u64> {
        let now = now_ms();
        let completed_before = now - secs_to_ms(self.retention.completed_max_age_secs);
        let failed_before = now - secs_to_ms(self.retention.failed_max_age_secs);
        let removed = self
            .repo
            .prune(completed_before, self.retention.completed_max_count, failed_before)
            .await?;
        if removed > 0 {
            debug!(removed, "Pruned finished delivery jobs");
        }
        Ok(removed)
    }

    /// Delete all finished jobs.
    pub async fn clear(&self) -> Result<u64> {
        self.repo.clear_finished().await
    }
}

fn secs_to_ms(secs: u64) -> i64 {
    i64::try_from(Duration::from_secs(secs).as_millis()).unwrap_or(i64::MAX / 2)
}
