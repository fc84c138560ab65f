//! Worker pool draining the durable broker.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::broker::{ClaimedJob, JobBroker};
use super::processor::DeliveryProcessor;

/// Configuration for a worker pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerPoolConfig {
    /// Maximum concurrent deliveries.
    pub concurrency: usize,
    /// Job timeout in seconds.
    ///
    /// Senders enforce their own timeouts; this only bounds a job whose
    /// persistence hangs.
    pub job_timeout_secs: u64,
    /// Poll interval in milliseconds.
    pub poll_interval_ms: u64,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            concurrency: 5,
            job_timeout_secs: 300,
            poll_interval_ms: 500,
        }
    }
}

/// A pool of delivery workers.
pub struct WorkerPool {
    config: WorkerPoolConfig,
    /// Semaphore for concurrency control.
    semaphore: Arc<Semaphore>,
    /// Jobs currently being processed.
    active_workers: Arc<AtomicUsize>,
    cancellation_token: CancellationToken,
    tasks: parking_lot::Mutex<Option<JoinSet<()>>>,
}

impl WorkerPool {
    pub fn new() -> Self {
        Self::with_config(WorkerPoolConfig::default())
    }

    pub fn with_config(config: WorkerPoolConfig) -> Self {
        let concurrency = config.concurrency.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(concurrency)),
            config: WorkerPoolConfig {
                concurrency,
                ..config
            },
            active_workers: Arc::new(AtomicUsize::new(0)),
            cancellation_token: CancellationToken::new(),
            tasks: parking_lot::Mutex::new(Some(JoinSet::new())),
        }
    }

    /// Spawn the workers.
    pub fn start(&self, broker: Arc<JobBroker>, processor: Arc<DeliveryProcessor>) {
        let poll_interval = Duration::from_millis(self.config.poll_interval_ms);
        let job_timeout = Duration::from_secs(self.config.job_timeout_secs);

        info!(
            concurrency = self.config.concurrency,
            "Starting delivery worker pool"
        );

        let mut tasks = self.tasks.lock();
        let Some(join_set) = tasks.as_mut() else {
            warn!("Worker pool already stopped, not starting");
            return;
        };

        for i in 0..self.config.concurrency {
            let semaphore = self.semaphore.clone();
            let cancellation_token = self.cancellation_token.clone();
            let active_workers = self.active_workers.clone();
            let broker = broker.clone();
            let processor = processor.clone();
            let notifier = broker.notifier();

            join_set.spawn(async move {
                debug!(worker = i, "Delivery worker started");
                // After a processed job, look for the next one right away.
                let mut skip_wait = false;

                loop {
                    if cancellation_token.is_cancelled() {
                        break;
                    }

                    if !skip_wait {
                        tokio::select! {
                            _ = cancellation_token.cancelled() => break,
                            _ = notifier.notified() => {}
                            _ = tokio::time::sleep(poll_interval) => {}
                        }
                    }
                    skip_wait = false;

                    let Ok(permit) = semaphore.clone().try_acquire_owned() else {
                        continue;
                    };

                    let claimed = match broker.claim().await {
                        Ok(Some(claimed)) => claimed,
                        Ok(None) => continue,
                        Err(e) => {
                            error!(worker = i, error = %e, "Error claiming delivery job");
                            continue;
                        }
                    };

                    active_workers.fetch_add(1, Ordering::SeqCst);
                    run_job(&broker, &processor, &claimed, job_timeout).await;
                    active_workers.fetch_sub(1, Ordering::SeqCst);
                    drop(permit);
                    skip_wait = true;
                }

                debug!(worker = i, "Delivery worker shutting down");
            });
        }
    }

    /// Stop the pool and wait for in-flight jobs.
    pub async fn stop(&self) {
        info!("Stopping delivery worker pool");
        self.cancellation_token.cancel();

        // Take the join set out of the mutex before awaiting
        let join_set = self.tasks.lock().take();

        if let Some(mut join_set) = join_set {
            while join_set.join_next().await.is_some() {}
        }

        info!("Delivery worker pool stopped");
    }

    /// Number of jobs being processed right now.
    pub fn active_count(&self) -> usize {
        self.active_workers.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        !self.cancellation_token.is_cancelled()
    }
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new()
    }
}

async fn run_job(
    broker: &JobBroker,
    processor: &DeliveryProcessor,
    claimed: &ClaimedJob,
    job_timeout: Duration,
) {
    debug!(
        job_id = %claimed.id,
        alert_id = %claimed.job.alert_id,
        attempt = claimed.attempts_made,
        "Processing delivery job"
    );

    let result = match tokio::time::timeout(job_timeout, processor.process_job(&claimed.job)).await
    {
        Ok(Ok(outcome)) => {
            if let super::processor::DeliveryOutcome::Dropped(reason) = &outcome {
                debug!(job_id = %claimed.id, reason = %reason, "Delivery job dropped");
            }
            Ok(())
        }
        Ok(Err(e)) => Err(e.to_string()),
        Err(_) => Err(format!("job timed out after {}s", job_timeout.as_secs())),
    };

    if let Err(e) = broker.settle(claimed, result).await {
        error!(job_id = %claimed.id, error = %e, "Failed to record delivery job result");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::repositories::SqlxDeliveryJobRepository;
    use crate::database::test_support::memory_broker_pool;
    use crate::domain::{Alert, ContactInfo, DeliveryState, JobRetryPolicy};
    use crate::error::DeliveryError;
    use crate::notification::{ChannelSender, SenderFactory};
    use crate::queue::broker::RetentionPolicy;
    use crate::queue::job::DeliveryJob;
    use crate::testing::{self, MemoryAlertRepository, StaticRecipients};
    use async_trait::async_trait;

    /// Sender that records the highest number of overlapping sends.
    #[derive(Default)]
    struct ConcurrencyProbe {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl ChannelSender for ConcurrencyProbe {
        fn channel(&self) -> &str {
            "in_app"
        }

        async fn send(&self, _: &Alert, _: &ContactInfo) -> Result<(), DeliveryError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn test_worker_pool_config_default() {
        let config = WorkerPoolConfig::default();
        assert_eq!(config.concurrency, 5);
        let pool = WorkerPool::with_config(WorkerPoolConfig {
            concurrency: 0,
            ..config
        });
        assert!(pool.is_running());
        assert_eq!(pool.active_count(), 0);
    }

    #[tokio::test]
    async fn test_pool_delivers_with_bounded_concurrency() {
        let probe = Arc::new(ConcurrencyProbe::default());
        let alerts = MemoryAlertRepository::new();
        let processor = Arc::new(DeliveryProcessor::new(
            alerts.clone(),
            StaticRecipients::with([testing::contact("tech-1")]),
            Arc::new(SenderFactory::new().with_sender(probe.clone())),
        ));
        let broker = Arc::new(JobBroker::new(
            Arc::new(SqlxDeliveryJobRepository::new(memory_broker_pool().await)),
            JobRetryPolicy::default(),
            RetentionPolicy::default(),
        ));

        let mut ids = Vec::new();
        for _ in 0..6 {
            let alert = alerts.insert(testing::alert("tech-1", &["in_app"])).await;
            broker
                .enqueue(&DeliveryJob::first_attempt(alert.id(), ["in_app"]))
                .await
                .unwrap();
            ids.push(alert.id().to_string());
        }

        let pool = WorkerPool::with_config(WorkerPoolConfig {
            concurrency: 2,
            job_timeout_secs: 5,
            poll_interval_ms: 10,
        });
        pool.start(broker.clone(), processor);

        tokio::time::timeout(Duration::from_secs(10), async {
            while broker.stats().await.unwrap().completed < 6 {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .unwrap();
        pool.stop().await;

        assert!(probe.peak.load(Ordering::SeqCst) <= 2);
        for id in ids {
            assert_eq!(alerts.get(&id).unwrap().state(), DeliveryState::Sent);
        }
        assert!(!pool.is_running());
    }
}
