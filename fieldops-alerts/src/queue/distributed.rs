//! Durable backend: SQLite broker plus worker pool.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::backend::QueueBackend;
use super::broker::JobBroker;
use super::job::{DeliveryJob, QueueMode, QueueStats};
use super::processor::DeliveryProcessor;
use super::worker_pool::{WorkerPool, WorkerPoolConfig};
use crate::Result;

/// Margin on top of the job timeout before a claim counts as orphaned.
const CLAIM_LEASE_GRACE: Duration = Duration::from_secs(30);

pub struct DistributedBackend {
    broker: Arc<JobBroker>,
    processor: Arc<DeliveryProcessor>,
    claim_lease: Duration,
    pool: WorkerPool,
    cancel: CancellationToken,
    pruner: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl DistributedBackend {
    pub fn new(
        broker: Arc<JobBroker>,
        processor: Arc<DeliveryProcessor>,
        pool_config: WorkerPoolConfig,
    ) -> Self {
        Self {
            broker,
            processor,
            claim_lease: Duration::from_secs(pool_config.job_timeout_secs) + CLAIM_LEASE_GRACE,
            pool: WorkerPool::with_config(pool_config),
            cancel: CancellationToken::new(),
            pruner: parking_lot::Mutex::new(None),
        }
    }

    pub fn broker(&self) -> &Arc<JobBroker> {
        &self.broker
    }

    /// Periodic housekeeping: retention pruning and recovery of claims
    /// orphaned by crashed workers.
    fn spawn_pruner(&self) -> JoinHandle<()> {
        let broker = self.broker.clone();
        let cancel = self.cancel.clone();
        let claim_lease = self.claim_lease;
        let interval = Duration::from_secs(broker.retention().prune_interval_secs.max(1));

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = broker.prune().await {
                            warn!(error = %e, "Failed to prune delivery jobs");
                        }
                        if let Err(e) = broker.recover(claim_lease).await {
                            warn!(error = %e, "Failed to recover orphaned delivery jobs");
                        }
                    }
                }
            }
            debug!("Delivery job pruner stopped");
        })
    }
}

#[async_trait]
impl QueueBackend for DistributedBackend {
    fn mode(&self) -> QueueMode {
        QueueMode::Distributed
    }

    async fn start(&self) -> Result<()> {
        self.broker.recover(self.claim_lease).await?;
        self.pool.start(self.broker.clone(), self.processor.clone());

        let mut pruner = self.pruner.lock();
        if pruner.is_none() {
            *pruner = Some(self.spawn_pruner());
        }
        info!("Distributed delivery queue started");
        Ok(())
    }

    async fn stop(&self) {
        self.pool.stop().await;
        self.cancel.cancel();
        let pruner = self.pruner.lock().take();
        if let Some(handle) = pruner {
            let _ = handle.await;
        }
        info!("Distributed delivery queue stopped");
    }

    async fn enqueue(&self, job: DeliveryJob) -> Result<()> {
        self.broker.enqueue(&job).await.map(|_| ())
    }

    async fn stats(&self) -> Result<QueueStats> {
        self.broker.stats().await
    }

    async fn clear(&self) -> Result<u64> {
        self.broker.clear().await
    }
}
