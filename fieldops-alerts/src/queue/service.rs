//! Delivery queue service.
//!
//! The backend is chosen once in [`DeliveryQueue::init`]. A distributed
//! queue whose broker cannot be opened degrades to in-process delivery
//! instead of failing startup.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use super::backend::QueueBackend;
use super::broker::{JobBroker, RetentionPolicy};
use super::distributed::DistributedBackend;
use super::inprocess::InProcessBackend;
use super::job::{DeliveryJob, QueueMode, QueueStats};
use super::processor::DeliveryProcessor;
use super::worker_pool::WorkerPoolConfig;
use crate::database::repositories::SqlxDeliveryJobRepository;
use crate::database::{self, DbPool};
use crate::domain::JobRetryPolicy;
use crate::Result;

/// Delivery queue configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    #[serde(default)]
    pub mode: QueueMode,
    /// Broker database URL.
    pub broker_url: String,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_job_timeout_secs")]
    pub job_timeout_secs: u64,
    #[serde(default)]
    pub retry_policy: JobRetryPolicy,
    #[serde(default)]
    pub retention: RetentionPolicy,
}

fn default_concurrency() -> usize {
    5
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_job_timeout_secs() -> u64 {
    300
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            mode: QueueMode::default(),
            broker_url: "sqlite:fieldops-alerts-queue.db?mode=rwc".to_string(),
            concurrency: default_concurrency(),
            poll_interval_ms: default_poll_interval_ms(),
            job_timeout_secs: default_job_timeout_secs(),
            retry_policy: JobRetryPolicy::default(),
            retention: RetentionPolicy::default(),
        }
    }
}

impl QueueConfig {
    fn worker_pool_config(&self) -> WorkerPoolConfig {
        WorkerPoolConfig {
            concurrency: self.concurrency,
            job_timeout_secs: self.job_timeout_secs,
            poll_interval_ms: self.poll_interval_ms,
        }
    }
}

/// Producer-side view of the queue.
#[async_trait]
pub trait DeliveryEnqueuer: Send + Sync {
    async fn enqueue(&self, job: DeliveryJob) -> Result<()>;
}

/// Process-scoped delivery queue.
pub struct DeliveryQueue {
    backend: Arc<dyn QueueBackend>,
}

impl DeliveryQueue {
    /// Resolve the backend for `config`.
    pub async fn init(config: &QueueConfig, processor: Arc<DeliveryProcessor>) -> Self {
        let backend: Arc<dyn QueueBackend> = match config.mode {
            QueueMode::InProcess => Arc::new(InProcessBackend::new(processor)),
            QueueMode::Distributed => match open_broker(&config.broker_url).await {
                Ok(pool) => {
                    let broker = JobBroker::new(
                        Arc::new(SqlxDeliveryJobRepository::new(pool)),
                        config.retry_policy.clone(),
                        config.retention.clone(),
                    );
                    Arc::new(DistributedBackend::new(
                        Arc::new(broker),
                        processor,
                        config.worker_pool_config(),
                    ))
                }
                Err(e) => {
                    warn!(
                        broker_url = %config.broker_url,
                        error = %e,
                        "Job broker unavailable, falling back to in-process delivery"
                    );
                    Arc::new(InProcessBackend::new(processor))
                }
            },
        };

        info!(mode = %backend.mode(), "Delivery queue initialized");
        Self { backend }
    }

    pub fn with_backend(backend: Arc<dyn QueueBackend>) -> Self {
        Self { backend }
    }

    pub fn mode(&self) -> QueueMode {
        self.backend.mode()
    }

    pub async fn start(&self) -> Result<()> {
        self.backend.start().await
    }

    pub async fn stop(&self) {
        self.backend.stop().await;
    }

    pub async fn enqueue(&self, job: DeliveryJob) -> Result<()> {
        self.backend.enqueue(job).await
    }

    /// Current job counts. Zeros when the backend cannot report.
    pub async fn get_queue_stats(&self) -> QueueStats {
        match self.backend.stats().await {
            Ok(stats) => stats,
            Err(e) => {
                error!(error = %e, "Failed to read queue stats");
                QueueStats::default()
            }
        }
    }

    /// Remove finished jobs.
    pub async fn clear_queue(&self) -> Result<u64> {
        let removed = self.backend.clear().await?;
        info!(removed, "Delivery queue cleared");
        Ok(removed)
    }
}

#[async_trait]
impl DeliveryEnqueuer for DeliveryQueue {
    async fn enqueue(&self, job: DeliveryJob) -> Result<()> {
        DeliveryQueue::enqueue(self, job).await
    }
}

async fn open_broker(url: &str) -> Result<DbPool> {
    let pool = database::init_pool(url).await?;
    database::run_broker_migrations(&pool).await?;
    Ok(pool)
}
