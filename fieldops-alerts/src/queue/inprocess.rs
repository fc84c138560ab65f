//! Degraded backend: deliver synchronously in the caller's task.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tracing::{error, warn};

use super::backend::QueueBackend;
use super::job::{DeliveryJob, QueueMode, QueueStats};
use super::processor::DeliveryProcessor;
use crate::Result;

/// Runs `process_job` inside `enqueue`. No durability, no retries.
pub struct InProcessBackend {
    processor: Arc<DeliveryProcessor>,
    processing: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
}

impl InProcessBackend {
    pub fn new(processor: Arc<DeliveryProcessor>) -> Self {
        Self {
            processor,
            processing: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }
}

#[async_trait]
impl QueueBackend for InProcessBackend {
    fn mode(&self) -> QueueMode {
        QueueMode::InProcess
    }

    async fn start(&self) -> Result<()> {
        warn!("Delivery queue running in-process: jobs are not durable and enqueue blocks");
        Ok(())
    }

    async fn stop(&self) {}

    async fn enqueue(&self, job: DeliveryJob) -> Result<()> {
        self.processing.fetch_add(1, Ordering::SeqCst);
        let result = self.processor.process_job(&job).await;
        self.processing.fetch_sub(1, Ordering::SeqCst);

        match result {
            Ok(_) => {
                self.completed.fetch_add(1, Ordering::SeqCst);
            }
            Err(e) => {
                // Nothing would retry it; the caller must not see the failure.
                error!(alert_id = %job.alert_id, error = %e, "In-process delivery failed");
                self.failed.fetch_add(1, Ordering::SeqCst);
            }
        }
        Ok(())
    }

    async fn stats(&self) -> Result<QueueStats> {
        Ok(QueueStats {
            pending: 0,
            processing: self.processing.load(Ordering::SeqCst),
            completed: self.completed.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
        })
    }

    async fn clear(&self) -> Result<u64> {
        let completed = self.completed.swap(0, Ordering::SeqCst);
        let failed = self.failed.swap(0, Ordering::SeqCst);
        Ok(completed + failed)
    }
}
