//! Queue backend abstraction.

use async_trait::async_trait;

use crate::Result;
use crate::queue::job::{DeliveryJob, QueueMode, QueueStats};

/// A delivery queue implementation. Callers never branch on the mode.
#[async_trait]
pub trait QueueBackend: Send + Sync {
    fn mode(&self) -> QueueMode;

    /// Start background work, if any.
    async fn start(&self) -> Result<()>;

    /// Stop background work and wait for in-flight jobs.
    async fn stop(&self);

    async fn enqueue(&self, job: DeliveryJob) -> Result<()>;

    async fn stats(&self) -> Result<QueueStats>;

    /// Drop finished jobs. Returns how many were removed.
    async fn clear(&self) -> Result<u64>;
}
