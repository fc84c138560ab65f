//! Service container for dependency injection.
//!
//! The ServiceContainer builds every alert delivery service once and
//! manages their lifecycle.

use std::sync::Arc;
use std::time::Duration;

use sqlx::SqlitePool;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::Result;
use crate::config::AppConfig;
use crate::database::repositories::{SqlxAlertRepository, SqlxRecipientDirectory};
use crate::domain::AlertEvent;
use crate::notification::SenderFactory;
use crate::queue::{DeliveryProcessor, DeliveryQueue, QueueStats};
use crate::scheduler::SweepScheduler;
use crate::usecases::{MarkAlertRead, RetrySweep};

/// Default shutdown timeout.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

pub struct ServiceContainer {
    pool: SqlitePool,
    alerts: Arc<SqlxAlertRepository>,
    recipients: Arc<SqlxRecipientDirectory>,
    processor: Arc<DeliveryProcessor>,
    queue: Arc<DeliveryQueue>,
    retry_sweep: Arc<RetrySweep>,
    mark_read: Arc<MarkAlertRead>,
    scheduler: Arc<SweepScheduler>,
    scheduler_task: parking_lot::Mutex<Option<JoinHandle<()>>>,
    cancellation_token: CancellationToken,
}

impl ServiceContainer {
    /// Wire all services against a migrated alert store.
    pub async fn new(pool: SqlitePool, config: &AppConfig) -> Result<Self> {
        let cancellation_token = CancellationToken::new();

        let alerts = Arc::new(SqlxAlertRepository::new(pool.clone()));
        let recipients = Arc::new(SqlxRecipientDirectory::new(pool.clone()));
        let senders = Arc::new(SenderFactory::from_config(&config.channels, pool.clone())?);

        let processor = Arc::new(DeliveryProcessor::new(
            alerts.clone(),
            recipients.clone(),
            senders,
        ));
        let queue = Arc::new(DeliveryQueue::init(&config.queue, processor.clone()).await);

        let retry_sweep = Arc::new(
            RetrySweep::new(alerts.clone(), queue.clone())
                .with_stale_after(Duration::from_secs(config.stale_pending_secs)),
        );
        let mark_read = Arc::new(MarkAlertRead::new(alerts.clone()));
        let scheduler = Arc::new(SweepScheduler::new(
            retry_sweep.clone(),
            &config.retry_sweep_cron,
            cancellation_token.child_token(),
        )?);

        Ok(Self {
            pool,
            alerts,
            recipients,
            processor,
            queue,
            retry_sweep,
            mark_read,
            scheduler,
            scheduler_task: parking_lot::Mutex::new(None),
            cancellation_token,
        })
    }

    /// Start the delivery queue and the sweep scheduler.
    pub async fn initialize(&self) -> Result<()> {
        self.queue.start().await?;

        let mut task = self.scheduler_task.lock();
        if task.is_none() {
            *task = Some(self.scheduler.clone().start());
        }

        info!(queue_mode = %self.queue.mode(), "Services initialized");
        Ok(())
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.shutdown_with_timeout(DEFAULT_SHUTDOWN_TIMEOUT).await
    }

    /// Stop the scheduler, drain the queue and close the pool.
    pub async fn shutdown_with_timeout(&self, timeout: Duration) -> Result<()> {
        info!("Shutting down services (timeout: {:?})", timeout);
        self.cancellation_token.cancel();

        let drained = tokio::time::timeout(timeout, async {
            let task = self.scheduler_task.lock().take();
            if let Some(task) = task {
                let _ = task.await;
            }
            self.queue.stop().await;
        })
        .await;

        if drained.is_err() {
            warn!("Shutdown timeout reached, forcing shutdown");
        }

        self.pool.close().await;
        info!("Services shut down");
        Ok(())
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation_token.clone()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.cancellation_token.is_cancelled()
    }

    pub fn alerts(&self) -> &Arc<SqlxAlertRepository> {
        &self.alerts
    }

    pub fn recipients(&self) -> &Arc<SqlxRecipientDirectory> {
        &self.recipients
    }

    pub fn queue(&self) -> &Arc<DeliveryQueue> {
        &self.queue
    }

    pub fn retry_sweep(&self) -> &Arc<RetrySweep> {
        &self.retry_sweep
    }

    pub fn mark_read(&self) -> &Arc<MarkAlertRead> {
        &self.mark_read
    }

    pub async fn queue_stats(&self) -> QueueStats {
        self.queue.get_queue_stats().await
    }

    pub fn subscribe_alert_events(&self) -> broadcast::Receiver<AlertEvent> {
        self.processor.subscribe()
    }
}
