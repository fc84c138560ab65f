//! Integration tests for alert delivery.
//!
//! These tests use a real SQLite database (in-memory, or a temp file for
//! the distributed queue) with the actual schema, and scripted senders in
//! place of external transports.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use fieldops_alerts::database::repositories::{
    AlertRepository, RecipientDirectory, SqlxAlertRepository, SqlxDeliveryJobRepository,
    SqlxRecipientDirectory,
};
use fieldops_alerts::database::{DbPool, init_pool, init_pool_with_size, run_migrations};
use fieldops_alerts::domain::{
    Alert, AlertKind, AlertPayload, AlertPriority, ContactInfo, DeliveryState, JobRetryPolicy,
    MAX_ATTEMPTS,
};
use fieldops_alerts::error::DeliveryError;
use fieldops_alerts::notification::{ChannelSender, SenderFactory};
use fieldops_alerts::queue::{
    DeliveryJob, DeliveryProcessor, DeliveryQueue, InProcessBackend, JobBroker, QueueConfig,
    QueueMode, QueueStats, RetentionPolicy,
};
use fieldops_alerts::usecases::{MarkAlertRead, RetrySweep};
use fieldops_alerts::Error;

/// Helper to create a test database pool with migrations applied.
async fn setup_test_db() -> DbPool {
    let pool = init_pool_with_size("sqlite::memory:", 1)
        .await
        .expect("Failed to create test pool");

    run_migrations(&pool)
        .await
        .expect("Failed to run migrations");

    pool
}

/// Sender whose result can be flipped between calls.
struct ToggleSender {
    channel: &'static str,
    succeed: AtomicBool,
    calls: AtomicUsize,
}

impl ToggleSender {
    fn new(channel: &'static str, succeed: bool) -> Arc<Self> {
        Arc::new(Self {
            channel,
            succeed: AtomicBool::new(succeed),
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChannelSender for ToggleSender {
    fn channel(&self) -> &str {
        self.channel
    }

    async fn send(&self, _alert: &Alert, _recipient: &ContactInfo) -> Result<(), DeliveryError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.succeed.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(DeliveryError::transport(self.channel, "gateway returned 503"))
        }
    }
}

struct Harness {
    alerts: Arc<SqlxAlertRepository>,
    queue: Arc<DeliveryQueue>,
    sweep: RetrySweep,
}

async fn harness(pool: DbPool, senders: &[Arc<ToggleSender>]) -> Harness {
    let alerts = Arc::new(SqlxAlertRepository::new(pool.clone()));
    let recipients = Arc::new(SqlxRecipientDirectory::new(pool));
    recipients
        .upsert(
            &ContactInfo::new("tech-7")
                .with_email("tech7@example.com")
                .with_phone("+56911111111")
                .with_push_token("device-7"),
        )
        .await
        .unwrap();

    let factory = senders.iter().fold(SenderFactory::new(), |f, s| {
        f.with_sender(s.clone() as Arc<dyn ChannelSender>)
    });
    let processor = Arc::new(DeliveryProcessor::new(
        alerts.clone(),
        recipients,
        Arc::new(factory),
    ));
    let queue = Arc::new(DeliveryQueue::with_backend(Arc::new(InProcessBackend::new(
        processor,
    ))));
    let sweep = RetrySweep::new(alerts.clone(), queue.clone());

    Harness {
        alerts,
        queue,
        sweep,
    }
}

async fn create_alert(alerts: &SqlxAlertRepository, channels: &[&str]) -> Alert {
    let payload = AlertPayload::new(
        AlertKind::OverdueInvoice,
        AlertPriority::Error,
        "Invoice overdue",
        "Invoice F-1029 for contract C-88 is 30 days overdue",
    )
    .unwrap();
    let mut alert = Alert::new("tech-7", channels.iter().copied(), payload).unwrap();
    alerts.save(&mut alert).await.unwrap();
    alert
}

async fn reload(alerts: &SqlxAlertRepository, id: &str) -> Alert {
    alerts.find_by_id(id).await.unwrap().expect("alert exists")
}

mod delivery_tests {
    use super::*;

    #[tokio::test]
    async fn test_in_process_enqueue_records_every_channel() {
        let email = ToggleSender::new("email", false);
        let push = ToggleSender::new("push", false);
        let h = harness(setup_test_db().await, &[email.clone(), push.clone()]).await;
        let alert = create_alert(&h.alerts, &["email", "push"]).await;

        h.queue
            .enqueue(DeliveryJob::first_attempt(alert.id(), alert.channels()))
            .await
            .unwrap();

        let stored = reload(&h.alerts, alert.id()).await;
        for channel in ["email", "push"] {
            let outcome = stored.outcome(channel).expect("channel attempted");
            assert!(!outcome.delivered);
            assert!(outcome.attempted_at.is_some());
        }
        assert_eq!(stored.state(), DeliveryState::Failed);
        assert_eq!(stored.attempts(), 0);
    }

    #[tokio::test]
    async fn test_email_ok_sms_failing_is_sent() {
        let email = ToggleSender::new("email", true);
        let sms = ToggleSender::new("sms", false);
        let h = harness(setup_test_db().await, &[email.clone(), sms.clone()]).await;
        let alert = create_alert(&h.alerts, &["email", "sms"]).await;

        h.queue
            .enqueue(DeliveryJob::first_attempt(alert.id(), ["email", "sms"]))
            .await
            .unwrap();

        let stored = reload(&h.alerts, alert.id()).await;
        assert_eq!(stored.state(), DeliveryState::Sent);
        assert!(stored.outcome("email").unwrap().delivered);
        assert!(!stored.outcome("sms").unwrap().delivered);
        assert_eq!(
            stored.outcome("sms").unwrap().last_error.as_deref(),
            Some("sms transport error: gateway returned 503")
        );
        assert!(stored.sent_at().is_some());
        assert_eq!(email.calls(), 1);
        assert_eq!(sms.calls(), 1);
    }

    #[tokio::test]
    async fn test_unknown_channel_drops_job() {
        let email = ToggleSender::new("email", true);
        let h = harness(setup_test_db().await, &[email.clone()]).await;
        let alert = create_alert(&h.alerts, &["email", "carrier_pigeon"]).await;

        h.queue
            .enqueue(DeliveryJob::first_attempt(alert.id(), ["email", "carrier_pigeon"]))
            .await
            .unwrap();

        let stored = reload(&h.alerts, alert.id()).await;
        assert!(stored.outcome("carrier_pigeon").is_none());
        assert_eq!(stored.state(), DeliveryState::Pending);
        assert_eq!(email.calls(), 0);
        // Dropped jobs still count as handled.
        assert_eq!(h.queue.get_queue_stats().await.completed, 1);
    }

    #[tokio::test]
    async fn test_job_for_deleted_alert_is_dropped() {
        let email = ToggleSender::new("email", true);
        let h = harness(setup_test_db().await, &[email.clone()]).await;

        h.queue
            .enqueue(DeliveryJob::first_attempt("does-not-exist", ["email"]))
            .await
            .unwrap();
        assert_eq!(email.calls(), 0);
    }
}

mod sweep_tests {
    use super::*;

    #[tokio::test]
    async fn test_push_failing_three_sweeps_exhausts_budget() {
        let push = ToggleSender::new("push", false);
        let h = harness(setup_test_db().await, &[push.clone()]).await;
        let alert = create_alert(&h.alerts, &["push"]).await;

        h.queue
            .enqueue(DeliveryJob::first_attempt(alert.id(), ["push"]))
            .await
            .unwrap();
        assert_eq!(reload(&h.alerts, alert.id()).await.state(), DeliveryState::Failed);

        for cycle in 1..=MAX_ATTEMPTS {
            let report = h.sweep.execute().await.unwrap();
            assert_eq!(report.retried, 1, "sweep {cycle} should retry the alert");
            assert_eq!(reload(&h.alerts, alert.id()).await.attempts(), cycle);
        }

        let stored = reload(&h.alerts, alert.id()).await;
        assert_eq!(stored.attempts(), MAX_ATTEMPTS);
        assert_eq!(stored.state(), DeliveryState::Exhausted);
        assert!(h.alerts.find_failed_retryable().await.unwrap().is_empty());

        let report = h.sweep.execute().await.unwrap();
        assert_eq!(report.retried, 0);
        assert_eq!(push.calls(), 1 + MAX_ATTEMPTS as usize);
    }

    /// Directory that errors until it is switched back on.
    struct FlakyDirectory {
        inner: SqlxRecipientDirectory,
        down: AtomicBool,
    }

    #[async_trait]
    impl RecipientDirectory for FlakyDirectory {
        async fn get_contact_info(
            &self,
            user_id: &str,
        ) -> fieldops_alerts::Result<Option<ContactInfo>> {
            if self.down.load(Ordering::SeqCst) {
                return Err(Error::Other("directory unavailable".into()));
            }
            self.inner.get_contact_info(user_id).await
        }
    }

    #[tokio::test]
    async fn test_recipient_outage_is_retried_by_sweep() {
        let pool = setup_test_db().await;
        let email = ToggleSender::new("email", true);
        let alerts = Arc::new(SqlxAlertRepository::new(pool.clone()));
        let inner = SqlxRecipientDirectory::new(pool);
        inner
            .upsert(&ContactInfo::new("tech-7").with_email("tech7@example.com"))
            .await
            .unwrap();
        let directory = Arc::new(FlakyDirectory {
            inner,
            down: AtomicBool::new(true),
        });
        let processor = Arc::new(DeliveryProcessor::new(
            alerts.clone(),
            directory.clone(),
            Arc::new(SenderFactory::new().with_sender(email.clone())),
        ));
        let queue = Arc::new(DeliveryQueue::with_backend(Arc::new(InProcessBackend::new(
            processor,
        ))));
        let sweep = RetrySweep::new(alerts.clone(), queue.clone());

        let alert = create_alert(&alerts, &["email"]).await;
        queue
            .enqueue(DeliveryJob::first_attempt(alert.id(), ["email"]))
            .await
            .unwrap();
        assert_eq!(reload(&alerts, alert.id()).await.state(), DeliveryState::Failed);
        assert_eq!(email.calls(), 0);

        directory.down.store(false, Ordering::SeqCst);
        let report = sweep.execute().await.unwrap();
        assert_eq!(report.retried, 1);

        let stored = reload(&alerts, alert.id()).await;
        assert_eq!(stored.state(), DeliveryState::Sent);
        assert_eq!(stored.attempts(), 1);
        assert_eq!(email.calls(), 1);
    }

    #[tokio::test]
    async fn test_sweep_recovers_when_channel_comes_back() {
        let sms = ToggleSender::new("sms", false);
        let h = harness(setup_test_db().await, &[sms.clone()]).await;
        let alert = create_alert(&h.alerts, &["sms"]).await;

        h.queue
            .enqueue(DeliveryJob::first_attempt(alert.id(), ["sms"]))
            .await
            .unwrap();
        sms.succeed.store(true, Ordering::SeqCst);

        let report = h.sweep.execute().await.unwrap();
        assert_eq!(report.retried, 1);

        let stored = reload(&h.alerts, alert.id()).await;
        assert_eq!(stored.state(), DeliveryState::Sent);
        assert_eq!(stored.attempts(), 1);
        assert!(stored.outcome("sms").unwrap().delivered);
    }

    #[tokio::test]
    async fn test_sweep_ignores_sent_alerts() {
        let email = ToggleSender::new("email", true);
        let h = harness(setup_test_db().await, &[email]).await;
        let alert = create_alert(&h.alerts, &["email"]).await;
        h.queue
            .enqueue(DeliveryJob::first_attempt(alert.id(), ["email"]))
            .await
            .unwrap();

        let report = h.sweep.execute().await.unwrap();
        assert_eq!(report.retried, 0);
    }
}

mod read_ack_tests {
    use super::*;

    #[tokio::test]
    async fn test_read_is_idempotent_and_recipient_only() {
        let pool = setup_test_db().await;
        let h = harness(pool, &[]).await;
        let alert = create_alert(&h.alerts, &["email"]).await;
        let usecase = MarkAlertRead::new(h.alerts.clone());

        let err = usecase.execute(alert.id(), "tech-9").await.unwrap_err();
        assert!(matches!(err, Error::Forbidden { .. }));
        assert!(!reload(&h.alerts, alert.id()).await.is_read());

        usecase.execute(alert.id(), "tech-7").await.unwrap();
        let first = reload(&h.alerts, alert.id()).await;
        assert_eq!(first.read_by(), Some("tech-7"));

        usecase.execute(alert.id(), "tech-7").await.unwrap();
        let second = reload(&h.alerts, alert.id()).await;
        assert_eq!(second.read_at(), first.read_at());

        let err = usecase.execute("missing", "tech-7").await.unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_stale_write_is_rejected() {
        let h = harness(setup_test_db().await, &[]).await;
        let alert = create_alert(&h.alerts, &["email"]).await;

        let mut first = reload(&h.alerts, alert.id()).await;
        let mut second = reload(&h.alerts, alert.id()).await;

        first.mark_as_read("tech-7").unwrap();
        h.alerts.save(&mut first).await.unwrap();

        second.mark_channel_failed("email", "timeout");
        let err = h.alerts.save(&mut second).await.unwrap_err();
        assert!(matches!(err, Error::Conflict { .. }));
    }
}

mod distributed_tests {
    use super::*;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_distributed_queue_delivers_and_reports() {
        let dir = tempfile::tempdir().unwrap();
        let db_url = format!(
            "sqlite:{}?mode=rwc",
            dir.path().join("alerts.db").to_string_lossy().replace('\\', "/")
        );
        let broker_url = format!(
            "sqlite:{}?mode=rwc",
            dir.path().join("queue.db").to_string_lossy().replace('\\', "/")
        );

        let pool = init_pool_with_size(&db_url, 4).await.unwrap();
        run_migrations(&pool).await.unwrap();

        let email = ToggleSender::new("email", true);
        let alerts = Arc::new(SqlxAlertRepository::new(pool.clone()));
        let recipients = Arc::new(SqlxRecipientDirectory::new(pool.clone()));
        recipients
            .upsert(&ContactInfo::new("tech-7").with_email("tech7@example.com"))
            .await
            .unwrap();
        let processor = Arc::new(DeliveryProcessor::new(
            alerts.clone(),
            recipients,
            Arc::new(SenderFactory::new().with_sender(email.clone())),
        ));

        let config = QueueConfig {
            mode: QueueMode::Distributed,
            broker_url,
            concurrency: 3,
            poll_interval_ms: 20,
            ..Default::default()
        };
        let queue = DeliveryQueue::init(&config, processor).await;
        assert_eq!(queue.mode(), QueueMode::Distributed);
        queue.start().await.unwrap();

        let mut ids = Vec::new();
        for _ in 0..5 {
            let alert = create_alert(&alerts, &["email"]).await;
            queue
                .enqueue(DeliveryJob::first_attempt(alert.id(), ["email"]))
                .await
                .unwrap();
            ids.push(alert.id().to_string());
        }

        tokio::time::timeout(Duration::from_secs(15), async {
            while queue.get_queue_stats().await.completed < 5 {
                tokio::time::sleep(Duration::from_millis(25)).await;
            }
        })
        .await
        .expect("jobs were not processed in time");

        for id in &ids {
            assert_eq!(reload(&alerts, id).await.state(), DeliveryState::Sent);
        }
        assert_eq!(email.calls(), 5);

        assert_eq!(queue.clear_queue().await.unwrap(), 5);
        assert_eq!(queue.get_queue_stats().await, QueueStats::default());

        queue.stop().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_second_instance_keeps_peer_claims() {
        let dir = tempfile::tempdir().unwrap();
        let broker_url = format!(
            "sqlite:{}?mode=rwc",
            dir.path().join("queue.db").to_string_lossy().replace('\\', "/")
        );

        let pool = setup_test_db().await;
        let processor = Arc::new(DeliveryProcessor::new(
            Arc::new(SqlxAlertRepository::new(pool.clone())),
            Arc::new(SqlxRecipientDirectory::new(pool)),
            Arc::new(SenderFactory::new()),
        ));
        let config = QueueConfig {
            mode: QueueMode::Distributed,
            broker_url: broker_url.clone(),
            poll_interval_ms: 20,
            ..Default::default()
        };
        let queue = DeliveryQueue::init(&config, processor).await;
        assert_eq!(queue.mode(), QueueMode::Distributed);

        // Another instance has a job in flight on the shared broker file.
        let peer = JobBroker::new(
            Arc::new(SqlxDeliveryJobRepository::new(init_pool(&broker_url).await.unwrap())),
            JobRetryPolicy::default(),
            RetentionPolicy::default(),
        );
        peer.enqueue(&DeliveryJob::first_attempt("alert-peer", ["email"]))
            .await
            .unwrap();
        let claimed = peer.claim().await.unwrap().unwrap();

        queue.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let stats = queue.get_queue_stats().await;
        assert_eq!(stats.processing, 1);
        assert_eq!(stats.pending, 0);

        peer.settle(&claimed, Ok(())).await.unwrap();
        assert_eq!(queue.get_queue_stats().await.completed, 1);
        queue.stop().await;
    }

    #[tokio::test]
    async fn test_unreachable_broker_falls_back_to_in_process() {
        let email = ToggleSender::new("email", true);
        let pool = setup_test_db().await;
        let alerts = Arc::new(SqlxAlertRepository::new(pool.clone()));
        let recipients = Arc::new(SqlxRecipientDirectory::new(pool));
        recipients
            .upsert(&ContactInfo::new("tech-7").with_email("tech7@example.com"))
            .await
            .unwrap();
        let processor = Arc::new(DeliveryProcessor::new(
            alerts.clone(),
            recipients,
            Arc::new(SenderFactory::new().with_sender(email.clone())),
        ));

        let config = QueueConfig {
            broker_url: "sqlite:/definitely/not/a/dir/queue.db".to_string(),
            ..Default::default()
        };
        let queue = DeliveryQueue::init(&config, processor).await;
        assert_eq!(queue.mode(), QueueMode::InProcess);
        queue.start().await.unwrap();

        let alert = create_alert(&alerts, &["email"]).await;
        queue
            .enqueue(DeliveryJob::first_attempt(alert.id(), ["email"]))
            .await
            .unwrap();

        // Delivered before enqueue returned.
        assert_eq!(reload(&alerts, alert.id()).await.state(), DeliveryState::Sent);
        queue.stop().await;
    }
}
