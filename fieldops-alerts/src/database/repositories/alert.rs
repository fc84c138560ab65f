//! Alert repository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::warn;

use crate::database::models::AlertDbModel;
use crate::database::time::datetime_to_ms;
use crate::domain::{Alert, DeliveryState, MAX_ATTEMPTS};
use crate::{Error, Result};

/// Persistence of the alert aggregate.
#[async_trait]
pub trait AlertRepository: Send + Sync {
    async fn find_by_id(&self, id: &str) -> Result<Option<Alert>>;

    /// Insert a new alert or update an existing one.
    ///
    /// Updates are guarded by the alert's version; a stale write fails with
    /// [`Error::Conflict`]. On success the alert carries the new version.
    async fn save(&self, alert: &mut Alert) -> Result<()>;

    /// Alerts in `FAILED` state with retry budget left, oldest first.
    async fn find_failed_retryable(&self) -> Result<Vec<Alert>>;

    /// Alerts still `PENDING` whose last write is older than `updated_before`,
    /// oldest first. These are alerts whose delivery job was lost.
    async fn find_stale_pending(&self, updated_before: DateTime<Utc>) -> Result<Vec<Alert>>;
}

/// SQLx implementation of AlertRepository.
pub struct SqlxAlertRepository {
    pool: SqlitePool,
}

impl SqlxAlertRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn insert(&self, row: &AlertDbModel) -> Result<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO alert (
                id, recipient_id, channels, kind, priority, title, message, metadata,
                state, attempts, outcomes, sent_at, read_at, read_by,
                created_at, updated_at, version
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 1)
            "#,
        )
        .bind(&row.id)
        .bind(&row.recipient_id)
        .bind(&row.channels)
        .bind(&row.kind)
        .bind(&row.priority)
        .bind(&row.title)
        .bind(&row.message)
        .bind(&row.metadata)
        .bind(&row.state)
        .bind(row.attempts)
        .bind(&row.outcomes)
        .bind(row.sent_at)
        .bind(row.read_at)
        .bind(&row.read_by)
        .bind(row.created_at)
        .bind(row.updated_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                Err(Error::conflict("Alert", &row.id))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn update(&self, row: &AlertDbModel) -> Result<()> {
        // Payload and recipient are immutable, only delivery/read state is written.
        let result = sqlx::query(
            r#"
            UPDATE alert SET
                state = ?,
                attempts = ?,
                outcomes = ?,
                sent_at = ?,
                read_at = ?,
                read_by = ?,
                updated_at = ?,
                version = version + 1
            WHERE id = ? AND version = ?
            "#,
        )
        .bind(&row.state)
        .bind(row.attempts)
        .bind(&row.outcomes)
        .bind(row.sent_at)
        .bind(row.read_at)
        .bind(&row.read_by)
        .bind(row.updated_at)
        .bind(&row.id)
        .bind(row.version)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::conflict("Alert", &row.id));
        }
        Ok(())
    }
}

#[async_trait]
impl AlertRepository for SqlxAlertRepository {
    async fn find_by_id(&self, id: &str) -> Result<Option<Alert>> {
        let row = sqlx::query_as::<_, AlertDbModel>("SELECT * FROM alert WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(AlertDbModel::into_alert).transpose()
    }

    async fn save(&self, alert: &mut Alert) -> Result<()> {
        let row = AlertDbModel::from_alert(alert)?;
        if row.version == 0 {
            self.insert(&row).await?;
            alert.set_version(1);
        } else {
            self.update(&row).await?;
            alert.set_version(row.version + 1);
        }
        Ok(())
    }

    async fn find_failed_retryable(&self) -> Result<Vec<Alert>> {
        let rows = sqlx::query_as::<_, AlertDbModel>(
            "SELECT * FROM alert WHERE state = ? AND attempts < ? ORDER BY updated_at",
        )
        .bind(DeliveryState::Failed.as_str())
        .bind(i64::from(MAX_ATTEMPTS))
        .fetch_all(&self.pool)
        .await?;
        Ok(decode_rows(rows))
    }

    async fn find_stale_pending(&self, updated_before: DateTime<Utc>) -> Result<Vec<Alert>> {
        let rows = sqlx::query_as::<_, AlertDbModel>(
            "SELECT * FROM alert WHERE state = ? AND updated_at < ? ORDER BY updated_at",
        )
        .bind(DeliveryState::Pending.as_str())
        .bind(datetime_to_ms(updated_before))
        .fetch_all(&self.pool)
        .await?;
        Ok(decode_rows(rows))
    }
}

/// A corrupt row must not hide the others from the sweep.
fn decode_rows(rows: Vec<AlertDbModel>) -> Vec<Alert> {
    let mut alerts = Vec::with_capacity(rows.len());
    for row in rows {
        let id = row.id.clone();
        match row.into_alert() {
            Ok(alert) => alerts.push(alert),
            Err(e) => warn!(alert_id = %id, error = %e, "Skipping unreadable alert row"),
        }
    }
    alerts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::test_support::memory_pool;
    use crate::domain::{AlertKind, AlertPayload, AlertPriority};

    fn new_alert(channels: &[&str]) -> Alert {
        let payload = AlertPayload::new(
            AlertKind::UnsignedAcceptanceRecord,
            AlertPriority::Warning,
            "Acceptance record unsigned",
            "Acceptance record AR-55 is waiting for the client signature",
        )
        .unwrap();
        Alert::new("user-7", channels.iter().copied(), payload).unwrap()
    }

    #[tokio::test]
    async fn test_save_and_find() {
        let repo = SqlxAlertRepository::new(memory_pool().await);
        let mut alert = new_alert(&["email", "in_app"]);

        repo.save(&mut alert).await.unwrap();
        assert_eq!(alert.version(), 1);

        let found = repo.find_by_id(alert.id()).await.unwrap().unwrap();
        assert_eq!(found.recipient_id(), "user-7");
        assert_eq!(found.channels(), alert.channels());
        assert_eq!(found.state(), DeliveryState::Pending);
        assert_eq!(found.version(), 1);

        assert!(repo.find_by_id("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_bumps_version() {
        let repo = SqlxAlertRepository::new(memory_pool().await);
        let mut alert = new_alert(&["email"]);
        repo.save(&mut alert).await.unwrap();

        alert.mark_channel_delivered("email");
        repo.save(&mut alert).await.unwrap();
        assert_eq!(alert.version(), 2);

        let found = repo.find_by_id(alert.id()).await.unwrap().unwrap();
        assert_eq!(found.state(), DeliveryState::Sent);
        assert!(found.is_delivered_on("email"));
        assert_eq!(found.version(), 2);
    }

    #[tokio::test]
    async fn test_stale_write_is_conflict() {
        let repo = SqlxAlertRepository::new(memory_pool().await);
        let mut alert = new_alert(&["sms"]);
        repo.save(&mut alert).await.unwrap();

        let mut worker_copy = repo.find_by_id(alert.id()).await.unwrap().unwrap();
        let mut sweep_copy = repo.find_by_id(alert.id()).await.unwrap().unwrap();

        worker_copy.mark_channel_failed("sms", "gateway down");
        repo.save(&mut worker_copy).await.unwrap();

        sweep_copy.mark_channel_delivered("sms");
        let err = repo.save(&mut sweep_copy).await.unwrap_err();
        assert!(matches!(err, Error::Conflict { .. }));

        let stored = repo.find_by_id(alert.id()).await.unwrap().unwrap();
        assert_eq!(stored.state(), DeliveryState::Failed);
    }

    #[tokio::test]
    async fn test_double_insert_is_conflict() {
        let repo = SqlxAlertRepository::new(memory_pool().await);
        let mut alert = new_alert(&["sms"]);
        let mut copy = alert.clone();
        repo.save(&mut alert).await.unwrap();
        assert!(matches!(
            repo.save(&mut copy).await,
            Err(Error::Conflict { .. })
        ));
    }

    #[tokio::test]
    async fn test_find_failed_retryable() {
        let repo = SqlxAlertRepository::new(memory_pool().await);

        let mut pending = new_alert(&["email"]);
        repo.save(&mut pending).await.unwrap();

        let mut failed = new_alert(&["push"]);
        failed.mark_channel_failed("push", "invalid token");
        repo.save(&mut failed).await.unwrap();

        let mut exhausted = new_alert(&["push"]);
        exhausted.mark_channel_failed("push", "invalid token");
        for _ in 0..MAX_ATTEMPTS {
            exhausted.increment_attempt().unwrap();
            exhausted.mark_channel_failed("push", "invalid token");
        }
        repo.save(&mut exhausted).await.unwrap();

        let retryable = repo.find_failed_retryable().await.unwrap();
        let ids: Vec<&str> = retryable.iter().map(Alert::id).collect();
        assert_eq!(ids, vec![failed.id()]);
    }

    #[tokio::test]
    async fn test_find_stale_pending() {
        let repo = SqlxAlertRepository::new(memory_pool().await);

        let mut pending = new_alert(&["email"]);
        repo.save(&mut pending).await.unwrap();

        let mut failed = new_alert(&["push"]);
        failed.mark_channel_failed("push", "invalid token");
        repo.save(&mut failed).await.unwrap();

        let cutoff = Utc::now() + chrono::Duration::seconds(1);
        let stale = repo.find_stale_pending(cutoff).await.unwrap();
        let ids: Vec<&str> = stale.iter().map(Alert::id).collect();
        assert_eq!(ids, vec![pending.id()]);

        let cutoff = pending.updated_at() - chrono::Duration::seconds(1);
        assert!(repo.find_stale_pending(cutoff).await.unwrap().is_empty());
    }
}
