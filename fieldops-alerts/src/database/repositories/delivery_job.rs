//! Delivery job repository (the durable broker's storage).

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::Result;
use crate::database::models::{DeliveryJobCounts, DeliveryJobDbModel, DeliveryJobStatus};
use crate::database::time::now_ms;

/// Storage operations of the durable delivery job broker.
#[async_trait]
pub trait DeliveryJobRepository: Send + Sync {
    async fn insert(&self, job: &DeliveryJobDbModel) -> Result<()>;

    /// Atomically claim the oldest due `PENDING` job, moving it to `PROCESSING`
    /// and counting the attempt.
    async fn claim_next(&self) -> Result<Option<DeliveryJobDbModel>>;

    async fn mark_completed(&self, id: &str) -> Result<()>;

    /// Put a job back to `PENDING`, not claimable before `available_at`.
    async fn schedule_retry(&self, id: &str, available_at: i64, error: &str) -> Result<()>;

    async fn mark_failed(&self, id: &str, error: &str) -> Result<()>;

    /// Reset `PROCESSING` jobs claimed before `claimed_before` back to `PENDING`.
    async fn reset_processing(&self, claimed_before: i64) -> Result<u64>;

    async fn counts(&self) -> Result<DeliveryJobCounts>;

    /// Apply retention: completed jobs finished before `completed_before` or
    /// beyond the newest `keep_completed`, failed jobs finished before
    /// `failed_before`.
    async fn prune(&self, completed_before: i64, keep_completed: u64, failed_before: i64)
    -> Result<u64>;

    /// Delete every completed and failed job.
    async fn clear_finished(&self) -> Result<u64>;
}

/// SQLx implementation of DeliveryJobRepository.
pub struct SqlxDeliveryJobRepository {
    pool: SqlitePool,
}

impl SqlxDeliveryJobRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, id: &str) -> Result<Option<DeliveryJobDbModel>> {
        let job = sqlx::query_as::<_, DeliveryJobDbModel>("SELECT * FROM delivery_job WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(job)
    }

    async fn finish(&self, id: &str, status: DeliveryJobStatus, error: Option<&str>) -> Result<()> {
        let now = now_ms();
        sqlx::query(
            r#"
            UPDATE delivery_job
            SET status = ?, last_error = COALESCE(?, last_error), updated_at = ?, finished_at = ?
            WHERE id = ?
            "#,
        )
        .bind(status.as_str())
        .bind(error)
        .bind(now)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl DeliveryJobRepository for SqlxDeliveryJobRepository {
    async fn insert(&self, job: &DeliveryJobDbModel) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO delivery_job (
                id, alert_id, channels, is_retry, status, attempts_made, max_attempts,
                available_at, last_error, created_at, updated_at, finished_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&job.id)
        .bind(&job.alert_id)
        .bind(&job.channels)
        .bind(job.is_retry)
        .bind(&job.status)
        .bind(job.attempts_made)
        .bind(job.max_attempts)
        .bind(job.available_at)
        .bind(&job.last_error)
        .bind(job.created_at)
        .bind(job.updated_at)
        .bind(job.finished_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn claim_next(&self) -> Result<Option<DeliveryJobDbModel>> {
        let now = now_ms();
        let job = sqlx::query_as::<_, DeliveryJobDbModel>(
            r#"
            UPDATE delivery_job
            SET status = 'PROCESSING', attempts_made = attempts_made + 1, updated_at = ?
            WHERE id = (
                SELECT id FROM delivery_job
                WHERE status = 'PENDING' AND available_at <= ?
                ORDER BY available_at, created_at
                LIMIT 1
            )
            RETURNING *
            "#,
        )
        .bind(now)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;
        Ok(job)
    }

    async fn mark_completed(&self, id: &str) -> Result<()> {
        self.finish(id, DeliveryJobStatus::Completed, None).await
    }

    async fn schedule_retry(&self, id: &str, available_at: i64, error: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE delivery_job
            SET status = 'PENDING', available_at = ?, last_error = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(available_at)
        .bind(error)
        .bind(now_ms())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_failed(&self, id: &str, error: &str) -> Result<()> {
        self.finish(id, DeliveryJobStatus::Failed, Some(error)).await
    }

    async fn reset_processing(&self, claimed_before: i64) -> Result<u64> {
        // `updated_at` of a PROCESSING row is its claim time.
        let result = sqlx::query(
            "UPDATE delivery_job SET status = 'PENDING', updated_at = ? WHERE status = 'PROCESSING' AND updated_at < ?",
        )
        .bind(now_ms())
        .bind(claimed_before)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn counts(&self) -> Result<DeliveryJobCounts> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM delivery_job GROUP BY status")
                .fetch_all(&self.pool)
                .await?;

        let mut counts = DeliveryJobCounts::default();
        for (status, count) in rows {
            let count = count.max(0) as u64;
            match DeliveryJobStatus::parse(&status) {
                Some(DeliveryJobStatus::Pending) => counts.pending = count,
                Some(DeliveryJobStatus::Processing) => counts.processing = count,
                Some(DeliveryJobStatus::Completed) => counts.completed = count,
                Some(DeliveryJobStatus::Failed) => counts.failed = count,
                None => {}
            }
        }
        Ok(counts)
    }

    async fn prune(
        &self,
        completed_before: i64,
        keep_completed: u64,
        failed_before: i64,
    ) -> Result<u64> {
        let mut tx = self.pool.begin().await?;

        let aged = sqlx::query(
            "DELETE FROM delivery_job WHERE status = 'COMPLETED' AND finished_at < ?",
        )
        .bind(completed_before)
        .execute(&mut *tx)
        .await?;

        let overflow = sqlx::query(
            r#"
            DELETE FROM delivery_job
            WHERE status = 'COMPLETED' AND id NOT IN (
                SELECT id FROM delivery_job
                WHERE status = 'COMPLETED'
                ORDER BY finished_at DESC
                LIMIT ?
            )
            "#,
        )
        .bind(i64::try_from(keep_completed).unwrap_or(i64::MAX))
        .execute(&mut *tx)
        .await?;

        let failed = sqlx::query("DELETE FROM delivery_job WHERE status = 'FAILED' AND finished_at < ?")
            .bind(failed_before)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(aged.rows_affected() + overflow.rows_affected() + failed.rows_affected())
    }

    async fn clear_finished(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM delivery_job WHERE status IN ('COMPLETED', 'FAILED')")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
