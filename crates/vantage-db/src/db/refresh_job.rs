use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Row};
use uuid::Uuid;

use vantage_core::models::{RefreshJob, RowCounts};

/// Error message written on a running job whose lease ran out.
pub const LEASE_EXPIRED_MESSAGE: &str = "abandoned: lease expired";

/// Lifecycle records for refresh runs. A pipeline holds at most one running
/// job at a time; that row is the refresh lease.
#[async_trait]
pub trait RefreshJobRepositoryTrait: Send + Sync {
    /// Open a running job for `pipeline`. Running jobs older than
    /// `lease_seconds` are failed first. Returns `None` while another live
    /// job holds the lease.
    async fn start(&self, pipeline: &str, lease_seconds: i64) -> Result<Option<RefreshJob>>;

    /// Mark a running job completed. Returns `None` if the job is not running.
    async fn complete(
        &self,
        id: Uuid,
        counts: RowCounts,
        duration_seconds: f64,
    ) -> Result<Option<RefreshJob>>;

    /// Mark a running job failed. Returns `None` if the job is not running.
    async fn fail(
        &self,
        id: Uuid,
        error_message: &str,
        duration_seconds: f64,
    ) -> Result<Option<RefreshJob>>;

    async fn get(&self, id: Uuid) -> Result<Option<RefreshJob>>;

    async fn latest_completed(&self, pipeline: &str) -> Result<Option<RefreshJob>>;

    /// Most recently started jobs first.
    async fn list_recent(&self, limit: i64) -> Result<Vec<RefreshJob>>;

    /// Delete finished jobs started more than `days` ago.
    async fn delete_older_than(&self, days: i64) -> Result<u64>;
}

#[derive(Clone)]
pub struct RefreshJobRepository {
    pool: PgPool,
}

impl RefreshJobRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RefreshJobRepositoryTrait for RefreshJobRepository {
    #[tracing::instrument(skip(self))]
    async fn start(&self, pipeline: &str, lease_seconds: i64) -> Result<Option<RefreshJob>> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin transaction for refresh job start")?;

        let expired = sqlx::query(
            r#"
            UPDATE refresh_jobs
            SET status = 'failed',
                completed_at = NOW(),
                duration_seconds = EXTRACT(EPOCH FROM (NOW() - started_at))::float8,
                error_message = $3
            WHERE pipeline = $1
                AND status = 'running'
                AND started_at < NOW() - ($2 * interval '1 second')
            "#,
        )
        .bind(pipeline)
        .bind(lease_seconds)
        .bind(LEASE_EXPIRED_MESSAGE)
        .execute(&mut *tx)
        .await
        .context("Failed to expire abandoned refresh jobs")?;

        if expired.rows_affected() > 0 {
            tracing::warn!(
                pipeline = %pipeline,
                count = expired.rows_affected(),
                "Expired abandoned refresh jobs past their lease"
            );
        }

        let job: Option<RefreshJob> = sqlx::query_as::<Postgres, RefreshJob>(
            r#"
            INSERT INTO refresh_jobs (id, pipeline, status, started_at)
            VALUES ($1, $2, 'running', NOW())
            ON CONFLICT DO NOTHING
            RETURNING
                id,
                pipeline,
                status,
                started_at,
                completed_at,
                orders_processed,
                vendors_processed,
                duration_seconds,
                error_message
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(pipeline)
        .fetch_optional(&mut *tx)
        .await
        .context("Failed to insert refresh job")?;

        tx.commit()
            .await
            .context("Failed to commit refresh job start")?;

        match &job {
            Some(job) => tracing::info!(refresh_id = %job.id, pipeline = %pipeline, "Refresh job started"),
            None => tracing::info!(pipeline = %pipeline, "Refresh lease held by another job"),
        }

        Ok(job)
    }

    #[tracing::instrument(skip(self))]
    async fn complete(
        &self,
        id: Uuid,
        counts: RowCounts,
        duration_seconds: f64,
    ) -> Result<Option<RefreshJob>> {
        let job: Option<RefreshJob> = sqlx::query_as::<Postgres, RefreshJob>(
            r#"
            UPDATE refresh_jobs
            SET status = 'completed',
                completed_at = NOW(),
                orders_processed = $2,
                vendors_processed = $3,
                duration_seconds = $4
            WHERE id = $1 AND status = 'running'
            RETURNING
                id,
                pipeline,
                status,
                started_at,
                completed_at,
                orders_processed,
                vendors_processed,
                duration_seconds,
                error_message
            "#,
        )
        .bind(id)
        .bind(counts.orders)
        .bind(counts.vendors)
        .bind(duration_seconds)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to mark refresh job completed")?;

        Ok(job)
    }

    #[tracing::instrument(skip(self, error_message))]
    async fn fail(
        &self,
        id: Uuid,
        error_message: &str,
        duration_seconds: f64,
    ) -> Result<Option<RefreshJob>> {
        let job: Option<RefreshJob> = sqlx::query_as::<Postgres, RefreshJob>(
            r#"
            UPDATE refresh_jobs
            SET status = 'failed',
                completed_at = NOW(),
                error_message = $2,
                duration_seconds = $3
            WHERE id = $1 AND status = 'running'
            RETURNING
                id,
                pipeline,
                status,
                started_at,
                completed_at,
                orders_processed,
                vendors_processed,
                duration_seconds,
                error_message
            "#,
        )
        .bind(id)
        .bind(error_message)
        .bind(duration_seconds)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to mark refresh job failed")?;

        Ok(job)
    }

    #[tracing::instrument(skip(self))]
    async fn get(&self, id: Uuid) -> Result<Option<RefreshJob>> {
        let job: Option<RefreshJob> = sqlx::query_as::<Postgres, RefreshJob>(
            r#"
            SELECT
                id,
                pipeline,
                status,
                started_at,
                completed_at,
                orders_processed,
                vendors_processed,
                duration_seconds,
                error_message
            FROM refresh_jobs
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch refresh job")?;

        Ok(job)
    }

    #[tracing::instrument(skip(self))]
    async fn latest_completed(&self, pipeline: &str) -> Result<Option<RefreshJob>> {
        let job: Option<RefreshJob> = sqlx::query_as::<Postgres, RefreshJob>(
            r#"
            SELECT
                id,
                pipeline,
                status,
                started_at,
                completed_at,
                orders_processed,
                vendors_processed,
                duration_seconds,
                error_message
            FROM refresh_jobs
            WHERE pipeline = $1 AND status = 'completed'
            ORDER BY started_at DESC
            LIMIT 1
            "#,
        )
        .bind(pipeline)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch latest completed refresh job")?;

        Ok(job)
    }

    #[tracing::instrument(skip(self))]
    async fn list_recent(&self, limit: i64) -> Result<Vec<RefreshJob>> {
        let jobs: Vec<RefreshJob> = sqlx::query_as::<Postgres, RefreshJob>(
            r#"
            SELECT
                id,
                pipeline,
                status,
                started_at,
                completed_at,
                orders_processed,
                vendors_processed,
                duration_seconds,
                error_message
            FROM refresh_jobs
            ORDER BY started_at DESC
            LIMIT $1
            "#,
        )
        .bind(limit.clamp(1, 1000))
        .fetch_all(&self.pool)
        .await
        .context("Failed to list refresh jobs")?;

        Ok(jobs)
    }

    #[tracing::instrument(skip(self))]
    async fn delete_older_than(&self, days: i64) -> Result<u64> {
        let row = sqlx::query(
            r#"
            WITH deleted AS (
                DELETE FROM refresh_jobs
                WHERE status IN ('completed', 'failed')
                    AND started_at < NOW() - ($1 * interval '1 day')
                RETURNING id
            )
            SELECT COUNT(*)::bigint FROM deleted
            "#,
        )
        .bind(days)
        .fetch_one(&self.pool)
        .await
        .context("Failed to delete old refresh jobs")?;

        let count: i64 = row.get(0);
        let count = count.max(0) as u64;

        if count > 0 {
            tracing::info!(count = count, older_than_days = days, "Deleted old refresh jobs");
        }

        Ok(count)
    }
}
