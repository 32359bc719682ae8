use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Row};
use uuid::Uuid;

use vantage_core::models::{NewTask, Task, TaskLane, TaskStatus};

/// Channel workers LISTEN on to wake as soon as a task is inserted.
pub const NEW_TASK_CHANNEL: &str = "vantage_new_task";

/// Durable at-least-once task queue with named lanes.
#[async_trait]
pub trait TaskRepositoryTrait: Send + Sync {
    async fn create_task(&self, new_task: NewTask) -> Result<Task>;

    async fn get_task(&self, task_id: Uuid) -> Result<Option<Task>>;

    /// Claim the oldest due task in `lane` and move it to `running`.
    async fn claim_next_task(&self, lane: TaskLane) -> Result<Option<Task>>;

    async fn mark_completed(&self, task_id: Uuid, result: serde_json::Value) -> Result<Task>;

    async fn mark_failed(&self, task_id: Uuid, error: serde_json::Value) -> Result<Task>;

    /// Count a failed attempt and park the task until `run_at`.
    async fn schedule_retry(
        &self,
        task_id: Uuid,
        run_at: DateTime<Utc>,
        error: serde_json::Value,
    ) -> Result<Task>;

    /// Requeue tasks left `running` past their hard limit plus
    /// `grace_period_secs`, as happens when a worker dies mid-task.
    async fn reap_stale_running_tasks(&self, grace_period_secs: i64) -> Result<u64>;

    /// Delete completed and failed tasks older than `older_than_days`.
    async fn delete_old_finished_tasks(&self, older_than_days: i32) -> Result<u64>;
}

#[derive(Clone)]
pub struct TaskRepository {
    pool: PgPool,
}

impl TaskRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TaskRepositoryTrait for TaskRepository {
    #[tracing::instrument(skip(self, new_task), fields(task_type = %new_task.task_type, task.lane = %new_task.lane))]
    async fn create_task(&self, new_task: NewTask) -> Result<Task> {
        let scheduled_at = new_task.scheduled_at.unwrap_or_else(Utc::now);
        let status = if scheduled_at > Utc::now() {
            TaskStatus::Scheduled
        } else {
            TaskStatus::Pending
        };

        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin transaction for task creation")?;

        let task: Task = sqlx::query_as::<Postgres, Task>(
            r#"
            INSERT INTO tasks (
                task_type, lane, status, payload, scheduled_at, max_retries,
                retry_delay_seconds, soft_time_limit_seconds, hard_time_limit_seconds
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING
                id,
                task_type,
                lane,
                status,
                payload,
                result,
                scheduled_at,
                started_at,
                completed_at,
                retry_count,
                max_retries,
                retry_delay_seconds,
                soft_time_limit_seconds,
                hard_time_limit_seconds,
                created_at,
                updated_at
            "#,
        )
        .bind(new_task.task_type.to_string())
        .bind(new_task.lane.to_string())
        .bind(status.to_string())
        .bind(&new_task.payload)
        .bind(scheduled_at)
        .bind(new_task.options.max_retries)
        .bind(new_task.options.retry_delay_seconds)
        .bind(new_task.options.soft_time_limit_seconds)
        .bind(new_task.options.hard_time_limit_seconds)
        .fetch_one(&mut *tx)
        .await
        .context("Failed to insert task into database")?;

        // Workers fall back to polling if the notification is lost.
        if let Err(e) = sqlx::query("SELECT pg_notify($1, $2)")
            .bind(NEW_TASK_CHANNEL)
            .bind(task.lane.to_string())
            .execute(&mut *tx)
            .await
        {
            tracing::warn!(
                error = %e,
                task.id = %task.id,
                "Failed to send pg_notify for new task, workers will discover task via polling"
            );
        }

        tx.commit()
            .await
            .context("Failed to commit task creation")?;

        tracing::info!(
            task.id = %task.id,
            task_type = %task.task_type,
            task.lane = %task.lane,
            "Task created"
        );

        Ok(task)
    }

    #[tracing::instrument(skip(self))]
    async fn get_task(&self, task_id: Uuid) -> Result<Option<Task>> {
        let task: Option<Task> = sqlx::query_as::<Postgres, Task>(
            r#"
            SELECT
                id,
                task_type,
                lane,
                status,
                payload,
                result,
                scheduled_at,
                started_at,
                completed_at,
                retry_count,
                max_retries,
                retry_delay_seconds,
                soft_time_limit_seconds,
                hard_time_limit_seconds,
                created_at,
                updated_at
            FROM tasks
            WHERE id = $1
            "#,
        )
        .bind(task_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch task")?;

        Ok(task)
    }

    #[tracing::instrument(skip(self), fields(task.lane = %lane))]
    async fn claim_next_task(&self, lane: TaskLane) -> Result<Option<Task>> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin transaction")?;

        let task_id: Option<Uuid> = sqlx::query_scalar::<Postgres, Uuid>(
            r#"
            SELECT id
            FROM tasks
            WHERE lane = $1
                AND status IN ('pending', 'scheduled')
                AND scheduled_at <= NOW()
            ORDER BY scheduled_at ASC, created_at ASC
            LIMIT 1
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .bind(lane.to_string())
        .fetch_optional(&mut *tx)
        .await
        .context("Failed to fetch next task")?;

        let Some(task_id) = task_id else {
            tx.rollback().await.ok();
            return Ok(None);
        };

        let task: Task = sqlx::query_as::<Postgres, Task>(
            r#"
            UPDATE tasks
            SET status = 'running',
                started_at = NOW(),
                updated_at = NOW()
            WHERE id = $1
            RETURNING
                id,
                task_type,
                lane,
                status,
                payload,
                result,
                scheduled_at,
                started_at,
                completed_at,
                retry_count,
                max_retries,
                retry_delay_seconds,
                soft_time_limit_seconds,
                hard_time_limit_seconds,
                created_at,
                updated_at
            "#,
        )
        .bind(task_id)
        .fetch_one(&mut *tx)
        .await
        .context("Failed to update task status")?;

        tx.commit().await.context("Failed to commit transaction")?;

        tracing::debug!(
            task.id = %task.id,
            task_type = %task.task_type,
            "Task claimed"
        );

        Ok(Some(task))
    }

    #[tracing::instrument(skip(self, result))]
    async fn mark_completed(&self, task_id: Uuid, result: serde_json::Value) -> Result<Task> {
        let task: Task = sqlx::query_as::<Postgres, Task>(
            r#"
            UPDATE tasks
            SET status = 'completed',
                result = $2,
                completed_at = NOW(),
                updated_at = NOW()
            WHERE id = $1
            RETURNING
                id,
                task_type,
                lane,
                status,
                payload,
                result,
                scheduled_at,
                started_at,
                completed_at,
                retry_count,
                max_retries,
                retry_delay_seconds,
                soft_time_limit_seconds,
                hard_time_limit_seconds,
                created_at,
                updated_at
            "#,
        )
        .bind(task_id)
        .bind(result)
        .fetch_one(&self.pool)
        .await
        .context("Failed to mark task as completed")?;

        tracing::info!(
            task.id = %task_id,
            task_type = %task.task_type,
            "Task completed"
        );

        Ok(task)
    }

    #[tracing::instrument(skip(self, error))]
    async fn mark_failed(&self, task_id: Uuid, error: serde_json::Value) -> Result<Task> {
        let task: Task = sqlx::query_as::<Postgres, Task>(
            r#"
            UPDATE tasks
            SET status = 'failed',
                result = $2,
                completed_at = NOW(),
                updated_at = NOW()
            WHERE id = $1
            RETURNING
                id,
                task_type,
                lane,
                status,
                payload,
                result,
                scheduled_at,
                started_at,
                completed_at,
                retry_count,
                max_retries,
                retry_delay_seconds,
                soft_time_limit_seconds,
                hard_time_limit_seconds,
                created_at,
                updated_at
            "#,
        )
        .bind(task_id)
        .bind(error)
        .fetch_one(&self.pool)
        .await
        .context("Failed to mark task as failed")?;

        tracing::error!(
            task.id = %task_id,
            task_type = %task.task_type,
            retry_count = task.retry_count,
            "Task failed"
        );

        Ok(task)
    }

    #[tracing::instrument(skip(self, error))]
    async fn schedule_retry(
        &self,
        task_id: Uuid,
        run_at: DateTime<Utc>,
        error: serde_json::Value,
    ) -> Result<Task> {
        let task: Task = sqlx::query_as::<Postgres, Task>(
            r#"
            UPDATE tasks
            SET status = 'scheduled',
                retry_count = retry_count + 1,
                scheduled_at = $2,
                result = $3,
                started_at = NULL,
                updated_at = NOW()
            WHERE id = $1
            RETURNING
                id,
                task_type,
                lane,
                status,
                payload,
                result,
                scheduled_at,
                started_at,
                completed_at,
                retry_count,
                max_retries,
                retry_delay_seconds,
                soft_time_limit_seconds,
                hard_time_limit_seconds,
                created_at,
                updated_at
            "#,
        )
        .bind(task_id)
        .bind(run_at)
        .bind(error)
        .fetch_one(&self.pool)
        .await
        .context("Failed to schedule task retry")?;

        tracing::info!(
            task.id = %task_id,
            retry_count = task.retry_count,
            max_retries = task.max_retries,
            run_at = %run_at,
            "Task retry scheduled"
        );

        Ok(task)
    }

    #[tracing::instrument(skip(self))]
    async fn reap_stale_running_tasks(&self, grace_period_secs: i64) -> Result<u64> {
        let row = sqlx::query(
            r#"
            WITH reaped AS (
                UPDATE tasks
                SET status = 'pending',
                    started_at = NULL,
                    updated_at = NOW()
                WHERE status = 'running'
                    AND started_at < NOW() - ((hard_time_limit_seconds + $1) * interval '1 second')
                RETURNING id
            )
            SELECT COUNT(*)::bigint FROM reaped
            "#,
        )
        .bind(grace_period_secs)
        .fetch_one(&self.pool)
        .await
        .context("Failed to reap stale running tasks")?;

        let count: i64 = row.get(0);
        let count = count.max(0) as u64;

        if count > 0 {
            tracing::warn!(count = count, "Requeued stale running tasks");
        }

        Ok(count)
    }

    #[tracing::instrument(skip(self))]
    async fn delete_old_finished_tasks(&self, older_than_days: i32) -> Result<u64> {
        let row = sqlx::query(
            r#"
            WITH deleted AS (
                DELETE FROM tasks
                WHERE status IN ('completed', 'failed')
                    AND COALESCE(completed_at, updated_at) < NOW() - ($1 * interval '1 day')
                RETURNING id
            )
            SELECT COUNT(*)::bigint FROM deleted
            "#,
        )
        .bind(older_than_days)
        .fetch_one(&self.pool)
        .await
        .context("Failed to delete old finished tasks")?;

        let count: i64 = row.get(0);
        let count = count.max(0) as u64;

        if count > 0 {
            tracing::info!(
                count = count,
                older_than_days = older_than_days,
                "Deleted old finished tasks"
            );
        }

        Ok(count)
    }
}
