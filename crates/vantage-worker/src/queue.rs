//! Task queue: one worker pool per lane, LISTEN/NOTIFY or polling, retry,
//! stale-task reaping and submission.
//!
//! Shutdown: [`TaskQueue::shutdown`] signals the lanes to stop claiming; it
//! does not wait for in-flight tasks. Tasks interrupted by process exit stay
//! `running` and are requeued by the reaper once their hard limit passes.

use anyhow::{Context, Result};
use chrono::Utc;
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, Semaphore};
use tokio::time::sleep;
use uuid::Uuid;

use vantage_core::models::{NewTask, Task, TaskLane, TaskOptions, TaskType};
use vantage_core::{format_diagnostic, QueueConfig, TaskError};
use vantage_db::{TaskRepositoryTrait, NEW_TASK_CHANNEL};

use crate::context::TaskHandlerContext;

/// Caps exponential backoff for tasks submitted without a fixed retry delay.
pub const MAX_RETRY_BACKOFF_SECS: u64 = 300;

#[inline]
pub(crate) fn compute_retry_backoff_seconds(retry_count: i32) -> u64 {
    (2_u64.pow(retry_count.max(0) as u32)).min(MAX_RETRY_BACKOFF_SECS)
}

/// Fixed delay when the task carries one, exponential backoff otherwise.
pub fn retry_delay_seconds(task: &Task) -> u64 {
    if task.retry_delay_seconds > 0 {
        task.retry_delay_seconds as u64
    } else {
        compute_retry_backoff_seconds(task.retry_count)
    }
}

#[derive(Clone, Debug)]
pub struct TaskQueueConfig {
    pub workers_per_lane: usize,
    pub poll_interval_ms: u64,
    pub refresh_max_retries: i32,
    pub refresh_retry_delay_seconds: i32,
    pub soft_time_limit_seconds: i32,
    pub hard_time_limit_seconds: i32,
    /// Interval in seconds between runs of the stale task reaper. 0 disables it.
    pub stale_task_reap_interval_secs: u64,
    pub stale_task_grace_period_secs: i64,
}

impl Default for TaskQueueConfig {
    fn default() -> Self {
        Self::from(&QueueConfig::default())
    }
}

impl From<&QueueConfig> for TaskQueueConfig {
    fn from(config: &QueueConfig) -> Self {
        Self {
            workers_per_lane: config.workers_per_lane.max(1),
            poll_interval_ms: config.poll_interval_ms,
            refresh_max_retries: config.refresh_max_retries,
            refresh_retry_delay_seconds: config.refresh_retry_delay_seconds,
            soft_time_limit_seconds: config.soft_time_limit_seconds,
            hard_time_limit_seconds: config.hard_time_limit_seconds,
            stale_task_reap_interval_secs: config.stale_task_reap_interval_secs,
            stale_task_grace_period_secs: config.stale_task_grace_period_secs,
        }
    }
}

impl TaskQueueConfig {
    /// Only full refreshes are retried; the rest run again on their next schedule.
    pub fn options_for(&self, task_type: TaskType) -> TaskOptions {
        let (max_retries, retry_delay_seconds) = match task_type {
            TaskType::RefreshAllData => {
                (self.refresh_max_retries, self.refresh_retry_delay_seconds)
            }
            _ => (0, 0),
        };
        TaskOptions {
            max_retries,
            retry_delay_seconds,
            soft_time_limit_seconds: self.soft_time_limit_seconds,
            hard_time_limit_seconds: self.hard_time_limit_seconds,
        }
    }
}

#[derive(Clone)]
pub struct TaskQueue {
    repository: Arc<dyn TaskRepositoryTrait>,
    config: TaskQueueConfig,
    shutdown_tx: broadcast::Sender<()>,
}

impl TaskQueue {
    /// Create the queue and spawn a worker pool for every lane.
    ///
    /// With a `pool`, workers also LISTEN on the new-task channel and wake as
    /// soon as a task lands in their lane. Without one they only poll.
    pub fn new(
        repository: Arc<dyn TaskRepositoryTrait>,
        config: TaskQueueConfig,
        context: Weak<dyn TaskHandlerContext>,
        pool: Option<sqlx::PgPool>,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        let mut lane_wakers = HashMap::new();
        for lane in TaskLane::ALL {
            let (notify_tx, notify_rx) = mpsc::channel::<()>(16);
            lane_wakers.insert(lane, notify_tx);
            tokio::spawn(Self::lane_worker(
                lane,
                repository.clone(),
                config.clone(),
                context.clone(),
                notify_rx,
                shutdown_tx.subscribe(),
            ));
        }

        if let Some(pool) = pool {
            tokio::spawn(Self::listen_for_new_tasks(pool, lane_wakers));
        }

        if config.stale_task_reap_interval_secs > 0 {
            tokio::spawn(Self::stale_task_reaper(
                repository.clone(),
                Duration::from_secs(config.stale_task_reap_interval_secs),
                config.stale_task_grace_period_secs,
                shutdown_tx.subscribe(),
            ));
        }

        Self {
            repository,
            config,
            shutdown_tx,
        }
    }

    /// A queue that only submits. Tasks are picked up by workers elsewhere.
    pub fn new_no_worker(repository: Arc<dyn TaskRepositoryTrait>, config: TaskQueueConfig) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            repository,
            config,
            shutdown_tx,
        }
    }

    pub fn config(&self) -> &TaskQueueConfig {
        &self.config
    }

    /// Submit a task to its default lane with the options for its type.
    #[tracing::instrument(skip(self, payload), fields(task_type = %task_type))]
    pub async fn submit_task(
        &self,
        task_type: TaskType,
        payload: serde_json::Value,
    ) -> Result<Uuid> {
        let new_task = NewTask::new(task_type, payload, self.config.options_for(task_type));
        self.submit(new_task).await
    }

    pub async fn submit(&self, new_task: NewTask) -> Result<Uuid> {
        let task_type = new_task.task_type;
        let lane = new_task.lane;
        let task = self
            .repository
            .create_task(new_task)
            .await
            .map_err(|e| {
                tracing::error!(
                    error = %e,
                    task_type = %task_type,
                    task.lane = %lane,
                    "Failed to create task in repository"
                );
                anyhow::anyhow!("Failed to create task in repository: {}", e)
            })?;

        tracing::info!(
            task.id = %task.id,
            task_type = %task_type,
            task.lane = %lane,
            "Task submitted to queue"
        );
        Ok(task.id)
    }

    async fn listen_for_new_tasks(
        pool: sqlx::PgPool,
        lane_wakers: HashMap<TaskLane, mpsc::Sender<()>>,
    ) {
        loop {
            match sqlx::postgres::PgListener::connect_with(&pool).await {
                Ok(mut listener) => {
                    if let Err(e) = listener.listen(NEW_TASK_CHANNEL).await {
                        tracing::warn!(error = %e, "LISTEN failed, will retry");
                        sleep(Duration::from_secs(5)).await;
                        continue;
                    }
                    while let Ok(notification) = listener.recv().await {
                        let lane = notification.payload().parse::<TaskLane>().ok();
                        for (candidate, waker) in &lane_wakers {
                            if lane.is_none() || lane == Some(*candidate) {
                                let _ = waker.try_send(());
                            }
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "PgListener connect failed, will retry");
                    sleep(Duration::from_secs(5)).await;
                }
            }
        }
    }

    async fn stale_task_reaper(
        repository: Arc<dyn TaskRepositoryTrait>,
        every: Duration,
        grace_period_secs: i64,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match repository.reap_stale_running_tasks(grace_period_secs).await {
                        Ok(0) => {}
                        Ok(reaped) => tracing::warn!(reaped, "Requeued stale running tasks"),
                        Err(e) => tracing::error!(error = %e, "Stale task reaper failed"),
                    }
                }
                _ = shutdown_rx.recv() => break,
            }
        }
    }

    #[tracing::instrument(skip_all, fields(task.lane = %lane))]
    async fn lane_worker(
        lane: TaskLane,
        repository: Arc<dyn TaskRepositoryTrait>,
        config: TaskQueueConfig,
        context: Weak<dyn TaskHandlerContext>,
        mut notify_rx: mpsc::Receiver<()>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) {
        tracing::info!(
            workers = config.workers_per_lane,
            poll_interval_ms = config.poll_interval_ms,
            "Lane worker pool started"
        );

        let semaphore = Arc::new(Semaphore::new(config.workers_per_lane));
        let poll_interval = Duration::from_millis(config.poll_interval_ms);

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    tracing::info!("Lane worker pool shutting down");
                    break;
                }
                Some(()) = notify_rx.recv() => {
                    Self::claim_and_dispatch_one(lane, &repository, &semaphore, &context).await;
                }
                _ = sleep(poll_interval) => {
                    Self::claim_and_dispatch_one(lane, &repository, &semaphore, &context).await;
                }
            }
        }
    }

    async fn claim_and_dispatch_one(
        lane: TaskLane,
        repository: &Arc<dyn TaskRepositoryTrait>,
        semaphore: &Arc<Semaphore>,
        context: &Weak<dyn TaskHandlerContext>,
    ) {
        let permit = match semaphore.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                tracing::debug!("No workers available, skipping claim");
                return;
            }
        };

        match repository.claim_next_task(lane).await {
            Ok(Some(task)) => {
                let repo = repository.clone();
                let ctx = context.clone();
                tokio::spawn(async move {
                    let _permit = permit;
                    if let Err(e) = Self::process_task(task, repo, ctx).await {
                        tracing::error!(error = %e, "Task processing failed");
                    }
                });
            }
            Ok(None) => {
                drop(permit);
                tracing::trace!("No tasks available in lane");
            }
            Err(e) => {
                drop(permit);
                tracing::error!(error = %e, "Failed to claim task from queue");
            }
        }
    }

    /// Run one claimed task under its time limits and record the outcome.
    ///
    /// Past the soft limit a warning is logged and the handler keeps running.
    /// Past the hard limit the handler is dropped and the attempt counts as failed.
    #[tracing::instrument(skip(task, repository, context), fields(task.id = %task.id, task_type = %task.task_type, task.lane = %task.lane))]
    pub(crate) async fn process_task(
        task: Task,
        repository: Arc<dyn TaskRepositoryTrait>,
        context: Weak<dyn TaskHandlerContext>,
    ) -> Result<()> {
        let ctx = context.upgrade().ok_or_else(|| {
            anyhow::anyhow!("TaskHandlerContext was dropped, cannot process task")
        })?;

        let soft_limit = Duration::from_secs(task.soft_time_limit_seconds.max(1) as u64);
        let hard_limit = Duration::from_secs(task.hard_time_limit_seconds.max(1) as u64);

        let dispatch = ctx.dispatch_task(&task);
        tokio::pin!(dispatch);
        let soft = sleep(soft_limit);
        tokio::pin!(soft);
        let hard = sleep(hard_limit);
        tokio::pin!(hard);
        let mut soft_fired = false;

        let outcome = loop {
            tokio::select! {
                result = &mut dispatch => break Some(result),
                _ = &mut soft, if !soft_fired => {
                    soft_fired = true;
                    tracing::warn!(
                        soft_time_limit_seconds = task.soft_time_limit_seconds,
                        "Task exceeded its soft time limit"
                    );
                }
                _ = &mut hard => break None,
            }
        };

        match outcome {
            Some(Ok(task_result)) => {
                repository
                    .mark_completed(task.id, task_result)
                    .await
                    .context("Failed to mark task as completed")?;
                tracing::info!("Task completed successfully");
                Ok(())
            }
            Some(Err(e)) => {
                let is_unrecoverable = e
                    .downcast_ref::<TaskError>()
                    .map(|te| !te.is_recoverable())
                    .unwrap_or(false);

                tracing::error!(
                    error = %e,
                    retry_count = task.retry_count,
                    max_retries = task.max_retries,
                    unrecoverable = is_unrecoverable,
                    "Task execution failed"
                );

                let error_result = json!({
                    "error": e.to_string(),
                    "trace": format_diagnostic(&e),
                    "retry_count": task.retry_count,
                    "unrecoverable": is_unrecoverable,
                });

                if is_unrecoverable {
                    repository
                        .mark_failed(task.id, error_result)
                        .await
                        .context("Failed to mark task as failed")?;
                    tracing::error!("Task failed with unrecoverable error, will not retry");
                    return Err(e);
                }

                Self::retry_or_fail(&task, repository.as_ref(), error_result).await?;
                Ok(())
            }
            None => {
                tracing::error!(
                    hard_time_limit_seconds = task.hard_time_limit_seconds,
                    "Task exceeded its hard time limit"
                );
                let error_result = json!({
                    "error": "Task execution timed out",
                    "hard_time_limit_seconds": task.hard_time_limit_seconds,
                    "retry_count": task.retry_count,
                });
                Self::retry_or_fail(&task, repository.as_ref(), error_result).await?;
                Ok(())
            }
        }
    }

    async fn retry_or_fail(
        task: &Task,
        repository: &dyn TaskRepositoryTrait,
        error_result: serde_json::Value,
    ) -> Result<()> {
        if task.can_retry() {
            let delay = retry_delay_seconds(task);
            let run_at = Utc::now() + chrono::Duration::seconds(delay as i64);
            tracing::info!(
                retry_count = task.retry_count + 1,
                delay_seconds = delay,
                "Scheduling task retry"
            );
            repository
                .schedule_retry(task.id, run_at, error_result)
                .await
                .context("Failed to schedule task retry")?;
        } else {
            repository
                .mark_failed(task.id, error_result)
                .await
                .context("Failed to mark task as failed")?;
            tracing::error!("Task failed after max retries");
        }
        Ok(())
    }

    /// Signals every lane to stop claiming new tasks.
    pub fn shutdown(&self) {
        tracing::info!("Initiating task queue shutdown");
        let _ = self.shutdown_tx.send(());
    }
}
