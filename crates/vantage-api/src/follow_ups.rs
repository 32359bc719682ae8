//! Follow-up work a refresh hands to the task queue.

use async_trait::async_trait;
use uuid::Uuid;

use vantage_core::models::{Alert, GenerateDailyReportPayload, SendAlertPayload, Task, TaskType};
use vantage_pipeline::FollowUpScheduler;
use vantage_worker::TaskQueue;

/// Enqueues report and alert tasks on their own lanes.
pub struct QueueFollowUps {
    queue: TaskQueue,
}

impl QueueFollowUps {
    pub fn new(queue: TaskQueue) -> Self {
        Self { queue }
    }
}

#[async_trait]
impl FollowUpScheduler for QueueFollowUps {
    async fn schedule_report(&self, refresh_id: Uuid) -> anyhow::Result<()> {
        let payload = Task::payload_from(&GenerateDailyReportPayload {
            refresh_id: Some(refresh_id),
        });
        let task_id = self
            .queue
            .submit_task(TaskType::GenerateDailyReport, payload)
            .await?;
        tracing::debug!(refresh_id = %refresh_id, task.id = %task_id, "Daily report queued");
        Ok(())
    }

    async fn schedule_alert(&self, alert: &Alert) -> anyhow::Result<()> {
        let payload = Task::payload_from(&SendAlertPayload {
            alert: alert.clone(),
        });
        self.queue.submit_task(TaskType::SendAlert, payload).await?;
        Ok(())
    }
}
