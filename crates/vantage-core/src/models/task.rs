use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;
use uuid::Uuid;

use super::alert::Alert;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(type_name = "text", rename_all = "snake_case"))]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    RefreshAllData,
    WarmCache,
    HealthCheck,
    GenerateDailyReport,
    SendAlert,
    CleanupOldData,
}

impl TaskType {
    pub const ALL: [TaskType; 6] = [
        TaskType::RefreshAllData,
        TaskType::WarmCache,
        TaskType::HealthCheck,
        TaskType::GenerateDailyReport,
        TaskType::SendAlert,
        TaskType::CleanupOldData,
    ];

    /// Lane a task of this type is routed to unless the submitter overrides it.
    pub fn default_lane(&self) -> TaskLane {
        match self {
            TaskType::RefreshAllData => TaskLane::DataRefresh,
            TaskType::WarmCache => TaskLane::CacheOperations,
            TaskType::HealthCheck => TaskLane::Default,
            TaskType::GenerateDailyReport => TaskLane::Reports,
            TaskType::SendAlert => TaskLane::Alerts,
            TaskType::CleanupOldData => TaskLane::Default,
        }
    }
}

impl Display for TaskType {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            TaskType::RefreshAllData => write!(f, "refresh_all_data"),
            TaskType::WarmCache => write!(f, "warm_cache"),
            TaskType::HealthCheck => write!(f, "health_check"),
            TaskType::GenerateDailyReport => write!(f, "generate_daily_report"),
            TaskType::SendAlert => write!(f, "send_alert"),
            TaskType::CleanupOldData => write!(f, "cleanup_old_data"),
        }
    }
}

impl FromStr for TaskType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "refresh_all_data" => Ok(TaskType::RefreshAllData),
            "warm_cache" => Ok(TaskType::WarmCache),
            "health_check" => Ok(TaskType::HealthCheck),
            "generate_daily_report" => Ok(TaskType::GenerateDailyReport),
            "send_alert" => Ok(TaskType::SendAlert),
            "cleanup_old_data" => Ok(TaskType::CleanupOldData),
            _ => Err(anyhow::anyhow!("Invalid task type: {}", s)),
        }
    }
}

/// Named queue lanes. Each lane has its own worker pool so a long refresh
/// never starves alerts or health checks.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(type_name = "text", rename_all = "snake_case"))]
#[serde(rename_all = "snake_case")]
pub enum TaskLane {
    Default,
    DataRefresh,
    CacheOperations,
    Reports,
    Alerts,
}

impl TaskLane {
    pub const ALL: [TaskLane; 5] = [
        TaskLane::Default,
        TaskLane::DataRefresh,
        TaskLane::CacheOperations,
        TaskLane::Reports,
        TaskLane::Alerts,
    ];
}

impl Display for TaskLane {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            TaskLane::Default => write!(f, "default"),
            TaskLane::DataRefresh => write!(f, "data_refresh"),
            TaskLane::CacheOperations => write!(f, "cache_operations"),
            TaskLane::Reports => write!(f, "reports"),
            TaskLane::Alerts => write!(f, "alerts"),
        }
    }
}

impl FromStr for TaskLane {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "default" => Ok(TaskLane::Default),
            "data_refresh" => Ok(TaskLane::DataRefresh),
            "cache_operations" => Ok(TaskLane::CacheOperations),
            "reports" => Ok(TaskLane::Reports),
            "alerts" => Ok(TaskLane::Alerts),
            _ => Err(anyhow::anyhow!("Invalid task lane: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(type_name = "text", rename_all = "lowercase"))]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Scheduled,
}

impl TaskStatus {
    pub fn is_finished(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

impl Display for TaskStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::Running => write!(f, "running"),
            TaskStatus::Completed => write!(f, "completed"),
            TaskStatus::Failed => write!(f, "failed"),
            TaskStatus::Scheduled => write!(f, "scheduled"),
        }
    }
}

impl FromStr for TaskStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "running" => Ok(TaskStatus::Running),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            "scheduled" => Ok(TaskStatus::Scheduled),
            _ => Err(anyhow::anyhow!("Invalid task status: {}", s)),
        }
    }
}

/// Retry and time-limit settings attached to a task at submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskOptions {
    pub max_retries: i32,
    pub retry_delay_seconds: i32,
    pub soft_time_limit_seconds: i32,
    pub hard_time_limit_seconds: i32,
}

impl Default for TaskOptions {
    fn default() -> Self {
        Self {
            max_retries: 0,
            retry_delay_seconds: 0,
            soft_time_limit_seconds: 3600,
            hard_time_limit_seconds: 7200,
        }
    }
}

/// A task waiting to be inserted into the queue.
#[derive(Debug, Clone)]
pub struct NewTask {
    pub task_type: TaskType,
    pub lane: TaskLane,
    pub payload: serde_json::Value,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub options: TaskOptions,
}

impl NewTask {
    pub fn new(task_type: TaskType, payload: serde_json::Value, options: TaskOptions) -> Self {
        Self {
            task_type,
            lane: task_type.default_lane(),
            payload,
            scheduled_at: None,
            options,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub task_type: TaskType,
    pub lane: TaskLane,
    pub status: TaskStatus,
    pub payload: serde_json::Value,
    pub result: Option<serde_json::Value>,
    pub scheduled_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub retry_count: i32,
    pub max_retries: i32,
    pub retry_delay_seconds: i32,
    pub soft_time_limit_seconds: i32,
    pub hard_time_limit_seconds: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(feature = "sqlx")]
impl sqlx::FromRow<'_, sqlx::postgres::PgRow> for Task {
    fn from_row(row: &sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;
        Ok(Task {
            id: row.try_get("id")?,
            task_type: row.try_get::<String, _>("task_type")?.parse().map_err(|e| {
                sqlx::Error::Decode(format!("Failed to parse task_type: {}", e).into())
            })?,
            lane: row.try_get::<String, _>("lane")?.parse().map_err(|e| {
                sqlx::Error::Decode(format!("Failed to parse lane: {}", e).into())
            })?,
            status: row.try_get::<String, _>("status")?.parse().map_err(|e| {
                sqlx::Error::Decode(format!("Failed to parse status: {}", e).into())
            })?,
            payload: row.try_get("payload")?,
            result: row.try_get("result")?,
            scheduled_at: row.try_get("scheduled_at")?,
            started_at: row.try_get("started_at")?,
            completed_at: row.try_get("completed_at")?,
            retry_count: row.try_get("retry_count")?,
            max_retries: row.try_get("max_retries")?,
            retry_delay_seconds: row.try_get("retry_delay_seconds")?,
            soft_time_limit_seconds: row.try_get("soft_time_limit_seconds")?,
            hard_time_limit_seconds: row.try_get("hard_time_limit_seconds")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl Task {
    /// Materialize a queued task from a submission. Used by stores that do
    /// not generate rows server-side.
    pub fn from_new(new_task: NewTask, now: DateTime<Utc>) -> Self {
        let scheduled_at = new_task.scheduled_at.unwrap_or(now);
        let status = if scheduled_at > now {
            TaskStatus::Scheduled
        } else {
            TaskStatus::Pending
        };
        Self {
            id: Uuid::new_v4(),
            task_type: new_task.task_type,
            lane: new_task.lane,
            status,
            payload: new_task.payload,
            result: None,
            scheduled_at,
            started_at: None,
            completed_at: None,
            retry_count: 0,
            max_retries: new_task.options.max_retries,
            retry_delay_seconds: new_task.options.retry_delay_seconds,
            soft_time_limit_seconds: new_task.options.soft_time_limit_seconds,
            hard_time_limit_seconds: new_task.options.hard_time_limit_seconds,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_ready_to_run(&self) -> bool {
        matches!(self.status, TaskStatus::Pending | TaskStatus::Scheduled)
            && self.scheduled_at <= Utc::now()
    }

    pub fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }

    /// True once a running task has outlived its hard limit plus `grace_seconds`.
    pub fn is_stale(&self, now: DateTime<Utc>, grace_seconds: i64) -> bool {
        match (self.status, self.started_at) {
            (TaskStatus::Running, Some(started_at)) => {
                let elapsed = now.signed_duration_since(started_at).num_seconds();
                elapsed >= self.hard_time_limit_seconds as i64 + grace_seconds
            }
            _ => false,
        }
    }

    /// Extract the payload as a typed struct, returning an error on failure.
    pub fn try_payload_as<P: TaskPayload>(&self) -> Result<P, serde_json::Error> {
        serde_json::from_value(self.payload.clone())
    }

    /// Create a new payload from a typed struct.
    pub fn payload_from<P: TaskPayload>(payload: &P) -> serde_json::Value {
        serde_json::to_value(payload).unwrap_or_default()
    }
}

/// Trait for type-safe task payloads
pub trait TaskPayload: Serialize + for<'de> Deserialize<'de> {
    fn task_type() -> TaskType;
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RefreshAllDataPayload {
    /// Who asked for the refresh ("scheduler", "admin").
    #[serde(default)]
    pub triggered_by: Option<String>,
}

impl TaskPayload for RefreshAllDataPayload {
    fn task_type() -> TaskType {
        TaskType::RefreshAllData
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerateDailyReportPayload {
    pub refresh_id: Option<Uuid>,
}

impl TaskPayload for GenerateDailyReportPayload {
    fn task_type() -> TaskType {
        TaskType::GenerateDailyReport
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendAlertPayload {
    pub alert: Alert,
}

impl TaskPayload for SendAlertPayload {
    fn task_type() -> TaskType {
        TaskType::SendAlert
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn task_with(status: TaskStatus, retry_count: i32, max_retries: i32) -> Task {
        let mut options = TaskOptions::default();
        options.max_retries = max_retries;
        let mut task = Task::from_new(
            NewTask::new(TaskType::RefreshAllData, serde_json::json!({}), options),
            Utc::now(),
        );
        task.status = status;
        task.retry_count = retry_count;
        task
    }

    #[test]
    fn test_task_type_round_trips_through_str() {
        for task_type in TaskType::ALL {
            let parsed: TaskType = task_type.to_string().parse().unwrap();
            assert_eq!(parsed, task_type);
        }
        assert!("video_transcode".parse::<TaskType>().is_err());
    }

    #[test]
    fn test_task_lane_round_trips_through_str() {
        for lane in TaskLane::ALL {
            let parsed: TaskLane = lane.to_string().parse().unwrap();
            assert_eq!(parsed, lane);
        }
        assert!("celery".parse::<TaskLane>().is_err());
    }

    #[test]
    fn test_default_lane_routing() {
        assert_eq!(TaskType::RefreshAllData.default_lane(), TaskLane::DataRefresh);
        assert_eq!(TaskType::WarmCache.default_lane(), TaskLane::CacheOperations);
        assert_eq!(TaskType::HealthCheck.default_lane(), TaskLane::Default);
        assert_eq!(TaskType::GenerateDailyReport.default_lane(), TaskLane::Reports);
        assert_eq!(TaskType::SendAlert.default_lane(), TaskLane::Alerts);
        assert_eq!(TaskType::CleanupOldData.default_lane(), TaskLane::Default);
    }

    #[test]
    fn test_task_status_from_str() {
        assert_eq!("pending".parse::<TaskStatus>().unwrap(), TaskStatus::Pending);
        assert_eq!("running".parse::<TaskStatus>().unwrap(), TaskStatus::Running);
        assert_eq!(
            "completed".parse::<TaskStatus>().unwrap(),
            TaskStatus::Completed
        );
        assert_eq!("failed".parse::<TaskStatus>().unwrap(), TaskStatus::Failed);
        assert_eq!(
            "scheduled".parse::<TaskStatus>().unwrap(),
            TaskStatus::Scheduled
        );
        assert!("cancelled".parse::<TaskStatus>().is_err());
    }

    #[test]
    fn test_future_submission_is_scheduled() {
        let now = Utc::now();
        let mut new_task = NewTask::new(
            TaskType::WarmCache,
            serde_json::json!({}),
            TaskOptions::default(),
        );
        new_task.scheduled_at = Some(now + Duration::minutes(5));
        let task = Task::from_new(new_task, now);
        assert_eq!(task.status, TaskStatus::Scheduled);
        assert!(!task.is_ready_to_run());
    }

    #[test]
    fn test_task_is_ready_to_run_with_pending_status() {
        let task = task_with(TaskStatus::Pending, 0, 3);
        assert!(task.is_ready_to_run());
    }

    #[test]
    fn test_task_is_not_ready_when_running() {
        let task = task_with(TaskStatus::Running, 0, 3);
        assert!(!task.is_ready_to_run());
    }

    #[test]
    fn test_task_can_retry_when_under_limit() {
        assert!(task_with(TaskStatus::Running, 2, 3).can_retry());
        assert!(!task_with(TaskStatus::Running, 3, 3).can_retry());
        assert!(!task_with(TaskStatus::Running, 0, 0).can_retry());
    }

    #[test]
    fn test_stale_detection_uses_hard_limit_and_grace() {
        let now = Utc::now();
        let mut task = task_with(TaskStatus::Running, 0, 3);
        task.hard_time_limit_seconds = 60;
        task.started_at = Some(now - Duration::seconds(100));
        assert!(!task.is_stale(now, 60));
        assert!(task.is_stale(now, 30));

        task.status = TaskStatus::Completed;
        assert!(!task.is_stale(now, 0));
    }

    #[test]
    fn test_payload_round_trip() {
        let refresh_id = Uuid::new_v4();
        let payload = GenerateDailyReportPayload {
            refresh_id: Some(refresh_id),
        };
        let mut task = task_with(TaskStatus::Pending, 0, 0);
        task.payload = Task::payload_from(&payload);
        let decoded: GenerateDailyReportPayload = task.try_payload_as().unwrap();
        assert_eq!(decoded.refresh_id, Some(refresh_id));
        assert_eq!(
            <GenerateDailyReportPayload as TaskPayload>::task_type(),
            TaskType::GenerateDailyReport
        );
    }
}
