//! Administrative triggers and read-outs.
//!
//! Triggers only enqueue; they answer `queued` with the task id and never wait
//! for the work.

use crate::constants::{DEFAULT_ALERT_LIMIT, DEFAULT_JOB_LIMIT, MAX_LIST_LIMIT};
use crate::error::{HttpAppError, ValidatedQuery};
use crate::state::AppState;
use axum::{extract::State, http::StatusCode, Json};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;
use vantage_core::models::{
    Alert, DailyReport, RefreshAllDataPayload, RefreshJob, Task, TaskType,
};
use vantage_core::AppError;
use vantage_pipeline::alerts::ALERT_RING_CAPACITY;

#[derive(Debug, Serialize)]
pub struct TaskQueuedResponse {
    pub status: &'static str,
    pub task_id: Uuid,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl TaskQueuedResponse {
    fn queued(task_id: Uuid, message: impl Into<String>) -> Self {
        Self {
            status: "queued",
            task_id,
            message: message.into(),
            timestamp: Utc::now(),
        }
    }
}

#[tracing::instrument(skip(state))]
pub async fn trigger_refresh(
    State(state): State<Arc<AppState>>,
) -> Result<(StatusCode, Json<TaskQueuedResponse>), HttpAppError> {
    let payload = Task::payload_from(&RefreshAllDataPayload {
        triggered_by: Some("admin".to_string()),
    });
    let task_id = state
        .task_queue
        .submit_task(TaskType::RefreshAllData, payload)
        .await?;
    tracing::info!(task.id = %task_id, "Manual data refresh queued");
    Ok((
        StatusCode::ACCEPTED,
        Json(TaskQueuedResponse::queued(task_id, "Data refresh has been queued")),
    ))
}

#[tracing::instrument(skip(state))]
pub async fn trigger_warm_cache(
    State(state): State<Arc<AppState>>,
) -> Result<(StatusCode, Json<TaskQueuedResponse>), HttpAppError> {
    let task_id = state
        .task_queue
        .submit_task(TaskType::WarmCache, serde_json::json!({}))
        .await?;
    tracing::info!(task.id = %task_id, "Manual cache warm queued");
    Ok((
        StatusCode::ACCEPTED,
        Json(TaskQueuedResponse::queued(task_id, "Cache warming has been queued")),
    ))
}

#[derive(Debug, Deserialize)]
pub struct ClearCacheQuery {
    pub pattern: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ClearCacheResponse {
    pub status: &'static str,
    pub deleted_keys: u64,
    pub pattern: String,
    pub timestamp: DateTime<Utc>,
}

/// Delete every key matching a glob pattern, all keys when none is given.
#[tracing::instrument(skip(state))]
pub async fn clear_cache(
    State(state): State<Arc<AppState>>,
    ValidatedQuery(query): ValidatedQuery<ClearCacheQuery>,
) -> Result<Json<ClearCacheResponse>, HttpAppError> {
    let pattern = query.pattern.unwrap_or_else(|| "*".to_string());
    if pattern.trim().is_empty() {
        return Err(AppError::InvalidInput("pattern must not be empty".to_string()).into());
    }

    let deleted_keys = state.services.stores.cache.invalidate(&pattern).await;
    tracing::info!(pattern = %pattern, deleted_keys, "Cache cleared");

    Ok(Json(ClearCacheResponse {
        status: "success",
        deleted_keys,
        pattern,
        timestamp: Utc::now(),
    }))
}

#[derive(Debug, Deserialize)]
pub struct DailyReportQuery {
    pub date: Option<NaiveDate>,
}

/// Latest report, or the one stored for `date`.
#[tracing::instrument(skip(state))]
pub async fn get_daily_report(
    State(state): State<Arc<AppState>>,
    ValidatedQuery(query): ValidatedQuery<DailyReportQuery>,
) -> Result<Json<DailyReport>, HttpAppError> {
    state
        .services
        .reports
        .get_report(query.date)
        .await
        .map(Json)
        .ok_or_else(|| AppError::NotFound("Report not found".to_string()).into())
}

#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<i64>,
}

fn clamp_limit(limit: Option<i64>, default: i64, max: i64) -> i64 {
    limit.unwrap_or(default).clamp(1, max)
}

#[tracing::instrument(skip(state))]
pub async fn list_alerts(
    State(state): State<Arc<AppState>>,
    ValidatedQuery(query): ValidatedQuery<LimitQuery>,
) -> Result<Json<Vec<Alert>>, HttpAppError> {
    let limit = clamp_limit(
        query.limit,
        DEFAULT_ALERT_LIMIT as i64,
        ALERT_RING_CAPACITY as i64,
    );
    Ok(Json(state.services.alerts.recent(limit as usize).await))
}

#[tracing::instrument(skip(state))]
pub async fn list_refresh_jobs(
    State(state): State<Arc<AppState>>,
    ValidatedQuery(query): ValidatedQuery<LimitQuery>,
) -> Result<Json<Vec<RefreshJob>>, HttpAppError> {
    let limit = clamp_limit(query.limit, DEFAULT_JOB_LIMIT, MAX_LIST_LIMIT);
    let jobs = state.services.stores.jobs.list_recent(limit).await?;
    Ok(Json(jobs))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_limit() {
        assert_eq!(clamp_limit(None, 20, 200), 20);
        assert_eq!(clamp_limit(Some(0), 20, 200), 1);
        assert_eq!(clamp_limit(Some(5000), 20, 200), 200);
    }
}
