//! Health and metrics endpoints.

use crate::constants::{METRICS_WINDOW_DAYS, SERVICE_VERSION};
use crate::error::HttpAppError;
use crate::state::AppState;
use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::sync::Arc;
use vantage_core::models::{
    CacheStats, OverallStatus, RefreshJob, RefreshStatus, RowCounts, SystemHealth,
};

#[derive(Debug, Serialize)]
pub struct LastRefresh {
    pub started_at: DateTime<Utc>,
    pub status: RefreshStatus,
    pub duration_seconds: Option<f64>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    #[serde(flatten)]
    pub health: SystemHealth,
    pub last_data_refresh: Option<LastRefresh>,
}

/// Live probe of the database, cache and data freshness. 503 when degraded.
#[tracing::instrument(skip(state))]
pub async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let services = &state.services;
    let health = services.health.check(Utc::now()).await;

    let last_data_refresh = match services.stores.jobs.list_recent(1).await {
        Ok(jobs) => jobs.first().map(|job| LastRefresh {
            started_at: job.started_at,
            status: job.status,
            duration_seconds: job.duration_seconds,
        }),
        Err(e) => {
            tracing::error!(error = %e, "Last refresh lookup failed");
            None
        }
    };

    let (code, status) = match health.overall_status {
        OverallStatus::Healthy => (StatusCode::OK, "healthy"),
        OverallStatus::Degraded => (StatusCode::SERVICE_UNAVAILABLE, "unhealthy"),
    };

    (
        code,
        Json(HealthResponse {
            status,
            version: SERVICE_VERSION,
            health,
            last_data_refresh,
        }),
    )
}

#[derive(Debug, Default, PartialEq, Serialize)]
pub struct RefreshMetrics {
    pub window_days: i64,
    pub total: usize,
    pub successful: usize,
    pub average_duration_seconds: Option<f64>,
    pub success_rate: f64,
}

impl RefreshMetrics {
    fn from_jobs(jobs: &[RefreshJob], since: DateTime<Utc>, window_days: i64) -> Self {
        let recent: Vec<&RefreshJob> = jobs.iter().filter(|j| j.started_at >= since).collect();
        let successful = recent
            .iter()
            .filter(|j| j.status == RefreshStatus::Completed)
            .count();
        let durations: Vec<f64> = recent.iter().filter_map(|j| j.duration_seconds).collect();
        let average_duration_seconds = (!durations.is_empty())
            .then(|| durations.iter().sum::<f64>() / durations.len() as f64);

        Self {
            window_days,
            total: recent.len(),
            successful,
            average_duration_seconds,
            success_rate: successful as f64 / recent.len().max(1) as f64 * 100.0,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct MetricsResponse {
    pub cache_metrics: CacheStats,
    pub data_counts: RowCounts,
    pub data_refresh_metrics: RefreshMetrics,
    pub timestamp: DateTime<Utc>,
}

#[tracing::instrument(skip(state))]
pub async fn metrics(
    State(state): State<Arc<AppState>>,
) -> Result<Json<MetricsResponse>, HttpAppError> {
    let stores = &state.services.stores;
    let now = Utc::now();

    let (cache_metrics, counts, jobs) = tokio::join!(
        stores.cache.stats(),
        stores.dataset.counts(),
        stores.jobs.list_recent(crate::constants::MAX_LIST_LIMIT),
    );

    Ok(Json(MetricsResponse {
        cache_metrics,
        data_counts: counts?,
        data_refresh_metrics: RefreshMetrics::from_jobs(
            &jobs?,
            now - Duration::days(METRICS_WINDOW_DAYS),
            METRICS_WINDOW_DAYS,
        ),
        timestamp: now,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(status: RefreshStatus, age_days: i64, duration: Option<f64>) -> RefreshJob {
        let mut job = RefreshJob::start("main", Utc::now() - Duration::days(age_days));
        job.status = status;
        job.duration_seconds = duration;
        job
    }

    #[test]
    fn test_refresh_metrics_only_count_window() {
        let jobs = vec![
            job(RefreshStatus::Completed, 1, Some(100.0)),
            job(RefreshStatus::Failed, 2, Some(20.0)),
            job(RefreshStatus::Completed, 3, None),
            job(RefreshStatus::Completed, 10, Some(500.0)),
        ];
        let metrics = RefreshMetrics::from_jobs(&jobs, Utc::now() - Duration::days(7), 7);

        assert_eq!(metrics.total, 3);
        assert_eq!(metrics.successful, 2);
        assert_eq!(metrics.average_duration_seconds, Some(60.0));
        assert!((metrics.success_rate - 200.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_refresh_metrics_without_jobs() {
        let metrics = RefreshMetrics::from_jobs(&[], Utc::now(), 7);
        assert_eq!(metrics.success_rate, 0.0);
        assert_eq!(metrics.average_duration_seconds, None);
    }
}
