use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::cache::CacheStats;
use super::refresh_job::RefreshJob;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ComponentStatus {
    Healthy,
    Unhealthy,
    Fresh,
    Stale,
    Unknown,
}

impl ComponentStatus {
    pub fn is_ok(&self) -> bool {
        matches!(self, ComponentStatus::Healthy | ComponentStatus::Fresh)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ComponentHealth {
    pub fn healthy() -> Self {
        Self {
            status: ComponentStatus::Healthy,
            detail: None,
        }
    }

    pub fn with(status: ComponentStatus, detail: impl Into<String>) -> Self {
        Self {
            status,
            detail: Some(detail.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OverallStatus {
    Healthy,
    Degraded,
}

/// Result of the periodic health probe, cached as `system_health`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemHealth {
    pub timestamp: DateTime<Utc>,
    pub database: ComponentHealth,
    pub cache: ComponentHealth,
    pub data_freshness: ComponentHealth,
    pub overall_status: OverallStatus,
    pub unhealthy_services: Vec<String>,
}

impl SystemHealth {
    pub fn new(
        database: ComponentHealth,
        cache: ComponentHealth,
        data_freshness: ComponentHealth,
    ) -> Self {
        let unhealthy_services: Vec<String> = [
            ("database", &database),
            ("cache", &cache),
            ("data_freshness", &data_freshness),
        ]
        .iter()
        .filter(|(_, health)| !health.status.is_ok())
        .map(|(name, _)| name.to_string())
        .collect();
        let overall_status = if unhealthy_services.is_empty() {
            OverallStatus::Healthy
        } else {
            OverallStatus::Degraded
        };
        Self {
            timestamp: Utc::now(),
            database,
            cache,
            data_freshness,
            overall_status,
            unhealthy_services,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefreshSummary {
    pub refresh_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub duration_seconds: Option<f64>,
    pub orders_processed: Option<i64>,
    pub vendors_processed: Option<i64>,
}

impl From<&RefreshJob> for RefreshSummary {
    fn from(job: &RefreshJob) -> Self {
        Self {
            refresh_id: job.id,
            started_at: job.started_at,
            duration_seconds: job.duration_seconds,
            orders_processed: job.orders_processed,
            vendors_processed: job.vendors_processed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSummary {
    pub total_orders: i64,
    pub total_vendors: i64,
    pub last_refresh: Option<RefreshSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyReport {
    pub date: NaiveDate,
    pub data_summary: DataSummary,
    pub cache_performance: CacheStats,
    pub system_status: String,
    pub generated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overall_status_degrades_on_any_failure() {
        let health = SystemHealth::new(
            ComponentHealth::healthy(),
            ComponentHealth::with(ComponentStatus::Unhealthy, "connection refused"),
            ComponentHealth::with(ComponentStatus::Fresh, "2.0 hours old"),
        );
        assert_eq!(health.overall_status, OverallStatus::Degraded);
        assert_eq!(health.unhealthy_services, vec!["cache".to_string()]);
    }

    #[test]
    fn test_unknown_freshness_counts_as_unhealthy() {
        let health = SystemHealth::new(
            ComponentHealth::healthy(),
            ComponentHealth::healthy(),
            ComponentHealth::with(ComponentStatus::Unknown, "no refresh jobs"),
        );
        assert_eq!(health.unhealthy_services, vec!["data_freshness".to_string()]);
    }

    #[test]
    fn test_all_ok_is_healthy() {
        let health = SystemHealth::new(
            ComponentHealth::healthy(),
            ComponentHealth::healthy(),
            ComponentHealth::with(ComponentStatus::Fresh, "1.0 hours old"),
        );
        assert_eq!(health.overall_status, OverallStatus::Healthy);
        assert!(health.unhealthy_services.is_empty());
    }
}
