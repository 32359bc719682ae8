use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use vantage_cache::{CacheStore, HOUR};
use vantage_core::constants::cache_keys::SYSTEM_HEALTH;
use vantage_core::models::{
    Alert, AlertSeverity, ComponentHealth, ComponentStatus, OverallStatus, SystemHealth,
};
use vantage_db::{DatasetRepositoryTrait, RefreshJobRepositoryTrait};

use crate::alerts::AlertService;

/// Periodic probe of the store, the cache and data freshness.
#[derive(Clone)]
pub struct HealthService {
    dataset: Arc<dyn DatasetRepositoryTrait>,
    jobs: Arc<dyn RefreshJobRepositoryTrait>,
    cache: Arc<CacheStore>,
    alerts: AlertService,
    pipeline_name: String,
    staleness_threshold: Duration,
}

impl HealthService {
    pub fn new(
        dataset: Arc<dyn DatasetRepositoryTrait>,
        jobs: Arc<dyn RefreshJobRepositoryTrait>,
        cache: Arc<CacheStore>,
        alerts: AlertService,
        pipeline_name: impl Into<String>,
        staleness_threshold_hours: i64,
    ) -> Self {
        Self {
            dataset,
            jobs,
            cache,
            alerts,
            pipeline_name: pipeline_name.into(),
            staleness_threshold: Duration::hours(staleness_threshold_hours),
        }
    }

    /// Probe every component, cache the result for an hour and raise a
    /// medium alert when anything is unhealthy.
    #[tracing::instrument(skip(self))]
    pub async fn check(&self, now: DateTime<Utc>) -> SystemHealth {
        let database = match self.dataset.ping().await {
            Ok(()) => ComponentHealth::healthy(),
            Err(e) => ComponentHealth::with(ComponentStatus::Unhealthy, e.to_string()),
        };
        let cache = match self.cache.ping().await {
            Ok(()) => ComponentHealth::healthy(),
            Err(e) => ComponentHealth::with(ComponentStatus::Unhealthy, e.to_string()),
        };
        let data_freshness = self.freshness(now).await;

        let mut health = SystemHealth::new(database, cache, data_freshness);
        health.timestamp = now;

        self.cache.put_json(SYSTEM_HEALTH, &health, HOUR).await;

        if health.overall_status == OverallStatus::Degraded {
            let alert = Alert::new(
                "System health degraded",
                format!("Unhealthy services: {}", health.unhealthy_services.join(", ")),
                AlertSeverity::Medium,
            );
            self.alerts.raise(&alert).await;
        } else {
            tracing::debug!("Health check passed");
        }

        health
    }

    /// Last probe result, if still cached.
    pub async fn cached(&self) -> Option<SystemHealth> {
        self.cache.get_json(SYSTEM_HEALTH).await
    }

    async fn freshness(&self, now: DateTime<Utc>) -> ComponentHealth {
        match self.jobs.latest_completed(&self.pipeline_name).await {
            Ok(Some(job)) => {
                let age = now - job.started_at;
                if age > self.staleness_threshold {
                    ComponentHealth::with(
                        ComponentStatus::Stale,
                        format!("last refresh {} hours ago", age.num_hours()),
                    )
                } else {
                    ComponentHealth {
                        status: ComponentStatus::Fresh,
                        detail: None,
                    }
                }
            }
            Ok(None) => ComponentHealth::with(ComponentStatus::Unknown, "no completed refresh"),
            Err(e) => ComponentHealth::with(ComponentStatus::Unknown, e.to_string()),
        }
    }
}
