//! Vantage Pipeline
//!
//! The refresh orchestrator and the services around it: the cache-aside
//! filtered read path, cache warming, daily reports, health probes, alerts
//! and cleanup.

pub mod alerts;
pub mod error;
pub mod filtered;
pub mod health;
pub mod maintenance;
pub mod orchestrator;
pub mod reports;
pub mod test_helpers;
pub mod transform;
pub mod warm;

use std::sync::Arc;

use vantage_cache::{CacheStore, HOUR};
use vantage_core::Config;
use vantage_db::{DatasetRepositoryTrait, RefreshJobRepositoryTrait, TaskRepositoryTrait};
use vantage_source::DataSource;

pub use alerts::AlertService;
pub use error::PipelineError;
pub use filtered::FilteredDataService;
pub use health::HealthService;
pub use maintenance::{CleanupReport, CleanupService, RetentionPolicy};
pub use orchestrator::{FollowUpScheduler, RefreshOrchestrator, RefreshOutcome, RefreshSettings};
pub use reports::ReportService;
pub use transform::{TransformReport, Transformer};
pub use warm::{CacheWarmer, WarmReport};

/// Storage handles the services are built over.
#[derive(Clone)]
pub struct PipelineStores {
    pub dataset: Arc<dyn DatasetRepositoryTrait>,
    pub jobs: Arc<dyn RefreshJobRepositoryTrait>,
    pub tasks: Arc<dyn TaskRepositoryTrait>,
    pub cache: Arc<CacheStore>,
    pub source: Arc<dyn DataSource>,
}

#[derive(Clone)]
pub struct PipelineServices {
    pub stores: PipelineStores,
    pub filtered: Arc<FilteredDataService>,
    pub warmer: CacheWarmer,
    pub orchestrator: Arc<RefreshOrchestrator>,
    pub reports: ReportService,
    pub health: HealthService,
    pub cleanup: CleanupService,
    pub alerts: AlertService,
}

impl PipelineServices {
    pub fn build(
        config: &Config,
        stores: PipelineStores,
        follow_ups: Arc<dyn FollowUpScheduler>,
    ) -> Self {
        let pipeline = &config.pipeline;
        let scheduler = &config.scheduler;

        let filtered = Arc::new(FilteredDataService::new(
            stores.dataset.clone(),
            stores.cache.clone(),
            HOUR * pipeline.filtered_cache_ttl_hours as u32,
        ));
        let warmer = CacheWarmer::new(
            filtered.clone(),
            pipeline.cities.clone(),
            pipeline.business_lines.clone(),
            pipeline.prewarm_batch_size,
        );
        let alerts = AlertService::new(stores.cache.clone());
        let orchestrator = Arc::new(RefreshOrchestrator::new(
            stores.source.clone(),
            stores.dataset.clone(),
            stores.jobs.clone(),
            stores.cache.clone(),
            warmer.clone(),
            alerts.clone(),
            follow_ups,
            Transformer::new(pipeline.organic_backfill),
            RefreshSettings::from_config(pipeline, &config.queue),
        ));
        let reports = ReportService::new(
            stores.dataset.clone(),
            stores.jobs.clone(),
            stores.cache.clone(),
            pipeline.pipeline_name.clone(),
            scheduler.timezone,
        );
        let health = HealthService::new(
            stores.dataset.clone(),
            stores.jobs.clone(),
            stores.cache.clone(),
            alerts.clone(),
            pipeline.pipeline_name.clone(),
            scheduler.staleness_threshold_hours,
        );
        let cleanup = CleanupService::new(
            stores.jobs.clone(),
            stores.tasks.clone(),
            stores.cache.clone(),
            RetentionPolicy {
                refresh_job_days: scheduler.refresh_job_retention_days,
                report_history: scheduler.report_history_limit,
                task_days: config.queue.task_retention_days,
            },
        );

        Self {
            stores,
            filtered,
            warmer,
            orchestrator,
            reports,
            health,
            cleanup,
            alerts,
        }
    }
}
