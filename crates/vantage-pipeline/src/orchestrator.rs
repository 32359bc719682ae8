//! The five-stage refresh: fetch, transform, load, cache rebuild, pre-warm.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use vantage_cache::{CacheStore, Table, HOUR};
use vantage_core::constants::cache_keys::{
    orders_for_city, vendors_for_city, FILTERED_PATTERN, MAP_DATA_PATTERN, ORDERS_ALL,
    VENDORS_ALL,
};
use vantage_core::models::{Alert, AlertSeverity, Order, RowCounts, Vendor};
use vantage_core::{PipelineConfig, QueueConfig};
use vantage_db::{DatasetRepositoryTrait, RefreshJobRepositoryTrait};
use vantage_source::{DataSource, Dataset, RawRecord};

use crate::alerts::AlertService;
use crate::error::PipelineError;
use crate::transform::{TransformReport, Transformer};
use crate::warm::{CacheWarmer, WarmReport};

/// Enqueues the work that follows a refresh. Implemented over the task queue
/// by the service binary.
#[async_trait]
pub trait FollowUpScheduler: Send + Sync {
    async fn schedule_report(&self, refresh_id: Uuid) -> anyhow::Result<()>;

    async fn schedule_alert(&self, alert: &Alert) -> anyhow::Result<()>;
}

#[derive(Debug, Clone)]
pub struct RefreshSettings {
    pub pipeline_name: String,
    pub lease_seconds: i64,
    /// Stages still running after this are abandoned and the job is failed.
    /// Kept at the queue's soft limit so it fires before the worker drops the task.
    pub time_limit: Duration,
    pub dataset_ttl: Duration,
    pub cities: Vec<String>,
}

impl RefreshSettings {
    pub fn from_config(pipeline: &PipelineConfig, queue: &QueueConfig) -> Self {
        Self {
            pipeline_name: pipeline.pipeline_name.clone(),
            lease_seconds: pipeline.refresh_lease_seconds,
            time_limit: Duration::from_secs(queue.soft_time_limit_seconds.max(1) as u64),
            dataset_ttl: HOUR * pipeline.dataset_cache_ttl_hours as u32,
            cities: pipeline.cities.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefreshOutcome {
    pub refresh_id: Uuid,
    pub rows: RowCounts,
    pub duration_seconds: f64,
    pub orders_report: TransformReport,
    pub vendors_report: TransformReport,
    pub prewarm: WarmReport,
}

struct StageResults {
    rows: RowCounts,
    orders_report: TransformReport,
    vendors_report: TransformReport,
    prewarm: WarmReport,
}

pub struct RefreshOrchestrator {
    source: Arc<dyn DataSource>,
    dataset: Arc<dyn DatasetRepositoryTrait>,
    jobs: Arc<dyn RefreshJobRepositoryTrait>,
    cache: Arc<CacheStore>,
    warmer: CacheWarmer,
    alerts: AlertService,
    follow_ups: Arc<dyn FollowUpScheduler>,
    transformer: Transformer,
    settings: RefreshSettings,
}

impl RefreshOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        source: Arc<dyn DataSource>,
        dataset: Arc<dyn DatasetRepositoryTrait>,
        jobs: Arc<dyn RefreshJobRepositoryTrait>,
        cache: Arc<CacheStore>,
        warmer: CacheWarmer,
        alerts: AlertService,
        follow_ups: Arc<dyn FollowUpScheduler>,
        transformer: Transformer,
        settings: RefreshSettings,
    ) -> Self {
        Self {
            source,
            dataset,
            jobs,
            cache,
            warmer,
            alerts,
            follow_ups,
            transformer,
            settings,
        }
    }

    /// Run one refresh under the pipeline lease.
    ///
    /// A stage failure is recorded on the job and raised as a high-severity
    /// alert before it is returned. `AlreadyRunning` leaves no job behind.
    #[tracing::instrument(
        skip(self),
        fields(pipeline = %self.settings.pipeline_name, refresh_id = tracing::field::Empty)
    )]
    pub async fn run(&self, triggered_by: Option<&str>) -> Result<RefreshOutcome, PipelineError> {
        let pipeline = &self.settings.pipeline_name;
        let job = self
            .jobs
            .start(pipeline, self.settings.lease_seconds)
            .await
            .map_err(PipelineError::JobStore)?
            .ok_or_else(|| PipelineError::AlreadyRunning(pipeline.clone()))?;
        tracing::Span::current().record("refresh_id", tracing::field::display(job.id));
        tracing::info!(triggered_by = ?triggered_by, "Refresh started");

        let started = Instant::now();
        let results = match tokio::time::timeout(self.settings.time_limit, self.run_stages()).await
        {
            Ok(Ok(results)) => results,
            Ok(Err(err)) => return Err(self.record_failure(job.id, err, started).await),
            Err(_) => {
                let err = PipelineError::TimedOut(self.settings.time_limit.as_secs());
                return Err(self.record_failure(job.id, err, started).await);
            }
        };

        let duration_seconds = started.elapsed().as_secs_f64();
        match self
            .jobs
            .complete(job.id, results.rows, duration_seconds)
            .await
        {
            Ok(Some(_)) => {}
            Ok(None) => tracing::warn!("Refresh job was no longer running when it completed"),
            Err(e) => {
                return Err(self
                    .record_failure(job.id, PipelineError::JobStore(e), started)
                    .await)
            }
        }

        tracing::info!(
            orders = results.rows.orders,
            vendors = results.rows.vendors,
            duration_seconds,
            "Refresh completed"
        );

        if let Err(e) = self.follow_ups.schedule_report(job.id).await {
            tracing::warn!(error = %e, "Failed to schedule daily report");
        }

        Ok(RefreshOutcome {
            refresh_id: job.id,
            rows: results.rows,
            duration_seconds,
            orders_report: results.orders_report,
            vendors_report: results.vendors_report,
            prewarm: results.prewarm,
        })
    }

    /// Fail the job, raise the high-severity alert and hand the error back.
    async fn record_failure(
        &self,
        job_id: Uuid,
        err: PipelineError,
        started: Instant,
    ) -> PipelineError {
        let duration_seconds = started.elapsed().as_secs_f64();
        tracing::error!(stage = err.stage(), error = %err, "Refresh failed");

        if let Err(e) = self
            .jobs
            .fail(job_id, &err.diagnostic(), duration_seconds)
            .await
        {
            tracing::error!(error = %e, "Failed to record refresh failure");
        }

        let alert = Alert::new(
            "Data refresh failed",
            format!("Refresh {} failed at {}: {}", job_id, err.stage(), err),
            AlertSeverity::High,
        );
        if let Err(e) = self.follow_ups.schedule_alert(&alert).await {
            tracing::warn!(error = %e, "Failed to enqueue alert, recording directly");
            self.alerts.raise(&alert).await;
        }

        err
    }

    async fn run_stages(&self) -> Result<StageResults, PipelineError> {
        let (raw_orders, raw_vendors) = self.fetch().await?;

        let output = self.transformer.run(raw_orders, raw_vendors).await?;
        if output.orders.is_empty() {
            return Err(PipelineError::EmptyDataset(Dataset::Orders));
        }
        if output.vendors.is_empty() {
            return Err(PipelineError::EmptyDataset(Dataset::Vendors));
        }

        let rows = self
            .dataset
            .replace_all(&output.orders, &output.vendors)
            .await
            .map_err(PipelineError::Load)?;
        tracing::info!(
            stage = "load",
            orders = rows.orders,
            vendors = rows.vendors,
            "Tables reloaded"
        );

        self.rebuild_cache(&output.orders, &output.vendors).await?;

        let prewarm = self.warmer.run(&self.warmer.prewarm_specs()).await;

        Ok(StageResults {
            rows,
            orders_report: output.orders_report,
            vendors_report: output.vendors_report,
            prewarm,
        })
    }

    #[tracing::instrument(skip(self), fields(stage = "fetch", source = self.source.name()))]
    async fn fetch(&self) -> Result<(Vec<RawRecord>, Vec<RawRecord>), PipelineError> {
        let (orders, vendors) = tokio::join!(
            self.source.fetch(Dataset::Orders),
            self.source.fetch(Dataset::Vendors),
        );
        let orders = non_empty(Dataset::Orders, orders)?;
        let vendors = non_empty(Dataset::Vendors, vendors)?;
        tracing::info!(
            orders = orders.len(),
            vendors = vendors.len(),
            "Source exports fetched"
        );
        Ok((orders, vendors))
    }

    #[tracing::instrument(skip_all, fields(stage = "cache_rebuild"))]
    async fn rebuild_cache(&self, orders: &[Order], vendors: &[Vendor]) -> Result<(), PipelineError> {
        let filtered = self.cache.invalidate(FILTERED_PATTERN).await;
        let map_data = self.cache.invalidate(MAP_DATA_PATTERN).await;
        tracing::debug!(filtered, map_data, "Derived entries invalidated");

        let ttl = self.settings.dataset_ttl;
        self.put_table(ORDERS_ALL.to_string(), orders, ttl).await?;
        self.put_table(VENDORS_ALL.to_string(), vendors, ttl).await?;

        let slices = self.settings.cities.iter().map(|city| async move {
            let city_orders: Vec<&Order> = orders
                .iter()
                .filter(|o| o.city_name.as_deref() == Some(city.as_str()))
                .collect();
            let city_vendors: Vec<&Vendor> = vendors
                .iter()
                .filter(|v| v.city_name.as_deref() == Some(city.as_str()))
                .collect();
            self.put_table(orders_for_city(city), &city_orders, ttl).await?;
            self.put_table(vendors_for_city(city), &city_vendors, ttl).await
        });
        join_all(slices)
            .await
            .into_iter()
            .collect::<Result<Vec<()>, PipelineError>>()?;

        tracing::info!(cities = self.settings.cities.len(), "Dataset cache rebuilt");
        Ok(())
    }

    /// Encoding failures fail the stage. Backend failures are logged by the
    /// store and otherwise ignored.
    async fn put_table<T: Serialize + Sync>(
        &self,
        key: String,
        records: &[T],
        ttl: Duration,
    ) -> Result<(), PipelineError> {
        let table = Table::from_records(records)
            .map_err(|e| PipelineError::CacheRebuild(format!("{}: {}", key, e)))?;
        self.cache.put_table(&key, &table, ttl).await;
        Ok(())
    }
}

fn non_empty(
    dataset: Dataset,
    result: anyhow::Result<Vec<RawRecord>>,
) -> Result<Vec<RawRecord>, PipelineError> {
    match result {
        Ok(rows) if rows.is_empty() => Err(PipelineError::EmptyDataset(dataset)),
        Ok(rows) => Ok(rows),
        Err(source) => Err(PipelineError::Fetch { dataset, source }),
    }
}
