use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;

use vantage_cache::CacheStore;
use vantage_core::constants::cache_keys::{daily_report_for, DAILY_REPORT_LATEST};
use vantage_core::models::{DailyReport, DataSummary, RefreshSummary};
use vantage_db::{DatasetRepositoryTrait, RefreshJobRepositoryTrait};

pub const LATEST_REPORT_TTL: Duration = Duration::from_secs(25 * 3600);
pub const DATED_REPORT_TTL: Duration = Duration::from_secs(7 * 24 * 3600);

#[derive(Clone)]
pub struct ReportService {
    dataset: Arc<dyn DatasetRepositoryTrait>,
    jobs: Arc<dyn RefreshJobRepositoryTrait>,
    cache: Arc<CacheStore>,
    pipeline_name: String,
    timezone: Tz,
}

impl ReportService {
    pub fn new(
        dataset: Arc<dyn DatasetRepositoryTrait>,
        jobs: Arc<dyn RefreshJobRepositoryTrait>,
        cache: Arc<CacheStore>,
        pipeline_name: impl Into<String>,
        timezone: Tz,
    ) -> Self {
        Self {
            dataset,
            jobs,
            cache,
            pipeline_name: pipeline_name.into(),
            timezone,
        }
    }

    /// Build the report for the local date of `now` and cache it as both the
    /// latest and the dated entry.
    #[tracing::instrument(skip(self))]
    pub async fn generate(&self, now: DateTime<Utc>) -> Result<DailyReport> {
        let counts = self
            .dataset
            .counts()
            .await
            .context("Failed to count dataset rows")?;
        let last_refresh = self
            .jobs
            .latest_completed(&self.pipeline_name)
            .await
            .context("Failed to load latest refresh job")?;

        let report = DailyReport {
            date: now.with_timezone(&self.timezone).date_naive(),
            data_summary: DataSummary {
                total_orders: counts.orders,
                total_vendors: counts.vendors,
                last_refresh: last_refresh.as_ref().map(RefreshSummary::from),
            },
            cache_performance: self.cache.stats().await,
            system_status: "operational".to_string(),
            generated_at: now,
        };

        self.cache
            .put_json(DAILY_REPORT_LATEST, &report, LATEST_REPORT_TTL)
            .await;
        self.cache
            .put_json(&daily_report_for(report.date), &report, DATED_REPORT_TTL)
            .await;

        tracing::info!(
            date = %report.date,
            total_orders = report.data_summary.total_orders,
            total_vendors = report.data_summary.total_vendors,
            "Daily report generated"
        );
        Ok(report)
    }

    /// Latest report, or the report for `date`.
    pub async fn get_report(&self, date: Option<NaiveDate>) -> Option<DailyReport> {
        match date {
            Some(date) => self.cache.get_json(&daily_report_for(date)).await,
            None => self.cache.get_json(DAILY_REPORT_LATEST).await,
        }
    }
}
