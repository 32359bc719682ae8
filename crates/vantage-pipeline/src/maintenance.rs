use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use vantage_cache::CacheStore;
use vantage_core::constants::cache_keys::{DAILY_REPORT_PATTERN, META_SUFFIX};
use vantage_db::{RefreshJobRepositoryTrait, TaskRepositoryTrait};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupReport {
    pub refresh_jobs_deleted: u64,
    pub reports_trimmed: u64,
    pub tasks_deleted: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct RetentionPolicy {
    pub refresh_job_days: i64,
    pub report_history: usize,
    /// 0 keeps finished tasks forever.
    pub task_days: i32,
}

/// Weekly cleanup of job history, dated reports and finished tasks.
#[derive(Clone)]
pub struct CleanupService {
    jobs: Arc<dyn RefreshJobRepositoryTrait>,
    tasks: Arc<dyn TaskRepositoryTrait>,
    cache: Arc<CacheStore>,
    retention: RetentionPolicy,
}

impl CleanupService {
    pub fn new(
        jobs: Arc<dyn RefreshJobRepositoryTrait>,
        tasks: Arc<dyn TaskRepositoryTrait>,
        cache: Arc<CacheStore>,
        retention: RetentionPolicy,
    ) -> Self {
        Self {
            jobs,
            tasks,
            cache,
            retention,
        }
    }

    #[tracing::instrument(skip(self))]
    pub async fn run(&self) -> Result<CleanupReport> {
        let refresh_jobs_deleted = self
            .jobs
            .delete_older_than(self.retention.refresh_job_days)
            .await
            .context("Failed to delete old refresh jobs")?;

        let reports_trimmed = self.trim_reports().await;

        let tasks_deleted = if self.retention.task_days > 0 {
            self.tasks
                .delete_old_finished_tasks(self.retention.task_days)
                .await
                .context("Failed to delete old tasks")?
        } else {
            0
        };

        let report = CleanupReport {
            refresh_jobs_deleted,
            reports_trimmed,
            tasks_deleted,
        };
        tracing::info!(?report, "Cleanup finished");
        Ok(report)
    }

    /// Keep only the most recent dated reports. `daily_report:latest` is not dated.
    async fn trim_reports(&self) -> u64 {
        let mut dated: Vec<(NaiveDate, String)> = self
            .cache
            .keys(DAILY_REPORT_PATTERN)
            .await
            .into_iter()
            .filter(|key| !key.ends_with(META_SUFFIX))
            .filter_map(|key| {
                let date = key
                    .strip_prefix("daily_report:")
                    .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())?;
                Some((date, key))
            })
            .collect();

        if dated.len() <= self.retention.report_history {
            return 0;
        }

        dated.sort_by(|a, b| b.0.cmp(&a.0));
        let mut trimmed = 0;
        for (_, key) in dated.into_iter().skip(self.retention.report_history) {
            if self.cache.delete(&key).await {
                trimmed += 1;
            }
        }
        trimmed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use vantage_cache::MemoryBackend;
    use vantage_core::constants::cache_keys::{daily_report_for, DAILY_REPORT_LATEST};
    use vantage_core::models::{RefreshJob, RefreshStatus};
    use vantage_db::{InMemoryRefreshJobRepository, InMemoryTaskRepository};

    #[tokio::test]
    async fn test_cleanup_applies_retention() {
        let jobs = Arc::new(InMemoryRefreshJobRepository::new());
        let mut old = RefreshJob::start("main", Utc::now() - Duration::days(45));
        old.status = RefreshStatus::Completed;
        jobs.insert(old).await;
        jobs.insert(RefreshJob::start("main", Utc::now() - Duration::days(40)))
            .await;
        let mut recent = RefreshJob::start("main", Utc::now() - Duration::days(2));
        recent.status = RefreshStatus::Completed;
        jobs.insert(recent).await;

        let cache = Arc::new(CacheStore::new(Arc::new(MemoryBackend::new()), 1024));
        let first = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        for day in 0..5 {
            let key = daily_report_for(first + Duration::days(day));
            cache.put_json(&key, &day, Duration::days(7).to_std().unwrap()).await;
        }
        cache
            .put_json(DAILY_REPORT_LATEST, &4, Duration::hours(25).to_std().unwrap())
            .await;

        let cleanup = CleanupService::new(
            jobs.clone(),
            Arc::new(InMemoryTaskRepository::new()),
            cache.clone(),
            RetentionPolicy {
                refresh_job_days: 30,
                report_history: 3,
                task_days: 30,
            },
        );
        let report = cleanup.run().await.unwrap();

        // The running job is never deleted, whatever its age.
        assert_eq!(report.refresh_jobs_deleted, 1);
        assert_eq!(jobs.list_recent(10).await.unwrap().len(), 2);

        assert_eq!(report.reports_trimmed, 2);
        assert!(cache
            .get_json::<i64>(&daily_report_for(first))
            .await
            .is_none());
        assert_eq!(
            cache.get_json::<i64>(&daily_report_for(first + Duration::days(4))).await,
            Some(4)
        );
        assert_eq!(cache.get_json::<i64>(DAILY_REPORT_LATEST).await, Some(4));
    }
}
