//! In-memory repositories.
//!
//! Same contracts as the PostgreSQL repositories. The dataset repository also
//! counts queries and can be told to fail loads, which the pipeline tests use
//! to exercise the failure paths.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use vantage_core::models::{
    FilterSpec, NewTask, Order, RefreshJob, RefreshStatus, RowCounts, Task, TaskLane, TaskStatus,
    Vendor,
};

use crate::db::{
    DatasetRepositoryTrait, RefreshJobRepositoryTrait, TaskRepositoryTrait, LEASE_EXPIRED_MESSAGE,
};

#[derive(Default)]
struct Dataset {
    orders: Vec<Order>,
    vendors: Vec<Vendor>,
}

#[derive(Default)]
pub struct InMemoryDatasetRepository {
    data: RwLock<Dataset>,
    fail_loads: AtomicBool,
    order_queries: AtomicUsize,
    vendor_queries: AtomicUsize,
}

impl InMemoryDatasetRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following `replace_all` fail before touching the data.
    pub fn set_fail_loads(&self, fail: bool) {
        self.fail_loads.store(fail, Ordering::SeqCst);
    }

    pub fn order_query_count(&self) -> usize {
        self.order_queries.load(Ordering::SeqCst)
    }

    pub fn vendor_query_count(&self) -> usize {
        self.vendor_queries.load(Ordering::SeqCst)
    }
}

fn ensure_unique<'a>(keys: impl Iterator<Item = &'a str>, table: &str) -> Result<()> {
    let mut seen = HashSet::new();
    for key in keys {
        if !seen.insert(key) {
            bail!("duplicate key value violates unique constraint on {}: {}", table, key);
        }
    }
    Ok(())
}

#[async_trait]
impl DatasetRepositoryTrait for InMemoryDatasetRepository {
    async fn replace_all(&self, orders: &[Order], vendors: &[Vendor]) -> Result<RowCounts> {
        if self.fail_loads.load(Ordering::SeqCst) {
            bail!("simulated load failure");
        }
        ensure_unique(orders.iter().map(|o| o.order_id.as_str()), "orders")
            .context("Failed to insert orders chunk")?;
        ensure_unique(vendors.iter().map(|v| v.vendor_code.as_str()), "vendors")
            .context("Failed to insert vendors chunk")?;

        let mut data = self.data.write().await;
        data.orders = orders.to_vec();
        data.vendors = vendors.to_vec();

        Ok(RowCounts {
            orders: orders.len() as i64,
            vendors: vendors.len() as i64,
        })
    }

    async fn query_orders(&self, spec: &FilterSpec) -> Result<Vec<Order>> {
        self.order_queries.fetch_add(1, Ordering::SeqCst);
        let spec = spec.normalized();
        let data = self.data.read().await;
        let mut orders: Vec<Order> = data
            .orders
            .iter()
            .filter(|o| spec.matches_order(o))
            .cloned()
            .collect();
        // Undated rows last, as Postgres sorts NULLs in ascending order.
        orders.sort_by(|a, b| {
            (a.created_at.is_none(), a.created_at)
                .cmp(&(b.created_at.is_none(), b.created_at))
                .then_with(|| a.order_id.cmp(&b.order_id))
        });
        Ok(orders)
    }

    async fn query_vendors(&self, spec: &FilterSpec) -> Result<Vec<Vendor>> {
        self.vendor_queries.fetch_add(1, Ordering::SeqCst);
        let spec = spec.normalized();
        let data = self.data.read().await;
        let mut vendors: Vec<Vendor> = data
            .vendors
            .iter()
            .filter(|v| spec.matches_vendor(v))
            .cloned()
            .collect();
        vendors.sort_by(|a, b| a.vendor_code.cmp(&b.vendor_code));
        Ok(vendors)
    }

    async fn counts(&self) -> Result<RowCounts> {
        let data = self.data.read().await;
        Ok(RowCounts {
            orders: data.orders.len() as i64,
            vendors: data.vendors.len() as i64,
        })
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryRefreshJobRepository {
    jobs: RwLock<Vec<RefreshJob>>,
    fail_completions: AtomicBool,
}

impl InMemoryRefreshJobRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following `complete` fail without touching the job.
    pub fn set_fail_completions(&self, fail: bool) {
        self.fail_completions.store(fail, Ordering::SeqCst);
    }

    /// Insert a job as-is, e.g. a completed run from the past.
    pub async fn insert(&self, job: RefreshJob) {
        self.jobs.write().await.push(job);
    }

    async fn finish(
        &self,
        id: Uuid,
        apply: impl FnOnce(&mut RefreshJob) + Send,
    ) -> Result<Option<RefreshJob>> {
        let mut jobs = self.jobs.write().await;
        match jobs.iter_mut().find(|j| j.id == id && j.is_running()) {
            Some(job) => {
                apply(job);
                job.completed_at = Some(Utc::now());
                Ok(Some(job.clone()))
            }
            None => Ok(None),
        }
    }
}

#[async_trait]
impl RefreshJobRepositoryTrait for InMemoryRefreshJobRepository {
    async fn start(&self, pipeline: &str, lease_seconds: i64) -> Result<Option<RefreshJob>> {
        let now = Utc::now();
        let lease_cutoff = now - Duration::seconds(lease_seconds);
        let mut jobs = self.jobs.write().await;

        for job in jobs
            .iter_mut()
            .filter(|j| j.pipeline == pipeline && j.is_running() && j.started_at < lease_cutoff)
        {
            job.status = RefreshStatus::Failed;
            job.completed_at = Some(now);
            job.duration_seconds = Some(job.elapsed_seconds(now));
            job.error_message = Some(LEASE_EXPIRED_MESSAGE.to_string());
        }

        if jobs.iter().any(|j| j.pipeline == pipeline && j.is_running()) {
            return Ok(None);
        }

        let job = RefreshJob::start(pipeline, now);
        jobs.push(job.clone());
        Ok(Some(job))
    }

    async fn complete(
        &self,
        id: Uuid,
        counts: RowCounts,
        duration_seconds: f64,
    ) -> Result<Option<RefreshJob>> {
        if self.fail_completions.load(Ordering::SeqCst) {
            bail!("simulated job store failure");
        }
        self.finish(id, |job| {
            job.status = RefreshStatus::Completed;
            job.orders_processed = Some(counts.orders);
            job.vendors_processed = Some(counts.vendors);
            job.duration_seconds = Some(duration_seconds);
        })
        .await
    }

    async fn fail(
        &self,
        id: Uuid,
        error_message: &str,
        duration_seconds: f64,
    ) -> Result<Option<RefreshJob>> {
        let message = error_message.to_string();
        self.finish(id, move |job| {
            job.status = RefreshStatus::Failed;
            job.error_message = Some(message);
            job.duration_seconds = Some(duration_seconds);
        })
        .await
    }

    async fn get(&self, id: Uuid) -> Result<Option<RefreshJob>> {
        Ok(self.jobs.read().await.iter().find(|j| j.id == id).cloned())
    }

    async fn latest_completed(&self, pipeline: &str) -> Result<Option<RefreshJob>> {
        Ok(self
            .jobs
            .read()
            .await
            .iter()
            .filter(|j| j.pipeline == pipeline && j.status == RefreshStatus::Completed)
            .max_by_key(|j| j.started_at)
            .cloned())
    }

    async fn list_recent(&self, limit: i64) -> Result<Vec<RefreshJob>> {
        let mut jobs = self.jobs.read().await.clone();
        jobs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        jobs.truncate(limit.clamp(1, 1000) as usize);
        Ok(jobs)
    }

    async fn delete_older_than(&self, days: i64) -> Result<u64> {
        let cutoff = Utc::now() - Duration::days(days);
        let mut jobs = self.jobs.write().await;
        let before = jobs.len();
        jobs.retain(|j| j.is_running() || j.started_at >= cutoff);
        Ok((before - jobs.len()) as u64)
    }
}

#[derive(Default)]
pub struct InMemoryTaskRepository {
    tasks: RwLock<Vec<Task>>,
}

impl InMemoryTaskRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a task in whatever state it is in.
    pub async fn insert(&self, task: Task) {
        self.tasks.write().await.push(task);
    }

    pub async fn all(&self) -> Vec<Task> {
        self.tasks.read().await.clone()
    }

    async fn update(&self, task_id: Uuid, apply: impl FnOnce(&mut Task) + Send) -> Result<Task> {
        let mut tasks = self.tasks.write().await;
        let task = tasks
            .iter_mut()
            .find(|t| t.id == task_id)
            .with_context(|| format!("Task {} not found", task_id))?;
        apply(task);
        task.updated_at = Utc::now();
        Ok(task.clone())
    }
}

#[async_trait]
impl TaskRepositoryTrait for InMemoryTaskRepository {
    async fn create_task(&self, new_task: NewTask) -> Result<Task> {
        let task = Task::from_new(new_task, Utc::now());
        self.tasks.write().await.push(task.clone());
        Ok(task)
    }

    async fn get_task(&self, task_id: Uuid) -> Result<Option<Task>> {
        Ok(self.tasks.read().await.iter().find(|t| t.id == task_id).cloned())
    }

    async fn claim_next_task(&self, lane: TaskLane) -> Result<Option<Task>> {
        let now = Utc::now();
        let mut tasks = self.tasks.write().await;
        let next = tasks
            .iter_mut()
            .filter(|t| {
                t.lane == lane
                    && matches!(t.status, TaskStatus::Pending | TaskStatus::Scheduled)
                    && t.scheduled_at <= now
            })
            .min_by_key(|t| (t.scheduled_at, t.created_at));
        Ok(next.map(|task| {
            task.status = TaskStatus::Running;
            task.started_at = Some(now);
            task.updated_at = now;
            task.clone()
        }))
    }

    async fn mark_completed(&self, task_id: Uuid, result: serde_json::Value) -> Result<Task> {
        self.update(task_id, |task| {
            task.status = TaskStatus::Completed;
            task.result = Some(result);
            task.completed_at = Some(Utc::now());
        })
        .await
    }

    async fn mark_failed(&self, task_id: Uuid, error: serde_json::Value) -> Result<Task> {
        self.update(task_id, |task| {
            task.status = TaskStatus::Failed;
            task.result = Some(error);
            task.completed_at = Some(Utc::now());
        })
        .await
    }

    async fn schedule_retry(
        &self,
        task_id: Uuid,
        run_at: DateTime<Utc>,
        error: serde_json::Value,
    ) -> Result<Task> {
        self.update(task_id, |task| {
            task.status = TaskStatus::Scheduled;
            task.retry_count += 1;
            task.scheduled_at = run_at;
            task.result = Some(error);
            task.started_at = None;
        })
        .await
    }

    async fn reap_stale_running_tasks(&self, grace_period_secs: i64) -> Result<u64> {
        let now = Utc::now();
        let mut tasks = self.tasks.write().await;
        let mut reaped = 0;
        for task in tasks.iter_mut().filter(|t| t.is_stale(now, grace_period_secs)) {
            task.status = TaskStatus::Pending;
            task.started_at = None;
            task.updated_at = now;
            reaped += 1;
        }
        Ok(reaped)
    }

    async fn delete_old_finished_tasks(&self, older_than_days: i32) -> Result<u64> {
        let cutoff = Utc::now() - Duration::days(older_than_days as i64);
        let mut tasks = self.tasks.write().await;
        let before = tasks.len();
        tasks.retain(|t| {
            !t.status.is_finished() || t.completed_at.unwrap_or(t.updated_at) >= cutoff
        });
        Ok((before - tasks.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use vantage_core::models::{TaskOptions, TaskType};

    fn order(id: &str, city: &str, line: &str, day: u32) -> Order {
        Order {
            order_id: id.to_string(),
            vendor_code: Some(format!("v-{}", city)),
            customer_latitude: 35.7,
            customer_longitude: 51.4,
            business_line: Some(line.to_string()),
            marketing_area: None,
            city_id: None,
            city_name: Some(city.to_string()),
            organic: false,
            created_at: Some(Utc.with_ymd_and_hms(2024, 3, day, 12, 0, 0).unwrap()),
            user_id: None,
        }
    }

    fn vendor(code: &str, city: &str) -> Vendor {
        Vendor {
            vendor_code: code.to_string(),
            vendor_name: None,
            latitude: 35.7,
            longitude: 51.4,
            radius: Some(3.0),
            original_radius: Some(3.0),
            status_id: Some(1),
            visible: true,
            open: true,
            grade: None,
            business_line: Some("restaurant".to_string()),
            city_id: None,
            city_name: Some(city.to_string()),
        }
    }

    #[tokio::test]
    async fn test_replace_all_swaps_contents() {
        let repo = InMemoryDatasetRepository::new();
        repo.replace_all(&[order("a", "tehran", "restaurant", 1)], &[])
            .await
            .unwrap();
        let counts = repo
            .replace_all(
                &[
                    order("b", "tehran", "restaurant", 2),
                    order("c", "shiraz", "pharmacy", 3),
                ],
                &[vendor("v-tehran", "tehran")],
            )
            .await
            .unwrap();
        assert_eq!(counts, RowCounts { orders: 2, vendors: 1 });
        assert_eq!(repo.counts().await.unwrap(), counts);
    }

    #[tokio::test]
    async fn test_failed_load_keeps_previous_rows() {
        let repo = InMemoryDatasetRepository::new();
        repo.replace_all(&[order("a", "tehran", "restaurant", 1)], &[])
            .await
            .unwrap();

        let duplicate = [
            order("b", "tehran", "restaurant", 2),
            order("b", "tehran", "restaurant", 2),
        ];
        assert!(repo.replace_all(&duplicate, &[]).await.is_err());

        repo.set_fail_loads(true);
        assert!(repo
            .replace_all(&[order("c", "tehran", "restaurant", 3)], &[])
            .await
            .is_err());

        let orders = repo.query_orders(&FilterSpec::default()).await.unwrap();
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].order_id, "a");
    }

    #[tokio::test]
    async fn test_query_applies_filters() {
        let repo = InMemoryDatasetRepository::new();
        repo.replace_all(
            &[
                order("a", "tehran", "restaurant", 1),
                order("b", "tehran", "pharmacy", 5),
                order("c", "shiraz", "restaurant", 10),
            ],
            &[vendor("v-tehran", "tehran"), vendor("v-shiraz", "shiraz")],
        )
        .await
        .unwrap();

        let spec = FilterSpec::for_city("Tehran").with_date_range(
            chrono::NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            chrono::NaiveDate::from_ymd_opt(2024, 3, 5).unwrap(),
        );
        let ids: Vec<String> = repo
            .query_orders(&spec)
            .await
            .unwrap()
            .into_iter()
            .map(|o| o.order_id)
            .collect();
        assert_eq!(ids, vec!["a", "b"]);

        let vendors = repo.query_vendors(&spec).await.unwrap();
        assert_eq!(vendors.len(), 1);
        assert_eq!(repo.order_query_count(), 1);
        assert_eq!(repo.vendor_query_count(), 1);
    }

    #[tokio::test]
    async fn test_refresh_lease_blocks_second_start() {
        let repo = InMemoryRefreshJobRepository::new();
        let first = repo.start("main", 7200).await.unwrap().unwrap();
        assert!(repo.start("main", 7200).await.unwrap().is_none());
        assert!(repo.start("secondary", 7200).await.unwrap().is_some());

        repo.complete(first.id, RowCounts { orders: 1, vendors: 1 }, 1.0)
            .await
            .unwrap()
            .unwrap();
        assert!(repo.start("main", 7200).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_expired_lease_is_abandoned() {
        let repo = InMemoryRefreshJobRepository::new();
        let stale = RefreshJob::start("main", Utc::now() - Duration::hours(3));
        repo.insert(stale.clone()).await;

        let fresh = repo.start("main", 7200).await.unwrap();
        assert!(fresh.is_some());

        let stale = repo.get(stale.id).await.unwrap().unwrap();
        assert_eq!(stale.status, RefreshStatus::Failed);
        assert_eq!(stale.error_message.as_deref(), Some(LEASE_EXPIRED_MESSAGE));
    }

    #[tokio::test]
    async fn test_finished_job_is_immutable() {
        let repo = InMemoryRefreshJobRepository::new();
        let job = repo.start("main", 7200).await.unwrap().unwrap();
        repo.fail(job.id, "boom", 2.0).await.unwrap().unwrap();
        assert!(repo
            .complete(job.id, RowCounts::default(), 3.0)
            .await
            .unwrap()
            .is_none());
        let job = repo.get(job.id).await.unwrap().unwrap();
        assert_eq!(job.status, RefreshStatus::Failed);
        assert_eq!(job.error_message.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn test_claim_respects_lane_and_schedule() {
        let repo = InMemoryTaskRepository::new();
        let refresh = repo
            .create_task(NewTask::new(
                TaskType::RefreshAllData,
                serde_json::json!({}),
                TaskOptions::default(),
            ))
            .await
            .unwrap();
        let mut later = NewTask::new(
            TaskType::WarmCache,
            serde_json::json!({}),
            TaskOptions::default(),
        );
        later.scheduled_at = Some(Utc::now() + Duration::minutes(5));
        repo.create_task(later).await.unwrap();

        assert!(repo
            .claim_next_task(TaskLane::CacheOperations)
            .await
            .unwrap()
            .is_none());
        let claimed = repo
            .claim_next_task(TaskLane::DataRefresh)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(claimed.id, refresh.id);
        assert_eq!(claimed.status, TaskStatus::Running);
        assert!(repo
            .claim_next_task(TaskLane::DataRefresh)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_reaper_requeues_stale_tasks() {
        let repo = InMemoryTaskRepository::new();
        let mut options = TaskOptions::default();
        options.hard_time_limit_seconds = 60;
        let mut task = Task::from_new(
            NewTask::new(TaskType::HealthCheck, serde_json::json!({}), options),
            Utc::now(),
        );
        task.status = TaskStatus::Running;
        task.started_at = Some(Utc::now() - Duration::seconds(400));
        repo.insert(task.clone()).await;

        assert_eq!(repo.reap_stale_running_tasks(300).await.unwrap(), 1);
        let task = repo.get_task(task.id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
        assert!(task.started_at.is_none());
    }

    #[tokio::test]
    async fn test_schedule_retry_counts_attempts() {
        let repo = InMemoryTaskRepository::new();
        let task = repo
            .create_task(NewTask::new(
                TaskType::RefreshAllData,
                serde_json::json!({}),
                TaskOptions::default(),
            ))
            .await
            .unwrap();
        let run_at = Utc::now() + Duration::seconds(300);
        let retried = repo
            .schedule_retry(task.id, run_at, serde_json::json!({"error": "timeout"}))
            .await
            .unwrap();
        assert_eq!(retried.retry_count, 1);
        assert_eq!(retried.status, TaskStatus::Scheduled);
        assert_eq!(retried.scheduled_at, run_at);
    }
}
