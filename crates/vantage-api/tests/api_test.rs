//! HTTP surface tests over in-memory stores.
//!
//! Run with: `cargo test -p vantage-api --test api_test`

mod helpers;

use helpers::{api_path, setup_test_app, TestApp};
use serde_json::Value;
use vantage_core::models::{TaskLane, TaskStatus, TaskType};
use vantage_source::Dataset;

async fn refresh_through_queue(app: &TestApp) -> Value {
    let response = app.client().post(&api_path("/admin/refresh-data")).await;
    assert_eq!(response.status_code(), 202);
    let body: Value = response.json();
    app.run_pending().await;
    body
}

#[tokio::test]
async fn test_trigger_refresh_only_queues() {
    let app = setup_test_app(30, 6);

    let response = app.client().post(&api_path("/admin/refresh-data")).await;
    assert_eq!(response.status_code(), 202);
    let body: Value = response.json();
    assert_eq!(body["status"], "queued");

    let tasks = app.tasks.all().await;
    assert_eq!(tasks.len(), 1);
    let task = &tasks[0];
    assert_eq!(body["task_id"], task.id.to_string());
    assert_eq!(task.task_type, TaskType::RefreshAllData);
    assert_eq!(task.lane, TaskLane::DataRefresh);
    assert_eq!(task.max_retries, 3);
    assert_eq!(task.retry_delay_seconds, 300);
    assert_eq!(task.payload["triggered_by"], "admin");

    // Nothing ran: no job recorded and the source was never read.
    assert_eq!(app.source.fetch_count(), 0);
    assert_eq!(app.pending_count().await, 1);
}

#[tokio::test]
async fn test_refresh_via_queue_then_read_back() {
    let app = setup_test_app(30, 6);
    refresh_through_queue(&app).await;

    let jobs: Value = app.client().get(&api_path("/admin/refresh-jobs")).await.json();
    let jobs = jobs.as_array().unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0]["status"], "completed");
    assert_eq!(jobs[0]["orders_processed"], 30);
    assert_eq!(jobs[0]["vendors_processed"], 6);

    // The follow-up report task ran too.
    let report = app.client().get(&api_path("/admin/reports/daily")).await;
    assert_eq!(report.status_code(), 200);
    let report: Value = report.json();
    assert_eq!(report["data_summary"]["total_orders"], 30);
    assert_eq!(report["data_summary"]["total_vendors"], 6);

    let all: Value = app.client().get(&api_path("/filtered-data")).await.json();
    assert_eq!(all["metadata"]["order_count"], 30);
    assert_eq!(all["metadata"]["vendor_count"], 6);
}

#[tokio::test]
async fn test_filtered_data_query_parameters() {
    let app = setup_test_app(30, 6);
    refresh_through_queue(&app).await;

    let tehran: Value = app
        .client()
        .get(&api_path("/filtered-data"))
        .add_query_param("city", "tehran")
        .await
        .json();
    assert_eq!(tehran["metadata"]["order_count"], 10);
    assert_eq!(tehran["metadata"]["vendor_count"], 2);

    // Orders 0, 12 and 24 are Tehran restaurants.
    let restaurants: Value = app
        .client()
        .get(&api_path("/filtered-data"))
        .add_query_param("city", "tehran")
        .add_query_param("business_lines", "restaurant")
        .add_query_param("use_cache", "false")
        .await
        .json();
    assert_eq!(restaurants["metadata"]["order_count"], 3);
}

#[tokio::test]
async fn test_filtered_data_rejects_bad_dates() {
    let app = setup_test_app(10, 3);

    let malformed = app
        .client()
        .get(&api_path("/filtered-data"))
        .add_query_param("start_date", "yesterday")
        .await;
    assert_eq!(malformed.status_code(), 400);
    let body: Value = malformed.json();
    assert_eq!(body["code"], "INVALID_INPUT");

    let reversed = app
        .client()
        .get(&api_path("/filtered-data"))
        .add_query_param("start_date", "2024-06-10")
        .add_query_param("end_date", "2024-06-01")
        .await;
    assert_eq!(reversed.status_code(), 400);
}

#[tokio::test]
async fn test_clear_cache_by_pattern() {
    let app = setup_test_app(30, 6);
    refresh_through_queue(&app).await;

    let response = app
        .client()
        .delete(&api_path("/admin/cache"))
        .add_query_param("pattern", "filtered:*")
        .await;
    assert_eq!(response.status_code(), 200);
    let body: Value = response.json();
    assert_eq!(body["status"], "success");
    assert_eq!(body["pattern"], "filtered:*");
    // Three cities alone plus three cities by four lines, warmed after the refresh.
    assert_eq!(body["deleted_keys"], 15);

    let again: Value = app
        .client()
        .delete(&api_path("/admin/cache"))
        .add_query_param("pattern", "filtered:*")
        .await
        .json();
    assert_eq!(again["deleted_keys"], 0);

    // No pattern clears everything, the report included.
    let everything: Value = app.client().delete(&api_path("/admin/cache")).await.json();
    assert_eq!(everything["pattern"], "*");
    assert!(everything["deleted_keys"].as_u64().unwrap() > 0);
    let report = app.client().get(&api_path("/admin/reports/daily")).await;
    assert_eq!(report.status_code(), 404);
}

#[tokio::test]
async fn test_missing_report_is_not_found() {
    let app = setup_test_app(10, 3);

    let latest = app.client().get(&api_path("/admin/reports/daily")).await;
    assert_eq!(latest.status_code(), 404);
    let body: Value = latest.json();
    assert_eq!(body["code"], "NOT_FOUND");

    let dated = app
        .client()
        .get(&api_path("/admin/reports/daily"))
        .add_query_param("date", "2020-01-01")
        .await;
    assert_eq!(dated.status_code(), 404);
}

#[tokio::test]
async fn test_failed_refresh_raises_alert() {
    let app = setup_test_app(30, 6);
    app.source.fail_on(Some(Dataset::Orders)).await;

    refresh_through_queue(&app).await;

    let tasks = app.tasks.all().await;
    let refresh = tasks
        .iter()
        .find(|t| t.task_type == TaskType::RefreshAllData)
        .unwrap();
    assert_eq!(refresh.status, TaskStatus::Failed);
    let alert_task = tasks
        .iter()
        .find(|t| t.task_type == TaskType::SendAlert)
        .unwrap();
    assert_eq!(alert_task.status, TaskStatus::Completed);

    let alerts: Value = app.client().get(&api_path("/admin/alerts")).await.json();
    let alerts = alerts.as_array().unwrap();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0]["severity"], "high");

    let jobs: Value = app.client().get(&api_path("/admin/refresh-jobs")).await.json();
    assert_eq!(jobs[0]["status"], "failed");
    assert!(jobs[0]["error_message"]
        .as_str()
        .unwrap()
        .starts_with("Fetch of orders failed"));
}

#[tokio::test]
async fn test_health_reflects_data_freshness() {
    let app = setup_test_app(30, 6);

    let before = app.client().get(&api_path("/health")).await;
    assert_eq!(before.status_code(), 503);
    let body: Value = before.json();
    assert_eq!(body["status"], "unhealthy");
    assert_eq!(body["data_freshness"]["status"], "unknown");
    assert!(body["last_data_refresh"].is_null());

    refresh_through_queue(&app).await;

    let after = app.client().get(&api_path("/health")).await;
    assert_eq!(after.status_code(), 200);
    let body: Value = after.json();
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["database"]["status"], "healthy");
    assert_eq!(body["last_data_refresh"]["status"], "completed");
}

#[tokio::test]
async fn test_metrics_summarize_refreshes() {
    let app = setup_test_app(30, 6);
    refresh_through_queue(&app).await;

    let metrics: Value = app.client().get(&api_path("/metrics")).await.json();
    assert_eq!(metrics["data_counts"]["orders"], 30);
    assert_eq!(metrics["data_counts"]["vendors"], 6);
    assert_eq!(metrics["data_refresh_metrics"]["total"], 1);
    assert_eq!(metrics["data_refresh_metrics"]["successful"], 1);
    assert_eq!(metrics["data_refresh_metrics"]["success_rate"], 100.0);
    assert_eq!(metrics["cache_metrics"]["backend"], "memory");
}

#[tokio::test]
async fn test_warm_cache_trigger_runs_on_cache_lane() {
    let app = setup_test_app(30, 6);
    refresh_through_queue(&app).await;

    let response = app.client().post(&api_path("/admin/warm-cache")).await;
    assert_eq!(response.status_code(), 202);
    let body: Value = response.json();
    assert_eq!(body["status"], "queued");

    let queued = app.tasks.all().await;
    let warm = queued
        .iter()
        .find(|t| t.task_type == TaskType::WarmCache)
        .unwrap();
    assert_eq!(warm.lane, TaskLane::CacheOperations);
    assert_eq!(warm.max_retries, 0);

    assert_eq!(app.run_pending().await, 1);
    let done = app
        .tasks
        .all()
        .await
        .into_iter()
        .find(|t| t.task_type == TaskType::WarmCache)
        .unwrap();
    assert_eq!(done.status, TaskStatus::Completed);
    let result = done.result.unwrap();
    assert_eq!(result["failed"], 0);
    assert!(result["warmed"].as_u64().unwrap() > 0);
}
