//! Fixtures shared by unit tests, integration tests and dependent crates.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde_json::json;
use tokio::sync::Mutex;
use uuid::Uuid;

use vantage_core::models::{Alert, Order, Vendor};
use vantage_source::RawRecord;

use crate::orchestrator::FollowUpScheduler;

const CITIES: [(&str, i32); 3] = [("tehran", 2), ("mashhad", 1), ("shiraz", 5)];
const LINES: [&str; 4] = ["restaurant", "supermarket", "coffee_shop", "pharmacy"];

/// `n` orders spread over three cities and four business lines, created in the last 30 days.
pub fn sample_orders(n: usize) -> Vec<Order> {
    let now = Utc::now();
    (0..n)
        .map(|i| {
            let (city, city_id) = CITIES[i % CITIES.len()];
            Order {
                order_id: format!("o-{}", i),
                vendor_code: Some(format!("v-{}", i % 10)),
                customer_latitude: 35.0 + (i % 100) as f64 / 1000.0,
                customer_longitude: 51.0 + (i % 100) as f64 / 1000.0,
                business_line: Some(LINES[i % LINES.len()].to_string()),
                marketing_area: Some(format!("area-{}", i % 5)),
                city_id: Some(city_id),
                city_name: Some(city.to_string()),
                organic: i % 3 == 0,
                created_at: Some(now - Duration::days((i % 30) as i64)),
                user_id: Some(format!("u-{}", i % 17)),
            }
        })
        .collect()
}

pub fn sample_vendors(n: usize) -> Vec<Vendor> {
    (0..n)
        .map(|i| {
            let (city, city_id) = CITIES[i % CITIES.len()];
            Vendor {
                vendor_code: format!("v-{}", i),
                vendor_name: Some(format!("Vendor {}", i)),
                latitude: 35.7 + i as f64 / 100.0,
                longitude: 51.4 + i as f64 / 100.0,
                radius: Some(3.0),
                original_radius: Some(3.0),
                status_id: Some(1),
                visible: true,
                open: i % 2 == 0,
                grade: Some("A".to_string()),
                business_line: Some(LINES[i % LINES.len()].to_string()),
                city_id: Some(city_id),
                city_name: Some(city.to_string()),
            }
        })
        .collect()
}

fn record(value: serde_json::Value) -> RawRecord {
    match value {
        serde_json::Value::Object(map) => map,
        _ => RawRecord::new(),
    }
}

/// Raw order exports as the source delivers them: city ids, mixed-case lines,
/// no organic flag.
pub fn raw_orders(n: usize) -> Vec<RawRecord> {
    let now = Utc::now();
    (0..n)
        .map(|i| {
            let (_, city_id) = CITIES[i % CITIES.len()];
            let created_at = now - Duration::days((i % 30) as i64);
            record(json!({
                "order_id": i,
                "vendor_code": format!("v-{}", i % 10),
                "customer_latitude": 35.0 + (i % 100) as f64 / 1000.0,
                "customer_longitude": 51.0 + (i % 100) as f64 / 1000.0,
                "business_line": LINES[i % LINES.len()].to_uppercase(),
                "marketing_area": format!("area-{}", i % 5),
                "city_id": city_id,
                "created_at": created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
                "user_id": format!("u-{}", i % 17),
            }))
        })
        .collect()
}

pub fn raw_vendors(n: usize) -> Vec<RawRecord> {
    (0..n)
        .map(|i| {
            let (_, city_id) = CITIES[i % CITIES.len()];
            record(json!({
                "vendor_code": format!("v-{}", i),
                "vendor_name": format!("Vendor {}", i),
                "latitude": 35.7 + i as f64 / 100.0,
                "longitude": 51.4 + i as f64 / 100.0,
                "radius": 3.0,
                "status_id": 1,
                "visible": 1,
                "open": "true",
                "grade": "A",
                "business_line": LINES[i % LINES.len()],
                "city_id": city_id,
            }))
        })
        .collect()
}

/// Follow-up scheduler that records what it was asked to enqueue.
#[derive(Default)]
pub struct RecordingFollowUps {
    reports: Mutex<Vec<Uuid>>,
    alerts: Mutex<Vec<Alert>>,
    fail: bool,
}

impl RecordingFollowUps {
    pub fn new() -> Self {
        Self::default()
    }

    /// A scheduler whose enqueues all fail.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub async fn reports(&self) -> Vec<Uuid> {
        self.reports.lock().await.clone()
    }

    pub async fn alerts(&self) -> Vec<Alert> {
        self.alerts.lock().await.clone()
    }
}

#[async_trait]
impl FollowUpScheduler for RecordingFollowUps {
    async fn schedule_report(&self, refresh_id: Uuid) -> anyhow::Result<()> {
        if self.fail {
            anyhow::bail!("queue unavailable");
        }
        self.reports.lock().await.push(refresh_id);
        Ok(())
    }

    async fn schedule_alert(&self, alert: &Alert) -> anyhow::Result<()> {
        if self.fail {
            anyhow::bail!("queue unavailable");
        }
        self.alerts.lock().await.push(alert.clone());
        Ok(())
    }
}
