//! Normalization of raw source exports into storable rows.
//!
//! Rows without a key, and rows whose coordinates are missing or out of range,
//! are dropped. Other unreadable attributes are kept as null. Duplicate keys
//! keep the first row.

use std::collections::HashSet;

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use vantage_core::constants::city_name_for_id;
use vantage_core::models::{Order, Vendor};
use vantage_core::OrganicBackfill;
use vantage_source::RawRecord;

use crate::error::PipelineError;

/// Counters describing what a transform kept and dropped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransformReport {
    pub received: usize,
    pub kept: usize,
    pub missing_fields: usize,
    pub invalid_coordinates: usize,
    pub duplicates: usize,
    pub organic_backfilled: usize,
}

#[derive(Debug, Clone, Default)]
pub struct TransformOutput {
    pub orders: Vec<Order>,
    pub vendors: Vec<Vendor>,
    pub orders_report: TransformReport,
    pub vendors_report: TransformReport,
}

#[derive(Debug, Clone, Copy)]
pub struct Transformer {
    backfill: OrganicBackfill,
    seed: Option<u64>,
}

fn as_string(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => {
            let s = s.trim();
            (!s.is_empty()).then(|| s.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn as_f64(value: Option<&Value>) -> Option<f64> {
    let n = match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }?;
    n.is_finite().then_some(n)
}

fn as_i64(value: Option<&Value>) -> Option<i64> {
    match value? {
        Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.fract() == 0.0)
                .map(|f| f as i64)
        }),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>().ok().or_else(|| {
                s.parse::<f64>()
                    .ok()
                    .filter(|f| f.fract() == 0.0)
                    .map(|f| f as i64)
            })
        }
        _ => None,
    }
}

fn as_bool(value: Option<&Value>) -> Option<bool> {
    match value? {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_f64().map(|f| f != 0.0),
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "true" | "t" | "yes" | "1" => Some(true),
            "false" | "f" | "no" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// Epoch values above this are milliseconds.
const EPOCH_MILLIS_THRESHOLD: i64 = 100_000_000_000;

fn from_epoch(epoch: i64) -> Option<DateTime<Utc>> {
    if epoch.abs() >= EPOCH_MILLIS_THRESHOLD {
        Utc.timestamp_millis_opt(epoch).single()
    } else {
        Utc.timestamp_opt(epoch, 0).single()
    }
}

/// Timestamps arrive as RFC 3339, naive `YYYY-MM-DD HH:MM:SS[.f]` (read as
/// UTC), bare dates, or epoch seconds/milliseconds.
fn as_timestamp(value: Option<&Value>) -> Option<DateTime<Utc>> {
    let s = match value? {
        Value::String(s) => s.trim().to_string(),
        Value::Number(_) => return as_i64(value).and_then(from_epoch),
        _ => return None,
    };
    if let Ok(dt) = DateTime::parse_from_rfc3339(&s) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(&s, format) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(&s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

fn valid_point(latitude: f64, longitude: f64) -> bool {
    (-90.0..=90.0).contains(&latitude) && (-180.0..=180.0).contains(&longitude)
}

fn city_fields(record: &RawRecord) -> (Option<i32>, Option<String>) {
    let city_id = as_i64(record.get("city_id"));
    let city_name = city_id.and_then(city_name_for_id).map(str::to_string);
    (city_id.and_then(|id| i32::try_from(id).ok()), city_name)
}

fn lowercase(value: Option<String>) -> Option<String> {
    value.map(|v| v.to_lowercase())
}

impl Transformer {
    pub fn new(backfill: OrganicBackfill) -> Self {
        Self {
            backfill,
            seed: None,
        }
    }

    /// Deterministic backfill for reproducible runs.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    fn backfill_value(&self, rng: &mut impl Rng) -> bool {
        match self.backfill {
            OrganicBackfill::Random { ratio } => rng.random_bool(ratio.clamp(0.0, 1.0)),
            OrganicBackfill::Constant { value } => value,
        }
    }

    pub fn transform_orders(
        &self,
        raw: Vec<RawRecord>,
        rng: &mut impl Rng,
    ) -> (Vec<Order>, TransformReport) {
        let mut report = TransformReport {
            received: raw.len(),
            ..Default::default()
        };
        let mut seen = HashSet::with_capacity(raw.len());
        let mut orders = Vec::with_capacity(raw.len());

        for record in raw {
            let Some(order_id) = as_string(record.get("order_id")) else {
                report.missing_fields += 1;
                continue;
            };

            let point = as_f64(record.get("customer_latitude"))
                .zip(as_f64(record.get("customer_longitude")))
                .filter(|(lat, lon)| valid_point(*lat, *lon));
            let Some((customer_latitude, customer_longitude)) = point else {
                report.invalid_coordinates += 1;
                continue;
            };

            if !seen.insert(order_id.clone()) {
                report.duplicates += 1;
                continue;
            }

            let organic = match as_bool(record.get("organic")) {
                Some(flag) => flag,
                None => {
                    report.organic_backfilled += 1;
                    self.backfill_value(rng)
                }
            };
            let (city_id, city_name) = city_fields(&record);

            orders.push(Order {
                order_id,
                vendor_code: as_string(record.get("vendor_code")),
                customer_latitude,
                customer_longitude,
                business_line: lowercase(as_string(record.get("business_line"))),
                marketing_area: as_string(record.get("marketing_area")),
                city_id,
                city_name,
                organic,
                created_at: as_timestamp(record.get("created_at")),
                user_id: as_string(record.get("user_id")),
            });
        }

        report.kept = orders.len();
        (orders, report)
    }

    pub fn transform_vendors(&self, raw: Vec<RawRecord>) -> (Vec<Vendor>, TransformReport) {
        let mut report = TransformReport {
            received: raw.len(),
            ..Default::default()
        };
        let mut seen = HashSet::with_capacity(raw.len());
        let mut vendors = Vec::with_capacity(raw.len());

        for record in raw {
            let Some(vendor_code) = as_string(record.get("vendor_code")) else {
                report.missing_fields += 1;
                continue;
            };

            let point = as_f64(record.get("latitude"))
                .zip(as_f64(record.get("longitude")))
                .filter(|(lat, lon)| valid_point(*lat, *lon));
            let Some((latitude, longitude)) = point else {
                report.invalid_coordinates += 1;
                continue;
            };

            if !seen.insert(vendor_code.clone()) {
                report.duplicates += 1;
                continue;
            }

            let radius = as_f64(record.get("radius"));
            let (city_id, city_name) = city_fields(&record);

            vendors.push(Vendor {
                vendor_code,
                vendor_name: as_string(record.get("vendor_name")),
                latitude,
                longitude,
                radius,
                original_radius: radius,
                status_id: as_i64(record.get("status_id")).and_then(|s| i32::try_from(s).ok()),
                visible: as_bool(record.get("visible")).unwrap_or(false),
                open: as_bool(record.get("open")).unwrap_or(false),
                grade: as_string(record.get("grade")),
                business_line: lowercase(as_string(record.get("business_line"))),
                city_id,
                city_name,
            });
        }

        report.kept = vendors.len();
        (vendors, report)
    }

    /// Run both transforms on the blocking pool.
    #[tracing::instrument(skip_all, fields(stage = "transform"))]
    pub async fn run(
        self,
        orders: Vec<RawRecord>,
        vendors: Vec<RawRecord>,
    ) -> Result<TransformOutput, PipelineError> {
        let output = tokio::task::spawn_blocking(move || {
            let mut rng = match self.seed {
                Some(seed) => StdRng::seed_from_u64(seed),
                None => StdRng::from_os_rng(),
            };
            let (orders, orders_report) = self.transform_orders(orders, &mut rng);
            let (vendors, vendors_report) = self.transform_vendors(vendors);
            TransformOutput {
                orders,
                vendors,
                orders_report,
                vendors_report,
            }
        })
        .await
        .map_err(|e| PipelineError::Transform(anyhow::anyhow!("transform task aborted: {}", e)))?;

        tracing::info!(
            orders_received = output.orders_report.received,
            orders_kept = output.orders_report.kept,
            vendors_received = output.vendors_report.received,
            vendors_kept = output.vendors_report.kept,
            organic_backfilled = output.orders_report.organic_backfilled,
            "Transform finished"
        );

        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> RawRecord {
        value.as_object().cloned().unwrap()
    }

    fn raw_order(id: u64, lat: Value, lon: Value) -> RawRecord {
        record(json!({
            "order_id": id,
            "vendor_code": "V1",
            "customer_latitude": lat,
            "customer_longitude": lon,
            "business_line": "Restaurant",
            "city_id": 2,
            "created_at": "2024-03-01 10:15:00",
        }))
    }

    #[test]
    fn test_orders_are_normalized() {
        let transformer = Transformer::new(OrganicBackfill::Constant { value: true });
        let mut rng = StdRng::seed_from_u64(1);
        let (orders, report) = transformer.transform_orders(
            vec![
                raw_order(1, json!(35.7), json!(51.4)),
                raw_order(2, json!("35.8"), json!("51.3")),
            ],
            &mut rng,
        );
        assert_eq!(report.kept, 2);
        assert_eq!(report.organic_backfilled, 2);
        let first = &orders[0];
        assert_eq!(first.order_id, "1");
        assert_eq!(first.city_name.as_deref(), Some("tehran"));
        assert_eq!(first.city_id, Some(2));
        assert_eq!(first.business_line.as_deref(), Some("restaurant"));
        assert!(first.organic);
        assert_eq!(
            first.created_at,
            Some("2024-03-01T10:15:00Z".parse::<DateTime<Utc>>().unwrap())
        );
        assert_eq!(orders[1].customer_latitude, 35.8);
    }

    #[test]
    fn test_invalid_rows_are_dropped() {
        let transformer = Transformer::new(OrganicBackfill::default());
        let mut rng = StdRng::seed_from_u64(1);
        let mut missing_key = raw_order(6, json!(35.0), json!(51.0));
        missing_key.remove("order_id");
        let (orders, report) = transformer.transform_orders(
            vec![
                raw_order(1, json!(91.0), json!(51.4)),
                raw_order(2, json!(35.0), json!(-181.0)),
                raw_order(3, Value::Null, json!(51.4)),
                raw_order(4, json!(-90.0), json!(180.0)),
                raw_order(4, json!(10.0), json!(10.0)),
                missing_key,
            ],
            &mut rng,
        );
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].order_id, "4");
        assert_eq!(report.invalid_coordinates, 3);
        assert_eq!(report.duplicates, 1);
        assert_eq!(report.missing_fields, 1);
        assert_eq!(report.received, 6);
    }

    #[tokio::test]
    async fn test_orders_without_timestamp_or_vendor_are_kept() {
        let raw: Vec<RawRecord> = (0..100)
            .map(|i| {
                let mut order = raw_order(i, json!(35.7), json!(51.4));
                order.remove("created_at");
                if i % 2 == 0 {
                    order.insert("vendor_code".to_string(), Value::Null);
                }
                order
            })
            .collect();
        let transformer = Transformer::new(OrganicBackfill::default()).with_seed(3);
        let output = transformer.run(raw, vec![]).await.unwrap();

        assert_eq!(output.orders_report.kept, 100);
        assert_eq!(output.orders_report.missing_fields, 0);
        assert!(output.orders.iter().all(|o| o.created_at.is_none()));
        assert_eq!(output.orders.iter().filter(|o| o.vendor_code.is_none()).count(), 50);
    }

    #[test]
    fn test_timestamps_accept_epochs_and_null_bad_values() {
        let expected = Utc.with_ymd_and_hms(2024, 3, 1, 10, 15, 0).unwrap();
        assert_eq!(as_timestamp(Some(&json!(1_709_288_100))), Some(expected));
        assert_eq!(as_timestamp(Some(&json!(1_709_288_100_000_i64))), Some(expected));
        assert_eq!(as_timestamp(Some(&json!("2024-03-01T10:15:00Z"))), Some(expected));
        assert_eq!(as_timestamp(Some(&json!("not a date"))), None);

        let transformer = Transformer::new(OrganicBackfill::default());
        let mut rng = StdRng::seed_from_u64(1);
        let mut garbled = raw_order(1, json!(35.0), json!(51.0));
        garbled.insert("created_at".to_string(), json!("not a date"));
        let (orders, report) = transformer.transform_orders(vec![garbled], &mut rng);
        assert_eq!(report.kept, 1);
        assert!(orders[0].created_at.is_none());
    }

    #[test]
    fn test_explicit_organic_flag_is_kept() {
        let transformer = Transformer::new(OrganicBackfill::Constant { value: true });
        let mut rng = StdRng::seed_from_u64(1);
        let mut raw = raw_order(1, json!(35.0), json!(51.0));
        raw.insert("organic".to_string(), json!(false));
        let (orders, report) = transformer.transform_orders(vec![raw], &mut rng);
        assert!(!orders[0].organic);
        assert_eq!(report.organic_backfilled, 0);
    }

    #[test]
    fn test_random_backfill_converges_to_ratio() {
        let transformer = Transformer::new(OrganicBackfill::Random { ratio: 0.3 });
        let mut rng = StdRng::seed_from_u64(42);
        let raw: Vec<RawRecord> = (0..20_000)
            .map(|i| raw_order(i, json!(35.0), json!(51.0)))
            .collect();
        let (orders, _) = transformer.transform_orders(raw, &mut rng);
        let organic = orders.iter().filter(|o| o.organic).count() as f64;
        let share = organic / orders.len() as f64;
        assert!((share - 0.3).abs() < 0.02, "organic share was {}", share);
    }

    #[test]
    fn test_vendors_copy_radius_and_map_city() {
        let transformer = Transformer::new(OrganicBackfill::default());
        let (vendors, report) = transformer.transform_vendors(vec![
            record(json!({
                "vendor_code": "V1",
                "latitude": 36.3,
                "longitude": 59.6,
                "radius": 4.5,
                "status_id": 1,
                "visible": 1,
                "open": "true",
                "city_id": 1,
                "business_line": "Pharmacy",
            })),
            record(json!({"vendor_code": "V2", "latitude": null, "longitude": 59.6})),
            record(json!({"latitude": 36.3, "longitude": 59.6})),
        ]);
        assert_eq!(report.kept, 1);
        assert_eq!(report.invalid_coordinates, 1);
        assert_eq!(report.missing_fields, 1);
        let vendor = &vendors[0];
        assert_eq!(vendor.original_radius, Some(4.5));
        assert_eq!(vendor.city_name.as_deref(), Some("mashhad"));
        assert_eq!(vendor.business_line.as_deref(), Some("pharmacy"));
        assert!(vendor.visible && vendor.open);
    }

    #[test]
    fn test_unknown_city_id_has_no_name() {
        let transformer = Transformer::new(OrganicBackfill::default());
        let (vendors, _) = transformer.transform_vendors(vec![record(json!({
            "vendor_code": "V9",
            "latitude": 30.0,
            "longitude": 50.0,
            "city_id": 3,
        }))]);
        assert_eq!(vendors[0].city_id, Some(3));
        assert!(vendors[0].city_name.is_none());
    }

    #[tokio::test]
    async fn test_run_on_blocking_pool_is_deterministic_with_seed() {
        let raw: Vec<RawRecord> = (0..50)
            .map(|i| raw_order(i, json!(35.0), json!(51.0)))
            .collect();
        let transformer = Transformer::new(OrganicBackfill::default()).with_seed(7);
        let a = transformer.run(raw.clone(), vec![]).await.unwrap();
        let b = transformer.run(raw, vec![]).await.unwrap();
        let flags = |o: &TransformOutput| o.orders.iter().map(|x| x.organic).collect::<Vec<_>>();
        assert_eq!(flags(&a), flags(&b));
        assert_eq!(a.orders_report.kept, 50);
    }
}
