use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Column list shared by the bulk loader and the filtered reader.
pub const ORDER_COLUMNS: [&str; 11] = [
    "order_id",
    "vendor_code",
    "customer_latitude",
    "customer_longitude",
    "business_line",
    "marketing_area",
    "city_id",
    "city_name",
    "organic",
    "created_at",
    "user_id",
];

pub const ORDER_COLUMN_COUNT: usize = ORDER_COLUMNS.len();

/// A cleaned order row as stored and served. Only the key and the customer
/// location are guaranteed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Order {
    pub order_id: String,
    pub vendor_code: Option<String>,
    pub customer_latitude: f64,
    pub customer_longitude: f64,
    pub business_line: Option<String>,
    pub marketing_area: Option<String>,
    pub city_id: Option<i32>,
    pub city_name: Option<String>,
    pub organic: bool,
    pub created_at: Option<DateTime<Utc>>,
    pub user_id: Option<String>,
}
