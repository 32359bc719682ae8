use serde::{Deserialize, Serialize};

/// Column list shared by the bulk loader and the filtered reader. The spatial
/// `location` column is derived after load and never bound directly.
pub const VENDOR_COLUMNS: [&str; 13] = [
    "vendor_code",
    "vendor_name",
    "latitude",
    "longitude",
    "radius",
    "original_radius",
    "status_id",
    "visible",
    "open",
    "grade",
    "business_line",
    "city_id",
    "city_name",
];

pub const VENDOR_COLUMN_COUNT: usize = VENDOR_COLUMNS.len();

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Vendor {
    pub vendor_code: String,
    pub vendor_name: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
    pub radius: Option<f64>,
    /// Radius as delivered by the source, kept when `radius` is edited later.
    pub original_radius: Option<f64>,
    pub status_id: Option<i32>,
    pub visible: bool,
    pub open: bool,
    pub grade: Option<String>,
    pub business_line: Option<String>,
    pub city_id: Option<i32>,
    pub city_name: Option<String>,
}
