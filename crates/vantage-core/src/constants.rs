//! Well-known names shared by the pipeline, the cache and the HTTP surface.

/// Source city ids and their canonical names.
pub const CITY_IDS: [(i64, &str); 3] = [(1, "mashhad"), (2, "tehran"), (5, "shiraz")];

pub const DEFAULT_CITIES: [&str; 3] = ["tehran", "mashhad", "shiraz"];

pub const DEFAULT_BUSINESS_LINES: [&str; 4] =
    ["restaurant", "supermarket", "coffee_shop", "pharmacy"];

/// Cache key namespaces.
pub mod cache_keys {
    pub const FILTERED_PREFIX: &str = "filtered";
    pub const MAP_DATA_PATTERN: &str = "map_data:*";
    pub const FILTERED_PATTERN: &str = "filtered:*";
    pub const ORDERS_ALL: &str = "orders:all";
    pub const VENDORS_ALL: &str = "vendors:all";
    pub const SYSTEM_ALERTS: &str = "system_alerts";
    pub const SYSTEM_HEALTH: &str = "system_health";
    pub const DAILY_REPORT_LATEST: &str = "daily_report:latest";
    pub const DAILY_REPORT_PATTERN: &str = "daily_report:*";
    pub const META_SUFFIX: &str = ":meta";

    pub fn orders_for_city(city: &str) -> String {
        format!("orders:city:{}", city)
    }

    pub fn vendors_for_city(city: &str) -> String {
        format!("vendors:city:{}", city)
    }

    pub fn daily_report_for(date: chrono::NaiveDate) -> String {
        format!("daily_report:{}", date.format("%Y-%m-%d"))
    }

    pub fn meta_key(key: &str) -> String {
        format!("{}{}", key, META_SUFFIX)
    }
}

/// Map a source city id to its name. Unknown ids yield `None`.
pub fn city_name_for_id(city_id: i64) -> Option<&'static str> {
    CITY_IDS
        .iter()
        .find(|(id, _)| *id == city_id)
        .map(|(_, name)| *name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_city_lookup() {
        assert_eq!(city_name_for_id(1), Some("mashhad"));
        assert_eq!(city_name_for_id(2), Some("tehran"));
        assert_eq!(city_name_for_id(5), Some("shiraz"));
        assert_eq!(city_name_for_id(3), None);
    }

    #[test]
    fn test_report_key_format() {
        let date = chrono::NaiveDate::from_ymd_opt(2024, 3, 7).unwrap();
        assert_eq!(cache_keys::daily_report_for(date), "daily_report:2024-03-07");
        assert_eq!(cache_keys::meta_key("orders:all"), "orders:all:meta");
    }
}
