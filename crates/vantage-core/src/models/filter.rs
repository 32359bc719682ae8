use std::collections::BTreeMap;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::order::Order;
use super::vendor::Vendor;
use crate::error::AppError;

/// Read-path query over orders and vendors. Every predicate is optional and
/// they combine conjunctively.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub business_lines: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vendor_codes: Option<Vec<String>>,
}

fn normalize_set(
    values: Option<Vec<String>>,
    fold: impl Fn(&str) -> String,
) -> Option<Vec<String>> {
    let mut values: Vec<String> = values?
        .into_iter()
        .map(|v| fold(v.trim()))
        .filter(|v| !v.is_empty())
        .collect();
    values.sort();
    values.dedup();
    if values.is_empty() {
        None
    } else {
        Some(values)
    }
}

impl FilterSpec {
    pub fn for_city(city: impl Into<String>) -> Self {
        Self {
            city: Some(city.into()),
            ..Default::default()
        }
    }

    pub fn with_business_lines<I, S>(mut self, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.business_lines = Some(lines.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_date_range(mut self, start: NaiveDate, end: NaiveDate) -> Self {
        self.start_date = Some(start);
        self.end_date = Some(end);
        self
    }

    pub fn with_vendor_codes<I, S>(mut self, codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.vendor_codes = Some(codes.into_iter().map(Into::into).collect());
        self
    }

    /// Canonical form: city and business lines lowercased, "all"/empty city
    /// dropped, sets sorted and de-duplicated, empty sets dropped. Two specs selecting the same rows
    /// normalize to equal values.
    pub fn normalized(&self) -> Self {
        let city = self
            .city
            .as_ref()
            .map(|c| c.trim().to_lowercase())
            .filter(|c| !c.is_empty() && c != "all");
        Self {
            city,
            business_lines: normalize_set(self.business_lines.clone(), str::to_lowercase),
            start_date: self.start_date,
            end_date: self.end_date,
            vendor_codes: normalize_set(self.vendor_codes.clone(), str::to_string),
        }
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if let (Some(start), Some(end)) = (self.start_date, self.end_date) {
            if start > end {
                return Err(AppError::InvalidInput(format!(
                    "start_date {} is after end_date {}",
                    start, end
                )));
            }
        }
        Ok(())
    }

    /// Fields fed to the key deriver. Absent predicates map to `null` and are
    /// dropped there.
    pub fn key_fields(&self) -> BTreeMap<String, serde_json::Value> {
        let spec = self.normalized();
        let mut fields = BTreeMap::new();
        fields.insert("city".to_string(), serde_json::json!(spec.city));
        fields.insert(
            "business_lines".to_string(),
            serde_json::json!(spec.business_lines),
        );
        fields.insert(
            "start_date".to_string(),
            serde_json::json!(spec.start_date.map(|d| d.format("%Y-%m-%d").to_string())),
        );
        fields.insert(
            "end_date".to_string(),
            serde_json::json!(spec.end_date.map(|d| d.format("%Y-%m-%d").to_string())),
        );
        fields.insert(
            "vendor_codes".to_string(),
            serde_json::json!(spec.vendor_codes),
        );
        fields
    }

    /// Inclusive lower bound on `created_at`.
    pub fn created_from(&self) -> Option<DateTime<Utc>> {
        self.start_date
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|dt| dt.and_utc())
    }

    /// Exclusive upper bound on `created_at`: the end date covers its whole day.
    pub fn created_before(&self) -> Option<DateTime<Utc>> {
        self.end_date
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|dt| dt.and_utc() + Duration::days(1))
    }

    /// Evaluate the order predicates against a row. Expects a normalized spec.
    pub fn matches_order(&self, order: &Order) -> bool {
        if let Some(city) = &self.city {
            if order.city_name.as_deref() != Some(city.as_str()) {
                return false;
            }
        }
        if let Some(lines) = &self.business_lines {
            match &order.business_line {
                Some(line) if lines.contains(line) => {}
                _ => return false,
            }
        }
        if let Some(codes) = &self.vendor_codes {
            match &order.vendor_code {
                Some(code) if codes.contains(code) => {}
                _ => return false,
            }
        }
        // Undated orders fall outside any date range.
        if let Some(from) = self.created_from() {
            if !order.created_at.is_some_and(|at| at >= from) {
                return false;
            }
        }
        if let Some(before) = self.created_before() {
            if !order.created_at.is_some_and(|at| at < before) {
                return false;
            }
        }
        true
    }

    /// Vendors carry no timestamp so the date range is ignored.
    pub fn matches_vendor(&self, vendor: &Vendor) -> bool {
        if let Some(city) = &self.city {
            if vendor.city_name.as_deref() != Some(city.as_str()) {
                return false;
            }
        }
        if let Some(lines) = &self.business_lines {
            match &vendor.business_line {
                Some(line) if lines.contains(line) => {}
                _ => return false,
            }
        }
        if let Some(codes) = &self.vendor_codes {
            if !codes.contains(&vendor.vendor_code) {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilteredMetadata {
    pub order_count: usize,
    pub vendor_count: usize,
    pub generated_at: DateTime<Utc>,
    pub filters: FilterSpec,
    pub cache_key: String,
}

/// Result of a filtered read. Identical whether served from cache or live.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilteredData {
    pub orders: Vec<Order>,
    pub vendors: Vec<Vendor>,
    pub metadata: FilteredMetadata,
}
