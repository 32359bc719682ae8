//! Cache-aside filtered reads.

use crate::error::{HttpAppError, ValidatedQuery};
use crate::state::AppState;
use axum::{extract::State, Json};
use chrono::NaiveDate;
use serde::Deserialize;
use std::sync::Arc;
use vantage_core::models::{FilterSpec, FilteredData};

fn default_use_cache() -> bool {
    true
}

/// Query string for `/filtered-data`. List parameters are comma separated.
#[derive(Debug, Deserialize)]
pub struct FilteredDataQuery {
    pub city: Option<String>,
    pub business_lines: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub vendor_codes: Option<String>,
    #[serde(default = "default_use_cache")]
    pub use_cache: bool,
}

fn split_list(raw: Option<&str>) -> Option<Vec<String>> {
    let values: Vec<String> = raw?
        .split(',')
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(String::from)
        .collect();
    (!values.is_empty()).then_some(values)
}

impl FilteredDataQuery {
    pub fn to_spec(&self) -> FilterSpec {
        FilterSpec {
            city: self
                .city
                .as_deref()
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .map(String::from),
            business_lines: split_list(self.business_lines.as_deref()),
            start_date: self.start_date,
            end_date: self.end_date,
            vendor_codes: split_list(self.vendor_codes.as_deref()),
        }
    }
}

#[tracing::instrument(skip(state))]
pub async fn get_filtered_data(
    State(state): State<Arc<AppState>>,
    ValidatedQuery(query): ValidatedQuery<FilteredDataQuery>,
) -> Result<Json<FilteredData>, HttpAppError> {
    let data = state
        .services
        .filtered
        .get_filtered_data(&query.to_spec(), query.use_cache)
        .await?;
    Ok(Json(data))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_comma_lists_become_sets() {
        let query = FilteredDataQuery {
            city: Some(" tehran ".to_string()),
            business_lines: Some("restaurant, ,coffee_shop".to_string()),
            start_date: None,
            end_date: None,
            vendor_codes: Some(",".to_string()),
            use_cache: true,
        };
        let spec = query.to_spec();
        assert_eq!(spec.city.as_deref(), Some("tehran"));
        assert_eq!(
            spec.business_lines,
            Some(vec!["restaurant".to_string(), "coffee_shop".to_string()])
        );
        assert_eq!(spec.vendor_codes, None);
    }
}
