use std::sync::Arc;

use chrono::{Duration, NaiveDate};
use futures::future::join_all;
use serde::{Deserialize, Serialize};

use vantage_core::models::FilterSpec;

use crate::filtered::FilteredDataService;

/// Trailing windows warmed per city on the hourly run.
pub const WARM_WINDOWS_DAYS: [i64; 3] = [7, 30, 90];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarmReport {
    pub attempted: usize,
    pub warmed: usize,
    pub failed: usize,
}

/// Populates filtered-data entries ahead of dashboard reads.
#[derive(Clone)]
pub struct CacheWarmer {
    filtered: Arc<FilteredDataService>,
    cities: Vec<String>,
    business_lines: Vec<String>,
    batch_size: usize,
}

impl CacheWarmer {
    pub fn new(
        filtered: Arc<FilteredDataService>,
        cities: Vec<String>,
        business_lines: Vec<String>,
        batch_size: usize,
    ) -> Self {
        Self {
            filtered,
            cities,
            business_lines,
            batch_size: batch_size.max(1),
        }
    }

    /// Each city alone, then each city with each business line.
    pub fn prewarm_specs(&self) -> Vec<FilterSpec> {
        let mut specs = Vec::with_capacity(self.cities.len() * (self.business_lines.len() + 1));
        for city in &self.cities {
            specs.push(FilterSpec::for_city(city.clone()));
        }
        for city in &self.cities {
            for line in &self.business_lines {
                specs.push(FilterSpec::for_city(city.clone()).with_business_lines([line.clone()]));
            }
        }
        specs
    }

    /// The pre-warm set plus the trailing 7/30/90-day windows per city, ending `today`.
    pub fn warm_specs(&self, today: NaiveDate) -> Vec<FilterSpec> {
        let mut specs = self.prewarm_specs();
        for city in &self.cities {
            for days in WARM_WINDOWS_DAYS {
                specs.push(
                    FilterSpec::for_city(city.clone())
                        .with_date_range(today - Duration::days(days), today),
                );
            }
        }
        specs
    }

    /// Warm `specs` in concurrent batches. Failures are logged and counted.
    #[tracing::instrument(skip_all, fields(specs = specs.len(), stage = "prewarm"))]
    pub async fn run(&self, specs: &[FilterSpec]) -> WarmReport {
        let mut report = WarmReport {
            attempted: specs.len(),
            ..Default::default()
        };

        for batch in specs.chunks(self.batch_size) {
            let results = join_all(batch.iter().map(|spec| self.filtered.prewarm(spec))).await;
            for (spec, result) in batch.iter().zip(results) {
                match result {
                    Ok(_) => report.warmed += 1,
                    Err(e) => {
                        report.failed += 1;
                        tracing::warn!(filters = ?spec, error = %e, "Cache warm failed");
                    }
                }
            }
        }

        tracing::info!(
            warmed = report.warmed,
            failed = report.failed,
            "Cache warm finished"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration as StdDuration;
    use vantage_cache::{CacheStore, MemoryBackend};
    use vantage_db::{DatasetRepositoryTrait, InMemoryDatasetRepository};

    use crate::test_helpers::{sample_orders, sample_vendors};

    fn warmer(dataset: Arc<InMemoryDatasetRepository>, cache: Arc<CacheStore>) -> CacheWarmer {
        let filtered = Arc::new(FilteredDataService::new(
            dataset,
            cache,
            StdDuration::from_secs(3600),
        ));
        CacheWarmer::new(
            filtered,
            vec!["tehran".into(), "mashhad".into()],
            vec!["restaurant".into(), "pharmacy".into()],
            5,
        )
    }

    #[test]
    fn test_spec_sets() {
        let cache = Arc::new(CacheStore::new(Arc::new(MemoryBackend::new()), 1024));
        let warmer = warmer(Arc::new(InMemoryDatasetRepository::new()), cache);
        assert_eq!(warmer.prewarm_specs().len(), 2 + 2 * 2);

        let today = NaiveDate::from_ymd_opt(2024, 6, 30).unwrap();
        let specs = warmer.warm_specs(today);
        assert_eq!(specs.len(), 6 + 2 * 3);
        let last = specs.last().unwrap();
        assert_eq!(last.start_date, NaiveDate::from_ymd_opt(2024, 4, 1));
        assert_eq!(last.end_date, Some(today));
    }

    #[tokio::test]
    async fn test_warm_populates_cache_for_reads() {
        let dataset = Arc::new(InMemoryDatasetRepository::new());
        dataset
            .replace_all(&sample_orders(40), &sample_vendors(8))
            .await
            .unwrap();
        let cache = Arc::new(CacheStore::new(Arc::new(MemoryBackend::new()), 1024));
        let warmer = warmer(dataset.clone(), cache.clone());

        let report = warmer.run(&warmer.prewarm_specs()).await;
        assert_eq!(report, WarmReport { attempted: 6, warmed: 6, failed: 0 });
        assert_eq!(cache.keys("filtered:*").await.len(), 6);

        let queries = dataset.order_query_count();
        let filtered = FilteredDataService::new(dataset.clone(), cache, StdDuration::from_secs(3600));
        filtered
            .get_filtered_data(&FilterSpec::for_city("tehran"), true)
            .await
            .unwrap();
        assert_eq!(dataset.order_query_count(), queries);
    }
}
