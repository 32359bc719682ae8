use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use vantage_cache::{derive_key, CacheLookup, CacheStore};
use vantage_core::constants::cache_keys::FILTERED_PREFIX;
use vantage_core::models::{FilterSpec, FilteredData, FilteredMetadata};
use vantage_core::AppError;
use vantage_db::DatasetRepositoryTrait;

/// Cache-aside read path over the dataset tables.
#[derive(Clone)]
pub struct FilteredDataService {
    dataset: Arc<dyn DatasetRepositoryTrait>,
    cache: Arc<CacheStore>,
    ttl: Duration,
}

impl FilteredDataService {
    pub fn new(
        dataset: Arc<dyn DatasetRepositoryTrait>,
        cache: Arc<CacheStore>,
        ttl: Duration,
    ) -> Self {
        Self {
            dataset,
            cache,
            ttl,
        }
    }

    /// Cache key for `spec`. Specs selecting the same rows share a key.
    pub fn cache_key(spec: &FilterSpec) -> String {
        derive_key(FILTERED_PREFIX, &spec.key_fields())
    }

    #[tracing::instrument(skip(self), fields(cache.key = tracing::field::Empty))]
    pub async fn get_filtered_data(
        &self,
        spec: &FilterSpec,
        use_cache: bool,
    ) -> Result<FilteredData, AppError> {
        spec.validate()?;
        let key = Self::cache_key(spec);
        tracing::Span::current().record("cache.key", key.as_str());

        if use_cache {
            match self.cache.lookup_json::<FilteredData>(&key).await {
                CacheLookup::Hit(data) => {
                    tracing::debug!("Filtered data served from cache");
                    return Ok(data);
                }
                CacheLookup::Miss | CacheLookup::Error(_) => {}
            }
        }

        let data = self.query(spec, key.clone()).await?;

        if use_cache {
            self.cache.put_json(&key, &data, self.ttl).await;
        }

        Ok(data)
    }

    /// Query live and overwrite the cached entry, resetting its TTL.
    pub async fn prewarm(&self, spec: &FilterSpec) -> Result<FilteredData, AppError> {
        spec.validate()?;
        let key = Self::cache_key(spec);
        let data = self.query(spec, key.clone()).await?;
        if !self.cache.put_json(&key, &data, self.ttl).await {
            return Err(AppError::Cache(format!("failed to store {}", key)));
        }
        Ok(data)
    }

    async fn query(&self, spec: &FilterSpec, cache_key: String) -> Result<FilteredData, AppError> {
        let normalized = spec.normalized();
        let (orders, vendors) = tokio::try_join!(
            self.dataset.query_orders(&normalized),
            self.dataset.query_vendors(&normalized),
        )?;

        tracing::debug!(
            orders = orders.len(),
            vendors = vendors.len(),
            "Filtered query executed"
        );

        Ok(FilteredData {
            metadata: FilteredMetadata {
                order_count: orders.len(),
                vendor_count: vendors.len(),
                generated_at: Utc::now(),
                filters: normalized,
                cache_key,
            },
            orders,
            vendors,
        })
    }
}
