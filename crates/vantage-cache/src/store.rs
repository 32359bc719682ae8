//! Typed cache store.
//!
//! Wraps a [`CacheBackend`] with compression, table/JSON payload handling,
//! metadata sidecars and hit/miss accounting. Backend failures are logged and
//! degrade to a miss or a no-op; only [`CacheStore::lookup`] and
//! [`CacheStore::ping`] report them.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;

use vantage_core::constants::cache_keys;
use vantage_core::models::{hit_rate, CacheEntryMetadata, CacheStats};

use crate::backend::CacheBackend;
use crate::codec;
use crate::error::{CacheError, CacheResult};
use crate::table::{CachePayload, Table};

/// Extra lifetime given to `{key}:meta` beyond the data entry.
const METADATA_GRACE: Duration = Duration::from_secs(3600);

pub const HOUR: Duration = Duration::from_secs(3600);

/// Outcome of a cache read that keeps backend failures visible.
#[derive(Debug)]
pub enum CacheLookup<T> {
    Hit(T),
    Miss,
    Error(CacheError),
}

impl<T> CacheLookup<T> {
    /// Collapse errors into a miss.
    pub fn into_option(self) -> Option<T> {
        match self {
            CacheLookup::Hit(value) => Some(value),
            CacheLookup::Miss | CacheLookup::Error(_) => None,
        }
    }

    pub fn is_hit(&self) -> bool {
        matches!(self, CacheLookup::Hit(_))
    }

    fn and_then<U>(self, f: impl FnOnce(T) -> CacheResult<U>) -> CacheLookup<U> {
        match self {
            CacheLookup::Hit(value) => match f(value) {
                Ok(mapped) => CacheLookup::Hit(mapped),
                Err(e) => CacheLookup::Error(e),
            },
            CacheLookup::Miss => CacheLookup::Miss,
            CacheLookup::Error(e) => CacheLookup::Error(e),
        }
    }
}

pub struct CacheStore {
    backend: Arc<dyn CacheBackend>,
    compression_threshold: usize,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CacheStore {
    pub fn new(backend: Arc<dyn CacheBackend>, compression_threshold: usize) -> Self {
        Self {
            backend,
            compression_threshold,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    async fn write_raw(&self, key: &str, raw: Vec<u8>, ttl: Duration) -> CacheResult<(usize, bool)> {
        let stored = codec::encode(raw, self.compression_threshold)?;
        let size = stored.len();
        let compressed = codec::is_compressed(&stored);
        self.backend.set_ex(key, stored, ttl).await?;
        Ok((size, compressed))
    }

    /// Store any serializable value as generic JSON.
    #[tracing::instrument(skip(self, value), fields(cache.key = %key))]
    pub async fn put_json<T: Serialize + ?Sized>(&self, key: &str, value: &T, ttl: Duration) -> bool {
        let result = async {
            let raw = serde_json::to_vec(value)?;
            self.write_raw(key, raw, ttl).await
        }
        .await;
        match result {
            Ok((size, compressed)) => {
                tracing::debug!(size_bytes = size, compressed, "Cached JSON value");
                true
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to cache JSON value");
                false
            }
        }
    }

    /// Store a table payload and its `{key}:meta` sidecar.
    #[tracing::instrument(skip(self, table), fields(cache.key = %key, rows = table.row_count()))]
    pub async fn put_table(&self, key: &str, table: &Table, ttl: Duration) -> bool {
        let result = async {
            let raw = table.to_bytes()?;
            let (size_bytes, compressed) = self.write_raw(key, raw, ttl).await?;
            let metadata = CacheEntryMetadata {
                rows: table.row_count(),
                columns: table.column_count(),
                size_bytes,
                compressed,
                cached_at: Utc::now(),
                expiry_hours: ttl.as_secs().div_ceil(3600),
            };
            let meta_raw = serde_json::to_vec(&metadata)?;
            self.backend
                .set_ex(&cache_keys::meta_key(key), meta_raw, ttl + METADATA_GRACE)
                .await?;
            Ok::<_, CacheError>(metadata)
        }
        .await;
        match result {
            Ok(metadata) => {
                tracing::debug!(
                    size_bytes = metadata.size_bytes,
                    compressed = metadata.compressed,
                    "Cached table"
                );
                true
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to cache table");
                false
            }
        }
    }

    /// Convert records to a table and store it.
    pub async fn put_records<T: Serialize>(&self, key: &str, records: &[T], ttl: Duration) -> bool {
        match Table::from_records(records) {
            Ok(table) => self.put_table(key, &table, ttl).await,
            Err(e) => {
                tracing::warn!(cache.key = %key, error = %e, "Failed to build table payload");
                false
            }
        }
    }

    /// Decoded bytes under `key`, with backend failures reported.
    pub async fn lookup(&self, key: &str) -> CacheLookup<Vec<u8>> {
        let result = match self.backend.get(key).await {
            Ok(Some(stored)) => match codec::decode(stored) {
                Ok(raw) => CacheLookup::Hit(raw),
                Err(e) => CacheLookup::Error(e),
            },
            Ok(None) => CacheLookup::Miss,
            Err(e) => CacheLookup::Error(e),
        };
        match &result {
            CacheLookup::Hit(_) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
            }
            CacheLookup::Miss => {
                self.misses.fetch_add(1, Ordering::Relaxed);
            }
            CacheLookup::Error(e) => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(cache.key = %key, error = %e, "Cache read failed");
            }
        }
        result
    }

    pub async fn lookup_json<T: DeserializeOwned>(&self, key: &str) -> CacheLookup<T> {
        self.lookup(key)
            .await
            .and_then(|raw| serde_json::from_slice(&raw).map_err(CacheError::from))
    }

    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.lookup_json(key).await.into_option()
    }

    pub async fn get_table(&self, key: &str) -> Option<Table> {
        self.lookup(key)
            .await
            .and_then(|raw| Table::from_bytes(&raw))
            .into_option()
    }

    pub async fn get_records<T: DeserializeOwned>(&self, key: &str) -> Option<Vec<T>> {
        match self.get_table(key).await?.into_records() {
            Ok(records) => Some(records),
            Err(e) => {
                tracing::warn!(cache.key = %key, error = %e, "Cached table has unexpected shape");
                None
            }
        }
    }

    /// Table payloads first, then generic JSON.
    pub async fn get_any(&self, key: &str) -> Option<CachePayload> {
        self.lookup(key)
            .await
            .and_then(|raw| CachePayload::decode(&raw))
            .into_option()
    }

    /// Metadata written alongside a table entry.
    pub async fn info(&self, key: &str) -> Option<CacheEntryMetadata> {
        match self.backend.get(&cache_keys::meta_key(key)).await {
            Ok(Some(raw)) => serde_json::from_slice(&raw).ok(),
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(cache.key = %key, error = %e, "Failed to read cache metadata");
                None
            }
        }
    }

    pub async fn delete(&self, key: &str) -> bool {
        let keys = [key.to_string(), cache_keys::meta_key(key)];
        match self.backend.delete(&keys).await {
            Ok(count) => count > 0,
            Err(e) => {
                tracing::warn!(cache.key = %key, error = %e, "Failed to delete cache entry");
                false
            }
        }
    }

    /// Keys matching a glob pattern, empty on backend failure.
    pub async fn keys(&self, pattern: &str) -> Vec<String> {
        match self.backend.scan(pattern).await {
            Ok(keys) => keys,
            Err(e) => {
                tracing::warn!(pattern, error = %e, "Failed to list cache keys");
                Vec::new()
            }
        }
    }

    /// Delete every key matching `pattern`; `*` flushes the whole backend.
    #[tracing::instrument(skip(self))]
    pub async fn invalidate(&self, pattern: &str) -> u64 {
        let result = if pattern == "*" {
            self.backend.flush().await
        } else {
            match self.backend.scan(pattern).await {
                Ok(keys) if keys.is_empty() => Ok(0),
                Ok(keys) => self.backend.delete(&keys).await,
                Err(e) => Err(e),
            }
        };
        match result {
            Ok(count) => {
                tracing::info!(deleted = count, "Invalidated cache entries");
                count
            }
            Err(e) => {
                tracing::warn!(error = %e, "Cache invalidation failed");
                0
            }
        }
    }

    /// Append to a bounded list, newest first.
    pub async fn push_capped<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        max_len: usize,
        ttl: Duration,
    ) -> bool {
        let result = async {
            let raw = serde_json::to_vec(value)?;
            self.backend.push_capped(key, raw, max_len, ttl).await
        }
        .await;
        if let Err(e) = &result {
            tracing::warn!(cache.key = %key, error = %e, "Failed to append to cached list");
        }
        result.is_ok()
    }

    /// Items of a bounded list, newest first. Undecodable items are skipped.
    pub async fn list_json<T: DeserializeOwned>(&self, key: &str) -> Vec<T> {
        match self.backend.list(key).await {
            Ok(items) => items
                .iter()
                .filter_map(|raw| serde_json::from_slice(raw).ok())
                .collect(),
            Err(e) => {
                tracing::warn!(cache.key = %key, error = %e, "Failed to read cached list");
                Vec::new()
            }
        }
    }

    pub async fn stats(&self) -> CacheStats {
        let local_hits = self.hits.load(Ordering::Relaxed);
        let local_misses = self.misses.load(Ordering::Relaxed);
        match self.backend.info().await {
            Ok(info) => CacheStats {
                backend: self.backend.name().to_string(),
                used_memory: info.used_memory_human,
                used_memory_bytes: info.used_memory,
                connected_clients: info.connected_clients,
                total_commands_processed: info.total_commands_processed,
                cache_hit_rate: hit_rate(info.keyspace_hits, info.keyspace_misses),
                key_count: info.key_count,
                local_hits,
                local_misses,
            },
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read cache stats");
                CacheStats {
                    backend: self.backend.name().to_string(),
                    local_hits,
                    local_misses,
                    ..Default::default()
                }
            }
        }
    }

    pub async fn ping(&self) -> CacheResult<()> {
        self.backend.ping().await
    }
}
