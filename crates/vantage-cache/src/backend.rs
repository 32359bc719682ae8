use std::time::Duration;

use async_trait::async_trait;

use crate::error::CacheResult;

/// Server-side usage figures reported by a backend.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BackendInfo {
    pub used_memory_human: Option<String>,
    pub used_memory: Option<u64>,
    pub connected_clients: Option<u64>,
    pub total_commands_processed: Option<u64>,
    pub keyspace_hits: u64,
    pub keyspace_misses: u64,
    pub key_count: u64,
}

/// Byte-level key-value operations the cache store needs. Expiry is enforced
/// by the backend.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    fn name(&self) -> &'static str;

    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>>;

    async fn set_ex(&self, key: &str, value: Vec<u8>, ttl: Duration) -> CacheResult<()>;

    /// Delete the given keys, returning how many existed.
    async fn delete(&self, keys: &[String]) -> CacheResult<u64>;

    /// All keys matching a Redis glob pattern, enumerated incrementally.
    async fn scan(&self, pattern: &str) -> CacheResult<Vec<String>>;

    /// Drop every key, returning how many there were.
    async fn flush(&self) -> CacheResult<u64>;

    /// Prepend to a list, keep the newest `max_len` items and reset its expiry.
    async fn push_capped(
        &self,
        key: &str,
        value: Vec<u8>,
        max_len: usize,
        ttl: Duration,
    ) -> CacheResult<()>;

    /// All items of a list, newest first.
    async fn list(&self, key: &str) -> CacheResult<Vec<Vec<u8>>>;

    async fn info(&self) -> CacheResult<BackendInfo>;

    async fn ping(&self) -> CacheResult<()>;
}

/// Expiry in whole seconds, never below one.
pub(crate) fn ttl_seconds(ttl: Duration) -> u64 {
    ttl.as_secs().max(1)
}
