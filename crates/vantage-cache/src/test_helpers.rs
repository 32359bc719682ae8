//! Backend doubles for tests in this and dependent crates.

use std::time::Duration;

use async_trait::async_trait;

use crate::backend::{BackendInfo, CacheBackend};
use crate::error::{CacheError, CacheResult};

/// Backend whose every operation fails, as an unreachable Redis would.
pub struct FailingBackend;

fn unavailable<T>() -> CacheResult<T> {
    Err(CacheError::Backend("connection refused".to_string()))
}

#[async_trait]
impl CacheBackend for FailingBackend {
    fn name(&self) -> &'static str {
        "failing"
    }

    async fn get(&self, _key: &str) -> CacheResult<Option<Vec<u8>>> {
        unavailable()
    }

    async fn set_ex(&self, _key: &str, _value: Vec<u8>, _ttl: Duration) -> CacheResult<()> {
        unavailable()
    }

    async fn delete(&self, _keys: &[String]) -> CacheResult<u64> {
        unavailable()
    }

    async fn scan(&self, _pattern: &str) -> CacheResult<Vec<String>> {
        unavailable()
    }

    async fn flush(&self) -> CacheResult<u64> {
        unavailable()
    }

    async fn push_capped(
        &self,
        _key: &str,
        _value: Vec<u8>,
        _max_len: usize,
        _ttl: Duration,
    ) -> CacheResult<()> {
        unavailable()
    }

    async fn list(&self, _key: &str) -> CacheResult<Vec<Vec<u8>>> {
        unavailable()
    }

    async fn info(&self) -> CacheResult<BackendInfo> {
        unavailable()
    }

    async fn ping(&self) -> CacheResult<()> {
        unavailable()
    }
}
