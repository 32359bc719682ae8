//! Vantage cache layer
//!
//! A typed store over Redis (or an in-process backend) with transparent
//! compression, table payloads, metadata sidecars, glob invalidation and
//! deterministic key derivation.

pub mod backend;
pub mod codec;
pub mod error;
pub mod keys;
pub mod memory_backend;
pub mod redis_backend;
pub mod store;
pub mod table;
pub mod test_helpers;

use std::sync::Arc;

pub use backend::{BackendInfo, CacheBackend};
pub use error::{CacheError, CacheResult};
pub use keys::derive_key;
pub use memory_backend::MemoryBackend;
pub use redis_backend::RedisBackend;
pub use store::{CacheLookup, CacheStore, HOUR};
pub use table::{CachePayload, Table};

/// Connect to Redis when a URL is configured, otherwise fall back to the
/// in-process backend. A Redis connection failure also falls back so the API
/// can still serve uncached reads.
pub async fn connect_backend(redis_url: Option<&str>) -> Arc<dyn CacheBackend> {
    match redis_url {
        Some(url) => match RedisBackend::connect(url).await {
            Ok(backend) => Arc::new(backend),
            Err(e) => {
                tracing::error!(error = %e, "Redis unavailable, using in-process cache backend");
                Arc::new(MemoryBackend::new())
            }
        },
        None => {
            tracing::info!("REDIS_URL not set, using in-process cache backend");
            Arc::new(MemoryBackend::new())
        }
    }
}
