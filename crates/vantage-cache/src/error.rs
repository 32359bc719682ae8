use thiserror::Error;

/// Failures inside the cache layer. `CacheStore` logs these and degrades to a
/// miss or a no-op; they only escape through `lookup` and `ping`.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Cache backend error: {0}")]
    Backend(String),

    #[error("Cache codec error: {0}")]
    Codec(String),

    #[error("Cache serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<redis::RedisError> for CacheError {
    fn from(err: redis::RedisError) -> Self {
        CacheError::Backend(err.to_string())
    }
}

impl From<std::io::Error> for CacheError {
    fn from(err: std::io::Error) -> Self {
        CacheError::Codec(err.to_string())
    }
}

pub type CacheResult<T> = Result<T, CacheError>;
