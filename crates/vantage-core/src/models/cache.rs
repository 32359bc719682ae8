use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Sidecar record written under `{key}:meta` next to table entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntryMetadata {
    pub rows: usize,
    pub columns: usize,
    pub size_bytes: usize,
    pub compressed: bool,
    pub cached_at: DateTime<Utc>,
    pub expiry_hours: u64,
}

/// Backend usage plus the store's own hit/miss counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub backend: String,
    pub used_memory: Option<String>,
    pub used_memory_bytes: Option<u64>,
    pub connected_clients: Option<u64>,
    pub total_commands_processed: Option<u64>,
    /// Percentage derived from backend keyspace hits and misses, 0 without traffic.
    pub cache_hit_rate: f64,
    pub key_count: u64,
    pub local_hits: u64,
    pub local_misses: u64,
}

/// hits / (hits + misses) × 100, rounded to two decimals.
pub fn hit_rate(hits: u64, misses: u64) -> f64 {
    let total = hits + misses;
    if total == 0 {
        return 0.0;
    }
    ((hits as f64 / total as f64) * 100.0 * 100.0).round() / 100.0
}
