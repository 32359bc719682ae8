//! Redis backend over a multiplexed `ConnectionManager`.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;

use crate::backend::{ttl_seconds, BackendInfo, CacheBackend};
use crate::error::{CacheError, CacheResult};

const SCAN_COUNT: usize = 500;
const DELETE_BATCH: usize = 1000;

#[derive(Clone)]
pub struct RedisBackend {
    conn: ConnectionManager,
}

impl RedisBackend {
    #[tracing::instrument(skip(url))]
    pub async fn connect(url: &str) -> CacheResult<Self> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        tracing::info!("Connected to Redis cache backend");
        Ok(Self { conn })
    }
}

/// Pull the numeric and human-readable fields out of an `INFO` reply.
pub(crate) fn parse_info(raw: &str) -> BackendInfo {
    let mut info = BackendInfo::default();
    for line in raw.lines() {
        let Some((field, value)) = line.trim().split_once(':') else {
            continue;
        };
        match field {
            "used_memory" => info.used_memory = value.parse().ok(),
            "used_memory_human" => info.used_memory_human = Some(value.to_string()),
            "connected_clients" => info.connected_clients = value.parse().ok(),
            "total_commands_processed" => info.total_commands_processed = value.parse().ok(),
            "keyspace_hits" => info.keyspace_hits = value.parse().unwrap_or(0),
            "keyspace_misses" => info.keyspace_misses = value.parse().unwrap_or(0),
            _ => {}
        }
    }
    info
}

#[async_trait]
impl CacheBackend for RedisBackend {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        let mut conn = self.conn.clone();
        let value: Option<Vec<u8>> = redis::cmd("GET").arg(key).query_async(&mut conn).await?;
        Ok(value)
    }

    async fn set_ex(&self, key: &str, value: Vec<u8>, ttl: Duration) -> CacheResult<()> {
        let mut conn = self.conn.clone();
        let _: () = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("EX")
            .arg(ttl_seconds(ttl))
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> CacheResult<u64> {
        let mut conn = self.conn.clone();
        let mut deleted = 0u64;
        for batch in keys.chunks(DELETE_BATCH) {
            let count: u64 = redis::cmd("DEL").arg(batch).query_async(&mut conn).await?;
            deleted += count;
        }
        Ok(deleted)
    }

    async fn scan(&self, pattern: &str) -> CacheResult<Vec<String>> {
        let mut conn = self.conn.clone();
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(SCAN_COUNT)
                .query_async(&mut conn)
                .await?;
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }
        // SCAN may return a key more than once.
        keys.sort();
        keys.dedup();
        Ok(keys)
    }

    async fn flush(&self) -> CacheResult<u64> {
        let mut conn = self.conn.clone();
        let count: u64 = redis::cmd("DBSIZE").query_async(&mut conn).await?;
        let _: () = redis::cmd("FLUSHDB").query_async(&mut conn).await?;
        Ok(count)
    }

    async fn push_capped(
        &self,
        key: &str,
        value: Vec<u8>,
        max_len: usize,
        ttl: Duration,
    ) -> CacheResult<()> {
        if max_len == 0 {
            return Err(CacheError::Backend("list capacity must be positive".to_string()));
        }
        let mut conn = self.conn.clone();
        let _: () = redis::pipe()
            .atomic()
            .cmd("LPUSH")
            .arg(key)
            .arg(value)
            .ignore()
            .cmd("LTRIM")
            .arg(key)
            .arg(0)
            .arg(max_len as i64 - 1)
            .ignore()
            .cmd("EXPIRE")
            .arg(key)
            .arg(ttl_seconds(ttl))
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn list(&self, key: &str) -> CacheResult<Vec<Vec<u8>>> {
        let mut conn = self.conn.clone();
        let items: Vec<Vec<u8>> = redis::cmd("LRANGE")
            .arg(key)
            .arg(0)
            .arg(-1)
            .query_async(&mut conn)
            .await?;
        Ok(items)
    }

    async fn info(&self) -> CacheResult<BackendInfo> {
        let mut conn = self.conn.clone();
        let raw: String = redis::cmd("INFO").query_async(&mut conn).await?;
        let key_count: u64 = redis::cmd("DBSIZE").query_async(&mut conn).await?;
        let mut info = parse_info(&raw);
        info.key_count = key_count;
        Ok(info)
    }

    async fn ping(&self) -> CacheResult<()> {
        let mut conn = self.conn.clone();
        let reply: String = redis::cmd("PING").query_async(&mut conn).await?;
        if reply == "PONG" {
            Ok(())
        } else {
            Err(CacheError::Backend(format!("unexpected PING reply: {}", reply)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_info_reads_known_fields() {
        let raw = "# Memory\r\nused_memory:1048576\r\nused_memory_human:1.00M\r\n\
                   # Clients\r\nconnected_clients:7\r\n\
                   # Stats\r\ntotal_commands_processed:420\r\nkeyspace_hits:30\r\nkeyspace_misses:10\r\n";
        let info = parse_info(raw);
        assert_eq!(info.used_memory, Some(1_048_576));
        assert_eq!(info.used_memory_human.as_deref(), Some("1.00M"));
        assert_eq!(info.connected_clients, Some(7));
        assert_eq!(info.total_commands_processed, Some(420));
        assert_eq!(info.keyspace_hits, 30);
        assert_eq!(info.keyspace_misses, 10);
    }

    #[test]
    fn test_parse_info_tolerates_missing_fields() {
        let info = parse_info("# Server\r\nredis_version:7.2.0\r\n");
        assert_eq!(info, BackendInfo::default());
    }
}
