//! In-process backend with the same semantics as Redis for the operations the
//! store uses. Used for local runs without `REDIS_URL` and in tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::backend::{BackendInfo, CacheBackend};
use crate::error::{CacheError, CacheResult};

enum Value {
    Bytes(Vec<u8>),
    List(VecDeque<Vec<u8>>),
}

struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

#[derive(Default)]
pub struct MemoryBackend {
    entries: RwLock<HashMap<String, Entry>>,
    hits: AtomicU64,
    misses: AtomicU64,
    commands: AtomicU64,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn count_command(&self) {
        self.commands.fetch_add(1, Ordering::Relaxed);
    }

    /// Drop `key` if it has expired by `now`.
    async fn evict_expired(&self, key: &str, now: Instant) {
        let mut entries = self.entries.write().await;
        if entries.get(key).is_some_and(|entry| !entry.is_live(now)) {
            entries.remove(key);
        }
    }
}

/// Translate a Redis glob (`*`, `?`, `[...]`, `\` escape) into an anchored regex.
pub(crate) fn glob_to_regex(pattern: &str) -> CacheResult<Regex> {
    let mut out = String::with_capacity(pattern.len() * 2 + 2);
    out.push('^');
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            '\\' => match chars.next() {
                Some(escaped) => out.push_str(&regex::escape(&escaped.to_string())),
                None => out.push_str(r"\\"),
            },
            '[' => {
                out.push('[');
                if chars.peek() == Some(&'^') {
                    chars.next();
                    out.push('^');
                }
                let mut closed = false;
                for inner in chars.by_ref() {
                    if inner == ']' {
                        closed = true;
                        break;
                    }
                    if matches!(inner, '\\' | '[' | '&' | '~') {
                        out.push('\\');
                    }
                    out.push(inner);
                }
                if !closed {
                    return Err(CacheError::Backend(format!(
                        "unterminated character class in pattern {}",
                        pattern
                    )));
                }
                out.push(']');
            }
            other => out.push_str(&regex::escape(&other.to_string())),
        }
    }
    out.push('$');
    Regex::new(&out).map_err(|e| CacheError::Backend(format!("invalid pattern {}: {}", pattern, e)))
}

#[async_trait]
impl CacheBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        self.count_command();
        let now = Instant::now();
        let expired = {
            let entries = self.entries.read().await;
            match entries.get(key) {
                Some(entry) if entry.is_live(now) => {
                    return match &entry.value {
                        Value::Bytes(bytes) => {
                            self.hits.fetch_add(1, Ordering::Relaxed);
                            Ok(Some(bytes.clone()))
                        }
                        Value::List(_) => Err(CacheError::Backend(format!(
                            "WRONGTYPE key {} holds a list",
                            key
                        ))),
                    };
                }
                Some(_) => true,
                None => false,
            }
        };
        if expired {
            self.evict_expired(key, now).await;
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        Ok(None)
    }

    async fn set_ex(&self, key: &str, value: Vec<u8>, ttl: Duration) -> CacheResult<()> {
        self.count_command();
        let now = Instant::now();
        let entry = Entry {
            value: Value::Bytes(value),
            expires_at: Some(now + ttl),
        };
        let mut entries = self.entries.write().await;
        entries.retain(|_, entry| entry.is_live(now));
        entries.insert(key.to_string(), entry);
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> CacheResult<u64> {
        self.count_command();
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let mut deleted = 0;
        for key in keys {
            if let Some(entry) = entries.remove(key) {
                if entry.is_live(now) {
                    deleted += 1;
                }
            }
        }
        Ok(deleted)
    }

    async fn scan(&self, pattern: &str) -> CacheResult<Vec<String>> {
        self.count_command();
        let matcher = glob_to_regex(pattern)?;
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        entries.retain(|_, entry| entry.is_live(now));
        let mut keys: Vec<String> = entries
            .keys()
            .filter(|k| matcher.is_match(k))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn flush(&self) -> CacheResult<u64> {
        self.count_command();
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let count = entries.values().filter(|e| e.is_live(now)).count() as u64;
        entries.clear();
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
        self.count_command();
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let entry = entries.entry(key.to_string()).or_insert_with(|| Entry {
            value: Value::List(VecDeque::new()),
            expires_at: None,
        });
        if !entry.is_live(now) {
            entry.value = Value::List(VecDeque::new());
        }
        match &mut entry.value {
            Value::List(items) => {
                items.push_front(value);
                items.truncate(max_len);
            }
            Value::Bytes(_) => {
                return Err(CacheError::Backend(format!(
                    "WRONGTYPE key {} holds a string",
                    key
                )))
            }
        }
        entry.expires_at = Some(now + ttl);
        Ok(())
    }

    async fn list(&self, key: &str) -> CacheResult<Vec<Vec<u8>>> {
        self.count_command();
        let now = Instant::now();
        let entries = self.entries.read().await;
        match entries.get(key) {
            Some(entry) if entry.is_live(now) => match &entry.value {
                Value::List(items) => Ok(items.iter().cloned().collect()),
                Value::Bytes(_) => Err(CacheError::Backend(format!(
                    "WRONGTYPE key {} holds a string",
                    key
                ))),
            },
            _ => Ok(Vec::new()),
        }
    }

    async fn info(&self) -> CacheResult<BackendInfo> {
        self.count_command();
        let now = Instant::now();
        let entries = self.entries.read().await;
        let mut used = 0u64;
        let mut key_count = 0u64;
        for (key, entry) in entries.iter().filter(|(_, e)| e.is_live(now)) {
            key_count += 1;
            used += key.len() as u64;
            used += match &entry.value {
                Value::Bytes(bytes) => bytes.len() as u64,
                Value::List(items) => items.iter().map(|i| i.len() as u64).sum(),
            };
        }
        Ok(BackendInfo {
            used_memory_human: Some(format!("{:.2}K", used as f64 / 1024.0)),
            used_memory: Some(used),
            connected_clients: Some(1),
            total_commands_processed: Some(self.commands.load(Ordering::Relaxed)),
            keyspace_hits: self.hits.load(Ordering::Relaxed),
            keyspace_misses: self.misses.load(Ordering::Relaxed),
            key_count,
        })
    }

    async fn ping(&self) -> CacheResult<()> {
        self.count_command();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_glob_translation() {
        let re = glob_to_regex("filtered:*").unwrap();
        assert!(re.is_match("filtered:abc"));
        assert!(!re.is_match("map_data:abc"));

        let re = glob_to_regex("daily_report:202?-*").unwrap();
        assert!(re.is_match("daily_report:2024-01-01"));
        assert!(!re.is_match("daily_report:latest"));

        let re = glob_to_regex("orders:city:[ts]*").unwrap();
        assert!(re.is_match("orders:city:tehran"));
        assert!(re.is_match("orders:city:shiraz"));
        assert!(!re.is_match("orders:city:mashhad"));

        let re = glob_to_regex(r"literal\*").unwrap();
        assert!(re.is_match("literal*"));
        assert!(!re.is_match("literalX"));

        let re = glob_to_regex("a.b").unwrap();
        assert!(!re.is_match("axb"));
    }

    #[test]
    fn test_unterminated_class_rejected() {
        assert!(glob_to_regex("orders:[abc").is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire() {
        let backend = MemoryBackend::new();
        backend
            .set_ex("k", b"v".to_vec(), Duration::from_secs(10))
            .await
            .unwrap();
        assert!(backend.get("k").await.unwrap().is_some());

        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(backend.get("k").await.unwrap().is_none());
        assert!(backend.scan("*").await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entries_are_evicted_without_scan() {
        let backend = MemoryBackend::new();
        let ttl = Duration::from_secs(10);
        backend.set_ex("read", b"v".to_vec(), ttl).await.unwrap();
        backend.set_ex("unread", b"v".to_vec(), ttl).await.unwrap();
        tokio::time::advance(Duration::from_secs(11)).await;

        assert!(backend.get("read").await.unwrap().is_none());
        assert!(!backend.entries.read().await.contains_key("read"));
        assert_eq!(backend.entries.read().await.len(), 1);

        backend.set_ex("fresh", b"v".to_vec(), ttl).await.unwrap();
        let entries = backend.entries.read().await;
        assert_eq!(entries.len(), 1);
        assert!(entries.contains_key("fresh"));
    }

    #[tokio::test]
    async fn test_push_capped_keeps_newest() {
        let backend = MemoryBackend::new();
        for i in 0..5u8 {
            backend
                .push_capped("alerts", vec![i], 3, Duration::from_secs(60))
                .await
                .unwrap();
        }
        let items = backend.list("alerts").await.unwrap();
        assert_eq!(items, vec![vec![4], vec![3], vec![2]]);
    }

    #[tokio::test]
    async fn test_info_counts_hits_and_misses() {
        let backend = MemoryBackend::new();
        backend
            .set_ex("k", b"v".to_vec(), Duration::from_secs(60))
            .await
            .unwrap();
        backend.get("k").await.unwrap();
        backend.get("missing").await.unwrap();
        let info = backend.info().await.unwrap();
        assert_eq!(info.keyspace_hits, 1);
        assert_eq!(info.keyspace_misses, 1);
        assert_eq!(info.key_count, 1);
    }
}
