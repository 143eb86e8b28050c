//! Session-scoped tool-result cache (C10).
//!
//! Keys are derived from a tool name plus the SHA-256 digest of the
//! canonical JSON encoding of its arguments, so argument-order-
//! insensitive callers still hit the same entry. Entries carry a TTL and
//! the whole cache is bounded by an LRU policy on top of that.

use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use lru::LruCache;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::Result;
use crate::model::CacheEntry;

/// Default time a cache entry remains valid.
pub const DEFAULT_TTL_MS: i64 = 5 * 60 * 1000;
/// Default maximum number of entries held at once.
pub const DEFAULT_CAPACITY: usize = 512;

/// Recursively sort a JSON value's object keys so structurally-equal
/// arguments hash identically regardless of field order.
fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            let mut sorted = serde_json::Map::new();
            for (k, v) in entries {
                sorted.insert(k.clone(), canonicalize(v));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

/// Compute the cache key for a tool call: `"<tool_name>:<hex sha256>"`.
pub fn cache_key(tool_name: &str, args: &Value) -> String {
    let canonical = canonicalize(args);
    let bytes = serde_json::to_vec(&canonical).unwrap_or_default();
    let digest = Sha256::digest(&bytes);
    format!("{tool_name}:{digest:x}")
}

/// Aggregate hit/miss counters plus a formatted hit-rate string.
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
    pub capacity: usize,
}

impl CacheStats {
    /// e.g. `"73.3%"`. `"0.0%"` when there have been no lookups yet.
    pub fn hit_rate_display(&self) -> String {
        let total = self.hits + self.misses;
        if total == 0 {
            return "0.0%".to_string();
        }
        format!("{:.1}%", (self.hits as f64 / total as f64) * 100.0)
    }
}

struct Inner {
    entries: LruCache<String, CacheEntry>,
    ttl_ms: i64,
    hits: u64,
    misses: u64,
}

/// The tool-result cache itself. Thread-safe via an internal mutex so it
/// can be shared across async tool handlers.
pub struct ToolCache {
    inner: Mutex<Inner>,
}

impl ToolCache {
    pub fn new(capacity: usize, ttl_ms: i64) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: LruCache::new(std::num::NonZeroUsize::new(capacity.max(1)).unwrap()),
                ttl_ms,
                hits: 0,
                misses: 0,
            }),
        }
    }

    fn is_expired(entry: &CacheEntry, now_ms: i64) -> bool {
        now_ms >= entry.expires_at
    }

    /// Fetch a cached value if present and unexpired.
    pub fn get(&self, key: &str, now_ms: i64) -> Option<Value> {
        let mut inner = self.inner.lock().expect("cache mutex poisoned");
        match inner.entries.get(key).cloned() {
            Some(entry) if !Self::is_expired(&entry, now_ms) => {
                inner.hits += 1;
                Some(entry.value)
            }
            Some(_) => {
                inner.entries.pop(key);
                inner.misses += 1;
                None
            }
            None => {
                inner.misses += 1;
                None
            }
        }
    }

    pub fn set(&self, key: &str, tool_name: &str, value: Value, now_ms: i64) {
        let mut inner = self.inner.lock().expect("cache mutex poisoned");
        let ttl = inner.ttl_ms;
        inner.entries.put(
            key.to_string(),
            CacheEntry {
                tool_name: tool_name.to_string(),
                value,
                created_at: now_ms,
                expires_at: now_ms + ttl,
            },
        );
    }

    pub fn has(&self, key: &str, now_ms: i64) -> bool {
        let inner = self.inner.lock().expect("cache mutex poisoned");
        inner
            .entries
            .peek(key)
            .map(|e| !Self::is_expired(e, now_ms))
            .unwrap_or(false)
    }

    pub fn del(&self, key: &str) -> bool {
        let mut inner = self.inner.lock().expect("cache mutex poisoned");
        inner.entries.pop(key).is_some()
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock().expect("cache mutex poisoned");
        inner.entries.clear();
    }

    /// Remove every entry whose `expires_at <= now_ms`. Returns how many
    /// were removed.
    pub fn cleanup_expired(&self, now_ms: i64) -> usize {
        let mut inner = self.inner.lock().expect("cache mutex poisoned");
        let expired: Vec<String> = inner
            .entries
            .iter()
            .filter(|(_, v)| Self::is_expired(v, now_ms))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired {
            inner.entries.pop(key);
        }
        expired.len()
    }

    /// Invalidate every entry tagged with `tool_name`.
    pub fn invalidate_by_tool(&self, tool_name: &str) -> usize {
        let mut inner = self.inner.lock().expect("cache mutex poisoned");
        let matching: Vec<String> = inner
            .entries
            .iter()
            .filter(|(_, v)| v.tool_name == tool_name)
            .map(|(k, _)| k.clone())
            .collect();
        for key in &matching {
            inner.entries.pop(key);
        }
        matching.len()
    }

    /// Invalidate every entry whose `tool_name` contains `pattern` as a
    /// substring.
    pub fn invalidate_by_pattern(&self, pattern: &str) -> usize {
        let mut inner = self.inner.lock().expect("cache mutex poisoned");
        let matching: Vec<String> = inner
            .entries
            .iter()
            .filter(|(_, v)| v.tool_name.contains(pattern))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &matching {
            inner.entries.pop(key);
        }
        matching.len()
    }

    /// Tool results that depend on the on-disk memory set and therefore
    /// go stale on any write.
    pub const WRITE_INVALIDATED_TOOLS: [&'static str; 4] =
        ["memory_search", "memory_match_triggers", "memory_read", "memory_list_folders"];

    /// A write unconditionally invalidates every cached result for the
    /// four read tools whose output depends on the on-disk memory set,
    /// regardless of which memory or folder was written.
    pub fn invalidate_on_write(&self) -> usize {
        Self::WRITE_INVALIDATED_TOOLS
            .iter()
            .map(|tool| self.invalidate_by_tool(tool))
            .sum()
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock().expect("cache mutex poisoned");
        CacheStats {
            hits: inner.hits,
            misses: inner.misses,
            entries: inner.entries.len(),
            capacity: inner.entries.cap().get(),
        }
    }

    /// Compute-or-fetch: returns the cached value for `(tool_name, args)`
    /// if present and fresh, otherwise calls `compute`, caches the
    /// result, and returns it.
    pub async fn with_cache<F, Fut>(
        &self,
        tool_name: &str,
        args: &Value,
        now_ms: i64,
        compute: F,
    ) -> Result<Value>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value>>,
    {
        let key = cache_key(tool_name, args);
        if let Some(cached) = self.get(&key, now_ms) {
            return Ok(cached);
        }
        let value = compute().await?;
        self.set(&key, tool_name, value.clone(), now_ms);
        Ok(value)
    }
}

impl Default for ToolCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY, DEFAULT_TTL_MS)
    }
}

/// Spawn a periodic background task that calls `cleanup_expired` on an
/// interval. Returns a handle whose `abort()` stops the task - mirrors
/// the crate's other long-running-task ownership pattern rather than a
/// bespoke stop-channel.
pub fn spawn_cleanup_task(
    cache: std::sync::Arc<ToolCache>,
    interval: Duration,
    now_ms: impl Fn() -> i64 + Send + 'static,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            cache.cleanup_expired(now_ms());
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn canonical_key_is_order_insensitive() {
        let a = cache_key("search", &json!({"q": "x", "limit": 5}));
        let b = cache_key("search", &json!({"limit": 5, "q": "x"}));
        assert_eq!(a, b);
    }

    #[test]
    fn different_args_hash_differently() {
        let a = cache_key("search", &json!({"q": "x"}));
        let b = cache_key("search", &json!({"q": "y"}));
        assert_ne!(a, b);
    }

    #[test]
    fn get_set_roundtrip() {
        let cache = ToolCache::new(10, 1000);
        let key = cache_key("search", &json!({"q": "x"}));
        assert!(cache.get(&key, 0).is_none());
        cache.set(&key, "search", json!({"ok": true}), 0);
        assert_eq!(cache.get(&key, 10), Some(json!({"ok": true})));
    }

    #[test]
    fn entries_expire_after_ttl() {
        let cache = ToolCache::new(10, 100);
        let key = cache_key("search", &json!({"q": "x"}));
        cache.set(&key, "search", json!(1), 0);
        assert!(cache.get(&key, 50).is_some());
        assert!(cache.get(&key, 150).is_none());
    }

    #[test]
    fn lru_evicts_oldest_past_capacity() {
        let cache = ToolCache::new(2, 10_000);
        cache.set("a", "t", json!(1), 0);
        cache.set("b", "t", json!(2), 0);
        cache.set("c", "t", json!(3), 0);
        assert!(cache.get("a", 0).is_none());
        assert!(cache.get("c", 0).is_some());
    }

    #[test]
    fn invalidate_by_tool_removes_matching_entries_only() {
        let cache = ToolCache::new(10, 10_000);
        cache.set("k1", "search", json!(1), 0);
        cache.set("k2", "recall", json!(2), 0);
        let removed = cache.invalidate_by_tool("search");
        assert_eq!(removed, 1);
        assert!(cache.get("k1", 0).is_none());
        assert!(cache.get("k2", 0).is_some());
    }

    #[test]
    fn invalidate_by_pattern_matches_tool_name_not_key() {
        let cache = ToolCache::new(10, 10_000);
        cache.set("some-opaque-hash-1", "memory_search", json!(1), 0);
        cache.set("some-opaque-hash-2", "memory_read", json!(2), 0);
        let removed = cache.invalidate_by_pattern("memory_search");
        assert_eq!(removed, 1);
        assert!(cache.get("some-opaque-hash-1", 0).is_none());
        assert!(cache.get("some-opaque-hash-2", 0).is_some());
    }

    #[test]
    fn invalidate_on_write_clears_the_four_read_tools_only() {
        let cache = ToolCache::new(10, 10_000);
        cache.set("k1", "memory_search", json!(1), 0);
        cache.set("k2", "memory_match_triggers", json!(2), 0);
        cache.set("k3", "memory_read", json!(3), 0);
        cache.set("k4", "memory_list_folders", json!(4), 0);
        cache.set("k5", "memory_create", json!(5), 0);

        let removed = cache.invalidate_on_write();
        assert_eq!(removed, 4);
        assert!(cache.get("k1", 0).is_none());
        assert!(cache.get("k2", 0).is_none());
        assert!(cache.get("k3", 0).is_none());
        assert!(cache.get("k4", 0).is_none());
        assert!(cache.get("k5", 0).is_some());
    }

    #[test]
    fn cleanup_expired_removes_only_stale_entries() {
        let cache = ToolCache::new(10, 100);
        cache.set("fresh", "t", json!(1), 0);
        cache.set("stale", "t", json!(2), -1000);
        let removed = cache.cleanup_expired(0);
        assert_eq!(removed, 1);
    }

    #[test]
    fn hit_rate_display_formats_percentage() {
        let cache = ToolCache::new(10, 10_000);
        cache.set("k", "t", json!(1), 0);
        cache.get("k", 0);
        cache.get("missing", 0);
        let stats = cache.stats();
        assert_eq!(stats.hit_rate_display(), "50.0%");
    }

    #[tokio::test]
    async fn with_cache_only_computes_once() {
        let cache = ToolCache::new(10, 10_000);
        let calls = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let args = json!({"q": "x"});

        for _ in 0..3 {
            let calls = calls.clone();
            cache
                .with_cache("search", &args, 0, || async move {
                    calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                    Ok(json!({"result": 1}))
                })
                .await
                .unwrap();
        }
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
