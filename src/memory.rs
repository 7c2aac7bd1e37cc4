//! In-process memory backend with total-size accounting.
//!
//! Entries live in a single map guarded by one mutex; the serialized size of
//! every resident entry is tracked in the same critical section so the
//! counter can never drift from the map contents. When a write would push
//! the total past the configured budget the whole map is cleared first:
//! wholesale eviction rather than LRU, since every entry is regenerable.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, instrument, warn};

use crate::entry::CacheEntry;
use crate::error::Result;
use crate::traits::{composite_key, CacheStore, KEY_SEPARATOR};

const DEFAULT_SIZE_LIMIT_MB: usize = 512;

#[derive(Default)]
struct MemoryInner {
    entries: HashMap<String, String>,
    total_bytes: usize,
}

/// Process-local cache backend.
pub struct MemoryCache {
    size_limit_bytes: usize,
    inner: Mutex<MemoryInner>,
}

impl MemoryCache {
    /// Create a memory cache with the default 512 MB budget.
    pub fn new() -> Self {
        Self::with_size_limit_mb(DEFAULT_SIZE_LIMIT_MB)
    }

    /// Create a memory cache with an explicit budget in megabytes.
    pub fn with_size_limit_mb(limit_mb: usize) -> Self {
        Self {
            size_limit_bytes: limit_mb * 1024 * 1024,
            inner: Mutex::new(MemoryInner::default()),
        }
    }

    /// Total serialized bytes currently resident.
    pub fn total_bytes(&self) -> usize {
        self.inner.lock().total_bytes
    }

    /// Number of resident entries.
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheStore for MemoryCache {
    async fn get(&self, page_key: &str, variant: &str) -> Result<Option<CacheEntry>> {
        let key = composite_key(page_key, variant);
        let raw = self.inner.lock().entries.get(&key).cloned();
        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    #[instrument(skip(self, entry), fields(page = page_key))]
    async fn set(&self, page_key: &str, variant: &str, entry: &CacheEntry) -> Result<()> {
        let key = composite_key(page_key, variant);
        let raw = serde_json::to_string(entry)?;
        let size = raw.len();

        let mut inner = self.inner.lock();
        if let Some(previous) = inner.entries.remove(&key) {
            inner.total_bytes -= previous.len();
        }
        if inner.total_bytes + size > self.size_limit_bytes {
            debug!(
                resident = inner.total_bytes,
                incoming = size,
                "size budget exceeded, evicting everything"
            );
            inner.entries.clear();
            inner.total_bytes = 0;
        }
        inner.total_bytes += size;
        inner.entries.insert(key, raw);
        Ok(())
    }

    async fn delete(&self, page_key: &str, variant: &str) -> Result<()> {
        let key = composite_key(page_key, variant);
        let mut inner = self.inner.lock();
        if let Some(removed) = inner.entries.remove(&key) {
            inner.total_bytes -= removed.len();
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_by_prefix(&self, prefix: &str) -> Result<usize> {
        let needle = format!("{prefix}{KEY_SEPARATOR}");
        let mut inner = self.inner.lock();
        let matches: Vec<String> = inner
            .entries
            .keys()
            .filter(|key| key.starts_with(&needle))
            .cloned()
            .collect();
        for key in &matches {
            if let Some(removed) = inner.entries.remove(key) {
                inner.total_bytes -= removed.len();
            }
        }
        Ok(matches.len())
    }

    #[instrument(skip(self))]
    async fn revalidate_by_tag(&self, tag: &str) -> Result<usize> {
        let mut inner = self.inner.lock();
        let matches: Vec<String> = inner
            .entries
            .iter()
            .filter_map(|(key, raw)| match serde_json::from_str::<CacheEntry>(raw) {
                Ok(entry) if entry.has_tag(tag) => Some(key.clone()),
                Ok(_) => None,
                Err(err) => {
                    warn!("skipping undecodable entry {key}: {err}");
                    None
                }
            })
            .collect();
        for key in &matches {
            if let Some(removed) = inner.entries.remove(key) {
                inner.total_bytes -= removed.len();
            }
        }
        Ok(matches.len())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::PageValue;
    use std::collections::HashMap as StdHashMap;

    fn entry_with_tags(tags: &[&str]) -> CacheEntry {
        CacheEntry {
            value: Some(PageValue::Page {
                html: "<p>cached</p>".to_string(),
                page_data: serde_json::Value::Null,
                headers: StdHashMap::new(),
                status: Some(200),
            }),
            last_modified: 100_000,
            tags: tags.iter().map(|t| t.to_string()).collect(),
            revalidate: None,
        }
    }

    #[tokio::test]
    async fn test_round_trip() {
        let cache = MemoryCache::new();
        let entry = entry_with_tags(&[]);

        cache.set("index", "index", &entry).await.unwrap();
        let read = cache.get("index", "index").await.unwrap();

        assert_eq!(read, Some(entry));
    }

    #[tokio::test]
    async fn test_get_missing_is_none() {
        let cache = MemoryCache::new();
        assert_eq!(cache.get("index", "index").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_delete_idempotent() {
        let cache = MemoryCache::new();
        cache
            .set("index", "index", &entry_with_tags(&[]))
            .await
            .unwrap();

        cache.delete("index", "index").await.unwrap();
        cache.delete("index", "index").await.unwrap();

        assert_eq!(cache.get("index", "index").await.unwrap(), None);
        assert_eq!(cache.total_bytes(), 0);
    }

    #[tokio::test]
    async fn test_variants_are_distinct_entries() {
        let cache = MemoryCache::new();
        cache
            .set("index", "index", &entry_with_tags(&["plain"]))
            .await
            .unwrap();
        cache
            .set("index", "index-cookie(abtest=1)", &entry_with_tags(&["ab"]))
            .await
            .unwrap();

        assert_eq!(cache.len(), 2);
        let plain = cache.get("index", "index").await.unwrap().unwrap();
        assert_eq!(plain.tags, vec!["plain"]);
    }

    #[tokio::test]
    async fn test_delete_by_prefix() {
        let cache = MemoryCache::new();
        cache
            .set("index", "index", &entry_with_tags(&[]))
            .await
            .unwrap();
        cache
            .set("index", "index-cookie(abtest=1)", &entry_with_tags(&[]))
            .await
            .unwrap();
        cache
            .set("index2", "index2", &entry_with_tags(&[]))
            .await
            .unwrap();

        let deleted = cache.delete_by_prefix("index").await.unwrap();

        assert_eq!(deleted, 2);
        assert_eq!(cache.get("index", "index").await.unwrap(), None);
        assert!(cache.get("index2", "index2").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_tag_fan_out() {
        let cache = MemoryCache::new();
        for page in ["a", "b", "c"] {
            cache
                .set(page, page, &entry_with_tags(&["promo"]))
                .await
                .unwrap();
        }
        cache
            .set("d", "d", &entry_with_tags(&["other"]))
            .await
            .unwrap();

        let deleted = cache.revalidate_by_tag("promo").await.unwrap();

        assert_eq!(deleted, 3);
        for page in ["a", "b", "c"] {
            assert_eq!(cache.get(page, page).await.unwrap(), None);
        }
        assert!(cache.get("d", "d").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_revalidate_matches_header_tags() {
        let cache = MemoryCache::new();
        let mut headers = StdHashMap::new();
        headers.insert(
            crate::entry::CACHE_TAGS_HEADER.to_string(),
            "promo,seasonal".to_string(),
        );
        let entry = CacheEntry {
            value: Some(PageValue::Page {
                html: String::new(),
                page_data: serde_json::Value::Null,
                headers,
                status: Some(200),
            }),
            last_modified: 0,
            tags: vec![],
            revalidate: None,
        };
        cache.set("index", "index", &entry).await.unwrap();

        assert_eq!(cache.revalidate_by_tag("seasonal").await.unwrap(), 1);
        assert_eq!(cache.get("index", "index").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_wholesale_eviction_when_budget_exceeded() {
        // Budget of 1 MB; each entry is far smaller, so fill until the
        // counter crosses the line with one oversized write.
        let cache = MemoryCache::with_size_limit_mb(1);
        let small = entry_with_tags(&[]);
        cache.set("a", "a", &small).await.unwrap();
        cache.set("b", "b", &small).await.unwrap();
        let resident_before = cache.total_bytes();
        assert!(resident_before > 0);

        let big = CacheEntry {
            value: Some(PageValue::Page {
                html: "x".repeat(1024 * 1024),
                page_data: serde_json::Value::Null,
                headers: StdHashMap::new(),
                status: Some(200),
            }),
            last_modified: 0,
            tags: vec![],
            revalidate: None,
        };
        cache.set("big", "big", &big).await.unwrap();

        // Everything before the oversized write is gone; only it remains.
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("a", "a").await.unwrap(), None);
        assert!(cache.get("big", "big").await.unwrap().is_some());
        assert!(cache.total_bytes() >= 1024 * 1024);
    }

    #[tokio::test]
    async fn test_size_counter_tracks_overwrites() {
        let cache = MemoryCache::new();
        cache
            .set("index", "index", &entry_with_tags(&["a", "b", "c"]))
            .await
            .unwrap();
        let first = cache.total_bytes();

        cache
            .set("index", "index", &entry_with_tags(&[]))
            .await
            .unwrap();
        let second = cache.total_bytes();

        assert!(second < first);
        cache.delete("index", "index").await.unwrap();
        assert_eq!(cache.total_bytes(), 0);
    }
}
