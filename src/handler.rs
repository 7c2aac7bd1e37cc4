//! Cache coordinator: the façade the host runtime calls.
//!
//! The coordinator derives the variant key, applies the no-cache matcher and
//! the staleness check, and delegates to the active backend. Backend
//! failures never reach the caller: a failed read degrades to a miss and a
//! failed write or invalidation is logged and swallowed, so the host can
//! always proceed by regenerating content.

use std::sync::Arc;

use tracing::{error, info};

use crate::config::CacheConfig;
use crate::entry::{now_millis, CacheEntry, PageValue, Revalidate, PATH_TAG_PREFIX};
use crate::key::{normalize_page_key, CacheKey, RequestContext};
use crate::traits::CacheStore;

/// Per-write metadata supplied by the host runtime.
#[derive(Debug, Clone, Default)]
pub struct WriteMeta {
    /// Tags to attach to the entry.
    pub tags: Vec<String>,
    /// Revalidation period for the entry.
    pub revalidate: Option<Revalidate>,
}

impl WriteMeta {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_revalidate(mut self, revalidate: Revalidate) -> Self {
        self.revalidate = Some(revalidate);
        self
    }
}

/// Page-cache façade over one configured backend.
pub struct PageCache {
    config: CacheConfig,
    store: Arc<dyn CacheStore>,
}

impl PageCache {
    /// Create a coordinator over the given configuration and backend.
    pub fn new(config: CacheConfig, store: Arc<dyn CacheStore>) -> Self {
        Self { config, store }
    }

    /// The active backend.
    pub fn store(&self) -> &Arc<dyn CacheStore> {
        &self.store
    }

    /// Read the cached entry for this page under the request's variance
    /// dimensions.
    ///
    /// Returns `None` for excluded paths, misses, stale entries, and backend
    /// failures. A stale entry is not deleted; it stays in the backend until
    /// overwritten or invalidated.
    pub async fn get(&self, page_key: &str, ctx: &RequestContext) -> Option<CacheEntry> {
        if !self.config.is_cacheable_path(page_key) {
            return None;
        }

        info!("reading cache data for {page_key}");
        let key = CacheKey::derive(page_key, &self.config, ctx);
        match self.store.get(key.page_key(), key.variant()).await {
            Ok(Some(entry)) if !entry.is_stale(now_millis()) => Some(entry),
            Ok(_) => {
                info!("no fresh cache data for {page_key}");
                None
            }
            Err(err) => {
                error!("failed to read cache for {page_key}: {err}");
                None
            }
        }
    }

    /// Write, or with a `None` payload delete, the entry for this page under
    /// the request's variance dimensions.
    ///
    /// Excluded paths and non-persistable payload kinds are dropped without
    /// touching the backend. Failures are logged, never returned.
    pub async fn set(
        &self,
        page_key: &str,
        value: Option<PageValue>,
        ctx: &RequestContext,
        meta: &WriteMeta,
    ) {
        if !self.config.is_cacheable_path(page_key) {
            return;
        }
        if value.as_ref().is_some_and(|v| !v.is_persistable()) {
            return;
        }

        let key = CacheKey::derive(page_key, &self.config, ctx);
        match value {
            None => {
                info!("deleting cache data for {page_key}");
                if let Err(err) = self.store.delete(key.page_key(), key.variant()).await {
                    error!("failed to delete cache data for {page_key}: {err}");
                }
            }
            Some(value) => {
                info!("writing cache for {page_key}");
                let entry = CacheEntry {
                    value: Some(value),
                    last_modified: now_millis(),
                    tags: meta.tags.clone(),
                    revalidate: meta.revalidate,
                };
                if let Err(err) = self.store.set(key.page_key(), key.variant(), &entry).await {
                    error!("failed to write cache for {page_key}: {err}");
                }
            }
        }
    }

    /// Invalidate by tag, best-effort.
    ///
    /// A tag carrying the [`PATH_TAG_PREFIX`] encodes a path-revalidation
    /// request and routes to prefix deletion of everything under that path
    /// (any query suffix is split off first); every other tag routes to the
    /// backend's tag lookup. Failures are logged and swallowed.
    pub async fn revalidate_tag(&self, tag: &str) {
        if let Some(rest) = tag.strip_prefix(PATH_TAG_PREFIX) {
            let (path, _query) = rest.split_once('?').unwrap_or((rest, ""));
            let page_key = normalize_page_key(path);

            info!("revalidating by path {page_key}");
            if let Err(err) = self.store.delete_by_prefix(&page_key).await {
                error!("failed to revalidate by path {page_key}: {err}");
            }
        } else {
            info!("revalidating by tag {tag}");
            if let Err(err) = self.store.revalidate_by_tag(tag).await {
                error!("failed to revalidate by tag {tag}: {err}");
            }
        }
    }
}
