//! Pluggable page-cache layer for web-rendering runtimes.
//!
//! This crate sits between a rendering runtime and a durable storage
//! backend: given a logical page path and the request's variance dimensions
//! (cookies, query parameters, device class) it derives a stable cache key,
//! stores and retrieves rendered-page entries with freshness metadata, and
//! supports two invalidation modes (exact-path deletion and fan-out
//! invalidation by content tag) across backends with very different native
//! capabilities.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────┐
//! │  Host runtime                                    │
//! │        │                                         │
//! │        ▼                                         │
//! │  ┌───────────┐   key derivation, no-cache        │
//! │  │ PageCache │   matchers, staleness check       │
//! │  └─────┬─────┘                                   │
//! │        ▼                                         │
//! │  ┌────────────┐                                  │
//! │  │ CacheStore │  ← Unified trait                 │
//! │  └─────┬──────┘                                  │
//! │        │                                         │
//! │  ┌─────┴──────┬──────────┬─────────┐             │
//! │  ▼            ▼          ▼         ▼             │
//! │ Memory   FileSystem   Redis       S3             │
//! └──────────────────────────────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```no_run
//! use pagecache::{CacheConfig, FileSystemCache, PageCache, PageValue, RequestContext, WriteMeta};
//! use std::sync::Arc;
//!
//! # async fn example() {
//! let config = CacheConfig::new()
//!     .with_cookies(["abtest"])
//!     .with_device_split();
//! let cache = PageCache::new(config, Arc::new(FileSystemCache::new("./cache-data")));
//!
//! let ctx = RequestContext::new().with_cookie_header("abtest=1");
//! let value = PageValue::Page {
//!     html: "<p>rendered</p>".to_string(),
//!     page_data: serde_json::Value::Null,
//!     headers: Default::default(),
//!     status: Some(200),
//! };
//! cache.set("/index", Some(value), &ctx, &WriteMeta::new()).await;
//!
//! let entry = cache.get("/index", &ctx).await;
//! # let _ = entry;
//! # }
//! ```
//!
//! # Behavior notes
//!
//! - Staleness is evaluated at read time and never deletes the stored
//!   record; a stale entry reads as a miss until overwritten or invalidated.
//! - Backend failures degrade to a miss (reads) or a logged no-op (writes
//!   and invalidations). The host can always regenerate.
//! - Bulk invalidation is best-effort and chunked; a failed batch leaves
//!   earlier batches deleted and later ones intact.
//!
//! # Features
//!
//! - `redis` - Enable the key-value backend (plain and tag-indexed variants)
//! - `s3` - Enable the S3/object-store backend (requires `object_store`)
//! - `full` - Enable all backends

mod bulk;
mod config;
mod entry;
mod error;
mod filesystem;
mod handler;
mod key;
mod memory;
mod traits;

#[cfg(feature = "redis")]
mod redis;

#[cfg(feature = "s3")]
mod s3;

pub use config::CacheConfig;
pub use entry::{
    CacheEntry, PageValue, Revalidate, CACHE_TAGS_HEADER, PATH_TAG_PREFIX, TAGS_SEPARATOR,
};
pub use error::{CacheError, Result};
pub use filesystem::FileSystemCache;
pub use handler::{PageCache, WriteMeta};
pub use key::{CacheKey, DeviceClass, RequestContext};
pub use memory::MemoryCache;
pub use traits::CacheStore;

#[cfg(feature = "redis")]
pub use self::redis::{RedisCache, RedisSearchCache};

#[cfg(feature = "s3")]
pub use s3::{S3Cache, S3Config};

use std::sync::Arc;

/// Backend selection, resolved once at configuration time.
#[derive(Debug, Clone)]
pub enum StoreConfig {
    /// In-process memory with a size budget in megabytes.
    Memory {
        size_limit_mb: usize,
    },
    /// Local filesystem rooted at `root`.
    FileSystem {
        root: std::path::PathBuf,
    },
    /// Plain key-value store (scan-based invalidation).
    #[cfg(feature = "redis")]
    Redis {
        url: String,
    },
    /// Key-value store with a secondary tag index.
    #[cfg(feature = "redis")]
    RedisSearch {
        url: String,
    },
    /// S3-compatible object store.
    #[cfg(feature = "s3")]
    S3(S3Config),
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig::FileSystem {
            root: std::path::PathBuf::from("./cache-data"),
        }
    }
}

/// Create the cache backend selected by `config`.
///
/// This is the single place a deployment chooses its backend; exactly one
/// is active per [`PageCache`].
pub async fn create_store(config: &StoreConfig) -> Result<Arc<dyn CacheStore>> {
    match config {
        StoreConfig::Memory { size_limit_mb } => {
            Ok(Arc::new(MemoryCache::with_size_limit_mb(*size_limit_mb)))
        }
        StoreConfig::FileSystem { root } => Ok(Arc::new(FileSystemCache::new(root))),
        #[cfg(feature = "redis")]
        StoreConfig::Redis { url } => Ok(Arc::new(RedisCache::new(url)?)),
        #[cfg(feature = "redis")]
        StoreConfig::RedisSearch { url } => Ok(Arc::new(RedisSearchCache::new(url).await?)),
        #[cfg(feature = "s3")]
        StoreConfig::S3(s3_config) => Ok(Arc::new(S3Cache::new(s3_config.clone())?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_memory_store() {
        let store = create_store(&StoreConfig::Memory { size_limit_mb: 16 })
            .await
            .unwrap();
        assert_eq!(store.backend_name(), "memory");
    }

    #[tokio::test]
    async fn test_create_filesystem_store() {
        let temp = tempfile::TempDir::new().unwrap();
        let store = create_store(&StoreConfig::FileSystem {
            root: temp.path().to_path_buf(),
        })
        .await
        .unwrap();
        assert_eq!(store.backend_name(), "filesystem");
    }
}
