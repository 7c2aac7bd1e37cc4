//! The backend-neutral storage contract.
//!
//! Every backend implements [`CacheStore`] with the same semantics: `get`
//! resolves a missing key to `Ok(None)`, `delete` is idempotent, and the two
//! bulk operations are best-effort. The coordinator is the only caller and
//! absorbs backend errors, so implementations are free to propagate
//! connection failures as `Err`.

use async_trait::async_trait;

use crate::entry::CacheEntry;
use crate::error::Result;

/// Separator between the page key and the variant key in composite keys.
///
/// Used by the flat keyspace backends (memory, key-value); the filesystem
/// and object-store backends segment on `/` instead.
pub(crate) const KEY_SEPARATOR: &str = "//";

/// Composite key for flat keyspace backends.
pub(crate) fn composite_key(page_key: &str, variant: &str) -> String {
    format!("{page_key}{KEY_SEPARATOR}{variant}")
}

/// Unified storage contract for all cache backends.
///
/// # Thread Safety
///
/// All implementations must be `Send + Sync` to allow concurrent access
/// from multiple async tasks.
///
/// # Error Handling
///
/// `get` must map "no such entry" to `Ok(None)`; only genuine backend
/// failures (connection loss, undecodable stored data) surface as `Err`.
/// `delete` on an absent key succeeds.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Read the entry stored for this page variant.
    async fn get(&self, page_key: &str, variant: &str) -> Result<Option<CacheEntry>>;

    /// Write an entry, fully replacing any previous one under the same key.
    async fn set(&self, page_key: &str, variant: &str, entry: &CacheEntry) -> Result<()>;

    /// Delete one variant. No-op if the key is absent (idempotent).
    async fn delete(&self, page_key: &str, variant: &str) -> Result<()>;

    /// Delete every variant of every page under the given page-key prefix.
    ///
    /// Returns the number of physical records removed.
    async fn delete_by_prefix(&self, prefix: &str) -> Result<usize>;

    /// Delete every entry carrying the given tag, explicitly or via payload
    /// headers.
    ///
    /// Returns the number of physical records removed.
    async fn revalidate_by_tag(&self, tag: &str) -> Result<usize>;

    /// Human-readable name for this backend.
    fn backend_name(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_composite_key() {
        assert_eq!(
            composite_key("index", "index-cookie(abtest=1)"),
            "index//index-cookie(abtest=1)"
        );
    }
}
