//! Chunked, best-effort bulk deletion.
//!
//! Scan-driven backends accumulate a match list and then delete it through
//! this helper: the list is partitioned into batches bounded by the backend
//! batch-delete limit, batches fire concurrently, and a failed batch is
//! logged and skipped while the rest proceed. There is no rollback; a
//! mid-operation failure leaves earlier batches deleted.

use std::future::Future;

use futures::future::join_all;
use tracing::error;

use crate::error::Result;

/// Upper bound on keys per delete batch, and the page size used by
/// cursor-driven scans.
pub(crate) const CHUNK_LIMIT: usize = 100;

/// Delete `keys` in batches of at most [`CHUNK_LIMIT`].
///
/// Returns the number of keys in batches that succeeded.
pub(crate) async fn delete_in_chunks<K, F, Fut>(keys: Vec<K>, delete_batch: F) -> usize
where
    K: Clone,
    F: Fn(Vec<K>) -> Fut,
    Fut: Future<Output = Result<usize>>,
{
    let batches: Vec<_> = keys
        .chunks(CHUNK_LIMIT)
        .map(|chunk| delete_batch(chunk.to_vec()))
        .collect();

    let mut deleted = 0;
    for outcome in join_all(batches).await {
        match outcome {
            Ok(count) => deleted += count,
            Err(err) => error!("bulk delete batch failed: {err}"),
        }
    }
    deleted
}
