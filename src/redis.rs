//! Key-value backend backed by Redis.
//!
//! Two variants share the `{page_key}//{variant}` keyspace:
//!
//! - [`RedisCache`] stores entries as plain strings. The store has no
//!   secondary index, so both bulk operations enumerate keys with a SCAN
//!   cursor loop and converge on the shared chunked bulk delete.
//! - [`RedisSearchCache`] stores entries as RedisJSON documents and
//!   maintains a RediSearch tag index over the document tag list, turning
//!   tag revalidation into a direct index query, O(matches) instead of
//!   O(total).

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use tracing::{debug, info, instrument, warn};

use crate::bulk::{delete_in_chunks, CHUNK_LIMIT};
use crate::entry::{CacheEntry, Revalidate};
use crate::error::{CacheError, Result};
use crate::traits::{composite_key, CacheStore, KEY_SEPARATOR};

const TAG_INDEX_NAME: &str = "idx:entry-tags";

async fn connect(client: &redis::Client) -> Result<MultiplexedConnection> {
    Ok(client.get_multiplexed_async_connection().await?)
}

/// Enumerate keys matching `pattern` with a SCAN cursor loop.
///
/// The server returns a bounded batch plus a continuation cursor; the loop
/// runs until the cursor comes back to its initial sentinel (0).
async fn scan_keys(client: &redis::Client, pattern: &str) -> Result<Vec<String>> {
    let mut conn = connect(client).await?;
    let mut keys = Vec::new();
    let mut cursor: u64 = 0;
    loop {
        let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
            .arg(cursor)
            .arg("MATCH")
            .arg(pattern)
            .arg("COUNT")
            .arg(CHUNK_LIMIT)
            .query_async(&mut conn)
            .await?;
        keys.extend(batch);
        cursor = next;
        if cursor == 0 {
            break;
        }
    }
    Ok(keys)
}

/// Chunked DEL over the match list; each batch gets its own connection so
/// batches can run concurrently.
async fn delete_keys(client: &redis::Client, keys: Vec<String>) -> usize {
    delete_in_chunks(keys, |batch| {
        let client = client.clone();
        async move {
            let mut conn = connect(&client).await?;
            let removed: usize = redis::cmd("DEL").arg(&batch).query_async(&mut conn).await?;
            Ok(removed)
        }
    })
    .await
}

/// Plain-string Redis backend.
pub struct RedisCache {
    client: redis::Client,
}

impl RedisCache {
    /// Create a backend connected to the given URL.
    ///
    /// The connection itself is established lazily on first use.
    pub fn new(url: &str) -> Result<Self> {
        Ok(Self {
            client: redis::Client::open(url)?,
        })
    }
}

#[async_trait]
impl CacheStore for RedisCache {
    async fn get(&self, page_key: &str, variant: &str) -> Result<Option<CacheEntry>> {
        let mut conn = connect(&self.client).await?;
        let raw: Option<String> = conn.get(composite_key(page_key, variant)).await?;
        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    #[instrument(skip(self, entry), fields(page = page_key))]
    async fn set(&self, page_key: &str, variant: &str, entry: &CacheEntry) -> Result<()> {
        let key = composite_key(page_key, variant);
        let raw = serde_json::to_string(entry)?;
        let mut conn = connect(&self.client).await?;

        // A numeric revalidation period doubles as a native expiry; stale
        // entries on this backend may therefore disappear on their own.
        match entry.revalidate {
            Some(Revalidate::After(seconds)) => conn.set_ex::<_, _, ()>(&key, raw, seconds).await?,
            _ => conn.set::<_, _, ()>(&key, raw).await?,
        }
        Ok(())
    }

    async fn delete(&self, page_key: &str, variant: &str) -> Result<()> {
        let mut conn = connect(&self.client).await?;
        conn.del::<_, ()>(composite_key(page_key, variant)).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_by_prefix(&self, prefix: &str) -> Result<usize> {
        let keys = scan_keys(&self.client, &format!("{prefix}{KEY_SEPARATOR}*")).await?;
        debug!("prefix scan matched {} keys", keys.len());
        Ok(delete_keys(&self.client, keys).await)
    }

    #[instrument(skip(self))]
    async fn revalidate_by_tag(&self, tag: &str) -> Result<usize> {
        let keys = scan_keys(&self.client, "*").await?;
        let mut conn = connect(&self.client).await?;

        let mut matches = Vec::new();
        for key in keys {
            let raw: redis::RedisResult<Option<String>> = conn.get(&key).await;
            let Ok(Some(raw)) = raw else {
                continue;
            };
            match serde_json::from_str::<CacheEntry>(&raw) {
                Ok(entry) if entry.has_tag(tag) => matches.push(key),
                Ok(_) => {}
                Err(err) => warn!("skipping undecodable entry {key}: {err}"),
            }
        }

        debug!("tag scan matched {} keys", matches.len());
        Ok(delete_keys(&self.client, matches).await)
    }

    fn backend_name(&self) -> &'static str {
        "redis"
    }
}

/// Redis backend with a RediSearch tag index over RedisJSON documents.
pub struct RedisSearchCache {
    client: redis::Client,
}

impl RedisSearchCache {
    /// Create a backend connected to the given URL, ensuring the tag index
    /// exists.
    ///
    /// Index creation is idempotent: an "Index already exists" reply counts
    /// as success.
    pub async fn new(url: &str) -> Result<Self> {
        let cache = Self {
            client: redis::Client::open(url)?,
        };
        cache.ensure_tag_index().await?;
        Ok(cache)
    }

    async fn ensure_tag_index(&self) -> Result<()> {
        let mut conn = connect(&self.client).await?;
        let created: redis::RedisResult<()> = redis::cmd("FT.CREATE")
            .arg(TAG_INDEX_NAME)
            .arg("ON")
            .arg("JSON")
            .arg("SCHEMA")
            .arg("$.tags[*]")
            .arg("AS")
            .arg("tag")
            .arg("TAG")
            .query_async(&mut conn)
            .await;

        match created {
            Ok(()) => {
                info!("created tag index {TAG_INDEX_NAME}");
                Ok(())
            }
            Err(err) if err.to_string().contains("Index already exists") => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    /// Resolve all document ids carrying `tag` through the index, paginating
    /// by offset until the returned count covers the reported total.
    async fn find_by_tag(&self, tag: &str) -> Result<Vec<String>> {
        let mut conn = connect(&self.client).await?;
        let query = format!("@tag:{{{}}}", escape_tag_query(tag));

        let mut ids = Vec::new();
        let mut offset = 0usize;
        loop {
            let reply: redis::Value = redis::cmd("FT.SEARCH")
                .arg(TAG_INDEX_NAME)
                .arg(&query)
                .arg("NOCONTENT")
                .arg("LIMIT")
                .arg(offset)
                .arg(CHUNK_LIMIT)
                .query_async(&mut conn)
                .await?;

            let (total, page) = parse_search_page(&reply)?;
            let fetched = page.len();
            ids.extend(page);
            offset += fetched;
            if fetched == 0 || offset >= total {
                break;
            }
        }
        Ok(ids)
    }
}

#[async_trait]
impl CacheStore for RedisSearchCache {
    async fn get(&self, page_key: &str, variant: &str) -> Result<Option<CacheEntry>> {
        let mut conn = connect(&self.client).await?;
        let raw: Option<String> = redis::cmd("JSON.GET")
            .arg(composite_key(page_key, variant))
            .arg(".")
            .query_async(&mut conn)
            .await?;
        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    #[instrument(skip(self, entry), fields(page = page_key))]
    async fn set(&self, page_key: &str, variant: &str, entry: &CacheEntry) -> Result<()> {
        let key = composite_key(page_key, variant);

        // The indexed field must carry the full tag union, header tags
        // included, so index hits match what the scan variant would find.
        let mut doc = entry.clone();
        doc.tags = entry.all_tags();
        let raw = serde_json::to_string(&doc)?;

        let mut conn = connect(&self.client).await?;
        redis::cmd("JSON.SET")
            .arg(&key)
            .arg("$")
            .arg(&raw)
            .query_async::<()>(&mut conn)
            .await?;

        if let Some(Revalidate::After(seconds)) = entry.revalidate {
            conn.expire::<_, ()>(&key, seconds as i64).await?;
        }
        Ok(())
    }

    async fn delete(&self, page_key: &str, variant: &str) -> Result<()> {
        let mut conn = connect(&self.client).await?;
        conn.del::<_, ()>(composite_key(page_key, variant)).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_by_prefix(&self, prefix: &str) -> Result<usize> {
        let keys = scan_keys(&self.client, &format!("{prefix}{KEY_SEPARATOR}*")).await?;
        debug!("prefix scan matched {} keys", keys.len());
        Ok(delete_keys(&self.client, keys).await)
    }

    #[instrument(skip(self))]
    async fn revalidate_by_tag(&self, tag: &str) -> Result<usize> {
        let ids = self.find_by_tag(tag).await?;
        debug!("index query matched {} documents", ids.len());
        Ok(delete_keys(&self.client, ids).await)
    }

    fn backend_name(&self) -> &'static str {
        "redis-search"
    }
}

/// Escape punctuation in a tag so it can be embedded in a query string.
fn escape_tag_query(tag: &str) -> String {
    let mut escaped = String::with_capacity(tag.len());
    for c in tag.chars() {
        if !c.is_ascii_alphanumeric() {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Parse one NOCONTENT search reply: an array of the total match count
/// followed by the document ids of this page.
fn parse_search_page(reply: &redis::Value) -> Result<(usize, Vec<String>)> {
    let redis::Value::Array(items) = reply else {
        return Err(CacheError::Backend(
            "unexpected search reply shape".to_string(),
        ));
    };

    let mut iter = items.iter();
    let total = match iter.next() {
        Some(redis::Value::Int(total)) => *total as usize,
        _ => {
            return Err(CacheError::Backend(
                "search reply missing total count".to_string(),
            ))
        }
    };

    let ids = iter
        .filter_map(|item| match item {
            redis::Value::BulkString(bytes) => String::from_utf8(bytes.clone()).ok(),
            redis::Value::SimpleString(id) => Some(id.clone()),
            _ => None,
        })
        .collect();

    Ok((total, ids))
}
