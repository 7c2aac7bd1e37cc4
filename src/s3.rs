//! Object-store backend for S3-compatible services.
//!
//! Uses the `object_store` crate for S3, MinIO, and other S3-compatible
//! services. One logical entry backs up to two objects sharing the
//! `{page_key}/{variant}` prefix: the metadata document `{variant}.json`
//! (always) and the rendered artifact `{variant}.html` (for page payloads),
//! so the HTML can be served or inspected without parsing the JSON envelope.
//!
//! Object stores have no server-side content search, so the entry's tag
//! union is attached to the metadata object as object-level tags on write,
//! and bulk tag revalidation lists the store and fetches each candidate's
//! metadata document to inspect its tags. Listings do not return tags, which
//! makes that operation O(candidates) round trips, a known performance
//! hazard accepted for correctness; prefer the indexed key-value backend
//! when tag fan-out is hot.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::TryStreamExt;
use object_store::aws::AmazonS3Builder;
use object_store::path::Path as ObjectPath;
use object_store::{ObjectStore, PutOptions, TagSet};
use tracing::{debug, instrument, warn};

use crate::bulk::delete_in_chunks;
use crate::entry::{CacheEntry, PageValue, TAGS_SEPARATOR};
use crate::error::{CacheError, Result};
use crate::traits::CacheStore;

/// Configuration for the object-store backend.
#[derive(Debug, Clone)]
pub struct S3Config {
    /// Bucket name
    pub bucket: String,
    /// AWS region
    pub region: String,
    /// Optional key prefix for all cached objects
    pub prefix: Option<String>,
    /// Optional custom endpoint (for MinIO, etc.)
    pub endpoint: Option<String>,
    /// Use path-style requests (required for MinIO)
    pub force_path_style: bool,
    /// Optional access key (if not using IAM/env credentials)
    pub access_key_id: Option<String>,
    /// Optional secret key
    pub secret_access_key: Option<String>,
    /// Allow HTTP (non-HTTPS) connections
    pub allow_http: bool,
}

impl S3Config {
    /// Configuration for AWS S3.
    pub fn aws(bucket: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            region: region.into(),
            prefix: None,
            endpoint: None,
            force_path_style: false,
            access_key_id: None,
            secret_access_key: None,
            allow_http: false,
        }
    }

    /// Configuration for MinIO or other S3-compatible services.
    pub fn minio(bucket: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            region: "us-east-1".to_string(),
            prefix: None,
            endpoint: Some(endpoint.into()),
            force_path_style: true,
            access_key_id: None,
            secret_access_key: None,
            allow_http: true,
        }
    }

    /// Set a key prefix for all cached objects.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    /// Set explicit credentials.
    pub fn with_credentials(
        mut self,
        access_key_id: impl Into<String>,
        secret_access_key: impl Into<String>,
    ) -> Self {
        self.access_key_id = Some(access_key_id.into());
        self.secret_access_key = Some(secret_access_key.into());
        self
    }
}

/// S3-compatible object-store backend.
#[derive(Clone)]
pub struct S3Cache {
    store: Arc<dyn ObjectStore>,
    prefix: String,
}

impl S3Cache {
    /// Create a backend from configuration.
    pub fn new(config: S3Config) -> Result<Self> {
        let mut builder = AmazonS3Builder::new()
            .with_bucket_name(&config.bucket)
            .with_region(&config.region)
            .with_allow_http(config.allow_http);

        if let Some(endpoint) = &config.endpoint {
            builder = builder.with_endpoint(endpoint);
        }

        if config.force_path_style {
            builder = builder.with_virtual_hosted_style_request(false);
        }

        if let (Some(key_id), Some(secret)) = (&config.access_key_id, &config.secret_access_key) {
            builder = builder
                .with_access_key_id(key_id)
                .with_secret_access_key(secret);
        }

        let store = builder
            .build()
            .map_err(|e| CacheError::Config(e.to_string()))?;

        Ok(Self {
            store: Arc::new(store),
            prefix: config.prefix.unwrap_or_default(),
        })
    }

    /// Create from an existing ObjectStore instance.
    pub fn from_store(store: Arc<dyn ObjectStore>, prefix: impl Into<String>) -> Self {
        Self {
            store,
            prefix: prefix.into(),
        }
    }

    fn full_key(&self, key: &str) -> String {
        if self.prefix.is_empty() {
            key.to_string()
        } else {
            format!("{}/{}", self.prefix.trim_end_matches('/'), key)
        }
    }

    fn object_path(&self, page_key: &str, variant: &str, extension: &str) -> ObjectPath {
        ObjectPath::from(self.full_key(&format!("{page_key}/{variant}.{extension}")))
    }

    fn list_path(&self, prefix: Option<&str>) -> Option<ObjectPath> {
        match prefix {
            Some(prefix) => Some(ObjectPath::from(self.full_key(prefix))),
            None if self.prefix.is_empty() => None,
            None => Some(ObjectPath::from(self.prefix.trim_end_matches('/'))),
        }
    }

    /// List every object under `prefix` through the store's paginated
    /// listing (continuation tokens are driven by the stream) and keep the
    /// cache-owned filename set.
    async fn list_cache_objects(&self, prefix: Option<&str>) -> Result<Vec<ObjectPath>> {
        let list_path = self.list_path(prefix);
        let mut stream = self.store.list(list_path.as_ref());

        let mut locations = Vec::new();
        while let Some(meta) = stream.try_next().await? {
            let raw = meta.location.as_ref();
            if raw.ends_with(".json") || raw.ends_with(".html") {
                locations.push(meta.location);
            }
        }
        Ok(locations)
    }

    async fn delete_object(&self, path: &ObjectPath) -> Result<()> {
        match self.store.delete(path).await {
            Ok(()) => Ok(()),
            Err(object_store::Error::NotFound { .. }) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Chunked delete over collected locations; absent objects count as
    /// deleted (the artifact object is optional per entry).
    async fn delete_locations(&self, locations: Vec<ObjectPath>) -> usize {
        delete_in_chunks(locations, |batch| {
            let cache = self.clone();
            async move {
                let count = batch.len();
                for path in &batch {
                    cache.delete_object(path).await?;
                }
                Ok(count)
            }
        })
        .await
    }
}

impl std::fmt::Debug for S3Cache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Cache").field("prefix", &self.prefix).finish()
    }
}

fn html_sibling(json_path: &ObjectPath) -> Option<ObjectPath> {
    json_path
        .as_ref()
        .strip_suffix(".json")
        .map(|stem| ObjectPath::from(format!("{stem}.html")))
}

#[async_trait]
impl CacheStore for S3Cache {
    #[instrument(skip(self), fields(page = page_key))]
    async fn get(&self, page_key: &str, variant: &str) -> Result<Option<CacheEntry>> {
        let path = self.object_path(page_key, variant, "json");
        match self.store.get(&path).await {
            Ok(result) => {
                let data = result.bytes().await?;
                Ok(Some(serde_json::from_slice(&data)?))
            }
            // A missing object is a normal cache miss, not an error.
            Err(object_store::Error::NotFound { .. }) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    #[instrument(skip(self, entry), fields(page = page_key))]
    async fn set(&self, page_key: &str, variant: &str, entry: &CacheEntry) -> Result<()> {
        if let Some(PageValue::Page { html, .. }) = &entry.value {
            let html_path = self.object_path(page_key, variant, "html");
            debug!("writing artifact {:?}", html_path);
            self.store
                .put(&html_path, Bytes::from(html.clone()).into())
                .await?;
        }

        let tags = entry.all_tags();
        let mut tag_set = TagSet::default();
        if !tags.is_empty() {
            tag_set.push("tags", &tags.join(TAGS_SEPARATOR));
        }

        let json_path = self.object_path(page_key, variant, "json");
        debug!("writing metadata {:?}", json_path);
        self.store
            .put_opts(
                &json_path,
                Bytes::from(serde_json::to_vec(entry)?).into(),
                PutOptions {
                    tags: tag_set,
                    ..Default::default()
                },
            )
            .await?;
        Ok(())
    }

    #[instrument(skip(self), fields(page = page_key))]
    async fn delete(&self, page_key: &str, variant: &str) -> Result<()> {
        for extension in ["json", "html"] {
            self.delete_object(&self.object_path(page_key, variant, extension))
                .await?;
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_by_prefix(&self, prefix: &str) -> Result<usize> {
        let locations = self.list_cache_objects(Some(prefix)).await?;
        debug!("prefix listing matched {} objects", locations.len());
        Ok(self.delete_locations(locations).await)
    }

    #[instrument(skip(self))]
    async fn revalidate_by_tag(&self, tag: &str) -> Result<usize> {
        let candidates = self.list_cache_objects(None).await?;

        // Listings carry no tags, so every metadata document is fetched and
        // inspected individually.
        let mut matches = Vec::new();
        for location in candidates {
            if !location.as_ref().ends_with(".json") {
                continue;
            }

            let entry: CacheEntry = match self.store.get(&location).await {
                Ok(result) => match serde_json::from_slice(&result.bytes().await?) {
                    Ok(entry) => entry,
                    Err(err) => {
                        warn!("skipping undecodable entry {location}: {err}");
                        continue;
                    }
                },
                Err(object_store::Error::NotFound { .. }) => continue,
                Err(e) => return Err(e.into()),
            };

            if entry.has_tag(tag) {
                if let Some(html) = html_sibling(&location) {
                    matches.push(html);
                }
                matches.push(location);
            }
        }

        debug!("tag inspection matched {} objects", matches.len());
        Ok(self.delete_locations(matches).await)
    }

    fn backend_name(&self) -> &'static str {
        "s3"
    }
}
