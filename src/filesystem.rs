//! Filesystem backend: one directory per logical page, one file per variant.
//!
//! Layout: `{root}/{page_key}/{variant}.json`, a flat JSON document of the
//! entry shape. Directories are created lazily on first write. Prefix
//! deletion removes the page's whole subtree in one recursive delete, which
//! also covers nested page directories; tag revalidation walks every cached
//! file and inspects its tag list, the O(total) correctness baseline the
//! indexed backends approximate.

use std::path::{Path, PathBuf};

use async_recursion::async_recursion;
use async_trait::async_trait;
use tokio::fs;
use tracing::{debug, instrument, warn};

use crate::entry::CacheEntry;
use crate::error::Result;
use crate::traits::CacheStore;

/// Filesystem cache backend.
#[derive(Debug, Clone)]
pub struct FileSystemCache {
    root: PathBuf,
}

impl FileSystemCache {
    /// Create a filesystem backend rooted at `root`.
    ///
    /// The root is created lazily on the first write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The root directory for this backend.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn entry_path(&self, page_key: &str, variant: &str) -> PathBuf {
        self.root.join(page_key).join(format!("{variant}.json"))
    }

    #[async_recursion]
    async fn count_files(&self, dir: &Path) -> Result<usize> {
        let mut entries = match fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let mut count = 0;
        while let Some(entry) = entries.next_entry().await? {
            let metadata = entry.metadata().await?;
            if metadata.is_dir() {
                count += self.count_files(&entry.path()).await?;
            } else if metadata.is_file() {
                count += 1;
            }
        }
        Ok(count)
    }

    #[async_recursion]
    async fn revalidate_dir(&self, dir: &Path, tag: &str, deleted: &mut usize) -> Result<()> {
        let mut entries = match fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let metadata = entry.metadata().await?;

            if metadata.is_dir() {
                self.revalidate_dir(&path, tag, deleted).await?;
            } else if path.extension().is_some_and(|ext| ext == "json") {
                let cached: CacheEntry = match fs::read(&path).await {
                    Ok(data) => match serde_json::from_slice(&data) {
                        Ok(cached) => cached,
                        Err(err) => {
                            warn!("skipping undecodable entry {}: {err}", path.display());
                            continue;
                        }
                    },
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                    Err(e) => return Err(e.into()),
                };

                if cached.has_tag(tag) {
                    match fs::remove_file(&path).await {
                        Ok(()) => *deleted += 1,
                        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                        Err(e) => return Err(e.into()),
                    }
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl CacheStore for FileSystemCache {
    #[instrument(skip(self), fields(page = page_key))]
    async fn get(&self, page_key: &str, variant: &str) -> Result<Option<CacheEntry>> {
        let path = self.entry_path(page_key, variant);
        match fs::read(&path).await {
            Ok(data) => Ok(Some(serde_json::from_slice(&data)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    #[instrument(skip(self, entry), fields(page = page_key))]
    async fn set(&self, page_key: &str, variant: &str, entry: &CacheEntry) -> Result<()> {
        let path = self.entry_path(page_key, variant);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        debug!("writing {:?}", path);
        fs::write(&path, serde_json::to_vec(entry)?).await?;
        Ok(())
    }

    #[instrument(skip(self), fields(page = page_key))]
    async fn delete(&self, page_key: &str, variant: &str) -> Result<()> {
        let path = self.entry_path(page_key, variant);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    #[instrument(skip(self))]
    async fn delete_by_prefix(&self, prefix: &str) -> Result<usize> {
        // Everything under the page directory matches, so one recursive
        // delete beats per-file removal.
        let dir = self.root.join(prefix);
        let count = self.count_files(&dir).await?;
        if count == 0 {
            return Ok(0);
        }

        debug!("removing subtree {:?}", dir);
        match fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(count),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    #[instrument(skip(self))]
    async fn revalidate_by_tag(&self, tag: &str) -> Result<usize> {
        let mut deleted = 0;
        let root = self.root.clone();
        self.revalidate_dir(&root, tag, &mut deleted).await?;
        Ok(deleted)
    }

    fn backend_name(&self) -> &'static str {
        "filesystem"
    }
}
