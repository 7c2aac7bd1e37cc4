//! Process-wide cache configuration.
//!
//! A [`CacheConfig`] is built once at startup and handed to the coordinator;
//! it is never mutated afterwards, so independent configurations can coexist
//! (one per coordinator) without ambient globals.

use regex::Regex;

use crate::error::{CacheError, Result};

/// Immutable configuration for a [`PageCache`](crate::PageCache).
#[derive(Debug, Clone, Default)]
pub struct CacheConfig {
    /// Cookie names that split the cache key, kept sorted.
    pub cache_cookies: Vec<String>,
    /// Query parameter names that split the cache key, kept sorted.
    pub cache_queries: Vec<String>,
    /// Whether the device class participates in the cache key.
    pub enable_device_split: bool,
    no_cache_matchers: Vec<Regex>,
}

impl CacheConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cookie names whose values split the cache key.
    ///
    /// Names are sorted here so configuration insertion order never affects
    /// derived keys.
    pub fn with_cookies<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.cache_cookies = names.into_iter().map(Into::into).collect();
        self.cache_cookies.sort();
        self
    }

    /// Query parameter names whose values split the cache key. Sorted, like
    /// cookies.
    pub fn with_queries<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.cache_queries = names.into_iter().map(Into::into).collect();
        self.cache_queries.sort();
        self
    }

    /// Split the cache per device class (mobile/tablet/smarttv).
    pub fn with_device_split(mut self) -> Self {
        self.enable_device_split = true;
        self
    }

    /// Paths excluded from caching entirely.
    ///
    /// Each pattern is compiled as an anchored regular expression and matched
    /// against the page path as the host runtime passes it, so a literal
    /// path excludes exactly itself and patterns like `/account/.*` exclude
    /// a subtree.
    pub fn with_no_cache_paths<I, S>(mut self, patterns: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.no_cache_matchers = patterns
            .into_iter()
            .map(|pattern| {
                Regex::new(&format!("^(?:{})$", pattern.as_ref())).map_err(|err| {
                    CacheError::Config(format!(
                        "invalid no-cache pattern {:?}: {err}",
                        pattern.as_ref()
                    ))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(self)
    }

    /// Whether `page_key` is allowed into the cache at all.
    pub fn is_cacheable_path(&self, page_key: &str) -> bool {
        !self
            .no_cache_matchers
            .iter()
            .any(|matcher| matcher.is_match(page_key))
    }
}
