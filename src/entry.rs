//! Cache entry model: payload kinds, freshness metadata, and the staleness rule.
//!
//! A [`CacheEntry`] is the value envelope every backend stores: the rendered
//! payload, the write timestamp, the attached tags, and the revalidation
//! period. Staleness is evaluated at read time and never deletes anything;
//! a stale entry stays in the backend until it is overwritten or explicitly
//! invalidated.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Response header carrying implicit cache tags on rendered payloads.
pub const CACHE_TAGS_HEADER: &str = "x-cache-tags";

/// Prefix marking a tag as an implicit path-revalidation request.
///
/// `revalidate_tag` routes tags of the form `_path_/blog/post?page=2` to
/// prefix deletion instead of tag lookup.
pub const PATH_TAG_PREFIX: &str = "_path_";

/// Separator for multi-valued tag headers.
pub const TAGS_SEPARATOR: &str = ",";

/// The rendered artifact stored for one page variant.
///
/// `Image`, `Redirect`, and `Fetch` payloads are excluded from persistent
/// caching by policy; the coordinator drops them before they reach a backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "UPPERCASE")]
pub enum PageValue {
    /// A rendered HTML page with its serialized props.
    #[serde(rename_all = "camelCase")]
    Page {
        html: String,
        #[serde(default)]
        page_data: Value,
        #[serde(default)]
        headers: HashMap<String, String>,
        #[serde(default)]
        status: Option<u16>,
    },
    /// A raw response body (API route). The body is base64 inside the
    /// persisted JSON document and decoded transparently on read.
    Route {
        #[serde(with = "base64_bytes")]
        body: Vec<u8>,
        #[serde(default)]
        headers: HashMap<String, String>,
        #[serde(default)]
        status: Option<u16>,
    },
    /// A redirect descriptor. Not persisted.
    Redirect {
        props: Value,
    },
    /// An optimized image. Not persisted.
    Image {
        etag: String,
        extension: String,
    },
    /// A proxied fetch result. Not persisted.
    Fetch {
        #[serde(default)]
        headers: HashMap<String, String>,
        body: String,
        url: String,
        #[serde(default)]
        status: Option<u16>,
    },
}

impl PageValue {
    /// Short name of the payload kind, matching the serialized tag.
    pub fn kind(&self) -> &'static str {
        match self {
            PageValue::Page { .. } => "PAGE",
            PageValue::Route { .. } => "ROUTE",
            PageValue::Redirect { .. } => "REDIRECT",
            PageValue::Image { .. } => "IMAGE",
            PageValue::Fetch { .. } => "FETCH",
        }
    }

    /// Whether this payload kind is allowed into persistent caching.
    pub fn is_persistable(&self) -> bool {
        matches!(self, PageValue::Page { .. } | PageValue::Route { .. })
    }

    fn headers(&self) -> Option<&HashMap<String, String>> {
        match self {
            PageValue::Page { headers, .. } | PageValue::Route { headers, .. } => Some(headers),
            _ => None,
        }
    }

    /// Tags carried implicitly in the payload's [`CACHE_TAGS_HEADER`].
    pub fn header_tags(&self) -> Vec<String> {
        self.headers()
            .and_then(|headers| headers.get(CACHE_TAGS_HEADER))
            .map(|raw| {
                raw.split(TAGS_SEPARATOR)
                    .map(str::trim)
                    .filter(|tag| !tag.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Revalidation period for an entry.
///
/// Serialized as the number of seconds, or the literal `false` for entries
/// that never expire by time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Revalidate {
    /// The entry becomes stale this many seconds after `last_modified`.
    After(u64),
    /// The entry never expires by time.
    Never,
}

impl Serialize for Revalidate {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Revalidate::After(seconds) => serializer.serialize_u64(*seconds),
            Revalidate::Never => serializer.serialize_bool(false),
        }
    }
}

impl<'de> Deserialize<'de> for Revalidate {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Seconds(u64),
            Flag(bool),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Seconds(seconds) => Ok(Revalidate::After(seconds)),
            Raw::Flag(false) => Ok(Revalidate::Never),
            Raw::Flag(true) => Err(serde::de::Error::custom(
                "revalidate must be a number of seconds or false",
            )),
        }
    }
}

/// The value envelope stored under one cache key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    /// The rendered artifact, or `None` for a tombstoned entry.
    pub value: Option<PageValue>,
    /// Unix epoch milliseconds at write time.
    pub last_modified: i64,
    /// Caller-supplied tags.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    /// Revalidation period; absent means never stale.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revalidate: Option<Revalidate>,
}

impl CacheEntry {
    /// Create an entry stamped with the current time.
    pub fn new(value: PageValue, tags: Vec<String>, revalidate: Option<Revalidate>) -> Self {
        Self {
            value: Some(value),
            last_modified: now_millis(),
            tags,
            revalidate,
        }
    }

    /// Whether the entry is stale at `now_ms`.
    ///
    /// Staleness is a read-time signal only; the physical record stays put.
    pub fn is_stale(&self, now_ms: i64) -> bool {
        match self.revalidate {
            Some(Revalidate::After(seconds)) => {
                now_ms > self.last_modified + (seconds as i64) * 1000
            }
            _ => false,
        }
    }

    /// Union of explicit tags and tags carried in the payload headers.
    pub fn all_tags(&self) -> Vec<String> {
        let mut tags = self.tags.clone();
        if let Some(value) = &self.value {
            for tag in value.header_tags() {
                if !tags.contains(&tag) {
                    tags.push(tag);
                }
            }
        }
        tags
    }

    /// Whether the entry carries `tag`, explicitly or via payload headers.
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
            || self
                .value
                .as_ref()
                .is_some_and(|value| value.header_tags().iter().any(|t| t == tag))
    }
}

/// Current time in Unix epoch milliseconds.
pub(crate) fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page_value(tags_header: Option<&str>) -> PageValue {
        let mut headers = HashMap::new();
        if let Some(raw) = tags_header {
            headers.insert(CACHE_TAGS_HEADER.to_string(), raw.to_string());
        }
        PageValue::Page {
            html: "<p>hello</p>".to_string(),
            page_data: Value::Null,
            headers,
            status: Some(200),
        }
    }

    #[test]
    fn test_staleness_law() {
        let entry = CacheEntry {
            value: Some(page_value(None)),
            last_modified: 100_000,
            tags: vec![],
            revalidate: Some(Revalidate::After(60)),
        };

        assert!(!entry.is_stale(100_000 + 60_000));
        assert!(entry.is_stale(100_000 + 60_001));
    }

    #[test]
    fn test_revalidate_never_is_always_fresh() {
        let entry = CacheEntry {
            value: Some(page_value(None)),
            last_modified: 0,
            tags: vec![],
            revalidate: Some(Revalidate::Never),
        };

        assert!(!entry.is_stale(i64::MAX));
    }

    #[test]
    fn test_missing_revalidate_is_always_fresh() {
        let entry = CacheEntry {
            value: Some(page_value(None)),
            last_modified: 0,
            tags: vec![],
            revalidate: None,
        };

        assert!(!entry.is_stale(i64::MAX));
    }

    #[test]
    fn test_revalidate_serde() {
        assert_eq!(
            serde_json::to_string(&Revalidate::After(60)).unwrap(),
            "60"
        );
        assert_eq!(serde_json::to_string(&Revalidate::Never).unwrap(), "false");

        assert_eq!(
            serde_json::from_str::<Revalidate>("60").unwrap(),
            Revalidate::After(60)
        );
        assert_eq!(
            serde_json::from_str::<Revalidate>("false").unwrap(),
            Revalidate::Never
        );
        assert!(serde_json::from_str::<Revalidate>("true").is_err());
    }

    #[test]
    fn test_route_body_round_trip() {
        let value = PageValue::Route {
            body: vec![0x00, 0xff, 0x10, 0x80],
            headers: HashMap::new(),
            status: Some(200),
        };
        let entry = CacheEntry {
            value: Some(value.clone()),
            last_modified: 100_000,
            tags: vec![],
            revalidate: None,
        };

        let raw = serde_json::to_string(&entry).unwrap();
        assert!(raw.contains("\"kind\":\"ROUTE\""));
        // The body must not be embedded as raw bytes.
        assert!(!raw.contains('\u{0}'));

        let decoded: CacheEntry = serde_json::from_str(&raw).unwrap();
        assert_eq!(decoded.value, Some(value));
    }

    #[test]
    fn test_tag_union_of_explicit_and_header_tags() {
        let entry = CacheEntry {
            value: Some(page_value(Some("promo, landing"))),
            last_modified: 0,
            tags: vec!["promo".to_string(), "home".to_string()],
            revalidate: None,
        };

        let tags = entry.all_tags();
        assert_eq!(tags, vec!["promo", "home", "landing"]);
        assert!(entry.has_tag("landing"));
        assert!(entry.has_tag("home"));
        assert!(!entry.has_tag("pricing"));
    }

    #[test]
    fn test_non_persistable_kinds() {
        let image = PageValue::Image {
            etag: "abc".to_string(),
            extension: "webp".to_string(),
        };
        let redirect = PageValue::Redirect { props: Value::Null };
        let fetch = PageValue::Fetch {
            headers: HashMap::new(),
            body: "{}".to_string(),
            url: "https://example.com".to_string(),
            status: Some(200),
        };

        assert!(!image.is_persistable());
        assert!(!redirect.is_persistable());
        assert!(!fetch.is_persistable());
        assert!(page_value(None).is_persistable());
    }
}
