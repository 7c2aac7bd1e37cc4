//! Variant-key derivation from request variance dimensions.
//!
//! A request's configured cookie values, configured query values, and device
//! class are folded into a deterministic variant key. Dimensions that are
//! not configured never influence the key, which keeps the key space bounded
//! by configuration rather than by request shape.

use std::borrow::Cow;
use std::collections::HashMap;

use percent_encoding::percent_decode_str;
use tracing::warn;

use crate::config::CacheConfig;

/// Raw request inputs the variant key is derived from.
///
/// The host runtime hands these over verbatim; parsing happens here.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    /// Raw `Cookie` request header.
    pub cookie_header: Option<String>,
    /// Raw query string (`a=1&b=2` form).
    pub query_string: Option<String>,
    /// Raw `User-Agent` request header.
    pub user_agent: Option<String>,
}

impl RequestContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cookie_header(mut self, header: impl Into<String>) -> Self {
        self.cookie_header = Some(header.into());
        self
    }

    pub fn with_query_string(mut self, query: impl Into<String>) -> Self {
        self.query_string = Some(query.into());
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }
}

/// Device class derived from the user-agent string.
///
/// Only `Mobile`, `Tablet`, and `SmartTv` contribute a key token; desktop
/// and unrecognized agents map to the empty class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceClass {
    Desktop,
    Mobile,
    Tablet,
    SmartTv,
    Unknown,
}

impl DeviceClass {
    /// Classify a user-agent string.
    pub fn from_user_agent(user_agent: &str) -> Self {
        let ua = user_agent.to_ascii_lowercase();
        if ua.is_empty() {
            return DeviceClass::Unknown;
        }
        if ["smart-tv", "smarttv", "googletv", "appletv", "hbbtv"]
            .iter()
            .any(|needle| ua.contains(needle))
        {
            return DeviceClass::SmartTv;
        }
        // Android tablets send "Android" without the "Mobile" token.
        if ua.contains("ipad")
            || ua.contains("tablet")
            || (ua.contains("android") && !ua.contains("mobile"))
        {
            return DeviceClass::Tablet;
        }
        if ua.contains("mobi") || ua.contains("iphone") || ua.contains("ipod") {
            return DeviceClass::Mobile;
        }
        DeviceClass::Desktop
    }

    /// Key token for this class, if it contributes one.
    pub fn token(&self) -> Option<&'static str> {
        match self {
            DeviceClass::Mobile => Some("mobile"),
            DeviceClass::Tablet => Some("tablet"),
            DeviceClass::SmartTv => Some("smarttv"),
            DeviceClass::Desktop | DeviceClass::Unknown => None,
        }
    }
}

/// Derived cache key: the normalized page identity plus the full variant key.
///
/// The variant key is the composite `page-device-cookie(...)-query(...)`
/// string with absent dimensions contributing nothing, so for a request with
/// no configured dimensions present it equals the page key itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheKey {
    page_key: String,
    variant: String,
}

impl CacheKey {
    /// Derive the key for `page_key` under `config` from the request inputs.
    pub fn derive(page_key: &str, config: &CacheConfig, ctx: &RequestContext) -> Self {
        let page_key = normalize_page_key(page_key);

        let device = if config.enable_device_split {
            DeviceClass::from_user_agent(ctx.user_agent.as_deref().unwrap_or_default()).token()
        } else {
            None
        };

        let cookies = parse_cookie_header(ctx.cookie_header.as_deref().unwrap_or_default());
        let cookie_clause = build_clause(&config.cache_cookies, &cookies, "cookie");

        let queries = ctx
            .query_string
            .as_deref()
            .map(parse_query_string)
            .unwrap_or_default();
        let query_clause = build_clause(&config.cache_queries, &queries, "query");

        let variant = [
            Some(page_key.as_str()),
            device,
            cookie_clause.as_deref(),
            query_clause.as_deref(),
        ]
        .into_iter()
        .flatten()
        .collect::<Vec<_>>()
        .join("-");

        Self { page_key, variant }
    }

    /// The normalized logical page identity.
    pub fn page_key(&self) -> &str {
        &self.page_key
    }

    /// The full variant key this entry is stored under.
    pub fn variant(&self) -> &str {
        &self.variant
    }
}

/// Strip the leading slash; an empty path is the index page.
pub(crate) fn normalize_page_key(page_key: &str) -> String {
    let trimmed = page_key.strip_prefix('/').unwrap_or(page_key);
    if trimmed.is_empty() {
        "index".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Build a `prefix(name=value-name=value)` clause from the configured names
/// that are present in `values`. Returns `None` when nothing contributes.
fn build_clause(
    names: &[String],
    values: &HashMap<String, String>,
    prefix: &str,
) -> Option<String> {
    if names.is_empty() {
        return None;
    }

    let parts: Vec<String> = names
        .iter()
        .filter_map(|name| values.get(name).map(|value| format!("{name}={value}")))
        .collect();

    if parts.is_empty() {
        None
    } else {
        Some(format!("{prefix}({})", parts.join("-")))
    }
}

fn parse_cookie_header(header: &str) -> HashMap<String, String> {
    header
        .split(';')
        .filter_map(|pair| {
            let (name, value) = pair.split_once('=')?;
            let name = name.trim();
            if name.is_empty() {
                None
            } else {
                Some((name.to_string(), value.trim().to_string()))
            }
        })
        .collect()
}

/// Parse an `application/x-www-form-urlencoded` query string.
///
/// A pair that fails strict percent-decoding poisons the whole query: the
/// deriver logs a warning and proceeds as if no query dimensions were
/// present, so a malformed query can never abort key derivation.
fn parse_query_string(query: &str) -> HashMap<String, String> {
    let mut values = HashMap::new();
    for pair in query.split('&').filter(|pair| !pair.is_empty()) {
        let (name, value) = pair.split_once('=').unwrap_or((pair, ""));
        match (decode_component(name), decode_component(value)) {
            (Some(name), Some(value)) => {
                values.insert(name, value);
            }
            _ => {
                warn!("could not parse request query, skipping query dimensions");
                return HashMap::new();
            }
        }
    }
    values
}

fn decode_component(component: &str) -> Option<String> {
    let component = component.replace('+', " ");
    percent_decode_str(&component)
        .decode_utf8()
        .ok()
        .map(Cow::into_owned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;

    #[test]
    fn test_cookie_variant_key() {
        let config = CacheConfig::new().with_cookies(["abtest"]);
        let ctx = RequestContext::new().with_cookie_header("abtest=1");

        let key = CacheKey::derive("index", &config, &ctx);
        assert_eq!(key.page_key(), "index");
        assert_eq!(key.variant(), "index-cookie(abtest=1)");
    }

    #[test]
    fn test_absent_cookie_contributes_nothing() {
        let config = CacheConfig::new().with_cookies(["abtest"]);
        let ctx = RequestContext::new();

        let key = CacheKey::derive("index", &config, &ctx);
        assert_eq!(key.variant(), "index");
    }

    #[test]
    fn test_configuration_order_does_not_affect_key() {
        let ctx = RequestContext::new().with_cookie_header("b=2; a=1");

        let forward = CacheConfig::new().with_cookies(["a", "b"]);
        let reverse = CacheConfig::new().with_cookies(["b", "a"]);

        let lhs = CacheKey::derive("index", &forward, &ctx);
        let rhs = CacheKey::derive("index", &reverse, &ctx);
        assert_eq!(lhs, rhs);
        assert_eq!(lhs.variant(), "index-cookie(a=1-b=2)");
    }

    #[test]
    fn test_unconfigured_dimensions_are_ignored() {
        let config = CacheConfig::new().with_cookies(["abtest"]);
        let with_noise = RequestContext::new().with_cookie_header("abtest=1; session=xyz");
        let without_noise = RequestContext::new().with_cookie_header("abtest=1");

        assert_eq!(
            CacheKey::derive("index", &config, &with_noise),
            CacheKey::derive("index", &config, &without_noise)
        );
    }

    #[test]
    fn test_query_variant_key() {
        let config = CacheConfig::new().with_queries(["page", "sort"]);
        let ctx = RequestContext::new().with_query_string("sort=asc&page=2&unrelated=x");

        let key = CacheKey::derive("catalog", &config, &ctx);
        assert_eq!(key.variant(), "catalog-query(page=2-sort=asc)");
    }

    #[test]
    fn test_malformed_query_degrades_to_no_query_dimensions() {
        let config = CacheConfig::new().with_queries(["page"]);
        let ctx = RequestContext::new().with_query_string("page=%FF");

        let key = CacheKey::derive("catalog", &config, &ctx);
        assert_eq!(key.variant(), "catalog");
    }

    #[test]
    fn test_cookie_and_query_combined() {
        let config = CacheConfig::new()
            .with_cookies(["abtest"])
            .with_queries(["page"]);
        let ctx = RequestContext::new()
            .with_cookie_header("abtest=1")
            .with_query_string("page=2");

        let key = CacheKey::derive("catalog", &config, &ctx);
        assert_eq!(key.variant(), "catalog-cookie(abtest=1)-query(page=2)");
    }

    #[test]
    fn test_device_split() {
        let config = CacheConfig::new().with_device_split();
        let mobile = RequestContext::new().with_user_agent(
            "Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X) Mobile/15E148",
        );
        let desktop = RequestContext::new()
            .with_user_agent("Mozilla/5.0 (X11; Linux x86_64) Firefox/128.0");

        assert_eq!(
            CacheKey::derive("index", &config, &mobile).variant(),
            "index-mobile"
        );
        assert_eq!(
            CacheKey::derive("index", &config, &desktop).variant(),
            "index"
        );
    }

    #[test]
    fn test_device_split_disabled_ignores_user_agent() {
        let config = CacheConfig::new();
        let ctx = RequestContext::new().with_user_agent("Mozilla/5.0 (iPhone) Mobile");

        assert_eq!(CacheKey::derive("index", &config, &ctx).variant(), "index");
    }

    #[test]
    fn test_device_classification() {
        assert_eq!(
            DeviceClass::from_user_agent("Mozilla/5.0 (iPad; CPU OS 16_0) Safari"),
            DeviceClass::Tablet
        );
        assert_eq!(
            DeviceClass::from_user_agent("Mozilla/5.0 (Linux; Android 14) Mobile Chrome"),
            DeviceClass::Mobile
        );
        assert_eq!(
            DeviceClass::from_user_agent("Mozilla/5.0 (Linux; Android 14) Chrome"),
            DeviceClass::Tablet
        );
        assert_eq!(
            DeviceClass::from_user_agent("Mozilla/5.0 (SMART-TV; Linux; Tizen) TV Safari"),
            DeviceClass::SmartTv
        );
        assert_eq!(
            DeviceClass::from_user_agent("Mozilla/5.0 (Windows NT 10.0) Chrome"),
            DeviceClass::Desktop
        );
        assert_eq!(DeviceClass::from_user_agent(""), DeviceClass::Unknown);
    }

    #[test]
    fn test_normalize_page_key() {
        assert_eq!(normalize_page_key("/blog/post"), "blog/post");
        assert_eq!(normalize_page_key("blog/post"), "blog/post");
        assert_eq!(normalize_page_key("/"), "index");
        assert_eq!(normalize_page_key(""), "index");
    }
}
