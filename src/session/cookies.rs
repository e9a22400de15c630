//! In-memory cookie jar with domain/path scoping.
//!
//! The store is the only owner of cookie state. Capability code reads it
//! through [`CookieStore::export_header_string`] and
//! [`CookieStore::export_app_state`]; writes go through the import
//! operations or through [`CookieStore::apply_set_cookie_headers`], which the
//! HTTP client calls once per response hop. Each public mutation takes the
//! write lock exactly once, so two racing round trips never interleave their
//! updates.

use chrono::{DateTime, Duration as ChronoDuration, NaiveDateTime, TimeZone, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::CookieError;

/// Domain every session cookie is scoped to.
pub const DEFAULT_COOKIE_DOMAIN: &str = ".facebook.com";

/// Origin whose cookies make up the exported header.
pub const ORIGIN_URL: &str = "https://www.facebook.com/";

/// Host variants a bare `name=value` pair is applied to, so scraping across
/// desktop and mobile hosts sees the same session.
const PAIR_IMPORT_URLS: [&str; 6] = [
    "https://www.facebook.com/",
    "https://facebook.com/",
    "https://m.facebook.com/",
    "http://www.facebook.com/",
    "http://facebook.com/",
    "http://m.facebook.com/",
];

const ONE_YEAR_DAYS: i64 = 365;

/// `expirationDate` values from here up are epoch milliseconds (1e11 s is
/// far past any real expiry, 1e11 ms is early 1973).
pub const MILLIS_THRESHOLD: f64 = 1e11;

/// `SameSite` attribute values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SameSite {
    Strict,
    Lax,
    None,
}

impl SameSite {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "strict" => Some(Self::Strict),
            "lax" => Some(Self::Lax),
            "none" | "no_restriction" => Some(Self::None),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Strict => "Strict",
            Self::Lax => "Lax",
            Self::None => "None",
        }
    }
}

/// A stored cookie.
///
/// `domain` is kept lower-case without a leading dot; `host_only` says
/// whether it matches that exact host or the host and its subdomains.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    pub path: String,
    pub expires: Option<DateTime<Utc>>,
    pub secure: bool,
    pub http_only: bool,
    pub host_only: bool,
    pub same_site: Option<SameSite>,
    pub created_at: DateTime<Utc>,
}

impl Cookie {
    /// Domain as written in a `Domain=` attribute (leading dot for
    /// domain cookies).
    pub fn domain_attribute(&self) -> String {
        if self.host_only {
            self.domain.clone()
        } else {
            format!(".{}", self.domain)
        }
    }

    pub fn pair(&self) -> String {
        format!("{}={}", self.name, self.value)
    }

    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires.is_some_and(|at| at <= now)
    }

    fn matches(&self, url: &Url) -> bool {
        let Some(host) = url.host_str() else {
            return false;
        };
        let host = host.to_ascii_lowercase();
        let domain_ok = if self.host_only {
            host == self.domain
        } else {
            domain_matches(&host, &self.domain)
        };
        if !domain_ok || !path_matches(url.path(), &self.path) {
            return false;
        }
        !(self.secure && url.scheme() != "https")
    }

    fn same_key(&self, other: &Cookie) -> bool {
        self.name == other.name && self.domain == other.domain && self.path == other.path
    }
}

/// Cookie attributes as parsed from a `Set-Cookie` header or built by an
/// importer, before they are bound to a request URL.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct CookieSpec {
    pub name: String,
    pub value: String,
    pub domain: Option<String>,
    pub path: Option<String>,
    pub expires: Option<DateTime<Utc>>,
    pub secure: bool,
    pub http_only: bool,
    pub same_site: Option<SameSite>,
}

/// Expiry as found in portable app-state exports: epoch millis or a date
/// string (`"Infinity"` for session-less persistence).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CookieExpiry {
    Millis(f64),
    Text(String),
}

/// One entry of the portable app-state backup format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppStateCookie {
    #[serde(alias = "name")]
    pub key: String,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub host_only: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_accessed: Option<String>,
    #[serde(default)]
    pub secure: bool,
    #[serde(default)]
    pub http_only: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires: Option<CookieExpiry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiration_date: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub same_site: Option<String>,
}

impl AppStateCookie {
    /// Resolve the expiry. Browser exports write `expirationDate` in
    /// seconds, some tools in milliseconds; anything at or above
    /// [`MILLIS_THRESHOLD`] is read as milliseconds.
    pub fn resolve_expiry(&self) -> Option<DateTime<Utc>> {
        if let Some(raw) = self.expiration_date {
            let millis = if raw >= MILLIS_THRESHOLD {
                raw
            } else {
                raw * 1000.0
            };
            return Utc.timestamp_millis_opt(millis as i64).single();
        }
        match &self.expires {
            Some(CookieExpiry::Millis(ms)) => Utc.timestamp_millis_opt(*ms as i64).single(),
            Some(CookieExpiry::Text(text)) if text != "Infinity" => parse_cookie_date(text),
            _ => None,
        }
    }

    fn to_spec(&self) -> Option<CookieSpec> {
        let value = self.value.clone()?;
        if self.key.trim().is_empty() {
            return None;
        }
        Some(CookieSpec {
            name: self.key.trim().to_string(),
            value,
            domain: Some(
                self.domain
                    .clone()
                    .unwrap_or_else(|| DEFAULT_COOKIE_DOMAIN.to_string()),
            ),
            path: Some(self.path.clone().unwrap_or_else(|| "/".to_string())),
            expires: self.resolve_expiry(),
            secure: self.secure,
            http_only: self.http_only,
            same_site: self.same_site.as_deref().and_then(SameSite::parse),
        })
    }
}

/// Parse an app-state JSON array, skipping entries that do not deserialize.
pub fn parse_app_state(raw: &str) -> Result<Vec<AppStateCookie>, CookieError> {
    let values: Vec<serde_json::Value> = serde_json::from_str(raw)
        .map_err(|e| CookieError::Malformed(format!("app state is not a JSON array: {e}")))?;
    Ok(values
        .into_iter()
        .filter_map(|value| match serde_json::from_value::<AppStateCookie>(value) {
            Ok(entry) => Some(entry),
            Err(e) => {
                tracing::debug!("Skipping malformed app-state entry: {}", e);
                None
            }
        })
        .collect())
}

/// Normalize a raw cookie header into `name=value` pairs.
///
/// Tolerates a leading `Cookie:` prefix, folds newlines, trims surrounding
/// double quotes from values and drops pairs without a name.
pub fn normalize_cookie_header(raw: &str) -> Vec<String> {
    let mut text = raw.trim();
    if text
        .get(..7)
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case("cookie:"))
        && let Some(rest) = text.get(7..)
    {
        text = rest.trim_start();
    }
    let folded = text.replace("\r\n", " ").replace('\n', " ");

    folded
        .split(';')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .filter_map(|part| {
            let (name, value) = part.split_once('=')?;
            let name = name.trim();
            if name.is_empty() {
                return None;
            }
            let value = value.trim();
            let value = value
                .strip_prefix('"')
                .and_then(|v| v.strip_suffix('"'))
                .unwrap_or(value);
            Some(format!("{name}={value}"))
        })
        .collect()
}

/// Parse a single `Set-Cookie` header value.
pub(crate) fn parse_set_cookie(header: &str, now: DateTime<Utc>) -> Result<CookieSpec, CookieError> {
    let mut parts = header.split(';');
    let first = parts.next().unwrap_or_default();
    let (name, value) = first
        .split_once('=')
        .ok_or_else(|| CookieError::Malformed(format!("missing '=' in {first:?}")))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(CookieError::Malformed("empty cookie name".to_string()));
    }

    let mut spec = CookieSpec {
        name: name.to_string(),
        value: value.trim().to_string(),
        ..CookieSpec::default()
    };
    let mut max_age: Option<i64> = None;

    for attr in parts {
        let (key, val) = match attr.split_once('=') {
            Some((k, v)) => (k.trim(), v.trim()),
            None => (attr.trim(), ""),
        };
        match key.to_ascii_lowercase().as_str() {
            "expires" => spec.expires = parse_cookie_date(val),
            "max-age" => max_age = val.parse().ok(),
            "domain" if !val.is_empty() => spec.domain = Some(val.to_string()),
            "path" if val.starts_with('/') => spec.path = Some(val.to_string()),
            "secure" => spec.secure = true,
            "httponly" => spec.http_only = true,
            "samesite" => spec.same_site = SameSite::parse(val),
            _ => {}
        }
    }

    if let Some(seconds) = max_age {
        spec.expires = Some(if seconds <= 0 {
            DateTime::UNIX_EPOCH
        } else {
            now + ChronoDuration::seconds(seconds)
        });
    }

    Ok(spec)
}

/// Parse the date formats seen in `Expires` attributes and app-state dumps.
pub(crate) fn parse_cookie_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc2822(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%a, %d-%b-%Y %H:%M:%S GMT", "%a, %d %b %Y %H:%M:%S GMT"] {
        if let Ok(ndt) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(ndt.and_utc());
        }
    }
    None
}

fn domain_matches(host: &str, domain: &str) -> bool {
    host == domain
        || (host.len() > domain.len()
            && host.ends_with(domain)
            && host.as_bytes()[host.len() - domain.len() - 1] == b'.')
}

fn path_matches(request_path: &str, cookie_path: &str) -> bool {
    if request_path == cookie_path {
        return true;
    }
    request_path.starts_with(cookie_path)
        && (cookie_path.ends_with('/')
            || request_path.as_bytes().get(cookie_path.len()) == Some(&b'/'))
}

fn default_path(url: &Url) -> String {
    let path = url.path();
    match path.rfind('/') {
        Some(0) | None => "/".to_string(),
        Some(idx) => path[..idx].to_string(),
    }
}

/// Thread-safe cookie jar.
#[derive(Debug, Default)]
pub struct CookieStore {
    cookies: RwLock<Vec<Cookie>>,
}

impl CookieStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store one cookie as if it had been set by a response from `url`.
    #[cfg(test)]
    pub(crate) fn set(&self, spec: CookieSpec, url: &str) -> Result<(), CookieError> {
        let url = Url::parse(url).map_err(|e| CookieError::InvalidUrl(e.to_string()))?;
        let now = Utc::now();
        let mut cookies = self.cookies.write();
        store_locked(&mut cookies, spec, &url, now)
    }

    /// Import bare `name=value` pairs scoped to `domain`, applied to every
    /// conventional host variant. Per-pair failures are swallowed.
    ///
    /// Returns the number of pairs that were stored for at least one host.
    pub fn import_pairs<S: AsRef<str>>(&self, pairs: &[S], domain: &str) -> usize {
        let now = Utc::now();
        let expires = now + ChronoDuration::days(ONE_YEAR_DAYS);
        let urls: Vec<Url> = PAIR_IMPORT_URLS
            .iter()
            .filter_map(|u| Url::parse(u).ok())
            .collect();

        let mut cookies = self.cookies.write();
        let mut imported = 0;
        for pair in pairs {
            let Some((name, value)) = pair.as_ref().split_once('=') else {
                tracing::trace!("Skipping cookie pair without '='");
                continue;
            };
            let name = name.trim();
            if name.is_empty() {
                continue;
            }
            let mut stored = false;
            for url in &urls {
                let spec = CookieSpec {
                    name: name.to_string(),
                    value: value.trim().to_string(),
                    domain: Some(domain.to_string()),
                    path: Some("/".to_string()),
                    expires: Some(expires),
                    ..CookieSpec::default()
                };
                match store_locked(&mut cookies, spec, url, now) {
                    Ok(()) => stored = true,
                    Err(e) => tracing::trace!("Ignoring cookie import noise: {}", e),
                }
            }
            if stored {
                imported += 1;
            }
        }
        imported
    }

    /// Import a raw cookie header string into [`DEFAULT_COOKIE_DOMAIN`].
    pub fn import_header_string(&self, raw: &str) -> usize {
        let pairs = normalize_cookie_header(raw);
        self.import_pairs(&pairs, DEFAULT_COOKIE_DOMAIN)
    }

    /// Import structured app-state entries with their own domain/path
    /// and attributes, for both the bare and `www.` host of each domain.
    pub fn import_app_state(&self, entries: &[AppStateCookie]) -> usize {
        let now = Utc::now();
        let mut cookies = self.cookies.write();
        let mut imported = 0;
        for entry in entries {
            let Some(spec) = entry.to_spec() else {
                continue;
            };
            let bare = spec
                .domain
                .as_deref()
                .unwrap_or(DEFAULT_COOKIE_DOMAIN)
                .trim_start_matches('.')
                .to_ascii_lowercase();
            let path = spec.path.clone().unwrap_or_else(|| "/".to_string());

            let mut stored = false;
            for scheme in ["http", "https"] {
                for host in [bare.clone(), format!("www.{bare}")] {
                    let Ok(url) = Url::parse(&format!("{scheme}://{host}{path}")) else {
                        continue;
                    };
                    match store_locked(&mut cookies, spec.clone(), &url, now) {
                        Ok(()) => stored = true,
                        Err(e) => tracing::trace!("Ignoring app-state import noise: {}", e),
                    }
                }
            }
            if stored {
                imported += 1;
            }
        }
        imported
    }

    /// Apply every `Set-Cookie` header of one response in a single update.
    pub fn apply_set_cookie_headers<S: AsRef<str>>(&self, url: &str, headers: &[S]) -> usize {
        let Ok(url) = Url::parse(url) else {
            return 0;
        };
        let now = Utc::now();
        let mut cookies = self.cookies.write();
        let mut applied = 0;
        for header in headers {
            match parse_set_cookie(header.as_ref(), now)
                .and_then(|spec| store_locked(&mut cookies, spec, &url, now))
            {
                Ok(()) => applied += 1,
                Err(e) => tracing::debug!("Ignoring Set-Cookie from {}: {}", url, e),
            }
        }
        applied
    }

    /// Live cookies that would be sent to `url`, in insertion order.
    pub fn cookies_for_url(&self, url: &str) -> Vec<Cookie> {
        let Ok(url) = Url::parse(url) else {
            return Vec::new();
        };
        let now = Utc::now();
        self.cookies
            .read()
            .iter()
            .filter(|c| !c.is_expired(now) && c.matches(&url))
            .cloned()
            .collect()
    }

    /// `Cookie` request header for `url`, if any cookie applies.
    pub fn header_for_url(&self, url: &str) -> Option<String> {
        let header = join_unique_by_name(&self.cookies_for_url(url));
        (!header.is_empty()).then_some(header)
    }

    /// Session cookies for the origin as `name=value; name=value`.
    /// First occurrence of a name wins.
    pub fn export_header_string(&self) -> String {
        join_unique_by_name(&self.cookies_for_url(ORIGIN_URL))
    }

    /// Every live cookie with all attributes, one entry per
    /// `(name, domain, path)`.
    pub fn export_app_state(&self) -> Vec<AppStateCookie> {
        let now = Utc::now();
        self.cookies
            .read()
            .iter()
            .filter(|c| !c.is_expired(now))
            .map(|c| AppStateCookie {
                key: c.name.clone(),
                value: Some(c.value.clone()),
                domain: Some(c.domain_attribute()),
                path: Some(c.path.clone()),
                host_only: c.host_only,
                creation: Some(c.created_at.to_rfc3339()),
                last_accessed: Some(now.to_rfc3339()),
                secure: c.secure,
                http_only: c.http_only,
                expires: Some(CookieExpiry::Text(
                    c.expires
                        .map(|at| at.to_rfc2822())
                        .unwrap_or_else(|| "Infinity".to_string()),
                )),
                expiration_date: None,
                same_site: c.same_site.map(|s| s.as_str().to_string()),
            })
            .collect()
    }

    /// All live cookies.
    pub fn snapshot(&self) -> Vec<Cookie> {
        let now = Utc::now();
        self.cookies
            .read()
            .iter()
            .filter(|c| !c.is_expired(now))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.cookies.write().clear();
    }
}

fn store_locked(
    cookies: &mut Vec<Cookie>,
    spec: CookieSpec,
    url: &Url,
    now: DateTime<Utc>,
) -> Result<(), CookieError> {
    let host = url
        .host_str()
        .ok_or_else(|| CookieError::InvalidUrl(url.to_string()))?
        .to_ascii_lowercase();

    let (domain, host_only) = match spec.domain.as_deref() {
        Some(raw) => {
            let domain = raw.trim().trim_start_matches('.').to_ascii_lowercase();
            if domain.is_empty() || !domain_matches(&host, &domain) {
                return Err(CookieError::DomainMismatch {
                    name: spec.name,
                    domain: raw.to_string(),
                    host,
                });
            }
            (domain, false)
        }
        None => (host, true),
    };

    let cookie = Cookie {
        name: spec.name,
        value: spec.value,
        domain,
        path: spec.path.unwrap_or_else(|| default_path(url)),
        expires: spec.expires,
        secure: spec.secure,
        http_only: spec.http_only,
        host_only,
        same_site: spec.same_site,
        created_at: now,
    };

    cookies.retain(|c| !c.is_expired(now));
    let existing = cookies.iter().position(|c| c.same_key(&cookie));
    if cookie.is_expired(now) {
        if let Some(idx) = existing {
            cookies.remove(idx);
        }
        return Ok(());
    }
    match existing {
        Some(idx) => {
            let created_at = cookies[idx].created_at;
            cookies[idx] = Cookie {
                created_at,
                ..cookie
            };
        }
        None => cookies.push(cookie),
    }
    Ok(())
}

fn join_unique_by_name(cookies: &[Cookie]) -> String {
    let mut seen = std::collections::HashSet::new();
    cookies
        .iter()
        .filter(|c| seen.insert(c.name.as_str()))
        .map(Cookie::pair)
        .collect::<Vec<_>>()
        .join("; ")
}
