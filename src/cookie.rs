//! Cookie jar interface and the in-memory implementation.
//!
//! Persistence is external: the client only consumes the [`CookieJar`]
//! trait. The in-memory jar covers RFC 6265 domain/path matching,
//! expiry, and secure-cookie gating.

use std::sync::Mutex;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use url::Url;

/// Jar interface consumed by the client.
pub trait CookieJar: Send + Sync {
    /// Store cookies from `Set-Cookie` header values for a URL.
    fn set_cookies(&self, url: &Url, set_cookie_values: &[String]);
    /// Build the `Cookie` header value for a URL, if any cookie matches.
    fn cookie_header(&self, url: &Url) -> Option<String>;
    /// Drop all cookies.
    fn clear(&self);
}

#[derive(Debug, Clone)]
struct StoredCookie {
    name: String,
    value: String,
    domain: String,
    /// Domain attribute absent: exact host match only.
    host_only: bool,
    path: String,
    expires: Option<DateTime<Utc>>,
    secure: bool,
}

impl StoredCookie {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires.map(|t| t <= now).unwrap_or(false)
    }

    fn matches(&self, url: &Url, now: DateTime<Utc>) -> bool {
        if self.is_expired(now) {
            return false;
        }
        if self.secure && url.scheme() != "https" {
            return false;
        }
        let Some(host) = url.host_str() else {
            return false;
        };
        let domain_ok = if self.host_only {
            host.eq_ignore_ascii_case(&self.domain)
        } else {
            domain_matches(host, &self.domain)
        };
        domain_ok && path_matches(url.path(), &self.path)
    }
}

/// In-memory cookie jar.
#[derive(Default)]
pub struct MemoryCookieJar {
    cookies: Mutex<Vec<StoredCookie>>,
}

impl MemoryCookieJar {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.cookies.lock().map(|c| c.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CookieJar for MemoryCookieJar {
    fn set_cookies(&self, url: &Url, set_cookie_values: &[String]) {
        let Some(host) = url.host_str() else { return };
        let now = Utc::now();
        let mut cookies = match self.cookies.lock() {
            Ok(guard) => guard,
            Err(_) => return,
        };
        for value in set_cookie_values {
            let Some(cookie) = parse_set_cookie(value, host, url.path(), now) else {
                continue;
            };
            cookies.retain(|c| {
                !(c.name == cookie.name && c.domain == cookie.domain && c.path == cookie.path)
            });
            if !cookie.is_expired(now) {
                cookies.push(cookie);
            }
        }
    }

    fn cookie_header(&self, url: &Url) -> Option<String> {
        let now = Utc::now();
        let cookies = self.cookies.lock().ok()?;
        let mut matched: Vec<&StoredCookie> =
            cookies.iter().filter(|c| c.matches(url, now)).collect();
        if matched.is_empty() {
            return None;
        }
        // Longer paths first, per RFC 6265 §5.4.
        matched.sort_by(|a, b| b.path.len().cmp(&a.path.len()));
        Some(
            matched
                .iter()
                .map(|c| format!("{}={}", c.name, c.value))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }

    fn clear(&self) {
        if let Ok(mut cookies) = self.cookies.lock() {
            cookies.clear();
        }
    }
}

fn parse_set_cookie(
    value: &str,
    request_host: &str,
    request_path: &str,
    now: DateTime<Utc>,
) -> Option<StoredCookie> {
    let mut parts = value.split(';');
    let (name, val) = parts.next()?.split_once('=')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }

    let mut cookie = StoredCookie {
        name: name.to_string(),
        value: val.trim().trim_matches('"').to_string(),
        domain: request_host.to_ascii_lowercase(),
        host_only: true,
        path: default_path(request_path),
        expires: None,
        secure: false,
    };

    let mut max_age: Option<i64> = None;
    for attr in parts {
        let attr = attr.trim();
        let (key, attr_value) = match attr.split_once('=') {
            Some((k, v)) => (k.trim().to_ascii_lowercase(), v.trim()),
            None => (attr.to_ascii_lowercase(), ""),
        };
        match key.as_str() {
            "domain" => {
                let domain = attr_value.trim_start_matches('.').to_ascii_lowercase();
                if !domain.is_empty() && domain_matches(request_host, &domain) {
                    cookie.domain = domain;
                    cookie.host_only = false;
                }
            }
            "path" => {
                if attr_value.starts_with('/') {
                    cookie.path = attr_value.to_string();
                }
            }
            "expires" => {
                if let Ok(t) = DateTime::parse_from_rfc2822(attr_value) {
                    cookie.expires = Some(t.with_timezone(&Utc));
                }
            }
            "max-age" => {
                if let Ok(seconds) = attr_value.parse::<i64>() {
                    max_age = Some(seconds);
                }
            }
            "secure" => cookie.secure = true,
            _ => {}
        }
    }
    // Max-Age wins over Expires (RFC 6265 §4.1.2.2).
    if let Some(seconds) = max_age {
        cookie.expires = Some(now + ChronoDuration::seconds(seconds.max(0)));
    }
    Some(cookie)
}

fn default_path(request_path: &str) -> String {
    match request_path.rfind('/') {
        Some(0) | None => "/".to_string(),
        Some(i) => request_path[..i].to_string(),
    }
}

fn domain_matches(host: &str, domain: &str) -> bool {
    let host = host.to_ascii_lowercase();
    host == domain || host.ends_with(&format!(".{domain}"))
}

fn path_matches(request_path: &str, cookie_path: &str) -> bool {
    if request_path == cookie_path {
        return true;
    }
    request_path.starts_with(cookie_path)
        && (cookie_path.ends_with('/')
            || request_path.as_bytes().get(cookie_path.len()) == Some(&b'/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn stores_and_returns_cookie() {
        let jar = MemoryCookieJar::new();
        let u = url("https://example.com/a");
        jar.set_cookies(&u, &["session=abc123".to_string()]);
        assert_eq!(jar.cookie_header(&u), Some("session=abc123".to_string()));
    }

    #[test]
    fn host_only_cookie_does_not_leak_to_subdomain() {
        let jar = MemoryCookieJar::new();
        jar.set_cookies(&url("https://example.com/"), &["a=1".to_string()]);
        assert!(jar.cookie_header(&url("https://sub.example.com/")).is_none());
    }

    #[test]
    fn domain_cookie_covers_subdomains() {
        let jar = MemoryCookieJar::new();
        jar.set_cookies(
            &url("https://example.com/"),
            &["a=1; Domain=example.com".to_string()],
        );
        assert!(jar.cookie_header(&url("https://sub.example.com/")).is_some());
    }

    #[test]
    fn secure_cookie_requires_https() {
        let jar = MemoryCookieJar::new();
        jar.set_cookies(&url("https://example.com/"), &["a=1; Secure".to_string()]);
        assert!(jar.cookie_header(&url("http://example.com/")).is_none());
        assert!(jar.cookie_header(&url("https://example.com/")).is_some());
    }

    #[test]
    fn max_age_zero_deletes() {
        let jar = MemoryCookieJar::new();
        let u = url("https://example.com/");
        jar.set_cookies(&u, &["a=1".to_string()]);
        jar.set_cookies(&u, &["a=1; Max-Age=0".to_string()]);
        assert!(jar.cookie_header(&u).is_none());
    }

    #[test]
    fn path_scoping() {
        let jar = MemoryCookieJar::new();
        jar.set_cookies(
            &url("https://example.com/app/login"),
            &["a=1; Path=/app".to_string()],
        );
        assert!(jar.cookie_header(&url("https://example.com/app/x")).is_some());
        assert!(jar.cookie_header(&url("https://example.com/other")).is_none());
    }
}
