//! Per-origin cookie persistence across requests.
//!
//! The store is process-local. Hosts that want cookies to survive a restart
//! use [`SessionStore::load_netscape`] / [`SessionStore::save_netscape`].

mod cookies;

use std::io::{BufRead, Write};
use std::time::SystemTime;

use dashmap::DashMap;
use tracing::{debug, instrument};
use url::Url;

use crate::transport::{Headers, Request};

pub use cookies::{
    Cookie, CookieError, ParseResult, parse_netscape_cookies, parse_set_cookie,
    write_netscape_cookies,
};

/// Cookie jars keyed by cookie domain.
#[derive(Debug, Default)]
pub struct SessionStore {
    jars: DashMap<String, Vec<Cookie>>,
}

impl SessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds the cookies that match the request's host, path and scheme as a
    /// `Cookie` header. Expired cookies are dropped on the way.
    pub fn apply(&self, request: &mut Request) {
        let cookies = self.cookies_for(&request.url);
        if cookies.is_empty() {
            return;
        }
        let mut header = cookies
            .iter()
            .map(|c| format!("{}={}", c.name, c.value()))
            .collect::<Vec<_>>()
            .join("; ");
        if let Some(existing) = request.headers.get("Cookie") {
            header = format!("{existing}; {header}");
        }
        debug!(url = %request.url, count = cookies.len(), "applying session cookies");
        request.headers.insert("Cookie", header);
    }

    /// Merges every `Set-Cookie` directive of a response received from `url`.
    ///
    /// Runs without suspension points, so a cancelled operation never leaves
    /// a half-applied response behind.
    #[instrument(level = "debug", skip_all, fields(url = %url))]
    pub fn capture(&self, url: &Url, headers: &Headers) {
        let now = SystemTime::now();
        for directive in headers.get_all("Set-Cookie") {
            let Some(cookie) = parse_set_cookie(directive, url) else {
                continue;
            };
            self.store(cookie, now);
        }
    }

    fn store(&self, cookie: Cookie, now: SystemTime) {
        let mut jar = self.jars.entry(cookie.domain.clone()).or_default();
        jar.retain(|existing| !existing.same_identity(&cookie) && !existing.is_expired(now));
        if cookie.is_expired(now) {
            debug!(domain = %cookie.domain, name = %cookie.name, "cookie deleted");
        } else {
            debug!(domain = %cookie.domain, name = %cookie.name, "cookie stored");
            jar.push(cookie);
        }
    }

    /// Live cookies that would be sent to `url`, most specific path first.
    #[must_use]
    pub fn cookies_for(&self, url: &Url) -> Vec<Cookie> {
        let Some(host) = url.host_str().map(str::to_ascii_lowercase) else {
            return Vec::new();
        };
        let secure_channel = url.scheme() == "https";
        let now = SystemTime::now();

        let mut matched: Vec<Cookie> = candidate_domains(&host)
            .filter_map(|domain| self.jars.get(domain))
            .flat_map(|jar| {
                jar.iter()
                    .filter(|c| {
                        c.domain_matches(&host)
                            && c.path_matches(url.path())
                            && (secure_channel || !c.secure)
                            && !c.is_expired(now)
                    })
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .collect();
        matched.sort_by(|a, b| b.path.len().cmp(&a.path.len()));
        matched
    }

    /// Number of stored cookies, including expired ones not yet pruned.
    #[must_use]
    pub fn len(&self) -> usize {
        self.jars.iter().map(|jar| jar.len()).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every cookie scoped to `domain`.
    pub fn clear_domain(&self, domain: &str) {
        self.jars.remove(&domain.trim_start_matches('.').to_ascii_lowercase());
    }

    pub fn clear(&self) {
        self.jars.clear();
    }

    /// Loads cookies from a Netscape cookie file, returning how many were stored.
    ///
    /// # Errors
    ///
    /// See [`parse_netscape_cookies`].
    pub fn load_netscape(&self, reader: impl BufRead) -> Result<usize, CookieError> {
        let parsed = parse_netscape_cookies(reader)?;
        let now = SystemTime::now();
        let mut loaded = 0;
        for cookie in parsed.cookies {
            if cookie.is_expired(now) {
                continue;
            }
            self.store(cookie, now);
            loaded += 1;
        }
        debug!(loaded, skipped_lines = parsed.warnings.len(), "loaded cookie file");
        Ok(loaded)
    }

    /// Writes every live cookie in Netscape format.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error.
    pub fn save_netscape(&self, writer: impl Write) -> std::io::Result<()> {
        let now = SystemTime::now();
        let mut cookies: Vec<Cookie> = self
            .jars
            .iter()
            .flat_map(|jar| jar.value().clone())
            .filter(|c| !c.is_expired(now))
            .collect();
        cookies.sort_by(|a, b| (&a.domain, &a.path, &a.name).cmp(&(&b.domain, &b.path, &b.name)));
        write_netscape_cookies(writer, &cookies)
    }
}

/// `a.b.example.com` → `a.b.example.com`, `b.example.com`, `example.com`, `com`.
fn candidate_domains(host: &str) -> impl Iterator<Item = &str> {
    std::iter::successors(Some(host), |current| {
        current.split_once('.').map(|(_, parent)| parent)
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    fn set_cookies(values: &[&str]) -> Headers {
        values.iter().map(|v| ("Set-Cookie", *v)).collect()
    }

    fn cookie_header(store: &SessionStore, target: &str) -> Option<String> {
        let mut request = Request::get(url(target));
        store.apply(&mut request);
        request.headers.get("cookie").map(str::to_string)
    }

    #[test]
    fn test_capture_then_apply() {
        let store = SessionStore::new();
        store.capture(&url("https://com-x.life/"), &set_cookies(&["PHPSESSID=abc; Path=/"]));
        assert_eq!(cookie_header(&store, "https://com-x.life/comix/1").as_deref(), Some("PHPSESSID=abc"));
        assert_eq!(cookie_header(&store, "https://desu.me/"), None);
    }

    #[test]
    fn test_later_directive_overrides_earlier() {
        let store = SessionStore::new();
        store.capture(&url("https://desu.me/"), &set_cookies(&["a=1; Path=/", "a=2; Path=/"]));
        assert_eq!(store.len(), 1);
        assert_eq!(cookie_header(&store, "https://desu.me/").as_deref(), Some("a=2"));
    }

    #[test]
    fn test_max_age_zero_deletes() {
        let store = SessionStore::new();
        store.capture(&url("https://desu.me/"), &set_cookies(&["a=1; Path=/"]));
        store.capture(&url("https://desu.me/"), &set_cookies(&["a=gone; Path=/; Max-Age=0"]));
        assert!(store.is_empty());
        assert_eq!(cookie_header(&store, "https://desu.me/"), None);
    }

    #[test]
    fn test_huge_max_age_is_stored_not_overflowed() {
        let store = SessionStore::new();
        store.capture(
            &url("https://com-x.life/"),
            &set_cookies(&["a=1; Path=/; Max-Age=9223372036854775807"]),
        );
        assert_eq!(cookie_header(&store, "https://com-x.life/").as_deref(), Some("a=1"));
    }

    #[test]
    fn test_out_of_range_netscape_expiry_is_skipped() {
        let store = SessionStore::new();
        let loaded = store
            .load_netscape(Cursor::new(
                ".desu.me\tTRUE\t/\tFALSE\t18446744073709551615\ts\tv\n\
                 .desu.me\tTRUE\t/\tFALSE\t0\tok\t1\n",
            ))
            .unwrap();
        assert_eq!(loaded, 1);
        assert_eq!(cookie_header(&store, "https://desu.me/").as_deref(), Some("ok=1"));
    }

    #[test]
    fn test_secure_cookie_not_sent_over_http() {
        let store = SessionStore::new();
        store.capture(&url("https://desu.me/"), &set_cookies(&["s=1; Path=/; Secure"]));
        assert_eq!(cookie_header(&store, "http://desu.me/"), None);
        assert!(cookie_header(&store, "https://desu.me/").is_some());
    }

    #[test]
    fn test_domain_cookie_reaches_subdomain_host_only_does_not() {
        let store = SessionStore::new();
        store.capture(
            &url("https://desu.me/"),
            &set_cookies(&["wide=1; Domain=desu.me; Path=/", "narrow=2; Path=/"]),
        );
        assert_eq!(cookie_header(&store, "https://api.desu.me/").as_deref(), Some("wide=1"));
    }

    #[test]
    fn test_apply_keeps_existing_cookie_header() {
        let store = SessionStore::new();
        store.capture(&url("https://desu.me/"), &set_cookies(&["a=1; Path=/"]));
        let mut request = Request::get(url("https://desu.me/")).with_header("Cookie", "pre=0");
        store.apply(&mut request);
        assert_eq!(request.headers.get("cookie"), Some("pre=0; a=1"));
    }

    #[test]
    fn test_netscape_load_and_save() {
        let store = SessionStore::new();
        let loaded = store
            .load_netscape(Cursor::new(".desu.me\tTRUE\t/\tFALSE\t0\tsession\tabc\n"))
            .unwrap();
        assert_eq!(loaded, 1);
        assert_eq!(cookie_header(&store, "https://desu.me/manga").as_deref(), Some("session=abc"));

        let mut out = Vec::new();
        store.save_netscape(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("# Netscape HTTP Cookie File"));
        assert!(text.contains(".desu.me\tTRUE\t/\tFALSE\t0\tsession\tabc"));
    }

    #[test]
    fn test_candidate_domains_walk_up() {
        let domains: Vec<&str> = candidate_domains("img.com-x.life").collect();
        assert_eq!(domains, vec!["img.com-x.life", "com-x.life", "life"]);
    }
}
