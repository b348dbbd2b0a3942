//! Cookie values, `Set-Cookie` parsing and the Netscape cookie-file format.

use std::fmt;
use std::io::{BufRead, Write};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tracing::{debug, instrument, warn};
use url::Url;

/// One stored cookie.
///
/// The value is redacted in Debug output so cookies never end up in logs.
#[derive(Clone, PartialEq, Eq)]
pub struct Cookie {
    pub name: String,
    value: String,
    /// Lowercased domain without a leading dot.
    pub domain: String,
    /// When true the cookie matches only `domain` itself, not its subdomains.
    pub host_only: bool,
    pub path: String,
    pub secure: bool,
    /// `None` for session cookies.
    pub expires: Option<SystemTime>,
}

impl Cookie {
    #[must_use]
    pub fn new(name: impl Into<String>, value: impl Into<String>, domain: &str) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            domain: normalize_domain(domain),
            host_only: false,
            path: "/".to_string(),
            secure: false,
            expires: None,
        }
    }

    /// Cookie value. Sensitive, do not log.
    #[must_use]
    pub fn value(&self) -> &str {
        &self.value
    }

    #[must_use]
    pub fn is_expired(&self, now: SystemTime) -> bool {
        self.expires.is_some_and(|expires| expires <= now)
    }

    /// Whether the cookie is sent to `host`.
    #[must_use]
    pub fn domain_matches(&self, host: &str) -> bool {
        let host = host.to_ascii_lowercase();
        if host == self.domain {
            return true;
        }
        !self.host_only
            && host.len() > self.domain.len()
            && host.ends_with(&self.domain)
            && host.as_bytes()[host.len() - self.domain.len() - 1] == b'.'
    }

    /// Whether the cookie is sent for `request_path`.
    #[must_use]
    pub fn path_matches(&self, request_path: &str) -> bool {
        if request_path == self.path {
            return true;
        }
        request_path.starts_with(&self.path)
            && (self.path.ends_with('/')
                || request_path.as_bytes().get(self.path.len()) == Some(&b'/'))
    }

    /// Same name, domain and path: a later directive replaces the earlier one.
    #[must_use]
    pub fn same_identity(&self, other: &Cookie) -> bool {
        self.name == other.name && self.domain == other.domain && self.path == other.path
    }
}

impl fmt::Debug for Cookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cookie")
            .field("name", &self.name)
            .field("value", &"[REDACTED]")
            .field("domain", &self.domain)
            .field("host_only", &self.host_only)
            .field("path", &self.path)
            .field("secure", &self.secure)
            .field("expires", &self.expires)
            .finish()
    }
}

/// Errors while reading a cookie file.
#[derive(Debug, thiserror::Error)]
pub enum CookieError {
    /// A line has an invalid format.
    #[error("line {line_number}: {reason} (got: {content})")]
    InvalidLine {
        /// 1-based line number.
        line_number: usize,
        /// Offending line with the value redacted.
        content: String,
        reason: String,
    },

    #[error("failed to read cookie file: {0}")]
    Io(#[from] std::io::Error),

    /// A non-empty file contained no valid cookie.
    #[error("no valid cookies found in file ({malformed_count} lines failed to parse)")]
    NoCookiesFound { malformed_count: usize },
}

fn normalize_domain(domain: &str) -> String {
    domain.trim().trim_start_matches('.').to_ascii_lowercase()
}

/// RFC 6265 default path: the request path up to, not including, its last `/`.
fn default_path(url: &Url) -> String {
    let path = url.path();
    match path.rfind('/') {
        Some(0) | None => "/".to_string(),
        Some(idx) => path[..idx].to_string(),
    }
}

/// Parses one `Set-Cookie` header received from `url`.
///
/// Returns `None` for malformed directives or ones whose `Domain` does not
/// cover the responding host. A `Max-Age` of zero or less and an `Expires`
/// in the past both yield a cookie that is already expired, which the store
/// treats as a deletion.
#[must_use]
pub fn parse_set_cookie(header: &str, url: &Url) -> Option<Cookie> {
    let host = url.host_str()?.to_ascii_lowercase();
    let mut parts = header.split(';');
    let (name, value) = parts.next()?.split_once('=')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }

    let mut cookie = Cookie {
        name: name.to_string(),
        value: value.trim().trim_matches('"').to_string(),
        domain: host.clone(),
        host_only: true,
        path: default_path(url),
        secure: false,
        expires: None,
    };
    let mut max_age: Option<i64> = None;

    for attribute in parts {
        let (key, val) = match attribute.split_once('=') {
            Some((k, v)) => (k.trim(), v.trim()),
            None => (attribute.trim(), ""),
        };
        match key.to_ascii_lowercase().as_str() {
            "domain" if !val.is_empty() => {
                cookie.domain = normalize_domain(val);
                cookie.host_only = false;
            }
            "path" if val.starts_with('/') => cookie.path = val.to_string(),
            "secure" => cookie.secure = true,
            "max-age" => max_age = val.parse().ok(),
            "expires" => {
                if let Ok(expires) = httpdate::parse_http_date(val) {
                    cookie.expires = Some(expires);
                }
            }
            _ => {}
        }
    }

    if let Some(seconds) = max_age {
        cookie.expires = Some(if seconds <= 0 {
            UNIX_EPOCH
        } else {
            #[allow(clippy::cast_sign_loss)]
            let delta = Duration::from_secs(seconds as u64);
            // Out-of-range lifetimes are clamped to year 9999.
            SystemTime::now()
                .checked_add(delta)
                .unwrap_or_else(far_future)
        });
    }

    if !cookie.domain_matches(&host) {
        warn!(host = %host, domain = %cookie.domain, name = %cookie.name, "rejecting cookie for foreign domain");
        return None;
    }
    Some(cookie)
}

/// Latest expiry a captured cookie is given: year 9999, which every platform's
/// `SystemTime` can represent.
fn far_future() -> SystemTime {
    UNIX_EPOCH
        .checked_add(Duration::from_secs(253_402_300_799))
        .unwrap_or(UNIX_EPOCH)
}

/// Result of reading a Netscape cookie file.
#[derive(Debug)]
pub struct ParseResult {
    pub cookies: Vec<Cookie>,
    /// Malformed lines as (line number, reason).
    pub warnings: Vec<(usize, String)>,
}

/// Parses a Netscape-format cookie file.
///
/// Each data line has 7 TAB-separated fields: `domain`, `include_subdomains`,
/// `path`, `secure`, `expires`, `name`, `value`. Comments and blank lines are
/// skipped; malformed lines become warnings.
///
/// # Errors
///
/// Returns [`CookieError::Io`] on read failure, or
/// [`CookieError::NoCookiesFound`] when a non-empty file yields zero cookies.
#[instrument(level = "debug", skip(reader))]
pub fn parse_netscape_cookies(reader: impl BufRead) -> Result<ParseResult, CookieError> {
    let mut cookies = Vec::new();
    let mut warnings = Vec::new();
    let mut data_lines = 0;

    for (idx, line) in reader.lines().enumerate() {
        let line_number = idx + 1;
        let line = line?;
        let line = line.trim_end();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        data_lines += 1;

        match parse_cookie_line(line, line_number) {
            Ok(cookie) => {
                debug!(line = line_number, domain = %cookie.domain, name = %cookie.name, "parsed cookie");
                cookies.push(cookie);
            }
            Err(e) => {
                warn!(line = line_number, reason = %e, "skipping malformed cookie line");
                warnings.push((line_number, e.to_string()));
            }
        }
    }

    if cookies.is_empty() && data_lines > 0 {
        return Err(CookieError::NoCookiesFound {
            malformed_count: warnings.len(),
        });
    }
    Ok(ParseResult { cookies, warnings })
}

fn parse_cookie_line(line: &str, line_number: usize) -> Result<Cookie, CookieError> {
    let invalid = |reason: String| CookieError::InvalidLine {
        line_number,
        content: redact_line_for_error(line),
        reason,
    };

    let fields: Vec<&str> = line.split('\t').collect();
    let [domain, include_subdomains, path, secure, expires, name, value] = fields[..] else {
        return Err(invalid(format!(
            "expected 7 TAB-separated fields, found {}",
            fields.len()
        )));
    };

    let include_subdomains = parse_bool_field(include_subdomains, "include_subdomains").map_err(&invalid)?;
    let secure = parse_bool_field(secure, "secure").map_err(&invalid)?;
    let expires: u64 = expires.parse().map_err(|_| {
        invalid(format!(
            "expires field must be a non-negative integer, got '{expires}'"
        ))
    })?;
    let expires = match expires {
        0 => None,
        secs => Some(UNIX_EPOCH.checked_add(Duration::from_secs(secs)).ok_or_else(|| {
            invalid(format!("expires timestamp {secs} is out of range"))
        })?),
    };
    if domain.trim_start_matches('.').is_empty() {
        return Err(invalid("domain field is empty".to_string()));
    }
    if name.is_empty() {
        return Err(invalid("cookie name field is empty".to_string()));
    }

    Ok(Cookie {
        name: name.to_string(),
        value: value.to_string(),
        domain: normalize_domain(domain),
        host_only: !include_subdomains,
        path: if path.is_empty() { "/".to_string() } else { path.to_string() },
        secure,
        expires,
    })
}

fn parse_bool_field(value: &str, field_name: &str) -> Result<bool, String> {
    match value {
        "TRUE" => Ok(true),
        "FALSE" => Ok(false),
        _ => Err(format!("{field_name} field must be TRUE or FALSE, got '{value}'")),
    }
}

fn redact_line_for_error(line: &str) -> String {
    let fields: Vec<&str> = line.split('\t').collect();
    if fields.len() >= 7 {
        let mut redacted = fields[..6].join("\t");
        redacted.push_str("\t[REDACTED]");
        redacted
    } else {
        line.to_string()
    }
}

/// Writes cookies in Netscape format. Session cookies are written with expiry 0.
///
/// # Errors
///
/// Returns the underlying I/O error.
pub fn write_netscape_cookies<'a>(
    mut writer: impl Write,
    cookies: impl IntoIterator<Item = &'a Cookie>,
) -> std::io::Result<()> {
    writeln!(writer, "# Netscape HTTP Cookie File")?;
    for cookie in cookies {
        let domain = if cookie.host_only {
            cookie.domain.clone()
        } else {
            format!(".{}", cookie.domain)
        };
        let expires = cookie
            .expires
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map_or(0, |d| d.as_secs());
        writeln!(
            writer,
            "{domain}\t{}\t{}\t{}\t{expires}\t{}\t{}",
            bool_field(!cookie.host_only),
            cookie.path,
            bool_field(cookie.secure),
            cookie.name,
            cookie.value
        )?;
    }
    writer.flush()
}

fn bool_field(value: bool) -> &'static str {
    if value { "TRUE" } else { "FALSE" }
}
