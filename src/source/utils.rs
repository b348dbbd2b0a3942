//! Shared helpers for adapters: static regexes and selectors, URL joining,
//! JSON decoding with context, text cleanup and date parsing.

use chrono::{NaiveDate, NaiveDateTime};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde::de::DeserializeOwned;
use url::Url;

use crate::error::SourceError;
use crate::transport::{Response, TransportError};

/// Compiles a regex at static init; panics on invalid pattern.
pub fn compile_static_regex(pattern: &str) -> Regex {
    Regex::new(pattern).unwrap_or_else(|e| panic!("invalid static regex '{pattern}': {e}"))
}

/// Parses a CSS selector at static init; panics on invalid selector.
pub fn compile_static_selector(selector: &str) -> Selector {
    Selector::parse(selector).unwrap_or_else(|e| panic!("invalid static selector '{selector}': {e}"))
}

/// Joins `path` onto `base`, mapping failures to `InvalidUrl`.
pub fn join_url(base: &Url, path: &str) -> Result<Url, SourceError> {
    base.join(path)
        .map_err(|e| TransportError::invalid_url(path, e).into())
}

/// Resolves a possibly relative URL string against a base URL.
///
/// Returns the value as-is if it already starts with `http://` or `https://`;
/// normalizes `//...` to `https:...`; otherwise joins with `base_url`.
#[must_use]
pub fn absolutize_url(value: &str, base_url: &Url) -> Option<String> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    if value.starts_with("http://") || value.starts_with("https://") {
        return Some(value.to_string());
    }
    if value.starts_with("//") {
        return Some(format!("https:{value}"));
    }
    base_url.join(value).ok().map(|url| url.to_string())
}

/// Origin-relative form of `href` (path, query and fragment), used as locator.
#[must_use]
pub fn relative_locator(href: &str, base_url: &Url) -> Option<String> {
    let absolute = base_url.join(href.trim()).ok()?;
    let mut locator = absolute.path().to_string();
    if let Some(query) = absolute.query() {
        locator.push('?');
        locator.push_str(query);
    }
    Some(locator)
}

/// Decodes a JSON body, naming `context` in the error.
pub fn decode_json<T: DeserializeOwned>(response: &Response, context: &str) -> Result<T, SourceError> {
    response.json().map_err(|e| SourceError::decode(context, e))
}

/// Text content of an element with whitespace runs collapsed.
#[must_use]
pub fn element_text(element: ElementRef<'_>) -> String {
    collapse_whitespace(&element.text().collect::<String>())
}

/// Text of the first match of `selector` under `scope`, if non-empty.
#[must_use]
pub fn select_text(scope: ElementRef<'_>, selector: &Selector) -> Option<String> {
    scope
        .select(selector)
        .next()
        .map(element_text)
        .filter(|text| !text.is_empty())
}

/// Attribute of the first match of `selector` under `scope`, trimmed and non-empty.
#[must_use]
pub fn select_attr(scope: ElementRef<'_>, selector: &Selector, attr: &str) -> Option<String> {
    scope
        .select(selector)
        .find_map(|el| el.value().attr(attr))
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

/// Plain text of an HTML fragment.
#[must_use]
pub fn html_to_text(fragment: &str) -> String {
    let parsed = Html::parse_fragment(fragment);
    collapse_whitespace(&parsed.root_element().text().collect::<Vec<_>>().join(" "))
}

#[must_use]
pub fn collapse_whitespace(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// First part of a `"Title / Alt title"` display name.
#[must_use]
pub fn primary_title(value: &str) -> String {
    value.split(" / ").next().unwrap_or(value).trim().to_string()
}

/// Epoch millis of a calendar date in `format`, 0 when it does not parse.
#[must_use]
pub fn parse_date_millis(value: &str, format: &str) -> i64 {
    NaiveDate::parse_from_str(value.trim(), format)
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map_or(0, |datetime| datetime.and_utc().timestamp_millis())
}

/// Epoch millis of a date-time in `format`, 0 when it does not parse.
#[must_use]
pub fn parse_datetime_millis(value: &str, format: &str) -> i64 {
    NaiveDateTime::parse_from_str(value.trim(), format)
        .map_or(0, |datetime| datetime.and_utc().timestamp_millis())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("https://mangaalarab.com/").unwrap()
    }

    #[test]
    fn test_absolutize_url_variants() {
        assert_eq!(
            absolutize_url("https://cdn.example/x.jpg", &base()).as_deref(),
            Some("https://cdn.example/x.jpg")
        );
        assert_eq!(
            absolutize_url("//cdn.example/x.jpg", &base()).as_deref(),
            Some("https://cdn.example/x.jpg")
        );
        assert_eq!(
            absolutize_url("/uploads/x.jpg", &base()).as_deref(),
            Some("https://mangaalarab.com/uploads/x.jpg")
        );
        assert_eq!(absolutize_url("  ", &base()), None);
    }

    #[test]
    fn test_relative_locator_strips_origin() {
        assert_eq!(
            relative_locator("https://mangaalarab.com/manga/one-piece?x=1", &base()).as_deref(),
            Some("/manga/one-piece?x=1")
        );
        assert_eq!(relative_locator("/manga/a", &base()).as_deref(), Some("/manga/a"));
    }

    #[test]
    fn test_primary_title() {
        assert_eq!(primary_title("Ван Пис / One Piece"), "Ван Пис");
        assert_eq!(primary_title("Solo"), "Solo");
    }

    #[test]
    fn test_html_to_text() {
        assert_eq!(html_to_text("<p>Hello <b>world</b></p>\n<p>again</p>"), "Hello world again");
    }

    #[test]
    fn test_parse_dates() {
        assert_eq!(parse_date_millis("2021-03-04", "%Y-%m-%d"), 1_614_816_000_000);
        assert_eq!(parse_date_millis("04.03.2021", "%d.%m.%Y"), 1_614_816_000_000);
        assert_eq!(parse_date_millis("yesterday", "%Y-%m-%d"), 0);
        assert_eq!(
            parse_datetime_millis("2021-03-04T10:00:00", "%Y-%m-%dT%H:%M:%S"),
            1_614_852_000_000
        );
    }
}
