//! Outbound request execution.
//!
//! The [`Transport`] trait is the only capability the protocol runtime needs
//! from the network. [`ReqwestTransport`] is the production implementation;
//! tests substitute scripted transports.

mod error;
mod http_client;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use url::Url;

pub use error::TransportError;
pub use http_client::{HttpTimeouts, ReqwestTransport};

/// HTTP method subset used by sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

impl Method {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
        }
    }
}

/// Ordered header list with case-insensitive lookup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers(Vec<(String, String)>);

impl Headers {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// First value for `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// All values for `name` in arrival order (`Set-Cookie` repeats).
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.0
            .iter()
            .filter(move |(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Replaces every value for `name`.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.0.retain(|(k, _)| !k.eq_ignore_ascii_case(&name));
        self.0.push((name, value.into()));
    }

    /// Adds a value, keeping existing ones.
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.push((name.into(), value.into()));
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// An outbound request built by a source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: Method,
    pub url: Url,
    pub headers: Headers,
    pub body: Option<Vec<u8>>,
}

impl Request {
    /// A GET request.
    #[must_use]
    pub fn get(url: Url) -> Self {
        Self {
            method: Method::Get,
            url,
            headers: Headers::new(),
            body: None,
        }
    }

    /// A POST request with an `application/x-www-form-urlencoded` body.
    #[must_use]
    pub fn post_form<K, V>(url: Url, fields: &[(K, V)]) -> Self
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let body = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(fields.iter().map(|(k, v)| (k.as_ref(), v.as_ref())))
            .finish();
        let mut headers = Headers::new();
        headers.insert("Content-Type", "application/x-www-form-urlencoded");
        Self {
            method: Method::Post,
            url,
            headers,
            body: Some(body.into_bytes()),
        }
    }

    /// Parses `url` into a GET request.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::InvalidUrl`] when `url` is not absolute.
    pub fn get_str(url: &str) -> Result<Self, TransportError> {
        Url::parse(url)
            .map(Self::get)
            .map_err(|e| TransportError::invalid_url(url, e))
    }

    /// Appends query parameters.
    #[must_use]
    pub fn with_query<K, V>(mut self, params: &[(K, V)]) -> Self
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        if !params.is_empty() {
            self.url
                .query_pairs_mut()
                .extend_pairs(params.iter().map(|(k, v)| (k.as_ref(), v.as_ref())));
        }
        self
    }

    /// Sets a header, replacing existing values.
    #[must_use]
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Parsed form body of a POST request, for assertions and logging.
    #[must_use]
    pub fn form_fields(&self) -> Vec<(String, String)> {
        self.body
            .as_deref()
            .map(|body| {
                url::form_urlencoded::parse(body)
                    .map(|(k, v)| (k.into_owned(), v.into_owned()))
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// A response as seen by sources: status, final URL, headers and the full body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    /// URL after redirects.
    pub url: Url,
    pub headers: Headers,
    pub body: Vec<u8>,
}

impl Response {
    #[must_use]
    pub fn new(status: u16, url: Url, headers: Headers, body: Vec<u8>) -> Self {
        Self {
            status,
            url,
            headers,
            body,
        }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Body decoded as UTF-8, replacing invalid sequences.
    #[must_use]
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Body decoded as JSON.
    ///
    /// # Errors
    ///
    /// Returns the `serde_json` error when the body does not match `T`.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }
}

/// Executes requests against the network.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Executes `request` and returns the response for any HTTP status.
    ///
    /// Non-2xx statuses are not errors at this layer; the runtime classifies them.
    async fn execute(&self, request: Request) -> Result<Response, TransportError>;
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_headers_case_insensitive() {
        let mut headers = Headers::new();
        headers.append("Set-Cookie", "a=1");
        headers.append("set-cookie", "b=2");
        headers.insert("Referer", "https://x/");
        assert_eq!(headers.get("SET-COOKIE"), Some("a=1"));
        assert_eq!(headers.get_all("set-cookie").count(), 2);
        headers.insert("referer", "https://y/");
        assert_eq!(headers.iter().filter(|(k, _)| k.eq_ignore_ascii_case("referer")).count(), 1);
    }

    #[test]
    fn test_with_query_encodes_pairs() {
        let request = Request::get_str("https://desu.me/manga/api/")
            .unwrap()
            .with_query(&[("search", "one piece"), ("genres", "Action,Drama")]);
        assert_eq!(
            request.url.as_str(),
            "https://desu.me/manga/api/?search=one+piece&genres=Action%2CDrama"
        );
    }

    #[test]
    fn test_post_form_round_trips_fields() {
        let url = Url::parse("https://com-x.life/index.php").unwrap();
        let request = Request::post_form(url, &[("do", "search"), ("story", "bat man")]);
        assert_eq!(request.method, Method::Post);
        assert_eq!(
            request.headers.get("content-type"),
            Some("application/x-www-form-urlencoded")
        );
        assert_eq!(
            request.form_fields(),
            vec![
                ("do".to_string(), "search".to_string()),
                ("story".to_string(), "bat man".to_string())
            ]
        );
    }

    #[test]
    fn test_get_str_rejects_relative() {
        assert!(matches!(
            Request::get_str("/manga/1"),
            Err(TransportError::InvalidUrl { .. })
        ));
    }
}
