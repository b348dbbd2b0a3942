//! `reqwest`-backed [`Transport`].
//!
//! Cookies are deliberately not handled by reqwest: the session store owns
//! them so that capture stays synchronous and per-origin.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, ClientBuilder, Proxy};
use tracing::{debug, warn};

use super::{Headers, Method, Request, Response, Transport, TransportError};

const CONNECT_TIMEOUT_SECS: u64 = 10;
const READ_TIMEOUT_SECS: u64 = 30;

/// Client-level timeouts. The per-operation deadline is applied separately by the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HttpTimeouts {
    pub connect: Duration,
    pub read: Duration,
}

impl Default for HttpTimeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(CONNECT_TIMEOUT_SECS),
            read: Duration::from_secs(READ_TIMEOUT_SECS),
        }
    }
}

/// Production transport.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    /// Builds the transport.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Client`] when the client cannot be constructed.
    pub fn new(user_agent: &str, timeouts: HttpTimeouts) -> Result<Self, TransportError> {
        match try_build_client(user_agent, timeouts, false) {
            Ok(client) => Ok(Self { client }),
            Err(BuildClientFailure::Panic) => {
                // Some sandboxed environments panic when querying system proxy
                // settings; env proxies still apply on the fallback path.
                warn!("HTTP client hit system proxy panic; using env-proxy fallback builder");
                match try_build_client(user_agent, timeouts, true) {
                    Ok(client) => Ok(Self { client }),
                    Err(BuildClientFailure::Panic) => Err(TransportError::client(
                        "HTTP client construction panicked while initializing networking",
                    )),
                    Err(BuildClientFailure::Build(error)) => {
                        Err(TransportError::client(error.to_string()))
                    }
                }
            }
            Err(BuildClientFailure::Build(error)) => Err(TransportError::client(error.to_string())),
        }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn execute(&self, request: Request) -> Result<Response, TransportError> {
        let url = request.url.to_string();
        let method = match request.method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
        };
        let mut builder = self.client.request(method, request.url);
        for (name, value) in request.headers.iter() {
            builder = builder.header(name, value);
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await.map_err(|e| map_error(&url, &e))?;
        let status = response.status().as_u16();
        let final_url = response.url().clone();
        let headers: Headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = response.bytes().await.map_err(|e| map_error(&url, &e))?;
        debug!(url = %url, status, bytes = body.len(), "Response received");

        Ok(Response::new(status, final_url, headers, body.to_vec()))
    }
}

fn map_error(url: &str, error: &reqwest::Error) -> TransportError {
    if error.is_timeout() {
        TransportError::timeout(url)
    } else {
        TransportError::network(url, error)
    }
}

enum BuildClientFailure {
    Panic,
    Build(reqwest::Error),
}

fn try_build_client(
    user_agent: &str,
    timeouts: HttpTimeouts,
    disable_system_proxy_lookup: bool,
) -> Result<Client, BuildClientFailure> {
    let user_agent = user_agent.to_string();
    catch_unwind(AssertUnwindSafe(move || {
        let mut builder = base_builder(user_agent, timeouts);
        if disable_system_proxy_lookup {
            builder = apply_env_proxy_fallback(builder.no_proxy());
        }
        builder.build().map_err(BuildClientFailure::Build)
    }))
    .map_err(|_| BuildClientFailure::Panic)?
}

fn base_builder(user_agent: String, timeouts: HttpTimeouts) -> ClientBuilder {
    Client::builder()
        .connect_timeout(timeouts.connect)
        .timeout(timeouts.read)
        .user_agent(user_agent)
        .gzip(true)
}

fn apply_env_proxy_fallback(mut builder: ClientBuilder) -> ClientBuilder {
    if let Some(proxy) = env_proxy_for_scheme("https")
        && let Ok(resolved) = Proxy::https(&proxy)
    {
        builder = builder.proxy(resolved);
    }
    if let Some(proxy) = env_proxy_for_scheme("http")
        && let Ok(resolved) = Proxy::http(&proxy)
    {
        builder = builder.proxy(resolved);
    }
    builder
}

fn env_proxy_for_scheme(scheme: &str) -> Option<String> {
    let names: &[&str] = match scheme {
        "https" => &["HTTPS_PROXY", "https_proxy", "ALL_PROXY", "all_proxy"],
        "http" => &["HTTP_PROXY", "http_proxy", "ALL_PROXY", "all_proxy"],
        _ => return None,
    };
    names.iter().find_map(|name| {
        std::env::var(name)
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_timeouts() {
        let timeouts = HttpTimeouts::default();
        assert_eq!(timeouts.connect, Duration::from_secs(10));
        assert_eq!(timeouts.read, Duration::from_secs(30));
    }

    #[test]
    fn test_unknown_proxy_scheme_is_ignored() {
        assert_eq!(env_proxy_for_scheme("ftp"), None);
    }
}
