//! Transport-level failures.

use thiserror::Error;

/// Errors produced while executing an outbound request.
///
/// Every variant is safe to retry with backoff. The type is `Clone` so the
/// same failure can be reported to several waiters; the underlying client
/// error is therefore kept as its rendered message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// DNS, connection, TLS or body read failure.
    #[error("network error requesting {url}: {message}")]
    Network {
        /// The URL being requested.
        url: String,
        /// Rendered client error.
        message: String,
    },

    /// The per-operation deadline elapsed (while waiting for a permit or for the response).
    #[error("timeout requesting {url}")]
    Timeout {
        /// The URL being requested.
        url: String,
    },

    /// The site answered with a status the adapter did not expect.
    #[error("HTTP {status} requesting {url}")]
    HttpStatus {
        /// The URL that returned the status.
        url: String,
        /// The HTTP status code.
        status: u16,
    },

    /// A locator could not be turned into a request URL.
    #[error("invalid URL '{url}': {reason}")]
    InvalidUrl {
        /// The rejected input.
        url: String,
        /// Parser message.
        reason: String,
    },

    /// The HTTP client itself could not be constructed.
    #[error("HTTP client construction failed: {reason}")]
    Client {
        /// What went wrong.
        reason: String,
    },
}

impl TransportError {
    /// Creates a network error.
    pub fn network(url: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::Network {
            url: url.into(),
            message: message.to_string(),
        }
    }

    /// Creates a timeout error.
    pub fn timeout(url: impl Into<String>) -> Self {
        Self::Timeout { url: url.into() }
    }

    /// Creates an HTTP status error.
    pub fn http_status(url: impl Into<String>, status: u16) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
        }
    }

    /// Creates an invalid URL error.
    pub fn invalid_url(url: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::InvalidUrl {
            url: url.into(),
            reason: reason.to_string(),
        }
    }

    /// Creates a client construction error.
    pub fn client(reason: impl Into<String>) -> Self {
        Self::Client {
            reason: reason.into(),
        }
    }

    /// HTTP status carried by the error, if any.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::HttpStatus { status, .. } => Some(*status),
            _ => None,
        }
    }
}
