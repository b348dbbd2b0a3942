//! Error taxonomy shared by every source adapter.
//!
//! A fetch fails for exactly one reason. The variants map one-to-one onto
//! [`FailureKind`](crate::failure::FailureKind), which callers use to decide
//! how to present the failure and whether a manual retry makes sense.

use std::time::Duration;

use thiserror::Error;

use crate::transport::TransportError;

/// Errors returned by source operations and the protocol runtime.
#[derive(Debug, Clone, Error)]
pub enum SourceError {
    /// Network failure, timeout, or an unexpected HTTP status.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The remote site explicitly throttled the request.
    #[error("rate limited by remote site at {url}{}\n  Suggestion: Back off before retrying this source", format_retry_after(.retry_after))]
    RateLimited {
        /// The URL that returned the throttling signal.
        url: String,
        /// Server-mandated delay, when the response carried one.
        retry_after: Option<Duration>,
    },

    /// The response is an interactive challenge page instead of content.
    #[error("[ANTIBOT] challenge page returned for {url}: {marker}\n  Suggestion: Open the site in a browser to pass the challenge, then retry")]
    AntibotChallenge {
        /// The URL that returned the challenge.
        url: String,
        /// Adapter-recognized marker describing the challenge.
        marker: String,
    },

    /// The response did not match the structure the adapter expects.
    #[error("could not decode {context}: {reason}")]
    Decode {
        /// What was being decoded (e.g. "desu catalog page").
        context: String,
        /// Why decoding failed.
        reason: String,
    },

    /// The content exists but is legitimately inaccessible (licensed, region locked).
    #[error("content unavailable for '{locator}': {reason}")]
    Unavailable {
        /// Locator of the inaccessible item.
        locator: String,
        /// Human-readable reason supplied by the adapter.
        reason: String,
    },

    /// The adapter does not implement the requested operation.
    #[error("source '{source_id}' does not support {operation}")]
    Unsupported {
        /// Stable id of the adapter.
        source_id: String,
        /// Name of the protocol operation.
        operation: &'static str,
    },
}

fn format_retry_after(retry_after: &Option<Duration>) -> String {
    match retry_after {
        Some(delay) => format!(" (retry after {}s)", delay.as_secs()),
        None => String::new(),
    }
}

impl SourceError {
    /// Creates a `RateLimited` error.
    #[must_use]
    pub fn rate_limited(url: impl Into<String>, retry_after: Option<Duration>) -> Self {
        Self::RateLimited {
            url: url.into(),
            retry_after,
        }
    }

    /// Creates an `AntibotChallenge` error.
    #[must_use]
    pub fn antibot(url: impl Into<String>, marker: impl Into<String>) -> Self {
        Self::AntibotChallenge {
            url: url.into(),
            marker: marker.into(),
        }
    }

    /// Creates a `Decode` error.
    #[must_use]
    pub fn decode(context: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::Decode {
            context: context.into(),
            reason: reason.to_string(),
        }
    }

    /// Creates an `Unavailable` error.
    #[must_use]
    pub fn unavailable(locator: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Unavailable {
            locator: locator.into(),
            reason: reason.into(),
        }
    }

    /// Creates an `Unsupported` error.
    #[must_use]
    pub fn unsupported(source_id: impl Into<String>, operation: &'static str) -> Self {
        Self::Unsupported {
            source_id: source_id.into(),
            operation,
        }
    }

    /// Returns true for the timeout flavour of a transport failure.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Transport(TransportError::Timeout { .. }))
    }
}
