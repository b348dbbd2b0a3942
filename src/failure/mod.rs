//! Failure classification and user-facing descriptors for source errors.

mod retry;

use serde::Serialize;

use crate::error::SourceError;
use crate::transport::TransportError;

pub use retry::{DEFAULT_MAX_RETRIES, RetryDecision, RetryPolicy, run_with_retry};

/// The single reason an operation failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Transport,
    RateLimited,
    AntibotChallenge,
    Decode,
    Unavailable,
    Unsupported,
}

impl SourceError {
    /// Classifies the error.
    #[must_use]
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Transport(_) => FailureKind::Transport,
            Self::RateLimited { .. } => FailureKind::RateLimited,
            Self::AntibotChallenge { .. } => FailureKind::AntibotChallenge,
            Self::Decode { .. } => FailureKind::Decode,
            Self::Unavailable { .. } => FailureKind::Unavailable,
            Self::Unsupported { .. } => FailureKind::Unsupported,
        }
    }
}

/// Coarse grouping used when presenting failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCategory {
    Interactive,
    Content,
    Network,
    Other,
}

impl FailureCategory {
    #[must_use]
    pub fn icon(self) -> &'static str {
        match self {
            Self::Interactive => "🔐",
            Self::Content => "❌",
            Self::Network => "🌐",
            Self::Other => "⚠️",
        }
    }

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Interactive => "Needs interaction",
            Self::Content => "Content",
            Self::Network => "Network",
            Self::Other => "Other",
        }
    }
}

/// What happened, why, and what the user can do about it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FailureDescriptor {
    pub category: FailureCategory,
    pub what: &'static str,
    pub why: &'static str,
    pub fix: &'static str,
    /// Whether offering a manual retry makes sense.
    pub retryable: bool,
}

/// Maps an error to its user-facing descriptor.
#[must_use]
pub fn describe(error: &SourceError) -> FailureDescriptor {
    match error {
        SourceError::AntibotChallenge { .. } => FailureDescriptor {
            category: FailureCategory::Interactive,
            what: "Site requires a browser check",
            why: "The site answered with an interactive challenge page instead of content.",
            fix: "Resolve it interactively: open the site in a browser, then retry.",
            retryable: false,
        },
        SourceError::Unavailable { .. } => FailureDescriptor {
            category: FailureCategory::Content,
            what: "Content unavailable",
            why: "The title is licensed or restricted on this site, so it has no readable chapters.",
            fix: "Look for the title on another source.",
            retryable: false,
        },
        SourceError::Unsupported { .. } => FailureDescriptor {
            category: FailureCategory::Content,
            what: "Operation not supported",
            why: "This source does not offer the requested listing or lookup.",
            fix: "Use another operation or another source.",
            retryable: false,
        },
        SourceError::RateLimited { .. } => FailureDescriptor {
            category: FailureCategory::Network,
            what: "Rate limited by site",
            why: "The site asked the client to slow down.",
            fix: "Wait for the indicated delay, then retry.",
            retryable: true,
        },
        SourceError::Transport(TransportError::Timeout { .. }) => FailureDescriptor {
            category: FailureCategory::Network,
            what: "Request timed out",
            why: "The site did not answer within the operation timeout.",
            fix: "Check network stability or raise the timeout, then retry.",
            retryable: true,
        },
        SourceError::Transport(
            TransportError::InvalidUrl { .. } | TransportError::Client { .. },
        ) => FailureDescriptor {
            category: FailureCategory::Other,
            what: "Request could not be built",
            why: "The locator or client configuration is invalid.",
            fix: "Check the locator and configuration; retrying will not help.",
            retryable: false,
        },
        SourceError::Transport(_) => FailureDescriptor {
            category: FailureCategory::Network,
            what: "Request failed",
            why: "A connectivity problem or an unexpected HTTP status interrupted the request.",
            fix: "Retry; if it persists the site may be down.",
            retryable: true,
        },
        SourceError::Decode { .. } => FailureDescriptor {
            category: FailureCategory::Other,
            what: "Unexpected page structure",
            why: "The site's response no longer matches what this source understands.",
            fix: "Retry manually; if it persists the source needs an update.",
            retryable: true,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_is_one_to_one() {
        assert_eq!(SourceError::antibot("u", "m").kind(), FailureKind::AntibotChallenge);
        assert_eq!(SourceError::unavailable("/1", "licensed").kind(), FailureKind::Unavailable);
        assert_eq!(SourceError::decode("x", "y").kind(), FailureKind::Decode);
        assert_eq!(SourceError::rate_limited("u", None).kind(), FailureKind::RateLimited);
        assert_eq!(SourceError::unsupported("s", "latest").kind(), FailureKind::Unsupported);
        assert_eq!(
            SourceError::from(TransportError::timeout("u")).kind(),
            FailureKind::Transport
        );
    }

    #[test]
    fn test_antibot_descriptor_points_to_browser() {
        let descriptor = describe(&SourceError::antibot("https://com-x.life/", "404"));
        assert_eq!(descriptor.category, FailureCategory::Interactive);
        assert!(descriptor.fix.contains("browser"));
        assert!(!descriptor.retryable);
    }

    #[test]
    fn test_unavailable_is_not_generic_failure() {
        let unavailable = describe(&SourceError::unavailable("/1", "licensed"));
        let decode = describe(&SourceError::decode("page", "missing field"));
        assert_ne!(unavailable, decode);
        assert!(!unavailable.retryable);
        assert!(decode.retryable);
    }

    #[test]
    fn test_invalid_url_not_retryable() {
        let descriptor = describe(&SourceError::from(TransportError::invalid_url("x", "bad")));
        assert!(!descriptor.retryable);
    }
}
