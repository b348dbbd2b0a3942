//! Default User-Agent for the shared HTTP transport.
//!
//! Adapters that need a browser-like agent (Com-x) override it through their
//! default headers; everything else identifies as this tool.

/// Project URL for User-Agent identification (RFC 9308).
const PROJECT_UA_URL: &str = "https://github.com/sourcekit-rs/sourcekit";

/// `sourcekit/<version> (+<project url>)`.
#[must_use]
pub fn default_user_agent() -> String {
    let version = env!("CARGO_PKG_VERSION");
    format!("sourcekit/{version} (+{PROJECT_UA_URL})")
}
