//! Sourcekit Core Library
//!
//! A uniform adapter protocol over heterogeneous content sites that publish
//! catalog items, chapters and pages. Every site is a [`source::Source`]
//! adapter; callers drive adapters through [`runtime::SourceRuntime`], which
//! owns the shared transport, per-origin rate limiting, cookie sessions and
//! deadlines.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`model`] - Catalog items, chapters, pages and media locators
//! - [`filter`] - Declarative filter schemas and their query encoding
//! - [`transport`] - Request/response types and the reqwest-backed client
//! - [`ratelimit`] - Per-origin sliding-window request budgets
//! - [`session`] - Domain-scoped cookie store
//! - [`source`] - The adapter contract, registry and parsing helpers
//! - [`sources`] - Concrete site adapters
//! - [`runtime`] - Call orchestration, deadlines and media guarding
//! - [`failure`] - Failure classification and retry policy
//! - [`config`] - Runtime configuration file handling

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod error;
pub mod failure;
pub mod filter;
pub mod model;
pub mod ratelimit;
pub mod runtime;
pub mod session;
pub mod source;
pub mod sources;
pub mod transport;
pub mod user_agent;

// Re-export commonly used types
pub use error::SourceError;
pub use failure::{FailureCategory, FailureKind, RetryPolicy, describe};
pub use filter::{FilterList, FilterValue};
pub use model::{CatalogItem, ChapterEntry, ItemStatus, MediaLocator, Page, PageEntry};
pub use ratelimit::{RateBudget, RateLimiter};
pub use runtime::{CallOptions, SourceRuntime};
pub use session::SessionStore;
pub use source::{Source, SourceRegistry, build_default_source_registry};
pub use transport::{Request, Response, Transport, TransportError};
