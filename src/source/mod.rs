//! The protocol every site adapter implements.
//!
//! An adapter is a pure translator between one site's HTML/JSON shape and the
//! uniform content model in [`crate::model`]. Listing operations are split
//! into a synchronous request builder and a synchronous decoder so the
//! [`SourceRuntime`](crate::runtime::SourceRuntime) can drive every adapter
//! through the same rate-limit / session / classification pipeline. Operations
//! that need more than one round trip receive a [`Fetcher`] bound to the
//! current call instead.
//!
//! # Architecture
//!
//! - [`Source`] - async trait implemented by each adapter in [`crate::sources`]
//! - [`SourceRegistry`] - adapters keyed by stable id
//! - [`BranchCache`] - item locator → branch list for branch-dependent sites
//! - [`QueryPolicy`] - how a free-text query interacts with filters
//! - [`MediaGuard`] - minimum media size and its fallback locator

mod branch;
mod registry;
pub(crate) mod utils;

pub use branch::{Branch, BranchCache};
pub use registry::{SourceRegistry, build_default_source_registry};

use std::num::NonZeroU32;

use async_trait::async_trait;
use url::Url;

use crate::error::SourceError;
use crate::filter::FilterList;
use crate::model::{CatalogItem, ChapterEntry, MediaLocator, Page, PageEntry};
use crate::ratelimit::RateBudget;
use crate::runtime::Fetcher;
use crate::transport::{Headers, Request, Response};

/// Query prefix that turns a search into a direct lookup by id.
pub const ID_SEARCH_PREFIX: &str = "id:";

/// How a non-empty search query combines with filter state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueryPolicy {
    /// The site ignores filters on text search; only the query is encoded.
    QueryOverridesFilters,
    /// Query and filters are sent together.
    #[default]
    Combined,
}

impl QueryPolicy {
    /// Returns true when filters are encoded alongside `query`.
    #[must_use]
    pub fn encodes_filters(self, query: &str) -> bool {
        match self {
            Self::Combined => true,
            Self::QueryOverridesFilters => query.trim().is_empty(),
        }
    }
}

/// Media smaller than `min_bytes` is replaced by `fallback`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaGuard {
    pub min_bytes: usize,
    pub fallback: String,
}

impl MediaGuard {
    #[must_use]
    pub fn new(min_bytes: usize, fallback: impl Into<String>) -> Self {
        Self {
            min_bytes,
            fallback: fallback.into(),
        }
    }
}

/// Trait that all site adapters implement.
///
/// Every capability has a method; operations a site does not offer keep the
/// default body, which fails with [`SourceError::Unsupported`], so callers
/// discover capability at call time.
///
/// # Object Safety
///
/// This trait uses `async_trait` so adapters can live behind
/// `Arc<dyn Source>` in the [`SourceRegistry`].
#[async_trait]
pub trait Source: Send + Sync {
    /// Stable identifier (e.g. "desu").
    fn id(&self) -> &str;

    /// Display name.
    fn name(&self) -> &str;

    /// ISO 639-1 language code of the site's content.
    fn lang(&self) -> &str;

    /// Site root; relative locators resolve against it.
    fn base_url(&self) -> &Url;

    fn supports_latest(&self) -> bool {
        false
    }

    fn query_policy(&self) -> QueryPolicy {
        QueryPolicy::Combined
    }

    /// Whether `id:<value>` queries are routed to [`Source::search_by_id`].
    fn supports_id_search(&self) -> bool {
        false
    }

    /// Headers added to every request that does not already carry them.
    fn default_headers(&self) -> Headers {
        let mut headers = Headers::new();
        headers.insert("Referer", self.base_url().as_str());
        headers
    }

    /// Request for page `page` of the popularity listing.
    ///
    /// # Errors
    ///
    /// Fails only when the request URL cannot be built.
    fn build_popular_request(&self, page: NonZeroU32) -> Result<Request, SourceError>;

    /// Decodes a popularity listing page.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Decode`] when the content has an unexpected shape.
    /// An empty page with `has_next == false` is a valid result.
    fn decode_popular_response(&self, response: &Response)
    -> Result<Page<CatalogItem>, SourceError>;

    /// Request for page `page` of the latest-updates listing.
    ///
    /// # Errors
    ///
    /// Defaults to [`SourceError::Unsupported`].
    fn build_latest_request(&self, page: NonZeroU32) -> Result<Request, SourceError> {
        let _ = page;
        Err(SourceError::unsupported(self.id(), "latest"))
    }

    /// Decodes a latest-updates page; defaults to the popular decoder.
    ///
    /// # Errors
    ///
    /// Same contract as [`Source::decode_popular_response`].
    fn decode_latest_response(&self, response: &Response) -> Result<Page<CatalogItem>, SourceError> {
        self.decode_popular_response(response)
    }

    /// Request for a search. The runtime passes an empty filter list when the
    /// adapter's [`QueryPolicy`] says the query overrides filters.
    ///
    /// # Errors
    ///
    /// Defaults to [`SourceError::Unsupported`].
    fn build_search_request(
        &self,
        page: NonZeroU32,
        query: &str,
        filters: &FilterList,
    ) -> Result<Request, SourceError> {
        let _ = (page, query, filters);
        Err(SourceError::unsupported(self.id(), "search"))
    }

    /// Decodes a search page; defaults to the popular decoder.
    ///
    /// # Errors
    ///
    /// Same contract as [`Source::decode_popular_response`].
    fn decode_search_response(&self, response: &Response) -> Result<Page<CatalogItem>, SourceError> {
        self.decode_popular_response(response)
    }

    /// Looks an item up by site id and returns it as a single-item final page.
    ///
    /// # Errors
    ///
    /// Defaults to [`SourceError::Unsupported`].
    async fn search_by_id(&self, fetcher: &Fetcher<'_>, id: &str) -> Result<Page<CatalogItem>, SourceError> {
        let _ = (fetcher, id);
        Err(SourceError::unsupported(self.id(), "id search"))
    }

    /// Enriches `item` from its detail page. The returned item keeps
    /// `item.locator`.
    ///
    /// # Errors
    ///
    /// Transport, classification and decode failures.
    async fn fetch_details(&self, fetcher: &Fetcher<'_>, item: &CatalogItem) -> Result<CatalogItem, SourceError>;

    /// Chapters of `item` in the adapter's documented order.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Unavailable`] when the site marks the item as
    /// licensed or restricted.
    async fn fetch_chapter_list(
        &self,
        fetcher: &Fetcher<'_>,
        item: &CatalogItem,
    ) -> Result<Vec<ChapterEntry>, SourceError>;

    /// Pages of `chapter` in reading order.
    ///
    /// # Errors
    ///
    /// Transport, classification and decode failures.
    async fn fetch_page_list(
        &self,
        fetcher: &Fetcher<'_>,
        chapter: &ChapterEntry,
    ) -> Result<Vec<PageEntry>, SourceError>;

    /// Turns a page into final media locators.
    ///
    /// Direct pages resolve to themselves. Intermediate pages need an adapter
    /// override.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Unsupported`] for an intermediate page the
    /// adapter cannot resolve.
    async fn resolve_page(&self, fetcher: &Fetcher<'_>, page: &PageEntry) -> Result<Vec<String>, SourceError> {
        let _ = fetcher;
        match &page.media {
            MediaLocator::Direct(url) => Ok(vec![url.clone()]),
            MediaLocator::Intermediate(_) => {
                Err(SourceError::unsupported(self.id(), "intermediate page resolution"))
            }
        }
    }

    /// Static filter schema in its default state. Never touches the network.
    fn declare_filters(&self) -> FilterList {
        FilterList::empty()
    }

    /// Returns a marker when `response` is an interactive challenge page.
    fn detect_challenge(&self, response: &Response) -> Option<String> {
        let _ = response;
        None
    }

    /// Budget for the adapter's own origin, installed on registration.
    fn rate_budget(&self) -> Option<RateBudget> {
        None
    }

    /// Budgets for additional origins the adapter talks to (API or CDN hosts).
    fn extra_budgets(&self) -> Vec<(String, RateBudget)> {
        Vec::new()
    }

    fn media_guard(&self) -> Option<MediaGuard> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_policy_encodes_filters() {
        assert!(QueryPolicy::Combined.encodes_filters("naruto"));
        assert!(QueryPolicy::Combined.encodes_filters(""));
        assert!(!QueryPolicy::QueryOverridesFilters.encodes_filters("naruto"));
        assert!(QueryPolicy::QueryOverridesFilters.encodes_filters("  "));
    }

    #[test]
    fn test_default_query_policy_is_combined() {
        assert_eq!(QueryPolicy::default(), QueryPolicy::Combined);
    }
}
